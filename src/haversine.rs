//! Haversine travel-cost provider (fallback when OSRM unavailable).
//!
//! Uses great-circle distance and an assumed speed. Less accurate than OSRM
//! (ignores roads) but always available.

use crate::error::PlannerResult;
use crate::matrix::{Locations, TravelMatrix};
use crate::traits::{CostMetric, MatrixProvider, NodeId};

/// Average driving speed assumption for time estimation.
const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Straight-line travel costs between catalogued nodes.
///
/// Distances are in meters and durations in seconds, matching OSRM.
#[derive(Debug, Clone)]
pub struct HaversineMatrix {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
    locations: Locations,
}

impl HaversineMatrix {
    pub fn new(locations: Locations) -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
            locations,
        }
    }

    pub fn with_speed(mut self, speed_kmh: f64) -> Self {
        self.speed_kmh = speed_kmh;
        self
    }

    /// Great-circle distance between two `(lat, lng)` points in kilometers.
    fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
        let (lat1, lng1) = from;
        let (lat2, lng2) = to;

        let delta_lat = (lat2 - lat1).to_radians();
        let delta_lng = (lng2 - lng1).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.to_radians().cos() * lat2.to_radians().cos() * (delta_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }

    fn cost(&self, km: f64, metric: CostMetric) -> f64 {
        match metric {
            CostMetric::Distance => km * 1000.0,
            CostMetric::Duration => km / self.speed_kmh * 3600.0,
        }
    }
}

impl MatrixProvider for HaversineMatrix {
    fn travel_cost_matrix(&self, nodes: &[NodeId], metric: CostMetric) -> PlannerResult<TravelMatrix> {
        let mut matrix = TravelMatrix::new();
        for from in nodes {
            let Some(&origin) = self.locations.get(from) else {
                continue;
            };
            for to in nodes {
                if from == to {
                    continue;
                }
                if let Some(&target) = self.locations.get(to) {
                    matrix.insert(from.clone(), to.clone(), self.cost(Self::haversine_km(origin, target), metric));
                }
            }
        }
        Ok(matrix)
    }
}
