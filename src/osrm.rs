//! OSRM HTTP adapter for travel-cost matrices.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, PlannerResult};
use crate::matrix::{Locations, TravelMatrix};
use crate::traits::{CostMetric, MatrixProvider, NodeId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Queries the OSRM `table` service for the nodes of a catalog.
#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
    locations: Locations,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig, locations: Locations) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            locations,
        })
    }

    fn table_url(&self, coordinates: &[(f64, f64)], metric: CostMetric) -> String {
        let coords = coordinates
            .iter()
            .map(|(lat, lng)| format!("{:.6},{:.6}", lng, lat))
            .collect::<Vec<_>>()
            .join(";");
        let annotation = match metric {
            CostMetric::Distance => "distance",
            CostMetric::Duration => "duration",
        };
        format!(
            "{}/table/v1/{}/{}?annotations={annotation}",
            self.config.base_url, self.config.profile, coords
        )
    }
}

impl MatrixProvider for OsrmClient {
    fn travel_cost_matrix(&self, nodes: &[NodeId], metric: CostMetric) -> PlannerResult<TravelMatrix> {
        let located: Vec<(&NodeId, (f64, f64))> = nodes
            .iter()
            .filter_map(|node| self.locations.get(node).map(|location| (node, *location)))
            .collect();
        if located.len() < nodes.len() {
            tracing::warn!(
                missing = nodes.len() - located.len(),
                "nodes without coordinates are left out of the matrix"
            );
        }
        if located.is_empty() {
            return Ok(TravelMatrix::new());
        }

        let coordinates: Vec<(f64, f64)> = located.iter().map(|(_, location)| *location).collect();
        let body = self
            .client
            .get(self.table_url(&coordinates, metric))
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<OsrmTableResponse>())?;

        let ids: Vec<&NodeId> = located.iter().map(|(node, _)| *node).collect();
        body.into_matrix(&ids, metric)
    }
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    message: Option<String>,
    durations: Option<Vec<Vec<Option<f64>>>>,
    distances: Option<Vec<Vec<Option<f64>>>>,
}

impl OsrmTableResponse {
    /// Unreachable pairs come back as `null` and are left out.
    fn into_matrix(self, ids: &[&NodeId], metric: CostMetric) -> PlannerResult<TravelMatrix> {
        if self.code != "Ok" {
            return Err(PlannerError::provider(format!(
                "osrm table returned {}: {}",
                self.code,
                self.message.unwrap_or_default()
            )));
        }
        let rows = match metric {
            CostMetric::Distance => self.distances,
            CostMetric::Duration => self.durations,
        }
        .ok_or_else(|| PlannerError::provider(format!("osrm table response has no {metric:?} annotation")))?;
        if rows.len() != ids.len() {
            return Err(PlannerError::provider(format!(
                "osrm table has {} rows for {} nodes",
                rows.len(),
                ids.len()
            )));
        }

        let mut entries: HashMap<NodeId, HashMap<NodeId, f64>> = HashMap::with_capacity(ids.len());
        for (from, row) in ids.iter().zip(rows) {
            let targets = entries.entry((*from).clone()).or_default();
            for (to, value) in ids.iter().zip(row) {
                if let Some(value) = value {
                    targets.insert((*to).clone(), value);
                }
            }
        }
        Ok(TravelMatrix::from_entries(entries))
    }
}
