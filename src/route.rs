//! Persisted route records.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::probability::{PollutionDistribution, ProbabilityKind};
use crate::traits::{CostMetric, NodeId};

/// Whether a route collects clean or polluted waste.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    Clean,
    Dirty,
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteClass::Clean => f.write_str("clean"),
            RouteClass::Dirty => f.write_str("dirty"),
        }
    }
}

/// Tag separating the route sets written by different algorithms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// Output of the greedy construction phase.
    Greedy,
    /// Local search under the classification objective.
    Classification,
    /// Local search under the stochastic objective.
    Stochastic(ProbabilityKind),
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Greedy => f.write_str("LAYER_GREEDY"),
            Layer::Classification => f.write_str("LAYER_LS_CLASSIFICATION"),
            Layer::Stochastic(kind) => {
                write!(f, "LAYER_LS_STOCHASTIC_{}", kind.name().to_ascii_uppercase())
            }
        }
    }
}

/// The fixed start and end of every route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depot {
    pub base: NodeId,
    pub drop_off: NodeId,
}

impl Depot {
    pub fn new(base: impl Into<NodeId>, drop_off: impl Into<NodeId>) -> Self {
        Self {
            base: base.into(),
            drop_off: drop_off.into(),
        }
    }

    /// `[base, pickups.., drop_off]`.
    pub fn wrap(&self, pickups: &[NodeId]) -> Vec<NodeId> {
        let mut route = Vec::with_capacity(pickups.len() + 2);
        route.push(self.base.clone());
        route.extend_from_slice(pickups);
        route.push(self.drop_off.clone());
        route
    }
}

/// Optional per-route capacity limits. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RouteLimits {
    pub max_route_length: Option<f64>,
    pub max_stops_per_route: Option<usize>,
}

impl RouteLimits {
    pub const UNBOUNDED: RouteLimits = RouteLimits {
        max_route_length: None,
        max_stops_per_route: None,
    };

    pub fn admits_length(&self, length: f64) -> bool {
        self.max_route_length.is_none_or(|max| length <= max)
    }

    pub fn admits_stops(&self, stops: usize) -> bool {
        self.max_stops_per_route.is_none_or(|max| stops <= max)
    }
}

/// Parameters of the run that produced a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteParams {
    pub alpha: f64,
    pub max_route_length: Option<f64>,
    pub max_stops_per_route: Option<usize>,
    pub pollution_metric: String,
    pub clean_waste_threshold: f64,
}

impl RouteParams {
    pub fn limits(&self) -> RouteLimits {
        RouteLimits {
            max_route_length: self.max_route_length,
            max_stops_per_route: self.max_stops_per_route,
        }
    }
}

/// Probability-of-clean of a route and the distributions backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StochasticInfo {
    pub probability: ProbabilityKind,
    pub probability_clean: f64,
    /// One entry per pickup, in route order.
    pub distributions: Vec<PollutionDistribution>,
}

/// Metadata of one physical route.
///
/// Replaced as a whole whenever the route's stop sequence changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub route_id: String,
    pub date: String,
    pub metric: CostMetric,
    /// Cumulative cost in the optimized metric.
    pub length: f64,
    /// Cumulative cost in the other metric.
    pub secondary_length: f64,
    pub stops: usize,
    pub class: RouteClass,
    pub params: RouteParams,
    pub simulated_annealing: bool,
    pub stochastic: Option<StochasticInfo>,
}

impl RouteInfo {
    pub fn probability_clean(&self) -> Option<f64> {
        self.stochastic.as_ref().map(|info| info.probability_clean)
    }
}

/// One persisted leg of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub position: usize,
}

/// Splits a node sequence into its ordered edges.
pub fn route_edges(stops: &[NodeId]) -> Vec<RouteEdge> {
    stops
        .windows(2)
        .enumerate()
        .map(|(position, pair)| RouteEdge {
            source: pair[0].clone(),
            target: pair[1].clone(),
            position,
        })
        .collect()
}

/// Rebuilds a node sequence from its edges, in any order.
pub fn stops_from_edges(edges: &[RouteEdge]) -> Vec<NodeId> {
    let mut ordered: Vec<&RouteEdge> = edges.iter().collect();
    ordered.sort_by_key(|edge| edge.position);

    let mut stops = Vec::with_capacity(ordered.len() + 1);
    if let Some(first) = ordered.first() {
        stops.push(first.source.clone());
    }
    stops.extend(ordered.iter().map(|edge| edge.target.clone()));
    stops
}

/// The pickups of a route, without base and drop-off.
pub fn interior(route: &[NodeId]) -> &[NodeId] {
    if route.len() < 2 {
        return &[];
    }
    &route[1..route.len() - 1]
}

/// A fresh random route id.
pub fn new_route_id() -> String {
    let value: u128 = rand::rng().random();
    format!("{value:032x}")
}
