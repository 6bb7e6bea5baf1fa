//! Interfaces to the collaborators the optimizer depends on.
//!
//! The knowledge store, the routing-distance provider and the TSP solver all
//! live outside this crate. Concrete apps implement these traits for their
//! own backends; `store`, `osrm`, `haversine` and `lkh` ship ready-made ones.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PlannerResult, TspError};
use crate::matrix::TravelMatrix;
use crate::probability::PollutionDistribution;
use crate::route::{Layer, RouteInfo};
use crate::tsplib::AtspProblem;

/// Opaque identifier of a stop (pickup, base or drop-off).
pub type NodeId = String;

/// Which travel cost a matrix holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostMetric {
    Distance,
    Duration,
}

impl CostMetric {
    /// The metric tracked alongside this one for reporting.
    pub fn other(self) -> Self {
        match self {
            CostMetric::Distance => CostMetric::Duration,
            CostMetric::Duration => CostMetric::Distance,
        }
    }
}

/// Comparison applied by the pickup selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOperator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl ThresholdOperator {
    pub fn matches(self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdOperator::Lt => value < threshold,
            ThresholdOperator::Le => value <= threshold,
            ThresholdOperator::Gt => value > threshold,
            ThresholdOperator::Ge => value >= threshold,
            ThresholdOperator::Eq => value == threshold,
        }
    }
}

impl fmt::Display for ThresholdOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ThresholdOperator::Lt => "<",
            ThresholdOperator::Le => "<=",
            ThresholdOperator::Gt => ">",
            ThresholdOperator::Ge => ">=",
            ThresholdOperator::Eq => "=",
        };
        f.write_str(op)
    }
}

/// Provides travel costs between every connected pair of the given nodes.
///
/// Pairs the provider cannot connect are simply absent from the result; a
/// later lookup of such a pair is a `MissingEdge` error.
pub trait MatrixProvider: Send + Sync {
    fn travel_cost_matrix(&self, nodes: &[NodeId], metric: CostMetric) -> PlannerResult<TravelMatrix>;
}

/// Selects the pickups of a planning day by a pollution metric.
pub trait PickupSelector: Send + Sync {
    /// Returns the pickups whose `metric` satisfies `operator threshold` on
    /// `date`, in a stable order.
    fn select_pickups(
        &self,
        metric: &str,
        operator: ThresholdOperator,
        threshold: f64,
        date: &str,
    ) -> PlannerResult<Vec<NodeId>>;
}

/// Provides the per-stop pollution distribution stored under `property`.
pub trait DistributionProvider: Send + Sync {
    fn distributions(
        &self,
        nodes: &[NodeId],
        property: &str,
    ) -> PlannerResult<HashMap<NodeId, PollutionDistribution>>;
}

/// Persistence of route results.
pub trait RouteStore: Send + Sync {
    /// Creates a route with its edges. Rewriting an identical route is a
    /// no-op; reusing an id with different contents fails.
    fn write_route(&self, layer: &Layer, info: &RouteInfo, stops: &[NodeId]) -> PlannerResult<()>;

    /// Replaces a route: the prior record and all its edges are removed
    /// before the new ones are written, as one step.
    fn update_route(&self, layer: &Layer, info: &RouteInfo, stops: &[NodeId]) -> PlannerResult<()>;

    /// Removes a route and its edges. Unknown ids are not an error.
    fn delete_route(&self, layer: &Layer, route_id: &str) -> PlannerResult<()>;

    /// All routes of `layer` planned for `date` with the given alpha.
    fn route_infos(&self, layer: &Layer, date: &str, alpha: f64) -> PlannerResult<Vec<RouteInfo>>;

    /// The full node sequence (base, pickups, drop-off) of a route.
    fn route_stops(&self, layer: &Layer, route_id: &str) -> PlannerResult<Vec<NodeId>>;

    /// Removes every route of `layer`.
    fn clear_layer(&self, layer: &Layer) -> PlannerResult<()>;
}

/// Solves an asymmetric TSP instance and returns the zero-based visiting
/// order of its nodes.
pub trait TspSolver: Send + Sync {
    fn solve(&self, problem: &AtspProblem) -> Result<Vec<usize>, TspError>;
}

/// The collaborators one planning run talks to.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    pub selector: &'a dyn PickupSelector,
    pub matrices: &'a dyn MatrixProvider,
    pub distributions: &'a dyn DistributionProvider,
    pub store: &'a dyn RouteStore,
    pub solver: &'a dyn TspSolver,
}
