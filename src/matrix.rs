//! Travel-cost matrices keyed by node id.

use std::collections::HashMap;

use crate::error::{PlannerError, PlannerResult};
use crate::traits::{CostMetric, MatrixProvider, NodeId};

/// `(lat, lng)` of every node a coordinate-based provider knows.
pub type Locations = HashMap<NodeId, (f64, f64)>;

/// Sparse mapping `source -> target -> cost`.
///
/// Only connected pairs are present. The cost of a node to itself is always
/// zero, whether or not the provider listed it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TravelMatrix {
    entries: HashMap<NodeId, HashMap<NodeId, f64>>,
}

impl TravelMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<NodeId, HashMap<NodeId, f64>>) -> Self {
        Self { entries }
    }

    pub fn insert(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>, cost: f64) {
        self.entries
            .entry(from.into())
            .or_default()
            .insert(to.into(), cost);
    }

    /// Looks up the cost of travelling `from -> to`.
    pub fn cost(&self, from: &str, to: &str) -> PlannerResult<f64> {
        if from == to {
            return Ok(0.0);
        }
        self.entries
            .get(from)
            .and_then(|row| row.get(to))
            .copied()
            .ok_or_else(|| PlannerError::missing_edge(from, to))
    }

    pub fn contains(&self, from: &str, to: &str) -> bool {
        from == to || self.entries.get(from).is_some_and(|row| row.contains_key(to))
    }

    /// Sum of consecutive edge costs along `route`.
    pub fn route_cost(&self, route: &[NodeId]) -> PlannerResult<f64> {
        route
            .windows(2)
            .map(|pair| self.cost(&pair[0], &pair[1]))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The matrix minimized by the optimizer plus the one tracked for reporting.
#[derive(Debug, Clone)]
pub struct CostMatrices {
    pub metric: CostMetric,
    pub primary: TravelMatrix,
    pub secondary: TravelMatrix,
}

impl CostMatrices {
    pub fn new(metric: CostMetric, primary: TravelMatrix, secondary: TravelMatrix) -> Self {
        Self {
            metric,
            primary,
            secondary,
        }
    }

    /// Fetches both matrices for `nodes`, with `metric` as the primary one.
    pub fn fetch<M>(provider: &M, nodes: &[NodeId], metric: CostMetric) -> PlannerResult<Self>
    where
        M: MatrixProvider + ?Sized,
    {
        let primary = provider.travel_cost_matrix(nodes, metric)?;
        let secondary = provider.travel_cost_matrix(nodes, metric.other())?;
        tracing::debug!(
            nodes = nodes.len(),
            primary_entries = primary.len(),
            secondary_entries = secondary.len(),
            "fetched travel cost matrices"
        );
        Ok(Self::new(metric, primary, secondary))
    }

    /// Primary and secondary cost of a full route.
    pub fn route_costs(&self, route: &[NodeId]) -> PlannerResult<(f64, f64)> {
        Ok((self.primary.route_cost(route)?, self.secondary.route_cost(route)?))
    }
}
