//! Reorders the pickups of a single route with an external ATSP solver.
//!
//! The base and drop-off are pinned by the weights: entering the base costs
//! [`FORBIDDEN_WEIGHT`] from everywhere except the drop-off, where it is
//! free. Any good tour therefore closes with `drop_off -> base`, and read
//! from the base it is an open path ending at the drop-off.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::{PlannerResult, TspError};
use crate::matrix::{CostMatrices, TravelMatrix};
use crate::solution::{PlannedRoute, PollutionObjective};
use crate::traits::{NodeId, TspSolver};
use crate::tsplib::AtspProblem;

/// Weight of self-loops and of edges into the base other than from the
/// drop-off.
pub const FORBIDDEN_WEIGHT: i64 = 10_000_000;

/// Result of optimizing one route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TourOutcome {
    /// The solver found a shorter order, which was applied.
    Improved { before: f64, after: f64 },
    /// The solver's order is no shorter; the route was left as is.
    Unchanged,
    /// Too few pickups to reorder.
    Skipped,
    /// This exact stop sequence was optimized before in this run.
    Cached,
    /// The solver failed; the route was left as is.
    Failed,
}

/// Hash of a stop sequence, used to skip repeated solver calls.
pub fn tour_key(stops: &[NodeId]) -> u64 {
    let mut hasher = DefaultHasher::new();
    stops.hash(&mut hasher);
    hasher.finish()
}

/// Builds the fixed-endpoint ATSP instance for `route`.
///
/// Node `k` of the instance is `route[k]`; the base is node 0 and the
/// drop-off the last node.
pub fn fixed_endpoint_problem(name: &str, route: &[NodeId], matrix: &TravelMatrix) -> PlannerResult<AtspProblem> {
    let last = route.len().saturating_sub(1);
    let mut weights = Vec::with_capacity(route.len());
    for (row, from) in route.iter().enumerate() {
        let mut line = Vec::with_capacity(route.len());
        for (column, to) in route.iter().enumerate() {
            let weight = if row == column {
                FORBIDDEN_WEIGHT
            } else if column == 0 {
                if row == last { 0 } else { FORBIDDEN_WEIGHT }
            } else {
                matrix.cost(from, to)?.round() as i64
            };
            line.push(weight);
        }
        weights.push(line);
    }
    let comment = format!("{} -> {}", route[0], route[last]);
    Ok(AtspProblem::new(name, weights)?.with_comment(comment))
}

/// Turns a solver tour into a route: rotates it to start at the base and
/// checks it is a permutation ending at the drop-off.
pub fn tour_to_route(route: &[NodeId], tour: &[usize]) -> Result<Vec<NodeId>, TspError> {
    let dimension = route.len();
    if tour.len() != dimension {
        return Err(TspError::invalid_data(format!(
            "tour visits {} nodes, expected {dimension}",
            tour.len()
        )));
    }
    let mut seen = vec![false; dimension];
    for &node in tour {
        if node >= dimension || std::mem::replace(&mut seen[node], true) {
            return Err(TspError::invalid_data(format!("tour is not a permutation: {tour:?}")));
        }
    }

    let start = tour
        .iter()
        .position(|&node| node == 0)
        .ok_or_else(|| TspError::invalid_data("tour does not visit the base"))?;
    let ordered: Vec<usize> = tour[start..].iter().chain(&tour[..start]).copied().collect();
    if ordered.last() != Some(&(dimension - 1)) {
        return Err(TspError::invalid_data(format!(
            "tour does not end at the drop-off: {ordered:?}"
        )));
    }
    Ok(ordered.into_iter().map(|node| route[node].clone()).collect())
}

/// Reorders `route` with `solver` when that shortens it.
///
/// Solver failures are logged and leave the route unchanged; matrix gaps
/// are returned as errors.
pub fn optimize_route<T>(
    route: &mut PlannedRoute,
    matrices: &CostMatrices,
    solver: &T,
    objective: &mut PollutionObjective,
    tours: &mut HashSet<u64>,
) -> PlannerResult<TourOutcome>
where
    T: TspSolver + ?Sized,
{
    if route.pickups().len() < 2 {
        return Ok(TourOutcome::Skipped);
    }
    let key = tour_key(&route.stops);
    if !tours.insert(key) {
        tracing::debug!(route = %route.info.route_id, "tour already optimized");
        return Ok(TourOutcome::Cached);
    }

    let problem = fixed_endpoint_problem(&route.info.route_id, &route.stops, &matrices.primary)?;
    let reordered = match solver
        .solve(&problem)
        .and_then(|tour| tour_to_route(&route.stops, &tour))
    {
        Ok(reordered) => reordered,
        Err(err) => {
            tracing::warn!(route = %route.info.route_id, %err, "tsp solver failed; keeping route");
            return Ok(TourOutcome::Failed);
        }
    };

    let before = route.info.length;
    let after = matrices.primary.route_cost(&reordered)?;
    if after > before || reordered == route.stops {
        return Ok(TourOutcome::Unchanged);
    }

    tours.insert(tour_key(&reordered));
    route.stops = reordered;
    route.refresh(matrices, objective)?;
    tracing::debug!(route = %route.info.route_id, before, after, "tour improved");
    Ok(TourOutcome::Improved { before, after })
}
