//! Cross-exchange: swap contiguous pickup segments between two routes.
//!
//! A move is `(start1, start2, len1, len2)`: the `len1` pickups starting at
//! index `start1` of route 1 trade places with the `len2` pickups starting
//! at `start2` of route 2. Either segment may be empty, which turns the move
//! into a relocation. Only the four edges around the segments change.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::annealing::Acceptance;
use crate::error::PlannerResult;
use crate::matrix::{CostMatrices, TravelMatrix};
use crate::route::{RouteClass, RouteLimits, interior};
use crate::solution::{PlannedRoute, PollutionObjective, Strategy};
use crate::traits::NodeId;

/// Rounds spent on one pair of routes.
pub const MAX_ROUNDS: usize = 50;

/// Longest segment moved in one exchange.
pub const MAX_SEGMENT_LENGTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    pub start1: usize,
    pub start2: usize,
    pub len1: usize,
    pub len2: usize,
}

/// What happened while optimizing one pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PairOutcome {
    pub rounds: usize,
    pub evaluated: usize,
    pub applied: usize,
    /// Applied moves that made the objective worse.
    pub uphill: usize,
    /// Sum of the deltas of all applied moves.
    pub delta: f64,
}

impl PairOutcome {
    pub fn changed(&self) -> bool {
        self.applied > 0
    }
}

/// Applies `exchange` and returns the two new routes.
pub fn swap_segments(route1: &[NodeId], route2: &[NodeId], exchange: &Exchange) -> (Vec<NodeId>, Vec<NodeId>) {
    let Exchange {
        start1,
        start2,
        len1,
        len2,
    } = *exchange;
    let segment1 = &route1[start1..start1 + len1];
    let segment2 = &route2[start2..start2 + len2];

    let mut new1 = Vec::with_capacity(route1.len() - len1 + len2);
    new1.extend_from_slice(&route1[..start1]);
    new1.extend_from_slice(segment2);
    new1.extend_from_slice(&route1[start1 + len1..]);

    let mut new2 = Vec::with_capacity(route2.len() - len2 + len1);
    new2.extend_from_slice(&route2[..start2]);
    new2.extend_from_slice(segment1);
    new2.extend_from_slice(&route2[start2 + len2..]);
    (new1, new2)
}

/// Every exchange between two `[base, pickups.., drop_off]` routes that
/// keeps both within the stop limit.
///
/// Segments start anywhere from the first pickup up to the drop-off (an
/// empty segment there means "append before the drop-off") and never
/// include the base or the drop-off.
pub fn candidate_exchanges(route1: &[NodeId], route2: &[NodeId], limits: RouteLimits) -> Vec<Exchange> {
    let mut candidates = Vec::new();
    if route1.len() < 2 || route2.len() < 2 {
        return candidates;
    }
    let stops1 = route1.len() - 2;
    let stops2 = route2.len() - 2;
    let last1 = route1.len() - 1;
    let last2 = route2.len() - 1;

    for start1 in 1..=last1 {
        for start2 in 1..=last2 {
            for len1 in 0..=MAX_SEGMENT_LENGTH.min(last1 - start1) {
                for len2 in 0..=MAX_SEGMENT_LENGTH.min(last2 - start2) {
                    if len1 == 0 && len2 == 0 {
                        continue;
                    }
                    if !limits.admits_stops(stops1 - len1 + len2) || !limits.admits_stops(stops2 - len2 + len1) {
                        continue;
                    }
                    candidates.push(Exchange {
                        start1,
                        start2,
                        len1,
                        len2,
                    });
                }
            }
        }
    }
    candidates
}

/// Change in travel cost of `exchange`, from the boundary edges only.
pub fn delta_distance(
    matrix: &TravelMatrix,
    route1: &[NodeId],
    route2: &[NodeId],
    exchange: &Exchange,
) -> PlannerResult<f64> {
    let Exchange {
        start1,
        start2,
        len1,
        len2,
    } = *exchange;
    let (before1, after1) = (&route1[start1 - 1], &route1[start1 + len1]);
    let (before2, after2) = (&route2[start2 - 1], &route2[start2 + len2]);
    let segment1 = &route1[start1..start1 + len1];
    let segment2 = &route2[start2..start2 + len2];

    let old = splice_cost(matrix, before1, segment1, after1)? + splice_cost(matrix, before2, segment2, after2)?;
    let new = splice_cost(matrix, before1, segment2, after1)? + splice_cost(matrix, before2, segment1, after2)?;
    Ok(new - old)
}

/// Cost of the edges joining `segment` between `before` and `after`.
fn splice_cost(matrix: &TravelMatrix, before: &str, segment: &[NodeId], after: &str) -> PlannerResult<f64> {
    match (segment.first(), segment.last()) {
        (Some(first), Some(last)) => Ok(matrix.cost(before, first)? + matrix.cost(last, after)?),
        _ => matrix.cost(before, after),
    }
}

/// Change in the number of stops served by dirty routes.
pub fn classification_delta(class1: RouteClass, class2: RouteClass, exchange: &Exchange) -> f64 {
    let (len1, len2) = (exchange.len1 as f64, exchange.len2 as f64);
    match (class1, class2) {
        (RouteClass::Dirty, RouteClass::Clean) => len2 - len1,
        (RouteClass::Clean, RouteClass::Dirty) => len1 - len2,
        _ => 0.0,
    }
}

/// Whether `exchange` keeps dirty pickups out of clean routes.
pub fn keeps_clean_routes_clean(
    objective: &PollutionObjective,
    route1: &PlannedRoute,
    route2: &PlannedRoute,
    exchange: &Exchange,
) -> bool {
    let segment1 = &route1.stops[exchange.start1..exchange.start1 + exchange.len1];
    let segment2 = &route2.stops[exchange.start2..exchange.start2 + exchange.len2];
    let into_clean = |segment: &[NodeId], target: &PlannedRoute| {
        target.info.class == RouteClass::Clean && segment.iter().any(|node| objective.is_dirty(node))
    };
    !into_clean(segment1, route2) && !into_clean(segment2, route1)
}

/// Change in the expected number of polluted stops.
fn stochastic_delta(
    objective: &mut PollutionObjective,
    route1: &PlannedRoute,
    route2: &PlannedRoute,
    exchange: &Exchange,
) -> PlannerResult<f64> {
    let before = route1.expected_polluted_stops(objective.strategy())?
        + route2.expected_polluted_stops(objective.strategy())?;

    let (new1, new2) = swap_segments(&route1.stops, &route2.stops, exchange);
    let (pickups1, pickups2) = (interior(&new1), interior(&new2));
    let probability1 = objective.probability_clean(pickups1)?;
    let probability2 = objective.probability_clean(pickups2)?;
    let after = (1.0 - probability1) * pickups1.len() as f64 + (1.0 - probability2) * pickups2.len() as f64;
    Ok(after - before)
}

/// Objective change of `exchange`: travel cost plus alpha times the change
/// in polluted stops. `None` when the move is not allowed.
pub fn evaluate(
    objective: &mut PollutionObjective,
    matrices: &CostMatrices,
    route1: &PlannedRoute,
    route2: &PlannedRoute,
    exchange: &Exchange,
    alpha: f64,
) -> PlannerResult<Option<f64>> {
    let polluted = match objective.strategy() {
        Strategy::Classification => {
            if !keeps_clean_routes_clean(objective, route1, route2, exchange) {
                return Ok(None);
            }
            classification_delta(route1.info.class, route2.info.class, exchange)
        }
        Strategy::Stochastic(_) => stochastic_delta(objective, route1, route2, exchange)?,
    };
    let distance = delta_distance(&matrices.primary, &route1.stops, &route2.stops, exchange)?;
    Ok(Some(distance + alpha * polluted))
}

/// Runs up to [`MAX_ROUNDS`] exchange rounds between two routes.
///
/// Under descent each round takes the best improving exchange. Under
/// annealing each round walks the neighborhood in random order and takes the
/// first exchange the Metropolis criterion accepts at the round's
/// temperature. A round that takes nothing ends the pair. Both routes are
/// refreshed after every applied exchange; persisting them is up to the
/// caller.
pub fn optimize_pair<R: Rng>(
    route1: &mut PlannedRoute,
    route2: &mut PlannedRoute,
    objective: &mut PollutionObjective,
    matrices: &CostMatrices,
    limits: RouteLimits,
    alpha: f64,
    acceptance: &mut Acceptance<R>,
) -> PlannerResult<PairOutcome> {
    let mut outcome = PairOutcome::default();

    for round in 1..=MAX_ROUNDS {
        outcome.rounds = round;
        let mut candidates = candidate_exchanges(&route1.stops, &route2.stops, limits);
        if let Some(rng) = acceptance.rng_mut() {
            candidates.shuffle(rng);
        }
        let chosen = if acceptance.is_annealing() {
            first_accepted(route1, route2, objective, matrices, &candidates, alpha, acceptance, round, &mut outcome)?
        } else {
            best_candidate(route1, route2, objective, matrices, &candidates, alpha, &mut outcome)?
                .filter(|&(_, delta)| acceptance.accepts(delta, round))
        };
        let Some((exchange, delta)) = chosen else { break };

        let (new1, new2) = swap_segments(&route1.stops, &route2.stops, &exchange);
        route1.stops = new1;
        route2.stops = new2;
        route1.refresh(matrices, objective)?;
        route2.refresh(matrices, objective)?;
        outcome.applied += 1;
        outcome.delta += delta;
        if delta > 0.0 {
            outcome.uphill += 1;
        }
        tracing::trace!(?exchange, delta, round, "applied cross exchange");
    }

    tracing::debug!(
        route1 = %route1.info.route_id,
        route2 = %route2.info.route_id,
        rounds = outcome.rounds,
        evaluated = outcome.evaluated,
        applied = outcome.applied,
        uphill = outcome.uphill,
        "cross exchange pair done"
    );
    Ok(outcome)
}

fn best_candidate(
    route1: &PlannedRoute,
    route2: &PlannedRoute,
    objective: &mut PollutionObjective,
    matrices: &CostMatrices,
    candidates: &[Exchange],
    alpha: f64,
    outcome: &mut PairOutcome,
) -> PlannerResult<Option<(Exchange, f64)>> {
    let mut best: Option<(Exchange, f64)> = None;
    for exchange in candidates {
        let Some(delta) = evaluate(objective, matrices, route1, route2, exchange, alpha)? else {
            continue;
        };
        outcome.evaluated += 1;
        if best.is_none_or(|(_, best_delta)| delta < best_delta) {
            best = Some((*exchange, delta));
        }
    }
    Ok(best)
}

#[allow(clippy::too_many_arguments)]
fn first_accepted<R: Rng>(
    route1: &PlannedRoute,
    route2: &PlannedRoute,
    objective: &mut PollutionObjective,
    matrices: &CostMatrices,
    candidates: &[Exchange],
    alpha: f64,
    acceptance: &mut Acceptance<R>,
    round: usize,
    outcome: &mut PairOutcome,
) -> PlannerResult<Option<(Exchange, f64)>> {
    for exchange in candidates {
        let Some(delta) = evaluate(objective, matrices, route1, route2, exchange, alpha)? else {
            continue;
        };
        outcome.evaluated += 1;
        if acceptance.accepts(delta, round) {
            return Ok(Some((*exchange, delta)));
        }
    }
    Ok(None)
}
