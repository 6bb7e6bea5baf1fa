//! Greedy construction of the initial clean/dirty routes.
//!
//! Pickups are split by the pollution metric, each class is chained into one
//! nearest-neighbor route, borderline clean stops migrate to the dirty route
//! when the detour is cheap enough, and finally both routes are cut into
//! physical routes that respect the run's limits.

use crate::error::PlannerResult;
use crate::matrix::{CostMatrices, TravelMatrix};
use crate::route::{
    Depot, Layer, RouteClass, RouteInfo, RouteLimits, RouteParams, interior, new_route_id,
};
use crate::traits::{CostMetric, MatrixProvider, NodeId, PickupSelector, RouteStore, ThresholdOperator};

/// Routes built by [`nearest_neighbor_routes`], with their summed cost.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestNeighborRoutes {
    pub total_cost: f64,
    pub routes: Vec<Vec<NodeId>>,
}

/// One physical route cut out of a longer one.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitRoute {
    /// `[base, pickups.., drop_off]`.
    pub stops: Vec<NodeId>,
    pub length: f64,
    pub secondary_length: f64,
}

impl SplitRoute {
    pub fn pickups(&self) -> usize {
        interior(&self.stops).len()
    }
}

/// Chains `pickups` into routes with the nearest-neighbor rule.
///
/// Each route starts at the base and greedily appends the closest unassigned
/// pickup whose edge-in plus return trip to the drop-off still fits the
/// remaining length budget. A pickup that fits no empty route is placed on a
/// route of its own.
pub fn nearest_neighbor_routes(
    pickups: &[NodeId],
    matrix: &TravelMatrix,
    depot: &Depot,
    limits: RouteLimits,
) -> PlannerResult<NearestNeighborRoutes> {
    let mut available: Vec<NodeId> = pickups.to_vec();
    let mut routes = Vec::new();
    let mut total_cost = 0.0;

    while !available.is_empty() {
        let mut route = vec![depot.base.clone()];
        let mut length = 0.0;

        loop {
            if route.len() > 1 && !limits.admits_stops(route.len()) {
                break;
            }
            let Some(last) = route.last() else { break };
            let remaining = limits.max_route_length.map(|max| max - length);
            let next = match closest_pickup(last, &available, matrix, &depot.drop_off, remaining)? {
                Some(index) => index,
                None if route.len() == 1 => {
                    let index = closest_pickup(last, &available, matrix, &depot.drop_off, None)?
                        .unwrap_or(0);
                    tracing::warn!(
                        pickup = %available[index],
                        "pickup exceeds the route length limit on its own; routing it alone"
                    );
                    index
                }
                None => break,
            };
            let pickup = available.remove(next);
            length += matrix.cost(last, &pickup)?;
            route.push(pickup);
            if available.is_empty() {
                break;
            }
        }

        if let Some(last) = route.last() {
            length += matrix.cost(last, &depot.drop_off)?;
        }
        route.push(depot.drop_off.clone());
        total_cost += length;
        routes.push(route);
    }

    Ok(NearestNeighborRoutes { total_cost, routes })
}

/// Index into `available` of the cheapest next pickup after `last`.
fn closest_pickup(
    last: &str,
    available: &[NodeId],
    matrix: &TravelMatrix,
    drop_off: &str,
    remaining: Option<f64>,
) -> PlannerResult<Option<usize>> {
    let mut best: Option<(usize, f64)> = None;
    for (index, pickup) in available.iter().enumerate() {
        let cost = matrix.cost(last, pickup)?;
        if let Some(remaining) = remaining
            && cost + matrix.cost(pickup, drop_off)? > remaining
        {
            continue;
        }
        if best.is_none_or(|(_, best_cost)| cost < best_cost) {
            best = Some((index, cost));
        }
    }
    Ok(best.map(|(index, _)| index))
}

/// Cuts a full route into physical routes respecting `limits`.
///
/// Walking the pickups in order, the current route is closed at the drop-off
/// as soon as the next pickup plus its return trip would exceed the length
/// limit or the stop limit; the next route restarts from the base at that
/// same pickup. With unbounded limits the route comes back unchanged.
pub fn split_route(
    route: &[NodeId],
    matrices: &CostMatrices,
    depot: &Depot,
    limits: RouteLimits,
) -> PlannerResult<Vec<SplitRoute>> {
    let pickups = interior(route);
    let mut routes = Vec::new();
    if pickups.is_empty() {
        return Ok(routes);
    }

    let mut current = SplitRoute {
        stops: vec![depot.base.clone()],
        length: 0.0,
        secondary_length: 0.0,
    };
    let mut index = 0;
    while index < pickups.len() {
        let pickup = &pickups[index];
        let previous = current.stops.last().unwrap_or(&depot.base).clone();
        let leg = matrices.primary.cost(&previous, pickup)?;
        let with_return = leg + matrices.primary.cost(pickup, &depot.drop_off)?;
        let stops = current.pickups();

        let fits = limits.admits_length(current.length + with_return) && limits.admits_stops(stops + 1);
        if fits || stops == 0 {
            if !fits {
                tracing::warn!(%pickup, "pickup exceeds the route limits on its own; routing it alone");
            }
            current.length += leg;
            current.secondary_length += matrices.secondary.cost(&previous, pickup)?;
            current.stops.push(pickup.clone());
            index += 1;
        } else {
            routes.push(close_route(current, matrices, depot)?);
            current = SplitRoute {
                stops: vec![depot.base.clone()],
                length: 0.0,
                secondary_length: 0.0,
            };
        }
    }
    routes.push(close_route(current, matrices, depot)?);
    Ok(routes)
}

fn close_route(mut route: SplitRoute, matrices: &CostMatrices, depot: &Depot) -> PlannerResult<SplitRoute> {
    let last = route.stops.last().unwrap_or(&depot.base).clone();
    route.length += matrices.primary.cost(&last, &depot.drop_off)?;
    route.secondary_length += matrices.secondary.cost(&last, &depot.drop_off)?;
    route.stops.push(depot.drop_off.clone());
    Ok(route)
}

/// Moves clean pickups into the dirty route where the detour is worth it.
///
/// A clean pickup moves when its cheapest insertion into the dirty route
/// costs less than what removing it saves on the clean route, minus `alpha`.
/// Pickups are considered in `order`. Returns the moved pickups.
pub fn reassign_clean_pickups(
    clean_route: &mut Vec<NodeId>,
    dirty_route: &mut Vec<NodeId>,
    order: &[NodeId],
    matrix: &TravelMatrix,
    alpha: f64,
) -> PlannerResult<Vec<NodeId>> {
    let mut moved = Vec::new();
    for pickup in order {
        let Some(index) = clean_route.iter().position(|node| node == pickup) else {
            continue;
        };
        if index == 0 || index + 1 >= clean_route.len() {
            continue;
        }
        let (previous, next) = (&clean_route[index - 1], &clean_route[index + 1]);
        let removal_gain =
            matrix.cost(previous, pickup)? + matrix.cost(pickup, next)? - matrix.cost(previous, next)?;

        let mut best: Option<(usize, f64)> = None;
        for position in 0..dirty_route.len().saturating_sub(1) {
            let (from, to) = (&dirty_route[position], &dirty_route[position + 1]);
            let insertion = matrix.cost(from, pickup)? + matrix.cost(pickup, to)? - matrix.cost(from, to)?;
            if insertion < removal_gain - alpha && best.is_none_or(|(_, cost)| insertion < cost) {
                best = Some((position, insertion));
            }
        }

        if let Some((position, insertion)) = best {
            tracing::debug!(%pickup, insertion, removal_gain, "moving clean pickup to the dirty route");
            dirty_route.insert(position + 1, pickup.clone());
            clean_route.remove(index);
            moved.push(pickup.clone());
        }
    }
    Ok(moved)
}

/// Inputs of one construction run.
#[derive(Debug, Clone)]
pub struct GreedyParams {
    pub date: String,
    pub metric: CostMetric,
    pub params: RouteParams,
}

/// Builds and persists the construction-phase routes of one day and alpha.
///
/// With `alpha == 0` every pickup is treated as dirty. Routes are written to
/// [`Layer::Greedy`]; the written records are returned, clean ones first.
#[tracing::instrument(
    skip_all,
    fields(date = %run.date, alpha = run.params.alpha, metric = ?run.metric)
)]
pub fn greedy_solve<S, M, R>(
    selector: &S,
    provider: &M,
    store: &R,
    depot: &Depot,
    run: &GreedyParams,
) -> PlannerResult<Vec<RouteInfo>>
where
    S: PickupSelector + ?Sized,
    M: MatrixProvider + ?Sized,
    R: RouteStore + ?Sized,
{
    let params = &run.params;
    let (clean, dirty) = if params.alpha == 0.0 {
        let all = selector.select_pickups(
            &params.pollution_metric,
            ThresholdOperator::Gt,
            f64::NEG_INFINITY,
            &run.date,
        )?;
        (Vec::new(), all)
    } else {
        let clean = selector.select_pickups(
            &params.pollution_metric,
            ThresholdOperator::Le,
            params.clean_waste_threshold,
            &run.date,
        )?;
        let dirty = selector.select_pickups(
            &params.pollution_metric,
            ThresholdOperator::Gt,
            params.clean_waste_threshold,
            &run.date,
        )?;
        (clean, dirty)
    };
    tracing::info!(dirty = dirty.len(), clean = clean.len(), "selected pickups");

    let mut nodes: Vec<NodeId> = dirty.iter().chain(clean.iter()).cloned().collect();
    nodes.push(depot.base.clone());
    nodes.push(depot.drop_off.clone());
    let matrices = CostMatrices::fetch(provider, &nodes, run.metric)?;

    let mut dirty_route = single_route(&dirty, &matrices.primary, depot)?;
    let mut clean_route = single_route(&clean, &matrices.primary, depot)?;
    tracing::debug!(
        dirty_route = dirty_route.len(),
        clean_route = clean_route.len(),
        "initial routes built"
    );

    let moved = reassign_clean_pickups(
        &mut clean_route,
        &mut dirty_route,
        &clean,
        &matrices.primary,
        params.alpha,
    )?;
    tracing::info!(moved = moved.len(), "reassigned clean pickups");

    let mut written = Vec::new();
    for (route, class) in [(clean_route, RouteClass::Clean), (dirty_route, RouteClass::Dirty)] {
        for split in split_route(&route, &matrices, depot, params.limits())? {
            let info = RouteInfo {
                route_id: new_route_id(),
                date: run.date.clone(),
                metric: run.metric,
                length: split.length,
                secondary_length: split.secondary_length,
                stops: split.pickups(),
                class,
                params: params.clone(),
                simulated_annealing: false,
                stochastic: None,
            };
            store.write_route(&Layer::Greedy, &info, &split.stops)?;
            written.push(info);
        }
    }
    tracing::info!(routes = written.len(), "greedy construction done");
    Ok(written)
}

/// The one unconstrained nearest-neighbor route over `pickups`, or an empty
/// sequence when there are none.
fn single_route(pickups: &[NodeId], matrix: &TravelMatrix, depot: &Depot) -> PlannerResult<Vec<NodeId>> {
    let built = nearest_neighbor_routes(pickups, matrix, depot, RouteLimits::UNBOUNDED)?;
    Ok(built.routes.into_iter().next().unwrap_or_default())
}
