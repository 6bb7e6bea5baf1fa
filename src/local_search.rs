//! Local search over the construction-phase routes.
//!
//! A run copies the greedy routes of one day and alpha into the strategy's
//! own layer, then alternates cross-exchange over every route pair with
//! intra-route reordering until the iteration cap is reached or the
//! objective stops improving.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::annealing::{Acceptance, INITIAL_TEMPERATURE, LinearSchedule};
use crate::cross_exchange::{MAX_ROUNDS, optimize_pair};
use crate::error::{PlannerError, PlannerResult};
use crate::intra_route::{TourOutcome, optimize_route};
use crate::matrix::CostMatrices;
use crate::probability::{GRID_SIZE, PollutionDistribution, ProbabilityModel};
use crate::route::{Depot, Layer, RouteInfo, RouteParams, new_route_id};
use crate::solution::{PlannedRoute, PollutionObjective, Solution, Strategy};
use crate::traits::{Backends, CostMetric, NodeId, RouteStore, ThresholdOperator};

/// Knobs of one local-search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Hard cap on iterations.
    pub max_iteration: usize,
    /// Consecutive non-improving iterations before stopping early.
    pub max_no_improvement: usize,
    /// Accept worsening cross exchanges under a cooling schedule.
    pub simulated_annealing: bool,
    pub initial_temperature: f64,
    /// Seed for the annealing random source; fresh entropy when unset.
    pub seed: Option<u64>,
    /// Reorder each route with the TSP solver after cross exchange.
    pub intra_route: bool,
    /// Grid points per density for the FFT probability models.
    pub probability_grid: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_iteration: 200,
            max_no_improvement: 10,
            simulated_annealing: true,
            initial_temperature: INITIAL_TEMPERATURE,
            seed: None,
            intra_route: true,
            probability_grid: GRID_SIZE,
        }
    }
}

/// What one run optimizes.
#[derive(Debug, Clone)]
pub struct SearchRun {
    pub date: String,
    pub metric: CostMetric,
    pub strategy: Strategy,
    pub params: RouteParams,
    /// Alpha of the construction routes to start from; the run's own alpha
    /// when unset.
    pub construction_alpha: Option<f64>,
}

/// Memoization scoped to one run.
#[derive(Debug, Default)]
pub struct RunCaches {
    /// Route pairs whose exact state was already cross-exchanged.
    pub pairs: HashSet<u64>,
    /// Stop sequences already handed to the TSP solver.
    pub tours: HashSet<u64>,
}

impl RunCaches {
    pub fn clear(&mut self) {
        self.pairs.clear();
        self.tours.clear();
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchReport {
    pub layer: String,
    pub date: String,
    pub alpha: f64,
    pub strategy: Strategy,
    pub iterations: usize,
    pub initial_objective: f64,
    pub best_objective: f64,
    pub final_objective: f64,
    /// Objective after each iteration.
    pub history: Vec<f64>,
    pub exchanges_applied: usize,
    pub tours_improved: usize,
    pub routes: usize,
}

/// Key of a pair's state: ids, run parameters and both lengths.
fn pair_key(run: &SearchRun, route1: &RouteInfo, route2: &RouteInfo) -> u64 {
    let mut hasher = DefaultHasher::new();
    route1.route_id.hash(&mut hasher);
    route2.route_id.hash(&mut hasher);
    run.params.alpha.to_bits().hash(&mut hasher);
    run.strategy.name().hash(&mut hasher);
    run.strategy.probability().map(|kind| kind.name()).hash(&mut hasher);
    run.params.clean_waste_threshold.to_bits().hash(&mut hasher);
    route1.length.to_bits().hash(&mut hasher);
    route2.length.to_bits().hash(&mut hasher);
    hasher.finish()
}

/// Mutable references to two distinct routes.
fn pair_mut(routes: &mut [PlannedRoute], first: usize, second: usize) -> (&mut PlannedRoute, &mut PlannedRoute) {
    let (head, tail) = routes.split_at_mut(second);
    (&mut head[first], &mut tail[0])
}

/// Builds the strategy's objective data from the pickups of the day.
fn build_objective(
    backends: &Backends<'_>,
    run: &SearchRun,
    options: &SearchOptions,
    dirty: &[NodeId],
    clean: &[NodeId],
) -> PlannerResult<PollutionObjective> {
    match run.strategy {
        Strategy::Classification => Ok(PollutionObjective::Classification {
            dirty: dirty.iter().cloned().collect(),
        }),
        Strategy::Stochastic(kind) => {
            let pickups: Vec<NodeId> = dirty.iter().chain(clean).cloned().collect();
            let distributions: HashMap<NodeId, PollutionDistribution> =
                backends.distributions.distributions(&pickups, &kind.property_key())?;
            for node in &pickups {
                match distributions.get(node) {
                    None => return Err(PlannerError::MissingDistribution { node: node.clone() }),
                    Some(distribution) if !kind.accepts(distribution) => {
                        return Err(PlannerError::InvalidDistribution(format!(
                            "{node} carries {distribution:?}, which is not a {kind} distribution"
                        )));
                    }
                    Some(_) => {}
                }
            }
            Ok(PollutionObjective::Stochastic {
                model: ProbabilityModel::new(kind, run.params.clean_waste_threshold)
                    .with_grid_size(options.probability_grid),
                distributions,
            })
        }
    }
}

/// Copies the construction-phase routes into `layer` with fresh ids,
/// replacing whatever an earlier run left there for the same day and alpha.
fn seed_layer(
    store: &dyn RouteStore,
    layer: &Layer,
    run: &SearchRun,
    matrices: &CostMatrices,
    objective: &mut PollutionObjective,
    simulated_annealing: bool,
) -> PlannerResult<usize> {
    for stale in store.route_infos(layer, &run.date, run.params.alpha)? {
        store.delete_route(layer, &stale.route_id)?;
    }

    let construction_alpha = run.construction_alpha.unwrap_or(run.params.alpha);
    let greedy = store.route_infos(&Layer::Greedy, &run.date, construction_alpha)?;
    for info in &greedy {
        let stops = store.route_stops(&Layer::Greedy, &info.route_id)?;
        let mut route = PlannedRoute {
            info: RouteInfo {
                route_id: new_route_id(),
                metric: run.metric,
                params: run.params.clone(),
                simulated_annealing,
                ..info.clone()
            },
            stops,
        };
        route.refresh(matrices, objective)?;
        store.write_route(layer, &route.info, &route.stops)?;
    }
    Ok(greedy.len())
}

/// Runs local search for one day, alpha and strategy.
///
/// The depot must match the one the construction phase used.
#[tracing::instrument(
    skip_all,
    fields(date = %run.date, alpha = run.params.alpha, strategy = %run.strategy)
)]
pub fn local_search(
    backends: &Backends<'_>,
    depot: &Depot,
    run: &SearchRun,
    options: &SearchOptions,
    caches: &mut RunCaches,
) -> PlannerResult<SearchReport> {
    caches.clear();
    let params = &run.params;
    let layer = run.strategy.layer();

    let dirty = backends.selector.select_pickups(
        &params.pollution_metric,
        ThresholdOperator::Gt,
        params.clean_waste_threshold,
        &run.date,
    )?;
    let clean = backends.selector.select_pickups(
        &params.pollution_metric,
        ThresholdOperator::Le,
        params.clean_waste_threshold,
        &run.date,
    )?;
    tracing::info!(dirty = dirty.len(), clean = clean.len(), "selected pickups");

    let mut nodes: Vec<NodeId> = dirty.iter().chain(&clean).cloned().collect();
    nodes.push(depot.base.clone());
    nodes.push(depot.drop_off.clone());
    let matrices = CostMatrices::fetch(backends.matrices, &nodes, run.metric)?;
    let mut objective = build_objective(backends, run, options, &dirty, &clean)?;

    let seeded = seed_layer(
        backends.store,
        &layer,
        run,
        &matrices,
        &mut objective,
        options.simulated_annealing,
    )?;
    if seeded == 0 {
        tracing::warn!("no construction routes found; nothing to optimize");
    }

    let mut acceptance = if options.simulated_annealing {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Acceptance::Annealing {
            schedule: LinearSchedule::new(options.initial_temperature, MAX_ROUNDS),
            rng,
        }
    } else {
        Acceptance::Descent
    };

    let initial = Solution::load(backends.store, &layer, &run.date, params.alpha, run.strategy)?;
    let initial_objective = initial.objective()?;
    let mut report = SearchReport {
        layer: layer.to_string(),
        date: run.date.clone(),
        alpha: params.alpha,
        strategy: run.strategy,
        iterations: 0,
        initial_objective,
        best_objective: initial_objective,
        final_objective: initial_objective,
        history: Vec::new(),
        exchanges_applied: 0,
        tours_improved: 0,
        routes: initial.routes.len(),
    };
    tracing::info!(routes = report.routes, objective = initial_objective, "local search start");

    let mut previous = initial_objective;
    let mut no_improvement = 0;
    for iteration in 0..options.max_iteration {
        if no_improvement >= options.max_no_improvement {
            break;
        }
        let mut solution = Solution::load(backends.store, &layer, &run.date, params.alpha, run.strategy)?;

        for first in 0..solution.routes.len() {
            for second in first + 1..solution.routes.len() {
                let (route1, route2) = pair_mut(&mut solution.routes, first, second);
                if !caches.pairs.insert(pair_key(run, &route1.info, &route2.info)) {
                    continue;
                }
                let outcome = optimize_pair(
                    route1,
                    route2,
                    &mut objective,
                    &matrices,
                    params.limits(),
                    params.alpha,
                    &mut acceptance,
                )?;
                if outcome.changed() {
                    backends.store.update_route(&layer, &route1.info, &route1.stops)?;
                    backends.store.update_route(&layer, &route2.info, &route2.stops)?;
                    report.exchanges_applied += outcome.applied;
                }
            }
        }

        if options.intra_route {
            for route in &mut solution.routes {
                let outcome = optimize_route(route, &matrices, backends.solver, &mut objective, &mut caches.tours)?;
                if let TourOutcome::Improved { .. } = outcome {
                    backends.store.update_route(&layer, &route.info, &route.stops)?;
                    report.tours_improved += 1;
                }
            }
        }

        let value = solution.objective()?;
        report.iterations = iteration + 1;
        report.history.push(value);
        report.final_objective = value;
        report.best_objective = report.best_objective.min(value);
        if value < previous {
            no_improvement = 0;
        } else {
            no_improvement += 1;
        }
        previous = value;
        tracing::info!(iteration, objective = value, best = report.best_objective, "local search iteration");
    }

    tracing::info!(
        iterations = report.iterations,
        initial = report.initial_objective,
        best = report.best_objective,
        final_objective = report.final_objective,
        "local search done"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probability::ProbabilityKind;
    use crate::route::RouteClass;

    fn run(strategy: Strategy) -> SearchRun {
        SearchRun {
            date: "2024-05-01".to_string(),
            metric: CostMetric::Distance,
            strategy,
            params: RouteParams {
                alpha: 5.0,
                max_route_length: None,
                max_stops_per_route: None,
                pollution_metric: "averageDayScore".to_string(),
                clean_waste_threshold: 0.187,
            },
            construction_alpha: None,
        }
    }

    fn info(id: &str, length: f64) -> RouteInfo {
        RouteInfo {
            route_id: id.to_string(),
            date: "2024-05-01".to_string(),
            metric: CostMetric::Distance,
            length,
            secondary_length: 0.0,
            stops: 1,
            class: RouteClass::Dirty,
            params: run(Strategy::Classification).params,
            simulated_annealing: false,
            stochastic: None,
        }
    }

    #[test]
    fn pair_key_tracks_lengths_and_strategy() {
        let classification = run(Strategy::Classification);
        let stochastic = run(Strategy::Stochastic(ProbabilityKind::TProb));
        let key = pair_key(&classification, &info("a", 1.0), &info("b", 2.0));
        assert_eq!(key, pair_key(&classification, &info("a", 1.0), &info("b", 2.0)));
        assert_ne!(key, pair_key(&classification, &info("a", 1.5), &info("b", 2.0)));
        assert_ne!(key, pair_key(&stochastic, &info("a", 1.0), &info("b", 2.0)));
    }

    #[test]
    fn pair_mut_splits_distinct_routes() {
        let route = |id: &str| PlannedRoute {
            info: info(id, 1.0),
            stops: Vec::new(),
        };
        let mut routes = vec![route("a"), route("b"), route("c")];
        let (first, second) = pair_mut(&mut routes, 0, 2);
        assert_eq!(first.info.route_id, "a");
        assert_eq!(second.info.route_id, "c");
    }

    #[test]
    fn default_options() {
        let options = SearchOptions::default();
        assert_eq!(options.max_iteration, 200);
        assert_eq!(options.max_no_improvement, 10);
        assert_eq!(options.initial_temperature, 1000.0);
        assert_eq!(options.probability_grid, GRID_SIZE);
    }
}
