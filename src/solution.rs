//! All routes of one planning day and the objective they are scored by.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, PlannerResult};
use crate::matrix::CostMatrices;
use crate::probability::{PollutionDistribution, ProbabilityKind, ProbabilityModel};
use crate::route::{Layer, RouteClass, RouteInfo, StochasticInfo, interior};
use crate::traits::{NodeId, RouteStore};

/// How the pollution side of the objective is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every stop on a dirty route counts as polluted.
    Classification,
    /// A route's stops count as polluted with the probability that the
    /// route is not clean.
    Stochastic(ProbabilityKind),
}

impl Strategy {
    /// The layer local search writes this strategy's routes to.
    pub fn layer(self) -> Layer {
        match self {
            Strategy::Classification => Layer::Classification,
            Strategy::Stochastic(kind) => Layer::Stochastic(kind),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Classification => "classification",
            Strategy::Stochastic(_) => "stochastic",
        }
    }

    pub fn probability(self) -> Option<ProbabilityKind> {
        match self {
            Strategy::Classification => None,
            Strategy::Stochastic(kind) => Some(kind),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Classification => f.write_str("classification"),
            Strategy::Stochastic(kind) => write!(f, "stochastic/{kind}"),
        }
    }
}

/// The run-scoped data each strategy needs to score a move.
#[derive(Debug, Clone)]
pub enum PollutionObjective {
    Classification {
        /// Pickups whose metric exceeds the threshold.
        dirty: HashSet<NodeId>,
    },
    Stochastic {
        model: ProbabilityModel,
        distributions: HashMap<NodeId, PollutionDistribution>,
    },
}

impl PollutionObjective {
    pub fn strategy(&self) -> Strategy {
        match self {
            PollutionObjective::Classification { .. } => Strategy::Classification,
            PollutionObjective::Stochastic { model, .. } => Strategy::Stochastic(model.kind()),
        }
    }

    /// Whether `node` is a dirty pickup. Only the classification strategy
    /// tracks this; under the stochastic one nothing is dirty up front.
    pub fn is_dirty(&self, node: &str) -> bool {
        match self {
            PollutionObjective::Classification { dirty } => dirty.contains(node),
            PollutionObjective::Stochastic { .. } => false,
        }
    }

    /// Probability-of-clean data for a route with these pickups, or `None`
    /// under the classification strategy.
    pub fn stochastic_info(&mut self, pickups: &[NodeId]) -> PlannerResult<Option<StochasticInfo>> {
        match self {
            PollutionObjective::Classification { .. } => Ok(None),
            PollutionObjective::Stochastic {
                model,
                distributions,
            } => {
                let route_distributions = pickups
                    .iter()
                    .map(|node| {
                        distributions
                            .get(node)
                            .copied()
                            .ok_or_else(|| PlannerError::MissingDistribution { node: node.clone() })
                    })
                    .collect::<PlannerResult<Vec<_>>>()?;
                let probability_clean = model.probability_clean(&route_distributions)?;
                Ok(Some(StochasticInfo {
                    probability: model.kind(),
                    probability_clean,
                    distributions: route_distributions,
                }))
            }
        }
    }

    /// Probability that a route with these pickups is clean.
    pub fn probability_clean(&mut self, pickups: &[NodeId]) -> PlannerResult<f64> {
        self.stochastic_info(pickups)?
            .map(|info| info.probability_clean)
            .ok_or_else(|| PlannerError::Precondition("classification routes carry no probability-of-clean".into()))
    }
}

/// A route's record together with its node sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRoute {
    pub info: RouteInfo,
    /// `[base, pickups.., drop_off]`.
    pub stops: Vec<NodeId>,
}

impl PlannedRoute {
    pub fn pickups(&self) -> &[NodeId] {
        interior(&self.stops)
    }

    /// Recomputes lengths, stop count and probability-of-clean from the
    /// current stop sequence.
    pub fn refresh(&mut self, matrices: &CostMatrices, objective: &mut PollutionObjective) -> PlannerResult<()> {
        let (length, secondary_length) = matrices.route_costs(&self.stops)?;
        self.info.length = length;
        self.info.secondary_length = secondary_length;
        self.info.stops = self.pickups().len();
        self.info.stochastic = objective.stochastic_info(interior(&self.stops))?;
        Ok(())
    }

    /// This route's share of the pollution term, before scaling by alpha.
    pub fn expected_polluted_stops(&self, strategy: Strategy) -> PlannerResult<f64> {
        let stops = self.info.stops as f64;
        match strategy {
            Strategy::Classification => Ok(match self.info.class {
                RouteClass::Dirty => stops,
                RouteClass::Clean => 0.0,
            }),
            Strategy::Stochastic(_) => {
                let probability = self.info.probability_clean().ok_or_else(|| {
                    PlannerError::Precondition(format!(
                        "route {} has no probability-of-clean",
                        self.info.route_id
                    ))
                })?;
                Ok((1.0 - probability) * stops)
            }
        }
    }
}

/// Totals over the routes of a solution.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SolutionSummary {
    pub routes: usize,
    pub length: f64,
    pub secondary_length: f64,
    pub stops: usize,
    /// Stops served by clean routes.
    pub clean_stops: usize,
}

/// All routes of one day, alpha and strategy.
#[derive(Debug, Clone)]
pub struct Solution {
    pub strategy: Strategy,
    pub routes: Vec<PlannedRoute>,
}

impl Solution {
    pub fn new(strategy: Strategy, routes: Vec<PlannedRoute>) -> Self {
        Self { strategy, routes }
    }

    /// Reads the routes of `layer` for `date` and `alpha`, ordered by id.
    pub fn load<S>(store: &S, layer: &Layer, date: &str, alpha: f64, strategy: Strategy) -> PlannerResult<Self>
    where
        S: RouteStore + ?Sized,
    {
        let mut infos = store.route_infos(layer, date, alpha)?;
        infos.sort_by(|a, b| a.route_id.cmp(&b.route_id));
        let routes = infos
            .into_iter()
            .map(|info| {
                let stops = store.route_stops(layer, &info.route_id)?;
                Ok(PlannedRoute { info, stops })
            })
            .collect::<PlannerResult<Vec<_>>>()?;
        Ok(Self::new(strategy, routes))
    }

    pub fn get(&self, route_id: &str) -> Option<&PlannedRoute> {
        self.routes.iter().find(|route| route.info.route_id == route_id)
    }

    /// Total primary length plus alpha times the (expected) polluted stops.
    pub fn objective(&self) -> PlannerResult<f64> {
        self.routes.iter().try_fold(0.0, |total, route| {
            let polluted = route.expected_polluted_stops(self.strategy)?;
            Ok(total + route.info.length + route.info.params.alpha * polluted)
        })
    }

    pub fn summary(&self) -> SolutionSummary {
        self.routes.iter().fold(SolutionSummary::default(), |mut summary, route| {
            summary.routes += 1;
            summary.length += route.info.length;
            summary.secondary_length += route.info.secondary_length;
            summary.stops += route.info.stops;
            if route.info.class == RouteClass::Clean {
                summary.clean_stops += route.info.stops;
            }
            summary
        })
    }

    pub fn total_stops(&self) -> usize {
        self.routes.iter().map(|route| route.info.stops).sum()
    }
}
