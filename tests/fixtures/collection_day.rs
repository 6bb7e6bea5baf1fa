//! Synthetic collection days on a plane.
//!
//! Travel costs are Euclidean distances between node positions; durations
//! are the same distances at a fixed pace. Every backend the planner talks
//! to is served from memory.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use collection_planner::error::{PlannerError, PlannerResult, TspError};
use collection_planner::matrix::TravelMatrix;
use collection_planner::probability::PollutionDistribution;
use collection_planner::route::Depot;
use collection_planner::traits::{
    CostMetric, DistributionProvider, MatrixProvider, NodeId, PickupSelector, ThresholdOperator, TspSolver,
};
use collection_planner::tsplib::AtspProblem;

pub const METRIC: &str = "averageDayScore";
pub const THRESHOLD: f64 = 0.187;

/// Seconds per distance unit in the duration matrix.
pub const PACE: f64 = 1.5;

pub fn ids(names: &[&str]) -> Vec<NodeId> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Builder for a pickup with a pollution score and optional distribution.
#[derive(Clone, Debug)]
pub struct TestPickup {
    pub id: NodeId,
    pub position: (f64, f64),
    pub score: f64,
    pub distribution: Option<PollutionDistribution>,
}

impl TestPickup {
    pub fn new(id: &str, x: f64, y: f64) -> Self {
        Self {
            id: id.to_string(),
            position: (x, y),
            score: 0.0,
            distribution: None,
        }
    }

    pub fn score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn dirty(self) -> Self {
        self.score(0.3)
    }

    pub fn clean(self) -> Self {
        self.score(0.1)
    }

    pub fn normal(mut self, mu: f64, sigma: f64) -> Self {
        self.distribution = Some(PollutionDistribution::Normal { mu, sigma });
        self
    }

    pub fn student_t(mut self, mu: f64, sigma: f64, n: f64) -> Self {
        self.distribution = Some(PollutionDistribution::StudentT { mu, sigma, n });
        self
    }

    /// Three normal components `(mu, sigma)`; the third takes the weight
    /// left over by the first two.
    pub fn mixture(mut self, components: [(f64, f64); 3], weights: [f64; 2]) -> Self {
        let [(mu1, sigma1), (mu2, sigma2), (mu3, sigma3)] = components;
        self.distribution = Some(PollutionDistribution::NormalMixture {
            mu1,
            sigma1,
            mu2,
            sigma2,
            mu3,
            sigma3,
            weights,
        });
        self
    }
}

/// Pickups per day plus the depot, answering every backend query.
#[derive(Clone, Debug)]
pub struct TestCatalog {
    pub depot: Depot,
    positions: HashMap<NodeId, (f64, f64)>,
    days: BTreeMap<String, Vec<TestPickup>>,
}

impl TestCatalog {
    /// Base at `base`, drop-off at `drop_off`.
    pub fn new(base: (f64, f64), drop_off: (f64, f64)) -> Self {
        let depot = Depot::new("base", "drop");
        let positions = HashMap::from([(depot.base.clone(), base), (depot.drop_off.clone(), drop_off)]);
        Self {
            depot,
            positions,
            days: BTreeMap::new(),
        }
    }

    pub fn day(mut self, date: &str, pickups: Vec<TestPickup>) -> Self {
        for pickup in &pickups {
            self.positions.insert(pickup.id.clone(), pickup.position);
        }
        self.days.entry(date.to_string()).or_default().extend(pickups);
        self
    }

    pub fn pickups(&self, date: &str) -> &[TestPickup] {
        self.days.get(date).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn dirty_ids(&self, date: &str) -> Vec<NodeId> {
        self.pickups(date)
            .iter()
            .filter(|pickup| pickup.score > THRESHOLD)
            .map(|pickup| pickup.id.clone())
            .collect()
    }

    pub fn distance(&self, from: &str, to: &str) -> Option<f64> {
        let (x1, y1) = self.positions.get(from)?;
        let (x2, y2) = self.positions.get(to)?;
        Some(((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt())
    }

    /// The full travel matrix of `date` in `metric`.
    pub fn matrix(&self, date: &str, metric: CostMetric) -> TravelMatrix {
        let mut nodes: Vec<NodeId> = self.pickups(date).iter().map(|pickup| pickup.id.clone()).collect();
        nodes.push(self.depot.base.clone());
        nodes.push(self.depot.drop_off.clone());
        build_matrix(self, &nodes, metric)
    }
}

fn build_matrix(catalog: &TestCatalog, nodes: &[NodeId], metric: CostMetric) -> TravelMatrix {
    let mut matrix = TravelMatrix::new();
    for from in nodes {
        for to in nodes {
            if from == to {
                continue;
            }
            if let Some(distance) = catalog.distance(from, to) {
                let cost = match metric {
                    CostMetric::Distance => distance,
                    CostMetric::Duration => distance * PACE,
                };
                matrix.insert(from.clone(), to.clone(), cost);
            }
        }
    }
    matrix
}

impl PickupSelector for TestCatalog {
    fn select_pickups(
        &self,
        metric: &str,
        operator: ThresholdOperator,
        threshold: f64,
        date: &str,
    ) -> PlannerResult<Vec<NodeId>> {
        if metric != METRIC {
            return Err(PlannerError::provider(format!("unknown pickup metric {metric}")));
        }
        Ok(self
            .pickups(date)
            .iter()
            .filter(|pickup| operator.matches(pickup.score, threshold))
            .map(|pickup| pickup.id.clone())
            .collect())
    }
}

impl MatrixProvider for TestCatalog {
    fn travel_cost_matrix(&self, nodes: &[NodeId], metric: CostMetric) -> PlannerResult<TravelMatrix> {
        Ok(build_matrix(self, nodes, metric))
    }
}

impl DistributionProvider for TestCatalog {
    fn distributions(
        &self,
        nodes: &[NodeId],
        _property: &str,
    ) -> PlannerResult<HashMap<NodeId, PollutionDistribution>> {
        Ok(self
            .days
            .values()
            .flatten()
            .filter(|pickup| nodes.contains(&pickup.id))
            .filter_map(|pickup| pickup.distribution.map(|distribution| (pickup.id.clone(), distribution)))
            .collect())
    }
}

/// `count` pickups scattered over a 100 x 100 square, scored so that about
/// half of them are dirty, each with a normal distribution around its score.
pub fn scattered_day(prefix: &str, count: usize, seed: u64) -> Vec<TestPickup> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|index| {
            let x = rng.random_range(0.0..100.0);
            let y = rng.random_range(0.0..100.0);
            let score = rng.random_range(0.05..0.35);
            TestPickup::new(&format!("{prefix}-{index}"), x, y)
                .score(score)
                .normal(score, 0.04)
        })
        .collect()
}

// ============================================================================
// TSP solvers
// ============================================================================

/// Nearest-neighbor tour over the instance weights, from node 0 with the
/// last node visited last.
pub struct NearestNeighborTsp;

impl TspSolver for NearestNeighborTsp {
    fn solve(&self, problem: &AtspProblem) -> Result<Vec<usize>, TspError> {
        let dimension = problem.dimension();
        if dimension < 2 {
            return Ok((0..dimension).collect());
        }
        let last = dimension - 1;
        let mut tour = vec![0];
        let mut open: Vec<usize> = (1..last).collect();
        while !open.is_empty() {
            let current = tour[tour.len() - 1];
            let (index, _) = open
                .iter()
                .enumerate()
                .min_by_key(|(_, node)| problem.weights[current][**node])
                .ok_or_else(|| TspError::invalid_data("no open node"))?;
            tour.push(open.remove(index));
        }
        tour.push(last);
        Ok(tour)
    }
}

/// Always fails, like a solver binary that is not installed.
pub struct UnavailableTsp;

impl TspSolver for UnavailableTsp {
    fn solve(&self, _problem: &AtspProblem) -> Result<Vec<usize>, TspError> {
        Err(TspError::invalid_data("solver not available"))
    }
}
