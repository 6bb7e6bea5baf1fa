//! Batch planning: construction for every day and alpha, then local search
//! for every strategy on top of it.

use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, PlannerResult};
use crate::greedy::{GreedyParams, greedy_solve};
use crate::lkh::{LkhConfig, LkhSolver};
use crate::local_search::{RunCaches, SearchOptions, SearchReport, SearchRun, local_search};
use crate::route::{Depot, Layer, RouteParams};
use crate::solution::{Solution, SolutionSummary, Strategy};
use crate::traits::{Backends, CostMetric, RouteStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Pickup property compared against the threshold.
    pub pollution_metric: String,
    /// Pickups at or below this value are clean.
    pub clean_waste_threshold: f64,
    pub alphas: Vec<f64>,
    pub dates: Vec<String>,
    pub max_stops_per_route: Option<usize>,
    pub max_route_length: Option<f64>,
    /// Minimize duration instead of distance.
    pub optimize_duration: bool,
    /// Start every local search from the construction routes of this alpha
    /// instead of its own.
    pub construction_alpha: Option<f64>,
    pub strategies: Vec<Strategy>,
    pub search: SearchOptions,
    pub depot: Depot,
    pub lkh: LkhConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            pollution_metric: "averageDayScore".to_string(),
            clean_waste_threshold: 0.187,
            alphas: vec![0.0, 50.0],
            dates: Vec::new(),
            max_stops_per_route: None,
            max_route_length: None,
            optimize_duration: false,
            construction_alpha: None,
            strategies: vec![Strategy::Classification],
            search: SearchOptions::default(),
            depot: Depot::default(),
            lkh: LkhConfig::default(),
        }
    }
}

impl PlannerConfig {
    pub fn from_json_str(json: &str) -> PlannerResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> PlannerResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|err| PlannerError::InvalidConfig(format!("{}: {err}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> PlannerResult<()> {
        let invalid = |message: String| Err(PlannerError::InvalidConfig(message));
        if self.depot.base.is_empty() || self.depot.drop_off.is_empty() {
            return invalid("depot base and drop-off must be set".into());
        }
        if let Some(alpha) = self.alphas.iter().find(|alpha| !alpha.is_finite() || **alpha < 0.0) {
            return invalid(format!("alpha must be a non-negative number, got {alpha}"));
        }
        if !self.clean_waste_threshold.is_finite() {
            return invalid("clean_waste_threshold must be finite".into());
        }
        if self.max_stops_per_route == Some(0) {
            return invalid("max_stops_per_route must be at least 1".into());
        }
        if let Some(length) = self.max_route_length
            && (length.is_nan() || length <= 0.0)
        {
            return invalid(format!("max_route_length must be positive, got {length}"));
        }
        if self.search.max_no_improvement == 0 {
            return invalid("search.max_no_improvement must be at least 1".into());
        }
        if self.search.probability_grid < 2 {
            return invalid("search.probability_grid must be at least 2".into());
        }
        Ok(())
    }

    pub fn metric(&self) -> CostMetric {
        if self.optimize_duration {
            CostMetric::Duration
        } else {
            CostMetric::Distance
        }
    }

    pub fn route_params(&self, alpha: f64) -> RouteParams {
        RouteParams {
            alpha,
            max_route_length: self.max_route_length,
            max_stops_per_route: self.max_stops_per_route,
            pollution_metric: self.pollution_metric.clone(),
            clean_waste_threshold: self.clean_waste_threshold,
        }
    }

    pub fn lkh_solver(&self) -> LkhSolver {
        LkhSolver::new(self.lkh.clone())
    }
}

/// Construction outcome of one day and alpha.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstructionReport {
    pub date: String,
    pub alpha: f64,
    pub summary: SolutionSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub construction: Vec<ConstructionReport>,
    pub searches: Vec<SearchReport>,
}

/// Removes the routes of `layer` planned for `date` and `alpha`.
fn clear_runs(store: &dyn RouteStore, layer: &Layer, date: &str, alpha: f64) -> PlannerResult<()> {
    for info in store.route_infos(layer, date, alpha)? {
        store.delete_route(layer, &info.route_id)?;
    }
    Ok(())
}

/// Plans every configured day: construction for each alpha, then local
/// search for each strategy and alpha.
///
/// Independent runs execute in parallel, each with its own caches.
#[tracing::instrument(skip_all, fields(days = config.dates.len(), alphas = config.alphas.len()))]
pub fn plan_batch(backends: &Backends<'_>, config: &PlannerConfig) -> PlannerResult<BatchReport> {
    config.validate()?;
    let metric = config.metric();

    let mut alphas = config.alphas.clone();
    if let Some(alpha) = config.construction_alpha
        && !alphas.contains(&alpha)
    {
        alphas.push(alpha);
    }
    let constructions: Vec<(String, f64)> = config
        .dates
        .iter()
        .flat_map(|date| alphas.iter().map(move |alpha| (date.clone(), *alpha)))
        .collect();

    let construction = constructions
        .par_iter()
        .map(|(date, alpha)| -> PlannerResult<ConstructionReport> {
            clear_runs(backends.store, &Layer::Greedy, date, *alpha)?;
            let run = GreedyParams {
                date: date.clone(),
                metric,
                params: config.route_params(*alpha),
            };
            greedy_solve(backends.selector, backends.matrices, backends.store, &config.depot, &run)?;
            let solution = Solution::load(backends.store, &Layer::Greedy, date, *alpha, Strategy::Classification)?;
            Ok(ConstructionReport {
                date: date.clone(),
                alpha: *alpha,
                summary: solution.summary(),
            })
        })
        .collect::<PlannerResult<Vec<_>>>()?;
    tracing::info!(runs = construction.len(), "construction phase done");

    let mut runs = Vec::new();
    for strategy in &config.strategies {
        for alpha in &config.alphas {
            for date in &config.dates {
                runs.push(SearchRun {
                    date: date.clone(),
                    metric,
                    strategy: *strategy,
                    params: config.route_params(*alpha),
                    construction_alpha: config.construction_alpha,
                });
            }
        }
    }

    let searches = runs
        .par_iter()
        .enumerate()
        .map(|(index, run)| {
            let mut options = config.search.clone();
            options.seed = options.seed.map(|seed| seed.wrapping_add(index as u64));
            local_search(backends, &config.depot, run, &options, &mut RunCaches::default())
        })
        .collect::<PlannerResult<Vec<_>>>()?;
    tracing::info!(runs = searches.len(), "local search phase done");

    Ok(BatchReport {
        construction,
        searches,
    })
}

/// Totals of `layer` for `alpha` over the given days.
pub fn layer_summary(
    store: &dyn RouteStore,
    layer: &Layer,
    dates: &[String],
    alpha: f64,
) -> PlannerResult<SolutionSummary> {
    let mut total = SolutionSummary::default();
    for date in dates {
        let summary = Solution::load(store, layer, date, alpha, Strategy::Classification)?.summary();
        total.routes += summary.routes;
        total.length += summary.length;
        total.secondary_length += summary.secondary_length;
        total.stops += summary.stops;
        total.clean_stops += summary.clean_stops;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probability::ProbabilityKind;

    fn valid() -> PlannerConfig {
        PlannerConfig {
            depot: Depot::new("base", "drop"),
            ..PlannerConfig::default()
        }
    }

    #[test]
    fn defaults() {
        let config = PlannerConfig::default();
        assert_eq!(config.pollution_metric, "averageDayScore");
        assert_eq!(config.clean_waste_threshold, 0.187);
        assert_eq!(config.search.max_iteration, 200);
        assert_eq!(config.metric(), CostMetric::Distance);
    }

    #[test]
    fn parses_partial_json() {
        let config = PlannerConfig::from_json_str(
            r#"{
                "alphas": [250.0],
                "dates": ["2024-05-01"],
                "optimize_duration": true,
                "max_stops_per_route": 40,
                "strategies": ["classification", {"stochastic": "t_prob"}],
                "search": {"simulated_annealing": false, "seed": 7},
                "depot": {"base": "base", "drop_off": "drop"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.metric(), CostMetric::Duration);
        assert_eq!(config.alphas, vec![250.0]);
        assert_eq!(
            config.strategies,
            vec![Strategy::Classification, Strategy::Stochastic(ProbabilityKind::TProb)]
        );
        assert!(!config.search.simulated_annealing);
        assert_eq!(config.search.max_iteration, 200);
        assert_eq!(config.route_params(250.0).max_stops_per_route, Some(40));
    }

    #[test]
    fn rejects_missing_depot() {
        assert!(matches!(
            PlannerConfig::default().validate(),
            Err(PlannerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_bad_limits() {
        let mut config = valid();
        config.max_stops_per_route = Some(0);
        assert!(config.validate().is_err());

        let mut config = valid();
        config.max_route_length = Some(-1.0);
        assert!(config.validate().is_err());

        let mut config = valid();
        config.alphas = vec![-5.0];
        assert!(config.validate().is_err());

        let mut config = valid();
        config.search.probability_grid = 1;
        assert!(config.validate().is_err());

        assert!(valid().validate().is_ok());
    }

    #[test]
    fn unknown_field_type_is_a_config_error() {
        let err = PlannerConfig::from_json_str(r#"{"alphas": "many"}"#).unwrap_err();
        assert!(matches!(err, PlannerError::InvalidConfig(_)));
    }
}
