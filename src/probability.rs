//! Probability that a route's aggregate pollution stays under the threshold.
//!
//! Every pickup carries a pollution distribution. A route is clean when the
//! sum of its pickups' pollution does not exceed `threshold * stops`. For
//! normal distributions the sum is normal again and the probability has a
//! closed form. Student-t and Gaussian-mixture sums have none, so their
//! densities are sampled on a grid, convolved with an FFT and integrated
//! numerically.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal, StudentsT};

use crate::error::{PlannerError, PlannerResult};
use crate::fft::convolve_all;

/// Number of grid points each density is sampled on.
pub const GRID_SIZE: usize = 1 << 17;

/// Entries kept by the probability cache before the oldest is evicted.
pub const CACHE_CAPACITY: usize = 100;

/// Pollution model of a single pickup.
///
/// Variant order matters for untagged deserialization: the richer shapes
/// are tried first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PollutionDistribution {
    NormalMixture {
        mu1: f64,
        sigma1: f64,
        mu2: f64,
        sigma2: f64,
        mu3: f64,
        sigma3: f64,
        /// Weights of the first two components; the third gets the rest.
        weights: [f64; 2],
    },
    StudentT {
        mu: f64,
        sigma: f64,
        /// Sample count; the distribution has `n - 1` degrees of freedom.
        n: f64,
    },
    Normal {
        mu: f64,
        sigma: f64,
    },
}

impl PollutionDistribution {
    pub fn is_normal(&self) -> bool {
        matches!(self, PollutionDistribution::Normal { .. })
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        match *self {
            PollutionDistribution::Normal { mu, sigma } => {
                0u8.hash(state);
                mu.to_bits().hash(state);
                sigma.to_bits().hash(state);
            }
            PollutionDistribution::StudentT { mu, sigma, n } => {
                1u8.hash(state);
                mu.to_bits().hash(state);
                sigma.to_bits().hash(state);
                n.to_bits().hash(state);
            }
            PollutionDistribution::NormalMixture {
                mu1,
                sigma1,
                mu2,
                sigma2,
                mu3,
                sigma3,
                weights,
            } => {
                2u8.hash(state);
                for value in [mu1, sigma1, mu2, sigma2, mu3, sigma3, weights[0], weights[1]] {
                    value.to_bits().hash(state);
                }
            }
        }
    }
}

/// A density ready to be evaluated.
enum Density {
    Normal(Normal),
    StudentT(StudentsT),
    Mixture([(f64, Normal); 3]),
}

impl Density {
    fn new(distribution: &PollutionDistribution) -> PlannerResult<Self> {
        match *distribution {
            PollutionDistribution::Normal { mu, sigma } => Ok(Density::Normal(normal(mu, sigma)?)),
            PollutionDistribution::StudentT { mu, sigma, n } => StudentsT::new(mu, sigma, n - 1.0)
                .map(Density::StudentT)
                .map_err(|err| {
                    PlannerError::InvalidDistribution(format!(
                        "student-t(mu={mu}, sigma={sigma}, n={n}): {err}"
                    ))
                }),
            PollutionDistribution::NormalMixture {
                mu1,
                sigma1,
                mu2,
                sigma2,
                mu3,
                sigma3,
                weights,
            } => {
                let rest = 1.0 - weights[0] - weights[1];
                if weights[0] < 0.0 || weights[1] < 0.0 || rest < -1e-9 {
                    return Err(PlannerError::InvalidDistribution(format!(
                        "mixture weights {weights:?} do not form a distribution"
                    )));
                }
                Ok(Density::Mixture([
                    (weights[0], normal(mu1, sigma1)?),
                    (weights[1], normal(mu2, sigma2)?),
                    (rest.max(0.0), normal(mu3, sigma3)?),
                ]))
            }
        }
    }

    fn pdf(&self, x: f64) -> f64 {
        match self {
            Density::Normal(dist) => dist.pdf(x),
            Density::StudentT(dist) => dist.pdf(x),
            Density::Mixture(components) => components
                .iter()
                .map(|(weight, dist)| weight * dist.pdf(x))
                .sum(),
        }
    }
}

fn normal(mu: f64, sigma: f64) -> PlannerResult<Normal> {
    Normal::new(mu, sigma).map_err(|err| {
        PlannerError::InvalidDistribution(format!("normal(mu={mu}, sigma={sigma}): {err}"))
    })
}

/// Named pollution models stored on the pickups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilityKind {
    NormalProb,
    BayesianProb,
    BayesianProbMixed,
    TProb,
}

impl ProbabilityKind {
    pub fn name(self) -> &'static str {
        match self {
            ProbabilityKind::NormalProb => "normal_prob",
            ProbabilityKind::BayesianProb => "bayesian_prob",
            ProbabilityKind::BayesianProbMixed => "bayesian_prob_mixed",
            ProbabilityKind::TProb => "t_prob",
        }
    }

    /// Property under which the pickups store this model's distribution.
    pub fn property_key(self) -> String {
        format!("{}.dist", self.name())
    }

    /// Whether `distribution` has the shape this model produces.
    pub fn accepts(self, distribution: &PollutionDistribution) -> bool {
        match self {
            ProbabilityKind::NormalProb | ProbabilityKind::BayesianProb => {
                matches!(distribution, PollutionDistribution::Normal { .. })
            }
            ProbabilityKind::BayesianProbMixed => {
                matches!(distribution, PollutionDistribution::NormalMixture { .. })
            }
            ProbabilityKind::TProb => matches!(distribution, PollutionDistribution::StudentT { .. }),
        }
    }
}

impl fmt::Display for ProbabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProbabilityKind {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal_prob" => Ok(ProbabilityKind::NormalProb),
            "bayesian_prob" => Ok(ProbabilityKind::BayesianProb),
            "bayesian_prob_mixed" => Ok(ProbabilityKind::BayesianProbMixed),
            "t_prob" => Ok(ProbabilityKind::TProb),
            other => Err(PlannerError::InvalidConfig(format!(
                "unknown probability model '{other}'"
            ))),
        }
    }
}

/// Closed-form probability that the sum of independent normals stays under
/// `threshold * count`.
pub fn normal_probability_clean(
    distributions: &[PollutionDistribution],
    threshold: f64,
) -> PlannerResult<f64> {
    let mut mean = 0.0;
    let mut variance = 0.0;
    for distribution in distributions {
        let PollutionDistribution::Normal { mu, sigma } = *distribution else {
            return Err(PlannerError::InvalidDistribution(format!(
                "closed form needs normal distributions, got {distribution:?}"
            )));
        };
        mean += mu;
        variance += sigma * sigma;
    }
    let sum = normal(mean, variance.sqrt())?;
    Ok(sum.cdf(threshold * distributions.len() as f64))
}

/// Numerical probability that the sum of arbitrary densities stays under
/// `threshold * count`, sampling each on `grid_size` points over
/// `[0, count]`.
pub fn fft_probability_clean(
    distributions: &[PollutionDistribution],
    threshold: f64,
    grid_size: usize,
) -> PlannerResult<f64> {
    if grid_size < 2 {
        return Err(PlannerError::InvalidConfig(format!(
            "grid size {grid_size} is too small"
        )));
    }
    let max_x = distributions.len() as f64;
    let dx = max_x / (grid_size - 1) as f64;

    let samples = distributions
        .par_iter()
        .map(|distribution| {
            let density = Density::new(distribution)?;
            Ok((0..grid_size)
                .map(|i| density.pdf(i as f64 * dx))
                .collect::<Vec<f64>>())
        })
        .collect::<PlannerResult<Vec<Vec<f64>>>>()?;

    let convolved = convolve_all(&samples);
    let total = trapezoid(&convolved, dx);
    if !(total.is_finite() && total > 0.0) {
        return Err(PlannerError::InvalidDistribution(format!(
            "convolved density has no mass on [0, {max_x}]"
        )));
    }

    let limit = threshold * max_x;
    let index = ((limit / dx).round().max(0.0) as usize).min(convolved.len());
    let above = trapezoid(&convolved[index..], dx);
    Ok((1.0 - above / total).clamp(0.0, 1.0))
}

fn trapezoid(values: &[f64], dx: f64) -> f64 {
    values
        .windows(2)
        .map(|pair| (pair[0] + pair[1]) * dx / 2.0)
        .sum()
}

/// FIFO-bounded memo of computed probabilities.
#[derive(Debug, Clone)]
pub struct ProbabilityCache {
    capacity: usize,
    order: VecDeque<u64>,
    values: HashMap<u64, f64>,
}

impl Default for ProbabilityCache {
    fn default() -> Self {
        Self::new(CACHE_CAPACITY)
    }
}

impl ProbabilityCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity + 1),
            values: HashMap::with_capacity(capacity + 1),
        }
    }

    pub fn key(distributions: &[PollutionDistribution], threshold: f64) -> u64 {
        let mut hasher = DefaultHasher::new();
        distributions.len().hash(&mut hasher);
        for distribution in distributions {
            distribution.hash_into(&mut hasher);
        }
        threshold.to_bits().hash(&mut hasher);
        hasher.finish()
    }

    pub fn get(&self, key: u64) -> Option<f64> {
        self.values.get(&key).copied()
    }

    pub fn insert(&mut self, key: u64, value: f64) {
        if self.values.insert(key, value).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.values.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.values.clear();
    }
}

/// Evaluates probability-of-clean for one run, memoizing results.
#[derive(Debug, Clone)]
pub struct ProbabilityModel {
    kind: ProbabilityKind,
    threshold: f64,
    grid_size: usize,
    cache: ProbabilityCache,
}

impl ProbabilityModel {
    pub fn new(kind: ProbabilityKind, threshold: f64) -> Self {
        Self {
            kind,
            threshold,
            grid_size: GRID_SIZE,
            cache: ProbabilityCache::default(),
        }
    }

    pub fn with_grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    pub fn kind(&self) -> ProbabilityKind {
        self.kind
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn cache(&self) -> &ProbabilityCache {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Probability that the stops backed by `distributions` stay clean.
    ///
    /// An empty route has nothing to pollute and is clean with certainty.
    pub fn probability_clean(&mut self, distributions: &[PollutionDistribution]) -> PlannerResult<f64> {
        if distributions.is_empty() {
            return Ok(1.0);
        }

        let key = ProbabilityCache::key(distributions, self.threshold);
        if let Some(value) = self.cache.get(key) {
            return Ok(value);
        }

        let value = if distributions.iter().all(PollutionDistribution::is_normal) {
            normal_probability_clean(distributions, self.threshold)?
        } else {
            fft_probability_clean(distributions, self.threshold, self.grid_size)?
        };
        self.cache.insert(key, value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_normal_cdf(z: f64) -> f64 {
        Normal::new(0.0, 1.0).unwrap().cdf(z)
    }

    #[test]
    fn single_normal_matches_cdf() {
        let dist = PollutionDistribution::Normal { mu: 0.2, sigma: 0.05 };
        let p = normal_probability_clean(&[dist], 0.25).unwrap();
        assert!((p - standard_normal_cdf(1.0)).abs() < 1e-12);
    }

    #[test]
    fn threshold_scales_with_stop_count() {
        let dist = PollutionDistribution::Normal { mu: 0.1, sigma: 0.1 };
        let p = normal_probability_clean(&[dist, dist], 0.1).unwrap();
        assert!((p - 0.5).abs() < 1e-12);
    }

    #[test]
    fn closed_form_rejects_other_shapes() {
        let dist = PollutionDistribution::StudentT { mu: 0.1, sigma: 0.1, n: 5.0 };
        assert!(normal_probability_clean(&[dist], 0.1).is_err());
    }

    #[test]
    fn fft_agrees_with_closed_form_for_normals() {
        let dist = PollutionDistribution::Normal { mu: 0.3, sigma: 0.1 };
        let exact = normal_probability_clean(&[dist, dist], 0.35).unwrap();
        let approx = fft_probability_clean(&[dist, dist], 0.35, GRID_SIZE).unwrap();
        assert!(
            ((approx - exact) / exact).abs() < 0.01,
            "fft {approx} vs closed form {exact}"
        );
    }

    #[test]
    fn mixture_with_one_component_behaves_like_a_normal() {
        let mixture = PollutionDistribution::NormalMixture {
            mu1: 0.4,
            sigma1: 0.1,
            mu2: 0.9,
            sigma2: 0.1,
            mu3: 0.9,
            sigma3: 0.1,
            weights: [1.0, 0.0],
        };
        let approx = fft_probability_clean(&[mixture], 0.4, 1 << 14).unwrap();
        assert!((approx - 0.5).abs() < 0.01, "got {approx}");
    }

    #[test]
    fn student_t_needs_more_than_one_sample() {
        let dist = PollutionDistribution::StudentT { mu: 0.1, sigma: 0.1, n: 1.0 };
        assert!(fft_probability_clean(&[dist], 0.1, 1 << 10).is_err());
    }

    #[test]
    fn deserializes_each_shape() {
        let normal: PollutionDistribution =
            serde_json::from_str(r#"{"mu": 0.1, "sigma": 0.2}"#).unwrap();
        assert!(matches!(normal, PollutionDistribution::Normal { .. }));

        let t: PollutionDistribution =
            serde_json::from_str(r#"{"mu": 0.1, "sigma": 0.2, "n": 4}"#).unwrap();
        assert!(matches!(t, PollutionDistribution::StudentT { .. }));

        let mixture: PollutionDistribution = serde_json::from_str(
            r#"{"mu1": 0.1, "sigma1": 0.2, "mu2": 0.3, "sigma2": 0.1,
                "mu3": 0.5, "sigma3": 0.1, "weights": [0.2, 0.3]}"#,
        )
        .unwrap();
        assert!(matches!(mixture, PollutionDistribution::NormalMixture { .. }));
    }

    #[test]
    fn cache_evicts_oldest_first() {
        let mut cache = ProbabilityCache::new(2);
        cache.insert(1, 0.1);
        cache.insert(2, 0.2);
        cache.insert(3, 0.3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(1), None);
        assert_eq!(cache.get(3), Some(0.3));
    }

    #[test]
    fn model_memoizes_and_handles_empty_routes() {
        let mut model = ProbabilityModel::new(ProbabilityKind::NormalProb, 0.2);
        assert_eq!(model.probability_clean(&[]).unwrap(), 1.0);

        let dist = PollutionDistribution::Normal { mu: 0.1, sigma: 0.1 };
        let first = model.probability_clean(&[dist]).unwrap();
        assert_eq!(model.cache().len(), 1);
        let second = model.probability_clean(&[dist]).unwrap();
        assert_eq!(first, second);
        assert_eq!(model.cache().len(), 1);
    }

    #[test]
    fn kinds_round_trip_through_names() {
        for kind in [
            ProbabilityKind::NormalProb,
            ProbabilityKind::BayesianProb,
            ProbabilityKind::BayesianProbMixed,
            ProbabilityKind::TProb,
        ] {
            assert_eq!(kind.name().parse::<ProbabilityKind>().unwrap(), kind);
        }
        assert_eq!(ProbabilityKind::TProb.property_key(), "t_prob.dist");
    }
}
