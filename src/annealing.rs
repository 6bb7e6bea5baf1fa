//! Simulated-annealing acceptance for the cross-exchange rounds.
//!
//! The temperature decays linearly from `initial` to zero over the round
//! budget, so early rounds may take worsening moves and the last rounds
//! reduce to strict descent.

use rand::Rng;

/// Default starting temperature, in objective units.
pub const INITIAL_TEMPERATURE: f64 = 1000.0;

/// Linear cooling over a fixed number of rounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSchedule {
    initial: f64,
    rounds: usize,
}

impl LinearSchedule {
    pub fn new(initial: f64, rounds: usize) -> Self {
        Self { initial, rounds }
    }

    /// `T = T0 * (1 - round / rounds)`, clamped at zero.
    pub fn temperature(&self, round: usize) -> f64 {
        if self.rounds == 0 {
            return 0.0;
        }
        (self.initial * (1.0 - round as f64 / self.rounds as f64)).max(0.0)
    }
}

/// Metropolis acceptance probability of moving from `incumbent` to
/// `proposed` at `temperature`.
pub fn acceptance_probability(incumbent: f64, proposed: f64, temperature: f64) -> f64 {
    if proposed < incumbent {
        return 1.0;
    }
    if temperature <= 0.0 {
        return 0.0;
    }
    ((incumbent - proposed) / temperature).exp()
}

/// How a round decides whether to take its best candidate move.
#[derive(Debug, Clone)]
pub enum Acceptance<R> {
    /// Only strictly improving moves.
    Descent,
    /// Metropolis criterion under a linear schedule.
    Annealing { schedule: LinearSchedule, rng: R },
}

impl<R: Rng> Acceptance<R> {
    pub fn accepts(&mut self, delta: f64, round: usize) -> bool {
        match self {
            Acceptance::Descent => delta < 0.0,
            Acceptance::Annealing { schedule, rng } => {
                let probability = acceptance_probability(0.0, delta, schedule.temperature(round));
                probability >= 1.0 || rng.random::<f64>() < probability
            }
        }
    }

    /// The random source, when annealing.
    pub fn rng_mut(&mut self) -> Option<&mut R> {
        match self {
            Acceptance::Descent => None,
            Acceptance::Annealing { rng, .. } => Some(rng),
        }
    }

    pub fn is_annealing(&self) -> bool {
        matches!(self, Acceptance::Annealing { .. })
    }
}
