//! Reusable inference schedule and proposal-tracking types.

use thiserror::Error;

use crate::utils::usize_to_f64;

/// Errors for an invalid learning schedule.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InferenceError {
    #[error("minimum iteration count must be positive")]
    InvalidMinIterations,
    #[error("maximum iterations ({max_iter}) must exceed the minimum ({min_iter})")]
    InvalidMaxIterations { min_iter: usize, max_iter: usize },
    #[error("minimum lower-bound step must not be NaN")]
    InvalidMinStep,
}

/// Outcome of a variational learning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnStatus {
    /// The lower bound stopped improving by more than the minimum step.
    Converged,
    /// Learning stopped at the iteration cap before converging.
    MaxIterReached,
    /// The model was pooled from other learned groups without its own iterations.
    Merged,
}

/// Stopping rule for the variational lower-bound iterations.
///
/// Learning continues while fewer than `min_iter + 1` bounds exist, or while
/// the bound improved by more than `min_step` over the last `min_iter`
/// iterations and the total count is below `max_iter`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningSchedule {
    pub min_iter: usize,
    pub min_step: f64,
    pub max_iter: Option<usize>,
}

impl Default for LearningSchedule {
    fn default() -> Self {
        Self {
            min_iter: 5,
            min_step: 0.01,
            max_iter: None,
        }
    }
}

impl LearningSchedule {
    /// Check the schedule before learning.
    ///
    /// A cap must exceed `min_iter`. The first `min_iter + 1` iterations
    /// always run, so a smaller cap could never be honoured; it is rejected
    /// here instead of being silently overridden.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError` for a zero `min_iter`, a NaN `min_step`, or a
    /// `max_iter` not above `min_iter`.
    pub fn validate(self) -> Result<(), InferenceError> {
        if self.min_iter == 0 {
            return Err(InferenceError::InvalidMinIterations);
        }
        if self.min_step.is_nan() {
            return Err(InferenceError::InvalidMinStep);
        }
        if let Some(max_iter) = self.max_iter
            && max_iter <= self.min_iter
        {
            return Err(InferenceError::InvalidMaxIterations {
                min_iter: self.min_iter,
                max_iter,
            });
        }
        Ok(())
    }

    /// Iteration cap; unbounded when unset.
    #[must_use]
    pub fn effective_max_iter(self) -> usize {
        self.max_iter.unwrap_or(usize::MAX)
    }

    /// Whether another iteration should run given the bounds seen so far.
    #[must_use]
    pub fn should_continue(self, lower_bounds: &[f64]) -> bool {
        let len = lower_bounds.len();
        if len <= self.min_iter {
            return true;
        }
        if len >= self.effective_max_iter() {
            return false;
        }
        self.recent_improvement(lower_bounds) > self.min_step
    }

    /// Final status for a finished sequence of bounds.
    #[must_use]
    pub fn status(self, lower_bounds: &[f64]) -> LearnStatus {
        if lower_bounds.len() > self.min_iter
            && self.recent_improvement(lower_bounds) <= self.min_step
        {
            LearnStatus::Converged
        } else {
            LearnStatus::MaxIterReached
        }
    }

    fn recent_improvement(self, lower_bounds: &[f64]) -> f64 {
        let len = lower_bounds.len();
        let improvement = lower_bounds[len - 1] - lower_bounds[len - 1 - self.min_iter];
        if improvement.is_nan() {
            f64::INFINITY
        } else {
            improvement
        }
    }
}

/// Proposal counters for a Metropolis-Hastings or Hamiltonian block.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposalStats {
    pub proposed: usize,
    pub accepted: usize,
}

impl ProposalStats {
    /// Record one proposal and whether it was accepted.
    pub const fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    /// Acceptance rate in `[0, 1]`, or `0` if no proposals were made.
    #[must_use]
    pub fn acceptance_rate(self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            usize_to_f64(self.accepted) / usize_to_f64(self.proposed)
        }
    }
}
