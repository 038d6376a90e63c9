//! Core public types for the paired-comparison model.

use std::collections::BTreeSet;
use std::fmt;

use faer::Mat;
use thiserror::Error;

use crate::inference::{InferenceError, LearningSchedule};
use crate::input::{ExperimentLayout, LayoutError};

/// Errors returned by data validation, configuration and learning.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PairedCompError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Schedule(#[from] InferenceError),
    #[error("object `{label}` is not part of the experiment layout")]
    UnknownObject { label: String },
    #[error("test condition {condition:?} is not part of the experiment layout")]
    UnknownTestCondition { condition: Vec<String> },
    #[error(
        "response {response} is outside the grade scale ({n_grades} grades, forced choice = {forced_choice})"
    )]
    InvalidResponse {
        response: i32,
        n_grades: usize,
        forced_choice: bool,
    },
    #[error("object `{object}` is compared with itself")]
    SelfComparison { object: String },
    #[error("attribute `{attribute}` is not part of the experiment layout")]
    UnknownAttribute { attribute: String },
    #[error("no subject in group `{group}` has trials for attribute `{attribute}`")]
    NoSubjects { group: String, attribute: String },
    #[error("invalid inference configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("parameter dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("posterior samples are required")]
    EmptyPosterior,
    #[error("at least one learned group is required for merging")]
    NoGroupsToMerge,
    #[error("merged subject key `{key}` is not unique")]
    DuplicateSubjectKey { key: String },
}

/// Layout of the parameter vector shared by subjects and population.
///
/// The first `n_quality()` entries are quality parameters stored test-condition
/// major, excluding the reference object. The remaining `n_categories` entries
/// are log response-interval widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterShape {
    pub n_objects: usize,
    pub n_test_conditions: usize,
    pub n_categories: usize,
}

impl ParameterShape {
    #[must_use]
    pub fn from_layout(layout: &ExperimentLayout) -> Self {
        Self {
            n_objects: layout.n_objects(),
            n_test_conditions: layout.n_test_conditions(),
            n_categories: layout.n_difference_grades(),
        }
    }

    #[must_use]
    pub const fn n_quality(self) -> usize {
        self.n_test_conditions * self.n_objects.saturating_sub(1)
    }

    #[must_use]
    pub const fn dim(self) -> usize {
        self.n_quality() + self.n_categories
    }

    /// Parameter index of `object` under test condition `test_condition`,
    /// or `None` for the reference object.
    #[must_use]
    pub const fn quality_index(self, test_condition: usize, object: usize) -> Option<usize> {
        if object == 0 {
            None
        } else {
            Some(test_condition * (self.n_objects - 1) + object - 1)
        }
    }

    /// Quality values of one parameter vector as a test-condition by object
    /// matrix, with zeros in the reference column.
    #[must_use]
    pub fn quality_matrix(self, params: &[f64]) -> Mat<f64> {
        Mat::from_fn(self.n_test_conditions, self.n_objects, |t, object| {
            self.quality_index(t, object)
                .map_or(0.0, |index| params[index])
        })
    }
}

/// Hyper-parameters of the population prior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopulationPriorConfig {
    /// Pseudo-count weight of the prior location.
    pub learned_weight: f64,
    /// Prior scale of quality parameters (d-prime units).
    pub quality_scale: f64,
    /// Prior scale of log response-interval widths.
    pub cat_width_scale: f64,
    /// Gamma shape of each per-dimension precision.
    pub precision_shape: f64,
}

impl Default for PopulationPriorConfig {
    fn default() -> Self {
        Self {
            learned_weight: 0.2,
            quality_scale: 1.0,
            cat_width_scale: 1.0,
            precision_shape: 1.0,
        }
    }
}

impl PopulationPriorConfig {
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.learned_weight > 0.0
            && self.quality_scale > 0.0
            && self.cat_width_scale > 0.0
            && self.precision_shape > 0.0
            && self.learned_weight.is_finite()
            && self.quality_scale.is_finite()
            && self.cat_width_scale.is_finite()
            && self.precision_shape.is_finite()
    }
}

/// Step-size and length controls for the ensemble Hamiltonian solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HamiltonianTuning {
    /// Full ensemble sweeps per subject adaptation.
    pub n_sweeps: usize,
    /// Leapfrog steps per trajectory.
    pub n_leapfrog: usize,
    /// Initial leapfrog step size in whitened coordinates.
    pub initial_step_size: f64,
    /// Lower bound on the adapted step size.
    pub min_step_size: f64,
    /// Lower acceptance-rate target for step-size adaptation.
    pub acceptance_target_low: f64,
    /// Upper acceptance-rate target for step-size adaptation.
    pub acceptance_target_high: f64,
    /// Multiplicative step decrease when acceptance is below target.
    pub step_decrease_factor: f64,
    /// Multiplicative step increase when acceptance is above target.
    pub step_increase_factor: f64,
}

impl Default for HamiltonianTuning {
    fn default() -> Self {
        Self {
            n_sweeps: 10,
            n_leapfrog: 10,
            initial_step_size: 0.3,
            min_step_size: 1.0e-3,
            acceptance_target_low: 0.6,
            acceptance_target_high: 0.9,
            step_decrease_factor: 0.8,
            step_increase_factor: 1.2,
        }
    }
}

impl HamiltonianTuning {
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.n_sweeps > 0
            && self.n_leapfrog > 0
            && self.initial_step_size > 0.0
            && self.min_step_size > 0.0
            && self.min_step_size <= self.initial_step_size
            && self.acceptance_target_low >= 0.0
            && self.acceptance_target_high <= 1.0
            && self.acceptance_target_low < self.acceptance_target_high
            && self.step_decrease_factor > 0.0
            && self.step_decrease_factor < 1.0
            && self.step_increase_factor > 1.0
    }
}

/// Approximation used for each subject's posterior.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SubjectSolver {
    /// Gaussian centred at the MAP with the negative Hessian as precision.
    #[default]
    Laplace,
    /// Laplace start refined by ensemble Hamiltonian Monte Carlo.
    Hamiltonian(HamiltonianTuning),
}

/// Settings for learning every group of an experiment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceConfig {
    /// Posterior samples kept per subject.
    pub n_samples: usize,
    /// Draws produced by population predictive models.
    pub n_predictive_samples: usize,
    pub prior: PopulationPriorConfig,
    pub schedule: LearningSchedule,
    /// Multiplier on the Gamma rate of quality precisions before the first subject pass.
    pub warm_start_factor: f64,
    pub solver: SubjectSolver,
    /// RNG seed for reproducibility.
    pub seed: u64,
    /// Adapt subjects in parallel.
    pub parallel: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            n_samples: 1_000,
            n_predictive_samples: 10_000,
            prior: PopulationPriorConfig::default(),
            schedule: LearningSchedule::default(),
            warm_start_factor: 100.0,
            solver: SubjectSolver::default(),
            seed: 42,
            parallel: true,
        }
    }
}

impl InferenceConfig {
    /// # Errors
    ///
    /// Returns `PairedCompError` if any configuration block is invalid.
    pub fn validate(self) -> Result<(), PairedCompError> {
        self.schedule.validate()?;
        if self.n_samples == 0 {
            return Err(PairedCompError::InvalidConfig(
                "posterior sample count must be positive",
            ));
        }
        if self.n_predictive_samples == 0 {
            return Err(PairedCompError::InvalidConfig(
                "predictive sample count must be positive",
            ));
        }
        if !self.prior.is_valid() {
            return Err(PairedCompError::InvalidConfig(
                "population prior scales, weight and shape must be positive and finite",
            ));
        }
        if !(self.warm_start_factor > 0.0 && self.warm_start_factor.is_finite()) {
            return Err(PairedCompError::InvalidConfig(
                "warm-start factor must be positive and finite",
            ));
        }
        if let SubjectSolver::Hamiltonian(tuning) = self.solver
            && !tuning.is_valid()
        {
            return Err(PairedCompError::InvalidConfig(
                "invalid Hamiltonian solver tuning",
            ));
        }
        Ok(())
    }
}

/// Key of a learned group: a single participant group or a pooled set of groups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Single(String),
    Merged(BTreeSet<String>),
}

impl GroupKey {
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        Self::Single(name.into())
    }

    #[must_use]
    pub fn merged<I>(names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::Merged(names.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub const fn is_merged(&self) -> bool {
        matches!(self, Self::Merged(_))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(name) => f.write_str(name),
            Self::Merged(names) => {
                let joined: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "({})", joined.join(", "))
            }
        }
    }
}
