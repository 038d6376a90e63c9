//! Hierarchical Bayesian model for graded paired-comparison experiments.
//!
//! Each subject's latent object qualities and response-interval widths get a
//! sample-based posterior. The subjects of one group share a Normal-Gamma
//! population model, and both levels are refined by alternating variational
//! updates until the lower bound stops improving.
//!
//! Entry points are [`PairedCompResultSet::learn`] for a whole experiment and
//! [`GroupModel::learn`] for a single group and attribute.

pub mod choice;
pub mod experiment;
pub mod group;
pub mod population;
pub mod posterior;
pub mod predictive;
mod solver;
pub mod subject;
pub mod thresholds;
pub mod trials;
pub mod types;

pub use choice::ChoiceModel;
pub use experiment::PairedCompResultSet;
pub use group::{GroupInferenceEngine, GroupModel};
pub use population::{PopulationModel, center_category_widths};
pub use posterior::{
    ParameterSummary, QualitySummary, probability_better, probability_positive,
    summarize_cat_limits, summarize_quality,
};
pub use predictive::{PopulationPredictiveModel, StudentMarginals};
pub use subject::SubjectPosterior;
pub use thresholds::{cat_limit_samples, cat_limits_transform, d_cat_limits_transform};
pub use trials::{TrialCount, TrialStatistics};
pub use types::{
    GroupKey, HamiltonianTuning, InferenceConfig, PairedCompError, ParameterShape,
    PopulationPriorConfig, SubjectSolver,
};
