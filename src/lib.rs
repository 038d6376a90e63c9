#![forbid(unsafe_code)]

//! # `paired_comparison`
//!
//! Hierarchical Bayesian analysis of graded paired-comparison experiments.
//!
//! Subjects compare pairs of objects on one or more attributes and answer with
//! a signed difference grade. The crate estimates each subject's perceived
//! object qualities and response thresholds under a Thurstone or Bradley choice
//! model, together with a population model for every participant group, using
//! variational inference.
//!
//! ```no_run
//! use paired_comparison::{
//!     ChoiceModel, ExperimentLayout, GroupKey, InferenceConfig, PairedCompDataSet,
//!     PairedCompResultSet, PairedCompTrial,
//! };
//!
//! let layout = ExperimentLayout::new(["Ref", "Codec"], ["Preference"], ["Better", "Much better"]);
//! let mut data = PairedCompDataSet::new(layout);
//! data.add_trial("panel", "Preference", "s1", PairedCompTrial::new("Ref", "Codec", 2));
//! data.add_trial("panel", "Preference", "s2", PairedCompTrial::new("Codec", "Ref", -1));
//!
//! let result = PairedCompResultSet::learn(
//!     &data,
//!     ChoiceModel::Thurstone,
//!     false,
//!     &InferenceConfig::default(),
//! )?;
//! let model = result
//!     .model(&GroupKey::single("panel"), "Preference")
//!     .expect("group was learned");
//! let quality = model.pred_population_mean().quality_samples();
//! assert_eq!(quality.len(), 10_000);
//! # Ok::<(), paired_comparison::PairedCompError>(())
//! ```

pub mod inference;
pub mod input;
pub mod models;
pub mod utils;

pub use inference::{InferenceError, LearnStatus, LearningSchedule, ProposalStats};
pub use input::{ExperimentLayout, LayoutError, PairedCompDataSet, PairedCompTrial};
pub mod matrix_ops {
    pub use crate::models::matrix_ops::*;
}

pub use models::paired::{
    ChoiceModel, GroupInferenceEngine, GroupKey, GroupModel, HamiltonianTuning, InferenceConfig,
    PairedCompError, PairedCompResultSet, ParameterShape, ParameterSummary,
    PopulationModel, PopulationPredictiveModel, PopulationPriorConfig, QualitySummary,
    StudentMarginals, SubjectPosterior, SubjectSolver, TrialCount, TrialStatistics,
    cat_limit_samples, cat_limits_transform, center_category_widths, d_cat_limits_transform,
    probability_better, probability_positive, summarize_cat_limits, summarize_quality,
};
