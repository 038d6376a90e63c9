//! # Experiment inputs
//!
//! Describes the layout of a paired-comparison experiment (objects, perceptual
//! attributes, graded response scale and test-condition factors) and the trial
//! data collected under it.
//!
//! # Examples
//!
//! ```
//! use paired_comparison::ExperimentLayout;
//!
//! let layout = ExperimentLayout::new(
//!     ["A", "B", "C"],
//!     ["Preference"],
//!     ["Equal", "Slightly better", "Better"],
//! )
//! .with_forced_choice(false)
//! .with_test_factor("Loudness", ["Soft", "Loud"]);
//!
//! assert!(layout.validate().is_ok());
//! assert_eq!(layout.n_quality_params(), 4);
//! assert_eq!(layout.n_test_conditions(), 2);
//! ```
//!
//! ```
//! use paired_comparison::ExperimentLayout;
//!
//! let layout = ExperimentLayout::new(["A"], ["Preference"], ["Better"]);
//! assert!(layout.validate().is_err());
//! ```

use std::collections::BTreeSet;

use thiserror::Error;

pub mod dataset;

pub use dataset::{PairedCompDataSet, PairedCompTrial};

/// Errors returned when validating an experiment layout.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("at least two objects are required, got {count}")]
    TooFewObjects { count: usize },
    #[error("object label `{label}` appears more than once")]
    DuplicateObject { label: String },
    #[error("at least one perceptual attribute is required")]
    NoAttributes,
    #[error("attribute `{label}` appears more than once")]
    DuplicateAttribute { label: String },
    #[error("the response scale must have at least one difference grade")]
    NoDifferenceGrades,
    #[error("test factor `{factor}` has no categories")]
    EmptyTestFactor { factor: String },
    #[error("test factor `{factor}` appears more than once")]
    DuplicateTestFactor { factor: String },
}

/// Static description of a paired-comparison experiment.
///
/// Object index 0 is the reference object whose quality is fixed at zero.
/// With `forced_choice` a response magnitude `r` is in `1..=n_grades`;
/// otherwise grade 0 means "no difference" and `r` is in `0..n_grades`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentLayout {
    pub objects: Vec<String>,
    pub attributes: Vec<String>,
    pub difference_grades: Vec<String>,
    pub forced_choice: bool,
    pub test_factors: Vec<(String, Vec<String>)>,
}

impl ExperimentLayout {
    /// Forced-choice layout without test factors.
    #[must_use]
    pub fn new<O, A, G>(objects: O, attributes: A, difference_grades: G) -> Self
    where
        O: IntoIterator,
        O::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
        G: IntoIterator,
        G::Item: Into<String>,
    {
        Self {
            objects: objects.into_iter().map(Into::into).collect(),
            attributes: attributes.into_iter().map(Into::into).collect(),
            difference_grades: difference_grades.into_iter().map(Into::into).collect(),
            forced_choice: true,
            test_factors: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_forced_choice(mut self, forced_choice: bool) -> Self {
        self.forced_choice = forced_choice;
        self
    }

    #[must_use]
    pub fn with_test_factor<C>(mut self, factor: impl Into<String>, categories: C) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        self.test_factors.push((
            factor.into(),
            categories.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// # Errors
    ///
    /// Returns `LayoutError` if labels are missing or duplicated.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.objects.len() < 2 {
            return Err(LayoutError::TooFewObjects {
                count: self.objects.len(),
            });
        }
        if let Some(label) = first_duplicate(&self.objects) {
            return Err(LayoutError::DuplicateObject { label });
        }
        if self.attributes.is_empty() {
            return Err(LayoutError::NoAttributes);
        }
        if let Some(label) = first_duplicate(&self.attributes) {
            return Err(LayoutError::DuplicateAttribute { label });
        }
        if self.difference_grades.is_empty() {
            return Err(LayoutError::NoDifferenceGrades);
        }
        let factor_names: Vec<String> = self
            .test_factors
            .iter()
            .map(|(factor, _)| factor.clone())
            .collect();
        if let Some(factor) = first_duplicate(&factor_names) {
            return Err(LayoutError::DuplicateTestFactor { factor });
        }
        if let Some((factor, _)) = self
            .test_factors
            .iter()
            .find(|(_, categories)| categories.is_empty())
        {
            return Err(LayoutError::EmptyTestFactor {
                factor: factor.clone(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn n_objects(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub const fn n_difference_grades(&self) -> usize {
        self.difference_grades.len()
    }

    /// Number of distinct test-condition tuples (1 without test factors).
    #[must_use]
    pub fn n_test_conditions(&self) -> usize {
        self.test_factors
            .iter()
            .map(|(_, categories)| categories.len())
            .product()
    }

    /// Free quality parameters: every non-reference object in every test condition.
    #[must_use]
    pub fn n_quality_params(&self) -> usize {
        self.n_test_conditions() * self.n_objects().saturating_sub(1)
    }

    /// All test-condition tuples in row-major order of the test factors.
    #[must_use]
    pub fn test_condition_categories(&self) -> Vec<Vec<String>> {
        let mut tuples: Vec<Vec<String>> = vec![Vec::new()];
        for (_, categories) in &self.test_factors {
            tuples = tuples
                .iter()
                .flat_map(|prefix| {
                    categories.iter().map(move |category| {
                        let mut tuple = prefix.clone();
                        tuple.push(category.clone());
                        tuple
                    })
                })
                .collect();
        }
        tuples
    }

    #[must_use]
    pub fn object_index(&self, label: &str) -> Option<usize> {
        self.objects.iter().position(|object| object == label)
    }

    #[must_use]
    pub fn attribute_index(&self, label: &str) -> Option<usize> {
        self.attributes.iter().position(|attribute| attribute == label)
    }

    /// Row-major index of a test-condition tuple.
    #[must_use]
    pub fn test_condition_index(&self, condition: &[String]) -> Option<usize> {
        if condition.len() != self.test_factors.len() {
            return None;
        }
        let mut index = 0;
        for ((_, categories), category) in self.test_factors.iter().zip(condition) {
            let position = categories.iter().position(|c| c == category)?;
            index = index * categories.len() + position;
        }
        Some(index)
    }
}

fn first_duplicate(labels: &[String]) -> Option<String> {
    let mut seen = BTreeSet::new();
    labels
        .iter()
        .find(|label| !seen.insert(label.as_str()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ExperimentLayout {
        ExperimentLayout::new(["A", "B", "C"], ["Clarity", "Loudness"], ["Better", "Much better"])
            .with_test_factor("Noise", ["Low", "High"])
            .with_test_factor("Room", ["Small", "Medium", "Large"])
    }

    #[test]
    fn counts_follow_factors() {
        let layout = layout();
        assert_eq!(layout.n_objects(), 3);
        assert_eq!(layout.n_test_conditions(), 6);
        assert_eq!(layout.n_quality_params(), 12);
    }

    #[test]
    fn test_conditions_are_cartesian_product() {
        let layout = layout();
        let tuples = layout.test_condition_categories();
        assert_eq!(tuples.len(), 6);
        assert_eq!(tuples[0], vec!["Low".to_string(), "Small".to_string()]);
        assert_eq!(tuples[5], vec!["High".to_string(), "Large".to_string()]);
        for (index, tuple) in tuples.iter().enumerate() {
            assert_eq!(layout.test_condition_index(tuple), Some(index));
        }
    }

    #[test]
    fn no_factors_gives_single_empty_condition() {
        let layout = ExperimentLayout::new(["A", "B"], ["Preference"], ["Better"]);
        assert_eq!(layout.n_test_conditions(), 1);
        assert_eq!(layout.test_condition_categories(), vec![Vec::<String>::new()]);
        assert_eq!(layout.test_condition_index(&[]), Some(0));
    }

    #[test]
    fn validation_catches_duplicates_and_gaps() {
        let duplicated = ExperimentLayout::new(["A", "A"], ["Preference"], ["Better"]);
        assert_eq!(
            duplicated.validate(),
            Err(LayoutError::DuplicateObject {
                label: "A".to_string()
            })
        );

        let no_grades = ExperimentLayout::new(["A", "B"], ["Preference"], Vec::<String>::new());
        assert_eq!(no_grades.validate(), Err(LayoutError::NoDifferenceGrades));

        let empty_factor = ExperimentLayout::new(["A", "B"], ["Preference"], ["Better"])
            .with_test_factor("Room", Vec::<String>::new());
        assert!(matches!(
            empty_factor.validate(),
            Err(LayoutError::EmptyTestFactor { .. })
        ));
    }

    #[test]
    fn unknown_condition_has_no_index() {
        let layout = layout();
        let unknown = vec!["Low".to_string(), "Huge".to_string()];
        assert_eq!(layout.test_condition_index(&unknown), None);
        assert_eq!(layout.test_condition_index(&["Low".to_string()]), None);
    }
}
