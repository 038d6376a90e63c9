//! Paired-comparison trial containers.
//!
//! Trials are organised as group -> attribute -> subject -> trials, the same
//! nesting the inference runner iterates over.

use std::collections::BTreeMap;

use super::ExperimentLayout;

/// One presentation of a pair of objects and the listener's graded answer.
///
/// A positive `response` favours `second`, a negative one favours `first`.
/// Its magnitude indexes the difference grades of the layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedCompTrial {
    pub first: String,
    pub second: String,
    pub response: i32,
    pub test_condition: Vec<String>,
}

impl PairedCompTrial {
    /// Trial without test factors.
    #[must_use]
    pub fn new(first: impl Into<String>, second: impl Into<String>, response: i32) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
            response,
            test_condition: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_test_condition<C>(mut self, condition: C) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        self.test_condition = condition.into_iter().map(Into::into).collect();
        self
    }
}

/// Trials for one attribute, keyed by subject.
pub type SubjectTrials = BTreeMap<String, Vec<PairedCompTrial>>;

/// All collected trials of an experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedCompDataSet {
    pub layout: ExperimentLayout,
    pub groups: BTreeMap<String, BTreeMap<String, SubjectTrials>>,
}

impl PairedCompDataSet {
    #[must_use]
    pub const fn new(layout: ExperimentLayout) -> Self {
        Self {
            layout,
            groups: BTreeMap::new(),
        }
    }

    /// Append one trial, creating the group, attribute and subject entries as needed.
    pub fn add_trial(
        &mut self,
        group: impl Into<String>,
        attribute: impl Into<String>,
        subject: impl Into<String>,
        trial: PairedCompTrial,
    ) {
        self.subject_entry(group, attribute, subject).push(trial);
    }

    /// Append a batch of trials for one subject. An empty batch still registers the subject.
    pub fn add_subject_trials(
        &mut self,
        group: impl Into<String>,
        attribute: impl Into<String>,
        subject: impl Into<String>,
        trials: impl IntoIterator<Item = PairedCompTrial>,
    ) {
        self.subject_entry(group, attribute, subject).extend(trials);
    }

    #[must_use]
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    /// Trials of every subject in `group` for `attribute`.
    #[must_use]
    pub fn subjects(&self, group: &str, attribute: &str) -> Option<&SubjectTrials> {
        self.groups.get(group)?.get(attribute)
    }

    /// Total number of trials across all groups, attributes and subjects.
    #[must_use]
    pub fn n_trials(&self) -> usize {
        self.groups
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    fn subject_entry(
        &mut self,
        group: impl Into<String>,
        attribute: impl Into<String>,
        subject: impl Into<String>,
    ) -> &mut Vec<PairedCompTrial> {
        self.groups
            .entry(group.into())
            .or_default()
            .entry(attribute.into())
            .or_default()
            .entry(subject.into())
            .or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trials_nest_by_group_attribute_subject() {
        let layout = ExperimentLayout::new(["A", "B"], ["Preference"], ["Better"]);
        let mut data = PairedCompDataSet::new(layout);
        data.add_trial("g1", "Preference", "s1", PairedCompTrial::new("A", "B", 1));
        data.add_trial("g1", "Preference", "s1", PairedCompTrial::new("B", "A", -1));
        data.add_trial("g2", "Preference", "s2", PairedCompTrial::new("A", "B", -1));
        data.add_subject_trials("g2", "Preference", "s3", Vec::new());

        assert_eq!(data.n_groups(), 2);
        assert_eq!(data.n_trials(), 3);
        let g2 = data.subjects("g2", "Preference").expect("group g2 exists");
        assert_eq!(g2.len(), 2);
        assert!(g2["s3"].is_empty());
        assert!(data.subjects("g3", "Preference").is_none());
    }
}
