//! Learning every (group, attribute) combination of an experiment.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::input::{ExperimentLayout, PairedCompDataSet};

use super::choice::ChoiceModel;
use super::group::GroupModel;
use super::population::PopulationModel;
use super::types::{GroupKey, InferenceConfig, PairedCompError, ParameterShape};

/// Seed increment between successive (group, attribute) runs.
const GROUP_SEED_STRIDE: u64 = 1_000_003;

/// All learned models of one experiment, keyed by group and then attribute.
#[derive(Debug, Clone)]
pub struct PairedCompResultSet {
    layout: Arc<ExperimentLayout>,
    choice_model: ChoiceModel,
    population_prior: Arc<PopulationModel>,
    models: BTreeMap<GroupKey, BTreeMap<String, GroupModel>>,
}

impl PairedCompResultSet {
    /// Learn one model per (group, attribute) in `data`.
    ///
    /// When the data holds more than one group, every attribute also gets a
    /// merged model under [`GroupKey::Merged`] with all group names.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` for an invalid layout or configuration, trials
    /// for an attribute missing from the layout, invalid trial data, or a
    /// (group, attribute) without any subject trials.
    pub fn learn(
        data: &PairedCompDataSet,
        choice_model: ChoiceModel,
        null_quality: bool,
        config: &InferenceConfig,
    ) -> Result<Self, PairedCompError> {
        data.layout.validate()?;
        config.validate()?;
        let layout = Arc::new(data.layout.clone());
        let shape = ParameterShape::from_layout(&layout);
        let population_prior = Arc::new(PopulationModel::initialize(
            shape,
            config.prior,
            null_quality,
        )?);

        let mut models: BTreeMap<GroupKey, BTreeMap<String, GroupModel>> = BTreeMap::new();
        let mut run_seed = config.seed;
        for (group, attributes) in &data.groups {
            for (attribute, subject_trials) in attributes {
                if layout.attribute_index(attribute).is_none() {
                    return Err(PairedCompError::UnknownAttribute {
                        attribute: attribute.clone(),
                    });
                }
                let run_config = InferenceConfig {
                    seed: run_seed,
                    ..*config
                };
                run_seed = run_seed.wrapping_add(GROUP_SEED_STRIDE);
                let model = GroupModel::learn(
                    Arc::clone(&layout),
                    group,
                    attribute,
                    subject_trials,
                    choice_model,
                    Arc::clone(&population_prior),
                    &run_config,
                )?;
                models
                    .entry(GroupKey::single(group.as_str()))
                    .or_default()
                    .insert(attribute.clone(), model);
            }
        }

        if data.groups.len() > 1 {
            let merged = Self::merge_attributes(&layout, &models, config)?;
            if !merged.is_empty() {
                models.insert(GroupKey::merged(data.groups.keys().cloned()), merged);
            }
        }

        Ok(Self {
            layout,
            choice_model,
            population_prior,
            models,
        })
    }

    fn merge_attributes(
        layout: &ExperimentLayout,
        models: &BTreeMap<GroupKey, BTreeMap<String, GroupModel>>,
        config: &InferenceConfig,
    ) -> Result<BTreeMap<String, GroupModel>, PairedCompError> {
        let mut merged = BTreeMap::new();
        for attribute in &layout.attributes {
            let constituents: Vec<(&str, &GroupModel)> = models
                .iter()
                .filter_map(|(key, by_attribute)| match key {
                    GroupKey::Single(group) => by_attribute
                        .get(attribute)
                        .map(|model| (group.as_str(), model)),
                    GroupKey::Merged(_) => None,
                })
                .collect();
            if constituents.is_empty() {
                continue;
            }
            merged.insert(attribute.clone(), GroupModel::merge(constituents, config)?);
        }
        Ok(merged)
    }

    #[must_use]
    pub fn layout(&self) -> &ExperimentLayout {
        &self.layout
    }

    #[must_use]
    pub const fn choice_model(&self) -> ChoiceModel {
        self.choice_model
    }

    /// Prior shared by every learned group.
    #[must_use]
    pub const fn population_prior(&self) -> &Arc<PopulationModel> {
        &self.population_prior
    }

    #[must_use]
    pub const fn models(&self) -> &BTreeMap<GroupKey, BTreeMap<String, GroupModel>> {
        &self.models
    }

    #[must_use]
    pub fn model(&self, group: &GroupKey, attribute: &str) -> Option<&GroupModel> {
        self.models.get(group)?.get(attribute)
    }

    /// The merged model of `attribute`, if the experiment has more than one group.
    #[must_use]
    pub fn merged_model(&self, attribute: &str) -> Option<&GroupModel> {
        self.models
            .iter()
            .find(|(key, _)| key.is_merged())
            .and_then(|(_, by_attribute)| by_attribute.get(attribute))
    }
}
