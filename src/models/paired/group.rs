//! Variational learning of one participant group for one attribute.
//!
//! Each iteration refits every subject against the current population, pools
//! the subject samples into a conjugate population update and records
//! `sum(subject contributions) - KL(population || prior)` as the lower bound.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::inference::LearnStatus;
use crate::input::{ExperimentLayout, PairedCompTrial};

use super::choice::ChoiceModel;
use super::population::{PopulationModel, center_category_widths};
use super::predictive::PopulationPredictiveModel;
use super::subject::SubjectPosterior;
use super::trials::TrialStatistics;
use super::types::{InferenceConfig, PairedCompError, ParameterShape};

/// Seed increment between adjacent subjects of a group.
const SUBJECT_SEED_STRIDE: u64 = 10_000;

#[derive(Debug)]
struct SubjectSlot {
    name: String,
    posterior: SubjectPosterior,
    data: TrialStatistics,
}

/// Mutable state of the iterative learning procedure.
#[derive(Debug)]
pub struct GroupInferenceEngine {
    group: String,
    attribute: String,
    shape: ParameterShape,
    choice_model: ChoiceModel,
    subjects: Vec<SubjectSlot>,
    population: PopulationModel,
    prior: Arc<PopulationModel>,
    config: InferenceConfig,
    lower_bounds: Vec<f64>,
}

impl GroupInferenceEngine {
    /// Set up fresh subject posteriors and a warm-started working copy of the prior.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` if the configuration is invalid, `NoSubjects`
    /// without subject data, or `DimensionMismatch` if a subject's data does
    /// not match the prior dimension.
    pub fn new(
        group: &str,
        attribute: &str,
        shape: ParameterShape,
        subject_data: Vec<(String, TrialStatistics)>,
        choice_model: ChoiceModel,
        prior: Arc<PopulationModel>,
        config: &InferenceConfig,
    ) -> Result<Self, PairedCompError> {
        config.validate()?;
        if subject_data.is_empty() {
            return Err(PairedCompError::NoSubjects {
                group: group.to_string(),
                attribute: attribute.to_string(),
            });
        }
        if prior.dim() != shape.dim() {
            return Err(PairedCompError::DimensionMismatch {
                expected: shape.dim(),
                found: prior.dim(),
            });
        }
        if let Some((_, data)) = subject_data.iter().find(|(_, data)| data.dim() != shape.dim()) {
            return Err(PairedCompError::DimensionMismatch {
                expected: shape.dim(),
                found: data.dim(),
            });
        }

        let mut seed = config.seed;
        let subjects = subject_data
            .into_iter()
            .map(|(name, data)| {
                let posterior = SubjectPosterior::new(
                    shape,
                    choice_model,
                    config.solver,
                    config.n_samples,
                    seed,
                );
                seed = seed.wrapping_add(SUBJECT_SEED_STRIDE);
                SubjectSlot {
                    name,
                    posterior,
                    data,
                }
            })
            .collect();

        let mut population = (*prior).clone();
        population.scale_precision_rate(shape.n_quality(), config.warm_start_factor);

        Ok(Self {
            group: group.to_string(),
            attribute: attribute.to_string(),
            shape,
            choice_model,
            subjects,
            population,
            prior,
            config: *config,
            lower_bounds: Vec::new(),
        })
    }

    /// One subject pass followed by one population update; returns the new lower bound.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` if the population update fails.
    pub fn one_learn_step(&mut self) -> Result<f64, PairedCompError> {
        let population = &self.population;
        let scores: Vec<f64> = if self.config.parallel {
            self.subjects
                .par_iter_mut()
                .map(|slot| slot.posterior.adapt(&slot.data, population))
                .collect()
        } else {
            self.subjects
                .iter_mut()
                .map(|slot| slot.posterior.adapt(&slot.data, population))
                .collect()
        };
        let subject_sum: f64 = scores.iter().sum();

        let pooled = center_category_widths(
            self.subjects.iter().map(|slot| slot.posterior.x_samples()),
            self.shape.n_quality(),
        );
        self.population.adapt(&pooled, &self.prior)?;
        Ok(subject_sum - self.population.relative_entropy(&self.prior))
    }

    /// Iterate until the schedule stops, calling `callback(iteration, lower_bound)` after each step.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` if an iteration fails.
    pub fn learn(
        &mut self,
        callback: impl FnMut(usize, f64),
    ) -> Result<LearnStatus, PairedCompError> {
        self.run_schedule(0, callback)
    }

    /// Continue learning from the current state under a fresh schedule window.
    ///
    /// The stopping rule only sees the bounds recorded by this call, so a
    /// model already at its optimum stops after `min_iter + 1` steps. Bounds
    /// are appended to [`Self::lower_bounds`] and `max_iter` caps this call.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` if an iteration fails.
    pub fn refine(
        &mut self,
        callback: impl FnMut(usize, f64),
    ) -> Result<LearnStatus, PairedCompError> {
        self.run_schedule(self.lower_bounds.len(), callback)
    }

    fn run_schedule(
        &mut self,
        start: usize,
        mut callback: impl FnMut(usize, f64),
    ) -> Result<LearnStatus, PairedCompError> {
        let schedule = self.config.schedule;
        while schedule.should_continue(&self.lower_bounds[start..]) {
            let lower_bound = self.one_learn_step()?;
            self.lower_bounds.push(lower_bound);
            let iteration = self.lower_bounds.len();
            log::info!(
                "{}/{}: Done {iteration} iterations. LL = {lower_bound:.2}",
                self.group,
                self.attribute
            );
            callback(iteration, lower_bound);
        }
        let status = schedule.status(&self.lower_bounds[start..]);
        log::debug!(
            "population loc = {:?}, mean precision = {:?}",
            self.population.loc(),
            self.population.mean_precision()
        );
        log::debug!("lower bounds = {:?}", self.lower_bounds);
        Ok(status)
    }

    #[must_use]
    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    #[must_use]
    pub const fn population(&self) -> &PopulationModel {
        &self.population
    }

    /// Names of the subjects in iteration order.
    pub fn subject_names(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(|slot| slot.name.as_str())
    }

    fn into_model(self, layout: Arc<ExperimentLayout>, status: LearnStatus) -> GroupModel {
        GroupModel {
            layout,
            choice_model: self.choice_model,
            subjects: self
                .subjects
                .into_iter()
                .map(|slot| (slot.name, Arc::new(slot.posterior)))
                .collect(),
            population: self.population,
            population_prior: self.prior,
            lower_bounds: self.lower_bounds,
            status,
            n_predictive_samples: self.config.n_predictive_samples,
            seed: self.config.seed,
        }
    }
}

/// Learned population and subject posteriors for one group and one attribute.
#[derive(Debug, Clone)]
pub struct GroupModel {
    layout: Arc<ExperimentLayout>,
    choice_model: ChoiceModel,
    subjects: BTreeMap<String, Arc<SubjectPosterior>>,
    population: PopulationModel,
    population_prior: Arc<PopulationModel>,
    lower_bounds: Vec<f64>,
    status: LearnStatus,
    n_predictive_samples: usize,
    seed: u64,
}

impl GroupModel {
    /// Learn a group from the raw trials of its subjects.
    ///
    /// Subjects without trials are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` for invalid trials or configuration, or
    /// `NoSubjects` if no subject has any trial.
    pub fn learn(
        layout: Arc<ExperimentLayout>,
        group: &str,
        attribute: &str,
        subject_trials: &BTreeMap<String, Vec<PairedCompTrial>>,
        choice_model: ChoiceModel,
        prior: Arc<PopulationModel>,
        config: &InferenceConfig,
    ) -> Result<Self, PairedCompError> {
        Self::learn_with_callback(
            layout,
            group,
            attribute,
            subject_trials,
            choice_model,
            prior,
            config,
            |_, _| {},
        )
    }

    /// [`Self::learn`] with a closure called after every iteration.
    ///
    /// # Errors
    ///
    /// Same as [`Self::learn`].
    #[allow(clippy::too_many_arguments)]
    pub fn learn_with_callback(
        layout: Arc<ExperimentLayout>,
        group: &str,
        attribute: &str,
        subject_trials: &BTreeMap<String, Vec<PairedCompTrial>>,
        choice_model: ChoiceModel,
        prior: Arc<PopulationModel>,
        config: &InferenceConfig,
        callback: impl FnMut(usize, f64),
    ) -> Result<Self, PairedCompError> {
        let mut subject_data = Vec::with_capacity(subject_trials.len());
        for (subject, trials) in subject_trials {
            if trials.is_empty() {
                log::warn!(
                    "subject {subject} has no trials for {attribute} in group {group}; excluded"
                );
                continue;
            }
            subject_data.push((subject.clone(), TrialStatistics::from_trials(&layout, trials)?));
        }

        let shape = ParameterShape::from_layout(&layout);
        let mut engine = GroupInferenceEngine::new(
            group,
            attribute,
            shape,
            subject_data,
            choice_model,
            prior,
            config,
        )?;
        let status = engine.learn(callback)?;
        log::info!(
            "Learned group {group}, attribute {attribute}: {} subjects, {} iterations, {status:?}",
            engine.subjects.len(),
            engine.lower_bounds.len()
        );
        Ok(engine.into_model(layout, status))
    }

    /// Pool already learned groups into one model over all their subjects.
    ///
    /// Subject posteriors are shared with the source groups. Subject keys
    /// become `"{group}_{subject}"` and the population is refitted once from
    /// the shared prior.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` if no group is given, subject keys collide,
    /// or the population update fails.
    pub fn merge<'a>(
        groups: impl IntoIterator<Item = (&'a str, &'a Self)>,
        config: &InferenceConfig,
    ) -> Result<Self, PairedCompError> {
        let groups: Vec<(&str, &Self)> = groups.into_iter().collect();
        let Some((_, first)) = groups.first() else {
            return Err(PairedCompError::NoGroupsToMerge);
        };

        let mut subjects = BTreeMap::new();
        for (group, model) in &groups {
            for (subject, posterior) in &model.subjects {
                let key = format!("{group}_{subject}");
                if subjects.contains_key(&key) {
                    return Err(PairedCompError::DuplicateSubjectKey { key });
                }
                subjects.insert(key, Arc::clone(posterior));
            }
        }

        let prior = Arc::clone(&first.population_prior);
        let n_quality = ParameterShape::from_layout(&first.layout).n_quality();
        let pooled = center_category_widths(
            subjects.values().map(|posterior| posterior.x_samples()),
            n_quality,
        );
        let mut population = (*prior).clone();
        population.adapt(&pooled, &prior)?;
        log::info!(
            "Merged {} groups into one population over {} subjects",
            groups.len(),
            subjects.len()
        );

        Ok(Self {
            layout: Arc::clone(&first.layout),
            choice_model: first.choice_model,
            subjects,
            population,
            population_prior: prior,
            lower_bounds: Vec::new(),
            status: LearnStatus::Merged,
            n_predictive_samples: config.n_predictive_samples,
            seed: config.seed,
        })
    }

    #[must_use]
    pub fn layout(&self) -> &ExperimentLayout {
        &self.layout
    }

    #[must_use]
    pub const fn choice_model(&self) -> ChoiceModel {
        self.choice_model
    }

    #[must_use]
    pub const fn subjects(&self) -> &BTreeMap<String, Arc<SubjectPosterior>> {
        &self.subjects
    }

    #[must_use]
    pub fn subject(&self, name: &str) -> Option<&Arc<SubjectPosterior>> {
        self.subjects.get(name)
    }

    #[must_use]
    pub const fn population(&self) -> &PopulationModel {
        &self.population
    }

    #[must_use]
    pub const fn population_prior(&self) -> &Arc<PopulationModel> {
        &self.population_prior
    }

    /// Lower bound after every iteration (empty for merged models).
    #[must_use]
    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    #[must_use]
    pub const fn status(&self) -> LearnStatus {
        self.status
    }

    /// Predictive model for the population mean.
    #[must_use]
    pub fn pred_population_mean(&self) -> PopulationPredictiveModel {
        PopulationPredictiveModel::new(
            self.population.mean_predictive(),
            ParameterShape::from_layout(&self.layout),
            self.n_predictive_samples,
            self.seed,
        )
    }

    /// Predictive model for a new individual from the population.
    #[must_use]
    pub fn pred_population_ind(&self) -> PopulationPredictiveModel {
        PopulationPredictiveModel::new(
            self.population.predictive(),
            ParameterShape::from_layout(&self.layout),
            self.n_predictive_samples,
            self.seed,
        )
    }
}
