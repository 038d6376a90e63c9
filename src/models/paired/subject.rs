//! Approximate posterior of one subject's parameters.

use faer::Mat;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::models::matrix_ops::row_to_vec;
use crate::utils::standard_normal_matrix;

use super::choice::ChoiceModel;
use super::population::PopulationModel;
use super::solver::{SubjectObjective, approximate};
use super::thresholds::{cat_limit_samples, cat_limits_transform};
use super::trials::TrialStatistics;
use super::types::{ParameterShape, SubjectSolver};

/// Sample-based posterior over one subject's quality and log-width parameters.
///
/// Samples are drawn from fixed standard-normal rows, so repeated updates
/// against an unchanged population give the same lower-bound contribution.
#[derive(Debug, Clone)]
pub struct SubjectPosterior {
    shape: ParameterShape,
    choice_model: ChoiceModel,
    solver: SubjectSolver,
    x_samples: Mat<f64>,
    x_map: Vec<f64>,
    base_draws: Mat<f64>,
    lower_bound: Option<f64>,
    acceptance_rate: Option<f64>,
    seed: u64,
    n_updates: u64,
}

impl SubjectPosterior {
    /// Fresh posterior with a single all-zero sample.
    #[must_use]
    pub fn new(
        shape: ParameterShape,
        choice_model: ChoiceModel,
        solver: SubjectSolver,
        n_samples: usize,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            shape,
            choice_model,
            solver,
            x_samples: Mat::zeros(1, shape.dim()),
            x_map: vec![0.0; shape.dim()],
            base_draws: standard_normal_matrix(&mut rng, n_samples.max(1), shape.dim()),
            lower_bound: None,
            acceptance_rate: None,
            seed,
            n_updates: 0,
        }
    }

    /// Refit against `population` and return this subject's lower-bound contribution:
    /// `E_q[ln p(data | x) + E ln p(x | population)] + H(q)`.
    ///
    /// If the solver fails the previous state is kept and its contribution returned.
    pub fn adapt(&mut self, data: &TrialStatistics, population: &PopulationModel) -> f64 {
        let objective = SubjectObjective {
            data,
            population,
            model: self.choice_model,
        };
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.n_updates));
        self.n_updates += 1;

        if let Some(result) =
            approximate(&objective, self.solver, &self.x_map, &self.base_draws, &mut rng)
        {
            let score = objective.mean_value(&result.x_samples) + result.entropy;
            if score.is_finite() {
                self.x_samples = result.x_samples;
                self.x_map = result.x_map;
                self.acceptance_rate = result.acceptance_rate;
                self.lower_bound = Some(score);
                return score;
            }
        }

        log::warn!(
            "subject posterior update failed after {} updates; keeping previous samples",
            self.n_updates - 1
        );
        *self
            .lower_bound
            .get_or_insert_with(|| objective.mean_value(&self.x_samples))
    }

    #[must_use]
    pub const fn shape(&self) -> ParameterShape {
        self.shape
    }

    #[must_use]
    pub const fn choice_model(&self) -> ChoiceModel {
        self.choice_model
    }

    /// Posterior samples, one row per sample.
    #[must_use]
    pub const fn x_samples(&self) -> &Mat<f64> {
        &self.x_samples
    }

    #[must_use]
    pub fn x_map(&self) -> &[f64] {
        &self.x_map
    }

    /// Lower-bound contribution of the last successful update.
    #[must_use]
    pub const fn lower_bound(&self) -> Option<f64> {
        self.lower_bound
    }

    /// Ensemble acceptance rate of the last Hamiltonian update.
    #[must_use]
    pub const fn acceptance_rate(&self) -> Option<f64> {
        self.acceptance_rate
    }

    /// Quality samples as test-condition by object matrices, reference column zero.
    #[must_use]
    pub fn quality_samples(&self) -> Vec<Mat<f64>> {
        (0..self.x_samples.nrows())
            .map(|s| self.shape.quality_matrix(&row_to_vec(&self.x_samples, s)))
            .collect()
    }

    #[must_use]
    pub fn quality_map(&self) -> Mat<f64> {
        self.shape.quality_matrix(&self.x_map)
    }

    /// Response-interval upper limits, one row per sample.
    #[must_use]
    pub fn cat_limit_samples(&self) -> Mat<f64> {
        let n_q = self.shape.n_quality();
        let log_w = Mat::from_fn(self.x_samples.nrows(), self.shape.n_categories, |s, c| {
            self.x_samples[(s, n_q + c)]
        });
        cat_limit_samples(&log_w)
    }

    /// Response-interval upper limits at the MAP.
    #[must_use]
    pub fn cat_limits_map(&self) -> Vec<f64> {
        cat_limits_transform(&self.x_map[self.shape.n_quality()..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{ExperimentLayout, PairedCompTrial};
    use crate::models::paired::types::PopulationPriorConfig;
    use approx::assert_relative_eq;

    fn fixture() -> (ParameterShape, TrialStatistics, PopulationModel) {
        let layout = ExperimentLayout::new(["Ref", "B", "C"], ["Preference"], ["Better", "Much better"]);
        let mut trials = Vec::new();
        for _ in 0..4 {
            trials.push(PairedCompTrial::new("Ref", "B", 2));
            trials.push(PairedCompTrial::new("C", "Ref", 1));
            trials.push(PairedCompTrial::new("B", "C", -1));
        }
        trials.push(PairedCompTrial::new("Ref", "C", 1));
        let data = TrialStatistics::from_trials(&layout, &trials).expect("valid trials");
        let shape = ParameterShape::from_layout(&layout);
        let population =
            PopulationModel::initialize(shape, PopulationPriorConfig::default(), false)
                .expect("valid prior");
        (shape, data, population)
    }

    #[test]
    fn new_subject_starts_with_single_zero_sample() {
        let (shape, _, _) = fixture();
        let subject = SubjectPosterior::new(shape, ChoiceModel::Thurstone, SubjectSolver::Laplace, 20, 1);
        assert_eq!(subject.x_samples().nrows(), 1);
        assert_eq!(subject.x_samples().ncols(), 4);
        assert!(subject.lower_bound().is_none());
    }

    #[test]
    fn adapt_recovers_preference_order() {
        let (shape, data, population) = fixture();
        let mut subject =
            SubjectPosterior::new(shape, ChoiceModel::Thurstone, SubjectSolver::Laplace, 200, 3);
        let score = subject.adapt(&data, &population);
        assert!(score.is_finite());
        assert_eq!(subject.lower_bound(), Some(score));
        assert_eq!(subject.x_samples().nrows(), 200);

        let quality = subject.quality_map();
        assert_relative_eq!(quality[(0, 0)], 0.0);
        // B is preferred over Ref and C, C is worse than Ref.
        assert!(quality[(0, 1)] > 0.0);
        assert!(quality[(0, 2)] < 0.0);
        assert_eq!(subject.quality_samples().len(), 200);

        let limits = subject.cat_limits_map();
        assert!(limits[0] > 0.0);
        assert_eq!(limits[1], f64::INFINITY);
        assert_eq!(subject.cat_limit_samples().nrows(), 200);
    }

    #[test]
    fn repeated_adapt_against_same_population_is_stable() {
        let (shape, data, population) = fixture();
        let mut subject =
            SubjectPosterior::new(shape, ChoiceModel::Bradley, SubjectSolver::Laplace, 100, 5);
        let first = subject.adapt(&data, &population);
        let second = subject.adapt(&data, &population);
        assert_relative_eq!(first, second, epsilon = 1.0e-6);
    }
}
