//! Approximations of one subject's posterior given a population prior.
//!
//! The Laplace solver finds the MAP by damped Newton ascent and places a
//! Gaussian there with the negative Hessian as precision. The Hamiltonian
//! solver starts from that Gaussian and moves an ensemble of particles with
//! leapfrog trajectories in whitened coordinates.

use faer::Mat;
use rand::RngExt;
use rand::rngs::StdRng;

use crate::inference::ProposalStats;
use crate::models::matrix_ops::{
    add_to_rows, half_row_norms_sq, row_matrix, row_to_vec, zip_map_mat,
};
use crate::utils::{
    cholesky_with_jitter, dot, half_log_det_from_cholesky, invert_lower_triangular,
    matrix_is_finite, max_abs, sample_covariance, solve_symmetric, standard_normal_matrix,
    usize_to_f64,
};

use super::choice::ChoiceModel;
use super::population::PopulationModel;
use super::trials::TrialStatistics;
use super::types::{HamiltonianTuning, SubjectSolver};

const MAP_MAX_ITERS: usize = 100;
const MAP_GRADIENT_TOLERANCE: f64 = 1.0e-8;
const MAP_RELATIVE_TOLERANCE: f64 = 1.0e-12;
const ARMIJO_FRACTION: f64 = 1.0e-4;
const LINE_SEARCH_HALVINGS: usize = 40;
const HESSIAN_STEP: f64 = 1.0e-5;

/// Unnormalised subject log-posterior: trial log-likelihood plus expected
/// population log-density.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubjectObjective<'a> {
    pub data: &'a TrialStatistics,
    pub population: &'a PopulationModel,
    pub model: ChoiceModel,
}

impl SubjectObjective<'_> {
    pub(crate) fn values(&self, x: &Mat<f64>) -> Vec<f64> {
        self.data
            .log_likelihood(x, self.model)
            .into_iter()
            .zip(self.population.mean_logpdf(x))
            .map(|(ll, lp)| ll + lp)
            .collect()
    }

    pub(crate) fn gradients(&self, x: &Mat<f64>) -> Mat<f64> {
        let ll = self.data.grad_log_likelihood(x, self.model);
        let lp = self.population.grad_mean_logpdf(x);
        zip_map_mat(&ll, &lp, |a, b| a + b)
    }

    /// Mean of [`Self::values`] over sample rows.
    pub(crate) fn mean_value(&self, x: &Mat<f64>) -> f64 {
        let values = self.values(x);
        values.iter().sum::<f64>() / usize_to_f64(values.len()).max(1.0)
    }

    fn value(&self, x: &[f64]) -> f64 {
        self.values(&row_matrix(x))[0]
    }

    fn gradient(&self, x: &[f64]) -> Vec<f64> {
        row_to_vec(&self.gradients(&row_matrix(x)), 0)
    }

    /// Negative Hessian by central differences of the analytic gradient.
    fn neg_hessian(&self, x: &[f64]) -> Mat<f64> {
        let dim = x.len();
        let steps: Vec<f64> = x
            .iter()
            .map(|value| HESSIAN_STEP * value.abs().max(1.0))
            .collect();
        let points = Mat::from_fn(2 * dim, dim, |row, col| {
            let j = row / 2;
            let sign = if row % 2 == 0 { 1.0 } else { -1.0 };
            if col == j { x[col] + sign * steps[j] } else { x[col] }
        });
        let grads = self.gradients(&points);
        let raw = Mat::from_fn(dim, dim, |i, j| {
            -(grads[(2 * j, i)] - grads[(2 * j + 1, i)]) / (2.0 * steps[j])
        });
        Mat::from_fn(dim, dim, |i, j| 0.5 * (raw[(i, j)] + raw[(j, i)]))
    }
}

/// Result of one subject update.
#[derive(Debug, Clone)]
pub(crate) struct SubjectApproximation {
    pub x_samples: Mat<f64>,
    pub x_map: Vec<f64>,
    pub entropy: f64,
    pub acceptance_rate: Option<f64>,
}

/// Gaussian approximation at the MAP.
#[derive(Debug, Clone)]
struct Laplace {
    map: Vec<f64>,
    /// Inverse of the lower Cholesky factor of the precision.
    whitening: Mat<f64>,
    samples: Mat<f64>,
    entropy: f64,
}

/// Run the configured solver. `base_draws` are standard-normal rows reused on
/// every call so that successive updates differ only through the objective.
pub(crate) fn approximate(
    objective: &SubjectObjective<'_>,
    solver: SubjectSolver,
    start: &[f64],
    base_draws: &Mat<f64>,
    rng: &mut StdRng,
) -> Option<SubjectApproximation> {
    let laplace = laplace(objective, start, base_draws)?;
    match solver {
        SubjectSolver::Laplace => Some(SubjectApproximation {
            x_samples: laplace.samples,
            x_map: laplace.map,
            entropy: laplace.entropy,
            acceptance_rate: None,
        }),
        SubjectSolver::Hamiltonian(tuning) => {
            let (x_samples, stats) = hamiltonian(objective, &laplace, base_draws, tuning, rng);
            let entropy = sample_gaussian_entropy(&x_samples).unwrap_or(laplace.entropy);
            Some(SubjectApproximation {
                x_samples,
                x_map: laplace.map,
                entropy,
                acceptance_rate: Some(stats.acceptance_rate()),
            })
        }
    }
}

/// Damped Newton ascent from `start`, falling back to gradient steps.
pub(crate) fn find_map(objective: &SubjectObjective<'_>, start: &[f64]) -> Option<Vec<f64>> {
    let mut x = start.to_vec();
    let mut value = objective.value(&x);
    if !value.is_finite() {
        x = vec![0.0; start.len()];
        value = objective.value(&x);
        if !value.is_finite() {
            return None;
        }
    }

    for _ in 0..MAP_MAX_ITERS {
        let gradient = objective.gradient(&x);
        if !gradient.iter().all(|g| g.is_finite()) {
            return None;
        }
        if max_abs(&gradient) < MAP_GRADIENT_TOLERANCE {
            break;
        }
        let direction = newton_direction(&objective.neg_hessian(&x), &gradient);
        let Some((next, next_value)) =
            line_search(objective, &x, value, &gradient, &direction)
                .or_else(|| line_search(objective, &x, value, &gradient, &gradient))
        else {
            break;
        };
        let improvement = next_value - value;
        x = next;
        value = next_value;
        if improvement <= MAP_RELATIVE_TOLERANCE * (1.0 + value.abs()) {
            break;
        }
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}

fn newton_direction(neg_hessian: &Mat<f64>, gradient: &[f64]) -> Vec<f64> {
    solve_symmetric(neg_hessian, gradient)
        .filter(|direction| dot(direction, gradient) > 0.0)
        .unwrap_or_else(|| gradient.to_vec())
}

fn line_search(
    objective: &SubjectObjective<'_>,
    x: &[f64],
    value: f64,
    gradient: &[f64],
    direction: &[f64],
) -> Option<(Vec<f64>, f64)> {
    let slope = dot(gradient, direction);
    let mut step: f64 = 1.0;
    for _ in 0..LINE_SEARCH_HALVINGS {
        let candidate: Vec<f64> = x
            .iter()
            .zip(direction)
            .map(|(xi, di)| step.mul_add(*di, *xi))
            .collect();
        let candidate_value = objective.value(&candidate);
        if candidate_value.is_finite()
            && candidate_value >= (ARMIJO_FRACTION * step).mul_add(slope, value)
        {
            return Some((candidate, candidate_value));
        }
        step *= 0.5;
    }
    None
}

fn laplace(
    objective: &SubjectObjective<'_>,
    start: &[f64],
    base_draws: &Mat<f64>,
) -> Option<Laplace> {
    let map = find_map(objective, start)?;
    let (lower, _) = cholesky_with_jitter(&objective.neg_hessian(&map))?;
    let whitening = invert_lower_triangular(&lower);
    let samples = add_to_rows(&(base_draws * &whitening), &map);
    let entropy = gaussian_entropy(map.len(), -half_log_det_from_cholesky(&lower));
    (matrix_is_finite(&samples) && entropy.is_finite()).then_some(Laplace {
        map,
        whitening,
        samples,
        entropy,
    })
}

/// Entropy of a `dim`-variate Gaussian given half its covariance log-determinant.
fn gaussian_entropy(dim: usize, half_log_det_cov: f64) -> f64 {
    0.5 * usize_to_f64(dim) * (1.0 + std::f64::consts::TAU.ln()) + half_log_det_cov
}

fn sample_gaussian_entropy(samples: &Mat<f64>) -> Option<f64> {
    if samples.nrows() <= samples.ncols() {
        return None;
    }
    let (lower, _) = cholesky_with_jitter(&sample_covariance(samples))?;
    let entropy = gaussian_entropy(samples.ncols(), half_log_det_from_cholesky(&lower));
    entropy.is_finite().then_some(entropy)
}

fn hamiltonian(
    objective: &SubjectObjective<'_>,
    laplace: &Laplace,
    base_draws: &Mat<f64>,
    tuning: HamiltonianTuning,
    rng: &mut StdRng,
) -> (Mat<f64>, ProposalStats) {
    // x = map + u * W, so the whitened gradient is grad_x * W^T.
    let to_x = |u: &Mat<f64>| add_to_rows(&(u * &laplace.whitening), &laplace.map);
    let whitened_gradient = |u: &Mat<f64>| {
        let gradient = objective.gradients(&to_x(u));
        &gradient * laplace.whitening.transpose()
    };

    let mut position = base_draws.clone();
    let mut log_density = objective.values(&to_x(&position));
    let mut step = tuning.initial_step_size;
    let mut total = ProposalStats::default();

    for _ in 0..tuning.n_sweeps {
        let initial_momentum = standard_normal_matrix(rng, position.nrows(), position.ncols());
        let mut proposal = position.clone();
        let half = 0.5 * step;
        let mut momentum = zip_map_mat(
            &initial_momentum,
            &whitened_gradient(&proposal),
            |p, g| half.mul_add(g, p),
        );
        for leap in 0..tuning.n_leapfrog {
            proposal = zip_map_mat(&proposal, &momentum, |u, p| step.mul_add(p, u));
            let kick = if leap + 1 == tuning.n_leapfrog { half } else { step };
            momentum = zip_map_mat(&momentum, &whitened_gradient(&proposal), |p, g| {
                kick.mul_add(g, p)
            });
        }

        let proposal_density = objective.values(&to_x(&proposal));
        let initial_kinetic = half_row_norms_sq(&initial_momentum);
        let final_kinetic = half_row_norms_sq(&momentum);
        let mut sweep = ProposalStats::default();
        for s in 0..position.nrows() {
            let log_acceptance = (proposal_density[s] - final_kinetic[s])
                - (log_density[s] - initial_kinetic[s]);
            let accepted = should_accept(log_acceptance, rng);
            sweep.record(accepted);
            if accepted {
                for d in 0..position.ncols() {
                    position[(s, d)] = proposal[(s, d)];
                }
                log_density[s] = proposal_density[s];
            }
        }
        step = adapt_step_size(step, sweep.acceptance_rate(), tuning);
        total.proposed += sweep.proposed;
        total.accepted += sweep.accepted;
    }

    (to_x(&position), total)
}

fn should_accept(log_acceptance: f64, rng: &mut StdRng) -> bool {
    log_acceptance >= 0.0 || rng.random::<f64>().ln() < log_acceptance
}

fn adapt_step_size(step: f64, acceptance: f64, tuning: HamiltonianTuning) -> f64 {
    let factor = if acceptance < tuning.acceptance_target_low {
        tuning.step_decrease_factor
    } else if acceptance > tuning.acceptance_target_high {
        tuning.step_increase_factor
    } else {
        1.0
    };
    (step * factor).max(tuning.min_step_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::paired::trials::TrialCount;
    use crate::models::paired::types::{ParameterShape, PopulationPriorConfig};
    use crate::utils::column_means;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn fixture() -> (TrialStatistics, PopulationModel) {
        let rows = vec![
            TrialCount {
                a: None,
                b: Some(0),
                category: 1,
                count: 6,
            },
            TrialCount {
                a: None,
                b: Some(0),
                category: 0,
                count: 3,
            },
            TrialCount {
                a: Some(0),
                b: None,
                category: 0,
                count: 1,
            },
        ];
        let data = TrialStatistics::from_counts(1, 2, true, rows).expect("valid rows");
        let shape = ParameterShape {
            n_objects: 2,
            n_test_conditions: 1,
            n_categories: 2,
        };
        let population =
            PopulationModel::initialize(shape, PopulationPriorConfig::default(), false)
                .expect("valid prior");
        (data, population)
    }

    #[test]
    fn map_has_vanishing_gradient() {
        let (data, population) = fixture();
        let objective = SubjectObjective {
            data: &data,
            population: &population,
            model: ChoiceModel::Thurstone,
        };
        let map = find_map(&objective, &[0.0, 0.0, 0.0]).expect("map exists");
        assert!(map[0] > 0.0);
        assert!(max_abs(&objective.gradient(&map)) < 1.0e-6);
    }

    #[test]
    fn map_search_is_independent_of_start() {
        let (data, population) = fixture();
        let objective = SubjectObjective {
            data: &data,
            population: &population,
            model: ChoiceModel::Bradley,
        };
        let a = find_map(&objective, &[0.0, 0.0, 0.0]).expect("map exists");
        let b = find_map(&objective, &[3.0, -2.0, 1.0]).expect("map exists");
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x, y, epsilon = 1.0e-5);
        }
    }

    #[test]
    fn laplace_samples_are_centred_on_map() {
        let (data, population) = fixture();
        let objective = SubjectObjective {
            data: &data,
            population: &population,
            model: ChoiceModel::Thurstone,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let base = standard_normal_matrix(&mut rng, 4_000, 3);
        let result = approximate(&objective, SubjectSolver::Laplace, &[0.0; 3], &base, &mut rng)
            .expect("laplace succeeds");
        let means = column_means(&result.x_samples);
        for (mean, map) in means.iter().zip(&result.x_map) {
            assert!((mean - map).abs() < 0.1);
        }
        assert!(result.entropy.is_finite());
        assert!(result.acceptance_rate.is_none());
    }

    #[test]
    fn laplace_is_deterministic_for_fixed_draws() {
        let (data, population) = fixture();
        let objective = SubjectObjective {
            data: &data,
            population: &population,
            model: ChoiceModel::Thurstone,
        };
        let mut rng = StdRng::seed_from_u64(2);
        let base = standard_normal_matrix(&mut rng, 50, 3);
        let first = approximate(&objective, SubjectSolver::Laplace, &[0.0; 3], &base, &mut rng)
            .expect("laplace succeeds");
        let second = approximate(&objective, SubjectSolver::Laplace, &[0.0; 3], &base, &mut rng)
            .expect("laplace succeeds");
        assert_eq!(first.x_samples, second.x_samples);
        assert_relative_eq!(
            objective.mean_value(&first.x_samples) + first.entropy,
            objective.mean_value(&second.x_samples) + second.entropy
        );
    }

    #[test]
    fn hamiltonian_keeps_ensemble_near_laplace_fit() {
        let (data, population) = fixture();
        let objective = SubjectObjective {
            data: &data,
            population: &population,
            model: ChoiceModel::Thurstone,
        };
        let mut rng = StdRng::seed_from_u64(9);
        let base = standard_normal_matrix(&mut rng, 400, 3);
        let solver = SubjectSolver::Hamiltonian(HamiltonianTuning::default());
        let result = approximate(&objective, solver, &[0.0; 3], &base, &mut rng)
            .expect("hamiltonian succeeds");
        assert!(matrix_is_finite(&result.x_samples));
        let acceptance = result.acceptance_rate.expect("acceptance is tracked");
        assert!(acceptance > 0.3);
        let means = column_means(&result.x_samples);
        for (mean, map) in means.iter().zip(&result.x_map) {
            assert!((mean - map).abs() < 0.5);
        }
        assert!(result.entropy.is_finite());
    }

    #[test]
    fn newton_direction_falls_back_to_gradient_when_not_ascending() {
        let gradient = [1.0, -2.0];
        let curvature = Mat::from_fn(2, 2, |i, j| if i == j { 2.0 } else { 0.5 });
        let direction = newton_direction(&curvature, &gradient);
        assert_relative_eq!(2.0 * direction[0] + 0.5 * direction[1], 1.0, epsilon = 1.0e-12);
        assert_relative_eq!(0.5 * direction[0] + 2.0 * direction[1], -2.0, epsilon = 1.0e-12);

        let saddle = Mat::from_fn(2, 2, |i, j| if i == j { -1.0 } else { 0.0 });
        assert_eq!(newton_direction(&saddle, &gradient), gradient.to_vec());
    }

    #[test]
    fn step_size_adapts_toward_target() {
        let tuning = HamiltonianTuning::default();
        assert!(adapt_step_size(0.3, 0.1, tuning) < 0.3);
        assert!(adapt_step_size(0.3, 0.99, tuning) > 0.3);
        assert_relative_eq!(adapt_step_size(0.3, 0.75, tuning), 0.3);
        assert_relative_eq!(adapt_step_size(1.0e-3, 0.0, tuning), 1.0e-3);
    }
}
