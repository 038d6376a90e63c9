//! Normal-Gamma population model over subject parameter vectors.
//!
//! Each parameter dimension `d` has an independent location `mu_d` and
//! precision `lambda_d` with
//! `lambda_d ~ Gamma(shape_d, rate_d)` and `mu_d | lambda_d ~ N(loc_d, 1 / (beta * lambda_d))`,
//! where `beta` is the learned weight shared by all dimensions.

use std::f64::consts::TAU;

use faer::Mat;
use statrs::function::gamma::{digamma, ln_gamma};

use crate::utils::{column_means, usize_to_f64};

use super::predictive::StudentMarginals;
use super::types::{PairedCompError, ParameterShape, PopulationPriorConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct PopulationModel {
    loc: Vec<f64>,
    learned_weight: f64,
    precision_shape: Vec<f64>,
    precision_rate: Vec<f64>,
    /// Leading dimensions whose location is pinned at zero.
    n_fixed_loc: usize,
}

impl PopulationModel {
    /// Model with the given location, scale and pseudo-count.
    ///
    /// The Gamma rate is chosen so that the mean precision is `1 / scale^2`.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` if lengths differ or a hyper-parameter is not positive.
    pub fn new(
        loc: Vec<f64>,
        scale: &[f64],
        learned_weight: f64,
        precision_shape: f64,
    ) -> Result<Self, PairedCompError> {
        if scale.len() != loc.len() {
            return Err(PairedCompError::DimensionMismatch {
                expected: loc.len(),
                found: scale.len(),
            });
        }
        if !(learned_weight > 0.0 && precision_shape > 0.0)
            || scale.iter().any(|s| !(*s > 0.0 && s.is_finite()))
            || loc.iter().any(|m| !m.is_finite())
        {
            return Err(PairedCompError::InvalidConfig(
                "population location must be finite and scales, weight and shape positive",
            ));
        }
        Ok(Self {
            precision_shape: vec![precision_shape; loc.len()],
            precision_rate: scale.iter().map(|s| precision_shape * s * s).collect(),
            loc,
            learned_weight,
            n_fixed_loc: 0,
        })
    }

    /// Weakly informative prior for a parameter vector of the given shape.
    ///
    /// With `null_quality` the quality locations are pinned at zero.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` if the prior configuration is invalid.
    pub fn initialize(
        shape: ParameterShape,
        prior: PopulationPriorConfig,
        null_quality: bool,
    ) -> Result<Self, PairedCompError> {
        let scale: Vec<f64> = std::iter::repeat_n(prior.quality_scale, shape.n_quality())
            .chain(std::iter::repeat_n(prior.cat_width_scale, shape.n_categories))
            .collect();
        let model = Self::new(
            vec![0.0; shape.dim()],
            &scale,
            prior.learned_weight,
            prior.precision_shape,
        )?;
        Ok(if null_quality {
            model.with_fixed_location(shape.n_quality())
        } else {
            model
        })
    }

    /// Pin the location of the first `n_fixed` dimensions at zero.
    #[must_use]
    pub fn with_fixed_location(mut self, n_fixed: usize) -> Self {
        let n_fixed = n_fixed.min(self.loc.len());
        self.loc[..n_fixed].fill(0.0);
        self.n_fixed_loc = n_fixed;
        self
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.loc.len()
    }

    #[must_use]
    pub fn loc(&self) -> &[f64] {
        &self.loc
    }

    #[must_use]
    pub const fn learned_weight(&self) -> f64 {
        self.learned_weight
    }

    #[must_use]
    pub fn precision_shape(&self) -> &[f64] {
        &self.precision_shape
    }

    #[must_use]
    pub fn precision_rate(&self) -> &[f64] {
        &self.precision_rate
    }

    #[must_use]
    pub const fn n_fixed_location(&self) -> usize {
        self.n_fixed_loc
    }

    /// `E[lambda_d]` for every dimension.
    #[must_use]
    pub fn mean_precision(&self) -> Vec<f64> {
        self.precision_shape
            .iter()
            .zip(&self.precision_rate)
            .map(|(a, b)| a / b)
            .collect()
    }

    /// `E[ln lambda_d]` for every dimension.
    #[must_use]
    pub fn mean_log_precision(&self) -> Vec<f64> {
        self.precision_shape
            .iter()
            .zip(&self.precision_rate)
            .map(|(a, b)| digamma(*a) - b.ln())
            .collect()
    }

    /// Multiply the Gamma rate of the first `n_dims` dimensions by `factor`.
    pub fn scale_precision_rate(&mut self, n_dims: usize, factor: f64) {
        for rate in self.precision_rate.iter_mut().take(n_dims) {
            *rate *= factor;
        }
    }

    /// `E[ln N(x | mu, 1 / lambda)]` over the population parameters, one value per sample row.
    #[must_use]
    pub fn mean_logpdf(&self, x: &Mat<f64>) -> Vec<f64> {
        debug_assert_eq!(x.ncols(), self.dim());
        let mean_precision = self.mean_precision();
        let constant: f64 = self
            .mean_log_precision()
            .iter()
            .enumerate()
            .map(|(d, mean_log)| {
                let loc_uncertainty = if d < self.n_fixed_loc {
                    0.0
                } else {
                    1.0 / self.learned_weight
                };
                0.5 * (mean_log - TAU.ln() - loc_uncertainty)
            })
            .sum();
        (0..x.nrows())
            .map(|s| {
                constant
                    - 0.5
                        * (0..x.ncols())
                            .map(|d| {
                                let diff = x[(s, d)] - self.loc[d];
                                mean_precision[d] * diff * diff
                            })
                            .sum::<f64>()
            })
            .collect()
    }

    /// Gradient of [`Self::mean_logpdf`] with respect to `x`.
    #[must_use]
    pub fn grad_mean_logpdf(&self, x: &Mat<f64>) -> Mat<f64> {
        let mean_precision = self.mean_precision();
        Mat::from_fn(x.nrows(), x.ncols(), |s, d| {
            -mean_precision[d] * (x[(s, d)] - self.loc[d])
        })
    }

    /// Conjugate update from the posterior samples of every subject.
    ///
    /// `samples[n]` holds subject `n`'s samples as rows. Within-subject spread
    /// and between-subject spread of the subject means both enter the rate.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` if there are no samples or dimensions differ.
    pub fn adapt(&mut self, samples: &[Mat<f64>], prior: &Self) -> Result<(), PairedCompError> {
        let dim = prior.dim();
        if samples.is_empty() || samples.iter().any(|x| x.nrows() == 0) {
            return Err(PairedCompError::EmptyPosterior);
        }
        if let Some(x) = samples.iter().find(|x| x.ncols() != dim) {
            return Err(PairedCompError::DimensionMismatch {
                expected: dim,
                found: x.ncols(),
            });
        }

        let n_subjects = usize_to_f64(samples.len());
        let subject_means: Vec<Vec<f64>> = samples.iter().map(column_means).collect();
        let within: Vec<f64> = (0..dim)
            .map(|d| {
                samples
                    .iter()
                    .zip(&subject_means)
                    .map(|(x, mean)| {
                        let n = usize_to_f64(x.nrows());
                        (0..x.nrows())
                            .map(|s| (x[(s, d)] - mean[d]).powi(2))
                            .sum::<f64>()
                            / n
                    })
                    .sum()
            })
            .collect();

        let learned_weight = prior.learned_weight + n_subjects;
        let mut loc = vec![0.0; dim];
        let mut shape = vec![0.0; dim];
        let mut rate = vec![0.0; dim];
        for d in 0..dim {
            let fixed = d < prior.n_fixed_loc;
            let sum_means: f64 = subject_means.iter().map(|mean| mean[d]).sum();
            loc[d] = if fixed {
                0.0
            } else {
                prior.learned_weight.mul_add(prior.loc[d], sum_means) / learned_weight
            };
            let between: f64 = subject_means
                .iter()
                .map(|mean| (mean[d] - loc[d]).powi(2))
                .sum();
            let prior_shift = if fixed {
                0.0
            } else {
                prior.learned_weight * (loc[d] - prior.loc[d]).powi(2)
            };
            shape[d] = 0.5f64.mul_add(n_subjects, prior.precision_shape[d]);
            rate[d] = 0.5f64.mul_add(within[d] + between + prior_shift, prior.precision_rate[d]);
        }

        self.loc = loc;
        self.learned_weight = learned_weight;
        self.precision_shape = shape;
        self.precision_rate = rate;
        self.n_fixed_loc = prior.n_fixed_loc;
        Ok(())
    }

    /// Kullback-Leibler divergence `KL(self || other)`.
    #[must_use]
    pub fn relative_entropy(&self, other: &Self) -> f64 {
        let beta_ratio = other.learned_weight / self.learned_weight;
        (0..self.dim())
            .map(|d| {
                let a = self.precision_shape[d];
                let b = self.precision_rate[d];
                let a0 = other.precision_shape[d];
                let b0 = other.precision_rate[d];
                let gamma_term = (a - a0) * digamma(a) - ln_gamma(a)
                    + ln_gamma(a0)
                    + a0 * (b.ln() - b0.ln())
                    + a * (b0 - b) / b;
                let loc_term = if d < self.n_fixed_loc {
                    0.0
                } else {
                    let shift = self.loc[d] - other.loc[d];
                    0.5 * (beta_ratio - 1.0 - beta_ratio.ln()
                        + other.learned_weight * (a / b) * shift * shift)
                };
                gamma_term + loc_term
            })
            .sum()
    }

    /// Predictive distribution of one new individual drawn from the population.
    #[must_use]
    pub fn predictive(&self) -> StudentMarginals {
        self.student_marginals(true)
    }

    /// Predictive distribution of the population mean.
    #[must_use]
    pub fn mean_predictive(&self) -> StudentMarginals {
        self.student_marginals(false)
    }

    fn student_marginals(&self, individual: bool) -> StudentMarginals {
        let beta = self.learned_weight;
        let scale = (0..self.dim())
            .map(|d| {
                let per_precision = self.precision_rate[d] / self.precision_shape[d];
                let factor = match (d < self.n_fixed_loc, individual) {
                    (true, true) => 1.0,
                    (true, false) => 0.0,
                    (false, true) => (beta + 1.0) / beta,
                    (false, false) => 1.0 / beta,
                };
                (per_precision * factor).sqrt()
            })
            .collect();
        StudentMarginals {
            loc: self.loc.clone(),
            scale,
            df: self.precision_shape.iter().map(|a| 2.0 * a).collect(),
        }
    }
}

/// Copies of `samples` with the log-width columns of every row shifted to zero mean.
///
/// Response-interval limits do not change under a common shift of the log-widths,
/// so this only fixes the free offset before pooling subjects.
#[must_use]
pub fn center_category_widths<'a>(
    samples: impl IntoIterator<Item = &'a Mat<f64>>,
    n_quality: usize,
) -> Vec<Mat<f64>> {
    samples
        .into_iter()
        .map(|x| {
            let n_categories = x.ncols().saturating_sub(n_quality);
            let mut centered = x.clone();
            if n_categories == 0 {
                return centered;
            }
            let n = usize_to_f64(n_categories);
            for s in 0..x.nrows() {
                let mean = (n_quality..x.ncols()).map(|d| x[(s, d)]).sum::<f64>() / n;
                for d in n_quality..x.ncols() {
                    centered[(s, d)] -= mean;
                }
            }
            centered
        })
        .collect()
}
