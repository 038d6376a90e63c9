//! Predictive distributions derived from a learned population model.

use faer::Mat;
use rand::SeedableRng;
use rand::rngs::StdRng;

use rand_distr::{Distribution, StandardNormal, StudentT};

use super::posterior::{
    ParameterSummary, QualitySummary, summarize_cat_limits, summarize_quality,
};
use super::thresholds::cat_limit_samples;
use super::types::{PairedCompError, ParameterShape};

/// Independent Student-t marginals, one per parameter dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentMarginals {
    pub loc: Vec<f64>,
    pub scale: Vec<f64>,
    pub df: Vec<f64>,
}

impl StudentMarginals {
    #[must_use]
    pub fn dim(&self) -> usize {
        self.loc.len()
    }

    /// Marginal variances; infinite where `df <= 2`.
    #[must_use]
    pub fn variance(&self) -> Vec<f64> {
        self.scale
            .iter()
            .zip(&self.df)
            .map(|(scale, df)| {
                if *df > 2.0 {
                    scale * scale * df / (df - 2.0)
                } else {
                    f64::INFINITY
                }
            })
            .collect()
    }

    /// `n` independent draws, one per row.
    ///
    /// A dimension whose `df` is not a valid Student-t parameter is drawn from
    /// the Gaussian limit.
    pub fn sample(&self, n: usize, rng: &mut StdRng) -> Mat<f64> {
        let students: Vec<Option<StudentT<f64>>> =
            self.df.iter().map(|df| StudentT::new(*df).ok()).collect();
        let mut draws = Mat::<f64>::zeros(n, self.dim());
        for s in 0..n {
            for (d, student) in students.iter().enumerate() {
                let standard: f64 = match student {
                    Some(student) => student.sample(rng),
                    None => StandardNormal.sample(rng),
                };
                draws[(s, d)] = self.scale[d].mul_add(standard, self.loc[d]);
            }
        }
        draws
    }
}

/// Predictive model for a new individual or for the population mean.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationPredictiveModel {
    marginals: StudentMarginals,
    shape: ParameterShape,
    n_samples: usize,
    seed: u64,
}

impl PopulationPredictiveModel {
    #[must_use]
    pub const fn new(
        marginals: StudentMarginals,
        shape: ParameterShape,
        n_samples: usize,
        seed: u64,
    ) -> Self {
        Self {
            marginals,
            shape,
            n_samples,
            seed,
        }
    }

    #[must_use]
    pub const fn marginals(&self) -> &StudentMarginals {
        &self.marginals
    }

    #[must_use]
    pub const fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Raw parameter draws, one per row.
    pub fn sample(&self, n: usize, rng: &mut StdRng) -> Mat<f64> {
        self.marginals.sample(n, rng)
    }

    /// Quality draws as test-condition by object matrices with a zero reference column.
    ///
    /// Repeated calls return the same draws.
    #[must_use]
    pub fn quality_samples(&self) -> Vec<Mat<f64>> {
        let draws = self.seeded_draws();
        (0..draws.nrows())
            .map(|s| {
                let row: Vec<f64> = (0..draws.ncols()).map(|d| draws[(s, d)]).collect();
                self.shape.quality_matrix(&row)
            })
            .collect()
    }

    /// Response-interval upper limits, one row per draw.
    #[must_use]
    pub fn cat_limit_samples(&self) -> Mat<f64> {
        let draws = self.seeded_draws();
        let n_q = self.shape.n_quality();
        let log_w = Mat::from_fn(draws.nrows(), self.shape.n_categories, |s, c| {
            draws[(s, n_q + c)]
        });
        cat_limit_samples(&log_w)
    }

    /// Per test condition and object summary of [`Self::quality_samples`].
    ///
    /// # Errors
    ///
    /// Returns `EmptyPosterior` if the model draws no samples.
    pub fn quality_summary(&self) -> Result<QualitySummary, PairedCompError> {
        summarize_quality(&self.quality_samples())
    }

    /// Summary of every finite response-interval limit.
    ///
    /// # Errors
    ///
    /// Returns `EmptyPosterior` if the model draws no samples.
    pub fn cat_limit_summary(&self) -> Result<Vec<ParameterSummary>, PairedCompError> {
        summarize_cat_limits(&self.cat_limit_samples())
    }

    /// Location of the predictive distribution as a quality matrix.
    #[must_use]
    pub fn quality_location(&self) -> Mat<f64> {
        self.shape.quality_matrix(&self.marginals.loc)
    }

    fn seeded_draws(&self) -> Mat<f64> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.marginals.sample(self.n_samples, &mut rng)
    }
}
