//! Summaries of quality samples for reporting.

use faer::Mat;
use statrs::statistics::{Data, OrderStatistics, Statistics};

use crate::utils::usize_to_f64;

use super::types::PairedCompError;

/// Posterior summary of one quality parameter or response-interval limit.
///
/// `std_dev` uses the unbiased variance; quantiles follow the
/// median-unbiased estimator of [`OrderStatistics::quantile`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParameterSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub q025: f64,
    pub q50: f64,
    pub q975: f64,
}

impl ParameterSummary {
    /// Summarise the draws of a single parameter, `None` without draws.
    #[must_use]
    pub fn from_draws(draws: Vec<f64>) -> Option<Self> {
        if draws.is_empty() {
            return None;
        }
        // A point mass, e.g. the reference object, has no spread.
        let std_dev = if draws.len() > 1 {
            draws.iter().std_dev()
        } else {
            0.0
        };
        let mean = draws.iter().mean();
        let mut ordered = Data::new(draws);
        Some(Self {
            mean,
            std_dev,
            q025: ordered.quantile(0.025),
            q50: ordered.median(),
            q975: ordered.quantile(0.975),
        })
    }

    /// Width of the central 95% credible interval.
    #[must_use]
    pub fn interval_width(&self) -> f64 {
        self.q975 - self.q025
    }
}

/// Per test condition and object summaries of quality draws.
#[derive(Debug, Clone, PartialEq)]
pub struct QualitySummary {
    /// `summaries[test_condition][object]`; the reference object summarises to zero.
    pub summaries: Vec<Vec<ParameterSummary>>,
    pub draw_count: usize,
}

/// Summarise quality draws shaped test condition by object.
///
/// # Errors
///
/// Returns `EmptyPosterior` without draws, `DimensionMismatch` if the draws
/// disagree in shape.
pub fn summarize_quality(samples: &[Mat<f64>]) -> Result<QualitySummary, PairedCompError> {
    let (n_tc, n_obj) = sample_shape(samples)?;
    let summaries = (0..n_tc)
        .map(|tc| {
            (0..n_obj)
                .map(|object| {
                    let draws = samples.iter().map(|draw| draw[(tc, object)]).collect();
                    ParameterSummary::from_draws(draws).ok_or(PairedCompError::EmptyPosterior)
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(QualitySummary {
        summaries,
        draw_count: samples.len(),
    })
}

/// Summarise the finite response-interval limits, one draw per row.
///
/// The last column holds the unbounded limit of the strongest response
/// grade and is skipped.
///
/// # Errors
///
/// Returns `EmptyPosterior` without draws.
pub fn summarize_cat_limits(limits: &Mat<f64>) -> Result<Vec<ParameterSummary>, PairedCompError> {
    if limits.nrows() == 0 {
        return Err(PairedCompError::EmptyPosterior);
    }
    (0..limits.ncols().saturating_sub(1))
        .map(|grade| {
            let draws = (0..limits.nrows()).map(|s| limits[(s, grade)]).collect();
            ParameterSummary::from_draws(draws).ok_or(PairedCompError::EmptyPosterior)
        })
        .collect()
}

/// Fraction of draws in which `object` has positive quality in `test_condition`.
///
/// # Errors
///
/// Returns `EmptyPosterior` without draws, `DimensionMismatch` for bad shapes
/// or indices.
pub fn probability_positive(
    samples: &[Mat<f64>],
    test_condition: usize,
    object: usize,
) -> Result<f64, PairedCompError> {
    probability_greater(samples, test_condition, object, None)
}

/// Fraction of draws in which `object` beats `other` in `test_condition`.
///
/// # Errors
///
/// Same as [`probability_positive`].
pub fn probability_better(
    samples: &[Mat<f64>],
    test_condition: usize,
    object: usize,
    other: usize,
) -> Result<f64, PairedCompError> {
    probability_greater(samples, test_condition, object, Some(other))
}

fn probability_greater(
    samples: &[Mat<f64>],
    test_condition: usize,
    object: usize,
    other: Option<usize>,
) -> Result<f64, PairedCompError> {
    let (n_tc, n_obj) = sample_shape(samples)?;
    if test_condition >= n_tc {
        return Err(PairedCompError::DimensionMismatch {
            expected: n_tc,
            found: test_condition,
        });
    }
    let largest = object.max(other.unwrap_or(0));
    if largest >= n_obj {
        return Err(PairedCompError::DimensionMismatch {
            expected: n_obj,
            found: largest,
        });
    }
    let wins = samples
        .iter()
        .filter(|draw| {
            let baseline = other.map_or(0.0, |o| draw[(test_condition, o)]);
            draw[(test_condition, object)] > baseline
        })
        .count();
    Ok(usize_to_f64(wins) / usize_to_f64(samples.len()))
}

fn sample_shape(samples: &[Mat<f64>]) -> Result<(usize, usize), PairedCompError> {
    let first = samples.first().ok_or(PairedCompError::EmptyPosterior)?;
    let shape = (first.nrows(), first.ncols());
    if let Some(bad) = samples
        .iter()
        .find(|draw| (draw.nrows(), draw.ncols()) != shape)
    {
        return Err(PairedCompError::DimensionMismatch {
            expected: shape.0 * shape.1,
            found: bad.nrows() * bad.ncols(),
        });
    }
    Ok(shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn draws() -> Vec<Mat<f64>> {
        [-1.0, 0.5, 1.0, 2.0]
            .iter()
            .map(|&q| Mat::from_fn(1, 3, |_, j| match j {
                0 => 0.0,
                1 => q,
                _ => 2.0 * q,
            }))
            .collect()
    }

    #[test]
    fn quality_summary_covers_every_object() {
        let summary = summarize_quality(&draws()).expect("non-empty draws");
        assert_eq!(summary.draw_count, 4);
        assert_eq!(summary.summaries.len(), 1);
        assert_eq!(summary.summaries[0].len(), 3);
        assert_eq!(summary.summaries[0][0], ParameterSummary::default());
        assert_relative_eq!(summary.summaries[0][1].mean, 0.625);
        assert_relative_eq!(summary.summaries[0][2].mean, 1.25);
        assert_relative_eq!(summary.summaries[0][1].q50, 0.75);
        let cells = &summary.summaries[0];
        assert!(cells[2].interval_width() > cells[1].interval_width());
    }

    #[test]
    fn probabilities_count_draws() {
        let samples = draws();
        assert_relative_eq!(
            probability_positive(&samples, 0, 1).expect("valid index"),
            0.75
        );
        assert_relative_eq!(
            probability_better(&samples, 0, 2, 1).expect("valid index"),
            0.75
        );
        assert!(probability_positive(&samples, 0, 3).is_err());
        assert!(probability_positive(&samples, 1, 1).is_err());
    }

    #[test]
    fn empty_draws_are_rejected() {
        assert_eq!(
            summarize_quality(&[]).expect_err("no draws"),
            PairedCompError::EmptyPosterior
        );
    }

    #[test]
    fn cat_limit_summary_skips_unbounded_limit() {
        let limits = Mat::from_fn(4, 3, |s, grade| match grade {
            2 => f64::INFINITY,
            _ => usize_to_f64(s + grade),
        });
        let summary = summarize_cat_limits(&limits).expect("draws exist");
        assert_eq!(summary.len(), 2);
        assert_relative_eq!(summary[0].mean, 1.5);
        assert_relative_eq!(summary[1].q50, 2.5);
        assert!(summary.iter().all(|s| s.interval_width().is_finite()));
        assert!(summarize_cat_limits(&Mat::zeros(0, 3)).is_err());
    }

    #[test]
    fn single_draw_has_no_spread() {
        let summary = ParameterSummary::from_draws(vec![0.4]).expect("one draw");
        assert_relative_eq!(summary.std_dev, 0.0);
        assert_relative_eq!(summary.q50, 0.4);
        assert!(ParameterSummary::from_draws(Vec::new()).is_none());
    }
}
