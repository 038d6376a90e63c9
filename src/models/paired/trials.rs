//! Aggregated trial counts for one subject and one attribute.
//!
//! Trials are canonicalised so that the response magnitude indexes a response
//! interval and the sign is absorbed by ordering the pair. Identical
//! (pair, interval, test condition) rows are merged into a count.

use std::collections::BTreeMap;

use faer::Mat;

use crate::input::{ExperimentLayout, PairedCompTrial};

use super::choice::ChoiceModel;
use super::thresholds::{cat_limits_transform, d_cat_limits_transform};
use super::types::{PairedCompError, ParameterShape};

/// One aggregated row: how often the listener put the pair `(a, b)` in `category`.
///
/// `None` indices refer to the reference object with quality fixed at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialCount {
    pub a: Option<usize>,
    pub b: Option<usize>,
    pub category: usize,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialStatistics {
    n_quality: usize,
    n_categories: usize,
    forced_choice: bool,
    rows: Vec<TrialCount>,
}

impl TrialStatistics {
    /// Build from raw rows.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` if an index is out of range or a count is zero.
    pub fn from_counts(
        n_quality: usize,
        n_categories: usize,
        forced_choice: bool,
        rows: Vec<TrialCount>,
    ) -> Result<Self, PairedCompError> {
        if n_categories == 0 {
            return Err(PairedCompError::InvalidConfig(
                "at least one response interval is required",
            ));
        }
        for row in &rows {
            for index in [row.a, row.b].into_iter().flatten() {
                if index >= n_quality {
                    return Err(PairedCompError::DimensionMismatch {
                        expected: n_quality,
                        found: index + 1,
                    });
                }
            }
            if row.category >= n_categories {
                return Err(PairedCompError::DimensionMismatch {
                    expected: n_categories,
                    found: row.category + 1,
                });
            }
            if row.count == 0 {
                return Err(PairedCompError::InvalidConfig(
                    "trial counts must be positive",
                ));
            }
        }
        Ok(Self {
            n_quality,
            n_categories,
            forced_choice,
            rows,
        })
    }

    /// Aggregate one subject's raw trials.
    ///
    /// # Errors
    ///
    /// Returns `PairedCompError` for labels, test conditions or responses that
    /// do not fit the layout, and for self-comparisons.
    pub fn from_trials(
        layout: &ExperimentLayout,
        trials: &[PairedCompTrial],
    ) -> Result<Self, PairedCompError> {
        let shape = ParameterShape::from_layout(layout);
        let n_grades = layout.n_difference_grades();
        let forced_choice = layout.forced_choice;

        let mut counts: BTreeMap<(usize, usize, usize, usize), u32> = BTreeMap::new();
        for trial in trials {
            let first = object_index(layout, &trial.first)?;
            let second = object_index(layout, &trial.second)?;
            if first == second {
                return Err(PairedCompError::SelfComparison {
                    object: trial.first.clone(),
                });
            }
            let test_condition = layout
                .test_condition_index(&trial.test_condition)
                .ok_or_else(|| PairedCompError::UnknownTestCondition {
                    condition: trial.test_condition.clone(),
                })?;

            let magnitude = usize::try_from(trial.response.unsigned_abs()).unwrap_or(usize::MAX);
            let valid = if forced_choice {
                (1..=n_grades).contains(&magnitude)
            } else {
                magnitude < n_grades
            };
            if !valid {
                return Err(PairedCompError::InvalidResponse {
                    response: trial.response,
                    n_grades,
                    forced_choice,
                });
            }
            let category = magnitude - usize::from(forced_choice);
            let (a, b) = if trial.response < 0 {
                (second, first)
            } else {
                (first, second)
            };
            *counts.entry((a, b, category, test_condition)).or_insert(0) += 1;
        }

        let rows = counts
            .into_iter()
            .map(|((a, b, category, test_condition), count)| TrialCount {
                a: shape.quality_index(test_condition, a),
                b: shape.quality_index(test_condition, b),
                category,
                count,
            })
            .collect();

        Self::from_counts(shape.n_quality(), shape.n_categories, forced_choice, rows)
    }

    #[must_use]
    pub const fn n_quality(&self) -> usize {
        self.n_quality
    }

    #[must_use]
    pub const fn n_categories(&self) -> usize {
        self.n_categories
    }

    #[must_use]
    pub const fn dim(&self) -> usize {
        self.n_quality + self.n_categories
    }

    #[must_use]
    pub const fn forced_choice(&self) -> bool {
        self.forced_choice
    }

    #[must_use]
    pub fn rows(&self) -> &[TrialCount] {
        &self.rows
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of trials represented by all rows.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.rows.iter().map(|row| u64::from(row.count)).sum()
    }

    /// Quality differences `q_b - q_a`, one row per sample and one column per trial row.
    #[must_use]
    pub fn q_diff(&self, x: &Mat<f64>) -> Mat<f64> {
        debug_assert_eq!(x.ncols(), self.dim());
        Mat::from_fn(x.nrows(), self.rows.len(), |s, r| {
            let row = &self.rows[r];
            quality(x, s, row.b) - quality(x, s, row.a)
        })
    }

    /// Lower and upper limits of each row's response interval, per sample.
    #[must_use]
    pub fn cat_limits(&self, x: &Mat<f64>) -> (Mat<f64>, Mat<f64>) {
        debug_assert_eq!(x.ncols(), self.dim());
        let mut low = Mat::<f64>::zeros(x.nrows(), self.rows.len());
        let mut high = Mat::<f64>::zeros(x.nrows(), self.rows.len());
        for s in 0..x.nrows() {
            let limits = cat_limits_transform(&self.log_widths(x, s));
            for (r, row) in self.rows.iter().enumerate() {
                let (l, h) = self.interval(&limits, row.category);
                low[(s, r)] = l;
                high[(s, r)] = h;
            }
        }
        (low, high)
    }

    /// Interval limits shifted by the quality difference.
    #[must_use]
    pub fn cdf_args(&self, x: &Mat<f64>) -> (Mat<f64>, Mat<f64>) {
        let d = self.q_diff(x);
        let (low, high) = self.cat_limits(x);
        (
            Mat::from_fn(d.nrows(), d.ncols(), |s, r| low[(s, r)] - d[(s, r)]),
            Mat::from_fn(d.nrows(), d.ncols(), |s, r| high[(s, r)] - d[(s, r)]),
        )
    }

    /// Count-weighted log-likelihood of all trials, one value per sample.
    #[must_use]
    pub fn log_likelihood(&self, x: &Mat<f64>, model: ChoiceModel) -> Vec<f64> {
        let (low, high) = self.cdf_args(x);
        let log_prob = model.log_cdf_diff_mat(&low, &high);
        (0..x.nrows())
            .map(|s| {
                self.rows
                    .iter()
                    .enumerate()
                    .map(|(r, row)| f64::from(row.count) * log_prob[(s, r)])
                    .sum()
            })
            .collect()
    }

    /// Gradient of [`Self::log_likelihood`] with respect to every parameter, per sample.
    #[must_use]
    pub fn grad_log_likelihood(&self, x: &Mat<f64>, model: ChoiceModel) -> Mat<f64> {
        debug_assert_eq!(x.ncols(), self.dim());
        let n_q = self.n_quality;
        let n_finite = self.n_categories - 1;
        let mut grad = Mat::<f64>::zeros(x.nrows(), self.dim());

        for s in 0..x.nrows() {
            let log_w = self.log_widths(x, s);
            let limits = cat_limits_transform(&log_w);
            let mut d_limits = vec![0.0; self.n_categories];

            for row in &self.rows {
                let d = quality(x, s, row.b) - quality(x, s, row.a);
                let (low, high) = self.interval(&limits, row.category);
                let (d_low, d_high) = model.d_log_cdf_diff(low - d, high - d);
                let weight = f64::from(row.count);
                let d_low = weight * d_low;
                let d_high = weight * d_high;

                let d_diff = d_low + d_high;
                if let Some(a) = row.a {
                    grad[(s, a)] += d_diff;
                }
                if let Some(b) = row.b {
                    grad[(s, b)] -= d_diff;
                }

                d_limits[row.category] += d_high;
                if row.category > 0 {
                    d_limits[row.category - 1] += d_low;
                } else if !self.forced_choice {
                    d_limits[0] -= d_low;
                }
            }

            if n_finite > 0 {
                let jacobian = d_cat_limits_transform(&log_w);
                for i in 0..self.n_categories {
                    grad[(s, n_q + i)] = (0..n_finite)
                        .map(|m| d_limits[m] * jacobian[(m, i)])
                        .sum();
                }
            }
        }
        grad
    }

    fn log_widths(&self, x: &Mat<f64>, sample: usize) -> Vec<f64> {
        (self.n_quality..self.dim())
            .map(|col| x[(sample, col)])
            .collect()
    }

    /// `(low, high)` limits of a response interval. Interval 0 starts at zero
    /// under forced choice and is symmetric around zero otherwise.
    fn interval(&self, limits: &[f64], category: usize) -> (f64, f64) {
        let high = limits[category];
        let low = if category > 0 {
            limits[category - 1]
        } else if self.forced_choice {
            0.0
        } else {
            -limits[0]
        };
        (low, high)
    }
}

fn quality(x: &Mat<f64>, sample: usize, index: Option<usize>) -> f64 {
    index.map_or(0.0, |col| x[(sample, col)])
}

fn object_index(layout: &ExperimentLayout, label: &str) -> Result<usize, PairedCompError> {
    layout
        .object_index(label)
        .ok_or_else(|| PairedCompError::UnknownObject {
            label: label.to_string(),
        })
}
