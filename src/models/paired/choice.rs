//! Latent decision-variable distributions for graded paired comparisons.
//!
//! A response falls in the interval `(low, high]` of the latent decision
//! variable. Both choice models give the log-probability of that interval and
//! its partial derivatives with respect to the two limits. They stay finite
//! far into the tails and for infinite limits.

use std::f64::consts::{LN_2, SQRT_2, TAU};

use faer::Mat;
use statrs::function::erf::erfc;

/// Below this argument the normal log-CDF uses its asymptotic series.
const LOG_NDTR_ASYMPTOTIC_BELOW: f64 = -20.0;

/// Distribution of the latent decision variable around the quality difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChoiceModel {
    /// Standard Gaussian (Thurstone Case V).
    #[default]
    Thurstone,
    /// Standard logistic (Bradley-Terry-Luce).
    Bradley,
}

impl ChoiceModel {
    /// `ln(F(high) - F(low))` for `low <= high`, allowing infinite limits.
    #[must_use]
    pub fn log_cdf_diff(self, low: f64, high: f64) -> f64 {
        match self {
            Self::Thurstone => gauss_log_cdf_diff(low, high),
            Self::Bradley => logistic_log_cdf_diff(low, high),
        }
    }

    /// Partial derivatives `(d/d low, d/d high)` of [`Self::log_cdf_diff`].
    ///
    /// The first is non-positive and the second non-negative; both vanish at
    /// infinite limits.
    #[must_use]
    pub fn d_log_cdf_diff(self, low: f64, high: f64) -> (f64, f64) {
        match self {
            Self::Thurstone => gauss_d_log_cdf_diff(low, high),
            Self::Bradley => logistic_d_log_cdf_diff(low, high),
        }
    }

    /// Element-wise [`Self::log_cdf_diff`] over equally shaped matrices.
    #[must_use]
    pub fn log_cdf_diff_mat(self, low: &Mat<f64>, high: &Mat<f64>) -> Mat<f64> {
        Mat::from_fn(low.nrows(), low.ncols(), |i, j| {
            self.log_cdf_diff(low[(i, j)], high[(i, j)])
        })
    }

    /// Element-wise [`Self::d_log_cdf_diff`] over equally shaped matrices.
    #[must_use]
    pub fn d_log_cdf_diff_mat(self, low: &Mat<f64>, high: &Mat<f64>) -> (Mat<f64>, Mat<f64>) {
        let mut d_low = Mat::<f64>::zeros(low.nrows(), low.ncols());
        let mut d_high = Mat::<f64>::zeros(low.nrows(), low.ncols());
        for i in 0..low.nrows() {
            for j in 0..low.ncols() {
                let (dl, dh) = self.d_log_cdf_diff(low[(i, j)], high[(i, j)]);
                d_low[(i, j)] = dl;
                d_high[(i, j)] = dh;
            }
        }
        (d_low, d_high)
    }

    /// Cumulative distribution function of the decision variable.
    #[must_use]
    pub fn cdf(self, value: f64) -> f64 {
        match self {
            Self::Thurstone => standard_normal_cdf(value),
            Self::Bradley => logistic_stable(value),
        }
    }
}

/// Stable logistic transform.
#[must_use]
pub fn logistic_stable(value: f64) -> f64 {
    if value >= 0.0 {
        let z = (-value).exp();
        1.0 / (1.0 + z)
    } else {
        let z = value.exp();
        z / (1.0 + z)
    }
}

/// `ln(logistic(value))` without overflow in either tail.
#[must_use]
pub fn log_logistic(value: f64) -> f64 {
    if value >= 0.0 {
        -(-value).exp().ln_1p()
    } else {
        value - value.exp().ln_1p()
    }
}

/// `ln(1 - exp(value))` for `value <= 0`.
#[must_use]
pub fn log1m_exp(value: f64) -> f64 {
    if value > -LN_2 {
        (-value.exp_m1()).ln()
    } else {
        (-value.exp()).ln_1p()
    }
}

/// Log-density of standard normal.
#[must_use]
pub fn log_standard_normal_pdf(value: f64) -> f64 {
    -0.5 * value.mul_add(value, TAU.ln())
}

#[must_use]
pub fn standard_normal_cdf(value: f64) -> f64 {
    if value == f64::INFINITY {
        1.0
    } else if value == f64::NEG_INFINITY {
        0.0
    } else {
        0.5 * erfc(-value / SQRT_2)
    }
}

/// Log-CDF of standard normal, accurate in both tails.
#[must_use]
pub fn log_standard_normal_cdf(value: f64) -> f64 {
    if value == f64::INFINITY {
        0.0
    } else if value == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else if value > 0.0 {
        (-0.5 * erfc(value / SQRT_2)).ln_1p()
    } else if value > LOG_NDTR_ASYMPTOTIC_BELOW {
        (0.5 * erfc(-value / SQRT_2)).ln()
    } else {
        let inv_sq = 1.0 / (value * value);
        let series = inv_sq.mul_add(
            inv_sq.mul_add(inv_sq.mul_add(105.0 * inv_sq - 15.0, 3.0), -1.0),
            1.0,
        );
        log_standard_normal_pdf(value) - (-value).ln() + series.ln()
    }
}

fn gauss_log_cdf_diff(low: f64, high: f64) -> f64 {
    if low >= high {
        return f64::NEG_INFINITY;
    }
    // Reflect so that the interval starts in the lower half.
    let (low, high) = if low > 0.0 { (-high, -low) } else { (low, high) };
    if high <= 0.0 {
        let log_high = log_standard_normal_cdf(high);
        log_high + log1m_exp(log_standard_normal_cdf(low) - log_high)
    } else {
        (-(standard_normal_cdf(low) + standard_normal_cdf(-high))).ln_1p()
    }
}

fn gauss_d_log_cdf_diff(low: f64, high: f64) -> (f64, f64) {
    let log_prob = gauss_log_cdf_diff(low, high);
    if !log_prob.is_finite() {
        return (0.0, 0.0);
    }
    let d_low = -(log_standard_normal_pdf(low) - log_prob).exp();
    let d_high = (log_standard_normal_pdf(high) - log_prob).exp();
    (d_low, d_high)
}

fn logistic_log_cdf_diff(low: f64, high: f64) -> f64 {
    if low >= high {
        return f64::NEG_INFINITY;
    }
    log_logistic(high) + log_logistic(-low) + log1m_exp(low - high)
}

fn logistic_d_log_cdf_diff(low: f64, high: f64) -> (f64, f64) {
    if low >= high {
        return (0.0, 0.0);
    }
    let inv_width_term = 1.0 / (high - low).exp_m1();
    let d_low = -logistic_stable(low) - inv_width_term;
    let d_high = logistic_stable(-high) + inv_width_term;
    (d_low, d_high)
}
