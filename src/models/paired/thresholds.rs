//! Response-interval limits from log-width parameters.
//!
//! With widths `w = exp(log_w)`, total `S` and cumulative sums `C_m`, the upper
//! limit of interval `m` is `ln((S + C_m) / (S - C_m))`. The last limit is
//! `+inf`. Adding a constant to every log-width leaves the limits unchanged.

use faer::Mat;

/// Upper limits of all response intervals, strictly increasing, last one `+inf`.
#[must_use]
pub fn cat_limits_transform(log_w: &[f64]) -> Vec<f64> {
    let (widths, total, remaining) = normalized_widths(log_w);
    let mut cumulative = 0.0;
    widths
        .iter()
        .zip(&remaining)
        .map(|(width, rest)| {
            cumulative += width;
            if *rest > 0.0 {
                ((total + cumulative) / rest).ln()
            } else {
                f64::INFINITY
            }
        })
        .collect()
}

/// Jacobian of the finite limits with respect to the log-widths.
///
/// Row `m` holds `d limit_m / d log_w_i` for the `M - 1` finite limits.
#[must_use]
pub fn d_cat_limits_transform(log_w: &[f64]) -> Mat<f64> {
    let n_cat = log_w.len();
    let (widths, total, remaining) = normalized_widths(log_w);
    let mut cumulative = Vec::with_capacity(n_cat);
    let mut running = 0.0;
    for width in &widths {
        running += width;
        cumulative.push(running);
    }
    Mat::from_fn(n_cat.saturating_sub(1), n_cat, |m, i| {
        let upper = 1.0 / (total + cumulative[m]);
        let lower = 1.0 / remaining[m];
        if i <= m {
            widths[i] * (2.0 * upper)
        } else {
            widths[i] * (upper - lower)
        }
    })
}

/// Limits of every sample row of `log_w` (one row per sample).
#[must_use]
pub fn cat_limit_samples(log_w: &Mat<f64>) -> Mat<f64> {
    let mut limits = Mat::<f64>::zeros(log_w.nrows(), log_w.ncols());
    for row in 0..log_w.nrows() {
        let values: Vec<f64> = (0..log_w.ncols()).map(|col| log_w[(row, col)]).collect();
        for (col, limit) in cat_limits_transform(&values).into_iter().enumerate() {
            limits[(row, col)] = limit;
        }
    }
    limits
}

/// Widths rescaled by their maximum, their total, and the sum of widths after each index.
fn normalized_widths(log_w: &[f64]) -> (Vec<f64>, f64, Vec<f64>) {
    let max = log_w.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let widths: Vec<f64> = log_w.iter().map(|value| (value - max).exp()).collect();
    let mut remaining = vec![0.0; widths.len()];
    let mut tail = 0.0;
    for (index, width) in widths.iter().enumerate().rev() {
        remaining[index] = tail;
        tail += width;
    }
    (widths, tail, remaining)
}
