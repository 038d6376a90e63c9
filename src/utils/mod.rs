/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Shared linear algebra and random-variate utilities for the paired-comparison models.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities
//!
//! Small dense-matrix helpers on top of faer (Cholesky with diagonal jitter,
//! symmetric solves, triangular inverse) and seeded standard-normal matrices.

use faer::linalg::triangular_solve::solve_lower_triangular_in_place;
use faer::prelude::Solve;
use faer::{Mat, Par, Side};
use num_traits::ToPrimitive;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

const MAX_JITTER_ATTEMPTS: usize = 12;

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    value.to_f64().unwrap_or(f64::MAX)
}

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

#[must_use]
pub fn max_abs(values: &[f64]) -> f64 {
    values.iter().map(|value| value.abs()).fold(0.0, f64::max)
}

#[must_use]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Column means of a sample matrix (rows are samples).
#[must_use]
pub fn column_means(matrix: &Mat<f64>) -> Vec<f64> {
    let n = usize_to_f64(matrix.nrows()).max(1.0);
    (0..matrix.ncols())
        .map(|col| (0..matrix.nrows()).map(|row| matrix[(row, col)]).sum::<f64>() / n)
        .collect()
}

/// Sample covariance (divisor `n`) of the rows of `matrix`.
#[must_use]
pub fn sample_covariance(matrix: &Mat<f64>) -> Mat<f64> {
    let mean = column_means(matrix);
    let n = usize_to_f64(matrix.nrows()).max(1.0);
    Mat::from_fn(matrix.ncols(), matrix.ncols(), |i, j| {
        (0..matrix.nrows())
            .map(|row| (matrix[(row, i)] - mean[i]) * (matrix[(row, j)] - mean[j]))
            .sum::<f64>()
            / n
    })
}

/// Lower Cholesky factor of a symmetric positive definite matrix.
#[must_use]
pub fn cholesky_lower(matrix: &Mat<f64>) -> Option<Mat<f64>> {
    if matrix.nrows() != matrix.ncols() || !matrix_is_finite(matrix) {
        return None;
    }
    let llt = matrix.llt(Side::Lower).ok()?;
    let factor = llt.L();
    let lower = Mat::from_fn(factor.nrows(), factor.ncols(), |i, j| {
        if j <= i { factor[(i, j)] } else { 0.0 }
    });
    matrix_is_finite(&lower).then_some(lower)
}

/// Cholesky factor of `matrix + jitter * I`, growing the jitter until the
/// factorisation succeeds. Returns the factor and the jitter that was used.
#[must_use]
pub fn cholesky_with_jitter(matrix: &Mat<f64>) -> Option<(Mat<f64>, f64)> {
    if let Some(lower) = cholesky_lower(matrix) {
        return Some((lower, 0.0));
    }
    let dim = matrix.ncols();
    let scale = (0..dim)
        .map(|i| matrix[(i, i)].abs())
        .fold(0.0, f64::max)
        .max(1.0);
    let mut jitter = 1.0e-10 * scale;
    for _ in 0..MAX_JITTER_ATTEMPTS {
        let regularized = Mat::from_fn(dim, dim, |row, col| {
            if row == col {
                matrix[(row, col)] + jitter
            } else {
                matrix[(row, col)]
            }
        });
        if let Some(lower) = cholesky_lower(&regularized) {
            return Some((lower, jitter));
        }
        jitter *= 10.0;
    }
    None
}

/// Solve `matrix * x = rhs` for a symmetric `matrix`, by Cholesky when it is
/// positive definite and by full-pivoting LU otherwise.
#[must_use]
pub fn solve_symmetric(matrix: &Mat<f64>, rhs: &[f64]) -> Option<Vec<f64>> {
    let rhs = Mat::from_fn(rhs.len(), 1, |i, _| rhs[i]);
    let solution = match matrix.llt(Side::Lower) {
        Ok(llt) => llt.solve(rhs),
        Err(_) => matrix.full_piv_lu().solve(rhs),
    };
    matrix_is_finite(&solution).then(|| (0..solution.nrows()).map(|i| solution[(i, 0)]).collect())
}

/// Inverse of a lower-triangular matrix with non-zero diagonal.
#[must_use]
pub fn invert_lower_triangular(lower: &Mat<f64>) -> Mat<f64> {
    let dim = lower.ncols();
    let mut inverse = Mat::<f64>::identity(dim, dim);
    solve_lower_triangular_in_place(lower.as_ref(), inverse.as_mut(), Par::Seq);
    inverse
}

/// `sum(ln(diag(L)))`, i.e. half the log-determinant of `L L^T`.
#[must_use]
pub fn half_log_det_from_cholesky(lower: &Mat<f64>) -> f64 {
    (0..lower.ncols()).map(|i| lower[(i, i)].ln()).sum()
}

/// Matrix of independent standard-normal draws.
pub fn standard_normal_matrix(rng: &mut StdRng, nrows: usize, ncols: usize) -> Mat<f64> {
    Mat::from_fn(nrows, ncols, |_, _| StandardNormal.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn spd_matrix() -> Mat<f64> {
        Mat::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) => 4.0,
            (1, 1) => 3.0,
            (2, 2) => 2.0,
            (0, 1) | (1, 0) => 1.0,
            (1, 2) | (2, 1) => 0.5,
            _ => 0.0,
        })
    }

    #[test]
    fn cholesky_reconstructs_matrix() {
        let matrix = spd_matrix();
        let lower = cholesky_lower(&matrix).expect("matrix is positive definite");
        let product = &lower * lower.transpose();
        assert_relative_eq!(lower[(0, 2)], 0.0);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(product[(i, j)], matrix[(i, j)], epsilon = 1.0e-12);
            }
        }
    }

    #[test]
    fn symmetric_solve_handles_definite_and_indefinite_matrices() {
        let rhs = [1.0, -2.0, 0.5];
        let indefinite = Mat::from_fn(3, 3, |i, j| {
            if i == j {
                [2.0, -1.0, 3.0][i]
            } else if i + j == 1 {
                0.5
            } else {
                0.0
            }
        });
        for matrix in [spd_matrix(), indefinite] {
            let solution = solve_symmetric(&matrix, &rhs).expect("matrix is invertible");
            for (i, expected) in rhs.iter().enumerate() {
                let row = (0..3).map(|j| matrix[(i, j)] * solution[j]).sum::<f64>();
                assert_relative_eq!(row, *expected, epsilon = 1.0e-10);
            }
        }
    }

    #[test]
    fn lower_inverse_is_inverse() {
        let lower = cholesky_lower(&spd_matrix()).expect("matrix is positive definite");
        let inverse = invert_lower_triangular(&lower);
        let product = &lower * &inverse;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(product[(i, j)], expected, epsilon = 1.0e-12);
            }
        }
    }

    #[test]
    fn jitter_rescues_semidefinite_matrix() {
        let singular = Mat::from_fn(2, 2, |_, _| 1.0);
        assert!(cholesky_lower(&singular).is_none());
        let (_, jitter) = cholesky_with_jitter(&singular).expect("jitter should help");
        assert!(jitter > 0.0);
    }

    #[test]
    fn standard_normal_matrix_is_centred() {
        let mut rng = StdRng::seed_from_u64(7);
        let draws = standard_normal_matrix(&mut rng, 20_000, 2);
        for mean in column_means(&draws) {
            assert!(mean.abs() < 0.05);
        }
        let cov = sample_covariance(&draws);
        assert!((cov[(0, 0)] - 1.0).abs() < 0.05);
    }

    #[test]
    fn covariance_of_constant_rows_is_zero() {
        let matrix = Mat::from_fn(4, 2, |_, j| usize_to_f64(j));
        let cov = sample_covariance(&matrix);
        assert_relative_eq!(cov[(0, 0)], 0.0);
        assert_relative_eq!(cov[(1, 1)], 0.0);
    }
}
