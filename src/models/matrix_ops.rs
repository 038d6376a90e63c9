use faer::Mat;

#[must_use]
pub fn row_to_vec(matrix: &Mat<f64>, row: usize) -> Vec<f64> {
    (0..matrix.ncols()).map(|j| matrix[(row, j)]).collect()
}

#[must_use]
pub fn row_matrix(values: &[f64]) -> Mat<f64> {
    Mat::from_fn(1, values.len(), |_, j| values[j])
}

/// Add `offset` to every row of `matrix`.
#[must_use]
pub fn add_to_rows(matrix: &Mat<f64>, offset: &[f64]) -> Mat<f64> {
    Mat::from_fn(matrix.nrows(), matrix.ncols(), |i, j| matrix[(i, j)] + offset[j])
}

#[must_use]
pub fn zip_map_mat(a: &Mat<f64>, b: &Mat<f64>, f: impl Fn(f64, f64) -> f64) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| f(a[(i, j)], b[(i, j)]))
}

/// Half the squared Euclidean norm of every row.
#[must_use]
pub fn half_row_norms_sq(matrix: &Mat<f64>) -> Vec<f64> {
    (0..matrix.nrows())
        .map(|i| 0.5 * (0..matrix.ncols()).map(|j| matrix[(i, j)].powi(2)).sum::<f64>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn row_helpers_round_values() {
        let matrix = row_matrix(&[1.0, -2.0, 3.0]);
        assert_eq!(row_to_vec(&matrix, 0), vec![1.0, -2.0, 3.0]);
        let shifted = add_to_rows(&matrix, &[1.0, 1.0, -3.0]);
        assert_eq!(row_to_vec(&shifted, 0), vec![2.0, -1.0, 0.0]);
        assert_relative_eq!(half_row_norms_sq(&matrix)[0], 7.0);
    }

    #[test]
    fn zip_map_keeps_shape() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 2.0 });
        let b = Mat::from_fn(2, 2, |i, j| 2.0 * a[(i, j)]);
        let c = zip_map_mat(&a, &b, |x, y| y - x);
        assert_eq!(c, a);
    }
}
