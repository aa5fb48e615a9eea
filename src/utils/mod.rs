use nalgebra::DMatrix;
use ndarray::Array2;

pub mod metrics;
pub mod validation;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

/// Sum of squares of every element.
pub fn squared_norm(values: &Array2<f32>) -> f32 {
    values.iter().map(|x| x * x).sum()
}

pub fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let mut indexed_scores: Vec<(usize, f64)> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| (i, score))
        .collect();

    indexed_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    indexed_scores
        .into_iter()
        .take(k)
        .map(|(i, _)| i)
        .collect()
}

/// Widens an autoencoder output into the f64 factor representation.
pub fn array_to_dmatrix(values: &Array2<f32>) -> DMatrix<f64> {
    let (rows, cols) = values.dim();
    DMatrix::from_fn(rows, cols, |i, j| values[[i, j]] as f64)
}

/// Gathers `ids` rows of a factor matrix into an f32 batch.
pub fn gather_rows(matrix: &DMatrix<f64>, ids: &[usize]) -> Array2<f32> {
    Array2::from_shape_fn((ids.len(), matrix.ncols()), |(r, c)| matrix[(ids[r], c)] as f32)
}

pub fn dmatrix_to_rows(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

pub fn rows_to_array(rows: &[Vec<f32>]) -> Option<Array2<f32>> {
    let cols = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.iter().any(|r| r.len() != cols) {
        return None;
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), cols), flat).ok()
}
