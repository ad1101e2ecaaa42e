use ndarray::{Array1, Array2, ArrayView1};

pub(crate) fn normalize_vector(vec: &Array1<f32>) -> Array1<f32> {
    let norm: f32 = vec.iter().map(|&x| x * x).sum::<f32>().sqrt();
    if norm > 1e-10 {
        vec / norm
    } else {
        Array1::zeros(vec.len())
    }
}

/// Averages token vectors whose attention mask is set.
///
/// `tokens` is `[sequence_length, hidden]`. A mask with no set entries yields a
/// zero vector.
pub(crate) fn mean_pool(tokens: &Array2<f32>, mask: ArrayView1<'_, i64>) -> Array1<f32> {
    let mut sum = Array1::<f32>::zeros(tokens.ncols());
    let mut count = 0.0f32;
    for (row, &m) in tokens.outer_iter().zip(mask.iter()) {
        if m != 0 {
            sum += &row;
            count += 1.0;
        }
    }
    if count > 0.0 {
        sum / count
    } else {
        sum
    }
}

/// Stacks equally sized vectors into a `[rows, dim]` matrix.
pub fn stack_rows(vectors: &[Array1<f32>], dim: usize) -> Array2<f32> {
    let mut matrix = Array2::<f32>::zeros((vectors.len(), dim));
    for (mut row, v) in matrix.outer_iter_mut().zip(vectors) {
        row.assign(v);
    }
    matrix
}
