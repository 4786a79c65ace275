/// Scales `vector` to unit L2 norm. Empty and all-zero vectors are left as is.
pub fn l2_normalize_in_place(vector: &mut [f32]) {
    let sum_sq: f64 = vector.iter().map(|v| f64::from(*v) * f64::from(*v)).sum();
    if sum_sq <= 0.0 || !sum_sq.is_finite() {
        return;
    }
    let inv = (1.0 / sum_sq.sqrt()) as f32;
    for v in &mut *vector {
        *v *= inv;
    }
}

/// Component-wise mean of `vectors`, L2-normalised.
///
/// Returns `None` for an empty input or when dimensions disagree.
pub fn fuse_average_l2(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dims = first.len();
    if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
        return None;
    }
    let mut sum = vec![0.0f32; dims];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += *x;
        }
    }
    let n = vectors.len() as f32;
    for acc in &mut sum {
        *acc /= n;
    }
    l2_normalize_in_place(&mut sum);
    Some(sum)
}
