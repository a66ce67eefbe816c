use ndarray::{Array2, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;

/// Draws a `rows x cols` weight matrix from `N(0, 1 / sqrt(cols))`.
///
/// Scaling by the fan-in keeps sigmoid cells with wide inputs away from
/// saturation at the start of training.
pub fn random<R>(rng: &mut R, rows: usize, cols: usize) -> Array2<f64>
where
    R: Rng + ?Sized,
{
    let std_dev = 1.0 / (cols.max(1) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| {
        let z: f64 = rng.sample(StandardNormal);
        z * std_dev
    })
}

/// Accumulates the outer product `a ⊗ b` into `acc`.
pub fn add_outer(acc: &mut Array2<f64>, a: ArrayView1<f64>, b: ArrayView1<f64>) {
    debug_assert_eq!(acc.dim(), (a.len(), b.len()));
    for (mut row, &ai) in acc.outer_iter_mut().zip(a.iter()) {
        row.scaled_add(ai, &b);
    }
}
