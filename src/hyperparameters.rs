//! Data-driven starting points for hyperparameter optimization.
//!
//! These heuristics only seed the optimizer; random restarts drawn
//! around them are the caller's business (see `optimization`).

use crate::kernels::{Kernel, SpectralMixture};
use ndarray::{Array1, ArrayView2, Axis};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::{Distribution, Uniform};
use ndarray_stats::QuantileExt;

/// Per-dimension extent of the inputs, floored to stay usable on
/// degenerate (constant) dimensions
fn ranges(x: &ArrayView2<f64>) -> Array1<f64> {
    Array1::from_iter(x.columns().into_iter().map(|col| {
        let lo = *col.min().unwrap_or(&0.);
        let hi = *col.max().unwrap_or(&0.);
        (hi - lo).max(1e-8)
    }))
}

/// Pooled standard deviation of the targets, floored away from zero
fn target_std(y: &ArrayView2<f64>) -> f64 {
    let n = (y.len() as f64).max(2.);
    let mean = y.mean().unwrap_or(0.);
    let var = y.fold(0., |acc, v| acc + (v - mean) * (v - mean)) / (n - 1.);
    var.sqrt().max(1e-8)
}

/// Smallest gap between adjacent sorted values of one input dimension,
/// the resolution limit of that dimension
fn min_spacing(col: &[f64], range: f64) -> f64 {
    let mut sorted = col.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|gap| *gap > 0.)
        .fold(f64::INFINITY, f64::min)
        .min(range)
        .max(1e-8 * range)
}

/// Starting hyperparameters for the [`crate::kernels::SquaredExponential`] kernel:
/// length scale at half the average input extent, signal deviation at
/// the target standard deviation.
pub fn init_se(x: &ArrayView2<f64>, y: &ArrayView2<f64>) -> Array1<f64> {
    let ell = ranges(x).mean().unwrap_or(1.) / 2.;
    let sf = target_std(y);
    Array1::from(vec![ell.ln(), sf.ln()])
}

/// Starting hyperparameters for a [`SpectralMixture`] kernel with `q`
/// components.
///
/// Weights share the target variance evenly; component frequencies are
/// drawn uniformly below the per-dimension Nyquist limit and inverse
/// length scales uniformly up to the reciprocal input extent, so every
/// restart explores a different region of the spectrum.
pub fn init_sm(
    q: usize,
    x: &ArrayView2<f64>,
    y: &ArrayView2<f64>,
    rng: &mut impl Rng,
) -> Array1<f64> {
    let dim = x.ncols();
    let kernel = SpectralMixture::new(q);
    let mut hyp = Array1::zeros(kernel.n_hyp(dim));

    let w = target_std(y) / q as f64;
    for i in 0..q {
        hyp[i] = w.ln();
    }

    let ranges = ranges(x);
    let unit = Uniform::new(0f64, 1f64);
    for d in 0..dim {
        let col = x.index_axis(Axis(1), d);
        let col = col.to_vec();
        let nyquist = 0.5 / min_spacing(&col, ranges[d]);
        for i in 0..q {
            // frequencies below Nyquist, floored away from ln(0)
            let mu = (nyquist * unit.sample(rng)).max(1e-8);
            hyp[q + i * dim + d] = mu.ln();
            // bandwidth of the order of the reciprocal extent
            let v = (unit.sample(rng).max(1e-3) / ranges[d]).powi(2);
            hyp[q + q * dim + i * dim + d] = v.ln();
        }
    }
    hyp
}
