//! A module for covariance functions (kernels) of the GP prior.
//!
//! The following kernels are implemented:
//! * squared exponential (aka radial basis),
//! * spectral mixture.
//!
//! Hyperparameters are passed on the log scale, GPML style, so the
//! external optimizer can search an unconstrained space.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use std::f64::consts::PI;
use std::fmt;

/// A trait for covariance functions used in GP regression.
///
/// Implementations are selected by name through [`crate::registry`] or
/// supplied directly to the model parameters.
pub trait Kernel: fmt::Display + Send + Sync {
    /// Number of hyperparameters expected for inputs of dimension `dim`
    fn n_hyp(&self, dim: usize) -> usize;

    /// Covariance matrix `k(x, x2)` as a (nrows(x), nrows(x2)) matrix;
    /// when `x2` is omitted the full (nrows(x), nrows(x)) matrix `k(x, x)`.
    fn value(
        &self,
        hyp: &ArrayView1<f64>,
        x: &ArrayView2<f64>,
        x2: Option<&ArrayView2<f64>>,
    ) -> Array2<f64>;

    /// Diagonal of `k(x, x)` as a (nrows(x),) vector
    fn diag(&self, hyp: &ArrayView1<f64>, x: &ArrayView2<f64>) -> Array1<f64>;
}

/// Isotropic squared exponential kernel
///
/// `k(x, x') = sf^2 * exp(-|x - x'|^2 / (2*ell^2))`
/// with `hyp = [ln ell, ln sf]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SquaredExponential();

impl Kernel for SquaredExponential {
    fn n_hyp(&self, _dim: usize) -> usize {
        2
    }

    fn value(
        &self,
        hyp: &ArrayView1<f64>,
        x: &ArrayView2<f64>,
        x2: Option<&ArrayView2<f64>>,
    ) -> Array2<f64> {
        let ell2 = (2. * hyp[0]).exp();
        let sf2 = (2. * hyp[1]).exp();
        let x2 = x2.map_or(x.view(), |v| v.view());
        let mut k = Array2::zeros((x.nrows(), x2.nrows()));
        for (i, xi) in x.rows().into_iter().enumerate() {
            for (j, xj) in x2.rows().into_iter().enumerate() {
                let d2 = Zip::from(&xi)
                    .and(&xj)
                    .fold(0., |acc, a, b| acc + (a - b) * (a - b));
                k[[i, j]] = sf2 * (-0.5 * d2 / ell2).exp();
            }
        }
        k
    }

    fn diag(&self, hyp: &ArrayView1<f64>, x: &ArrayView2<f64>) -> Array1<f64> {
        let sf2 = (2. * hyp[1]).exp();
        Array1::from_elem(x.nrows(), sf2)
    }
}

impl fmt::Display for SquaredExponential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SquaredExponential")
    }
}

/// Spectral mixture kernel with `q` mixture components
///
/// ```text
///             q          d
/// k(tau) =   sum  w_p * prod exp(-2 pi^2 tau_j^2 v_pj) cos(2 pi tau_j mu_pj)
///            p=1         j=1
/// ```
/// with `hyp = [ln w (q); ln mu (q*d); ln v (q*d)]`, mixture-major layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpectralMixture {
    /// Number of mixture components
    pub q: usize,
}

impl SpectralMixture {
    /// Spectral mixture kernel constructor
    pub fn new(q: usize) -> Self {
        SpectralMixture { q }
    }
}

impl Default for SpectralMixture {
    fn default() -> Self {
        SpectralMixture { q: 1 }
    }
}

impl Kernel for SpectralMixture {
    fn n_hyp(&self, dim: usize) -> usize {
        self.q * (1 + 2 * dim)
    }

    fn value(
        &self,
        hyp: &ArrayView1<f64>,
        x: &ArrayView2<f64>,
        x2: Option<&ArrayView2<f64>>,
    ) -> Array2<f64> {
        let q = self.q;
        let dim = x.ncols();
        let w = hyp.slice(ndarray::s![..q]).mapv(f64::exp);
        let mu = hyp
            .slice(ndarray::s![q..q + q * dim])
            .to_owned()
            .into_shape((q, dim))
            .unwrap()
            .mapv(f64::exp);
        let v = hyp
            .slice(ndarray::s![q + q * dim..])
            .to_owned()
            .into_shape((q, dim))
            .unwrap()
            .mapv(f64::exp);

        let x2 = x2.map_or(x.view(), |v| v.view());
        let mut k = Array2::zeros((x.nrows(), x2.nrows()));
        let two_pi2 = 2. * PI * PI;
        for (i, xi) in x.rows().into_iter().enumerate() {
            for (j, xj) in x2.rows().into_iter().enumerate() {
                let mut acc = 0.;
                for p in 0..q {
                    let mut term = w[p];
                    for d in 0..dim {
                        let tau = xi[d] - xj[d];
                        term *= (-two_pi2 * tau * tau * v[[p, d]]).exp()
                            * (2. * PI * tau * mu[[p, d]]).cos();
                    }
                    acc += term;
                }
                k[[i, j]] = acc;
            }
        }
        k
    }

    fn diag(&self, hyp: &ArrayView1<f64>, x: &ArrayView2<f64>) -> Array1<f64> {
        // tau = 0 makes every exp/cos factor one
        let w_sum = hyp.slice(ndarray::s![..self.q]).mapv(f64::exp).sum();
        Array1::from_elem(x.nrows(), w_sum)
    }
}

impl fmt::Display for SpectralMixture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SpectralMixture(q={})", self.q)
    }
}
