//! A module for inference methods turning training data into a marginal
//! likelihood (training mode) or posterior coefficients (prediction mode).
//!
//! Exact inference is the only built-in: it requires a Gaussian
//! likelihood and costs O(n^3) in the number of training points.

use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::means::Mean;

use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::f64::consts::PI;
use std::fmt;

/// Posterior coefficients summarizing the fit to the training data,
/// sufficient to compute predictions without revisiting the raw targets.
#[derive(Debug, Clone)]
pub struct Posterior {
    /// Per-training-point coefficients, one column per target column
    pub alpha: Array2<f64>,
    /// Lower-triangular Cholesky factor of the regularized training
    /// covariance, or a full fallback matrix; `None` when the inference
    /// method leaves reconstruction to the caller
    pub factor: Option<Array2<f64>>,
    /// Per-training-point square-root precision weights, when the
    /// factorization path produces them
    pub sqrt_precision: Option<Array1<f64>>,
}

/// A trait for inference methods used in GP regression.
///
/// The two modes of the original formulation (a scalar loss for the
/// optimizer, posterior coefficients for prediction) are two typed
/// methods sharing the same inputs.
pub trait InferenceMethod: fmt::Display + Send + Sync {
    /// Negative log marginal likelihood of the targets under the model,
    /// the training objective (lower is better)
    fn negative_log_likelihood(
        &self,
        kernel: &dyn Kernel,
        mean: &dyn Mean,
        hyp: &ArrayView1<f64>,
        x: &ArrayView2<f64>,
        y: &ArrayView2<f64>,
        log_noise: f64,
    ) -> Result<f64>;

    /// Posterior coefficients `(alpha, factor, sqrt_precision)` for the
    /// batched predictive-distribution computation
    fn posterior(
        &self,
        kernel: &dyn Kernel,
        mean: &dyn Mean,
        hyp: &ArrayView1<f64>,
        x: &ArrayView2<f64>,
        y: &ArrayView2<f64>,
        log_noise: f64,
    ) -> Result<Posterior>;
}

/// Exact Gaussian process inference.
///
/// With `sn2 = exp(2*log_noise)`, `K = kernel(hyp, X)` and `m = mean(X)`:
///
/// ```text
/// L     = cholesky(K/sn2 + I)            (lower)
/// alpha = L^T \ (L \ (Y - m)) / sn2      (column-wise)
/// sW    = 1/sn
/// nlZ   = sum over columns of
///         (y - m)' alpha / 2 + sum(ln diag L) + n ln(2 pi sn2) / 2
/// ```
///
/// Multiple target columns are treated as independent realizations and
/// their losses summed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ExactInference();

impl ExactInference {
    /// Factorize the regularized training covariance and solve for alpha.
    /// Returns `(l, alpha, resid)` with `resid = Y - m`.
    fn factorize(
        &self,
        kernel: &dyn Kernel,
        mean: &dyn Mean,
        hyp: &ArrayView1<f64>,
        x: &ArrayView2<f64>,
        y: &ArrayView2<f64>,
        log_noise: f64,
    ) -> Result<(Array2<f64>, Array2<f64>, Array2<f64>)> {
        let n = x.nrows();
        let sn2 = (2. * log_noise).exp();
        let k = kernel.value(hyp, x, None);
        let m = mean.value(x).insert_axis(Axis(1));
        let resid = y - &m;

        let b = k.mapv(|v| v / sn2) + Array2::<f64>::eye(n);
        let l = b.cholesky().map_err(|e| {
            GpError::NumericalInstability(format!("covariance factorization failed: {e}"))
        })?;
        let tmp = l.solve_triangular(&resid, UPLO::Lower)?;
        let alpha = l
            .t()
            .solve_triangular_into(tmp, UPLO::Upper)?
            .mapv(|v| v / sn2);
        Ok((l, alpha, resid))
    }
}

impl InferenceMethod for ExactInference {
    fn negative_log_likelihood(
        &self,
        kernel: &dyn Kernel,
        mean: &dyn Mean,
        hyp: &ArrayView1<f64>,
        x: &ArrayView2<f64>,
        y: &ArrayView2<f64>,
        log_noise: f64,
    ) -> Result<f64> {
        let n = x.nrows() as f64;
        let sn2 = (2. * log_noise).exp();
        let (l, alpha, resid) = self.factorize(kernel, mean, hyp, x, y, log_noise)?;
        let half_logdet: f64 = l.diag().mapv(f64::ln).sum();
        let mut nlz = 0.;
        for j in 0..resid.ncols() {
            nlz += 0.5 * resid.column(j).dot(&alpha.column(j))
                + half_logdet
                + 0.5 * n * (2. * PI * sn2).ln();
        }
        log::debug!("nlZ = {nlz} at hyp = {hyp}");
        Ok(nlz)
    }

    fn posterior(
        &self,
        kernel: &dyn Kernel,
        mean: &dyn Mean,
        hyp: &ArrayView1<f64>,
        x: &ArrayView2<f64>,
        y: &ArrayView2<f64>,
        log_noise: f64,
    ) -> Result<Posterior> {
        let (l, alpha, _) = self.factorize(kernel, mean, hyp, x, y, log_noise)?;
        let sw = Array1::from_elem(x.nrows(), (-log_noise).exp());
        Ok(Posterior {
            alpha,
            factor: Some(l),
            sqrt_precision: Some(sw),
        })
    }
}

impl fmt::Display for ExactInference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExactInference")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::SquaredExponential;
    use crate::means::ZeroMean;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_single_point_closed_form() {
        // With one training point the marginal is N(0, sf^2 + sn2)
        let x = array![[0.]];
        let y = array![[1.3]];
        let hyp = array![0., (2.0f64).ln()]; // sf^2 = 4
        let log_noise = (0.1f64).ln(); // sn2 = 0.01
        let nlz = ExactInference()
            .negative_log_likelihood(
                &SquaredExponential(),
                &ZeroMean(),
                &hyp.view(),
                &x.view(),
                &y.view(),
                log_noise,
            )
            .unwrap();
        let var = 4.0 + 0.01;
        let expected = 0.5 * (1.3f64 * 1.3 / var + (2. * PI * var).ln());
        assert_abs_diff_eq!(nlz, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_column_sum() {
        // Two identical target columns double the loss
        let x = array![[0.], [1.], [2.5]];
        let y1 = array![[0.3], [-0.2], [0.8]];
        let y2 = ndarray::concatenate![Axis(1), y1, y1];
        let hyp = array![0., 0.];
        let inf = ExactInference();
        let nlz1 = inf
            .negative_log_likelihood(
                &SquaredExponential(),
                &ZeroMean(),
                &hyp.view(),
                &x.view(),
                &y1.view(),
                -1.,
            )
            .unwrap();
        let nlz2 = inf
            .negative_log_likelihood(
                &SquaredExponential(),
                &ZeroMean(),
                &hyp.view(),
                &x.view(),
                &y2.view(),
                -1.,
            )
            .unwrap();
        assert_abs_diff_eq!(nlz2, 2. * nlz1, epsilon = 1e-10);
    }

    #[test]
    fn test_posterior_consistency() {
        // K alpha + sn2 alpha reproduces the residuals
        let x = array![[0.], [0.7], [1.9], [3.0]];
        let y = array![[0.1], [0.6], [0.9], [0.2]];
        let hyp = array![0., 0.];
        let log_noise = (0.3f64).ln();
        let sn2 = (2.0f64 * log_noise).exp();
        let kernel = SquaredExponential();
        let post = ExactInference()
            .posterior(&kernel, &ZeroMean(), &hyp.view(), &x.view(), &y.view(), log_noise)
            .unwrap();
        let k = kernel.value(&hyp.view(), &x.view(), None);
        let recon = k.dot(&post.alpha) + post.alpha.mapv(|v| v * sn2);
        assert_abs_diff_eq!(recon, y, epsilon = 1e-8);
        let sw = post.sqrt_precision.unwrap();
        assert_abs_diff_eq!(sw[0], 1. / 0.3, epsilon = 1e-12);
    }

    struct IndefiniteKernel();

    impl fmt::Display for IndefiniteKernel {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "IndefiniteKernel")
        }
    }

    impl Kernel for IndefiniteKernel {
        fn n_hyp(&self, _dim: usize) -> usize {
            0
        }
        fn value(
            &self,
            _hyp: &ArrayView1<f64>,
            x: &ArrayView2<f64>,
            x2: Option<&ArrayView2<f64>>,
        ) -> Array2<f64> {
            let m = x2.map_or(x.nrows(), |x2| x2.nrows());
            Array2::from_elem((x.nrows(), m), -10.)
        }
        fn diag(&self, _hyp: &ArrayView1<f64>, x: &ArrayView2<f64>) -> Array1<f64> {
            Array1::from_elem(x.nrows(), -10.)
        }
    }

    #[test]
    fn test_indefinite_covariance_is_recoverable() {
        let x = array![[0.]];
        let y = array![[1.]];
        let hyp = Array1::<f64>::zeros(0);
        let res = ExactInference().negative_log_likelihood(
            &IndefiniteKernel(),
            &ZeroMean(),
            &hyp.view(),
            &x.view(),
            &y.view(),
            0.,
        );
        assert!(matches!(res, Err(GpError::NumericalInstability(_))));
    }
}
