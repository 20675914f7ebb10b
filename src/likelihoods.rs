//! A module for observation likelihoods mapping latent function values
//! to observation space.
//!
//! Only the Gaussian likelihood admits exact inference; it is the one
//! built-in. Non-Gaussian likelihoods would require approximate inference
//! methods which are out of scope.

use ndarray::{Array2, ArrayView2};
use std::f64::consts::PI;
use std::fmt;

/// A trait for observation likelihoods used in GP regression.
///
/// Given latent mean `mu` and variance `s2` (any matching shape), an
/// implementation returns `(lp, ymu, ys2)`: the log predictive probability
/// of the targets `y`, and the observation-space predictive mean and
/// variance, each shaped like the inputs. When `y` is absent `lp` is
/// evaluated at the predictive mean, i.e. relative to the predictive
/// distribution alone.
pub trait Likelihood: fmt::Display + Send + Sync {
    /// Evaluate the likelihood, see trait documentation
    fn evaluate(
        &self,
        y: Option<&ArrayView2<f64>>,
        mu: &ArrayView2<f64>,
        s2: &ArrayView2<f64>,
        log_noise: f64,
    ) -> (Array2<f64>, Array2<f64>, Array2<f64>);
}

/// Gaussian observation noise: `y = f + eps`, `eps ~ N(0, sn^2)`
/// with `sn = exp(log_noise)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GaussianLikelihood();

impl Likelihood for GaussianLikelihood {
    fn evaluate(
        &self,
        y: Option<&ArrayView2<f64>>,
        mu: &ArrayView2<f64>,
        s2: &ArrayView2<f64>,
        log_noise: f64,
    ) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let sn2 = (2. * log_noise).exp();
        let ymu = mu.to_owned();
        let ys2 = s2.mapv(|v| v + sn2);
        let lp = match y {
            Some(y) => {
                let mut lp = Array2::zeros(ymu.dim());
                ndarray::Zip::from(&mut lp)
                    .and(y)
                    .and(&ymu)
                    .and(&ys2)
                    .for_each(|l, yi, mi, vi| {
                        *l = -(yi - mi) * (yi - mi) / (2. * vi) - 0.5 * (2. * PI * vi).ln();
                    });
                lp
            }
            None => ys2.mapv(|v| -0.5 * (2. * PI * v).ln()),
        };
        (lp, ymu, ys2)
    }
}

impl fmt::Display for GaussianLikelihood {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GaussianLikelihood")
    }
}
