//! A module for prior mean functions of the GP model.
//!
//! The zero mean is the usual choice as the kernel then captures the
//! whole signal; a constant mean is provided for centered-but-offset data.

use ndarray::{Array1, ArrayView2};
use std::fmt;

/// A trait for prior mean functions used in GP regression
pub trait Mean: fmt::Display + Send + Sync {
    /// Prior mean at the given `x` points, one entry per row of `x`
    fn value(&self, x: &ArrayView2<f64>) -> Array1<f64>;
}

/// The zero mean function
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ZeroMean();

impl Mean for ZeroMean {
    fn value(&self, x: &ArrayView2<f64>) -> Array1<f64> {
        Array1::zeros(x.nrows())
    }
}

impl fmt::Display for ZeroMean {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ZeroMean")
    }
}

/// A constant mean function
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ConstantMean(pub f64);

impl Mean for ConstantMean {
    fn value(&self, x: &ArrayView2<f64>) -> Array1<f64> {
        Array1::from_elem(x.nrows(), self.0)
    }
}

impl fmt::Display for ConstantMean {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConstantMean({})", self.0)
    }
}
