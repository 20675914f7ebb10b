//! A closed registry mapping selector names to built-in components.
//!
//! Names resolve against a fixed set; anything else fails fast with
//! [`GpError::UnknownComponent`] at model construction rather than at
//! first use. Custom implementations bypass the registry by being
//! supplied directly to the model parameters.

use crate::errors::{GpError, Result};
use crate::inference::{ExactInference, InferenceMethod};
use crate::kernels::{Kernel, SpectralMixture, SquaredExponential};
use crate::likelihoods::{GaussianLikelihood, Likelihood};
use crate::means::{ConstantMean, Mean, ZeroMean};
use std::sync::Arc;

/// Resolve a kernel by name: `"radial_basis"`, `"spectral_mixture"`.
///
/// `"spectral_mixture"` resolves to a single mixture component; richer
/// mixtures are supplied directly via [`SpectralMixture::new`].
pub fn kernel(name: &str) -> Result<Arc<dyn Kernel>> {
    match name {
        "radial_basis" => Ok(Arc::new(SquaredExponential::default())),
        "spectral_mixture" => Ok(Arc::new(SpectralMixture::default())),
        _ => Err(GpError::UnknownComponent(format!("kernel '{name}'"))),
    }
}

/// Resolve a mean function by name: `"zero"`, `"constant"`.
pub fn mean(name: &str) -> Result<Arc<dyn Mean>> {
    match name {
        "zero" => Ok(Arc::new(ZeroMean::default())),
        "constant" => Ok(Arc::new(ConstantMean::default())),
        _ => Err(GpError::UnknownComponent(format!("mean '{name}'"))),
    }
}

/// Resolve a likelihood by name: `"gaussian"`.
pub fn likelihood(name: &str) -> Result<Arc<dyn Likelihood>> {
    match name {
        "gaussian" => Ok(Arc::new(GaussianLikelihood::default())),
        _ => Err(GpError::UnknownComponent(format!("likelihood '{name}'"))),
    }
}

/// Resolve an inference method by name: `"exact"`.
pub fn inference(name: &str) -> Result<Arc<dyn InferenceMethod>> {
    match name {
        "exact" => Ok(Arc::new(ExactInference::default())),
        _ => Err(GpError::UnknownComponent(format!("inference '{name}'"))),
    }
}
