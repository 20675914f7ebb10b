//! This library implements exact [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process)
//! regression in the spirit of the [GPML toolbox](http://gaussianprocess.org/gpml/code/matlab/doc/).
//!
//! A model is assembled from four pluggable components: a covariance
//! kernel, a mean function, an observation likelihood and an inference
//! method. Components are selected through a closed name registry (see
//! [registry]) or supplied directly as trait objects. Training exposes
//! the negative log marginal likelihood as a scalar loss for an
//! external derivative-free optimizer (see [optimization]); prediction
//! computes the posterior mean, variance and log predictive probability
//! at the test inputs, processed in batches of bounded size.
//!
//! Exact inference costs O(N^3) in processing time and O(N^2) in memory
//! where N is the number of training points; the batched prediction
//! keeps the test-side memory bounded regardless of the number of test
//! points.
//!
//! GP models are implemented by [GaussianProcess] parameterized by [GpParams].
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod errors;
pub mod hyperparameters;
pub mod inference;
pub mod kernels;
pub mod likelihoods;
pub mod means;
pub mod optimization;
pub mod registry;

mod model;

pub use errors::*;
pub use model::*;
