//! The Gaussian process model tying kernel, mean, likelihood and
//! inference method together: `train` wraps the inference method for an
//! external optimizer, `predict` runs the batched posterior-distribution
//! computation over the test inputs.

use crate::errors::{GpError, Result};
use crate::inference::InferenceMethod;
use crate::kernels::Kernel;
use crate::likelihoods::Likelihood;
use crate::means::Mean;
use crate::registry;

use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{s, Array1, Array2, ArrayBase, Axis, Data, Ix1, Zip};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

/// Default number of test points processed per batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Entries of `alpha` smaller than this in magnitude count as zero when
/// the sparsity-aware factor reconstruction selects its active subset
const ALPHA_SPARSITY_TOL: f64 = 1e-12;

/// Predictive distribution at the test inputs, one entry per test point.
///
/// Per-column quantities have been averaged across the target columns.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Latent (noise-free) posterior mean
    pub fmu: Array1<f64>,
    /// Latent posterior variance, component-wise non-negative
    pub fs2: Array1<f64>,
    /// Observation-space predictive mean
    pub ymu: Array1<f64>,
    /// Observation-space predictive variance
    pub ys2: Array1<f64>,
    /// Average log predictive probability of the test targets;
    /// `None` when the model holds no test targets
    pub lp: Option<Array1<f64>>,
}

enum Choice<T: ?Sized> {
    Name(String),
    Given(Arc<T>),
}

impl<T: ?Sized> Choice<T> {
    fn resolve(self, registry: impl Fn(&str) -> Result<Arc<T>>) -> Result<Arc<T>> {
        match self {
            Choice::Name(name) => registry(&name),
            Choice::Given(c) => Ok(c),
        }
    }
}

/// Parameters to build a [`GaussianProcess`] model.
///
/// Each component is selected either by registry name or by supplying an
/// implementation directly; names are validated at [`GpParams::build`].
pub struct GpParams {
    x_train: Array2<f64>,
    y_train: Array2<f64>,
    x_test: Option<Array2<f64>>,
    y_test: Option<Array2<f64>>,
    hyp: Option<Array1<f64>>,
    log_noise: f64,
    fix_noise: bool,
    batch_size: usize,
    kernel: Choice<dyn Kernel>,
    mean: Choice<dyn Mean>,
    likelihood: Choice<dyn Likelihood>,
    inference: Choice<dyn InferenceMethod>,
}

impl GpParams {
    /// Default parameters for the given training data: radial basis
    /// kernel, zero mean, Gaussian likelihood, exact inference.
    pub fn new(x_train: Array2<f64>, y_train: Array2<f64>) -> Self {
        GpParams {
            x_train,
            y_train,
            x_test: None,
            y_test: None,
            hyp: None,
            log_noise: 0.,
            fix_noise: false,
            batch_size: DEFAULT_BATCH_SIZE,
            kernel: Choice::Name("radial_basis".to_string()),
            mean: Choice::Name("zero".to_string()),
            likelihood: Choice::Name("gaussian".to_string()),
            inference: Choice::Name("exact".to_string()),
        }
    }

    /// Set test inputs, and optionally the test targets used for the
    /// log predictive probability
    pub fn test_data(mut self, x_test: Array2<f64>, y_test: Option<Array2<f64>>) -> Self {
        self.x_test = Some(x_test);
        self.y_test = y_test;
        self
    }

    /// Set the initial hyperparameter vector (log scale)
    pub fn hyp(mut self, hyp: Array1<f64>) -> Self {
        self.hyp = Some(hyp);
        self
    }

    /// Set the log observation-noise standard deviation, tracked
    /// separately from the hyperparameter vector
    pub fn log_noise(mut self, log_noise: f64) -> Self {
        self.log_noise = log_noise;
        self
    }

    /// Treat the trailing element of every hyperparameter vector as the
    /// log noise parameter: `train` strips it and caches it internally
    pub fn fix_noise(mut self, fix_noise: bool) -> Self {
        self.fix_noise = fix_noise;
        self
    }

    /// Set the number of test points processed per prediction batch.
    /// The predicted values do not depend on it, peak memory does.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Select the kernel by registry name
    pub fn kernel_name(mut self, name: &str) -> Self {
        self.kernel = Choice::Name(name.to_string());
        self
    }

    /// Supply a kernel implementation directly
    pub fn kernel(mut self, kernel: Arc<dyn Kernel>) -> Self {
        self.kernel = Choice::Given(kernel);
        self
    }

    /// Select the mean function by registry name
    pub fn mean_name(mut self, name: &str) -> Self {
        self.mean = Choice::Name(name.to_string());
        self
    }

    /// Supply a mean function implementation directly
    pub fn mean(mut self, mean: Arc<dyn Mean>) -> Self {
        self.mean = Choice::Given(mean);
        self
    }

    /// Select the likelihood by registry name
    pub fn likelihood_name(mut self, name: &str) -> Self {
        self.likelihood = Choice::Name(name.to_string());
        self
    }

    /// Supply a likelihood implementation directly
    pub fn likelihood(mut self, likelihood: Arc<dyn Likelihood>) -> Self {
        self.likelihood = Choice::Given(likelihood);
        self
    }

    /// Select the inference method by registry name
    pub fn inference_name(mut self, name: &str) -> Self {
        self.inference = Choice::Name(name.to_string());
        self
    }

    /// Supply an inference method implementation directly
    pub fn inference(mut self, inference: Arc<dyn InferenceMethod>) -> Self {
        self.inference = Choice::Given(inference);
        self
    }

    /// Resolve component names and validate dimensions.
    ///
    /// Fails with [`GpError::UnknownComponent`] on an unresolvable name
    /// and [`GpError::DimensionMismatch`] on inconsistent data shapes or
    /// hyperparameter length; no numerical work happens here.
    pub fn build(self) -> Result<GaussianProcess> {
        let kernel = self.kernel.resolve(registry::kernel)?;
        let mean = self.mean.resolve(registry::mean)?;
        let likelihood = self.likelihood.resolve(registry::likelihood)?;
        let inference = self.inference.resolve(registry::inference)?;

        if self.x_train.nrows() == 0 || self.y_train.ncols() == 0 {
            return Err(GpError::DimensionMismatch(
                "training data must have at least one point and one target column".to_string(),
            ));
        }
        if self.x_train.nrows() != self.y_train.nrows() {
            return Err(GpError::DimensionMismatch(format!(
                "training inputs have {} rows but targets have {}",
                self.x_train.nrows(),
                self.y_train.nrows()
            )));
        }
        if let (Some(xs), Some(ys)) = (&self.x_test, &self.y_test) {
            if xs.nrows() != ys.nrows() {
                return Err(GpError::DimensionMismatch(format!(
                    "test inputs have {} rows but targets have {}",
                    xs.nrows(),
                    ys.nrows()
                )));
            }
            if ys.ncols() != 1 && ys.ncols() != self.y_train.ncols() {
                return Err(GpError::DimensionMismatch(format!(
                    "test targets have {} columns, expected 1 or {}",
                    ys.ncols(),
                    self.y_train.ncols()
                )));
            }
        }
        if self.y_test.is_some() && self.x_test.is_none() {
            return Err(GpError::DimensionMismatch(
                "test targets supplied without test inputs".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(GpError::InvalidValue(
                "batch size must be at least 1".to_string(),
            ));
        }

        let dim = self.x_train.ncols();
        let expected = kernel.n_hyp(dim) + usize::from(self.fix_noise);
        let hyp = match self.hyp {
            Some(hyp) => {
                if hyp.len() != expected {
                    return Err(GpError::DimensionMismatch(format!(
                        "hyperparameter vector has length {} but kernel {} expects {}",
                        hyp.len(),
                        kernel,
                        expected
                    )));
                }
                hyp
            }
            None => Array1::zeros(expected),
        };

        Ok(GaussianProcess {
            kernel,
            mean,
            likelihood,
            inference,
            x_train: self.x_train,
            y_train: self.y_train,
            x_test: self.x_test,
            y_test: self.y_test,
            hyp,
            log_noise: Cell::new(self.log_noise),
            fix_noise: self.fix_noise,
            batch_size: self.batch_size,
        })
    }
}

/// A Gaussian process regression model under exact inference.
///
/// A model instance owns its data references and configuration; an
/// external optimizer drives [`GaussianProcess::train`] with candidate
/// hyperparameter vectors, then [`GaussianProcess::predict`] computes
/// the posterior distribution at the stored test inputs.
///
/// The cached log-noise value is the single piece of state `train` may
/// touch; `train` and `predict` must therefore not run concurrently on
/// one instance. Clones are fully independent, so parallel random
/// restarts run one instance per thread without synchronization.
#[derive(Clone)]
pub struct GaussianProcess {
    kernel: Arc<dyn Kernel>,
    mean: Arc<dyn Mean>,
    likelihood: Arc<dyn Likelihood>,
    inference: Arc<dyn InferenceMethod>,
    x_train: Array2<f64>,
    y_train: Array2<f64>,
    x_test: Option<Array2<f64>>,
    y_test: Option<Array2<f64>>,
    hyp: Array1<f64>,
    log_noise: Cell<f64>,
    fix_noise: bool,
    batch_size: usize,
}

impl fmt::Display for GaussianProcess {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(kernel={}, mean={}, likelihood={}, inference={})",
            self.kernel, self.mean, self.likelihood, self.inference
        )
    }
}

impl GaussianProcess {
    /// Parameters constructor, see [`GpParams`]
    pub fn params(x_train: Array2<f64>, y_train: Array2<f64>) -> GpParams {
        GpParams::new(x_train, y_train)
    }

    /// Currently stored hyperparameter vector
    pub fn hyp(&self) -> &Array1<f64> {
        &self.hyp
    }

    /// Currently tracked log observation-noise standard deviation
    pub fn log_noise(&self) -> f64 {
        self.log_noise.get()
    }

    /// Store an optimized hyperparameter vector for later prediction
    pub fn set_hyp(&mut self, hyp: Array1<f64>) -> Result<()> {
        let expected = self.kernel.n_hyp(self.x_train.ncols()) + usize::from(self.fix_noise);
        if hyp.len() != expected {
            return Err(GpError::DimensionMismatch(format!(
                "hyperparameter vector has length {} but kernel {} expects {}",
                hyp.len(),
                self.kernel,
                expected
            )));
        }
        self.hyp = hyp;
        Ok(())
    }

    /// Negative log marginal likelihood of the training targets for the
    /// candidate hyperparameter vector `hyp`, the objective an external
    /// optimizer minimizes.
    ///
    /// In fixed-noise mode the trailing element of `hyp` is the log
    /// noise parameter: it is stripped before inference and cached as
    /// the tracked noise value. Apart from that cache the result is a
    /// pure function of `hyp` and the stored training data, so repeated
    /// calls with the same vector return the same loss.
    ///
    /// A failed factorization surfaces as
    /// [`GpError::NumericalInstability`]; callers should treat it as a
    /// rejected candidate point, not a fatal condition.
    pub fn train(&self, hyp: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Result<f64> {
        let expected = self.kernel.n_hyp(self.x_train.ncols()) + usize::from(self.fix_noise);
        if hyp.len() != expected {
            return Err(GpError::DimensionMismatch(format!(
                "hyperparameter vector has length {} but kernel {} expects {}",
                hyp.len(),
                self.kernel,
                expected
            )));
        }
        let (kernel_hyp, log_noise) = if self.fix_noise {
            let log_noise = hyp[hyp.len() - 1];
            self.log_noise.set(log_noise);
            (hyp.slice(s![..hyp.len() - 1]).to_owned(), log_noise)
        } else {
            (hyp.to_owned(), self.log_noise.get())
        };
        self.inference.negative_log_likelihood(
            self.kernel.as_ref(),
            self.mean.as_ref(),
            &kernel_hyp.view(),
            &self.x_train.view(),
            &self.y_train.view(),
            log_noise,
        )
    }

    /// Kernel hyperparameters and log noise used for prediction,
    /// derived from the stored hyperparameter vector
    fn prediction_hyp(&self) -> (Array1<f64>, f64) {
        if self.fix_noise {
            let n = self.hyp.len();
            (self.hyp.slice(s![..n - 1]).to_owned(), self.hyp[n - 1])
        } else {
            (self.hyp.to_owned(), self.log_noise.get())
        }
    }

    /// Posterior distribution at the stored test inputs.
    ///
    /// Posterior coefficients are obtained once from the inference
    /// method, then test points are processed in batches of at most
    /// `batch_size` rows to bound peak memory; results are independent
    /// of the batch size. The log predictive probability is `None` when
    /// the model holds no test targets.
    pub fn predict(&self) -> Result<Prediction> {
        let xs = self.x_test.as_ref().ok_or_else(|| {
            GpError::InvalidValue("prediction requires test inputs".to_string())
        })?;
        let (kernel_hyp, log_noise) = self.prediction_hyp();

        let post = self.inference.posterior(
            self.kernel.as_ref(),
            self.mean.as_ref(),
            &kernel_hyp.view(),
            &self.x_train.view(),
            &self.y_train.view(),
            log_noise,
        )?;
        let n = post.alpha.nrows();
        if n != self.x_train.nrows() {
            return Err(GpError::DimensionMismatch(format!(
                "posterior has {} coefficients for {} training points",
                n,
                self.x_train.nrows()
            )));
        }
        let sw = post
            .sqrt_precision
            .unwrap_or_else(|| Array1::ones(n));

        // Without a supplied factor, rebuild one from the active
        // (nonzero-alpha) subset of the training points; the whole
        // prediction then runs on that subset.
        let (active, factor) = match post.factor {
            Some(l) => ((0..n).collect::<Vec<_>>(), l),
            None => {
                let active = (0..n)
                    .filter(|&i| {
                        post.alpha
                            .row(i)
                            .iter()
                            .any(|a| a.abs() > ALPHA_SPARSITY_TOL)
                    })
                    .collect::<Vec<_>>();
                let x_act = self.x_train.select(Axis(0), &active);
                let sw_act = sw.select(Axis(0), &active);
                let k = self.kernel.value(&kernel_hyp.view(), &x_act.view(), None);
                let mut b = Array2::<f64>::eye(active.len());
                Zip::indexed(&mut b).for_each(|(i, j), v| {
                    *v += sw_act[i] * sw_act[j] * k[[i, j]];
                });
                let l = b.cholesky().map_err(|e| {
                    GpError::NumericalInstability(format!(
                        "posterior factor reconstruction failed: {e}"
                    ))
                })?;
                (active, l)
            }
        };
        let x_act = self.x_train.select(Axis(0), &active);
        let alpha = post.alpha.select(Axis(0), &active);
        let sw_col = sw.select(Axis(0), &active).insert_axis(Axis(1));
        let lower = is_lower_triangular(&factor);

        let n_test = xs.nrows();
        let n_cols = alpha.ncols();
        let mut fmu = Array1::zeros(n_test);
        let mut fs2 = Array1::zeros(n_test);
        let mut ymu = Array1::zeros(n_test);
        let mut ys2 = Array1::zeros(n_test);
        let mut lp = Array1::zeros(n_test);

        let mut start = 0;
        while start < n_test {
            let stop = (start + self.batch_size).min(n_test);
            let len = stop - start;
            let xb = xs.slice(s![start..stop, ..]);

            let kss = self.kernel.diag(&kernel_hyp.view(), &xb);
            let ks = self
                .kernel
                .value(&kernel_hyp.view(), &x_act.view(), Some(&xb));
            let ms = self.mean.value(&xb).insert_axis(Axis(1));

            // Latent mean per target column, GPML eqs. (2.25)/(2.27)
            let fmu_cols = ks.t().dot(&alpha) + &ms;

            // Latent variance, GPML eq. (2.26); the two branches are
            // equivalent parameterizations of the posterior factor
            let fs2_b = if lower {
                let v = factor.solve_triangular(&(&ks * &sw_col), UPLO::Lower)?;
                &kss - &v.mapv(|v| v * v).sum_axis(Axis(0))
            } else {
                &kss + &(&ks * &factor.dot(&ks)).sum_axis(Axis(0))
            };
            // Small negatives are numerical noise, mask them
            let fs2_b = fs2_b.mapv(|v| if v < 0. { 0. } else { v });

            let fs2_cols = fs2_b
                .clone()
                .insert_axis(Axis(1))
                .broadcast((len, n_cols))
                .unwrap()
                .to_owned();
            let ys_b = self.y_test.as_ref().map(|ys| {
                let yb = ys.slice(s![start..stop, ..]);
                if yb.ncols() == n_cols {
                    yb.to_owned()
                } else {
                    yb.broadcast((len, n_cols)).unwrap().to_owned()
                }
            });
            let ys_views = ys_b.as_ref().map(|y| y.view());
            let (lp_cols, ymu_cols, ys2_cols) = self.likelihood.evaluate(
                ys_views.as_ref(),
                &fmu_cols.view(),
                &fs2_cols.view(),
                log_noise,
            );

            // Average across target columns
            fmu.slice_mut(s![start..stop])
                .assign(&fmu_cols.mean_axis(Axis(1)).unwrap());
            fs2.slice_mut(s![start..stop]).assign(&fs2_b);
            ymu.slice_mut(s![start..stop])
                .assign(&ymu_cols.mean_axis(Axis(1)).unwrap());
            ys2.slice_mut(s![start..stop])
                .assign(&ys2_cols.mean_axis(Axis(1)).unwrap());
            lp.slice_mut(s![start..stop])
                .assign(&lp_cols.mean_axis(Axis(1)).unwrap());

            start = stop;
        }

        Ok(Prediction {
            fmu,
            fs2,
            ymu,
            ys2,
            lp: self.y_test.as_ref().map(|_| lp),
        })
    }
}

/// All entries strictly above the diagonal are zero
fn is_lower_triangular(m: &Array2<f64>) -> bool {
    m.indexed_iter().all(|((i, j), v)| j <= i || *v == 0.)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameters::init_se;
    use crate::inference::{ExactInference, Posterior};
    use crate::optimization::{optimize_hyp, CobylaParams};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, concatenate, Array, ArrayView1, ArrayView2};
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    fn sine_data(n: usize) -> (Array2<f64>, Array2<f64>) {
        let xt = Array::linspace(0., 6.283, n).insert_axis(Axis(1));
        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        let noise = Array::random_using((n, 1), Normal::new(0., 0.1).unwrap(), &mut rng);
        let yt = xt.mapv(f64::sin) + noise;
        (xt, yt)
    }

    fn sine_model(x_test: Array2<f64>, batch_size: usize) -> GaussianProcess {
        let (xt, yt) = sine_data(20);
        GaussianProcess::params(xt, yt)
            .test_data(x_test, None)
            .hyp(array![0., 0.])
            .log_noise((0.1f64).ln())
            .batch_size(batch_size)
            .build()
            .expect("model built")
    }

    #[test]
    fn test_unknown_component_rejected_at_build() {
        let res = GaussianProcess::params(array![[0.]], array![[0.]])
            .kernel_name("bogus_kernel")
            .build();
        assert!(matches!(res, Err(GpError::UnknownComponent(_))));
    }

    #[test]
    fn test_row_count_mismatch_rejected() {
        let res = GaussianProcess::params(array![[0.], [1.], [2.]], array![[0.], [1.]]).build();
        assert!(matches!(res, Err(GpError::DimensionMismatch(_))));
    }

    #[test]
    fn test_hyp_length_validated() {
        let res = GaussianProcess::params(array![[0.]], array![[0.]])
            .hyp(array![0., 0., 0.])
            .build();
        assert!(matches!(res, Err(GpError::DimensionMismatch(_))));

        let model = GaussianProcess::params(array![[0.]], array![[0.]])
            .build()
            .unwrap();
        let res = model.train(&array![0.]);
        assert!(matches!(res, Err(GpError::DimensionMismatch(_))));
    }

    #[test]
    fn test_train_is_pure() {
        let (xt, yt) = sine_data(12);
        let model = GaussianProcess::params(xt, yt)
            .log_noise((0.1f64).ln())
            .build()
            .unwrap();
        let hyp = array![0.2, -0.1];
        let first = model.train(&hyp).unwrap();
        let second = model.train(&hyp).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fixed_noise_is_stripped_and_cached() {
        let (xt, yt) = sine_data(12);
        let fixed = GaussianProcess::params(xt.clone(), yt.clone())
            .fix_noise(true)
            .hyp(array![0.2, -0.1, (0.3f64).ln()])
            .build()
            .unwrap();
        let loss = fixed.train(&array![0.2, -0.1, (0.3f64).ln()]).unwrap();
        assert_abs_diff_eq!(fixed.log_noise(), (0.3f64).ln(), epsilon = 1e-15);

        let plain = GaussianProcess::params(xt, yt)
            .log_noise((0.3f64).ln())
            .build()
            .unwrap();
        let expected = plain.train(&array![0.2, -0.1]).unwrap();
        assert_abs_diff_eq!(loss, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_latent_variance_non_negative() {
        let xs = Array::linspace(-2., 9., 40).insert_axis(Axis(1));
        let model = sine_model(xs, DEFAULT_BATCH_SIZE);
        let pred = model.predict().unwrap();
        assert!(pred.fs2.iter().all(|v| *v >= 0.));
    }

    #[test]
    fn test_batch_size_invariance() {
        let xs = Array::linspace(0.3, 5.9, 23).insert_axis(Axis(1));
        let ys = xs.mapv(f64::sin);
        let model = |batch_size| {
            let (xt, yt) = sine_data(20);
            GaussianProcess::params(xt, yt)
                .test_data(xs.clone(), Some(ys.clone()))
                .hyp(array![0., 0.])
                .log_noise((0.1f64).ln())
                .batch_size(batch_size)
                .build()
                .unwrap()
        };
        let all = model(DEFAULT_BATCH_SIZE).predict().unwrap();
        let all_lp = all.lp.clone().expect("targets were supplied");
        for batch_size in [1, 7] {
            let batched = model(batch_size).predict().unwrap();
            assert_abs_diff_eq!(batched.fmu, all.fmu, epsilon = 1e-12);
            assert_abs_diff_eq!(batched.fs2, all.fs2, epsilon = 1e-12);
            assert_abs_diff_eq!(batched.ymu, all.ymu, epsilon = 1e-12);
            assert_abs_diff_eq!(batched.ys2, all.ys2, epsilon = 1e-12);
            let lp = batched.lp.expect("targets were supplied");
            assert_abs_diff_eq!(lp, all_lp, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_column_averaging_degenerate() {
        let (xt, yt) = sine_data(15);
        let yt3 = concatenate![Axis(1), yt, yt, yt];
        let xs = Array::linspace(0.5, 5.5, 9).insert_axis(Axis(1));

        let single = GaussianProcess::params(xt.clone(), yt)
            .test_data(xs.clone(), None)
            .log_noise((0.1f64).ln())
            .build()
            .unwrap()
            .predict()
            .unwrap();
        let triple = GaussianProcess::params(xt, yt3)
            .test_data(xs, None)
            .log_noise((0.1f64).ln())
            .build()
            .unwrap()
            .predict()
            .unwrap();

        assert_abs_diff_eq!(triple.fmu, single.fmu, epsilon = 1e-12);
        assert_abs_diff_eq!(triple.fs2, single.fs2, epsilon = 1e-12);
        assert_abs_diff_eq!(triple.ymu, single.ymu, epsilon = 1e-12);
        assert_abs_diff_eq!(triple.ys2, single.ys2, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_test_targets_yield_no_log_probability() {
        let xs = array![[1.], [2.], [3.]];
        let pred = sine_model(xs, DEFAULT_BATCH_SIZE).predict().unwrap();
        assert!(pred.lp.is_none());
        assert_eq!(pred.fmu.len(), 3);
        assert_eq!(pred.ys2.len(), 3);
    }

    #[test]
    fn test_supplied_test_targets_yield_log_probability() {
        let (xt, yt) = sine_data(15);
        let xs = array![[1.], [2.]];
        let ys = xs.mapv(f64::sin);
        let pred = GaussianProcess::params(xt, yt)
            .test_data(xs, Some(ys))
            .log_noise((0.1f64).ln())
            .build()
            .unwrap()
            .predict()
            .unwrap();
        let lp = pred.lp.expect("log probability present");
        assert_eq!(lp.len(), 2);
        assert!(lp.iter().all(|v| v.is_finite()));
    }

    /// Delegates to exact inference but withholds the factor, forcing
    /// the sparsity-aware reconstruction path in `predict`
    struct WithheldFactor(ExactInference);

    impl fmt::Display for WithheldFactor {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "WithheldFactor")
        }
    }

    impl InferenceMethod for WithheldFactor {
        fn negative_log_likelihood(
            &self,
            kernel: &dyn Kernel,
            mean: &dyn Mean,
            hyp: &ArrayView1<f64>,
            x: &ArrayView2<f64>,
            y: &ArrayView2<f64>,
            log_noise: f64,
        ) -> Result<f64> {
            self.0
                .negative_log_likelihood(kernel, mean, hyp, x, y, log_noise)
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
            let mut post = self.0.posterior(kernel, mean, hyp, x, y, log_noise)?;
            post.factor = None;
            Ok(post)
        }
    }

    #[test]
    fn test_factor_reconstruction_matches_supplied_factor() {
        let (xt, yt) = sine_data(15);
        let xs = Array::linspace(0.5, 5.5, 11).insert_axis(Axis(1));

        let direct = GaussianProcess::params(xt.clone(), yt.clone())
            .test_data(xs.clone(), None)
            .log_noise((0.1f64).ln())
            .build()
            .unwrap()
            .predict()
            .unwrap();
        let reconstructed = GaussianProcess::params(xt, yt)
            .test_data(xs, None)
            .log_noise((0.1f64).ln())
            .inference(Arc::new(WithheldFactor(ExactInference())))
            .build()
            .unwrap()
            .predict()
            .unwrap();

        assert_abs_diff_eq!(reconstructed.fmu, direct.fmu, epsilon = 1e-9);
        assert_abs_diff_eq!(reconstructed.fs2, direct.fs2, epsilon = 1e-9);
        assert_abs_diff_eq!(reconstructed.ys2, direct.ys2, epsilon = 1e-9);
    }

    /// Delegates to exact inference but replaces the triangular factor
    /// with the full matrix `-(K + sn2 I)^-1`, exercising the
    /// non-triangular variance formula
    struct FullMatrixFactor(ExactInference);

    impl fmt::Display for FullMatrixFactor {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "FullMatrixFactor")
        }
    }

    impl InferenceMethod for FullMatrixFactor {
        fn negative_log_likelihood(
            &self,
            kernel: &dyn Kernel,
            mean: &dyn Mean,
            hyp: &ArrayView1<f64>,
            x: &ArrayView2<f64>,
            y: &ArrayView2<f64>,
            log_noise: f64,
        ) -> Result<f64> {
            self.0
                .negative_log_likelihood(kernel, mean, hyp, x, y, log_noise)
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
            let mut post = self.0.posterior(kernel, mean, hyp, x, y, log_noise)?;
            let l = post.factor.take().unwrap();
            let sn2 = (2. * log_noise).exp();
            // B^-1 from the triangular factor of B = K/sn2 + I
            let eye = Array2::<f64>::eye(l.nrows());
            let tmp = l.solve_triangular(&eye, UPLO::Lower)?;
            let b_inv = l.t().solve_triangular_into(tmp, UPLO::Upper)?;
            post.factor = Some(b_inv.mapv(|v| -v / sn2));
            Ok(post)
        }
    }

    #[test]
    fn test_triangular_and_general_paths_agree() {
        let (xt, yt) = sine_data(15);
        let xs = Array::linspace(0.5, 5.5, 11).insert_axis(Axis(1));

        let triangular = GaussianProcess::params(xt.clone(), yt.clone())
            .test_data(xs.clone(), None)
            .log_noise((0.1f64).ln())
            .build()
            .unwrap()
            .predict()
            .unwrap();
        let general = GaussianProcess::params(xt, yt)
            .test_data(xs, None)
            .log_noise((0.1f64).ln())
            .inference(Arc::new(FullMatrixFactor(ExactInference())))
            .build()
            .unwrap()
            .predict()
            .unwrap();

        assert_abs_diff_eq!(general.fmu, triangular.fmu, epsilon = 1e-8);
        assert_abs_diff_eq!(general.fs2, triangular.fs2, epsilon = 1e-8);
        assert_abs_diff_eq!(general.ys2, triangular.ys2, epsilon = 1e-8);
    }

    #[test]
    fn test_sine_end_to_end() {
        let (xt, yt) = sine_data(20);
        // spacing of the training grid is ~0.33; the last two test
        // points sit on a training point and midway between two
        let near = xt[[10, 0]];
        let far = near + 6.283 / 19. / 2.;
        let xs = array![[0.9], [2.0], [3.3], [4.4], [5.6], [near], [far]];
        let mut model = GaussianProcess::params(xt.clone(), yt.clone())
            .test_data(xs.clone(), None)
            .log_noise((0.1f64).ln())
            .build()
            .unwrap();

        let hyp0 = init_se(&xt.view(), &yt.view());
        let objfn = |x: &[f64], _u: &mut ()| {
            model
                .train(&ArrayView1::from(x))
                .unwrap_or(f64::INFINITY)
        };
        let bounds = vec![(-3., 3.); 2];
        let (fmin, hyp_opt) = optimize_hyp(objfn, &hyp0, &bounds, CobylaParams::default());
        assert!(fmin < model.train(&hyp0).unwrap() + 1e-9);
        model.set_hyp(hyp_opt).unwrap();

        let pred = model.predict().unwrap();
        for i in 0..5 {
            assert_abs_diff_eq!(pred.fmu[i], xs[[i, 0]].sin(), epsilon = 0.2);
        }
        assert!(pred.fs2.iter().all(|v| *v > 0.));
        // farther from the training data means more uncertainty
        assert!(pred.fs2[6] > pred.fs2[5]);
    }

    #[test]
    fn test_parallel_restarts_over_clones() {
        use rayon::prelude::*;
        let (xt, yt) = sine_data(15);
        let model = GaussianProcess::params(xt, yt)
            .log_noise((0.1f64).ln())
            .build()
            .unwrap();
        let starts = crate::optimization::prepare_multistart(
            3,
            &array![0., 0.],
            &[(-2., 2.), (-2., 2.)],
            9,
        );
        // one clone per restart, moved into its thread
        let clones: Vec<_> = (0..starts.nrows()).map(|_| model.clone()).collect();
        let losses: Vec<f64> = starts
            .outer_iter()
            .into_par_iter()
            .zip(clones)
            .map(|(start, m)| m.train(&start).unwrap_or(f64::INFINITY))
            .collect();
        assert_eq!(losses.len(), 4);
        assert!(losses.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn test_single_training_point_degenerate() {
        let xt = array![[1.5]];
        let yt = array![[0.8]];
        let sn2 = 0.01;
        let pred = GaussianProcess::params(xt.clone(), yt)
            .test_data(xt, None)
            .hyp(array![0., 0.])
            .log_noise((0.1f64).ln())
            .build()
            .unwrap()
            .predict()
            .unwrap();
        // latent variance collapses below the noise level, the mean
        // shrinks slightly towards the prior
        assert!(pred.fs2[0] <= sn2 + 1e-9);
        assert_abs_diff_eq!(pred.fmu[0], 0.8, epsilon = 0.05);
        assert!(pred.ys2[0] >= sn2);
    }

    #[test]
    fn test_is_lower_triangular() {
        assert!(is_lower_triangular(&array![[1., 0.], [0.5, 2.]]));
        assert!(!is_lower_triangular(&array![[1., 0.3], [0.5, 2.]]));
    }
}
