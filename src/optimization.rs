//! Hyperparameter optimization with the Cobyla derivative-free
//! optimizer, plus multistart helpers for random restarts.

use ndarray::{s, Array1, Array2, Zip};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

/// Tuning knobs of the Cobyla runs
pub struct CobylaParams {
    /// Initial trust-region radius in log-hyperparameter space
    pub rhobeg: f64,
    /// Relative tolerance on the objective for convergence
    pub ftol_rel: f64,
    /// Hard cap on objective evaluations per start
    pub maxeval: usize,
}

impl Default for CobylaParams {
    fn default() -> Self {
        CobylaParams {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
            maxeval: 200,
        }
    }
}

/// Starting points for a multistart optimization: the heuristic guess
/// `hyp0` in row 0, then `n_start` rows drawn uniformly inside `bounds`
/// with a seeded generator so restarts are reproducible.
pub fn prepare_multistart(
    n_start: usize,
    hyp0: &Array1<f64>,
    bounds: &[(f64, f64)],
    seed: u64,
) -> Array2<f64> {
    let mut starts = Array2::zeros((n_start + 1, hyp0.len()));
    starts.row_mut(0).assign(hyp0);

    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    Zip::from(starts.slice_mut(s![1.., ..]).rows_mut()).for_each(|mut row| {
        for (v, (lo, up)) in row.iter_mut().zip(bounds) {
            *v = rng.gen_range(*lo..*up);
        }
    });
    starts
}

/// Minimize `objfn` from `hyp0` inside `bounds` with Cobyla.
///
/// Returns the best objective value and the corresponding
/// hyperparameter vector. A failed run returns `f64::INFINITY` as the
/// value so callers comparing restarts discard it naturally.
pub fn optimize_hyp<ObjF>(
    objfn: ObjF,
    hyp0: &Array1<f64>,
    bounds: &[(f64, f64)],
    cobyla: CobylaParams,
) -> (f64, Array1<f64>)
where
    ObjF: Fn(&[f64], &mut ()) -> f64,
{
    use cobyla::{minimize, Func, RhoBeg, StopTols};

    let cons: Vec<&dyn Func<()>> = vec![];
    let hyp0 = hyp0.to_owned().into_raw_vec();

    match minimize(
        |x, u| objfn(x, u),
        &hyp0,
        bounds,
        &cons,
        (),
        cobyla.maxeval,
        RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((_, x_opt, fval)) => {
            log::debug!("Cobyla run finished with fval={fval}");
            let fval = if f64::is_nan(fval) {
                f64::INFINITY
            } else {
                fval
            };
            (fval, Array1::from(x_opt))
        }
        Err((status, x_opt, _)) => {
            log::warn!("Cobyla optimizer failed with status={status:?}");
            (f64::INFINITY, Array1::from(x_opt))
        }
    }
}
