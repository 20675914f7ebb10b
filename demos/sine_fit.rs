//! Fits a noisy sine with a squared-exponential GP: multistart Cobyla
//! runs in parallel over independent model clones, then the best
//! hyperparameters drive a batched prediction on a dense grid.

use exact_gp::hyperparameters::init_se;
use exact_gp::optimization::{optimize_hyp, prepare_multistart, CobylaParams};
use exact_gp::GaussianProcess;

use ndarray::{Array, ArrayView1, Axis};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;

fn main() {
    env_logger::init();

    let n_train = 30;
    let noise_std = 0.1;
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let xt = Array::linspace(0., 2. * std::f64::consts::PI, n_train).insert_axis(Axis(1));
    let noise = Array::random_using((n_train, 1), Normal::new(0., noise_std).unwrap(), &mut rng);
    let yt = xt.mapv(f64::sin) + noise;

    let xs = Array::linspace(-1., 7.3, 50).insert_axis(Axis(1));
    let ys = xs.mapv(f64::sin);

    let model = GaussianProcess::params(xt.clone(), yt.clone())
        .kernel_name("radial_basis")
        .test_data(xs.clone(), Some(ys))
        .log_noise(noise_std.ln())
        .build()
        .expect("valid model configuration");

    let hyp0 = init_se(&xt.view(), &yt.view());
    let bounds = vec![(-3., 3.); hyp0.len()];
    let starts = prepare_multistart(4, &hyp0, &bounds, 42);

    // one clone per restart, moved into its thread: the model itself is
    // not shareable across threads because of its noise cache
    let clones: Vec<_> = (0..starts.nrows()).map(|_| model.clone()).collect();
    let (loss, hyp_opt) = starts
        .outer_iter()
        .into_par_iter()
        .zip(clones)
        .map(|(start, m)| {
            let objfn =
                |x: &[f64], _u: &mut ()| m.train(&ArrayView1::from(x)).unwrap_or(f64::INFINITY);
            optimize_hyp(objfn, &start.to_owned(), &bounds, CobylaParams::default())
        })
        .min_by(|(f1, _), (f2, _)| f1.partial_cmp(f2).expect("no NaN loss"))
        .expect("at least one start");

    println!("best loss = {loss:.4}, hyp = {hyp_opt}");

    let mut model = model;
    model.set_hyp(hyp_opt).expect("hyperparameter length");
    let pred = model.predict().expect("prediction");

    let lp = pred.lp.expect("test targets were supplied");
    println!("  x       truth    mean     var      lp");
    for i in 0..xs.nrows() {
        println!(
            "{:7.3} {:8.4} {:8.4} {:8.4} {:8.3}",
            xs[[i, 0]],
            xs[[i, 0]].sin(),
            pred.fmu[i],
            pred.fs2[i],
            lp[i]
        );
    }
    println!("mean log predictive probability = {:.4}", lp.mean().unwrap());
}
