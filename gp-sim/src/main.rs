use std::time::Instant;

use latent_lib::{GpFit, GpPredict, GpPrior, LogDensity};
use ordered_float::NotNan;
use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use statrs::distribution::Normal;

/// smooth trend the simulated observations are drawn around
fn trend(x: f64) -> f64 {
    0.8 * (2. * x).sin() + 0.3 * x
}

fn main() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let noise = Normal::new(0., 0.2).unwrap();

    // simulate noisy observations on a grid
    let n: usize = 40;
    let x: Vec<f64> = (0..n).map(|i| i as f64 * 3. / (n as f64)).collect();
    let y: Vec<f64> = x
        .iter()
        .map(|x| trend(*x) + noise.sample(&mut rng))
        .collect();

    let model = GpFit::new(x.clone(), y.clone()).unwrap();
    // position at the generating hyperparameters: rho = 1, alpha = 1, sigma = 0.2
    let mut position = vec![0.; model.dim()];
    position[2] = 0.2_f64.ln();

    let now = Instant::now();
    let lp = model.log_density(&position).unwrap();
    println!("log density at truth: {lp:.3} ({:.2?})", now.elapsed());

    let now = Instant::now();
    let grad = model.gradient(&position).unwrap();
    let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
    println!("gradient norm at truth: {grad_norm:.3} ({:.2?})", now.elapsed());

    // length-scale profile of the log density, evaluations in parallel: the
    // models are pure so independent proposals are safe to run concurrently
    let rhos: Vec<f64> = (1..=30).map(|i| f64::from(i) * 0.1).collect();
    let now = Instant::now();
    let profile: Vec<(f64, f64)> = rhos
        .par_iter()
        .map(|rho| {
            let mut position = position.clone();
            position[0] = rho.ln();
            (*rho, model.log_density(&position).unwrap())
        })
        .collect();
    println!("profiled {} length scales in {:.2?}", profile.len(), now.elapsed());
    let (best_rho, best_lp) = *profile
        .iter()
        .max_by_key(|(_, lp)| NotNan::new(*lp).expect("NaN from log density"))
        .unwrap();
    println!("best grid length scale: {best_rho:.1} (log density {best_lp:.3})");

    // joint regression and prediction at held out locations
    let x2 = vec![3.1, 3.3, 3.5];
    let predict = GpPredict::new(x, y, x2.clone()).unwrap();
    let mut joint = vec![0.; predict.dim()];
    joint[2] = 0.2_f64.ln();
    println!("joint log density: {:.3}", predict.log_density(&joint).unwrap());
    let draws = predict.predictive(&joint, &mut rng).unwrap();
    for (x, draw) in x2.iter().zip(&draws) {
        println!("predictive draw at {x}: {draw:.3} (trend {:.3})", trend(*x));
    }

    // prior-only sample paths at fixed hyperparameters
    let grid: Vec<f64> = (0..50).map(|i| i as f64 * 0.2).collect();
    let prior = GpPrior::new(grid).unwrap();
    for path in 0..3 {
        let draw = prior.sample(&mut rng).unwrap();
        let max = draw.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let min = draw.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        println!("prior path {path}: range {:.3}", max - min);
    }
}
