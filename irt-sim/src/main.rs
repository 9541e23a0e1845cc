use faer::Mat;
use itertools::iproduct;
use latent_lib::{
    expand_difficulties, ordinal_probabilities, Covariates, Gpcm, LogDensity, Pcm, Responses,
};
use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// inverse-CDF draw of one ordinal score
fn draw_score<R: Rng>(rng: &mut R, probs: &[f64]) -> usize {
    let u: f64 = rng.gen();
    let mut acc = 0.;
    for (k, p) in probs.iter().enumerate() {
        acc += p;
        if u < acc {
            return k;
        }
    }
    probs.len() - 1
}

fn main() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let unit = Normal::new(0., 1.).unwrap();

    let n_persons = 60;
    let max_scores = vec![3, 2, 2, 1, 3];
    let n_items = max_scores.len();

    // generating item parameters: free step difficulties drawn N(0, 1),
    // expanded so each item's difficulties sum to zero
    let n_free: usize = max_scores.iter().map(|m| m - 1).sum();
    let free_true: Vec<f64> = (0..n_free).map(|_| unit.sample(&mut rng)).collect();
    let betas = expand_difficulties(&free_true, &max_scores).unwrap();

    // design matrix: intercept, a continuous column, a binary column
    let continuous: Vec<f64> = (0..n_persons)
        .map(|_| 30. + 8. * unit.sample(&mut rng))
        .collect();
    let binary: Vec<f64> = (0..n_persons)
        .map(|_| if rng.gen_bool(0.5) { 1. } else { 0. })
        .collect();
    let w = Mat::from_fn(n_persons, 3, |r, c| match c {
        0 => 1.,
        1 => continuous[r],
        _ => binary[r],
    });
    let covariates = Covariates::new(w).unwrap();

    // abilities from the latent regression on the adjusted basis
    let lambda_true = [0.2, 0.5, -0.3];
    let mu = covariates.linear_predictor(&lambda_true).unwrap();
    let thetas: Vec<f64> = mu.iter().map(|m| m + unit.sample(&mut rng)).collect();

    // every person answers every item
    let mut items = Vec::with_capacity(n_items * n_persons);
    let mut persons = Vec::with_capacity(n_items * n_persons);
    let mut scores = Vec::with_capacity(n_items * n_persons);
    for (i, j) in iproduct!(0..n_items, 0..n_persons) {
        let probs = ordinal_probabilities(thetas[j], 1., &betas[i]);
        items.push(i);
        persons.push(j);
        scores.push(draw_score(&mut rng, &probs));
    }
    let data = Responses::new(n_persons, items, persons, scores, max_scores.clone()).unwrap();

    // PCM position assembled from the generating values:
    // [beta_free, lambda, ln sigma, theta]
    let mut truth = free_true.clone();
    truth.extend_from_slice(&lambda_true);
    truth.push(0.);
    truth.extend_from_slice(&thetas);

    let pcm = Pcm::new(data.clone(), covariates.clone()).unwrap();
    println!("pcm: {} responses, {} parameters", data.len(), pcm.dim());
    let at_truth = pcm.log_density(&truth).unwrap();
    let at_origin = pcm.log_density(&vec![0.; pcm.dim()]).unwrap();
    println!("log density at truth {at_truth:.1}, at origin {at_origin:.1}");

    for (i, betas) in pcm.step_difficulties(&truth).unwrap().iter().enumerate() {
        println!("item {i} difficulties {betas:?} (sum {:+.1e})", betas.iter().sum::<f64>());
    }
    println!(
        "coefficients, original scale: {:?}",
        pcm.original_scale_coefficients(&truth).unwrap()
    );

    // GPCM over the same records: discriminations at 1 (ln alpha = 0), no
    // free ability scale
    let gpcm = Gpcm::new(data, covariates).unwrap();
    let mut gpcm_truth = vec![0.; n_items];
    gpcm_truth.extend_from_slice(&free_true);
    gpcm_truth.extend_from_slice(&lambda_true);
    gpcm_truth.extend_from_slice(&thetas);
    println!("gpcm: {} parameters", gpcm.dim());
    println!(
        "gpcm log density at truth {:.1}, discriminations {:?}",
        gpcm.log_density(&gpcm_truth).unwrap(),
        gpcm.discriminations(&gpcm_truth).unwrap()
    );
}
