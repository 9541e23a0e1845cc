//! Gaussian process models built on a jittered squared exponential covariance
//! and its Cholesky (LLT) factor.
//!
//! The covariance between locations $x_{p}$ and $x_{q}$ is
//!
//! $\bm{K_{p, q}} = \alpha^{2}\exp(-\frac{(x_{p} - x_{q})^{2}}{2\rho^{2}}) + \delta_{p, q}\,j$
//!
//! with length scale $\rho$, amplitude $\alpha$ and diagonal jitter $j$
//! ([`JITTER`]) guarding positive definiteness. The latent function values
//! use the non-centered parameterisation
//!
//! $f = \bm{L}\eta, \quad \bm{L}\bm{L}^{\intercal} = \bm{K}, \quad \eta_{i} \sim N(0, 1)$
//!
//! which decouples the geometry fixed by the hyperparameters from the random
//! perturbation, so the joint density is easier for gradient-based samplers
//! to traverse. This is a conditioning technique, not an implementation
//! convenience, and is preserved in every model here.

use faer::{Faer, Mat};
use rand::distributions::Distribution;
use rand::Rng;
use statrs::distribution::{Continuous, Gamma, Normal};
use std::f64::consts::LN_2;

use crate::{density::LogDensity, ModelError};

/// Diagonal jitter added to every covariance matrix
pub const JITTER: f64 = 1e-9;

/// Noise variance of the fixed-hyperparameter prior sampler [`GpPrior`]
const PRIOR_NOISE_VAR: f64 = 0.1;

/// Trait bounds needed for a type $\text{T}$ to be a valid input location
///
/// 1. There must be a covariance function defined on the type with some f64 hyperparameters
///
/// 2. There must be a derivative of this function in terms of the hyperparameters
///
/// Note that the covariance function should never return NaN for finite
/// hyperparameters
pub trait Kernel<const N: usize, Rhs = Self> {
    /// The covariance function $\phi$ on the type $\text{T} --- $
    /// $\phi: (\text{T}, \text{T}, \[\text{f64; \text{N}}\]) \to \text{f64}$
    fn metric(&self, rhs: &Rhs, param: &[f64; N]) -> f64;
    /// The derivative of this covariance function ---
    /// $\phi': (\text{T}, \text{T}, \[\text{f64; \text{N}}\]) \to \[\text{f64; \text{N}}\]$
    fn deriv(&self, rhs: &Rhs, param: &[f64; N]) -> [f64; N];
}

/// Squared exponential kernel on scalar locations, hyperparameters $[\rho, \alpha]$
impl Kernel<2> for f64 {
    fn metric(&self, rhs: &Self, param: &[f64; 2]) -> f64 {
        let [rho, alpha] = *param;
        let d2 = (self - rhs).powi(2);
        alpha.powi(2) * (-0.5 * d2 / rho.powi(2)).exp()
    }

    fn deriv(&self, rhs: &Self, param: &[f64; 2]) -> [f64; 2] {
        let [rho, alpha] = *param;
        let d2 = (self - rhs).powi(2);
        let k = alpha.powi(2) * (-0.5 * d2 / rho.powi(2)).exp();
        [k * d2 / rho.powi(3), 2. * k / alpha]
    }
}

/// Calculate the jittered covariance matrix over a set of locations
///
/// $\bm{K_{p, q}} = \phi(x_{p}, x_{q}, \theta)+\delta_{p, q}\,j$
///
/// where $\phi$ is as defined in [`Kernel::metric`]
#[must_use]
pub fn covariance<const N: usize, T: Kernel<N>>(x: &[T], param: &[f64; N], jitter: f64) -> Mat<f64> {
    let n = x.len();
    Mat::from_fn(n, n, |i, j| Kernel::metric(&x[i], &x[j], param))
        + Mat::from_fn(n, n, |i, j| if i == j { jitter } else { 0. })
}

/// Lower Cholesky factor of the jittered squared exponential covariance
fn latent_factor(x: &[f64], rho: f64, alpha: f64) -> Result<Mat<f64>, ModelError> {
    let autocorr = covariance(x, &[rho, alpha], JITTER);
    Ok(autocorr.cholesky(faer::Side::Lower)?.compute_l())
}

/// Transform independent auxiliary draws into correlated latent values, $f = \bm{L}\eta$
fn scale_latent(l: &Mat<f64>, eta: &[f64]) -> Vec<f64> {
    let n = eta.len();
    let eta = Mat::from_fn(n, 1, |i, _| eta[i]);
    let f = l * eta;
    (0..n).map(|i| *f.get(i, 0)).collect()
}

/// Half normal log density at `value` > 0, through the underlying centered normal
fn half_normal_ln_pdf(unit: &Normal, value: f64) -> f64 {
    LN_2 + unit.ln_pdf(value)
}

/// Decode the leading hyperparameter block `[ln rho, ln alpha, ln sigma]`
fn positive_hyperparameters(position: &[f64]) -> Result<(f64, f64, f64), ModelError> {
    let rho = position[0].exp();
    let alpha = position[1].exp();
    let sigma = position[2].exp();
    if rho.is_finite() && alpha.is_finite() && sigma.is_finite() {
        Ok((rho, alpha, sigma))
    } else {
        Err(ModelError::NonFiniteDensity)
    }
}

#[derive(Clone, Debug)]
/// Bayesian GP regression over observed outputs
///
/// Position layout: $[\ln\rho, \ln\alpha, \ln\sigma, \eta_{1..N}]$. Priors are
/// $\rho \sim \text{Gamma}(4, 4)$, $\alpha \sim N^{+}(1)$,
/// $\sigma \sim N^{+}(1)$, $\eta \sim N(0, 1)$ componentwise, with the
/// likelihood $y_{i} \sim N(f_{i}, \sigma)$.
///
/// # Examples
///
/// ```
/// use latent_lib::{GpFit, LogDensity};
///
/// let x = vec![0., 0.5, 1.];
/// let y = vec![0.1, -0.2, 0.3];
/// let model = GpFit::new(x, y).unwrap();
/// let position = vec![0.; model.dim()];
/// assert!(model.log_density(&position).unwrap().is_finite());
/// ```
pub struct GpFit {
    x: Vec<f64>,
    y: Vec<f64>,
    length_prior: Gamma,
    unit: Normal,
}

impl GpFit {
    /// Creates a new GP regression model
    ///
    /// # Errors
    ///
    /// Returns an error if the inputs are empty or the number of locations
    /// and observations differ
    ///
    /// # Panics
    ///
    /// Relies on the fixed prior constants being valid distribution
    /// parameters : always holds
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self, ModelError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ModelError::MismatchedInputs);
        }
        Ok(GpFit {
            x,
            y,
            length_prior: Gamma::new(4., 4.).expect("fixed prior parameters"),
            unit: Normal::new(0., 1.).expect("fixed prior parameters"),
        })
    }

    /// Latent function values $f = \bm{L}\eta$ at the given position
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong-length position, non finite
    /// hyperparameters or a failed factorisation
    pub fn latent(&self, position: &[f64]) -> Result<Vec<f64>, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        let (rho, alpha, _) = positive_hyperparameters(position)?;
        let l = latent_factor(&self.x, rho, alpha)?;
        Ok(scale_latent(&l, &position[3..]))
    }
}

impl LogDensity for GpFit {
    fn dim(&self) -> usize {
        3 + self.x.len()
    }

    fn log_density(&self, position: &[f64]) -> Result<f64, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        let (rho, alpha, sigma) = positive_hyperparameters(position)?;
        let eta = &position[3..];
        let l = latent_factor(&self.x, rho, alpha)?;
        let f = scale_latent(&l, eta);
        let noise = Normal::new(0., sigma).map_err(|_| ModelError::NonFiniteDensity)?;

        let mut lp = self.length_prior.ln_pdf(rho) + position[0];
        lp += half_normal_ln_pdf(&self.unit, alpha) + position[1];
        lp += half_normal_ln_pdf(&self.unit, sigma) + position[2];
        lp += eta.iter().map(|e| self.unit.ln_pdf(*e)).sum::<f64>();
        lp += self
            .y
            .iter()
            .zip(&f)
            .map(|(y, f)| noise.ln_pdf(y - f))
            .sum::<f64>();
        if lp.is_finite() {
            Ok(lp)
        } else {
            Err(ModelError::NonFiniteDensity)
        }
    }
}

#[derive(Clone, Debug)]
/// Joint GP regression and prediction at query locations
///
/// The $N_{1}$ training and $N_{2}$ query locations are concatenated into one
/// vector before building $\bm{K}$, so the query points share the joint
/// Gaussian structure of the training points. The likelihood covers only the
/// training slice $f_{1..N_{1}}$; predictive draws read the query sub-vector
/// off the same joint latent vector rather than using a closed-form
/// conditional.
///
/// Position layout: $[\ln\rho, \ln\alpha, \ln\sigma, \eta_{1..N_{1}+N_{2}}]$.
pub struct GpPredict {
    x: Vec<f64>,
    y1: Vec<f64>,
    n1: usize,
    length_prior: Gamma,
    unit: Normal,
}

impl GpPredict {
    /// Creates a new joint regression and prediction model
    ///
    /// # Errors
    ///
    /// Returns an error if the training arrays differ in length, or either
    /// the training or query set is empty
    ///
    /// # Panics
    ///
    /// Relies on the fixed prior constants being valid distribution
    /// parameters : always holds
    pub fn new(x1: Vec<f64>, y1: Vec<f64>, x2: Vec<f64>) -> Result<Self, ModelError> {
        if x1.is_empty() || x2.is_empty() || x1.len() != y1.len() {
            return Err(ModelError::MismatchedInputs);
        }
        let n1 = x1.len();
        let mut x = x1;
        x.extend_from_slice(&x2);
        Ok(GpPredict {
            x,
            y1,
            n1,
            length_prior: Gamma::new(4., 4.).expect("fixed prior parameters"),
            unit: Normal::new(0., 1.).expect("fixed prior parameters"),
        })
    }

    /// Number of query locations
    #[must_use]
    pub fn n_query(&self) -> usize {
        self.x.len() - self.n1
    }

    /// Predictive draws $y_{2, n} \sim N(f_{N_{1}+n}, \sigma)$ at the query
    /// locations, for the latent vector implied by the given position
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong-length position, non finite
    /// hyperparameters or a failed factorisation
    pub fn predictive<R: Rng + ?Sized>(
        &self,
        position: &[f64],
        rng: &mut R,
    ) -> Result<Vec<f64>, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        let (rho, alpha, sigma) = positive_hyperparameters(position)?;
        let l = latent_factor(&self.x, rho, alpha)?;
        let f = scale_latent(&l, &position[3..]);
        Ok(f[self.n1..]
            .iter()
            .map(|f| f + sigma * self.unit.sample(rng))
            .collect())
    }
}

impl LogDensity for GpPredict {
    fn dim(&self) -> usize {
        3 + self.x.len()
    }

    fn log_density(&self, position: &[f64]) -> Result<f64, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        let (rho, alpha, sigma) = positive_hyperparameters(position)?;
        let eta = &position[3..];
        let l = latent_factor(&self.x, rho, alpha)?;
        let f = scale_latent(&l, eta);
        let noise = Normal::new(0., sigma).map_err(|_| ModelError::NonFiniteDensity)?;

        let mut lp = self.length_prior.ln_pdf(rho) + position[0];
        lp += half_normal_ln_pdf(&self.unit, alpha) + position[1];
        lp += half_normal_ln_pdf(&self.unit, sigma) + position[2];
        lp += eta.iter().map(|e| self.unit.ln_pdf(*e)).sum::<f64>();
        lp += self
            .y1
            .iter()
            .zip(&f[..self.n1])
            .map(|(y, f)| noise.ln_pdf(y - f))
            .sum::<f64>();
        if lp.is_finite() {
            Ok(lp)
        } else {
            Err(ModelError::NonFiniteDensity)
        }
    }
}

#[derive(Clone, Debug)]
/// Prior-only GP sample paths at fixed hyperparameters
///
/// Hyperparameters are fixed at $\alpha = 1$, $\rho = 1$ and noise variance
/// $0.1$; there are no free parameters and no data. Draws come directly from
/// $y \sim N(0, \bm{K} + 0.1\bm{I})$ to illustrate sample paths of the
/// process.
pub struct GpPrior {
    x: Vec<f64>,
    unit: Normal,
}

impl GpPrior {
    /// Creates a new prior sampler over the given locations
    ///
    /// # Errors
    ///
    /// Returns an error if no locations are given
    ///
    /// # Panics
    ///
    /// Relies on the fixed prior constants being valid distribution
    /// parameters : always holds
    pub fn new(x: Vec<f64>) -> Result<Self, ModelError> {
        if x.is_empty() {
            return Err(ModelError::MismatchedInputs);
        }
        Ok(GpPrior {
            x,
            unit: Normal::new(0., 1.).expect("fixed prior parameters"),
        })
    }

    /// Draw one sample path, $y = \bm{L}z$ with $z_{i} \sim N(0, 1)$
    ///
    /// # Errors
    ///
    /// Returns an error if the covariance stops being positive definite
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>, ModelError> {
        let k = covariance(&self.x, &[1., 1.], PRIOR_NOISE_VAR + JITTER);
        let l = k.cholesky(faer::Side::Lower)?.compute_l();
        let z: Vec<f64> = self.x.iter().map(|_| self.unit.sample(rng)).collect();
        Ok(scale_latent(&l, &z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn covariance_exact_values() {
        // N = 3, x = [0, 1, 2], rho = alpha = 1
        let k = covariance(&[0., 1., 2.], &[1., 1.], JITTER);
        for i in 0..3 {
            assert_approx_eq!(*k.get(i, i), 1. + 1e-9, 1e-12);
        }
        assert_approx_eq!(*k.get(0, 1), (-0.5_f64).exp(), 1e-12);
        assert_approx_eq!(*k.get(1, 2), (-0.5_f64).exp(), 1e-12);
        assert_approx_eq!(*k.get(0, 2), (-2_f64).exp(), 1e-12);
    }

    #[test]
    fn covariance_symmetric_and_factorizable() {
        let x: Vec<f64> = (0..8).map(|i| f64::from(i) * 0.4).collect();
        let k = covariance(&x, &[0.7, 1.3], JITTER);
        for i in 0..8 {
            for j in 0..8 {
                assert_approx_eq!(*k.get(i, j), *k.get(j, i), 1e-12);
            }
        }
        assert!(k.cholesky(faer::Side::Lower).is_ok());
    }

    #[test]
    fn factor_round_trip() {
        let x: Vec<f64> = (0..8).map(|i| f64::from(i) * 0.4).collect();
        let k = covariance(&x, &[0.7, 1.3], JITTER);
        let l = k.cholesky(faer::Side::Lower).unwrap().compute_l();
        let k2 = &l * l.transpose();
        for i in 0..8 {
            for j in 0..8 {
                assert_approx_eq!(*k.get(i, j), *k2.get(i, j), 1e-6);
            }
        }
    }

    #[test]
    fn kernel_deriv_matches_secant() {
        let (x, z) = (0.3, 1.1);
        let p = [0.8, 1.2];
        let [drho, dalpha] = Kernel::deriv(&x, &z, &p);
        let h = 1e-6;
        let drho_fd = (Kernel::metric(&x, &z, &[p[0] + h, p[1]])
            - Kernel::metric(&x, &z, &[p[0] - h, p[1]]))
            / (2. * h);
        let dalpha_fd = (Kernel::metric(&x, &z, &[p[0], p[1] + h])
            - Kernel::metric(&x, &z, &[p[0], p[1] - h]))
            / (2. * h);
        assert_approx_eq!(drho, drho_fd, 1e-6);
        assert_approx_eq!(dalpha, dalpha_fd, 1e-6);
    }

    // constant kernel without jitter is singular, and the failure surfaces
    // as an error rather than NaN
    #[test]
    fn singular_covariance_rejected() {
        let k = covariance(&[0.5, 0.5], &[1., 1.], 0.);
        let err: ModelError = match k.cholesky(faer::Side::Lower) {
            Ok(_) => panic!("expected a Cholesky failure"),
            Err(e) => e.into(),
        };
        assert_eq!(err, ModelError::CholeskyFailure);
    }

    #[test]
    fn fit_density_and_eta_gradient() {
        let model = GpFit::new(vec![0.], vec![0.7]).unwrap();
        let position = vec![0.; model.dim()];
        assert!(model.log_density(&position).unwrap().is_finite());
        // at rho = alpha = sigma = 1, eta = 0: d lp / d eta_0 = y * L_00
        let grad = model.gradient(&position).unwrap();
        assert_approx_eq!(grad[3], 0.7, 1e-5);
    }

    #[test]
    fn fit_rejects_overflowing_hyperparameters() {
        let model = GpFit::new(vec![0., 1.], vec![0.1, 0.2]).unwrap();
        let mut position = vec![0.; model.dim()];
        position[0] = 1000.;
        assert_eq!(
            model.log_density(&position).unwrap_err(),
            ModelError::NonFiniteDensity
        );
    }

    #[test]
    fn mismatched_inputs_rejected() {
        assert_eq!(
            GpFit::new(vec![0., 1.], vec![0.1]).unwrap_err(),
            ModelError::MismatchedInputs
        );
        let model = GpFit::new(vec![0., 1.], vec![0.1, 0.2]).unwrap();
        assert_eq!(
            model.log_density(&[0.; 4]).unwrap_err(),
            ModelError::MismatchedInputs
        );
    }

    #[test]
    fn predict_joint_layout_and_draws() {
        let model = GpPredict::new(vec![0., 1.], vec![0.5, -0.3], vec![0.5, 1.5]).unwrap();
        assert_eq!(model.dim(), 3 + 4);
        assert_eq!(model.n_query(), 2);
        let position = vec![0.; model.dim()];
        assert!(model.log_density(&position).unwrap().is_finite());

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let draws = model.predictive(&position, &mut rng).unwrap();
        assert_eq!(draws.len(), 2);
        assert!(draws.iter().all(|d| d.is_finite()));

        // same seed, same draws
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(draws, model.predictive(&position, &mut rng).unwrap());
    }

    // the training slice alone determines the likelihood: perturbing a query
    // auxiliary variable moves the density only through its N(0, 1) prior
    #[test]
    fn predict_query_eta_only_enters_prior() {
        let model = GpPredict::new(vec![0., 1.], vec![0.5, -0.3], vec![2.]).unwrap();
        let mut position = vec![0.; model.dim()];
        let base = model.log_density(&position).unwrap();
        position[3 + 2] = 1.3;
        let moved = model.log_density(&position).unwrap();
        assert_approx_eq!(base - moved, 0.5 * 1.3_f64.powi(2), 1e-9);
    }

    #[test]
    fn prior_sample_paths() {
        let x: Vec<f64> = (0..5).map(f64::from).collect();
        let sampler = GpPrior::new(x).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let path = sampler.sample(&mut rng).unwrap();
        assert_eq!(path.len(), 5);
        assert!(path.iter().all(|v| v.is_finite()));

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(path, sampler.sample(&mut rng).unwrap());
    }
}
