//! Covariate adjustment for the latent regression of person ability.
//!
//! A shared weak prior on the regression coefficients is only meaningful when
//! the covariates sit on comparable numeric scales. Each non intercept column
//! of the $J \times K$ design matrix $\bm{W}$ is therefore rescaled:
//! continuous columns are centered and divided by twice their sample standard
//! deviation, binary columns are centered and divided by $\max - \min = 1$.
//! Coefficients estimated against the adjusted matrix are mapped back to the
//! original covariate scale for reporting through the inverse affine
//! transform, so reported effects stay interpretable in original units.

use faer::Mat;

use crate::ModelError;

/// A design matrix together with its rescaled form and the centering and
/// scaling constants of each column
///
/// Column 0 must be the constant 1 (the intercept); it is left untouched.
/// The intercept-only case $K = 1$ is the degenerate no-regression model,
/// where the single coefficient reduces to the ability mean.
///
/// # Examples
///
/// ```
/// use faer::mat;
/// use latent_lib::Covariates;
///
/// let w = mat![[1., 170.], [1., 155.], [1., 162.]];
/// let covariates = Covariates::new(w).unwrap();
/// let lambda = covariates.to_original_scale(&[0.4, 0.3]).unwrap();
/// let back = covariates.to_adjusted_scale(&lambda).unwrap();
/// assert!((back[1] - 0.3).abs() < 1e-12);
/// ```
#[derive(Clone, Debug)]
pub struct Covariates {
    adjusted: Mat<f64>,
    centers: Vec<f64>,
    scales: Vec<f64>,
}

impl Covariates {
    /// Creates the adjusted design matrix from a raw one
    ///
    /// # Errors
    ///
    /// Returns an error if the matrix is empty, column 0 is not the constant
    /// 1, or a non intercept column has zero variance (a configuration error
    /// distinct from the intercept itself)
    pub fn new(w: Mat<f64>) -> Result<Self, ModelError> {
        let n = w.nrows();
        let k = w.ncols();
        if n == 0 || k == 0 {
            return Err(ModelError::MismatchedInputs);
        }
        if (0..n).any(|r| *w.get(r, 0) != 1.) {
            return Err(ModelError::MissingIntercept);
        }
        let mut centers = vec![0.; k];
        let mut scales = vec![1.; k];
        for c in 1..k {
            let col: Vec<f64> = (0..n).map(|r| *w.get(r, c)).collect();
            let min = col.iter().fold(f64::INFINITY, |a, &b| a.min(b));
            let max = col.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            if max == min {
                return Err(ModelError::ConstantColumn { column: c });
            }
            #[allow(clippy::cast_precision_loss)]
            let mean = col.iter().sum::<f64>() / n as f64;
            centers[c] = mean;
            scales[c] = if col.iter().all(|&v| v == 0. || v == 1.) {
                max - min
            } else {
                #[allow(clippy::cast_precision_loss)]
                let variance =
                    col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.);
                2. * variance.sqrt()
            };
        }
        let adjusted = Mat::from_fn(n, k, |r, c| (*w.get(r, c) - centers[c]) / scales[c]);
        Ok(Covariates {
            adjusted,
            centers,
            scales,
        })
    }

    /// The degenerate no-regression design: a single constant 1 column
    ///
    /// # Errors
    ///
    /// Returns an error if there are no persons
    pub fn intercept_only(n_persons: usize) -> Result<Self, ModelError> {
        Self::new(Mat::from_fn(n_persons, 1, |_, _| 1.))
    }

    /// Number of rows (persons)
    #[must_use]
    pub fn n_persons(&self) -> usize {
        self.adjusted.nrows()
    }

    /// Number of columns (covariates, intercept included)
    #[must_use]
    pub fn n_covariates(&self) -> usize {
        self.adjusted.ncols()
    }

    /// The rescaled design matrix $\bm{W}^{adj}$
    #[must_use]
    pub fn adjusted(&self) -> &Mat<f64> {
        &self.adjusted
    }

    /// The linear predictor $\bm{W}^{adj}\lambda$
    ///
    /// # Errors
    ///
    /// Returns an error if the coefficient vector length does not match the
    /// number of columns
    pub fn linear_predictor(&self, lambda: &[f64]) -> Result<Vec<f64>, ModelError> {
        if lambda.len() != self.n_covariates() {
            return Err(ModelError::MismatchedInputs);
        }
        let lambda = Mat::from_fn(lambda.len(), 1, |i, _| lambda[i]);
        let mu = &self.adjusted * lambda;
        Ok((0..self.n_persons()).map(|r| *mu.get(r, 0)).collect())
    }

    /// Map adjusted-scale coefficients to the original covariate scale
    ///
    /// # Errors
    ///
    /// Returns an error if the coefficient vector length does not match the
    /// number of columns
    pub fn to_original_scale(&self, lambda_adj: &[f64]) -> Result<Vec<f64>, ModelError> {
        if lambda_adj.len() != self.n_covariates() {
            return Err(ModelError::MismatchedInputs);
        }
        let mut lambda = vec![0.; lambda_adj.len()];
        for c in 1..lambda_adj.len() {
            lambda[c] = lambda_adj[c] / self.scales[c];
            lambda[0] -= lambda_adj[c] * self.centers[c] / self.scales[c];
        }
        lambda[0] += lambda_adj[0];
        Ok(lambda)
    }

    /// Map original-scale coefficients onto the adjusted basis, the inverse
    /// of [`Covariates::to_original_scale`]
    ///
    /// # Errors
    ///
    /// Returns an error if the coefficient vector length does not match the
    /// number of columns
    pub fn to_adjusted_scale(&self, lambda: &[f64]) -> Result<Vec<f64>, ModelError> {
        if lambda.len() != self.n_covariates() {
            return Err(ModelError::MismatchedInputs);
        }
        let mut lambda_adj = vec![0.; lambda.len()];
        for c in 1..lambda.len() {
            lambda_adj[c] = lambda[c] * self.scales[c];
            lambda_adj[0] += lambda[c] * self.centers[c];
        }
        lambda_adj[0] += lambda[0];
        Ok(lambda_adj)
    }
}
