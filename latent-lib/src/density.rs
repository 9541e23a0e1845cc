//! The contract between a model and the external sampler.
//!
//! A model is a pure function from an unconstrained parameter vector to a
//! scalar log density. The sampler owns all iteration: it proposes positions,
//! asks for the density and its gradient, and decides acceptance. An `Err`
//! from [`LogDensity::log_density`] is the invalid-proposal signal; NaN is
//! never returned in place of one.

use crate::ModelError;

/// A joint log density over an unconstrained parameter vector.
///
/// Implementations must be referentially transparent: evaluations share no
/// mutable state, so independent proposals (or chains) may be evaluated
/// concurrently. Each call recomputes from scratch as the position changes
/// between every proposal.
///
/// Positive constrained quantities are expected on the log scale within the
/// position vector, with the implementation adding the log Jacobian term, so
/// that the density is with respect to $\mathbb{R}^{d}$.
pub trait LogDensity {
    /// Number of unconstrained parameters
    fn dim(&self) -> usize;

    /// Evaluate $\ln p(\theta, y)$ at the given position
    ///
    /// # Errors
    ///
    /// Returns an error if the position has the wrong length, if a covariance
    /// matrix stops being positive definite, or if any density term evaluates
    /// non finite. Callers must treat an error as a rejected proposal.
    fn log_density(&self, position: &[f64]) -> Result<f64, ModelError>;

    /// Gradient of [`LogDensity::log_density`] with respect to the position
    ///
    /// The provided implementation uses central finite differences with step
    /// $h_{i} = \sqrt[3]{\varepsilon} \cdot \max(1, |\theta_{i}|)$. Models
    /// with analytic derivatives may override it.
    ///
    /// # Errors
    ///
    /// Returns an error under the same conditions as
    /// [`LogDensity::log_density`], at any probe point.
    fn gradient(&self, position: &[f64]) -> Result<Vec<f64>, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        let step_base = f64::EPSILON.cbrt();
        let mut probe = position.to_vec();
        let mut grad = vec![0.; position.len()];
        for (i, g) in grad.iter_mut().enumerate() {
            let h = step_base * position[i].abs().max(1.);
            probe[i] = position[i] + h;
            let upper = self.log_density(&probe)?;
            probe[i] = position[i] - h;
            let lower = self.log_density(&probe)?;
            probe[i] = position[i];
            *g = (upper - lower) / (2. * h);
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    // isotropic Gaussian: gradient is -theta, known in closed form
    struct Quadratic {
        dim: usize,
    }

    impl LogDensity for Quadratic {
        fn dim(&self) -> usize {
            self.dim
        }

        fn log_density(&self, position: &[f64]) -> Result<f64, ModelError> {
            if position.len() != self.dim {
                return Err(ModelError::MismatchedInputs);
            }
            Ok(-0.5 * position.iter().map(|t| t.powi(2)).sum::<f64>())
        }
    }

    #[test]
    fn finite_difference_gradient() {
        let model = Quadratic { dim: 4 };
        let position = [0.3, -1.2, 0., 5.7];
        let grad = model.gradient(&position).unwrap();
        for (g, t) in grad.iter().zip(position.iter()) {
            assert_approx_eq!(*g, -t, 1e-6);
        }
    }

    #[test]
    fn wrong_length_rejected() {
        let model = Quadratic { dim: 4 };
        assert_eq!(
            model.log_density(&[0.; 3]).unwrap_err(),
            ModelError::MismatchedInputs
        );
        assert_eq!(
            model.gradient(&[0.; 5]).unwrap_err(),
            ModelError::MismatchedInputs
        );
    }
}
