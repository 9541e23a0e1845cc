//! This library implements latent Gaussian process (GP) regression models and
//! ordinal item response theory (IRT) models as pure log density functions,
//! for use with an external gradient-based MCMC sampler (HMC / NUTS).
//!
//! Each model is a stateless function of its data and an unconstrained
//! parameter vector:
//!
//! $ \theta \mapsto \ln p(\theta, y) $
//!
//! evaluated repeatedly by the driving sampler. No sampling loop lives here.
//!
//! # Implementation
//!
//! * Based of [Faer](https://github.com/sarah-ek/faer-rs) to provide linear algebra subroutines
//! * GP covariance from a squared exponential kernel, factored by Cholesky (LLT) decomposition
//! * GP latent values use the non-centered parameterisation $f = L\eta$, $\eta \sim N(0, 1)$
//! * IRT response probabilities from the cumulative step formulation of the
//!   partial credit model, with the generalised form adding a per item discrimination
//! * Person ability admits a latent linear regression on rescaled covariates
//! * Positive parameters are sampled on the log scale with the Jacobian term included
//! * A failed Cholesky factorisation or non finite density is surfaced as an error,
//!   never as a NaN: the caller treats it as a rejected proposal
//! * Dimensionality issue : GP evaluations scale as $O(n^{3})$ in the number of locations
//!
//! # Reference
//!
//! Gaussian Processes for Machine Learning, C. E. Rasmussen & C. K. I. Williams, 2006
//!
//! Masters, G. N. A Rasch model for partial credit scoring.
//! Psychometrika 47, 149–174 (1982).
//! <https://doi.org/10.1007/BF02296272>
//!
//! Muraki, E. A Generalized Partial Credit Model: Application of an EM Algorithm.
//! Applied Psychological Measurement 16, 159–176 (1992).
//! <https://doi.org/10.1177/014662169201600206>
//!
//! Betancourt, M. A Conceptual Introduction to Hamiltonian Monte Carlo.
//! arXiv:1701.02434 \[stat.ME\]
//! <https://doi.org/10.48550/arXiv.1701.02434>
//!
//! Gelman, A. Scaling regression inputs by dividing by two standard deviations.
//! Statistics in Medicine 27, 2865–2873 (2008).
//! <https://doi.org/10.1002/sim.3107>

#![warn(
    clippy::pedantic,
    clippy::suspicious,
    clippy::perf,
    clippy::complexity,
    clippy::style
)]
#![forbid(unsafe_code)]
#![allow(clippy::doc_markdown)]

use faer_cholesky::llt::CholeskyError;

pub mod density;
pub mod gp;
pub mod irt;
pub mod regression;

pub use density::LogDensity;
pub use gp::{covariance, GpFit, GpPredict, GpPrior, Kernel, JITTER};
pub use irt::{expand_difficulties, ordinal_ln_prob, ordinal_probabilities, Gpcm, Pcm, Responses};
pub use regression::Covariates;

#[derive(Debug, Clone, PartialEq)]
/// Error in a model evaluation or in its data contract
pub enum ModelError {
    /// the input arrays are of different length
    MismatchedInputs,
    /// cholesky decomposition failure
    CholeskyFailure,
    /// a density term evaluated to a non finite value
    NonFiniteDensity,
    /// ordinal score above the maximum declared for its item
    ScoreOutOfRange {
        /// response record index
        response: usize,
        /// observed score
        score: usize,
        /// maximum score of the item
        max: usize,
    },
    /// item or person index outside the declared ranges
    IndexOutOfRange {
        /// response record index
        response: usize,
    },
    /// an item was declared with a maximum score of zero
    EmptyItem {
        /// item index
        item: usize,
    },
    /// the first covariate column must be the constant intercept
    MissingIntercept,
    /// a non intercept covariate column has zero variance
    ConstantColumn {
        /// covariate column index
        column: usize,
    },
}

impl From<CholeskyError> for ModelError {
    fn from(_e: CholeskyError) -> ModelError {
        ModelError::CholeskyFailure
    }
}
