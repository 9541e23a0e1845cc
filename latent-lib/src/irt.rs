//! Ordinal item response models: the partial credit model (PCM) and its
//! generalised form (GPCM), with a latent regression of person ability on
//! observed covariates.
//!
//! For a person with ability $\theta$ answering item $i$ with discrimination
//! $\alpha_{i}$ and step difficulties $\beta_{i, 1..m_{i}}$, the probability
//! of score $y \in \{0, ..., m_{i}\}$ is
//!
//! $\Pr(Y = y) = \frac{\exp \sum_{s=1}^{y} (\alpha_{i}\theta - \beta_{i, s})}{\sum_{k=0}^{m_{i}} \exp \sum_{s=1}^{k} (\alpha_{i}\theta - \beta_{i, s})}$
//!
//! with the empty sum for $y = 0$ equal to zero. Evaluation is in log space
//! through a max-shifted log-sum-exp over the cumulative sums, so large
//! $\alpha\theta$ or many categories cannot overflow. A dichotomous item
//! ($m_{i} = 1$) collapses to the two parameter logistic through the same
//! formula; there is no separate code path for it.
//!
//! Identifiability: within each item the step difficulties sum to zero. The
//! last difficulty is derived, not sampled, so the external sampler explores
//! only $m_{i} - 1$ free dimensions per item.

use statrs::distribution::{Continuous, Exp, LogNormal, Normal, StudentsT};

use crate::{density::LogDensity, regression::Covariates, ModelError};

/// Item response records with their data contract
///
/// Holds parallel arrays of (item index, person index, score) triples plus
/// the per item maximum scores. All validation happens at construction, so a
/// constructed value can be evaluated without further checks.
#[derive(Clone, Debug)]
pub struct Responses {
    n_persons: usize,
    items: Vec<usize>,
    persons: Vec<usize>,
    scores: Vec<usize>,
    max_scores: Vec<usize>,
}

impl Responses {
    /// Creates a validated set of response records
    ///
    /// `max_scores` has one entry per item; indices are zero based.
    ///
    /// # Errors
    ///
    /// Fails fast, before any likelihood work, on mismatched array lengths,
    /// an item with maximum score zero, an out of range item or person
    /// index, or a score above its item's maximum.
    pub fn new(
        n_persons: usize,
        items: Vec<usize>,
        persons: Vec<usize>,
        scores: Vec<usize>,
        max_scores: Vec<usize>,
    ) -> Result<Self, ModelError> {
        if items.len() != persons.len() || items.len() != scores.len() {
            return Err(ModelError::MismatchedInputs);
        }
        for (item, m) in max_scores.iter().enumerate() {
            if *m == 0 {
                return Err(ModelError::EmptyItem { item });
            }
        }
        for r in 0..items.len() {
            if items[r] >= max_scores.len() || persons[r] >= n_persons {
                return Err(ModelError::IndexOutOfRange { response: r });
            }
            let max = max_scores[items[r]];
            if scores[r] > max {
                return Err(ModelError::ScoreOutOfRange {
                    response: r,
                    score: scores[r],
                    max,
                });
            }
        }
        Ok(Responses {
            n_persons,
            items,
            persons,
            scores,
            max_scores,
        })
    }

    /// Number of items
    #[must_use]
    pub fn n_items(&self) -> usize {
        self.max_scores.len()
    }

    /// Number of persons
    #[must_use]
    pub fn n_persons(&self) -> usize {
        self.n_persons
    }

    /// Number of response records
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether there are no response records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Per item maximum scores
    #[must_use]
    pub fn max_scores(&self) -> &[usize] {
        &self.max_scores
    }

    /// Number of free step difficulty parameters, $\sum_{i} (m_{i} - 1)$
    #[must_use]
    pub fn n_free_difficulties(&self) -> usize {
        self.max_scores.iter().map(|m| m - 1).sum()
    }
}

/// Expand free step difficulties into the full per item sets
///
/// Within each item the last difficulty is the negative sum of the item's
/// other difficulties, so every returned set sums to zero. A dichotomous
/// item contributes no free parameters and gets the fixed $\beta = 0$.
///
/// # Errors
///
/// Returns an error if an item has maximum score zero or the number of free
/// parameters does not match $\sum_{i} (m_{i} - 1)$.
pub fn expand_difficulties(
    free: &[f64],
    max_scores: &[usize],
) -> Result<Vec<Vec<f64>>, ModelError> {
    let mut needed = 0;
    for (item, m) in max_scores.iter().enumerate() {
        if *m == 0 {
            return Err(ModelError::EmptyItem { item });
        }
        needed += m - 1;
    }
    if free.len() != needed {
        return Err(ModelError::MismatchedInputs);
    }
    let mut expanded = Vec::with_capacity(max_scores.len());
    let mut offset = 0;
    for m in max_scores {
        let head = &free[offset..offset + m - 1];
        offset += m - 1;
        let mut betas = head.to_vec();
        betas.push(-head.iter().sum::<f64>());
        expanded.push(betas);
    }
    Ok(expanded)
}

/// Cumulative logits $c_{k} = \sum_{s=1}^{k} (\alpha\theta - \beta_{s})$, $c_{0} = 0$
fn cumulative_logits(theta: f64, alpha: f64, betas: &[f64]) -> Vec<f64> {
    let mut cum = Vec::with_capacity(betas.len() + 1);
    cum.push(0.);
    let mut acc = 0.;
    for beta in betas {
        acc += alpha * theta - beta;
        cum.push(acc);
    }
    cum
}

/// Max-shifted log-sum-exp; safe for logits far outside the exp range
fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Log probability of an ordinal score under the cumulative step formulation
///
/// `betas` are the item's step difficulties (already expanded); `alpha` is
/// the discrimination, fixed to 1 for the plain partial credit form.
///
/// # Panics
///
/// Panics if `score` exceeds the number of steps : upstream data validation
/// guarantees it does not
#[must_use]
pub fn ordinal_ln_prob(theta: f64, alpha: f64, betas: &[f64], score: usize) -> f64 {
    let cum = cumulative_logits(theta, alpha, betas);
    cum[score] - log_sum_exp(&cum)
}

/// Probabilities of every score $0..=m$ for one item
#[must_use]
pub fn ordinal_probabilities(theta: f64, alpha: f64, betas: &[f64]) -> Vec<f64> {
    let cum = cumulative_logits(theta, alpha, betas);
    let norm = log_sum_exp(&cum);
    cum.iter().map(|c| (c - norm).exp()).collect()
}

#[derive(Clone, Debug)]
/// Partial credit model with latent regression
///
/// Discrimination is fixed at 1 for every item. Position layout:
/// $[\beta^{free}_{1..B}, \lambda_{1..K}, \ln\sigma, \theta_{1..J}]$ with
/// priors $\beta^{free} \sim N(0, 3)$, $\lambda \sim t_{3}(0, 1)$,
/// $\sigma \sim \text{Exponential}(0.1)$ and
/// $\theta_{j} \sim N((\bm{W}^{adj}\lambda)_{j}, \sigma)$.
///
/// # Examples
///
/// ```
/// use latent_lib::{Covariates, LogDensity, Pcm, Responses};
///
/// let data = Responses::new(2, vec![0, 0, 1], vec![0, 1, 1], vec![2, 0, 1], vec![2, 1]).unwrap();
/// let covariates = Covariates::intercept_only(2).unwrap();
/// let model = Pcm::new(data, covariates).unwrap();
/// let position = vec![0.; model.dim()];
/// assert!(model.log_density(&position).unwrap().is_finite());
/// ```
pub struct Pcm {
    data: Responses,
    covariates: Covariates,
    step_prior: Normal,
    coef_prior: StudentsT,
    scale_prior: Exp,
}

impl Pcm {
    /// Creates a new partial credit model
    ///
    /// # Errors
    ///
    /// Returns an error if the covariate matrix rows do not match the number
    /// of persons
    ///
    /// # Panics
    ///
    /// Relies on the fixed prior constants being valid distribution
    /// parameters : always holds
    pub fn new(data: Responses, covariates: Covariates) -> Result<Self, ModelError> {
        if covariates.n_persons() != data.n_persons() {
            return Err(ModelError::MismatchedInputs);
        }
        Ok(Pcm {
            data,
            covariates,
            step_prior: Normal::new(0., 3.).expect("fixed prior parameters"),
            coef_prior: StudentsT::new(0., 1., 3.).expect("fixed prior parameters"),
            scale_prior: Exp::new(0.1).expect("fixed prior parameters"),
        })
    }

    fn coef_range(&self) -> std::ops::Range<usize> {
        let b = self.data.n_free_difficulties();
        b..b + self.covariates.n_covariates()
    }

    /// Regression coefficients on the original covariate scale
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong-length position
    pub fn original_scale_coefficients(&self, position: &[f64]) -> Result<Vec<f64>, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        self.covariates
            .to_original_scale(&position[self.coef_range()])
    }

    /// Expanded per item step difficulties at the given position
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong-length position
    pub fn step_difficulties(&self, position: &[f64]) -> Result<Vec<Vec<f64>>, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        expand_difficulties(
            &position[..self.data.n_free_difficulties()],
            self.data.max_scores(),
        )
    }
}

impl LogDensity for Pcm {
    fn dim(&self) -> usize {
        self.data.n_free_difficulties() + self.covariates.n_covariates() + 1 + self.data.n_persons()
    }

    fn log_density(&self, position: &[f64]) -> Result<f64, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        let b = self.data.n_free_difficulties();
        let k = self.covariates.n_covariates();
        let beta_free = &position[..b];
        let lambda = &position[b..b + k];
        let u_sigma = position[b + k];
        let theta = &position[b + k + 1..];

        let sigma = u_sigma.exp();
        if !sigma.is_finite() {
            return Err(ModelError::NonFiniteDensity);
        }
        let betas = expand_difficulties(beta_free, self.data.max_scores())?;
        let mu = self.covariates.linear_predictor(lambda)?;
        let person_noise = Normal::new(0., sigma).map_err(|_| ModelError::NonFiniteDensity)?;

        let mut lp = beta_free
            .iter()
            .map(|v| self.step_prior.ln_pdf(*v))
            .sum::<f64>();
        lp += lambda.iter().map(|v| self.coef_prior.ln_pdf(*v)).sum::<f64>();
        lp += self.scale_prior.ln_pdf(sigma) + u_sigma;
        lp += theta
            .iter()
            .zip(&mu)
            .map(|(t, m)| person_noise.ln_pdf(t - m))
            .sum::<f64>();
        for r in 0..self.data.len() {
            let item = self.data.items[r];
            let person = self.data.persons[r];
            lp += ordinal_ln_prob(theta[person], 1., &betas[item], self.data.scores[r]);
        }
        if lp.is_finite() {
            Ok(lp)
        } else {
            Err(ModelError::NonFiniteDensity)
        }
    }
}

#[derive(Clone, Debug)]
/// Generalised partial credit model with latent regression
///
/// Adds a per item discrimination $\alpha_{i}$, sampled on the log scale.
/// Position layout:
/// $[\ln\alpha_{1..I}, \beta^{free}_{1..B}, \lambda_{1..K}, \theta_{1..J}]$
/// with priors $\alpha_{i} \sim \text{LogNormal}(1, 1)$,
/// $\beta^{free} \sim N(0, 3)$, $\lambda \sim t_{3}(0, 1)$ and
/// $\theta_{j} \sim N((\bm{W}^{adj}\lambda)_{j}, 1)$ --- the ability residual
/// scale is fixed at 1 because the free discriminations absorb it.
pub struct Gpcm {
    data: Responses,
    covariates: Covariates,
    disc_prior: LogNormal,
    step_prior: Normal,
    coef_prior: StudentsT,
    unit: Normal,
}

impl Gpcm {
    /// Creates a new generalised partial credit model
    ///
    /// # Errors
    ///
    /// Returns an error if the covariate matrix rows do not match the number
    /// of persons
    ///
    /// # Panics
    ///
    /// Relies on the fixed prior constants being valid distribution
    /// parameters : always holds
    pub fn new(data: Responses, covariates: Covariates) -> Result<Self, ModelError> {
        if covariates.n_persons() != data.n_persons() {
            return Err(ModelError::MismatchedInputs);
        }
        Ok(Gpcm {
            data,
            covariates,
            disc_prior: LogNormal::new(1., 1.).expect("fixed prior parameters"),
            step_prior: Normal::new(0., 3.).expect("fixed prior parameters"),
            coef_prior: StudentsT::new(0., 1., 3.).expect("fixed prior parameters"),
            unit: Normal::new(0., 1.).expect("fixed prior parameters"),
        })
    }

    fn coef_range(&self) -> std::ops::Range<usize> {
        let start = self.data.n_items() + self.data.n_free_difficulties();
        start..start + self.covariates.n_covariates()
    }

    /// Regression coefficients on the original covariate scale
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong-length position
    pub fn original_scale_coefficients(&self, position: &[f64]) -> Result<Vec<f64>, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        self.covariates
            .to_original_scale(&position[self.coef_range()])
    }

    /// Item discriminations $\alpha_{i} = e^{u_{i}}$ at the given position
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong-length position
    pub fn discriminations(&self, position: &[f64]) -> Result<Vec<f64>, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        Ok(position[..self.data.n_items()]
            .iter()
            .map(|u| u.exp())
            .collect())
    }
}

impl LogDensity for Gpcm {
    fn dim(&self) -> usize {
        self.data.n_items()
            + self.data.n_free_difficulties()
            + self.covariates.n_covariates()
            + self.data.n_persons()
    }

    fn log_density(&self, position: &[f64]) -> Result<f64, ModelError> {
        if position.len() != self.dim() {
            return Err(ModelError::MismatchedInputs);
        }
        let i_n = self.data.n_items();
        let b = self.data.n_free_difficulties();
        let k = self.covariates.n_covariates();
        let u_alpha = &position[..i_n];
        let beta_free = &position[i_n..i_n + b];
        let lambda = &position[i_n + b..i_n + b + k];
        let theta = &position[i_n + b + k..];

        let alphas: Vec<f64> = u_alpha.iter().map(|u| u.exp()).collect();
        if !alphas.iter().all(|a| a.is_finite()) {
            return Err(ModelError::NonFiniteDensity);
        }
        let betas = expand_difficulties(beta_free, self.data.max_scores())?;
        let mu = self.covariates.linear_predictor(lambda)?;

        let mut lp = alphas
            .iter()
            .zip(u_alpha)
            .map(|(a, u)| self.disc_prior.ln_pdf(*a) + u)
            .sum::<f64>();
        lp += beta_free
            .iter()
            .map(|v| self.step_prior.ln_pdf(*v))
            .sum::<f64>();
        lp += lambda.iter().map(|v| self.coef_prior.ln_pdf(*v)).sum::<f64>();
        lp += theta
            .iter()
            .zip(&mu)
            .map(|(t, m)| self.unit.ln_pdf(t - m))
            .sum::<f64>();
        for r in 0..self.data.len() {
            let item = self.data.items[r];
            let person = self.data.persons[r];
            lp += ordinal_ln_prob(
                theta[person],
                alphas[item],
                &betas[item],
                self.data.scores[r],
            );
        }
        if lp.is_finite() {
            Ok(lp)
        } else {
            Err(ModelError::NonFiniteDensity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use itertools::iproduct;

    #[test]
    fn dichotomous_matches_two_parameter_logistic() {
        let (thetas, alphas, betas) = ([-2., -0.5, 0., 1., 2.3], [0.5, 1., 1.7], [-1.2, 0., 0.8]);
        for (theta, alpha, beta) in iproduct!(thetas, alphas, betas) {
            let z: f64 = alpha * theta - beta;
            let ln_p1 = -(-z).exp().ln_1p();
            let ln_p0 = -z.exp().ln_1p();
            assert_approx_eq!(ordinal_ln_prob(theta, alpha, &[beta], 1), ln_p1, 1e-12);
            assert_approx_eq!(ordinal_ln_prob(theta, alpha, &[beta], 0), ln_p0, 1e-12);
        }
    }

    #[test]
    fn half_probability_at_origin() {
        // m = 1, beta = 0, theta = 0
        assert_approx_eq!(ordinal_ln_prob(0., 1., &[0.], 1).exp(), 0.5, 1e-15);
        assert_approx_eq!(ordinal_ln_prob(0., 1., &[0.], 0).exp(), 0.5, 1e-15);
    }

    #[test]
    fn probabilities_normalise() {
        let probs = ordinal_probabilities(0.4, 1.3, &[-0.7, 0.2, 0.5]);
        assert_eq!(probs.len(), 4);
        assert_approx_eq!(probs.iter().sum::<f64>(), 1., 1e-12);
    }

    // increasing ability cannot decrease Pr(Y >= k) for any k
    #[test]
    fn ordinal_stochastic_dominance() {
        let betas = [-0.7, 0.2, 1.1];
        let thetas: Vec<f64> = (-30..=30).map(|i| f64::from(i) * 0.1).collect();
        for pair in thetas.windows(2) {
            let lower = ordinal_probabilities(pair[0], 1., &betas);
            let upper = ordinal_probabilities(pair[1], 1., &betas);
            for k in 1..=betas.len() {
                let tail_lower: f64 = lower[k..].iter().sum();
                let tail_upper: f64 = upper[k..].iter().sum();
                assert!(tail_upper >= tail_lower - 1e-12);
            }
        }
    }

    #[test]
    fn difficulties_sum_to_zero() {
        let max_scores = [3, 2, 2];
        let free = [0.3, -1.2, 0.4, 2.];
        let expanded = expand_difficulties(&free, &max_scores).unwrap();
        for (betas, m) in expanded.iter().zip(&max_scores) {
            assert_eq!(betas.len(), *m);
            assert_approx_eq!(betas.iter().sum::<f64>(), 0., 1e-12);
        }
    }

    #[test]
    fn dichotomous_item_has_fixed_difficulty() {
        let expanded = expand_difficulties(&[0.7], &[1, 2]).unwrap();
        assert_eq!(expanded[0], vec![0.]);
        assert_eq!(expanded[1], vec![0.7, -0.7]);
    }

    #[test]
    fn extreme_ability_stays_finite() {
        let ln_p = ordinal_ln_prob(400., 2., &[0., 0.5, -0.5, 1., -1.], 5);
        assert!(ln_p.is_finite());
        // the top category takes essentially all the mass
        assert!(ln_p > -1e-6);
        assert!(ordinal_ln_prob(-400., 2., &[0., 0.5, -0.5, 1., -1.], 0).is_finite());
    }

    #[test]
    fn response_validation_fails_fast() {
        // score above the item maximum
        assert_eq!(
            Responses::new(2, vec![0], vec![0], vec![3], vec![2, 1]).unwrap_err(),
            ModelError::ScoreOutOfRange {
                response: 0,
                score: 3,
                max: 2
            }
        );
        // person index out of range
        assert_eq!(
            Responses::new(2, vec![0], vec![2], vec![1], vec![2]).unwrap_err(),
            ModelError::IndexOutOfRange { response: 0 }
        );
        // an item with no score range at all
        assert_eq!(
            Responses::new(2, vec![0], vec![0], vec![0], vec![0]).unwrap_err(),
            ModelError::EmptyItem { item: 0 }
        );
        // mismatched record arrays
        assert_eq!(
            Responses::new(2, vec![0, 1], vec![0], vec![1], vec![2, 2]).unwrap_err(),
            ModelError::MismatchedInputs
        );
    }

    fn small_data() -> Responses {
        Responses::new(
            3,
            vec![0, 0, 0, 1, 1, 1],
            vec![0, 1, 2, 0, 1, 2],
            vec![2, 1, 0, 1, 0, 1],
            vec![2, 1],
        )
        .unwrap()
    }

    #[test]
    fn pcm_density_finite_at_origin() {
        let model = Pcm::new(small_data(), Covariates::intercept_only(3).unwrap()).unwrap();
        // 1 free difficulty + 1 coefficient + ln sigma + 3 abilities
        assert_eq!(model.dim(), 6);
        let position = vec![0.; model.dim()];
        assert!(model.log_density(&position).unwrap().is_finite());
        let grad = model.gradient(&position).unwrap();
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn gpcm_density_finite_at_origin() {
        let model = Gpcm::new(small_data(), Covariates::intercept_only(3).unwrap()).unwrap();
        // 2 discriminations + 1 free difficulty + 1 coefficient + 3 abilities
        assert_eq!(model.dim(), 7);
        let position = vec![0.; model.dim()];
        assert!(model.log_density(&position).unwrap().is_finite());
        assert_eq!(model.discriminations(&position).unwrap(), vec![1., 1.]);
    }

    #[test]
    fn ability_moves_density_toward_observed_scores() {
        // person 0 scored top on both items: raising their ability from 0
        // must increase the joint density of the observed data
        let data = Responses::new(
            2,
            vec![0, 1, 0, 1],
            vec![0, 0, 1, 1],
            vec![2, 1, 0, 0],
            vec![2, 1],
        )
        .unwrap();
        let model = Pcm::new(data, Covariates::intercept_only(2).unwrap()).unwrap();
        let origin = vec![0.; model.dim()];
        let mut raised = origin.clone();
        // theta block starts after 1 free difficulty, 1 coefficient, ln sigma
        raised[3] = 0.5;
        assert!(model.log_density(&raised).unwrap() > model.log_density(&origin).unwrap());
    }

    #[test]
    fn mismatched_covariate_rows_rejected() {
        assert_eq!(
            Pcm::new(small_data(), Covariates::intercept_only(4).unwrap()).unwrap_err(),
            ModelError::MismatchedInputs
        );
    }
}
