/*!
Target models and the evaluation adapter of the sampler.

A [`TargetModel`] supplies the three ingredients of a Bayesian inverse
problem: a log-prior, a log-likelihood and a membership test for the
parameter domain. The sampler never calls the model directly; it goes
through a [`TargetEvaluator`], which folds the model's return values into a
single natural-log target density according to the configured
[`TargetConvention`].

# Example

```rust
use dram_mcmc::distributions::{MultivariateGaussian, TargetConvention, TargetEvaluator};
use nalgebra::{DMatrix, DVector};

let target = MultivariateGaussian::new(
    DVector::from_vec(vec![0.0, 0.0]),
    DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]),
)
.unwrap();

let evaluator = TargetEvaluator::new(&target, TargetConvention::LnTarget);
let eval = evaluator.evaluate(&DVector::from_vec(vec![0.5, -0.5]));
assert!(eval.log_target.is_finite());
```
*/

use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A (possibly unnormalised) posterior model over a vector parameter space.
pub trait TargetModel {
    /// Dimension of the parameter space.
    fn dim(&self) -> usize;

    /// Membership test for the parameter domain. Defaults to the whole
    /// space.
    fn contains(&self, theta: &DVector<f64>) -> bool {
        let _ = theta;
        true
    }

    /// Log of the prior density at `theta`, up to an additive constant.
    fn log_prior(&self, theta: &DVector<f64>) -> f64;

    /// Log of the likelihood at `theta`, up to an additive constant.
    fn log_likelihood(&self, theta: &DVector<f64>) -> f64;
}

/// Numeric convention of a model's return values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetConvention {
    /// The model returns natural-log densities; the log-target is their sum.
    LnTarget,
    /// The model returns `-2 ln` values; the log-target is `-1/2` times
    /// their sum.
    MinusTwoLnTarget,
}

/// One target evaluation: the model's raw values plus the natural-log
/// target derived from them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub log_prior: f64,
    pub log_likelihood: f64,
    pub log_target: f64,
}

/// Single entry point for target evaluations. The convention is fixed for
/// the lifetime of the sampler; all arithmetic downstream of `evaluate`
/// uses the natural-log `log_target` uniformly.
#[derive(Debug, Clone, Copy)]
pub struct TargetEvaluator<'a, M: TargetModel> {
    model: &'a M,
    convention: TargetConvention,
}

impl<'a, M: TargetModel> TargetEvaluator<'a, M> {
    pub fn new(model: &'a M, convention: TargetConvention) -> Self {
        Self { model, convention }
    }

    pub fn dim(&self) -> usize {
        self.model.dim()
    }

    pub fn contains(&self, theta: &DVector<f64>) -> bool {
        self.model.contains(theta)
    }

    /// Evaluate prior, likelihood and target at an in-support point.
    /// Out-of-support points must not reach this method.
    pub fn evaluate(&self, theta: &DVector<f64>) -> Evaluation {
        let log_prior = self.model.log_prior(theta);
        let log_likelihood = self.model.log_likelihood(theta);
        let raw = log_prior + log_likelihood;
        let log_target = match self.convention {
            TargetConvention::LnTarget => raw,
            TargetConvention::MinusTwoLnTarget => -0.5 * raw,
        };
        Evaluation {
            log_prior,
            log_likelihood,
            log_target,
        }
    }
}

/// A multivariate Gaussian with a flat prior, mostly useful as a reference
/// target for tests and demos.
#[derive(Debug, Clone)]
pub struct MultivariateGaussian {
    mean: DVector<f64>,
    chol_l: DMatrix<f64>,
    half_log_det: f64,
}

impl MultivariateGaussian {
    /// Returns `None` when `cov` is not positive definite or the shapes do
    /// not line up.
    pub fn new(mean: DVector<f64>, cov: DMatrix<f64>) -> Option<Self> {
        if cov.nrows() != mean.len() || cov.ncols() != mean.len() {
            return None;
        }
        let chol = Cholesky::new(cov)?;
        let chol_l = chol.l();
        let half_log_det = chol_l.diagonal().iter().map(|v| v.ln()).sum();
        Some(Self {
            mean,
            chol_l,
            half_log_det,
        })
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }
}

impl TargetModel for MultivariateGaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn log_prior(&self, _theta: &DVector<f64>) -> f64 {
        0.0
    }

    fn log_likelihood(&self, theta: &DVector<f64>) -> f64 {
        let diff = theta - &self.mean;
        let y = self
            .chol_l
            .solve_lower_triangular(&diff)
            .expect("Cholesky factor has a positive diagonal");
        let d = self.mean.len() as f64;
        -0.5 * d * (2.0 * PI).ln() - self.half_log_det - 0.5 * y.norm_squared()
    }
}
