/*!
Transition kernels of the sampler.

A kernel owns one Gaussian proposal per delayed-rejection stage and a table
of pre-computing positions keyed by stage id. The table is rebuilt at every
outer step: the current position lands at id 0, the stage-`k` candidate at
id `k`. Stage `k` scales the proposal standard deviation by `s_k`, with
`s_0 = 1`, so its covariance is `s_k^2 * C`.

Two variants exist. [`ScaledCovKernel`] draws around the current position
with a fixed base covariance (which adaptive Metropolis may replace), and
is symmetric. [`HessianKernel`] derives a local precision matrix at each
pre-computing position and is asymmetric; registering a position fails when
that precision is not positive definite.
*/

use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

/// Lower Cholesky factor of a covariance plus the quantities needed for
/// density evaluation.
#[derive(Debug, Clone)]
struct CovFactor {
    l: DMatrix<f64>,
    half_log_det: f64,
}

impl CovFactor {
    fn new(cov: DMatrix<f64>) -> Option<Self> {
        let l = Cholesky::new(cov)?.l();
        let half_log_det = l.diagonal().iter().map(|v| v.ln()).sum();
        Some(Self { l, half_log_det })
    }

    /// Draw from `N(centre, scale^2 * L L^T)`.
    fn sample<R: Rng + ?Sized>(
        &self,
        centre: &DVector<f64>,
        scale: f64,
        rng: &mut R,
    ) -> DVector<f64> {
        let z = DVector::from_fn(centre.len(), |_, _| rng.sample(StandardNormal));
        centre + (&self.l * z) * scale
    }

    /// Natural-log density of `N(centre, scale^2 * L L^T)` at `x`.
    fn log_pdf(&self, centre: &DVector<f64>, scale: f64, x: &DVector<f64>) -> f64 {
        let d = centre.len() as f64;
        let y = self
            .l
            .solve_lower_triangular(&(x - centre))
            .expect("Cholesky factor has a positive diagonal");
        -0.5 * d * (2.0 * PI).ln()
            - (self.half_log_det + d * scale.ln())
            - 0.5 * y.norm_squared() / (scale * scale)
    }
}

/// Proposal built from a fixed base covariance, scaled per stage.
#[derive(Debug, Clone)]
pub struct ScaledCovKernel {
    dim: usize,
    scales: Vec<f64>,
    base_cov: DMatrix<f64>,
    factor: CovFactor,
    pre_positions: Vec<Option<DVector<f64>>>,
}

impl ScaledCovKernel {
    /// `scales` holds one entry per stage, leading with `1.0` for stage 0.
    /// Returns `None` when `base_cov` is not positive definite.
    pub fn new(base_cov: DMatrix<f64>, scales: Vec<f64>) -> Option<Self> {
        let dim = base_cov.nrows();
        let factor = CovFactor::new(base_cov.clone())?;
        let table_len = scales.len() + 1;
        Some(Self {
            dim,
            scales,
            base_cov,
            factor,
            pre_positions: vec![None; table_len],
        })
    }

    pub fn base_cov(&self) -> &DMatrix<f64> {
        &self.base_cov
    }

    /// Replace the base covariance; all stage proposals pick up the change.
    /// Returns false and keeps the previous covariance when the candidate is
    /// not positive definite.
    pub fn update_base_cov(&mut self, cov: DMatrix<f64>) -> bool {
        match CovFactor::new(cov.clone()) {
            Some(factor) => {
                self.base_cov = cov;
                self.factor = factor;
                true
            }
            None => false,
        }
    }
}

/// Proposal built from a local precision matrix at each pre-computing
/// position.
pub struct HessianKernel {
    dim: usize,
    scales: Vec<f64>,
    precision_at: Box<dyn Fn(&DVector<f64>) -> DMatrix<f64> + Send>,
    stages: Vec<Option<PrecisionStage>>,
}

struct PrecisionStage {
    position: DVector<f64>,
    // Lower factor of the precision H = L L^T; the proposal covariance at
    // scale s is s^2 * H^{-1}.
    l: DMatrix<f64>,
    half_log_det: f64,
}

impl HessianKernel {
    pub fn new(
        dim: usize,
        scales: Vec<f64>,
        precision_at: Box<dyn Fn(&DVector<f64>) -> DMatrix<f64> + Send>,
    ) -> Self {
        let table_len = scales.len() + 1;
        Self {
            dim,
            scales,
            precision_at,
            stages: (0..table_len).map(|_| None).collect(),
        }
    }

    fn stage(&self, id: usize) -> &PrecisionStage {
        self.stages[id]
            .as_ref()
            .expect("pre-computing position was not registered")
    }
}

impl std::fmt::Debug for HessianKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HessianKernel")
            .field("dim", &self.dim)
            .field("scales", &self.scales)
            .finish_non_exhaustive()
    }
}

impl PrecisionStage {
    /// Draw from `N(centre, scale^2 * H^{-1})` via `L^T y = z`.
    fn sample<R: Rng + ?Sized>(&self, scale: f64, rng: &mut R) -> DVector<f64> {
        let z = DVector::from_fn(self.position.len(), |_, _| rng.sample(StandardNormal));
        let y = self
            .l
            .tr_solve_lower_triangular(&z)
            .expect("Cholesky factor has a positive diagonal");
        &self.position + y * scale
    }

    fn log_pdf(&self, scale: f64, x: &DVector<f64>) -> f64 {
        let d = self.position.len() as f64;
        let w = self.l.tr_mul(&(x - &self.position));
        -0.5 * d * (2.0 * PI).ln() + (self.half_log_det - d * scale.ln())
            - 0.5 * w.norm_squared() / (scale * scale)
    }
}

/// Tagged kernel variant used by the sampler.
#[derive(Debug)]
pub enum TransitionKernel {
    ScaledCov(ScaledCovKernel),
    Hessian(HessianKernel),
}

impl TransitionKernel {
    pub fn dim(&self) -> usize {
        match self {
            TransitionKernel::ScaledCov(k) => k.dim,
            TransitionKernel::Hessian(k) => k.dim,
        }
    }

    pub fn symmetric(&self) -> bool {
        matches!(self, TransitionKernel::ScaledCov(_))
    }

    pub fn clear_pre_computing_positions(&mut self) {
        match self {
            TransitionKernel::ScaledCov(k) => {
                for slot in &mut k.pre_positions {
                    *slot = None;
                }
            }
            TransitionKernel::Hessian(k) => {
                for slot in &mut k.stages {
                    *slot = None;
                }
            }
        }
    }

    /// Store `x` under `local_id` and report whether the kernel can propose
    /// from it. Always true for the scaled-covariance variant; false for the
    /// Hessian variant when the local precision fails to factor.
    pub fn set_pre_computing_position(&mut self, x: &DVector<f64>, local_id: usize) -> bool {
        match self {
            TransitionKernel::ScaledCov(k) => {
                k.pre_positions[local_id] = Some(x.clone());
                true
            }
            TransitionKernel::Hessian(k) => {
                let precision = (k.precision_at)(x);
                match Cholesky::new(precision) {
                    Some(chol) => {
                        let l = chol.l();
                        let half_log_det = l.diagonal().iter().map(|v| v.ln()).sum();
                        k.stages[local_id] = Some(PrecisionStage {
                            position: x.clone(),
                            l,
                            half_log_det,
                        });
                        true
                    }
                    None => {
                        k.stages[local_id] = None;
                        false
                    }
                }
            }
        }
    }

    pub fn pre_computing_position(&self, local_id: usize) -> &DVector<f64> {
        match self {
            TransitionKernel::ScaledCov(k) => k.pre_positions[local_id]
                .as_ref()
                .expect("pre-computing position was not registered"),
            TransitionKernel::Hessian(k) => &k.stage(local_id).position,
        }
    }

    /// Draw a candidate for the stage identified by `stage_ids`: the proposal
    /// is centred at the pre-computing position of `stage_ids[0]` and uses
    /// the covariance of stage `stage_ids.len() - 1`.
    pub fn draw<R: Rng + ?Sized>(&self, stage_ids: &[usize], rng: &mut R) -> DVector<f64> {
        let stage = stage_ids.len() - 1;
        match self {
            TransitionKernel::ScaledCov(k) => {
                let centre = self.pre_computing_position(stage_ids[0]);
                k.factor.sample(centre, k.scales[stage], rng)
            }
            TransitionKernel::Hessian(k) => k.stage(stage_ids[0]).sample(k.scales[stage], rng),
        }
    }

    /// Log density of the stage proposal identified by `stage_ids`,
    /// evaluated at `x`. Same centre/covariance mapping as [`Self::draw`].
    pub fn stage_log_pdf(&self, stage_ids: &[usize], x: &DVector<f64>) -> f64 {
        let stage = stage_ids.len() - 1;
        match self {
            TransitionKernel::ScaledCov(k) => {
                let centre = self.pre_computing_position(stage_ids[0]);
                k.factor.log_pdf(centre, k.scales[stage], x)
            }
            TransitionKernel::Hessian(k) => k.stage(stage_ids[0]).log_pdf(k.scales[stage], x),
        }
    }

    /// Log density of the proposal anchored at the pre-computing position
    /// of `stage_id` alone, evaluated at `x`. Used by the pairwise
    /// acceptance ratio of asymmetric kernels; a singleton stage list, so
    /// it agrees with [`Self::stage_log_pdf`] by construction.
    pub fn single_log_pdf(&self, stage_id: usize, x: &DVector<f64>) -> f64 {
        self.stage_log_pdf(&[stage_id], x)
    }

    pub fn as_scaled_cov(&self) -> Option<&ScaledCovKernel> {
        match self {
            TransitionKernel::ScaledCov(k) => Some(k),
            TransitionKernel::Hessian(_) => None,
        }
    }

    pub(crate) fn as_scaled_cov_mut(&mut self) -> Option<&mut ScaledCovKernel> {
        match self {
            TransitionKernel::ScaledCov(k) => Some(k),
            TransitionKernel::Hessian(_) => None,
        }
    }
}
