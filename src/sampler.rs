/*!
# Delayed-rejection adaptive Metropolis sampler

This module implements the DRAM algorithm (Haario, Laine, Mira and Saksman,
"DRAM: Efficient Adaptive MCMC", Statistics and Computing (2006), 16:339-354)
for a user-supplied [`TargetModel`]. One [`DramSampler`] drives one replica:
it owns the transition kernel, the adaptation state and the run accounting,
and borrows the target model and the random number generator for the
duration of a generation.

Each outer step runs through a fixed sequence of phases: propose a stage-0
candidate, evaluate the target, decide Metropolis-Hastings acceptance, run
up to `dr_max_num_extra_stages` delayed-rejection stages, commit the
position, and maybe fold the chain into the adapted proposal covariance.

## Example

```rust
use dram_mcmc::distributions::MultivariateGaussian;
use dram_mcmc::options::MhOptions;
use dram_mcmc::sampler::DramSampler;
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

let target = MultivariateGaussian::new(
    DVector::from_vec(vec![0.0]),
    DMatrix::from_row_slice(1, 1, &[1.0]),
)
.unwrap();

let options = MhOptions {
    raw_chain_size: 50,
    ..MhOptions::default()
};
let mut sampler = DramSampler::new(
    "doc_",
    &target,
    DVector::from_vec(vec![0.0]),
    Some(DMatrix::from_row_slice(1, 1, &[1.0])),
    options,
)
.unwrap();

let mut rng = Xoshiro256StarStar::seed_from_u64(42);
let chain = sampler.generate(&mut rng).unwrap();
assert_eq!(chain.len(), 50);
assert_eq!(sampler.run_info().num_target_calls, 50);
```
*/

use indicatif::ProgressBar;
use log::warn;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use thiserror::Error;

use crate::adapt::AmState;
use crate::chain::SampleChain;
use crate::distributions::{TargetEvaluator, TargetModel};
use crate::kernel::{HessianKernel, ScaledCovKernel, TransitionKernel};
use crate::options::MhOptions;
use crate::position::Position;
use crate::runinfo::{RunInfo, Stopwatch};

/// Fatal failures of chain generation. Recoverable conditions (non-finite
/// targets, skipped adaptation updates) are counted in [`RunInfo`] and never
/// surface here.
#[derive(Debug, Error)]
pub enum McmcError {
    #[error("initial position lies outside the target support")]
    InvalidInitialPoint,

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("initial proposal covariance is not positive definite")]
    ProposalCovarianceNotPd,

    #[error("transition kernel rejected the current position as a pre-computing position")]
    ProposalDrawFailed,

    #[error("invalid sampler options: {0}")]
    InvalidOptions(String),
}

/// Decide acceptance for a computed ratio. The uniform variate is drawn only
/// when the ratio is strictly between zero and one.
fn accept_alpha<R: Rng + ?Sized>(alpha: f64, rng: &mut R) -> bool {
    if alpha <= 0.0 {
        false
    } else if alpha >= 1.0 {
        true
    } else {
        rng.gen::<f64>() <= alpha
    }
}

/// One DRAM replica. See the module documentation for the overall shape.
pub struct DramSampler<'a, M: TargetModel> {
    prefix: String,
    evaluator: TargetEvaluator<'a, M>,
    options: MhOptions,
    tk: TransitionKernel,
    am: Option<AmState>,
    run_info: RunInfo,
    initial_position: DVector<f64>,
    alpha_quotients: Vec<f64>,
    ids_of_unique_positions: Vec<usize>,
}

impl<'a, M: TargetModel> DramSampler<'a, M> {
    /// Build a sampler with the scaled-covariance kernel. The proposal
    /// covariance is required for this kernel variant.
    pub fn new(
        prefix: &str,
        model: &'a M,
        initial_position: DVector<f64>,
        proposal_cov: Option<DMatrix<f64>>,
        options: MhOptions,
    ) -> Result<Self, McmcError> {
        if options.tk_use_local_hessian {
            return Err(McmcError::InvalidOptions(
                "the local-Hessian kernel requires a precision provider; use with_local_hessian"
                    .to_string(),
            ));
        }
        let scales = validate_common(model, &initial_position, &options)?;

        let cov = proposal_cov.ok_or_else(|| {
            McmcError::InvalidOptions(
                "a proposal covariance is required unless the local-Hessian kernel is enabled"
                    .to_string(),
            )
        })?;
        let dim = model.dim();
        if cov.nrows() != dim || cov.ncols() != dim {
            return Err(McmcError::DimensionMismatch {
                expected: dim,
                found: cov.nrows(),
            });
        }
        let kernel = ScaledCovKernel::new(cov, scales).ok_or(McmcError::ProposalCovarianceNotPd)?;

        Ok(Self::from_parts(
            prefix,
            model,
            initial_position,
            TransitionKernel::ScaledCov(kernel),
            options,
        ))
    }

    /// Build a sampler whose proposals derive from a local precision matrix
    /// evaluated at each pre-computing position. Adaptation stays disabled
    /// for this kernel variant.
    pub fn with_local_hessian(
        prefix: &str,
        model: &'a M,
        initial_position: DVector<f64>,
        precision_at: Box<dyn Fn(&DVector<f64>) -> DMatrix<f64> + Send>,
        mut options: MhOptions,
    ) -> Result<Self, McmcError> {
        options.tk_use_local_hessian = true;
        let scales = validate_common(model, &initial_position, &options)?;
        let kernel = HessianKernel::new(model.dim(), scales, precision_at);
        Ok(Self::from_parts(
            prefix,
            model,
            initial_position,
            TransitionKernel::Hessian(kernel),
            options,
        ))
    }

    fn from_parts(
        prefix: &str,
        model: &'a M,
        initial_position: DVector<f64>,
        tk: TransitionKernel,
        options: MhOptions,
    ) -> Self {
        let evaluator = TargetEvaluator::new(model, options.target_convention);
        Self {
            prefix: prefix.to_string(),
            evaluator,
            options,
            tk,
            am: None,
            run_info: RunInfo::default(),
            initial_position,
            alpha_quotients: Vec::new(),
            ids_of_unique_positions: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.tk.dim()
    }

    pub fn options(&self) -> &MhOptions {
        &self.options
    }

    pub fn run_info(&self) -> &RunInfo {
        &self.run_info
    }

    pub fn kernel(&self) -> &TransitionKernel {
        &self.tk
    }

    /// Adaptation state, present once the first adaptation event has run.
    pub fn am_state(&self) -> Option<&AmState> {
        self.am.as_ref()
    }

    /// Unclamped acceptance quotients per position; empty unless
    /// `raw_chain_generate_extra` was set.
    pub fn alpha_quotients(&self) -> &[f64] {
        &self.alpha_quotients
    }

    /// Positions at which a fresh candidate was accepted.
    pub fn ids_of_unique_positions(&self) -> &[usize] {
        &self.ids_of_unique_positions
    }

    /// Generate a full chain. Fatal errors abort the generation and no
    /// chain is produced.
    pub fn generate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<SampleChain, McmcError> {
        self.generate_inner(rng, None)
    }

    /// Same as [`Self::generate`], advancing `bar` once per position.
    pub fn generate_with_progress<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        bar: &ProgressBar,
    ) -> Result<SampleChain, McmcError> {
        self.generate_inner(rng, Some(bar))
    }

    fn generate_inner<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        progress: Option<&ProgressBar>,
    ) -> Result<SampleChain, McmcError> {
        let chain_watch = Stopwatch::start(true);
        let n = self.options.raw_chain_size;
        self.run_info.reset();
        self.alpha_quotients.clear();
        self.ids_of_unique_positions.clear();
        self.am = None;

        if !self.evaluator.contains(&self.initial_position) {
            return Err(McmcError::InvalidInitialPoint);
        }

        let watch = Stopwatch::start(self.options.measure_run_times);
        let eval = self.evaluator.evaluate(&self.initial_position);
        self.run_info.target_time += watch.elapsed();
        self.run_info.num_target_calls += 1;
        if !eval.log_target.is_finite() {
            self.run_info.num_non_finite_targets += 1;
            warn!(
                "log target at the initial position is {}",
                eval.log_target
            );
        }

        let mut current = Position::new(
            self.initial_position.clone(),
            false,
            eval.log_likelihood,
            eval.log_target,
        );

        let mut chain =
            SampleChain::with_capacity(format!("{}rawChain", self.prefix), self.dim(), n);
        chain.push(
            current.values().clone(),
            current.log_likelihood(),
            current.log_target(),
        );
        self.ids_of_unique_positions.push(0);
        if self.options.raw_chain_generate_extra {
            self.alpha_quotients.push(1.0);
        }
        if let Some(bar) = progress {
            bar.set_length(n as u64);
            bar.inc(1);
        }

        for position_id in 1..n {
            let mut stage_id: usize = 0;
            self.tk.clear_pre_computing_positions();
            if !self.tk.set_pre_computing_position(current.values(), 0) {
                return Err(McmcError::ProposalDrawFailed);
            }

            let (values, out_of_support) = self.draw_candidate(&[0], rng);
            let mut valid_pre_computing = self.tk.set_pre_computing_position(&values, stage_id + 1);
            let mut candidate = self.evaluate_candidate(values, out_of_support, false);

            let mut accept = false;
            let mut alpha_quotient = 0.0;
            if valid_pre_computing && !candidate.out_of_support() {
                let watch = Stopwatch::start(self.options.measure_run_times);
                let alpha = self.alpha_pair(&current, &candidate, 0, 1, &mut alpha_quotient);
                self.run_info.mh_alpha_time += watch.elapsed();
                accept = accept_alpha(alpha, rng);
            }
            if self.options.raw_chain_generate_extra {
                self.alpha_quotients.push(alpha_quotient);
            }

            if !accept
                && !candidate.out_of_support()
                && self.options.dr_max_num_extra_stages > 0
                && !self.skip_dr_at(position_id)
            {
                let dr_watch = Stopwatch::start(self.options.measure_run_times);
                let mut positions = vec![current.clone(), candidate.clone()];
                let mut stage_ids: Vec<usize> = vec![0, 1];

                while valid_pre_computing
                    && !accept
                    && stage_id < self.options.dr_max_num_extra_stages
                {
                    self.run_info.num_drs += 1;
                    stage_id += 1;

                    let (values, out_of_support) = self.draw_candidate(&stage_ids, rng);
                    valid_pre_computing =
                        self.tk.set_pre_computing_position(&values, stage_id + 1);
                    candidate = self.evaluate_candidate(values, out_of_support, true);
                    positions.push(candidate.clone());
                    stage_ids.push(stage_id + 1);

                    // An invalid pre-computing position ends this DR level
                    // with the candidate rejected.
                    if valid_pre_computing && !candidate.out_of_support() {
                        let watch = Stopwatch::start(self.options.measure_run_times);
                        let alpha = self.alpha_positions(&positions, &stage_ids);
                        self.run_info.dr_alpha_time += watch.elapsed();
                        accept = accept_alpha(alpha, rng);
                    }
                }
                self.run_info.dr_time += dr_watch.elapsed();
            }

            if accept {
                self.ids_of_unique_positions.push(position_id);
                current = candidate;
            } else {
                self.run_info.num_rejections += 1;
            }
            chain.push(
                current.values().clone(),
                current.log_likelihood(),
                current.log_target(),
            );

            self.maybe_adapt(position_id, &chain);

            if let Some(bar) = progress {
                bar.inc(1);
            }
        }

        self.run_info.run_time += chain_watch.elapsed();
        Ok(chain)
    }

    /// Draw a candidate for the stage identified by `stage_ids`, redrawing
    /// out-of-support candidates unless they are kept as rejected-in-place
    /// positions.
    fn draw_candidate<R: Rng + ?Sized>(
        &mut self,
        stage_ids: &[usize],
        rng: &mut R,
    ) -> (DVector<f64>, bool) {
        loop {
            let watch = Stopwatch::start(self.options.measure_run_times);
            let values = self.tk.draw(stage_ids, rng);
            self.run_info.candidate_time += watch.elapsed();

            let out_of_support = !self.evaluator.contains(&values);
            if self.options.put_out_of_bounds_in_chain || !out_of_support {
                return (values, out_of_support);
            }
        }
    }

    /// Turn a drawn candidate into a position record, evaluating the target
    /// only for in-support points.
    fn evaluate_candidate(
        &mut self,
        values: DVector<f64>,
        out_of_support: bool,
        in_dr: bool,
    ) -> Position {
        if out_of_support {
            if in_dr {
                self.run_info.num_out_of_support_in_dr += 1;
            } else {
                self.run_info.num_out_of_support += 1;
            }
            return Position::new(values, true, f64::NEG_INFINITY, f64::NEG_INFINITY);
        }

        let watch = Stopwatch::start(self.options.measure_run_times);
        let eval = self.evaluator.evaluate(&values);
        self.run_info.target_time += watch.elapsed();
        self.run_info.num_target_calls += 1;
        if !eval.log_target.is_finite() {
            self.run_info.num_non_finite_targets += 1;
            warn!(
                "target evaluation returned non-finite log target {}",
                eval.log_target
            );
        }
        Position::new(values, false, eval.log_likelihood, eval.log_target)
    }

    /// Delayed rejection is suppressed during the adaptation warmup unless
    /// explicitly allowed.
    fn skip_dr_at(&self, position_id: usize) -> bool {
        !self.options.dr_during_am_non_adaptive_int
            && self.options.am_enabled()
            && position_id <= self.options.am_initial_non_adapt_interval
    }

    /// Adaptation schedule: seed at the end of the warmup window, then fold
    /// one adaptation interval at a time. The chain position of the current
    /// step is already committed when this runs.
    fn maybe_adapt(&mut self, position_id: usize, chain: &SampleChain) {
        if !self.options.am_enabled() {
            return;
        }
        let Some(kernel) = self.tk.as_scaled_cov_mut() else {
            return;
        };
        let watch = Stopwatch::start(self.options.measure_run_times);

        let seed_at = self.options.am_initial_non_adapt_interval;
        if position_id == seed_at {
            let state = AmState::seed(&chain.positions()[0..=position_id]);
            state.refresh_proposal(kernel, self.options.am_eta, self.options.am_epsilon);
            self.am = Some(state);
        } else if position_id > seed_at
            && (position_id - seed_at) % self.options.am_adapt_interval == 0
        {
            let id_of_first = position_id - self.options.am_adapt_interval;
            if let Some(state) = self.am.as_mut() {
                state.update(&chain.positions()[id_of_first..position_id], id_of_first);
                state.refresh_proposal(kernel, self.options.am_eta, self.options.am_epsilon);
            }
        }

        self.run_info.am_time += watch.elapsed();
    }

    /// Single-stage acceptance ratio between `x` (current) and `y`
    /// (candidate). The unclamped quotient lands in `quotient`.
    fn alpha_pair(
        &self,
        x: &Position,
        y: &Position,
        x_stage: usize,
        y_stage: usize,
        quotient: &mut f64,
    ) -> f64 {
        let mut alpha_quotient = 0.0;
        if !x.out_of_support() && !y.out_of_support() {
            if !x.has_finite_log_target() || !y.has_finite_log_target() {
                warn!(
                    "acceptance ratio over non-finite log targets ({} vs {})",
                    x.log_target(),
                    y.log_target()
                );
            } else if self.tk.symmetric() {
                alpha_quotient = (y.log_target() - x.log_target()).exp();
            } else {
                let q_y_to_x = self.tk.single_log_pdf(y_stage, x.values());
                let q_x_to_y = self.tk.single_log_pdf(x_stage, y.values());
                alpha_quotient =
                    (y.log_target() + q_y_to_x - x.log_target() - q_x_to_y).exp();
            }
        }
        *quotient = alpha_quotient;
        alpha_quotient.min(1.0)
    }

    /// Delayed-rejection acceptance ratio for the latest proposal in
    /// `positions` (index 0 is the current position).
    fn alpha_positions(&self, positions: &[Position], stage_ids: &[usize]) -> f64 {
        let refs: Vec<&Position> = positions.iter().collect();
        self.alpha_chain(&refs, stage_ids)
    }

    fn alpha_chain(&self, positions: &[&Position], stage_ids: &[usize]) -> f64 {
        let n = positions.len();
        debug_assert!(n >= 2 && stage_ids.len() == n);
        let first = positions[0];
        let last = positions[n - 1];

        if first.out_of_support() || last.out_of_support() {
            return 0.0;
        }
        if !first.has_finite_log_target() || !last.has_finite_log_target() {
            warn!(
                "delayed-rejection ratio over non-finite log targets ({} vs {})",
                first.log_target(),
                last.log_target()
            );
            return 0.0;
        }
        if n == 2 {
            let mut scratch = 0.0;
            return self.alpha_pair(first, last, stage_ids[0], stage_ids[1], &mut scratch);
        }

        let backward: Vec<&Position> = positions.iter().rev().copied().collect();
        let backward_ids: Vec<usize> = stage_ids.iter().rev().copied().collect();

        let mut log_numerator = 0.0;
        let mut log_denominator = 0.0;
        let mut alphas_numerator = 1.0;
        let mut alphas_denominator = 1.0;

        // Proposal-density terms for every proper prefix, longest first,
        // each evaluated at the pre-computing position of the stage id that
        // follows the prefix; acceptance complements for the prefixes that
        // still describe at least one transition. The complement of the
        // full forward sequence never appears, so the denominator product
        // stays positive whenever the earlier stages were rejected.
        for k in (1..n).rev() {
            log_numerator += self.tk.stage_log_pdf(
                &backward_ids[..k],
                self.tk.pre_computing_position(backward_ids[k]),
            );
            log_denominator += self
                .tk
                .stage_log_pdf(&stage_ids[..k], self.tk.pre_computing_position(stage_ids[k]));

            if k + 1 < n {
                alphas_numerator *= 1.0 - self.alpha_chain(&backward[..=k], &backward_ids[..=k]);
                alphas_denominator *= 1.0 - self.alpha_chain(&positions[..=k], &stage_ids[..=k]);
            }
        }

        log_numerator += last.log_target();
        log_denominator += first.log_target();

        ((alphas_numerator / alphas_denominator) * (log_numerator - log_denominator).exp())
            .min(1.0)
    }
}

fn validate_common<M: TargetModel>(
    model: &M,
    initial_position: &DVector<f64>,
    options: &MhOptions,
) -> Result<Vec<f64>, McmcError> {
    let dim = model.dim();
    if initial_position.len() != dim {
        return Err(McmcError::DimensionMismatch {
            expected: dim,
            found: initial_position.len(),
        });
    }
    if options.raw_chain_size == 0 {
        return Err(McmcError::InvalidOptions(
            "raw_chain_size must be positive".to_string(),
        ));
    }

    let extra = options.dr_max_num_extra_stages;
    if options.dr_scales_for_extra_stages.len() < extra {
        return Err(McmcError::InvalidOptions(format!(
            "{} delayed-rejection stages need {} stage scales, found {}",
            extra,
            extra,
            options.dr_scales_for_extra_stages.len()
        )));
    }
    let mut scales = Vec::with_capacity(options.dr_scales_for_extra_stages.len() + 1);
    scales.push(1.0);
    scales.extend_from_slice(&options.dr_scales_for_extra_stages);
    if scales.iter().any(|s| !(*s > 0.0)) {
        return Err(McmcError::InvalidOptions(
            "stage scales must be positive".to_string(),
        ));
    }

    if options.am_enabled() && !(options.am_eta > 0.0 && options.am_epsilon > 0.0) {
        return Err(McmcError::InvalidOptions(
            "am_eta and am_epsilon must be positive when adaptation is enabled".to_string(),
        ));
    }

    Ok(scales)
}
