/*!
Configuration of the DRAM sampler.

All options are plain data with serde derives so that host applications can
embed them in their own configuration records. `MhOptions::default()` gives a
plain Metropolis-Hastings run: no delayed rejection, no adaptation.
*/

use serde::{Deserialize, Serialize};

use crate::distributions::TargetConvention;

/// Options recognised by [`crate::sampler::DramSampler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MhOptions {
    /// Number of positions to generate, including the initial one.
    pub raw_chain_size: usize,

    /// Maximum number of delayed-rejection stages after the first proposal.
    /// Zero disables delayed rejection.
    pub dr_max_num_extra_stages: usize,

    /// Stage-scale multipliers for the extra stages; entry `k` scales the
    /// proposal standard deviation of extra stage `k + 1`. Must hold at
    /// least `dr_max_num_extra_stages` entries.
    pub dr_scales_for_extra_stages: Vec<f64>,

    /// Build the proposal from a local precision matrix instead of a fixed
    /// covariance. Disables adaptation.
    pub tk_use_local_hessian: bool,

    /// Position index at which the adapted covariance is seeded. Adaptation
    /// requires this to be positive.
    pub am_initial_non_adapt_interval: usize,

    /// Cadence of adaptation events after seeding. Zero disables adaptation.
    pub am_adapt_interval: usize,

    /// Scaling constant applied to the adapted covariance before it becomes
    /// the proposal covariance. A common choice is `2.38^2 / d`.
    pub am_eta: f64,

    /// Ridge added to the adapted covariance when its Cholesky factorisation
    /// fails.
    pub am_epsilon: f64,

    /// Allow delayed rejection during the adaptation warmup window.
    pub dr_during_am_non_adaptive_int: bool,

    /// Keep out-of-support proposals as candidates (they are rejected in
    /// place) instead of redrawing until a proposal lands in the support.
    pub put_out_of_bounds_in_chain: bool,

    /// Populate the per-phase timers of the run info.
    pub measure_run_times: bool,

    /// Record the unclamped acceptance quotient of every position.
    pub raw_chain_generate_extra: bool,

    /// Numeric convention of the target model's return values.
    pub target_convention: TargetConvention,
}

impl Default for MhOptions {
    fn default() -> Self {
        Self {
            raw_chain_size: 100,
            dr_max_num_extra_stages: 0,
            dr_scales_for_extra_stages: Vec::new(),
            tk_use_local_hessian: false,
            am_initial_non_adapt_interval: 0,
            am_adapt_interval: 0,
            am_eta: 1.0,
            am_epsilon: 1.0e-8,
            dr_during_am_non_adaptive_int: true,
            put_out_of_bounds_in_chain: false,
            measure_run_times: false,
            raw_chain_generate_extra: false,
            target_convention: TargetConvention::LnTarget,
        }
    }
}

impl MhOptions {
    /// True when the configuration enables adaptive Metropolis. The kernel
    /// variant is checked separately at construction.
    pub fn am_enabled(&self) -> bool {
        !self.tk_use_local_hessian
            && self.am_initial_non_adapt_interval > 0
            && self.am_adapt_interval > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_dr_and_am() {
        let opts = MhOptions::default();
        assert_eq!(opts.dr_max_num_extra_stages, 0);
        assert!(!opts.am_enabled());
        assert_eq!(opts.target_convention, TargetConvention::LnTarget);
    }

    #[test]
    fn am_enabled_needs_both_intervals() {
        let mut opts = MhOptions {
            am_initial_non_adapt_interval: 100,
            am_adapt_interval: 0,
            ..MhOptions::default()
        };
        assert!(!opts.am_enabled());
        opts.am_adapt_interval = 50;
        assert!(opts.am_enabled());
        opts.tk_use_local_hessian = true;
        assert!(!opts.am_enabled());
    }
}
