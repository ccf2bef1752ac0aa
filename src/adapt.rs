/*!
Adaptive-Metropolis state: the running mean and covariance of the chain and
the refresh of the proposal covariance derived from them.

The state is created lazily at the first adaptation event, which folds in
the whole warmup window; later events fold in one adaptation interval at a
time with the rank-one recurrences below, so no window is ever revisited.
*/

use log::warn;
use nalgebra::{Cholesky, DMatrix, DVector};

use crate::kernel::ScaledCovKernel;

/// Running first and second moments of the accepted chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AmState {
    last_chain_size: f64,
    last_mean: DVector<f64>,
    last_cov: DMatrix<f64>,
}

impl AmState {
    /// Seed the state from the first positions of the chain (the warmup
    /// window plus the seed position). Requires at least two positions so
    /// the `n - 1` denominator is sound.
    pub fn seed(window: &[DVector<f64>]) -> Self {
        let n = window.len();
        debug_assert!(n >= 2, "adaptation window must hold at least 2 positions");
        let dim = window[0].len();

        let mut mean = DVector::zeros(dim);
        for x in window {
            mean += x;
        }
        mean /= n as f64;

        let mut cov = DMatrix::zeros(dim, dim);
        for x in window {
            let diff = x - &mean;
            cov += &diff * diff.transpose();
        }
        cov /= n as f64 - 1.0;

        Self {
            last_chain_size: n as f64,
            last_mean: mean,
            last_cov: cov,
        }
    }

    /// Fold in `window`, whose first entry sits at global chain index
    /// `id_of_first` (must be >= 1; index 0 is covered by seeding).
    pub fn update(&mut self, window: &[DVector<f64>], id_of_first: usize) {
        debug_assert!(id_of_first >= 1);
        for (i, x) in window.iter().enumerate() {
            let j = (id_of_first + i) as f64;
            let r1 = 1.0 - 1.0 / j;
            let r2 = 1.0 / (1.0 + j);
            let diff = x - &self.last_mean;
            self.last_cov = &self.last_cov * r1 + (&diff * diff.transpose()) * r2;
            self.last_mean += diff * r2;
        }
        self.last_chain_size += window.len() as f64;
    }

    /// Push the adapted covariance, scaled by `eta`, into the kernel.
    ///
    /// The factorisation is attempted on the adapted matrix itself and, on
    /// failure, on the matrix with an `epsilon` ridge. When both attempts
    /// fail the kernel keeps its previous covariance and the update is
    /// skipped.
    pub fn refresh_proposal(&self, kernel: &mut ScaledCovKernel, eta: f64, epsilon: f64) -> bool {
        if Cholesky::new(self.last_cov.clone()).is_some() {
            return kernel.update_base_cov(&self.last_cov * eta);
        }
        let dim = self.last_cov.nrows();
        let ridged = &self.last_cov + DMatrix::identity(dim, dim) * epsilon;
        if Cholesky::new(ridged.clone()).is_some() && kernel.update_base_cov(ridged * eta) {
            return true;
        }
        warn!("adapted covariance is not positive definite even with ridge; keeping previous proposal covariance");
        false
    }

    pub fn last_chain_size(&self) -> f64 {
        self.last_chain_size
    }

    pub fn last_mean(&self) -> &DVector<f64> {
        &self.last_mean
    }

    pub fn last_cov(&self) -> &DMatrix<f64> {
        &self.last_cov
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn vecs(data: &[[f64; 2]]) -> Vec<DVector<f64>> {
        data.iter()
            .map(|row| DVector::from_vec(row.to_vec()))
            .collect()
    }

    /// Direct mean/covariance over a slice, denominator n - 1.
    fn direct_moments(window: &[DVector<f64>]) -> (DVector<f64>, DMatrix<f64>) {
        let n = window.len() as f64;
        let dim = window[0].len();
        let mut mean = DVector::zeros(dim);
        for x in window {
            mean += x;
        }
        mean /= n;
        let mut cov = DMatrix::zeros(dim, dim);
        for x in window {
            let diff = x - &mean;
            cov += &diff * diff.transpose();
        }
        cov /= n - 1.0;
        (mean, cov)
    }

    #[test]
    fn seed_matches_direct_computation() {
        let window = vecs(&[[0.0, 1.0], [2.0, -1.0], [1.0, 3.0], [-2.0, 0.5]]);
        let state = AmState::seed(&window);
        let (mean, cov) = direct_moments(&window);
        assert_abs_diff_eq!(state.last_mean().clone(), mean, epsilon = 1e-12);
        assert_abs_diff_eq!(state.last_cov().clone(), cov, epsilon = 1e-12);
        assert_eq!(state.last_chain_size(), 4.0);
    }

    #[test]
    fn incremental_update_tracks_the_full_window() {
        // Seed over positions 0..=3, then fold positions 4..=7 one batch at
        // a time; the recurrences must agree with the direct covariance of
        // all eight positions.
        let all = vecs(&[
            [0.0, 1.0],
            [2.0, -1.0],
            [1.0, 3.0],
            [-2.0, 0.5],
            [0.5, 0.5],
            [3.0, -2.0],
            [-1.0, 1.5],
            [2.5, 2.0],
        ]);
        let mut state = AmState::seed(&all[0..4]);
        state.update(&all[4..8], 4);

        let (mean, cov) = direct_moments(&all);
        assert_abs_diff_eq!(state.last_mean().clone(), mean, epsilon = 1e-9);
        assert_abs_diff_eq!(state.last_cov().clone(), cov, epsilon = 1e-9);
        assert_eq!(state.last_chain_size(), 8.0);
    }

    #[test]
    fn covariance_stays_symmetric() {
        let all = vecs(&[
            [0.1, -0.4],
            [1.2, 0.3],
            [-0.7, 0.9],
            [0.4, -1.1],
            [2.2, 0.8],
            [-1.5, 0.2],
        ]);
        let mut state = AmState::seed(&all[0..3]);
        state.update(&all[3..6], 3);
        let cov = state.last_cov();
        let asym = (cov - cov.transpose()).norm();
        assert!(asym <= 1e-12, "covariance asymmetry {asym} too large");
    }

    #[test]
    fn refresh_falls_back_to_the_ridge() {
        // Exactly singular covariance: a repeated position.
        let window = vecs(&[[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]]);
        let state = AmState::seed(&window);
        assert!(Cholesky::new(state.last_cov().clone()).is_none());

        let mut kernel = ScaledCovKernel::new(
            DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]),
            vec![1.0],
        )
        .unwrap();
        assert!(state.refresh_proposal(&mut kernel, 2.0, 1.0e-6));
        // Ridge succeeded: base covariance becomes eta * (cov + eps I).
        assert_abs_diff_eq!(kernel.base_cov()[(0, 0)], 2.0e-6, epsilon = 1e-15);
        assert_abs_diff_eq!(kernel.base_cov()[(1, 1)], 2.0e-6, epsilon = 1e-15);
    }

    #[test]
    fn refresh_applies_eta_scaling() {
        let window = vecs(&[[0.0, 0.0], [2.0, 0.0], [0.0, 2.0], [2.0, 2.0]]);
        let state = AmState::seed(&window);
        let mut kernel = ScaledCovKernel::new(
            DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]),
            vec![1.0],
        )
        .unwrap();
        assert!(state.refresh_proposal(&mut kernel, 0.5, 1.0e-8));
        let expected = state.last_cov() * 0.5;
        assert_abs_diff_eq!(kernel.base_cov().clone(), expected, epsilon = 1e-12);
    }
}
