//! Tests verifying the correctness of the DRAM sampler on a correlated 2D
//! Gaussian target: the empirical moments must match the target and the
//! adapted proposal covariance must approach the target covariance.

use dram_mcmc::distributions::MultivariateGaussian;
use dram_mcmc::options::MhOptions;
use dram_mcmc::sampler::DramSampler;
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::s;
    use ndarray_stats::CorrelationExt;

    const SEED: u64 = 42;

    fn target_cov() -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[1.0, 0.9, 0.9, 1.0])
    }

    fn dram_options(chain_size: usize) -> MhOptions {
        MhOptions {
            raw_chain_size: chain_size,
            dr_max_num_extra_stages: 2,
            dr_scales_for_extra_stages: vec![0.5, 0.1],
            am_initial_non_adapt_interval: 500,
            am_adapt_interval: 100,
            am_eta: 2.38 * 2.38 / 2.0,
            am_epsilon: 1.0e-8,
            ..MhOptions::default()
        }
    }

    #[test]
    fn dram_recovers_mean_and_covariance() {
        const SAMPLE_SIZE: usize = 8_000;
        const BURNIN: usize = 1_000;

        let target = MultivariateGaussian::new(
            DVector::from_vec(vec![0.0, 1.0]),
            target_cov(),
        )
        .expect("target covariance is positive definite");

        let mut sampler = DramSampler::new(
            "dram2d_",
            &target,
            DVector::from_vec(vec![0.0, 0.0]),
            Some(DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0])),
            dram_options(SAMPLE_SIZE),
        )
        .expect("sampler construction succeeds");

        let mut rng = Xoshiro256StarStar::seed_from_u64(SEED);
        let chain = sampler.generate(&mut rng).expect("generation succeeds");
        assert_eq!(chain.len(), SAMPLE_SIZE);

        // Discard burn-in, then compare empirical moments with the target.
        let samples = chain.to_array();
        let kept = samples.slice(s![BURNIN.., ..]);
        let mean = kept.mean_axis(ndarray::Axis(0)).unwrap();
        let cov = kept.t().cov(1.0).unwrap();

        assert_abs_diff_eq!(mean[0], 0.0, epsilon = 0.2);
        assert_abs_diff_eq!(mean[1], 1.0, epsilon = 0.2);
        let sigma = target_cov();
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(cov[(i, j)], sigma[(i, j)], epsilon = 0.25);
            }
        }
    }

    #[test]
    fn adaptation_tracks_the_target_covariance() {
        const SAMPLE_SIZE: usize = 5_000;

        let target = MultivariateGaussian::new(
            DVector::from_vec(vec![0.0, 0.0]),
            target_cov(),
        )
        .expect("target covariance is positive definite");

        let mut sampler = DramSampler::new(
            "dram2d_",
            &target,
            DVector::from_vec(vec![0.0, 0.0]),
            Some(DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0])),
            dram_options(SAMPLE_SIZE),
        )
        .expect("sampler construction succeeds");

        let mut rng = Xoshiro256StarStar::seed_from_u64(SEED);
        sampler.generate(&mut rng).expect("generation succeeds");

        let am = sampler.am_state().expect("adaptation ran");
        let sigma = target_cov();

        // The adapted covariance approaches the target covariance.
        let rel_err = (am.last_cov() - &sigma).norm() / sigma.norm();
        assert!(
            rel_err < 0.35,
            "adapted covariance too far from target: relative error {rel_err}"
        );

        // It stays symmetric through all the rank-one updates.
        let asym = (am.last_cov() - am.last_cov().transpose()).norm();
        assert!(asym <= 1e-12, "adapted covariance asymmetry {asym}");

        // The kernel's base covariance is the eta-scaled adapted matrix
        // from the last successful refresh.
        let base = sampler
            .kernel()
            .as_scaled_cov()
            .expect("scaled-covariance kernel")
            .base_cov()
            .clone();
        let expected = am.last_cov() * (2.38 * 2.38 / 2.0);
        assert_abs_diff_eq!(base, expected, epsilon = 1e-12);
    }
}
