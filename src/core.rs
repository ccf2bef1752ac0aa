//! Running several independent replicas of the sampler.
//!
//! Each replica owns a private sampler and RNG (seeded with `seed + i`, so a
//! run is reproducible replica by replica) and the replicas evolve in
//! parallel. Their run-info records combine additively into one total.

use indicatif::{MultiProgress, ProgressStyle};
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use rayon::prelude::*;

use crate::chain::SampleChain;
use crate::distributions::TargetModel;
use crate::options::MhOptions;
use crate::runinfo::RunInfo;
use crate::sampler::{DramSampler, McmcError};

/// Generate one chain per entry of `initial_positions`, all against the same
/// model, proposal covariance and options. Returns the chains in replica
/// order together with the summed run info.
pub fn run_replicas<M>(
    prefix: &str,
    model: &M,
    initial_positions: &[DVector<f64>],
    proposal_cov: &DMatrix<f64>,
    options: &MhOptions,
    seed: u64,
) -> Result<(Vec<SampleChain>, RunInfo), McmcError>
where
    M: TargetModel + Sync,
{
    let results: Vec<(SampleChain, RunInfo)> = initial_positions
        .par_iter()
        .enumerate()
        .map(|(i, initial)| -> Result<(SampleChain, RunInfo), McmcError> {
            let mut sampler = DramSampler::new(
                &format!("{prefix}r{i}_"),
                model,
                initial.clone(),
                Some(proposal_cov.clone()),
                options.clone(),
            )?;
            let mut rng = Xoshiro256StarStar::seed_from_u64(seed + i as u64);
            let chain = sampler.generate(&mut rng)?;
            Ok((chain, *sampler.run_info()))
        })
        .collect::<Result<_, McmcError>>()?;

    let total: RunInfo = results.iter().map(|(_, info)| *info).sum();
    let chains = results.into_iter().map(|(chain, _)| chain).collect();
    Ok((chains, total))
}

/// Same as [`run_replicas`], with one progress bar per replica.
pub fn run_replicas_with_progress<M>(
    prefix: &str,
    model: &M,
    initial_positions: &[DVector<f64>],
    proposal_cov: &DMatrix<f64>,
    options: &MhOptions,
    seed: u64,
) -> Result<(Vec<SampleChain>, RunInfo), McmcError>
where
    M: TargetModel + Sync,
{
    let multi = MultiProgress::new();
    let pb_style = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .expect("progress template is valid")
        .progress_chars("##-");

    let results: Vec<(SampleChain, RunInfo)> = initial_positions
        .par_iter()
        .enumerate()
        .map(|(i, initial)| -> Result<(SampleChain, RunInfo), McmcError> {
            let bar = multi.add(indicatif::ProgressBar::new(options.raw_chain_size as u64));
            bar.set_prefix(format!("Replica {i}"));
            bar.set_style(pb_style.clone());

            let mut sampler = DramSampler::new(
                &format!("{prefix}r{i}_"),
                model,
                initial.clone(),
                Some(proposal_cov.clone()),
                options.clone(),
            )?;
            let mut rng = Xoshiro256StarStar::seed_from_u64(seed + i as u64);
            let chain = sampler.generate_with_progress(&mut rng, &bar)?;
            bar.finish_with_message("Done!");
            Ok((chain, *sampler.run_info()))
        })
        .collect::<Result<_, McmcError>>()?;

    let total: RunInfo = results.iter().map(|(_, info)| *info).sum();
    let chains = results.into_iter().map(|(chain, _)| chain).collect();
    Ok((chains, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::MultivariateGaussian;

    #[test]
    fn replicas_are_independent_and_reproducible() {
        let target = MultivariateGaussian::new(
            DVector::from_vec(vec![0.0]),
            DMatrix::from_row_slice(1, 1, &[1.0]),
        )
        .unwrap();
        let inits = vec![DVector::from_vec(vec![0.0]), DVector::from_vec(vec![1.0])];
        let cov = DMatrix::from_row_slice(1, 1, &[1.0]);
        let options = MhOptions {
            raw_chain_size: 50,
            ..MhOptions::default()
        };

        let (chains, total) = run_replicas("multi_", &target, &inits, &cov, &options, 42).unwrap();
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].len(), 50);
        assert_eq!(chains[0].name(), "multi_r0_rawChain");
        assert_ne!(chains[0], chains[1]);
        assert_eq!(total.num_target_calls, 100);

        let (again, _) = run_replicas("multi_", &target, &inits, &cov, &options, 42).unwrap();
        assert_eq!(chains, again);
    }
}
