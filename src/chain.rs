/*!
In-memory storage of a generated chain.

A [`SampleChain`] holds the ordered positions of one replica together with
the parallel log-likelihood and log-target sequences. Persistence of these
sequences is the host's concern; this crate only produces them.
*/

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;

/// Fixed-capacity sequence of vector-valued samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleChain {
    name: String,
    dim: usize,
    positions: Vec<DVector<f64>>,
    log_likelihoods: Vec<f64>,
    log_targets: Vec<f64>,
}

impl SampleChain {
    pub(crate) fn with_capacity(name: String, dim: usize, capacity: usize) -> Self {
        Self {
            name,
            dim,
            positions: Vec::with_capacity(capacity),
            log_likelihoods: Vec::with_capacity(capacity),
            log_targets: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, values: DVector<f64>, log_likelihood: f64, log_target: f64) {
        debug_assert_eq!(values.len(), self.dim);
        self.positions.push(values);
        self.log_likelihoods.push(log_likelihood);
        self.log_targets.push(log_target);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn position(&self, i: usize) -> &DVector<f64> {
        &self.positions[i]
    }

    pub fn positions(&self) -> &[DVector<f64>] {
        &self.positions
    }

    pub fn log_likelihoods(&self) -> &[f64] {
        &self.log_likelihoods
    }

    pub fn log_targets(&self) -> &[f64] {
        &self.log_targets
    }

    /// Sample mean over all stored positions.
    pub fn mean(&self) -> DVector<f64> {
        let mut mean = DVector::zeros(self.dim);
        for p in &self.positions {
            mean += p;
        }
        mean / self.positions.len() as f64
    }

    /// Sample covariance with denominator `n - 1`. Needs at least two
    /// positions.
    pub fn covariance(&self) -> DMatrix<f64> {
        let n = self.positions.len();
        debug_assert!(n >= 2, "covariance needs at least two positions");
        let mean = self.mean();
        let mut cov = DMatrix::zeros(self.dim, self.dim);
        for p in &self.positions {
            let diff = p - &mean;
            cov += &diff * diff.transpose();
        }
        cov / (n as f64 - 1.0)
    }

    /// Samples as an `n x d` matrix, one row per position.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(self.positions.len(), self.dim);
        for (i, p) in self.positions.iter().enumerate() {
            out.row_mut(i).copy_from_slice(p.as_slice());
        }
        out
    }

    /// Samples as an `n x d` ndarray for downstream statistics.
    pub fn to_array(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.positions.len(), self.dim));
        for (i, p) in self.positions.iter().enumerate() {
            for (j, v) in p.iter().enumerate() {
                out[(i, j)] = *v;
            }
        }
        out
    }
}
