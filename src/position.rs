use nalgebra::DVector;

/// A single point of the chain together with the target values computed for
/// it. Immutable after construction.
///
/// An out-of-support position carries `log_target = -inf` by construction,
/// so acceptance ratios involving it are zero without special casing.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    values: DVector<f64>,
    out_of_support: bool,
    log_likelihood: f64,
    log_target: f64,
}

impl Position {
    pub fn new(
        values: DVector<f64>,
        out_of_support: bool,
        log_likelihood: f64,
        log_target: f64,
    ) -> Self {
        let (log_likelihood, log_target) = if out_of_support {
            (f64::NEG_INFINITY, f64::NEG_INFINITY)
        } else {
            (log_likelihood, log_target)
        };
        Self {
            values,
            out_of_support,
            log_likelihood,
            log_target,
        }
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn out_of_support(&self) -> bool {
        self.out_of_support
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn log_target(&self) -> f64 {
        self.log_target
    }

    /// False for `NaN` and for both infinities.
    pub fn has_finite_log_target(&self) -> bool {
        self.log_target.is_finite()
    }
}
