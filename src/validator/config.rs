//! Configuration for the equivalence validators.
//!
//! One [`ValidatorConfig`] drives the DDEC and bounded validators: solver
//! limits, the memory model of the symbolic states, path bounds and the
//! refinement budget.

use std::{path::PathBuf, time::Duration};

use crate::{
    handlers::{ComboHandler, StrataContext},
    sandbox::DEFAULT_MAX_JUMPS,
    solver::DEFAULT_TIMEOUT,
    symstate::{
        memory::{FaultPolicy, DEFAULT_FRAME_SIZE},
        MemoryModel,
    },
    Result,
};

/// Configuration for the validators.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Per-query solver time limit (default: 60 s).
    pub timeout: Duration,

    /// Memory model of the symbolic states (default: flat).
    pub memory_model: MemoryModel,

    /// Fault reporting of the flat memory model (default: suppress).
    pub fault_policy: FaultPolicy,

    /// Maximum occurrences of a block on an enumerated path (default: 2).
    pub bound: usize,

    /// Inductive pairs are searched at bounds `1, 2, .., 2^max_bound_exponent`
    /// (default: 3).
    pub max_bound_exponent: u32,

    /// Maximum rounds of counterexample driven refinement (default: 16).
    pub max_refinements: usize,

    /// Generate test cases from path conditions before learning (default: true).
    pub make_tcs: bool,

    /// Directory of learned instruction formulas.
    pub strata_dir: Option<PathBuf>,

    /// Limit on taken jumps per concrete run (default: 1024).
    pub max_jumps: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            memory_model: MemoryModel::Flat,
            fault_policy: FaultPolicy::Suppress,
            bound: 2,
            max_bound_exponent: 3,
            max_refinements: 16,
            make_tcs: true,
            strata_dir: None,
            max_jumps: DEFAULT_MAX_JUMPS,
        }
    }
}

impl ValidatorConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-query solver time limit.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the memory model.
    ///
    /// # Arguments
    ///
    /// * `model` - [`MemoryModel::Flat`] or [`MemoryModel::Segmented`]
    #[must_use]
    pub fn with_memory_model(mut self, model: MemoryModel) -> Self {
        self.memory_model = model;
        self
    }

    /// Uses the segmented memory model with the default frame size.
    #[must_use]
    pub fn segmented(self) -> Self {
        self.with_memory_model(MemoryModel::Segmented {
            frame_size: DEFAULT_FRAME_SIZE,
        })
    }

    /// Sets the fault policy of the flat memory model.
    #[must_use]
    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    /// Sets the path bound; values below 1 are raised to 1.
    #[must_use]
    pub fn with_bound(mut self, bound: usize) -> Self {
        self.bound = bound.max(1);
        self
    }

    /// Sets the largest inductive search bound to `2^exponent`.
    #[must_use]
    pub fn with_max_bound_exponent(mut self, exponent: u32) -> Self {
        self.max_bound_exponent = exponent;
        self
    }

    /// Sets the refinement budget.
    #[must_use]
    pub fn with_max_refinements(mut self, rounds: usize) -> Self {
        self.max_refinements = rounds;
        self
    }

    /// Enables or disables test case generation from path conditions.
    #[must_use]
    pub fn with_make_tcs(mut self, enabled: bool) -> Self {
        self.make_tcs = enabled;
        self
    }

    /// Sets the directory of learned instruction formulas.
    #[must_use]
    pub fn with_strata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.strata_dir = Some(dir.into());
        self
    }

    /// Sets the limit on taken jumps per concrete run.
    #[must_use]
    pub fn with_max_jumps(mut self, jumps: usize) -> Self {
        self.max_jumps = jumps;
        self
    }

    /// The instruction semantics for this configuration: the simple handler,
    /// backed by the learned formulas if a strata directory is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the strata directory cannot be loaded.
    pub fn handler(&self) -> Result<ComboHandler> {
        let context = match &self.strata_dir {
            Some(dir) => Some(StrataContext::new(dir)?),
            None => None,
        };
        Ok(ComboHandler::standard(context))
    }

    /// The inductive search bounds, smallest first.
    #[must_use]
    pub fn inductive_bounds(&self) -> Vec<usize> {
        (0..=self.max_bound_exponent).map(|k| 1usize << k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ValidatorConfig::new();
        assert_eq!(config.bound, 2);
        assert_eq!(config.inductive_bounds(), vec![1, 2, 4, 8]);
        assert!(config.make_tcs);
        assert_eq!(config.memory_model, MemoryModel::Flat);
    }

    #[test]
    fn test_builders() {
        let config = ValidatorConfig::new()
            .with_bound(0)
            .with_max_bound_exponent(1)
            .with_timeout(Duration::from_secs(2))
            .segmented();
        assert_eq!(config.bound, 1);
        assert_eq!(config.inductive_bounds(), vec![1, 2]);
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert!(matches!(config.memory_model, MemoryModel::Segmented { .. }));
    }
}
