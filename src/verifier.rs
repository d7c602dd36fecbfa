//! The common verifier interface.
//!
//! Every equivalence checker in the crate implements [`Verifier`]:
//!
//! - [`crate::validator::DdecValidator`] proves equivalence of programs with
//!   loops
//! - [`crate::validator::BoundedValidator`] proves equivalence of all paths up
//!   to a bound
//! - [`HoldOutVerifier`] only compares the programs on concrete test cases
//!
//! A failed verification either carries counterexamples (inputs on which
//! the programs differ) or an error explaining why no verdict was reached.

use crate::{
    cfg::Cfg,
    sandbox::{Outcome, Sandbox},
    x64::{CpuState, GpRegister, RSP},
    Error, Result,
};

/// An equivalence checker.
pub trait Verifier {
    /// Returns `true` iff the programs were shown equivalent.
    ///
    /// On `false`, either counterexamples are available or an error was
    /// recorded.
    fn verify(&mut self, target: &Cfg, rewrite: &Cfg) -> bool;

    /// The error of the last [`Verifier::verify`] call, if it failed without
    /// a verdict. Validator errors carry the source location that raised them.
    fn get_error(&self) -> Option<&Error>;

    /// `true` if the last call failed without a verdict.
    fn has_error(&self) -> bool {
        self.get_error().is_some()
    }

    /// Inputs on which the programs were found to differ by the last call.
    fn get_counter_examples(&self) -> &[CpuState];

    /// Number of counterexamples of the last call.
    fn counter_examples_available(&self) -> usize {
        self.get_counter_examples().len()
    }
}

/// Runs both programs on `input` and describes the first observable
/// difference.
///
/// Both runs completing are compared on the target's live-outs and on
/// memory at and above the input's stack pointer, which is what a caller
/// can observe after the code returns. A signal raised by one program only,
/// or different signals, is a difference. A run hitting the jump limit makes the comparison
/// inconclusive and yields `None`.
///
/// # Errors
///
/// [`Error::Unsupported`] if either program cannot be executed.
pub fn compare_outputs(
    sandbox: &mut Sandbox,
    target: &Cfg,
    rewrite: &Cfg,
    input: &CpuState,
) -> Result<Option<String>> {
    let t = sandbox.run(target, input)?;
    let r = sandbox.run(rewrite, input)?;
    Ok(match (&t.outcome, &r.outcome) {
        (Outcome::LimitReached { .. }, _) | (_, Outcome::LimitReached { .. }) => None,
        (Outcome::Completed { .. }, Outcome::Completed { .. }) => {
            let floor = input.get_gp(GpRegister::r64(RSP));
            t.last
                .first_difference(&r.last, target.live_outs(), false)
                .or_else(|| t.last.first_memory_difference(&r.last, floor))
        }
        (Outcome::Signal { signal: a, .. }, Outcome::Signal { signal: b, .. }) if a == b => None,
        (a, b) => Some(format!("target {:?}, rewrite {:?}", a, b)),
    })
}

/// Compares programs on held-out test cases.
///
/// Cheap and incomplete: agreement on every test case is reported as
/// equivalence.
pub struct HoldOutVerifier {
    sandbox: Sandbox,
    counter_examples: Vec<CpuState>,
    error: Option<Error>,
}

impl HoldOutVerifier {
    /// Creates a verifier over the inputs of `sandbox`.
    #[must_use]
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            sandbox,
            counter_examples: Vec::new(),
            error: None,
        }
    }

    /// The sandbox holding the test cases.
    pub fn sandbox_mut(&mut self) -> &mut Sandbox {
        &mut self.sandbox
    }
}

impl Verifier for HoldOutVerifier {
    fn verify(&mut self, target: &Cfg, rewrite: &Cfg) -> bool {
        self.counter_examples.clear();
        self.error = None;

        let inputs = self.sandbox.inputs().to_vec();
        for input in inputs {
            match compare_outputs(&mut self.sandbox, target, rewrite, &input) {
                Ok(Some(difference)) => {
                    log::debug!("hold-out test case differs at {}", difference);
                    self.counter_examples.push(input);
                }
                Ok(None) => {}
                Err(e) => {
                    self.error = Some(e);
                    return false;
                }
            }
        }
        self.counter_examples.is_empty()
    }

    fn get_error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn get_counter_examples(&self) -> &[CpuState] {
        &self.counter_examples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test::{rax_cfg, rdi_input},
        x64::RegSet,
    };

    fn cfg(text: &str) -> Cfg {
        rax_cfg(text, RegSet::universe())
    }

    fn sandbox(values: &[u64]) -> Sandbox {
        let mut sandbox = Sandbox::default();
        for v in values {
            sandbox.insert_input(rdi_input(*v));
        }
        sandbox
    }

    #[test]
    fn test_equal_on_test_cases() {
        let target = cfg("movq %rdi, %rax\nshlq $1, %rax\nretq");
        let rewrite = cfg("movq %rdi, %rax\naddq %rax, %rax\nretq");
        let mut verifier = HoldOutVerifier::new(sandbox(&[0, 1, 77]));
        assert!(verifier.verify(&target, &rewrite));
        assert!(!verifier.has_error());
        assert_eq!(verifier.counter_examples_available(), 0);
    }

    #[test]
    fn test_counterexamples() {
        let target = cfg("movq %rdi, %rax\nretq");
        let rewrite = cfg("movl %edi, %eax\nretq");
        let mut verifier = HoldOutVerifier::new(sandbox(&[5, 1 << 40, u64::MAX]));
        assert!(!verifier.verify(&target, &rewrite));
        assert_eq!(verifier.counter_examples_available(), 2);
        assert_eq!(verifier.get_counter_examples()[0].gp[7], 1 << 40);
    }

    #[test]
    fn test_signal_mismatch() {
        let target = cfg("movq %rdi, %rax\nretq");
        let rewrite = cfg("movq %rdi, %rcx\nxorl %edx, %edx\nmovq %rdi, %rax\ndivq %rcx\nretq");
        let mut sandbox = Sandbox::default();
        let diff = compare_outputs(&mut sandbox, &target, &rewrite, &rdi_input(0)).unwrap();
        assert!(diff.unwrap().contains("Signal"));
        let same = compare_outputs(&mut sandbox, &target, &target, &rdi_input(0)).unwrap();
        assert!(same.is_none());
    }

    #[test]
    fn test_scratch_below_stack_pointer_is_ignored() {
        let target = cfg("movq %rdi, %rax\nretq");
        let rewrite = cfg("pushq %rdi\npopq %rax\nretq");
        let mut input = rdi_input(9);
        input.set_gp(GpRegister::r64(RSP), 0x8000);
        let mut sandbox = Sandbox::default();
        assert_eq!(compare_outputs(&mut sandbox, &target, &rewrite, &input).unwrap(), None);

        let rewrite = cfg("movq %rdi, 8(%rsp)\nmovq %rdi, %rax\nretq");
        let diff = compare_outputs(&mut sandbox, &target, &rewrite, &input).unwrap();
        assert_eq!(diff.as_deref(), Some("mem[0x8008]"));
    }
}
