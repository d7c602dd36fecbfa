//! Bounded equivalence checking.
//!
//! [`BoundedValidator`] proves that every pair of entry-to-exit paths, one
//! per program and each visiting no block more than `bound` times, ends in
//! equal live-outs and memory without a signal whenever both start from
//! equal inputs. Executions longer than the bound are not covered.

use crate::{
    cfg::{Cfg, CfgPaths},
    solver::SmtSolver,
    validator::{
        config::ValidatorConfig,
        invariants::Invariant,
        obligation::{ObligationChecker, ObligationResult},
    },
    verifier::Verifier,
    x64::CpuState,
    Error, Result,
};

/// Path-pair validator without loop invariants.
pub struct BoundedValidator {
    config: ValidatorConfig,
    checker: ObligationChecker,
    error: Option<Error>,
    counter_examples: Vec<CpuState>,
}

impl BoundedValidator {
    /// Creates a validator using `config.bound` as the path bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured strata directory cannot be loaded.
    pub fn new(mut solver: Box<dyn SmtSolver>, config: ValidatorConfig) -> Result<Self> {
        solver.set_timeout(config.timeout);
        let checker = ObligationChecker::new(solver, Box::new(config.handler()?))
            .with_memory(config.memory_model, config.fault_policy);
        Ok(Self {
            config,
            checker,
            error: None,
            counter_examples: Vec::new(),
        })
    }

    fn run(&mut self, target: &Cfg, rewrite: &Cfg) -> Result<Option<CpuState>> {
        if target.live_outs() != rewrite.live_outs() || target.def_ins() != rewrite.def_ins() {
            return Err(validator_error!("target and rewrite interfaces differ"));
        }
        let assume = Invariant::Conjunction(vec![
            Invariant::StateEquality(target.def_ins().clone()),
            Invariant::MemoryEquality,
        ]);
        let prove = Invariant::Conjunction(vec![
            Invariant::StateEquality(target.live_outs().clone()),
            Invariant::ReturnMemoryEquality,
            Invariant::NoSignals,
        ]);

        let target_paths = CfgPaths::enumerate_all(target, self.config.bound);
        let rewrite_paths = CfgPaths::enumerate_all(rewrite, self.config.bound);
        log::info!(
            "checking {} x {} paths at bound {}",
            target_paths.len(),
            rewrite_paths.len(),
            self.config.bound
        );

        for tp in &target_paths {
            for rp in &rewrite_paths {
                let result = self.checker.check(
                    target,
                    rewrite,
                    target.get_entry(),
                    rewrite.get_entry(),
                    tp,
                    rp,
                    &assume,
                    &prove,
                )?;
                match result {
                    ObligationResult::Proven => {}
                    ObligationResult::Disproven(Some(ceg)) => {
                        log::debug!("paths {:?} / {:?} differ", tp, rp);
                        return Ok(Some(ceg.target));
                    }
                    ObligationResult::Disproven(None) => {
                        return Err(validator_error!(
                            "paths {:?} / {:?} differ but no counterexample was read",
                            tp,
                            rp
                        ));
                    }
                }
            }
        }
        Ok(None)
    }
}

impl Verifier for BoundedValidator {
    fn verify(&mut self, target: &Cfg, rewrite: &Cfg) -> bool {
        self.error = None;
        self.counter_examples.clear();
        self.checker.solver().reset();

        match self.run(target, rewrite) {
            Ok(None) => true,
            Ok(Some(input)) => {
                self.counter_examples.push(input);
                false
            }
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
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
        test::MockSolver,
        x64::{GpRegister, RegSet},
    };

    fn cfg(text: &str) -> Cfg {
        let rax = RegSet::empty().with_gp(GpRegister::r64(0));
        Cfg::new(text.parse().unwrap(), RegSet::universe(), rax).unwrap()
    }

    fn inputs() -> Vec<CpuState> {
        [0u64, 1, 2, 0x8000_0000_0000_0000]
            .into_iter()
            .map(|v| {
                let mut cpu = CpuState::new();
                cpu.gp[7] = v;
                cpu
            })
            .collect()
    }

    fn validator() -> BoundedValidator {
        let solver = MockSolver::with_inputs(inputs());
        BoundedValidator::new(Box::new(solver), ValidatorConfig::new()).unwrap()
    }

    #[test]
    fn test_branches_equal() {
        let target = cfg(
            "testq %rdi, %rdi\nje .L1\nmovq $1, %rax\nretq\n.L1:\nxorl %eax, %eax\nretq",
        );
        let rewrite = cfg("xorl %eax, %eax\ntestq %rdi, %rdi\nsetne %al\nretq");
        let mut v = validator();
        assert!(v.verify(&target, &rewrite), "{:?}", v.get_error());
    }

    #[test]
    fn test_counterexample() {
        let target = cfg("movq %rdi, %rax\nshrq $1, %rax\nretq");
        let rewrite = cfg("movq %rdi, %rax\nsarq $1, %rax\nretq");
        let mut v = validator();
        assert!(!v.verify(&target, &rewrite));
        assert_eq!(v.get_counter_examples()[0].gp[7], 0x8000_0000_0000_0000);
    }

    #[test]
    fn test_interface_mismatch() {
        let target = cfg("retq");
        let rewrite =
            Cfg::new("retq".parse().unwrap(), RegSet::universe(), RegSet::empty()).unwrap();
        let mut v = validator();
        assert!(!v.verify(&target, &rewrite));
        assert!(v.has_error());
    }
}
