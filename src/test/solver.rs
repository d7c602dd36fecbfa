//! A deterministic stand-in for an SMT solver.
//!
//! [`MockSolver`] decides queries by evaluating them on a fixed list of
//! candidate models: a query is satisfiable iff some candidate satisfies
//! every constraint. Candidates built from [`CpuState`]s assign the same
//! input to the target and rewrite start states, which is what the
//! validators' obligations range over. Answers can also be scripted, in
//! which case they are consumed first.

use std::{
    collections::VecDeque,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use crate::{
    solver::{SmtSolver, SolverSession},
    symbolic::{ArrayValue, BitValue, Evaluator, Model, SymExpr},
    validator::{REWRITE_SUFFIX, TARGET_SUFFIX},
    x64::{CpuState, Flag, GpRegister, SseRegister},
    Error, Result,
};

/// Candidate-model solver for tests.
#[derive(Default)]
pub struct MockSolver {
    session: SolverSession,
    candidates: Vec<Model>,
    answers: VecDeque<bool>,
    model: Option<Model>,
    queries: usize,
}

impl MockSolver {
    /// A solver without candidates: every query is unsatisfiable.
    pub fn new() -> Self {
        Self::default()
    }

    /// A solver whose candidates are `inputs`, given to both programs.
    pub fn with_inputs(inputs: Vec<CpuState>) -> Self {
        Self {
            candidates: inputs.iter().map(input_model).collect(),
            ..Self::default()
        }
    }

    /// Scripts the next answers; a scripted `sat` uses the first candidate
    /// (or the all-zero model) as its model.
    pub fn with_answers(mut self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.answers.extend(answers);
        self
    }

    /// Adds a candidate model.
    pub fn push_model(&mut self, model: Model) {
        self.candidates.push(model);
    }

    /// Number of queries answered.
    pub fn queries(&self) -> usize {
        self.queries
    }

    fn satisfies(model: &Model, constraints: &[SymExpr]) -> Result<bool> {
        let mut eval = Evaluator::new(model);
        for c in constraints {
            if !eval.eval_bool(c)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn current(&self) -> Result<&Model> {
        self.model
            .as_ref()
            .ok_or_else(|| Error::Solver("no model available".to_string()))
    }
}

/// A model assigning `cpu` to the start states of both programs.
pub fn input_model(cpu: &CpuState) -> Model {
    let mut model = Model::new();
    for suffix in [TARGET_SUFFIX, REWRITE_SUFFIX] {
        for i in 0..16u8 {
            let gp = GpRegister::r64(i);
            model.set_bv(
                format!("{}_{}", gp, suffix),
                BitValue::new(u128::from(cpu.gp[usize::from(i)]), 64),
            );
            let ymm = SseRegister::ymm(i);
            model.set_bv(
                format!("{}_{}", ymm, suffix),
                BitValue::from_words(&cpu.sse[usize::from(i)], 256),
            );
        }
        for flag in Flag::all() {
            model.set_bool(format!("%{}_{}", flag, suffix), cpu.get_flag(flag));
        }
        let mut image = ArrayValue::filled(BitValue::zero(8));
        for (addr, byte) in &cpu.memory {
            image
                .entries
                .insert(u128::from(*addr), BitValue::new(u128::from(*byte), 8));
        }
        model.set_array(format!("MEM_{}", suffix), image);
    }
    model
}

impl SmtSolver for MockSolver {
    fn set_timeout(&mut self, timeout: Duration) {
        self.session.set_timeout(timeout);
    }

    fn get_timeout(&self) -> Duration {
        self.session.timeout()
    }

    fn is_sat(&mut self, constraints: &[SymExpr]) -> Result<bool> {
        self.session.clear_error();
        self.session.check_interrupt()?;
        self.queries += 1;
        self.model = None;

        if let Some(answer) = self.answers.pop_front() {
            if answer {
                self.model = Some(self.candidates.first().cloned().unwrap_or_default());
            }
            return Ok(answer);
        }

        for candidate in &self.candidates {
            match Self::satisfies(candidate, constraints) {
                Ok(true) => {
                    self.model = Some(candidate.clone());
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => return Err(self.session.fail(Error::Solver(e.to_string()))),
            }
        }
        Ok(false)
    }

    fn has_model(&self) -> bool {
        self.model.is_some()
    }

    fn eval_bv(&mut self, expr: &SymExpr) -> Result<BitValue> {
        Evaluator::new(self.current()?).eval_bv(expr)
    }

    fn eval_bool(&mut self, expr: &SymExpr) -> Result<bool> {
        Evaluator::new(self.current()?).eval_bool(expr)
    }

    fn get_model_array(&mut self, name: &str, _key: u16, value: u16) -> Result<ArrayValue> {
        Ok(self
            .current()?
            .get_array(name)
            .cloned()
            .unwrap_or_else(|| ArrayValue::filled(BitValue::zero(value))))
    }

    fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.session.interrupt_handle()
    }

    fn reset(&mut self) {
        self.session.reset();
        self.model = None;
    }

    fn get_error(&self) -> Option<&str> {
        self.session.error()
    }
}
