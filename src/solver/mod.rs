//! SMT solver bridge.
//!
//! The validators only talk to solvers through [`SmtSolver`]: a conjunction
//! of boolean [`SymExpr`]s goes in, `sat` / `unsat` comes out, and after a
//! `sat` answer the model can be queried. An answer of `unknown` (timeout,
//! resource limits) is reported as [`crate::Error::SolverTimeout`] and must
//! never be read as a disproof.
//!
//! The z3 backend lives behind the `z3` cargo feature.
//!
//! # Cancellation
//!
//! Every solver owns an interrupt flag. [`SmtSolver::interrupt`] sets it,
//! and [`SmtSolver::interrupt_handle`] hands out the shared flag so another
//! thread can do the same. The flag is checked around every query; an
//! interrupted query fails with [`crate::Error::SolverInterrupted`] and the
//! flag stays set until [`SmtSolver::reset`].

#[cfg(feature = "z3")]
mod z3;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    symbolic::{ArrayValue, BitValue, SymExpr},
    symstate::ModelView,
    Error, Result,
};

#[cfg(feature = "z3")]
pub use self::z3::Z3Solver;

/// Default per-query timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A satisfiability oracle over symbolic expressions.
pub trait SmtSolver {
    /// Sets the per-query time limit.
    fn set_timeout(&mut self, timeout: Duration);

    /// The per-query time limit.
    fn get_timeout(&self) -> Duration;

    /// Decides whether the conjunction of `constraints` is satisfiable.
    ///
    /// # Errors
    ///
    /// [`Error::SolverTimeout`] if the solver gave up,
    /// [`Error::SolverInterrupted`] if the interrupt flag is set and
    /// [`Error::Solver`] for anything else the backend reports.
    fn is_sat(&mut self, constraints: &[SymExpr]) -> Result<bool>;

    /// `true` if the last query was satisfiable and a model is available.
    fn has_model(&self) -> bool;

    /// Value of a bit-vector expression in the current model.
    ///
    /// Variables not constrained by the last query may take any value.
    ///
    /// # Errors
    ///
    /// [`Error::Solver`] if no model is available.
    fn eval_bv(&mut self, expr: &SymExpr) -> Result<BitValue>;

    /// Value of a boolean expression in the current model.
    ///
    /// # Errors
    ///
    /// [`Error::Solver`] if no model is available.
    fn eval_bool(&mut self, expr: &SymExpr) -> Result<bool>;

    /// Value of the bit-vector variable `name` in the current model.
    ///
    /// # Errors
    ///
    /// [`Error::Solver`] if no model is available.
    fn get_model_bv(&mut self, name: &str, width: u16) -> Result<BitValue> {
        self.eval_bv(&SymExpr::var(name, width))
    }

    /// Value of the boolean variable `name` in the current model.
    ///
    /// # Errors
    ///
    /// [`Error::Solver`] if no model is available.
    fn get_model_bool(&mut self, name: &str) -> Result<bool> {
        self.eval_bool(&SymExpr::bool_var(name))
    }

    /// Value of the array variable `name` in the current model.
    ///
    /// # Errors
    ///
    /// [`Error::Solver`] if no model is available or the backend cannot
    /// express the array as explicit entries over a default.
    fn get_model_array(&mut self, name: &str, key: u16, value: u16) -> Result<ArrayValue>;

    /// The shared interrupt flag.
    fn interrupt_handle(&self) -> Arc<AtomicBool>;

    /// Requests that the running (or next) query stops.
    fn interrupt(&self) {
        self.interrupt_handle().store(true, Ordering::SeqCst);
    }

    /// Forgets the session: variable table, model, error and interrupt flag.
    fn reset(&mut self);

    /// The error of the last query, if it failed.
    fn get_error(&self) -> Option<&str>;

    /// `true` if the last query failed.
    fn has_error(&self) -> bool {
        self.get_error().is_some()
    }
}

/// Bookkeeping shared by solver implementations.
///
/// Keeps the timeout, the interrupt flag and the last error, and turns
/// query outcomes into the error convention of [`SmtSolver::is_sat`].
#[derive(Debug, Clone)]
pub struct SolverSession {
    timeout: Duration,
    interrupt: Arc<AtomicBool>,
    error: Option<String>,
}

impl Default for SolverSession {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interrupt: Arc::new(AtomicBool::new(false)),
            error: None,
        }
    }
}

impl SolverSession {
    /// A session with the default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-query time limit.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the per-query time limit.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The shared interrupt flag.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Fails with [`Error::SolverInterrupted`] if the flag is set.
    ///
    /// # Errors
    ///
    /// [`Error::SolverInterrupted`] when an interrupt was requested.
    pub fn check_interrupt(&mut self) -> Result<()> {
        if self.interrupt.load(Ordering::SeqCst) {
            return Err(self.fail(Error::SolverInterrupted));
        }
        Ok(())
    }

    /// Records `error` as the last error and returns it.
    pub fn fail(&mut self, error: Error) -> Error {
        self.error = Some(error.to_string());
        error
    }

    /// Forgets the last error.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// The last error.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Clears the error and the interrupt flag.
    pub fn reset(&mut self) {
        self.error = None;
        self.interrupt.store(false, Ordering::SeqCst);
    }
}

/// Reads counterexamples out of a solver model.
///
/// Lets [`crate::symstate::SymState::concretize`] turn a state into a
/// [`crate::x64::CpuState`] after a satisfiable query.
pub struct SolverModel<'a> {
    solver: &'a mut dyn SmtSolver,
}

impl<'a> SolverModel<'a> {
    /// Wraps `solver`, which must hold a model.
    ///
    /// # Errors
    ///
    /// [`Error::Solver`] if the last query produced no model.
    pub fn new(solver: &'a mut dyn SmtSolver) -> Result<Self> {
        if !solver.has_model() {
            return Err(Error::Solver("no model available".to_string()));
        }
        Ok(Self { solver })
    }
}

impl ModelView for SolverModel<'_> {
    fn bv(&mut self, expr: &SymExpr) -> Result<BitValue> {
        self.solver.eval_bv(expr)
    }

    fn boolean(&mut self, expr: &SymExpr) -> Result<bool> {
        self.solver.eval_bool(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_interrupt() {
        let mut session = SolverSession::new();
        assert!(session.check_interrupt().is_ok());

        let handle = session.interrupt_handle();
        std::thread::spawn(move || handle.store(true, Ordering::SeqCst))
            .join()
            .unwrap();
        assert!(matches!(
            session.check_interrupt(),
            Err(Error::SolverInterrupted)
        ));
        assert!(session.error().is_some());

        session.reset();
        assert!(session.check_interrupt().is_ok());
        assert!(session.error().is_none());
    }

    #[test]
    fn test_session_timeout() {
        let mut session = SolverSession::new();
        assert_eq!(session.timeout(), DEFAULT_TIMEOUT);
        session.set_timeout(Duration::from_millis(250));
        assert_eq!(session.timeout(), Duration::from_millis(250));
    }
}
