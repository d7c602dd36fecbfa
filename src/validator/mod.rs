//! Equivalence validators.
//!
//! Two validators prove that a rewrite computes the same live-outs and
//! memory as its target:
//!
//! - [`DdecValidator`] handles loops by learning a dual automaton of
//!   paired cut points with inductive invariants
//! - [`BoundedValidator`] checks all pairs of paths up to a block bound
//!
//! Both discharge their proof obligations through an
//! [`ObligationChecker`] and are configured with a [`ValidatorConfig`].
//! The building blocks of the DDEC proof are public for inspection and
//! testing: the [`Invariant`] language, the [`DualAutomaton`], and the
//! [`ControlLearner`] and [`InvariantLearner`] that populate it.

mod bounded;
mod config;
mod control;
mod ddec;
mod dual;
mod invariants;
mod learner;
mod obligation;

pub use bounded::BoundedValidator;
pub use config::ValidatorConfig;
pub use control::ControlLearner;
pub use ddec::DdecValidator;
pub use dual::{DualAutomaton, DualEdge, DualState};
pub use invariants::{transform_with_assumption, Invariant, Side, Term, Variable};
pub use learner::InvariantLearner;
pub use obligation::{
    is_jump, CheckMode, Counterexample, JumpType, ObligationChecker, ObligationResult,
    REWRITE_SUFFIX, TARGET_SUFFIX,
};
