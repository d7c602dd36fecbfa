//! # x64verify Prelude
//!
//! The types needed to set up and run an equivalence check, for glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all x64verify operations
pub use crate::Error;

/// The result type used throughout x64verify
pub use crate::Result;

// ================================================================================================
// Programs
// ================================================================================================

/// Instructions, listings, registers and machine states
pub use crate::x64::{Code, CpuState, Flag, GpRegister, Instruction, RegSet, SseRegister};

/// Control flow graphs
pub use crate::cfg::{BlockId, Cfg, CfgPaths};

// ================================================================================================
// Semantics
// ================================================================================================

/// Symbolic expressions
pub use crate::symbolic::{simplify, BitValue, SymExpr};

/// Symbolic machine states
pub use crate::symstate::{MemoryModel, SymState};

/// Instruction handlers
pub use crate::handlers::{ComboHandler, Handler, SimpleHandler, StrataContext, SupportLevel};

// ================================================================================================
// Verification
// ================================================================================================

/// Solver interface
pub use crate::solver::SmtSolver;

/// The z3 backend
#[cfg(feature = "z3")]
pub use crate::solver::Z3Solver;

/// Concrete execution
pub use crate::sandbox::Sandbox;

/// Validators and their configuration
pub use crate::validator::{BoundedValidator, DdecValidator, Invariant, ValidatorConfig};

/// The verifier interface
pub use crate::verifier::{HoldOutVerifier, Verifier};
