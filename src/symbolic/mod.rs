//! Symbolic bit-vector, boolean and array expressions.
//!
//! This module is the term language shared by the handlers, the memory
//! models, the invariants and the solver bridge:
//!
//! - [`SymExpr`] - immutable, shared expression DAG with sort checking
//! - [`BitValue`] - concrete bit-vectors up to 256 bits
//! - [`Simplifier`] - local rewriting (constant folding, extract/concat,
//!   read-over-write)
//! - [`Evaluator`] / [`Model`] - concrete evaluation under an assignment
//! - [`Substitution`] - variable renaming and instantiation
//!
//! # Example
//!
//! ```rust
//! use x64verify::symbolic::{simplify, SymExpr};
//!
//! let rax = SymExpr::var("%rax", 64);
//! let e = rax.add(&SymExpr::constant(0, 64))?.extract(31, 0)?;
//! assert_eq!(simplify(&e)?, rax.extract(31, 0)?);
//! # Ok::<(), x64verify::Error>(())
//! ```

mod eval;
mod expr;
mod ops;
mod simplify;
mod value;
mod visit;

pub use eval::{builtin_uf, eval_bool, eval_bv, ArrayValue, Evaluator, Model, Value};
pub use expr::{Node, Sort, SymExpr};
pub use ops::{BinOp, BoolOp, CmpOp, UnOp};
pub use simplify::{simplify, Simplifier};
pub use value::{check_width, BitValue, MAX_WIDTH};
pub use visit::{children, dag_size, variables, Substitution};

pub(crate) use simplify::base_offset;
