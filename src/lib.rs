// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # x64verify
//!
//! Equivalence checking for x86-64 code, as needed by a superoptimizer that
//! must prove its rewrites correct before using them.
//!
//! Given a target program and a candidate rewrite, both as AT&T listings
//! with the registers they read (def-ins) and the registers observed
//! afterwards (live-outs), the crate decides whether the two always agree on
//! the live-outs and on memory, or produces a concrete input on which they
//! differ.
//!
//! ## Features
//!
//! - **Symbolic semantics** - bit-precise formulas for general purpose,
//!   flag-setting and vector instructions, hand-written or composed from
//!   learned formulas
//! - **Two memory models** - a flat byte array, or stack / heap segments
//!   with explicit fault conditions
//! - **Loop support** - the DDEC validator learns paired cut points and
//!   inductive invariants from test-case data, then proves them
//! - **Pluggable solvers** - everything goes through [`solver::SmtSolver`];
//!   a z3 backend is available behind the `z3` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use x64verify::prelude::*;
//!
//! # fn solver() -> Box<dyn SmtSolver> { unimplemented!() }
//! let def_ins = RegSet::universe();
//! let live_outs = RegSet::linux_call_return();
//! let target = Cfg::new("movq %rdi, %rax\nimulq $8, %rax\nretq".parse()?,
//!     def_ins.clone(), live_outs.clone())?;
//! let rewrite = Cfg::new("leaq (,%rdi,8), %rax\nretq".parse()?, def_ins, live_outs)?;
//!
//! let mut validator = DdecValidator::new(solver(), ValidatorConfig::default())?;
//! if validator.verify(&target, &rewrite) {
//!     println!("equivalent");
//! } else if let Some(e) = validator.get_error() {
//!     println!("no verdict: {}", e);
//! } else {
//!     println!("differs on {:?}", validator.get_counter_examples()[0]);
//! }
//! # Ok::<(), x64verify::Error>(())
//! ```
//!
//! ## Architecture
//!
//! Leaf modules first:
//!
//! - [`x64`] - instructions, registers, AT&T parsing and concrete machine states
//! - [`symbolic`] - the expression language, simplifier and evaluator
//! - [`symstate`] - symbolic machine states and the memory models
//! - [`handlers`] - instruction semantics
//! - [`cfg`] - control flow graphs, loops, bounded paths, inlining
//! - [`solver`] - the solver interface and backends
//! - [`sandbox`] - concrete execution for test cases and counterexample replay
//! - [`validator`] - proof obligations, the DDEC and bounded validators
//! - [`verifier`] - the common [`verifier::Verifier`] interface
//!
//! Counterexamples are inputs, not errors: a failed verification either
//! has counterexamples or reports the [`Error`] that prevented a verdict.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use x64verify::prelude::*;
///
/// let cfg = Cfg::new("retq".parse()?, RegSet::empty(), RegSet::empty())?;
/// assert_eq!(cfg.num_blocks(), 3);
/// # Ok::<(), x64verify::Error>(())
/// ```
pub mod prelude;

/// Generic graph infrastructure.
pub mod utils;

/// The x86-64 instruction model.
pub mod x64;

/// Symbolic expressions, simplification and evaluation.
pub mod symbolic;

/// Symbolic machine states and memory models.
pub mod symstate;

/// Instruction semantics.
pub mod handlers;

/// Control flow graphs and their decomposition.
pub mod cfg;

/// The SMT solver interface.
pub mod solver;

/// Concrete execution of control flow graphs.
pub mod sandbox;

/// Equivalence validators.
pub mod validator;

/// The verifier interface and test-case verification.
pub mod verifier;

/// `x64verify` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `x64verify` Error type
///
/// # Examples
///
/// ```rust
/// use x64verify::{x64::Code, Error};
///
/// match "movq %rdi".parse::<Code>() {
///     Ok(_) => println!("parsed"),
///     Err(Error::Parse { line, message }) => println!("line {}: {}", line, message),
///     Err(e) => println!("error: {}", e),
/// }
/// ```
pub use error::Error;
