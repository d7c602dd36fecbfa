//! Instruction semantics.
//!
//! A [`Handler`] translates one instruction into updates of a [`SymState`]:
//! new expressions for the registers, flags and memory bytes it writes, plus
//! the signals it may raise. Three handlers are provided:
//!
//! - [`SimpleHandler`] - hand-written semantics for a fixed table of
//!   mnemonics, dispatched on arity
//! - [`StrataHandler`] - semantics composed from learned formulas on disk,
//!   generalized across operand kinds and widths
//! - [`ComboHandler`] - tries an ordered list of handlers
//!
//! # Support levels
//!
//! [`Handler::get_support`] answers how far a handler can be trusted for an
//! instruction. The meaningful values are `NONE`, `BASIC`, `BASIC | CEG`
//! and `BASIC | CEG | ANALYSIS`: `BASIC` means a circuit can be built, `CEG`
//! that counterexamples derived from it are concrete behaviour, `ANALYSIS`
//! that the circuit is precise enough for static analyses.
//!
//! # Example
//!
//! ```rust
//! use x64verify::handlers::{Handler, SimpleHandler, SupportLevel};
//! use x64verify::symstate::{memory::FaultPolicy, MemoryModel, SymState};
//! use x64verify::x64::Instruction;
//!
//! let instr: Instruction = "addq %rsi, %rdi".parse()?;
//! let mut handler = SimpleHandler::new();
//! assert!(handler.get_support(&instr).contains(SupportLevel::BASIC));
//!
//! let mut state = SymState::new("T", MemoryModel::Flat, FaultPolicy::Suppress);
//! handler.build_circuit(&instr, &mut state)?;
//! # Ok::<(), x64verify::Error>(())
//! ```

pub mod flags;
mod simple;
mod strata;

use bitflags::bitflags;

use crate::{symstate::SymState, x64::Instruction, Result};

pub use simple::SimpleHandler;
pub use strata::{StrataContext, StrataHandler, SupportReason};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// How well a handler supports an instruction.
    pub struct SupportLevel: u8 {
        /// A circuit can be built
        const BASIC = 0x01;
        /// Counterexamples from the circuit are real behaviour
        const CEG = 0x02;
        /// The circuit is fit for static analysis
        const ANALYSIS = 0x04;
    }
}

impl SupportLevel {
    /// No support at all.
    pub const NONE: SupportLevel = SupportLevel::empty();

    /// `BASIC | CEG`
    pub const CHECKABLE: SupportLevel = SupportLevel::BASIC.union(SupportLevel::CEG);

    /// `BASIC | CEG | ANALYSIS`
    pub const FULL: SupportLevel = SupportLevel::CHECKABLE.union(SupportLevel::ANALYSIS);
}

/// Translates instructions into symbolic state updates.
pub trait Handler {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Reports how well `instr` is supported; `NONE` if not at all.
    fn get_support(&self, instr: &Instruction) -> SupportLevel;

    /// Applies the semantics of `instr` to `state`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Unsupported`] if the instruction is outside the
    /// handler's coverage; [`crate::Error::WidthMismatch`] if formula
    /// construction goes wrong, which is never expected and must not be
    /// treated as a missing feature.
    fn build_circuit(&mut self, instr: &Instruction, state: &mut SymState) -> Result<()>;
}

/// Tries its handlers in order; the first one that supports an instruction
/// builds its circuit.
pub struct ComboHandler {
    handlers: Vec<Box<dyn Handler>>,
}

impl ComboHandler {
    /// Creates a combination of `handlers`, tried in the given order.
    #[must_use]
    pub fn new(handlers: Vec<Box<dyn Handler>>) -> Self {
        Self { handlers }
    }

    /// The usual combination: the simple handler, then learned formulas from
    /// `context` if there is one.
    #[must_use]
    pub fn standard(context: Option<StrataContext>) -> Self {
        let mut handlers: Vec<Box<dyn Handler>> = vec![Box::new(SimpleHandler::new())];
        if let Some(context) = context {
            handlers.push(Box::new(StrataHandler::new(context)));
        }
        Self::new(handlers)
    }

    /// Appends a handler with the lowest priority.
    pub fn push(&mut self, handler: Box<dyn Handler>) {
        self.handlers.push(handler);
    }
}

impl Default for ComboHandler {
    fn default() -> Self {
        Self::standard(None)
    }
}

impl Handler for ComboHandler {
    fn name(&self) -> &'static str {
        "combo"
    }

    fn get_support(&self, instr: &Instruction) -> SupportLevel {
        self.handlers
            .iter()
            .map(|h| h.get_support(instr))
            .find(|s| !s.is_empty())
            .unwrap_or(SupportLevel::NONE)
    }

    fn build_circuit(&mut self, instr: &Instruction, state: &mut SymState) -> Result<()> {
        for handler in &mut self.handlers {
            if !handler.get_support(instr).is_empty() {
                log::trace!("{} handles {}", handler.name(), instr);
                return handler.build_circuit(instr, state);
            }
        }
        Err(unsupported!("no handler supports {}", instr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        symstate::{memory::FaultPolicy, MemoryModel},
        Error,
    };

    struct Refuses;

    impl Handler for Refuses {
        fn name(&self) -> &'static str {
            "refuses"
        }

        fn get_support(&self, _instr: &Instruction) -> SupportLevel {
            SupportLevel::NONE
        }

        fn build_circuit(&mut self, instr: &Instruction, _state: &mut SymState) -> Result<()> {
            Err(unsupported!("{}", instr))
        }
    }

    #[test]
    fn test_support_levels() {
        assert!(SupportLevel::NONE.is_empty());
        assert!(SupportLevel::FULL.contains(SupportLevel::CEG));
        assert!(!SupportLevel::CHECKABLE.contains(SupportLevel::ANALYSIS));
    }

    #[test]
    fn test_combo_falls_through() {
        let mut combo = ComboHandler::new(vec![Box::new(Refuses), Box::new(SimpleHandler::new())]);
        let instr: Instruction = "incq %rax".parse().unwrap();
        assert_eq!(combo.get_support(&instr), SupportLevel::FULL);
        let mut state = SymState::new("T", MemoryModel::Flat, FaultPolicy::Suppress);
        combo.build_circuit(&instr, &mut state).unwrap();
        assert!(state.written().contains_gp(crate::x64::GpRegister::r64(0)));
    }

    #[test]
    fn test_combo_without_support() {
        let mut combo = ComboHandler::new(vec![Box::new(Refuses)]);
        let instr: Instruction = "incq %rax".parse().unwrap();
        let mut state = SymState::new("T", MemoryModel::Flat, FaultPolicy::Suppress);
        assert!(matches!(
            combo.build_circuit(&instr, &mut state),
            Err(Error::Unsupported(_))
        ));
    }
}
