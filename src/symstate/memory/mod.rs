//! Symbolic memory models.
//!
//! Two models implement [`SymMemory`]:
//!
//! - [`FlatMemory`] - one byte array over the whole 64-bit address space
//! - [`SegmentedMemory`] - stack frames relative to the initial `%rsp`, each
//!   its own array, plus a heap array; constant-offset stack accesses never
//!   alias heap accesses
//!
//! Reads are built as concatenations of byte selects, most significant byte
//! first, so that after simplification a read of a just-written cell of the
//! same width is the written value.

mod flat;
mod segmented;

use std::{any::Any, fmt};

use crate::{symbolic::SymExpr, Result};

pub use flat::FlatMemory;
pub use segmented::{SegmentedMemory, DEFAULT_FRAME_SIZE};

/// How the flat model reports segmentation faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Accesses never fault.
    #[default]
    Suppress,
    /// An access faults when its last byte wraps around the address space.
    Explicit,
}

/// One accessed byte: its address and the term holding its content.
#[derive(Debug, Clone)]
pub struct ByteCell {
    /// Address of the byte, over the start state's variables
    pub address: SymExpr,
    /// Content of the byte (an 8-bit select)
    pub value: SymExpr,
}

/// A symbolic memory.
///
/// Sizes are in bits and must be a multiple of 8. Every access returns a
/// boolean fault condition; accesses the model considers safe return `false`.
pub trait SymMemory: fmt::Debug {
    /// Writes `value` (`size` bits, little endian) at `address`.
    ///
    /// # Returns
    ///
    /// The segmentation fault condition of the access.
    ///
    /// # Errors
    ///
    /// [`crate::Error::WidthMismatch`] if `value` is not `size` bits wide.
    fn write(&mut self, address: &SymExpr, value: &SymExpr, size: u16) -> Result<SymExpr>;

    /// Reads `size` bits at `address`.
    ///
    /// # Returns
    ///
    /// `(value, fault condition)`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::WidthMismatch`] on a non 64-bit address.
    fn read(&mut self, address: &SymExpr, size: u16) -> Result<(SymExpr, SymExpr)>;

    /// A formula stating that this memory and `other` hold the same bytes.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Validator`] if `other` is a different model.
    fn equality_constraint(&self, other: &dyn SymMemory) -> Result<SymExpr>;

    /// Like [`SymMemory::equality_constraint`], for states after the code
    /// returned: models that can tell stack bytes below the entry stack
    /// pointer apart leave them out, since the caller can no longer see them.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Validator`] if `other` is a different model.
    fn return_equality_constraint(&self, other: &dyn SymMemory) -> Result<SymExpr> {
        self.equality_constraint(other)
    }

    /// Side constraints the model needs to be sound.
    fn constraints(&self) -> Vec<SymExpr>;

    /// Every access so far as `(address, size in bits)`.
    fn access_list(&self) -> &[(SymExpr, u16)];

    /// The initial content of every byte accessed so far.
    ///
    /// # Errors
    ///
    /// Fails only on internal sort errors.
    fn start_cells(&self) -> Result<Vec<ByteCell>>;

    /// The current content of every byte accessed so far.
    ///
    /// # Errors
    ///
    /// Fails only on internal sort errors.
    fn current_cells(&self) -> Result<Vec<ByteCell>>;

    /// Clones the model behind a box.
    fn box_clone(&self) -> Box<dyn SymMemory>;

    /// Downcasting support for [`SymMemory::equality_constraint`].
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn SymMemory> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Sequence of byte addresses `address + 0 .. address + bytes`, simplified.
pub(crate) fn byte_addresses(address: &SymExpr, bytes: u16) -> Result<Vec<SymExpr>> {
    (0..bytes)
        .map(|i| crate::symbolic::simplify(&address.add(&SymExpr::constant(u128::from(i), 64))?))
        .collect()
}

/// Splits `value` into little-endian bytes.
pub(crate) fn value_bytes(value: &SymExpr, size: u16) -> Result<Vec<SymExpr>> {
    if value.width() != size || size % 8 != 0 || size == 0 {
        return Err(crate::Error::WidthMismatch {
            op: "memory write",
            left: value.sort().to_string(),
            right: format!("{} bits", size),
        });
    }
    (0..size / 8)
        .map(|i| value.extract(8 * i + 7, 8 * i))
        .collect()
}

/// Joins little-endian bytes into one value, most significant byte first.
pub(crate) fn join_bytes(bytes: &[SymExpr]) -> Result<SymExpr> {
    let mut iter = bytes.iter().rev();
    let Some(first) = iter.next() else {
        return Err(validator_error!("empty memory access"));
    };
    iter.try_fold(first.clone(), |acc, b| acc.concat(b))
}

/// The fault condition for an access of `bytes` bytes at `address`.
pub(crate) fn wrap_fault(policy: FaultPolicy, address: &SymExpr, bytes: u16) -> Result<SymExpr> {
    match policy {
        FaultPolicy::Suppress => Ok(SymExpr::bool(false)),
        FaultPolicy::Explicit => {
            let limit = u128::from(u64::MAX) - u128::from(bytes.saturating_sub(1));
            address.ugt(&SymExpr::constant(limit, 64))
        }
    }
}
