use std::{
    any::Any,
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

use crate::{
    symbolic::{base_offset, simplify, SymExpr},
    symstate::memory::{
        byte_addresses, join_bytes, value_bytes, wrap_fault, ByteCell, FaultPolicy, SymMemory,
    },
    Result,
};

/// Default frame size in bytes.
pub const DEFAULT_FRAME_SIZE: u64 = 4096;

/// Stack frames relative to the initial stack pointer, plus a heap.
///
/// An address of the form `rsp0 + c` with constant `c` is a stack access;
/// byte `c` lives in frame `c div frame_size` at offset `c mod frame_size`.
/// Every frame is its own array, created on first access. Every other
/// address goes to the heap array, which [`SymMemory::constraints`] keeps
/// outside the frames touched so far.
///
/// Copies of one memory share the set of touched frames, so a start state
/// cloned before execution can still state equality over frames that were
/// first touched afterwards.
#[derive(Debug, Clone)]
pub struct SegmentedMemory {
    name: String,
    rsp0: SymExpr,
    frame_size: u64,
    policy: FaultPolicy,
    heap_start: SymExpr,
    heap: SymExpr,
    frames: BTreeMap<i64, SymExpr>,
    touched: Rc<RefCell<BTreeSet<i64>>>,
    accesses: Vec<(SymExpr, u16)>,
}

enum Placement {
    Stack(i64),
    Heap,
}

impl SegmentedMemory {
    /// Creates a memory for a state whose initial stack pointer is `rsp0`.
    ///
    /// # Arguments
    ///
    /// * `name` - Prefix for the array variables
    /// * `rsp0` - The initial `%rsp` expression (usually a variable)
    /// * `frame_size` - Frame size in bytes, non-zero
    /// * `policy` - Fault reporting for heap accesses
    #[must_use]
    pub fn new(name: &str, rsp0: SymExpr, frame_size: u64, policy: FaultPolicy) -> Self {
        let heap_start = SymExpr::array_var(format!("{}_HEAP", name), 64, 8);
        Self {
            name: name.to_string(),
            rsp0,
            frame_size: frame_size.max(1),
            policy,
            heap: heap_start.clone(),
            heap_start,
            frames: BTreeMap::new(),
            touched: Rc::new(RefCell::new(BTreeSet::new())),
            accesses: Vec::new(),
        }
    }

    /// Configured frame size in bytes.
    #[must_use]
    pub fn frame_size(&self) -> u64 {
        self.frame_size
    }

    /// Indices of the frames touched by this memory or any of its copies.
    #[must_use]
    pub fn touched_frames(&self) -> Vec<i64> {
        self.touched.borrow().iter().copied().collect()
    }

    fn frame_start(&self, k: i64) -> SymExpr {
        let tag = if k < 0 {
            format!("m{}", k.unsigned_abs())
        } else {
            k.to_string()
        };
        SymExpr::array_var(format!("{}_F{}", self.name, tag), 64, 8)
    }

    fn frame_current(&self, k: i64) -> SymExpr {
        self.frames
            .get(&k)
            .cloned()
            .unwrap_or_else(|| self.frame_start(k))
    }

    fn frame_mut(&mut self, k: i64) -> &mut SymExpr {
        self.touched.borrow_mut().insert(k);
        let start = self.frame_start(k);
        self.frames.entry(k).or_insert(start)
    }

    fn place(&self, address: &SymExpr) -> Result<Placement> {
        let address = simplify(address)?;
        let (base, offset) = base_offset(&address);
        if base.as_ref() == Some(&self.rsp0) {
            if let Ok(c) = i64::try_from(offset.as_i128()) {
                return Ok(Placement::Stack(c));
            }
        }
        Ok(Placement::Heap)
    }

    /// `address .. address + size` lies below `rsp0 + low` or at or above `rsp0 + high`.
    fn outside_frames(&self, address: &SymExpr, size: u16, low: i64, high: i64) -> Result<SymExpr> {
        let at = |c: i64| simplify(&self.rsp0.add(&SymExpr::constant(u128::from(c as u64), 64))?);
        let last = u128::from(size / 8).saturating_sub(1);
        let end = address.add(&SymExpr::constant(last, 64))?;
        end.ult(&at(low)?)?.or(&address.uge(&at(high)?)?)
    }

    fn cells(&self, start: bool) -> Result<Vec<ByteCell>> {
        let mut out = Vec::new();
        for (address, size) in &self.accesses {
            match self.place(address)? {
                Placement::Stack(c) => {
                    for i in 0..i64::from(size / 8) {
                        let offset = c.wrapping_add(i);
                        let (k, index) = self.locate(offset);
                        let byte = self
                            .rsp0
                            .add(&SymExpr::constant(u128::from(offset as u64), 64))?;
                        let frame = if start {
                            self.frame_start(k)
                        } else {
                            self.frame_current(k)
                        };
                        out.push(ByteCell {
                            address: simplify(&byte)?,
                            value: frame.select(&index)?,
                        });
                    }
                }
                Placement::Heap => {
                    let heap = if start { &self.heap_start } else { &self.heap };
                    for byte in byte_addresses(address, size / 8)? {
                        out.push(ByteCell {
                            value: heap.select(&byte)?,
                            address: byte,
                        });
                    }
                }
            }
        }
        Ok(out)
    }

    /// Equality of the heaps and of every frame either side touched that
    /// `keep` accepts.
    fn equality_over(
        &self,
        other: &dyn SymMemory,
        keep: impl Fn(i64) -> bool,
    ) -> Result<SymExpr> {
        let other = other
            .as_any()
            .downcast_ref::<SegmentedMemory>()
            .ok_or_else(|| validator_error!("memory equality between different models"))?;
        if other.frame_size != self.frame_size {
            return Err(validator_error!(
                "memory equality between frame sizes {} and {}",
                self.frame_size,
                other.frame_size
            ));
        }

        let mut keys: BTreeSet<i64> = self.touched.borrow().clone();
        keys.extend(other.touched.borrow().iter().copied());
        keys.retain(|k| keep(*k));

        let mut terms = vec![self.heap.eq(&other.heap)?];
        for k in keys {
            terms.push(self.frame_current(k).eq(&other.frame_current(k))?);
        }
        SymExpr::and_all(&terms)
    }

    fn locate(&self, offset: i64) -> (i64, SymExpr) {
        let size = self.frame_size as i128;
        let offset = i128::from(offset);
        let k = offset.div_euclid(size) as i64;
        let index = offset.rem_euclid(size) as u128;
        (k, SymExpr::constant(index, 64))
    }
}

impl SymMemory for SegmentedMemory {
    fn write(&mut self, address: &SymExpr, value: &SymExpr, size: u16) -> Result<SymExpr> {
        let bytes = value_bytes(value, size)?;
        self.accesses.push((address.clone(), size));
        match self.place(address)? {
            Placement::Stack(c) => {
                for (i, byte) in bytes.iter().enumerate() {
                    let (k, index) = self.locate(c.wrapping_add(i as i64));
                    let frame = self.frame_mut(k);
                    *frame = frame.store(&index, byte)?;
                }
                Ok(SymExpr::bool(false))
            }
            Placement::Heap => {
                let addresses = byte_addresses(address, size / 8)?;
                for (addr, byte) in addresses.iter().zip(&bytes) {
                    self.heap = self.heap.store(addr, byte)?;
                }
                wrap_fault(self.policy, address, size / 8)
            }
        }
    }

    fn read(&mut self, address: &SymExpr, size: u16) -> Result<(SymExpr, SymExpr)> {
        self.accesses.push((address.clone(), size));
        match self.place(address)? {
            Placement::Stack(c) => {
                let mut bytes = Vec::with_capacity(usize::from(size / 8));
                for i in 0..i64::from(size / 8) {
                    let (k, index) = self.locate(c.wrapping_add(i));
                    bytes.push(self.frame_mut(k).select(&index)?);
                }
                Ok((join_bytes(&bytes)?, SymExpr::bool(false)))
            }
            Placement::Heap => {
                let bytes = byte_addresses(address, size / 8)?
                    .iter()
                    .map(|a| self.heap.select(a))
                    .collect::<Result<Vec<_>>>()?;
                Ok((join_bytes(&bytes)?, wrap_fault(self.policy, address, size / 8)?))
            }
        }
    }

    fn equality_constraint(&self, other: &dyn SymMemory) -> Result<SymExpr> {
        self.equality_over(other, |_| true)
    }

    fn return_equality_constraint(&self, other: &dyn SymMemory) -> Result<SymExpr> {
        self.equality_over(other, |k| k >= 0)
    }

    fn constraints(&self) -> Vec<SymExpr> {
        let touched = self.touched.borrow();
        let (Some(first), Some(last)) = (touched.first(), touched.last()) else {
            return Vec::new();
        };
        let size = i128::from(self.frame_size);
        let low = (i128::from(*first) * size) as i64;
        let high = ((i128::from(*last) + 1) * size) as i64;

        self.accesses
            .iter()
            .filter(|(address, _)| matches!(self.place(address), Ok(Placement::Heap)))
            .filter_map(|(address, size)| self.outside_frames(address, *size, low, high).ok())
            .collect()
    }

    fn access_list(&self) -> &[(SymExpr, u16)] {
        &self.accesses
    }

    fn start_cells(&self) -> Result<Vec<ByteCell>> {
        self.cells(true)
    }

    fn current_cells(&self) -> Result<Vec<ByteCell>> {
        self.cells(false)
    }

    fn box_clone(&self) -> Box<dyn SymMemory> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
