use std::any::Any;

use crate::{
    symbolic::SymExpr,
    symstate::memory::{
        byte_addresses, join_bytes, value_bytes, wrap_fault, ByteCell, FaultPolicy, SymMemory,
    },
    Result,
};

/// A single byte array covering the whole address space.
///
/// With a stack pointer attached, [`SymMemory::return_equality_constraint`]
/// ignores accessed bytes below it: an address `a` is below `rsp0` when
/// `a - rsp0` is negative as a signed 64-bit value.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    start: SymExpr,
    heap: SymExpr,
    policy: FaultPolicy,
    rsp0: Option<SymExpr>,
    accesses: Vec<(SymExpr, u16)>,
}

impl FlatMemory {
    /// Creates a memory whose initial content is the array variable `name`.
    #[must_use]
    pub fn new(name: &str, policy: FaultPolicy) -> Self {
        let start = SymExpr::array_var(name, 64, 8);
        Self {
            heap: start.clone(),
            start,
            policy,
            rsp0: None,
            accesses: Vec::new(),
        }
    }

    /// Attaches the initial `%rsp` expression.
    #[must_use]
    pub fn with_stack_pointer(mut self, rsp0: SymExpr) -> Self {
        self.rsp0 = Some(rsp0);
        self
    }

    /// The array variable holding the initial content.
    #[must_use]
    pub fn start_array(&self) -> &SymExpr {
        &self.start
    }

    /// The current content: the start array under every store so far.
    #[must_use]
    pub fn current(&self) -> &SymExpr {
        &self.heap
    }

    fn cells(&self, array: &SymExpr) -> Result<Vec<ByteCell>> {
        let mut out = Vec::new();
        for (address, size) in &self.accesses {
            for byte in byte_addresses(address, size / 8)? {
                out.push(ByteCell {
                    value: array.select(&byte)?,
                    address: byte,
                });
            }
        }
        Ok(out)
    }

    fn same_model<'a>(&self, other: &'a dyn SymMemory) -> Result<&'a FlatMemory> {
        other
            .as_any()
            .downcast_ref::<FlatMemory>()
            .ok_or_else(|| validator_error!("memory equality between different models"))
    }
}

/// `array` with every byte of `bytes` below `rsp0` overwritten by zero.
fn scrub_below(array: &SymExpr, bytes: &[SymExpr], rsp0: &SymExpr) -> Result<SymExpr> {
    let zero = SymExpr::constant(0, 8);
    let origin = SymExpr::constant(0, 64);
    bytes.iter().try_fold(array.clone(), |acc, byte| {
        let dead = byte.sub(rsp0)?.slt(&origin)?;
        acc.store(byte, &dead.ite(&zero, &acc.select(byte)?)?)
    })
}

impl SymMemory for FlatMemory {
    fn write(&mut self, address: &SymExpr, value: &SymExpr, size: u16) -> Result<SymExpr> {
        let bytes = value_bytes(value, size)?;
        let addresses = byte_addresses(address, size / 8)?;
        for (addr, byte) in addresses.iter().zip(&bytes) {
            self.heap = self.heap.store(addr, byte)?;
        }
        self.accesses.push((address.clone(), size));
        wrap_fault(self.policy, address, size / 8)
    }

    fn read(&mut self, address: &SymExpr, size: u16) -> Result<(SymExpr, SymExpr)> {
        let bytes = byte_addresses(address, size / 8)?
            .iter()
            .map(|a| self.heap.select(a))
            .collect::<Result<Vec<_>>>()?;
        self.accesses.push((address.clone(), size));
        Ok((join_bytes(&bytes)?, wrap_fault(self.policy, address, size / 8)?))
    }

    fn equality_constraint(&self, other: &dyn SymMemory) -> Result<SymExpr> {
        self.heap.eq(&self.same_model(other)?.heap)
    }

    fn return_equality_constraint(&self, other: &dyn SymMemory) -> Result<SymExpr> {
        let other = self.same_model(other)?;
        let Some(rsp0) = &self.rsp0 else {
            return self.heap.eq(&other.heap);
        };
        // Bytes neither side accessed are equal whenever the start memories are.
        let mut bytes = Vec::new();
        for (address, size) in self.accesses.iter().chain(&other.accesses) {
            bytes.extend(byte_addresses(address, size / 8)?);
        }
        scrub_below(&self.heap, &bytes, rsp0)?.eq(&scrub_below(&other.heap, &bytes, rsp0)?)
    }

    fn constraints(&self) -> Vec<SymExpr> {
        Vec::new()
    }

    fn access_list(&self) -> &[(SymExpr, u16)] {
        &self.accesses
    }

    fn start_cells(&self) -> Result<Vec<ByteCell>> {
        self.cells(&self.start)
    }

    fn current_cells(&self) -> Result<Vec<ByteCell>> {
        self.cells(&self.heap)
    }

    fn box_clone(&self) -> Box<dyn SymMemory> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::{simplify, BitValue, Evaluator, Model};

    #[test]
    fn test_read_after_write_simplifies() {
        let mut mem = FlatMemory::new("MEM", FaultPolicy::Suppress);
        let addr = SymExpr::var("a", 64);
        let value = SymExpr::var("v", 32);
        mem.write(&addr, &value, 32).unwrap();
        let (read, fault) = mem.read(&addr, 32).unwrap();
        assert_eq!(simplify(&read).unwrap(), value);
        assert!(fault.is_false());
        assert_eq!(mem.access_list().len(), 2);
    }

    #[test]
    fn test_disjoint_write_is_skipped() {
        let mut mem = FlatMemory::new("MEM", FaultPolicy::Suppress);
        let rsp = SymExpr::var("rsp", 64);
        let lo = rsp.add(&SymExpr::constant(8, 64)).unwrap();
        mem.write(&rsp, &SymExpr::var("x", 64), 64).unwrap();
        mem.write(&lo, &SymExpr::var("y", 64), 64).unwrap();
        let (read, _) = mem.read(&rsp, 64).unwrap();
        assert_eq!(simplify(&read).unwrap(), SymExpr::var("x", 64));
    }

    #[test]
    fn test_little_endian_layout() {
        let mut mem = FlatMemory::new("MEM", FaultPolicy::Suppress);
        let addr = SymExpr::constant(0x100, 64);
        mem.write(&addr, &SymExpr::constant(0x1122_3344, 32), 32).unwrap();
        let (byte, _) = mem.read(&addr, 8).unwrap();
        let model = Model::new();
        let mut eval = Evaluator::new(&model);
        assert_eq!(eval.eval_bv(&byte).unwrap(), BitValue::new(0x44, 8));
    }

    #[test]
    fn test_explicit_fault_on_wrap() {
        let mut mem = FlatMemory::new("MEM", FaultPolicy::Explicit);
        let (_, fault) = mem.read(&SymExpr::constant(u128::from(u64::MAX), 64), 16).unwrap();
        let model = Model::new();
        assert!(Evaluator::new(&model).eval_bool(&fault).unwrap());
        let (_, fault) = mem.read(&SymExpr::constant(0x1000, 64), 64).unwrap();
        assert!(!Evaluator::new(&model).eval_bool(&fault).unwrap());
    }

    #[test]
    fn test_return_equality_ignores_scratch_below_stack_pointer() {
        let rsp = SymExpr::var("rsp", 64);
        let at = |c: i64| rsp.add(&SymExpr::constant(u128::from(c as u64), 64)).unwrap();
        let target = FlatMemory::new("MEM", FaultPolicy::Suppress).with_stack_pointer(rsp.clone());
        let mut rewrite = target.clone();
        rewrite.write(&at(-8), &SymExpr::var("v", 64), 64).unwrap();

        let mut model = Model::new();
        model.set_bv("v", BitValue::new(0x1234, 64));
        // Also below the stack pointer once the push wraps around zero.
        for rsp in [0x8000u128, 3] {
            model.set_bv("rsp", BitValue::new(rsp, 64));
            let mut eval = Evaluator::new(&model);
            let full = target.equality_constraint(&rewrite).unwrap();
            assert!(!eval.eval_bool(&full).unwrap());
            let live = target.return_equality_constraint(&rewrite).unwrap();
            assert!(eval.eval_bool(&live).unwrap());
        }

        rewrite.write(&at(8), &SymExpr::var("v", 64), 64).unwrap();
        let live = target.return_equality_constraint(&rewrite).unwrap();
        assert!(!Evaluator::new(&model).eval_bool(&live).unwrap());
    }

    #[test]
    fn test_width_mismatch_on_write() {
        let mut mem = FlatMemory::new("MEM", FaultPolicy::Suppress);
        let err = mem.write(&SymExpr::var("a", 64), &SymExpr::var("v", 16), 32);
        assert!(matches!(err, Err(crate::Error::WidthMismatch { .. })));
    }
}
