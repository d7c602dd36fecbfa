mod solver;

pub use solver::*;

use crate::{
    cfg::Cfg,
    x64::{CpuState, GpRegister, RegSet},
};

/// A graph with the given def-ins and `%rax` as the only live-out.
pub fn rax_cfg(text: &str, def_ins: RegSet) -> Cfg {
    let rax = RegSet::empty().with_gp(GpRegister::r64(0));
    Cfg::new(text.parse().unwrap(), def_ins, rax).unwrap()
}

/// A zeroed state with `%rdi` set.
pub fn rdi_input(value: u64) -> CpuState {
    let mut cpu = CpuState::new();
    cpu.set_gp(GpRegister::r64(7), value);
    cpu
}
