//! Call inlining.

use rustc_hash::FxHashMap;

use crate::{
    cfg::Cfg,
    x64::{Code, GpRegister, Instruction, Memory, Mnemonic, Operand, RSP},
    Error, Result,
};

const MAX_DEPTH: usize = 8;

fn adjust_rsp(delta: i64) -> Instruction {
    let rsp = GpRegister::r64(RSP);
    Instruction::new(
        Mnemonic::Lea,
        vec![Operand::Gp(rsp), Operand::Mem(Memory::base_disp(rsp, delta, 64))],
    )
}

fn jump_to(label: &str) -> Instruction {
    Instruction::new(Mnemonic::Jmp, vec![Operand::Label(label.to_string())])
}

/// Replaces every `call` of a function in `library` with the function body.
///
/// The call's stack effect is kept: the return address slot is reserved with
/// `lea -0x8(%rsp), %rsp` before the body, and every `ret` in the body
/// becomes a release of the slot followed by a jump past the inlined code.
/// Labels inside the body are renamed so repeated inlining stays unique.
/// Calls to functions outside the library are left alone.
///
/// # Errors
///
/// Returns [`Error::GraphError`] for recursion deeper than eight levels, or
/// any error from rebuilding the graph.
pub fn inline_functions(cfg: &Cfg, library: &FxHashMap<String, Code>) -> Result<Cfg> {
    let mut code = cfg.get_code().clone();
    let mut counter = 0usize;

    for _ in 0..MAX_DEPTH {
        let inlinable = |i: &Instruction| {
            i.is_call() && i.target_label().is_some_and(|l| library.contains_key(l))
        };
        if !code.iter().any(inlinable) {
            return Cfg::new(code, cfg.def_ins().clone(), cfg.live_outs().clone());
        }

        let mut out = Code::default();
        for instr in code.iter() {
            let Some(body) = instr
                .target_label()
                .filter(|_| inlinable(instr))
                .and_then(|l| library.get(l))
            else {
                out.push(instr.clone());
                continue;
            };

            counter += 1;
            let suffix = format!("_inl{}", counter);
            let done = format!(".Lret{}", suffix);
            let rename = |l: &str| format!("{}{}", l, suffix);

            out.push(adjust_rsp(-8));
            for inner in body.iter() {
                if inner.is_ret() {
                    out.push(adjust_rsp(8));
                    out.push(jump_to(&done));
                    continue;
                }
                let mut copy = inner.clone();
                if (inner.is_label_defn() || inner.is_jump()) && !inner.is_call() {
                    if let Some(l) = inner.target_label() {
                        copy.set_operand(0, Operand::Label(rename(l)));
                    }
                }
                out.push(copy);
            }
            out.push(Instruction::label(done));
        }
        code = out;
    }

    Err(Error::GraphError(format!(
        "call inlining exceeded {} levels",
        MAX_DEPTH
    )))
}
