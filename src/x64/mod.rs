//! The x86-64 instruction model consumed by the handlers and the CFG.
//!
//! This is deliberately small: instructions are a mnemonic, an optional
//! condition code and typed operands; programs are parsed from AT&T text.
//! There is no binary encoder or decoder.
//!
//! # Example
//!
//! ```rust
//! use x64verify::x64::{Code, Mnemonic};
//!
//! let code: Code = "movq %rdx, (%rsp)\nmovq (%rsp), %rax\nretq".parse()?;
//! assert_eq!(code.len(), 3);
//! assert_eq!(code[0].mnemonic(), Mnemonic::Mov);
//! assert_eq!(code[0].opcode().to_string(), "mov_m64_r64");
//! # Ok::<(), x64verify::Error>(())
//! ```

mod cpustate;
mod instruction;
mod opcode;
mod operand;
mod parser;
mod register;

pub use cpustate::{mask, CpuState};
pub use instruction::{Code, Instruction};
pub use opcode::{Condition, Mnemonic, Opcode};
pub use operand::{Immediate, Memory, Operand, OperandKind};
pub use parser::parse_code;
pub use register::{Flag, GpRegister, RegSet, SseRegister, RBP, RSP};
