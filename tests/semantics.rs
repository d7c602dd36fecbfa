//! Instruction semantics integration tests.
//!
//! Programs run in the sandbox, which evaluates the handlers' circuits on
//! concrete states, and the results are compared with values computed
//! directly in Rust.

use x64verify::{
    cfg::Cfg,
    handlers::{Handler, SimpleHandler},
    sandbox::{Outcome, Sandbox, Signal},
    symstate::{memory::FaultPolicy, MemoryModel, SymState},
    x64::{CpuState, Flag, GpRegister, Instruction, RegSet},
    Result,
};

fn reg(name: &str) -> GpRegister {
    GpRegister::from_name(name).unwrap()
}

/// Boundary operands for the table-driven tests.
const VALUES: [u64; 6] = [
    0,
    1,
    0x8000_0000_0000_0001,
    0x7fff_ffff_8000_0000,
    0xdead_beef_0123_4567,
    u64::MAX,
];

/// Runs `text` on `input` and returns the final state. A zero `%rsp` is
/// moved away from the bottom of memory.
fn run_on(text: &str, mut input: CpuState) -> Result<CpuState> {
    let cfg = Cfg::new(text.parse()?, RegSet::universe(), RegSet::universe())?;
    if input.get_gp(reg("rsp")) == 0 {
        input.set_gp(reg("rsp"), 0x7fff_0000);
    }
    let trace = Sandbox::default().run(&cfg, &input)?;
    assert!(trace.outcome.is_completed(), "{}: {:?}", text, trace.outcome);
    Ok(trace.last)
}

/// Runs `text` on a state with the given 64-bit registers and returns the
/// final state.
fn run(text: &str, regs: &[(&str, u64)]) -> Result<CpuState> {
    let mut input = CpuState::new();
    for (name, value) in regs {
        input.set_gp(reg(name), *value);
    }
    run_on(text, input)
}

#[test]
fn test_add_carry_and_zero() -> Result<()> {
    let out = run("addq %rsi, %rdi", &[("rdi", u64::MAX), ("rsi", 1)])?;
    assert_eq!(out.get_gp(reg("rdi")), 0);
    assert!(out.get_flag(Flag::Cf));
    assert!(out.get_flag(Flag::Zf));
    assert!(!out.get_flag(Flag::Of));
    assert!(!out.get_flag(Flag::Sf));
    Ok(())
}

#[test]
fn test_signed_overflow() -> Result<()> {
    let out = run("addl %esi, %edi", &[("rdi", 0x7fff_ffff), ("rsi", 1)])?;
    assert_eq!(out.get_gp(reg("rdi")), 0x8000_0000);
    assert!(out.get_flag(Flag::Of));
    assert!(out.get_flag(Flag::Sf));
    assert!(!out.get_flag(Flag::Cf));
    Ok(())
}

#[test]
fn test_32_bit_write_zero_extends() -> Result<()> {
    let out = run("subl %esi, %edi", &[("rdi", 0xffff_ffff_0000_0001), ("rsi", 2)])?;
    assert_eq!(out.get_gp(reg("rdi")), 0xffff_ffff);
    assert!(out.get_flag(Flag::Cf));
    assert!(out.get_flag(Flag::Sf));
    Ok(())
}

#[test]
fn test_16_bit_write_preserves() -> Result<()> {
    let out = run("movw %si, %di", &[("rdi", 0x1111_2222_3333_4444), ("rsi", 0xaaaa)])?;
    assert_eq!(out.get_gp(reg("rdi")), 0x1111_2222_3333_aaaa);
    Ok(())
}

#[test]
fn test_shifts_and_multiply() -> Result<()> {
    let top = 0x8000_0000_0000_0000u64;
    let out = run("movq %rdi, %rax\nsarq $4, %rax\nshrq $4, %rdi", &[("rdi", top)])?;
    assert_eq!(out.get_gp(reg("rax")), ((top as i64) >> 4) as u64);
    assert_eq!(out.get_gp(reg("rdi")), top >> 4);

    let out = run("imulq %rsi, %rdi", &[("rdi", 3), ("rsi", (-5i64) as u64)])?;
    assert_eq!(out.get_gp(reg("rdi")) as i64, -15);
    Ok(())
}

#[test]
fn test_neg_not_xor() -> Result<()> {
    let out = run("negq %rdi\nnotq %rsi\nxorl %eax, %eax", &[("rdi", 5), ("rsi", 0), ("rax", 9)])?;
    assert_eq!(out.get_gp(reg("rdi")) as i64, -5);
    assert_eq!(out.get_gp(reg("rsi")), u64::MAX);
    assert_eq!(out.get_gp(reg("rax")), 0);
    assert!(out.get_flag(Flag::Zf));
    Ok(())
}

#[test]
fn test_lea_and_setcc() -> Result<()> {
    let out = run("leaq 8(%rdi,%rsi,4), %rax", &[("rdi", 100), ("rsi", 3)])?;
    assert_eq!(out.get_gp(reg("rax")), 120);

    let minus_one = u64::MAX;
    let out = run(
        "xorl %eax, %eax\ncmpq %rsi, %rdi\nsetl %al",
        &[("rdi", minus_one), ("rsi", 1)],
    )?;
    assert_eq!(out.get_gp(reg("rax")), 1);
    Ok(())
}

#[test]
fn test_push_pop_round_trip() -> Result<()> {
    let out = run("pushq %rdi\npopq %rax", &[("rdi", 0xdead_beef)])?;
    assert_eq!(out.get_gp(reg("rax")), 0xdead_beef);
    assert_eq!(out.get_gp(reg("rsp")), 0x7fff_0000);
    assert_eq!(out.read_u64(0x7fff_0000 - 8, 8), 0xdead_beef);
    Ok(())
}

#[test]
fn test_divide_by_zero_signals() -> Result<()> {
    let cfg = Cfg::new(
        "xorl %edx, %edx\ndivq %rcx\nretq".parse()?,
        RegSet::universe(),
        RegSet::universe(),
    )?;
    let trace = Sandbox::default().run(&cfg, &CpuState::new())?;
    assert!(matches!(
        trace.outcome,
        Outcome::Signal {
            signal: Signal::Fpe,
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_undefined_flags_are_fresh() -> Result<()> {
    let instr: Instruction = "imulq %rsi, %rdi".parse()?;
    let mut state = SymState::new("T", MemoryModel::Flat, FaultPolicy::Suppress);
    let before = state.flag(Flag::Zf).clone();
    SimpleHandler::new().build_circuit(&instr, &mut state)?;

    let after = state.flag(Flag::Zf);
    assert_ne!(after, &before);
    assert!(!after.is_true() && !after.is_false());
    assert!(state.written().contains_flag(Flag::Zf));
    Ok(())
}

/// Result and CF of a shift or rotate of the low `width` bits of `value`
/// by a masked count in `1..width`.
fn shift_reference(op: &str, value: u64, count: u32, width: u32) -> (u64, bool) {
    let mask = if width == 64 { u64::MAX } else { (1 << width) - 1 };
    let v = value & mask;
    let signed = if width == 64 { v as i64 } else { i64::from(v as u32 as i32) };
    let result = match op {
        "shl" => (v << count) & mask,
        "shr" => v >> count,
        "sar" => (signed >> count) as u64 & mask,
        "rol" => ((v << count) | (v >> (width - count))) & mask,
        _ => ((v >> count) | (v << (width - count))) & mask,
    };
    let carry = match op {
        "shl" => (v >> (width - count)) & 1 == 1,
        "shr" => (v >> (count - 1)) & 1 == 1,
        "sar" => (signed >> (count - 1)) & 1 == 1,
        "rol" => result & 1 == 1,
        _ => (result >> (width - 1)) & 1 == 1,
    };
    (result, carry)
}

#[test]
fn test_shift_and_rotate_counts() -> Result<()> {
    for (suffix, width, acc) in [("q", 64u32, "%rax"), ("l", 32, "%eax")] {
        let mask = if width == 64 { u64::MAX } else { 0xffff_ffff };
        let msb = |x: u64| (x >> (width - 1)) & 1 == 1;
        for op in ["shl", "shr", "sar", "rol", "ror"] {
            let text = format!("{}{} %cl, {}", op, suffix, acc);
            for value in VALUES {
                for count in [0u64, 1, 3, 31, 32, 33, 63, 64, 65] {
                    let mut input = CpuState::new();
                    input.set_gp(reg("rax"), value);
                    input.set_gp(reg("rcx"), count);
                    input.set_flag(Flag::Cf, true);
                    let out = run_on(&text, input)?;
                    let written = out.get_gp(reg("rax"));
                    let what = format!("{} of {:#x} by {}", text, value, count);

                    let masked = count as u32 & (width - 1);
                    if masked == 0 {
                        assert_eq!(written, value & mask, "{}", what);
                        assert!(out.get_flag(Flag::Cf), "{}", what);
                        continue;
                    }
                    let (result, carry) = shift_reference(op, value, masked, width);
                    assert_eq!(written, result, "{}", what);
                    assert_eq!(out.get_flag(Flag::Cf), carry, "{}", what);
                    if op.starts_with("sh") || op == "sar" {
                        assert_eq!(out.get_flag(Flag::Zf), result == 0, "{}", what);
                        assert_eq!(out.get_flag(Flag::Sf), msb(result), "{}", what);
                    }
                    if masked == 1 {
                        let overflow = match op {
                            "shl" | "rol" => msb(result) != carry,
                            "shr" => msb(value & mask),
                            "sar" => false,
                            _ => msb(result) != msb(result << 1),
                        };
                        assert_eq!(out.get_flag(Flag::Of), overflow, "{}", what);
                    }
                }
            }
        }
    }
    Ok(())
}

#[test]
fn test_bit_test_offsets() -> Result<()> {
    for value in VALUES {
        for offset in [0u64, 1, 31, 63, 64, 65, 127] {
            let bit = 1u64 << (offset & 63);
            for (op, expected) in [
                ("bt", value),
                ("bts", value | bit),
                ("btr", value & !bit),
                ("btc", value ^ bit),
            ] {
                let text = format!("{}q %rcx, %rax", op);
                let out = run(&text, &[("rax", value), ("rcx", offset)])?;
                let what = format!("{} of {:#x} at {}", text, value, offset);
                assert_eq!(out.get_gp(reg("rax")), expected, "{}", what);
                assert_eq!(out.get_flag(Flag::Cf), value & bit != 0, "{}", what);
            }
        }
    }
    Ok(())
}

#[test]
fn test_bit_scans_and_population_count() -> Result<()> {
    for value in VALUES.into_iter().chain([2, 0x80, 0xf0f0, 1 << 63]) {
        let out = run(
            "bsfq %rbx, %rax\nbsrq %rbx, %rcx\npopcntq %rbx, %rdx",
            &[("rbx", value), ("rax", 77), ("rcx", 77)],
        )?;
        let (forward, reverse) = if value == 0 {
            (77, 77)
        } else {
            (
                u64::from(value.trailing_zeros()),
                u64::from(63 - value.leading_zeros()),
            )
        };
        assert_eq!(out.get_gp(reg("rax")), forward, "bsf {:#x}", value);
        assert_eq!(out.get_gp(reg("rcx")), reverse, "bsr {:#x}", value);
        assert_eq!(out.get_gp(reg("rdx")), u64::from(value.count_ones()), "popcnt {:#x}", value);
        assert_eq!(out.get_flag(Flag::Zf), value == 0);
    }
    Ok(())
}

#[test]
fn test_bextr_fields() -> Result<()> {
    let fields = [
        (0u64, 0u64),
        (0, 64),
        (0, 200),
        (4, 8),
        (8, 80),
        (60, 8),
        (63, 1),
        (64, 8),
        (255, 255),
    ];
    for value in VALUES {
        for (start, length) in fields {
            let shifted = if start >= 64 { 0 } else { value >> start };
            let mask = if length >= 64 {
                u64::MAX
            } else {
                (1u64 << length) - 1
            };
            let expected = shifted & mask;
            let control = start | (length << 8);
            let out = run("bextrq %rcx, %rbx, %rax", &[("rbx", value), ("rcx", control)])?;
            let what = format!("bextr {:#x} start {} length {}", value, start, length);
            assert_eq!(out.get_gp(reg("rax")), expected, "{}", what);
            assert_eq!(out.get_flag(Flag::Zf), expected == 0, "{}", what);
            assert!(!out.get_flag(Flag::Cf), "{}", what);
        }
    }
    Ok(())
}

#[test]
fn test_lowest_set_bit_family() -> Result<()> {
    for value in VALUES.into_iter().chain([0b1011_0000]) {
        let below = value.wrapping_sub(1);
        for (op, expected, carry) in [
            ("blsr", value & below, value == 0),
            ("blsi", value & value.wrapping_neg(), value != 0),
            ("blsmsk", value ^ below, value == 0),
        ] {
            let out = run(&format!("{}q %rbx, %rax", op), &[("rbx", value)])?;
            assert_eq!(out.get_gp(reg("rax")), expected, "{} {:#x}", op, value);
            assert_eq!(out.get_flag(Flag::Cf), carry, "{} {:#x}", op, value);
            assert_eq!(out.get_flag(Flag::Sf), expected >> 63 == 1, "{} {:#x}", op, value);
        }
    }
    Ok(())
}

/// Every condition code after `cmpq %rsi, %rdi` with `%rdi = a`, `%rsi = b`.
fn conditions(a: u64, b: u64) -> [(&'static str, bool); 16] {
    let (sa, sb) = (a as i64, b as i64);
    let difference = a.wrapping_sub(b);
    let sign = (difference as i64) < 0;
    let overflow = sa.checked_sub(sb).is_none();
    let parity = (difference as u8).count_ones() % 2 == 0;
    [
        ("e", a == b),
        ("ne", a != b),
        ("l", sa < sb),
        ("ge", sa >= sb),
        ("le", sa <= sb),
        ("g", sa > sb),
        ("b", a < b),
        ("ae", a >= b),
        ("be", a <= b),
        ("a", a > b),
        ("s", sign),
        ("ns", !sign),
        ("o", overflow),
        ("no", !overflow),
        ("p", parity),
        ("np", !parity),
    ]
}

#[test]
fn test_setcc_and_cmovcc_conditions() -> Result<()> {
    let pairs = [
        (0, 0),
        (1, 0),
        (0, 1),
        (5, 5),
        (0x100, 1),
        (u64::MAX, 1),
        (1, u64::MAX),
        (i64::MIN as u64, 1),
        (i64::MAX as u64, u64::MAX),
    ];
    for (a, b) in pairs {
        for (cc, holds) in conditions(a, b) {
            let text = format!("cmpq %rsi, %rdi\nset{} %al\ncmov{}q %rdx, %rcx", cc, cc);
            let out = run(
                &text,
                &[("rdi", a), ("rsi", b), ("rax", 0xff00), ("rcx", 7), ("rdx", 9)],
            )?;
            let what = format!("{} after cmp {:#x}, {:#x}", cc, b, a);
            assert_eq!(out.get_gp(reg("rax")), 0xff00 | u64::from(holds), "set{}", what);
            assert_eq!(out.get_gp(reg("rcx")), if holds { 9 } else { 7 }, "cmov{}", what);
        }
    }
    Ok(())
}

/// Applies `f` to every `bits`-wide lane of `a` and `b`.
fn lanewise(a: u128, b: u128, bits: u32, f: impl Fn(u128, u128) -> u128) -> u128 {
    let mask = (1u128 << bits) - 1;
    (0..128 / bits).fold(0, |acc, i| {
        let shift = i * bits;
        acc | ((f((a >> shift) & mask, (b >> shift) & mask) & mask) << shift)
    })
}

fn low_xmm(cpu: &CpuState, index: usize) -> u128 {
    u128::from(cpu.sse[index][0]) | (u128::from(cpu.sse[index][1]) << 64)
}

/// `%xmm0 = a`, `%xmm1 = b`, with marker values in the upper lanes.
fn vector_input(a: u128, b: u128) -> CpuState {
    let mut cpu = CpuState::new();
    cpu.sse[0] = [a as u64, (a >> 64) as u64, 0x1111, 0x2222];
    cpu.sse[1] = [b as u64, (b >> 64) as u64, 0x3333, 0x4444];
    cpu
}

const VECTORS: [u128; 4] = [
    0,
    u128::MAX,
    0x0123_4567_89ab_cdef_fedc_ba98_7654_3210,
    0x8000_7fff_ff01_0080_0000_ffff_8080_7f7f,
];

#[test]
fn test_packed_lane_operations() -> Result<()> {
    let arithmetic = [
        ("paddb", 8, false),
        ("paddw", 16, false),
        ("paddd", 32, false),
        ("paddq", 64, false),
        ("psubb", 8, true),
        ("psubw", 16, true),
        ("psubd", 32, true),
        ("psubq", 64, true),
    ];
    for a in VECTORS {
        for b in VECTORS {
            let mut expected: Vec<(&str, u128)> = arithmetic
                .iter()
                .map(|(op, bits, subtract)| {
                    let lanes = lanewise(a, b, *bits, |x, y| {
                        if *subtract {
                            x.wrapping_sub(y)
                        } else {
                            x + y
                        }
                    });
                    (*op, lanes)
                })
                .collect();
            expected.extend([("pand", a & b), ("pandn", !a & b), ("por", a | b), ("pxor", a ^ b)]);

            for (op, value) in expected {
                let out = run_on(&format!("{} %xmm1, %xmm0", op), vector_input(a, b))?;
                assert_eq!(low_xmm(&out, 0), value, "{} {:#x}, {:#x}", op, b, a);
                assert_eq!(out.sse[0][2..], [0x1111, 0x2222], "{} keeps the upper half", op);
            }
        }
    }
    Ok(())
}

#[test]
fn test_packed_shuffle_and_movemask() -> Result<()> {
    for b in VECTORS {
        for imm in [0x00u32, 0x1b, 0x4e, 0xb1, 0xe4, 0xff] {
            let expected = (0..4).fold(0u128, |acc, i| {
                let from = (imm >> (2 * i)) & 3;
                acc | (((b >> (32 * from)) & 0xffff_ffff) << (32 * i))
            });
            let text = format!("pshufd ${:#x}, %xmm1, %xmm0", imm);
            let out = run_on(&text, vector_input(0, b))?;
            assert_eq!(low_xmm(&out, 0), expected, "{} of {:#x}", text, b);
        }

        let mask = (0..16).fold(0u64, |acc, i| acc | ((((b >> (8 * i + 7)) & 1) as u64) << i));
        let mut input = vector_input(0, b);
        input.set_gp(reg("rax"), u64::MAX);
        let out = run_on("pmovmskb %xmm1, %eax", input)?;
        assert_eq!(out.get_gp(reg("rax")), mask, "pmovmskb {:#x}", b);
    }
    Ok(())
}
