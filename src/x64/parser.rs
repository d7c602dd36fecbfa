//! AT&T syntax parser.
//!
//! Accepts one instruction or label definition per line, `#` comments and
//! blank lines. Size suffixes (`b`, `w`, `l`, `q`) are optional whenever a
//! register operand determines the width. Operands are stored
//! destination-first.

use std::str::FromStr;

use crate::{
    x64::{
        instruction::{Code, Instruction},
        opcode::{Condition, Mnemonic},
        operand::{Immediate, Memory, Operand},
        register::{GpRegister, SseRegister},
    },
    Error, Result,
};

struct Resolved {
    mnemonic: Mnemonic,
    condition: Option<Condition>,
    suffix: Option<u16>,
    extend_from: Option<u16>,
}

fn suffix_width(c: char) -> Option<u16> {
    match c {
        'b' => Some(8),
        'w' => Some(16),
        'l' => Some(32),
        'q' => Some(64),
        _ => None,
    }
}

fn alias(token: &str) -> Option<Mnemonic> {
    Some(match token {
        "sal" => Mnemonic::Shl,
        "movabs" => Mnemonic::Mov,
        "cltq" => Mnemonic::Cdqe,
        "cqto" => Mnemonic::Cqo,
        "cltd" => Mnemonic::Cdq,
        "cwtl" => Mnemonic::Cwde,
        "cbtw" => Mnemonic::Cbw,
        "cwtd" => Mnemonic::Cwd,
        "movslq" | "movsxd" => Mnemonic::Movsxd,
        _ => return None,
    })
}

fn resolve_exact(token: &str) -> Option<Resolved> {
    let plain = |mnemonic| Resolved {
        mnemonic,
        condition: None,
        suffix: None,
        extend_from: None,
    };
    if let Some(m) = alias(token) {
        return Some(plain(m));
    }
    if token != "movq_sse" && token != "labeldefn" {
        if let Ok(m) = Mnemonic::from_str(token) {
            if !m.is_conditional() {
                return Some(plain(m));
            }
        }
    }
    for (prefix, mnemonic) in [
        ("cmov", Mnemonic::Cmovcc),
        ("set", Mnemonic::Setcc),
        ("j", Mnemonic::Jcc),
    ] {
        if let Some(cond) = token.strip_prefix(prefix).and_then(Condition::from_suffix) {
            return Some(Resolved {
                mnemonic,
                condition: Some(cond),
                suffix: None,
                extend_from: None,
            });
        }
    }
    None
}

fn resolve(token: &str) -> Option<Resolved> {
    // movzbl, movswq, ...
    for (prefix, mnemonic) in [("movz", Mnemonic::Movzx), ("movs", Mnemonic::Movsx)] {
        if let Some(rest) = token.strip_prefix(prefix) {
            let chars: Vec<char> = rest.chars().collect();
            if let [from, to] = chars.as_slice() {
                if let (Some(from), Some(to)) = (suffix_width(*from), suffix_width(*to)) {
                    if from < to && from <= 16 {
                        return Some(Resolved {
                            mnemonic,
                            condition: None,
                            suffix: Some(to),
                            extend_from: Some(from),
                        });
                    }
                }
            }
        }
    }
    if let Some(r) = resolve_exact(token) {
        return Some(r);
    }
    let last = token.chars().last()?;
    let width = suffix_width(last)?;
    let mut r = resolve_exact(&token[..token.len() - 1])?;
    r.suffix = Some(width);
    Some(r)
}

fn split_operands(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

fn parse_int(s: &str) -> Option<i64> {
    let (neg, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else {
        body.parse::<u64>().ok()? as i64
    };
    Some(if neg { value.wrapping_neg() } else { value })
}

fn parse_gp(name: &str) -> Option<GpRegister> {
    GpRegister::from_name(name.strip_prefix('%')?)
}

fn parse_operand(text: &str, line: usize) -> Result<Operand> {
    let err = |message: String| Error::Parse { line, message };
    if let Some(name) = text.strip_prefix('%') {
        if let Some(r) = GpRegister::from_name(name) {
            return Ok(Operand::Gp(r));
        }
        if let Some(r) = SseRegister::from_name(name) {
            return Ok(Operand::Sse(r));
        }
        return Err(err(format!("unknown register '{}'", text)));
    }
    if let Some(imm) = text.strip_prefix('$') {
        let value = parse_int(imm).ok_or_else(|| err(format!("bad immediate '{}'", text)))?;
        return Ok(Operand::Imm(Immediate { value, width: 0 }));
    }
    if text.starts_with('*') {
        return Err(err("indirect control flow is not supported".to_string()));
    }
    if let Some(open) = text.find('(') {
        let close = text
            .rfind(')')
            .ok_or_else(|| err(format!("unbalanced memory operand '{}'", text)))?;
        let disp_text = text[..open].trim();
        let disp = if disp_text.is_empty() {
            0
        } else {
            parse_int(disp_text).ok_or_else(|| err(format!("bad displacement '{}'", disp_text)))?
        };
        let parts: Vec<&str> = text[open + 1..close].split(',').map(str::trim).collect();
        let reg = |s: &str| -> Result<Option<GpRegister>> {
            if s.is_empty() {
                return Ok(None);
            }
            parse_gp(s)
                .map(Some)
                .ok_or_else(|| err(format!("bad address register '{}'", s)))
        };
        let base = reg(parts.first().copied().unwrap_or(""))?;
        let index = reg(parts.get(1).copied().unwrap_or(""))?;
        let scale = match parts.get(2) {
            Some(s) => s
                .parse::<u8>()
                .map_err(|_| err(format!("bad scale '{}'", s)))?,
            None => 1,
        };
        return Ok(Operand::Mem(Memory {
            base,
            index,
            scale,
            disp,
            size: 0,
        }));
    }
    if let Some(disp) = parse_int(text) {
        return Ok(Operand::Mem(Memory {
            base: None,
            index: None,
            scale: 1,
            disp,
            size: 0,
        }));
    }
    if text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
    {
        return Ok(Operand::Label(text.to_string()));
    }
    Err(err(format!("cannot parse operand '{}'", text)))
}

fn fits(value: i64, width: u16) -> bool {
    match width {
        8 => i8::try_from(value).is_ok(),
        16 => i16::try_from(value).is_ok(),
        32 => i32::try_from(value).is_ok(),
        _ => true,
    }
}

fn memory_width(r: &Resolved, ops: &[Operand]) -> Option<u16> {
    let reg_width = ops.iter().find_map(|o| match o {
        Operand::Gp(g) => Some(g.width()),
        _ => None,
    });
    let has_ymm = ops
        .iter()
        .any(|o| matches!(o, Operand::Sse(s) if s.width() == 256));
    match r.mnemonic {
        Mnemonic::Movzx | Mnemonic::Movsx => r.extend_from,
        Mnemonic::Movsxd => Some(32),
        Mnemonic::Setcc => Some(8),
        Mnemonic::Push | Mnemonic::Pop => Some(r.suffix.unwrap_or(64)),
        m if m.scalar_width().is_some() => m.scalar_width(),
        m if m.is_packed() || m == Mnemonic::Pmovmskb => Some(if has_ymm { 256 } else { 128 }),
        _ => r.suffix.or(reg_width),
    }
}

fn immediate_width(mnemonic: Mnemonic, value: i64, dest_width: u16) -> u16 {
    match mnemonic {
        Mnemonic::Shl
        | Mnemonic::Shr
        | Mnemonic::Sar
        | Mnemonic::Rol
        | Mnemonic::Ror
        | Mnemonic::Shld
        | Mnemonic::Shrd
        | Mnemonic::Bt
        | Mnemonic::Bts
        | Mnemonic::Btr
        | Mnemonic::Btc
        | Mnemonic::Pshufd
        | Mnemonic::Shufps
        | Mnemonic::Palignr => 8,
        Mnemonic::Push => {
            if fits(value, 8) {
                8
            } else {
                32
            }
        }
        Mnemonic::Mov => {
            if dest_width == 64 && !fits(value, 32) {
                64
            } else {
                dest_width.min(32)
            }
        }
        Mnemonic::Test => dest_width.min(32),
        _ => {
            if dest_width > 8 && fits(value, 8) {
                8
            } else {
                dest_width.min(32)
            }
        }
    }
}

fn parse_line(text: &str, line: usize) -> Result<Instruction> {
    let err = |message: String| Error::Parse { line, message };
    if let Some(label) = text.strip_suffix(':') {
        let label = label.trim();
        if label.is_empty() || label.contains(char::is_whitespace) {
            return Err(err(format!("bad label '{}'", text)));
        }
        return Ok(Instruction::label(label));
    }

    let (token, rest) = match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], text[pos..].trim()),
        None => (text, ""),
    };
    let token = token.to_ascii_lowercase();
    let mut operands = split_operands(rest)
        .iter()
        .map(|o| parse_operand(o, line))
        .collect::<Result<Vec<_>>>()?;
    operands.reverse();

    let mut resolved =
        resolve(&token).ok_or_else(|| err(format!("unknown mnemonic '{}'", token)))?;
    let has_sse = operands.iter().any(|o| matches!(o, Operand::Sse(_)));
    match (token.as_str(), has_sse) {
        ("movq", true) => resolved.mnemonic = Mnemonic::MovqSse,
        ("movd", false) => return Err(err("movd requires a vector operand".to_string())),
        _ => {}
    }

    if operands.iter().any(Operand::is_mem) {
        let width = memory_width(&resolved, &operands)
            .ok_or_else(|| err(format!("ambiguous operand size in '{}'", text)))?;
        for op in operands.iter_mut() {
            if let Operand::Mem(m) = op {
                m.size = width;
            }
        }
    }

    let dest_width = operands
        .iter()
        .find(|o| !o.is_imm())
        .map(Operand::width)
        .or(resolved.suffix)
        .unwrap_or(64);
    for op in operands.iter_mut() {
        if let Operand::Imm(imm) = op {
            imm.width = immediate_width(resolved.mnemonic, imm.value, dest_width);
        }
    }

    Ok(match resolved.condition {
        Some(cond) => Instruction::conditional(resolved.mnemonic, cond, operands),
        None => Instruction::new(resolved.mnemonic, operands),
    })
}

/// Parses a listing into [`Code`].
///
/// # Errors
///
/// Returns [`Error::Parse`] with the one-based line number of the first
/// offending line.
pub fn parse_code(text: &str) -> Result<Code> {
    let mut code = Code::default();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        code.push(parse_line(line, i + 1)?);
    }
    Ok(code)
}
