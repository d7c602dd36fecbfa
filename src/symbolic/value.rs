//! Fixed-width concrete bit-vector values up to 256 bits.
//!
//! Arithmetic is exact for widths up to 128 bits. Wider values only support
//! the bitwise, structural and equality operations, which is all the vector
//! handlers need (lane arithmetic happens on extracted lanes).

use std::fmt;

use crate::{Error, Result};

/// Maximum supported width in bits.
pub const MAX_WIDTH: u16 = 256;

/// A concrete bit-vector value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitValue {
    lo: u128,
    hi: u128,
    width: u16,
}

fn mask128(width: u16) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

/// Rejects bit-vector widths outside `1..=MAX_WIDTH`.
///
/// # Errors
///
/// [`Error::WidthMismatch`] naming `op` for an unsupported width.
pub fn check_width(op: &'static str, width: u16) -> Result<u16> {
    if (1..=MAX_WIDTH).contains(&width) {
        Ok(width)
    } else {
        Err(Error::WidthMismatch {
            op,
            left: format!("bv{}", width),
            right: format!("bv1..=bv{}", MAX_WIDTH),
        })
    }
}

impl BitValue {
    /// Creates a value, truncating `value` to `width` bits.
    ///
    /// `width` must be in `1..=MAX_WIDTH`; use [`BitValue::from_parts`] for
    /// widths that come from outside the crate.
    #[must_use]
    pub fn new(value: u128, width: u16) -> Self {
        Self::masked(value, 0, width)
    }

    /// Creates a value from its low and high 128-bit halves, truncating to
    /// `width` bits.
    ///
    /// # Errors
    ///
    /// [`Error::WidthMismatch`] if `width` is not in `1..=MAX_WIDTH`.
    pub fn from_parts(lo: u128, hi: u128, width: u16) -> Result<Self> {
        check_width("bit-vector value", width).map(|w| Self::masked(lo, hi, w))
    }

    fn masked(lo: u128, hi: u128, width: u16) -> Self {
        let lo = lo & mask128(width);
        let hi = if width > 128 { hi & mask128(width - 128) } else { 0 };
        Self { lo, hi, width }
    }

    /// Creates a value from little-endian 64-bit words.
    #[must_use]
    pub fn from_words(words: &[u64], width: u16) -> Self {
        let word = |i: usize| u128::from(words.get(i).copied().unwrap_or(0));
        Self::masked(
            word(0) | (word(1) << 64),
            word(2) | (word(3) << 64),
            width,
        )
    }

    /// All zero bits.
    #[must_use]
    pub fn zero(width: u16) -> Self {
        Self::new(0, width)
    }

    /// All one bits.
    #[must_use]
    pub fn ones(width: u16) -> Self {
        Self::masked(u128::MAX, u128::MAX, width)
    }

    /// Width in bits.
    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// The low 128 bits.
    #[must_use]
    pub fn low(&self) -> u128 {
        self.lo
    }

    /// The low 64 bits.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.lo as u64
    }

    /// Little-endian 64-bit words (four of them).
    #[must_use]
    pub fn words(&self) -> [u64; 4] {
        [
            self.lo as u64,
            (self.lo >> 64) as u64,
            self.hi as u64,
            (self.hi >> 64) as u64,
        ]
    }

    /// Interprets the value as signed (widths up to 128).
    #[must_use]
    pub fn as_i128(&self) -> i128 {
        if self.width >= 128 {
            return self.lo as i128;
        }
        let shift = 128 - self.width;
        ((self.lo << shift) as i128) >> shift
    }

    /// `true` if every bit is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.lo == 0 && self.hi == 0
    }

    /// `true` if every bit is one.
    #[must_use]
    pub fn is_ones(&self) -> bool {
        *self == Self::ones(self.width)
    }

    /// Bit `i`.
    #[must_use]
    pub fn bit(&self, i: u16) -> bool {
        if i < 128 {
            (self.lo >> i) & 1 == 1
        } else {
            (self.hi >> (i - 128)) & 1 == 1
        }
    }

    fn map2(&self, other: &Self, f: impl Fn(u128, u128) -> u128) -> Self {
        Self::masked(f(self.lo, other.lo), f(self.hi, other.hi), self.width)
    }

    /// Bitwise and.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        self.map2(other, |a, b| a & b)
    }

    /// Bitwise or.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        self.map2(other, |a, b| a | b)
    }

    /// Bitwise xor.
    #[must_use]
    pub fn xor(&self, other: &Self) -> Self {
        self.map2(other, |a, b| a ^ b)
    }

    /// Bitwise complement.
    #[must_use]
    pub fn not(&self) -> Self {
        Self::masked(!self.lo, !self.hi, self.width)
    }

    /// Bits `hi..=lo`.
    #[must_use]
    pub fn extract(&self, hi: u16, lo: u16) -> Self {
        let width = hi - lo + 1;
        let (low, high) = self.shr_parts(lo);
        Self::masked(low, high, width)
    }

    fn shr_parts(&self, n: u16) -> (u128, u128) {
        match n {
            0 => (self.lo, self.hi),
            1..=127 => ((self.lo >> n) | (self.hi << (128 - n)), self.hi >> n),
            128..=255 => (self.hi >> (n - 128), 0),
            _ => (0, 0),
        }
    }

    fn shl_parts(&self, n: u16) -> (u128, u128) {
        match n {
            0 => (self.lo, self.hi),
            1..=127 => (self.lo << n, (self.hi << n) | (self.lo >> (128 - n))),
            128..=255 => (0, self.lo << (n - 128)),
            _ => (0, 0),
        }
    }

    /// `self` in the high bits, `low` in the low bits.
    #[must_use]
    pub fn concat(&self, low: &Self) -> Self {
        let width = self.width + low.width;
        let (a, b) = self.shl_parts(low.width);
        Self::masked(a | low.lo, b | low.hi, width)
    }

    /// Zero extension to `width` bits.
    #[must_use]
    pub fn zero_extend(&self, width: u16) -> Self {
        Self::masked(self.lo, self.hi, width)
    }

    /// Sign extension to `width` bits.
    #[must_use]
    pub fn sign_extend(&self, width: u16) -> Self {
        if !self.bit(self.width - 1) || width <= self.width {
            return self.zero_extend(width);
        }
        let fill = Self::ones(width - self.width);
        fill.concat(self)
    }

    /// Logical shift left by `n` bits (zero when `n >= width`).
    #[must_use]
    pub fn shl(&self, n: u128) -> Self {
        if n >= u128::from(self.width) {
            return Self::zero(self.width);
        }
        let (lo, hi) = self.shl_parts(n as u16);
        Self::masked(lo, hi, self.width)
    }

    /// Logical shift right.
    #[must_use]
    pub fn lshr(&self, n: u128) -> Self {
        if n >= u128::from(self.width) {
            return Self::zero(self.width);
        }
        let (lo, hi) = self.shr_parts(n as u16);
        Self::masked(lo, hi, self.width)
    }

    /// Arithmetic shift right.
    #[must_use]
    pub fn ashr(&self, n: u128) -> Self {
        let negative = self.bit(self.width - 1);
        if n >= u128::from(self.width) {
            return if negative {
                Self::ones(self.width)
            } else {
                Self::zero(self.width)
            };
        }
        let shifted = self.lshr(n);
        if !negative || n == 0 {
            return shifted;
        }
        let fill = Self::ones(self.width).shl(u128::from(self.width) - n);
        shifted.or(&fill)
    }

    /// Rotate left.
    #[must_use]
    pub fn rotl(&self, n: u128) -> Self {
        let n = n % u128::from(self.width);
        if n == 0 {
            return *self;
        }
        self.shl(n).or(&self.lshr(u128::from(self.width) - n))
    }

    /// Rotate right.
    #[must_use]
    pub fn rotr(&self, n: u128) -> Self {
        let n = n % u128::from(self.width);
        self.rotl((u128::from(self.width) - n) % u128::from(self.width))
    }

    fn arith(&self, other: &Self, f: impl Fn(u128, u128) -> Option<u128>) -> Option<Self> {
        if self.width > 128 {
            return None;
        }
        f(self.lo, other.lo).map(|v| Self::new(v, self.width))
    }

    /// Wrapping addition (widths up to 128).
    #[must_use]
    pub fn add(&self, other: &Self) -> Option<Self> {
        self.arith(other, |a, b| Some(a.wrapping_add(b)))
    }

    /// Wrapping subtraction (widths up to 128).
    #[must_use]
    pub fn sub(&self, other: &Self) -> Option<Self> {
        self.arith(other, |a, b| Some(a.wrapping_sub(b)))
    }

    /// Wrapping multiplication (widths up to 128).
    #[must_use]
    pub fn mul(&self, other: &Self) -> Option<Self> {
        self.arith(other, |a, b| Some(a.wrapping_mul(b)))
    }

    /// Two's complement negation (widths up to 128).
    #[must_use]
    pub fn neg(&self) -> Option<Self> {
        Self::zero(self.width).sub(self)
    }

    /// Unsigned division; division by zero yields all ones (SMT-LIB semantics).
    #[must_use]
    pub fn udiv(&self, other: &Self) -> Option<Self> {
        let width = self.width;
        self.arith(other, |a, b| {
            Some(if b == 0 {
                mask128(width)
            } else {
                a / b
            })
        })
    }

    /// Unsigned remainder; remainder by zero yields the dividend.
    #[must_use]
    pub fn urem(&self, other: &Self) -> Option<Self> {
        self.arith(other, |a, b| Some(if b == 0 { a } else { a % b }))
    }

    /// Signed division, truncating (SMT-LIB semantics for zero divisors).
    #[must_use]
    pub fn sdiv(&self, other: &Self) -> Option<Self> {
        if self.width > 128 {
            return None;
        }
        let (a, b) = (self.as_i128(), other.as_i128());
        if b == 0 {
            return Some(if a < 0 {
                Self::new(1, self.width)
            } else {
                Self::ones(self.width)
            });
        }
        Some(Self::new(a.wrapping_div(b) as u128, self.width))
    }

    /// Signed remainder with the sign of the dividend.
    #[must_use]
    pub fn srem(&self, other: &Self) -> Option<Self> {
        if self.width > 128 {
            return None;
        }
        let (a, b) = (self.as_i128(), other.as_i128());
        if b == 0 {
            return Some(*self);
        }
        Some(Self::new(a.wrapping_rem(b) as u128, self.width))
    }

    /// Unsigned less-than (widths up to 256).
    #[must_use]
    pub fn ult(&self, other: &Self) -> bool {
        (self.hi, self.lo) < (other.hi, other.lo)
    }

    /// Signed less-than (widths up to 128).
    #[must_use]
    pub fn slt(&self, other: &Self) -> bool {
        self.as_i128() < other.as_i128()
    }

    /// The value as a shift amount, saturating when bits above 127 are set.
    #[must_use]
    pub fn as_amount(&self) -> u128 {
        if self.hi != 0 {
            u128::MAX
        } else {
            self.lo
        }
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> u32 {
        self.lo.count_ones() + self.hi.count_ones()
    }
}

impl fmt::Display for BitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width > 128 {
            write!(f, "0x{:x}{:032x}[{}]", self.hi, self.lo, self.width)
        } else {
            write!(f, "0x{:x}[{}]", self.lo, self.width)
        }
    }
}
