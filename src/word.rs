//! Fixed-width 32-bit machine words.
//!
//! Everything the simulated machine computes on is a [`Word`]: four bytes in
//! big-endian order, interpreted as two's-complement when a signed view is
//! asked for. Host-side arithmetic is done on `i64`/`u64` and truncated back
//! to 32 bits on encode, so over-wide intermediate values never panic.

use std::fmt;
use serde::{Serialize, Deserialize};

/// A 4-byte big-endian machine word.
///
/// The same bit pattern serves both signed and unsigned views; which one is
/// meant is decided by the instruction interpreting it, not by the word
/// itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Word([u8; 4]);

impl Word {
    /// Number of bytes in a word.
    pub const SIZE: usize = 4;

    /// The all-zero word.
    pub const ZERO: Word = Word([0; 4]);

    /// Create a word from raw bytes, most significant first.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Word(bytes)
    }

    /// Get the raw bytes, most significant first.
    #[inline]
    pub const fn bytes(&self) -> [u8; 4] {
        self.0
    }

    /// Encode a signed value, truncating to the low 32 bits.
    ///
    /// Values outside `i32` range wrap the way two's-complement truncation
    /// always does; the machine's arithmetic is defined in terms of this.
    #[inline]
    pub fn from_signed(value: i64) -> Self {
        Word((value as u32).to_be_bytes())
    }

    /// Encode an unsigned value, truncating to the low 32 bits.
    #[inline]
    pub fn from_unsigned(value: u64) -> Self {
        Word((value as u32).to_be_bytes())
    }

    /// Decode as a signed (two's-complement) value.
    #[inline]
    pub fn to_signed(self) -> i64 {
        i32::from_be_bytes(self.0) as i64
    }

    /// Decode as an unsigned value.
    #[inline]
    pub fn to_unsigned(self) -> u64 {
        u32::from_be_bytes(self.0) as u64
    }

    /// Check whether every bit is zero.
    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == [0; 4]
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Word({:#010x} = {})",
            self.to_unsigned(),
            self.to_signed()
        )
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_signed())
    }
}

impl From<i64> for Word {
    fn from(value: i64) -> Self {
        Word::from_signed(value)
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Word::from_unsigned(value)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero() {
        assert!(Word::ZERO.is_zero());
        assert_eq!(Word::ZERO.to_signed(), 0);
        assert_eq!(Word::ZERO.to_unsigned(), 0);
    }

    #[test]
    fn test_signed_roundtrip_basics() {
        assert_eq!(Word::from_signed(1).to_signed(), 1);
        assert_eq!(Word::from_signed(-1).to_signed(), -1);
        assert_eq!(Word::from_signed(i32::MAX as i64).to_signed(), i32::MAX as i64);
        assert_eq!(Word::from_signed(i32::MIN as i64).to_signed(), i32::MIN as i64);
    }

    #[test]
    fn test_truncation() {
        // 2^32 truncates to zero, 2^32 + 5 to 5
        assert_eq!(Word::from_signed(1 << 32).to_signed(), 0);
        assert_eq!(Word::from_signed((1 << 32) + 5).to_signed(), 5);
        assert_eq!(Word::from_unsigned(u64::MAX).to_unsigned(), u32::MAX as u64);
    }

    #[test]
    fn test_signed_unsigned_views() {
        // -1 signed is all ones, i.e. u32::MAX unsigned
        let minus_one = Word::from_signed(-1);
        assert_eq!(minus_one.to_unsigned(), u32::MAX as u64);
        assert_eq!(minus_one.bytes(), [0xff; 4]);
    }

    #[test]
    fn test_big_endian_layout() {
        let w = Word::from_unsigned(0x1234_5678);
        assert_eq!(w.bytes(), [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(Word::from_bytes([0x12, 0x34, 0x56, 0x78]), w);
    }

    proptest! {
        #[test]
        fn prop_signed_roundtrip(v in (i32::MIN as i64)..=(i32::MAX as i64)) {
            prop_assert_eq!(Word::from_signed(v).to_signed(), v);
        }

        #[test]
        fn prop_unsigned_roundtrip(v in 0u64..=(u32::MAX as u64)) {
            prop_assert_eq!(Word::from_unsigned(v).to_unsigned(), v);
        }

        #[test]
        fn prop_views_agree_modulo_2_32(v in any::<i64>()) {
            let w = Word::from_signed(v);
            prop_assert_eq!(w.to_unsigned(), (v as u32) as u64);
        }
    }
}
