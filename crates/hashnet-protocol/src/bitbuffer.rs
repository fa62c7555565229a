//! Growable bit sequence used to build and parse route labels.
//!
//! Bits are stored one per element, most-significant bit first when
//! converted to or from bytes.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Index, Range};
use std::str::FromStr;

use crate::ProtocolError;

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitBuffer {
    bits: VecDeque<bool>,
}

impl BitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `len` zero bits.
    pub fn zeroed(len: usize) -> Self {
        Self {
            bits: std::iter::repeat(false).take(len).collect(),
        }
    }

    /// Expand each byte into 8 bits, MSB first, preserving byte order.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut bits = VecDeque::with_capacity(bytes.len() * 8);
        for byte in bytes {
            for shift in (0..8).rev() {
                bits.push_back((byte >> shift) & 1 == 1);
            }
        }
        Self { bits }
    }

    /// `width` bits holding `value` big-endian. Higher bits of `value` are dropped.
    pub fn from_uint(value: u64, width: usize) -> Self {
        let mut buf = Self::new();
        buf.push_uint(value, width);
        buf
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).copied()
    }

    pub fn set(&mut self, index: usize, bit: bool) {
        if let Some(slot) = self.bits.get_mut(index) {
            *slot = bit;
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = bool> + '_ {
        self.bits.iter().copied()
    }

    pub fn push(&mut self, bit: bool) {
        self.bits.push_back(bit);
    }

    pub fn pop(&mut self) -> Option<bool> {
        self.bits.pop_back()
    }

    /// Insert at the front.
    pub fn unshift(&mut self, bit: bool) {
        self.bits.push_front(bit);
    }

    /// Remove from the front.
    pub fn shift(&mut self) -> Option<bool> {
        self.bits.pop_front()
    }

    /// Append `width` bits holding `value` big-endian.
    pub fn push_uint(&mut self, value: u64, width: usize) {
        for shift in (0..width).rev() {
            let bit = if shift < 64 { (value >> shift) & 1 == 1 } else { false };
            self.bits.push_back(bit);
        }
    }

    /// Remove the first `n` bits and read them as a big-endian unsigned integer.
    ///
    /// When fewer than `n` bits remain the missing bits count as leading zeros, so a
    /// short buffer yields a smaller value instead of an error. Route parsing
    /// relies on this to treat an exhausted label as "deliver locally".
    pub fn shift_uint(&mut self, n: usize) -> u64 {
        let available = n.min(self.bits.len());
        self.bits
            .drain(..available)
            .fold(0u64, |acc, bit| (acc << 1) | u64::from(bit))
    }

    /// Copy of the bits in `range`. Out-of-range bounds are clamped.
    pub fn slice(&self, range: Range<usize>) -> BitBuffer {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        Self {
            bits: self.bits.range(start..end).copied().collect(),
        }
    }

    /// Remove the bits in `range`, insert `replacement` in their place and
    /// return the removed bits. Out-of-range bounds are clamped.
    pub fn splice(&mut self, range: Range<usize>, replacement: &BitBuffer) -> BitBuffer {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        let mut tail = self.bits.split_off(end);
        let removed: VecDeque<bool> = self.bits.split_off(start);
        self.bits.extend(replacement.iter());
        self.bits.append(&mut tail);
        Self { bits: removed }
    }

    pub fn reverse(&mut self) {
        self.bits.make_contiguous().reverse();
    }

    pub fn append(&mut self, other: &BitBuffer) {
        self.bits.extend(other.iter());
    }

    /// Pack into `ceil(len / 8)` bytes, MSB first, zero-filling the last byte.
    /// Leaves `self` untouched.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut copy = self.clone();
        let byte_len = self.len().div_ceil(8);
        let mut out = Vec::with_capacity(byte_len);
        for _ in 0..byte_len {
            let available = copy.len().min(8);
            // Short final byte: read what is left, then shift into the high bits.
            let value = copy.shift_uint(available) << (8 - available);
            out.push(value as u8);
        }
        out
    }
}

impl Index<usize> for BitBuffer {
    type Output = bool;

    fn index(&self, index: usize) -> &bool {
        &self.bits[index]
    }
}

impl FromIterator<bool> for BitBuffer {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Self {
            bits: iter.into_iter().collect(),
        }
    }
}

impl Extend<bool> for BitBuffer {
    fn extend<I: IntoIterator<Item = bool>>(&mut self, iter: I) {
        self.bits.extend(iter);
    }
}

impl fmt::Display for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.iter() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitBuffer({self})")
    }
}

/// Parses strings of `0` and `1`.
impl FromStr for BitBuffer {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(ProtocolError::InvalidLabel(format!(
                    "unexpected character {other:?}"
                ))),
            })
            .collect()
    }
}
