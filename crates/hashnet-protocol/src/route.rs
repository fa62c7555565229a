//! Route labels -- source routes as fixed-width hop fields.
//!
//! Two forms of the same route:
//!   - `RouteLabel`: discovery form, a variable-length run of hop fields
//!     accumulated while searching. Rendered as a bit string ("0010").
//!   - `WireLabel`: the fixed `route_label_size * 8` bit label carried in a
//!     frame, consumed one field per hop. Forwarding peers append the
//!     reversed incoming slot to the tail, so reversing the label at the
//!     destination yields the return route.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{BitBuffer, ProtocolError};

/// Width of one hop field: the smallest `b` with `2^b > max_connections`.
pub fn route_label_bits(max_connections: usize) -> usize {
    let mut bits = 0;
    while (1u128 << bits) <= max_connections as u128 {
        bits += 1;
    }
    bits
}

/// Discovery-form route: concatenated hop fields, no padding.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct RouteLabel(BitBuffer);

impl RouteLabel {
    pub fn empty() -> Self {
        Self::default()
    }

    /// One-hop label selecting `slot` on the peer that reads it.
    pub fn hop(slot: u64, field_bits: usize) -> Self {
        Self(BitBuffer::from_uint(slot, field_bits))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length in bits.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn hop_count(&self, field_bits: usize) -> usize {
        if field_bits == 0 {
            return 0;
        }
        self.0.len() / field_bits
    }

    /// This route followed by `next`.
    pub fn join(&self, next: &RouteLabel) -> RouteLabel {
        let mut bits = self.0.clone();
        bits.append(&next.0);
        Self(bits)
    }

    pub fn as_bits(&self) -> &BitBuffer {
        &self.0
    }

    /// Largest discovery label that fits a wire label of `label_size` bytes.
    /// One field is reserved for the terminating "deliver locally" hop.
    pub fn max_len(label_size: usize, field_bits: usize) -> usize {
        (label_size * 8).saturating_sub(field_bits)
    }

    /// Pack to wire form, zero padded on the right.
    pub fn to_wire(&self, label_size: usize, field_bits: usize) -> Result<WireLabel, ProtocolError> {
        let max = Self::max_len(label_size, field_bits);
        if self.len() > max {
            return Err(ProtocolError::LabelTooLong {
                bits: self.len(),
                max,
            });
        }
        let mut bits = self.0.clone();
        bits.extend(std::iter::repeat(false).take(label_size * 8 - self.len()));
        Ok(WireLabel { bits, field_bits })
    }
}

impl From<BitBuffer> for RouteLabel {
    fn from(bits: BitBuffer) -> Self {
        Self(bits)
    }
}

impl fmt::Display for RouteLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for RouteLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteLabel({})", self.0)
    }
}

impl FromStr for RouteLabel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for RouteLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RouteLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Wire-form label, mutated hop by hop while a frame is in transit.
#[derive(Clone, PartialEq, Eq)]
pub struct WireLabel {
    bits: BitBuffer,
    field_bits: usize,
}

impl WireLabel {
    pub fn from_bytes(bytes: &[u8], field_bits: usize) -> Self {
        Self {
            bits: BitBuffer::from_bytes(bytes),
            field_bits,
        }
    }

    /// All-zero label: deliver to the directly linked peer.
    pub fn local(label_size: usize, field_bits: usize) -> Self {
        Self {
            bits: BitBuffer::zeroed(label_size * 8),
            field_bits,
        }
    }

    /// Consume the leading field. Zero means "this peer".
    pub fn next_hop(&mut self) -> u64 {
        self.bits.shift_uint(self.field_bits)
    }

    /// Append the slot a frame arrived on, bit-reversed, to the tail.
    pub fn push_return_hop(&mut self, slot: u64) {
        let mut field = BitBuffer::from_uint(slot, self.field_bits);
        field.reverse();
        self.bits.append(&field);
    }

    /// Put back the zero field consumed on arrival.
    pub fn restore_local(&mut self) {
        for _ in 0..self.field_bits {
            self.bits.unshift(false);
        }
    }

    /// Turn an arrived label into the label of the reply.
    pub fn reverse(&mut self) {
        self.bits.reverse();
    }

    pub fn bits(&self) -> &BitBuffer {
        &self.bits
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.to_bytes()
    }
}

impl fmt::Debug for WireLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WireLabel({}/{})", self.bits, self.field_bits)
    }
}
