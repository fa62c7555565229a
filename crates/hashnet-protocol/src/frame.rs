//! Frame codec for directly linked peers.
//!
//! Wire format:
//!   [route label: route_label_size bytes]
//!   [extension length: 1 byte]
//!   [extension: extension length bytes]   (reserved, empty in the base protocol)
//!   [payload: JSON `{fn, d?, cb?}`]
//!
//! No length prefix: the transport delivers whole frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{ProtocolError, MAX_EXTENSION_LEN};

/// Extension length field size in bytes.
const EXTENSION_LEN_SIZE: usize = 1;

/// One frame as carried by a transport. The payload stays encoded so that
/// forwarding peers never decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub label: Bytes,
    pub extension: Bytes,
    pub payload: Bytes,
}

impl Frame {
    /// Frame with the base-protocol empty extension.
    pub fn new(label: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            label: label.into(),
            extension: Bytes::new(),
            payload: payload.into(),
        }
    }

    /// Split a received frame. The label is the leading `label_size` bytes.
    pub fn decode(mut src: Bytes, label_size: usize) -> Result<Self, ProtocolError> {
        let need = label_size + EXTENSION_LEN_SIZE;
        if src.len() < need {
            return Err(ProtocolError::FrameTooShort {
                len: src.len(),
                need,
            });
        }

        let label = src.split_to(label_size);
        let declared = src.get_u8() as usize;
        if src.len() < declared {
            return Err(ProtocolError::ExtensionTruncated {
                declared,
                available: src.len(),
            });
        }
        let extension = src.split_to(declared);

        Ok(Self {
            label,
            extension,
            payload: src,
        })
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        if self.extension.len() > MAX_EXTENSION_LEN {
            return Err(ProtocolError::ExtensionTooLarge(self.extension.len()));
        }

        let mut dst = BytesMut::with_capacity(
            self.label.len() + EXTENSION_LEN_SIZE + self.extension.len() + self.payload.len(),
        );
        dst.extend_from_slice(&self.label);
        dst.put_u8(self.extension.len() as u8);
        dst.extend_from_slice(&self.extension);
        dst.extend_from_slice(&self.payload);
        Ok(dst.freeze())
    }

    /// Same extension and payload under a different label.
    pub fn relabel(&self, label: impl Into<Bytes>) -> Self {
        Self {
            label: label.into(),
            extension: self.extension.clone(),
            payload: self.payload.clone(),
        }
    }
}
