//! Request parameter encoding.
//!
//! Each parameter is a one-byte tag followed by its body. Scalars are
//! fixed-width little-endian integers; buffers carry a `u32` length prefix.

use bytes::Bytes;

use crate::error::{Result, RpcError};

/// Kind of an encoded parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParameterTag {
    /// Signed 8-bit integer.
    S8 = 0,
    /// Signed 16-bit integer.
    S16 = 1,
    /// Signed 32-bit integer.
    S32 = 2,
    /// Signed 64-bit integer.
    S64 = 3,
    /// Length-prefixed byte buffer.
    Buffer = 4,
}

impl ParameterTag {
    /// Parse a tag byte.
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::S8),
            1 => Ok(Self::S16),
            2 => Ok(Self::S32),
            3 => Ok(Self::S64),
            4 => Ok(Self::Buffer),
            other => Err(RpcError::UnknownParameterTag(other)),
        }
    }

    /// Body width for scalar kinds, `None` for buffers.
    #[inline]
    pub fn scalar_width(self) -> Option<usize> {
        match self {
            Self::S8 => Some(1),
            Self::S16 => Some(2),
            Self::S32 => Some(4),
            Self::S64 => Some(8),
            Self::Buffer => None,
        }
    }

    /// Human-readable kind name.
    pub fn name(self) -> &'static str {
        match self {
            Self::S8 => "s8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::S64 => "s64",
            Self::Buffer => "buffer",
        }
    }
}

/// A decoded request parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    /// Signed 8-bit integer.
    S8(i8),
    /// Signed 16-bit integer.
    S16(i16),
    /// Signed 32-bit integer.
    S32(i32),
    /// Signed 64-bit integer.
    S64(i64),
    /// Byte buffer (zero-copy slice of the received data).
    Buffer(Bytes),
}

impl Parameter {
    /// Create a buffer parameter.
    pub fn buffer(data: impl Into<Bytes>) -> Self {
        Self::Buffer(data.into())
    }

    /// Tag of this parameter.
    pub fn tag(&self) -> ParameterTag {
        match self {
            Self::S8(_) => ParameterTag::S8,
            Self::S16(_) => ParameterTag::S16,
            Self::S32(_) => ParameterTag::S32,
            Self::S64(_) => ParameterTag::S64,
            Self::Buffer(_) => ParameterTag::Buffer,
        }
    }

    /// Number of bytes this parameter occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Buffer(data) => 1 + 4 + data.len(),
            scalar => 1 + scalar.tag().scalar_width().unwrap_or(0),
        }
    }

    /// Append the tagged encoding to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag() as u8);
        match self {
            Self::S8(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::S16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::S32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::S64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Buffer(data) => {
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buf.extend_from_slice(data);
            }
        }
    }

    /// Decode a scalar body for `tag`.
    ///
    /// `body` must hold exactly `tag.scalar_width()` bytes.
    pub fn decode_scalar(tag: ParameterTag, body: &[u8]) -> Result<Self> {
        if tag.scalar_width() != Some(body.len()) {
            return Err(RpcError::Protocol(format!(
                "{} parameter cannot be decoded from {} bytes",
                tag.name(),
                body.len()
            )));
        }

        Ok(match tag {
            ParameterTag::S8 => Self::S8(body[0] as i8),
            ParameterTag::S16 => Self::S16(i16::from_le_bytes([body[0], body[1]])),
            ParameterTag::S32 => {
                Self::S32(i32::from_le_bytes([body[0], body[1], body[2], body[3]]))
            }
            ParameterTag::S64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(body);
                Self::S64(i64::from_le_bytes(raw))
            }
            ParameterTag::Buffer => {
                return Err(RpcError::Protocol(
                    "Buffer parameters have no scalar body".to_string(),
                ))
            }
        })
    }
}
