//! Wire format encoding and decoding.
//!
//! Request header (12 bytes):
//! ```text
//! ┌──────────┬──────────┬───────────┬─────────────┐
//! │ Version  │ Req ID   │ Method ID │ Param count │
//! │ 4 bytes  │ uint32 LE│ uint16 LE │ uint16 LE   │
//! └──────────┴──────────┴───────────┴─────────────┘
//! ```
//!
//! Response header (13 bytes):
//! ```text
//! ┌──────────┬───────┬──────────────┬─────────────┐
//! │ Req ID   │ State │ Return value │ Payload len │
//! │ uint32 LE│ 1 byte│ int32 LE     │ uint32 LE   │
//! └──────────┴───────┴──────────────┴─────────────┘
//! ```
//!
//! The response payload is a run of result records, each
//! `[buffer_id: u32 LE][size: u32 LE][size bytes]`.
//!
//! All multi-byte integers are Little Endian.

use crate::error::{Result, RpcError};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: &str = "2";

/// Size of the version tag at the start of every request.
pub const VERSION_TAG_SIZE: usize = 4;

/// Request header size in bytes (fixed, exactly 12).
pub const REQUEST_HEADER_SIZE: usize = 12;

/// Response header size in bytes (fixed, exactly 13).
pub const RESPONSE_HEADER_SIZE: usize = 13;

/// Size of the `{buffer_id, size}` prefix of each result record.
pub const RESULT_BUFFER_HEADER_SIZE: usize = 8;

/// Maximum number of parameters a request may declare.
pub const MAX_PARAMETER_COUNT: u16 = 10;

/// Reserved method ID answering with the registered method table.
pub const LIST_METHODS_METHOD_ID: u16 = 0;

/// Default work arena capacity (4.5 MB).
pub const DEFAULT_WORK_BUFFER_SIZE: usize = 4 * 1024 * 1024 + 512 * 1024;

/// Default upper bound for a single buffer parameter.
pub const DEFAULT_MAX_BUFFER_PARAMETER_SIZE: u32 = DEFAULT_WORK_BUFFER_SIZE as u32;

/// Encode a version string into the fixed-size, NUL-padded tag.
///
/// Strings longer than the tag are truncated.
pub fn version_tag(version: &str) -> [u8; VERSION_TAG_SIZE] {
    let mut tag = [0u8; VERSION_TAG_SIZE];
    let bytes = version.as_bytes();
    let len = bytes.len().min(VERSION_TAG_SIZE);
    tag[..len].copy_from_slice(&bytes[..len]);
    tag
}

/// Lifecycle state of a method call, as reported in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MethodState {
    /// Handler is consuming parameters.
    ParsingInput = 0,
    /// Parameters consumed; handler is producing result buffers.
    GeneratingOutput = 1,
    /// Call completed; return value and result buffers are valid.
    Good = 2,
    /// Call failed; no result buffers are sent.
    InternalError = 3,
    /// Handler consumed a different number of parameters than declared.
    ParameterCountMismatch = 4,
}

impl MethodState {
    /// Wire code of this state.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire code.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::ParsingInput),
            1 => Some(Self::GeneratingOutput),
            2 => Some(Self::Good),
            3 => Some(Self::InternalError),
            4 => Some(Self::ParameterCountMismatch),
            _ => None,
        }
    }

    /// Whether no further transitions are possible.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Good | Self::InternalError | Self::ParameterCountMismatch
        )
    }
}

/// Decoded request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// NUL-padded protocol version tag.
    pub version: [u8; VERSION_TAG_SIZE],
    /// Caller-chosen identifier echoed in the response.
    pub request_id: u32,
    /// Method identifier (0 = method listing).
    pub method_id: u16,
    /// Number of parameters following the header.
    pub parameter_count: u16,
}

impl RequestHeader {
    /// Create a header tagged with the current protocol version.
    pub fn new(request_id: u32, method_id: u16, parameter_count: u16) -> Self {
        Self {
            version: version_tag(PROTOCOL_VERSION),
            request_id,
            method_id,
            parameter_count,
        }
    }

    /// Replace the version tag.
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version_tag(version);
        self
    }

    /// Version tag with NUL padding stripped, lossily decoded.
    pub fn version_str(&self) -> String {
        let end = self
            .version
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(VERSION_TAG_SIZE);
        String::from_utf8_lossy(&self.version[..end]).into_owned()
    }

    /// Whether the version tag matches [`PROTOCOL_VERSION`].
    #[inline]
    pub fn is_supported_version(&self) -> bool {
        self.version == version_tag(PROTOCOL_VERSION)
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use arenarpc::protocol::{RequestHeader, REQUEST_HEADER_SIZE};
    ///
    /// let bytes = RequestHeader::new(7, 3, 2).encode();
    /// assert_eq!(bytes.len(), REQUEST_HEADER_SIZE);
    /// assert_eq!(&bytes[..4], b"2\0\0\0");
    /// ```
    pub fn encode(&self) -> [u8; REQUEST_HEADER_SIZE] {
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `REQUEST_HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= REQUEST_HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.version);
        buf[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        buf[8..10].copy_from_slice(&self.method_id.to_le_bytes());
        buf[10..12].copy_from_slice(&self.parameter_count.to_le_bytes());
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: [buf[0], buf[1], buf[2], buf[3]],
            request_id: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            method_id: u16::from_le_bytes([buf[8], buf[9]]),
            parameter_count: u16::from_le_bytes([buf[10], buf[11]]),
        })
    }

    /// Validate the header before any parameter is read.
    ///
    /// Checks:
    /// - Version tag matches [`PROTOCOL_VERSION`]
    /// - Parameter count does not exceed [`MAX_PARAMETER_COUNT`]
    pub fn validate(&self) -> Result<()> {
        if !self.is_supported_version() {
            return Err(RpcError::UnsupportedVersion {
                found: self.version_str(),
                expected: PROTOCOL_VERSION,
            });
        }

        if self.parameter_count > MAX_PARAMETER_COUNT {
            return Err(RpcError::TooManyParameters {
                count: self.parameter_count,
                max: MAX_PARAMETER_COUNT,
            });
        }

        Ok(())
    }
}

/// Decoded response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Identifier copied from the request.
    pub request_id: u32,
    /// Final state of the method call.
    pub state: MethodState,
    /// Handler return value (0 unless the call finished `Good`).
    pub return_value: i32,
    /// Length of the result-record payload in bytes.
    pub payload_length: u32,
}

impl ResponseHeader {
    /// Create a new response header.
    pub fn new(request_id: u32, state: MethodState, return_value: i32, payload_length: u32) -> Self {
        Self {
            request_id,
            state,
            return_value,
            payload_length,
        }
    }

    /// Encode header to bytes.
    pub fn encode(&self) -> [u8; RESPONSE_HEADER_SIZE] {
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.request_id.to_le_bytes());
        buf[4] = self.state.as_u8();
        buf[5..9].copy_from_slice(&self.return_value.to_le_bytes());
        buf[9..13].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    /// Decode header from bytes.
    ///
    /// Fails if the buffer is too short or carries an unknown state code.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RESPONSE_HEADER_SIZE {
            return Err(RpcError::Protocol(format!(
                "Response header needs {} bytes, got {}",
                RESPONSE_HEADER_SIZE,
                buf.len()
            )));
        }
        let state = MethodState::from_u8(buf[4]).ok_or_else(|| {
            RpcError::Protocol(format!("Unknown method state code {}", buf[4]))
        })?;
        Ok(Self {
            request_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            state,
            return_value: i32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]),
            payload_length: u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_little_endian_layout() {
        let header = RequestHeader::new(0x04030201, 0x0605, 0x0807);
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], b"2\0\0\0");
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..10], &[0x05, 0x06]);
        assert_eq!(&bytes[10..12], &[0x07, 0x08]);
    }

    #[test]
    fn test_request_header_decode() {
        let bytes = [b'2', 0, 0, 0, 42, 0, 0, 0, 3, 0, 1, 0];
        let header = RequestHeader::decode(&bytes).unwrap();
        assert_eq!(header.request_id, 42);
        assert_eq!(header.method_id, 3);
        assert_eq!(header.parameter_count, 1);
        assert_eq!(header.version_str(), "2");
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; REQUEST_HEADER_SIZE - 1];
        assert!(RequestHeader::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_rejects_other_version() {
        let header = RequestHeader::new(1, 1, 0).with_version("1");
        let err = header.validate().unwrap_err();
        assert!(matches!(err, RpcError::UnsupportedVersion { .. }));
        assert!(err.to_string().contains("\"1\""));
    }

    #[test]
    fn test_validate_parameter_count_limit() {
        assert!(RequestHeader::new(1, 1, MAX_PARAMETER_COUNT).validate().is_ok());

        let err = RequestHeader::new(1, 1, MAX_PARAMETER_COUNT + 1)
            .validate()
            .unwrap_err();
        assert!(matches!(err, RpcError::TooManyParameters { count: 11, max: 10 }));
    }

    #[test]
    fn test_version_tag_truncates() {
        assert_eq!(version_tag("12345"), *b"1234");
        assert_eq!(version_tag(""), [0; 4]);
    }

    #[test]
    fn test_method_state_codes() {
        for code in 0..=4u8 {
            let state = MethodState::from_u8(code).unwrap();
            assert_eq!(state.as_u8(), code);
        }
        assert!(MethodState::from_u8(5).is_none());

        assert!(!MethodState::ParsingInput.is_terminal());
        assert!(!MethodState::GeneratingOutput.is_terminal());
        assert!(MethodState::Good.is_terminal());
        assert!(MethodState::InternalError.is_terminal());
        assert!(MethodState::ParameterCountMismatch.is_terminal());
    }

    #[test]
    fn test_response_header_layout() {
        let header = ResponseHeader::new(9, MethodState::Good, -2, 18);
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &[9, 0, 0, 0]);
        assert_eq!(bytes[4], 2);
        assert_eq!(&bytes[5..9], &(-2i32).to_le_bytes());
        assert_eq!(&bytes[9..13], &[18, 0, 0, 0]);
        assert_eq!(ResponseHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_response_header_unknown_state() {
        let mut bytes = ResponseHeader::new(1, MethodState::Good, 0, 0).encode();
        bytes[4] = 0x7F;
        assert!(ResponseHeader::decode(&bytes).is_err());
        assert!(ResponseHeader::decode(&bytes[..5]).is_err());
    }
}
