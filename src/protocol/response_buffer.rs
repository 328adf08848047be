//! Buffer for accumulating partial reads of response frames.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 13 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! # Example
//!
//! ```ignore
//! use arenarpc::protocol::ResponseBuffer;
//!
//! let mut buffer = ResponseBuffer::new();
//!
//! // Data arrives in chunks from socket
//! let frames = buffer.push(&chunk)?;
//! for frame in frames {
//!     println!("request {} finished {:?}", frame.request_id(), frame.state());
//! }
//! ```

use bytes::{Bytes, BytesMut};

use super::frame::ResponseFrame;
use super::wire_format::{ResponseHeader, RESPONSE_HEADER_SIZE};
use crate::error::{Result, RpcError};

/// Default maximum response payload accepted by a decoder (64 MB).
pub const DEFAULT_MAX_RESPONSE_PAYLOAD: u32 = 64 * 1024 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 13 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: ResponseHeader },
}

/// Buffer for accumulating incoming bytes and extracting complete responses.
#[derive(Debug)]
pub struct ResponseBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl ResponseBuffer {
    /// Create a new buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 64MB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_RESPONSE_PAYLOAD)
    }

    /// Create a new buffer with custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns error on a malformed header or when a payload exceeds
    /// `max_payload_size`.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<ResponseFrame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<ResponseFrame>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    if self.buffer.len() < RESPONSE_HEADER_SIZE {
                        return Ok(None);
                    }

                    let header = ResponseHeader::decode(&self.buffer[..RESPONSE_HEADER_SIZE])?;

                    if header.payload_length > self.max_payload_size {
                        return Err(RpcError::Protocol(format!(
                            "Payload size {} exceeds maximum {}",
                            header.payload_length, self.max_payload_size
                        )));
                    }

                    let _ = self.buffer.split_to(RESPONSE_HEADER_SIZE);

                    if header.payload_length == 0 {
                        return Ok(Some(ResponseFrame::new(header, Bytes::new())));
                    }

                    self.state = State::WaitingForPayload { header };
                }

                State::WaitingForPayload { header } => {
                    let remaining = header.payload_length as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let header = *header;
                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;

                    return Ok(Some(ResponseFrame::new(header, payload)));
                }
            }
        }
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_response_frame, MethodState};

    fn make_frame_bytes(request_id: u32, state: MethodState, payload: &[u8]) -> Vec<u8> {
        let header = ResponseHeader::new(request_id, state, 0, payload.len() as u32);
        build_response_frame(&header, payload)
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = ResponseBuffer::new();
        let bytes = make_frame_bytes(42, MethodState::Good, b"payload!");

        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request_id(), 42);
        assert_eq!(&frames[0].payload[..], b"payload!");
        assert!(buffer.buffer.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = ResponseBuffer::new();
        let mut combined = make_frame_bytes(1, MethodState::Good, b"first");
        combined.extend(make_frame_bytes(2, MethodState::InternalError, b""));
        combined.extend(make_frame_bytes(3, MethodState::Good, b"third"));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].state(), MethodState::InternalError);
        assert_eq!(frames[2].request_id(), 3);
    }

    #[test]
    fn test_fragmented_header_and_payload() {
        let mut buffer = ResponseBuffer::new();
        let bytes = make_frame_bytes(7, MethodState::Good, b"fragmented payload");

        assert!(buffer.push(&bytes[..5]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        assert!(buffer.push(&bytes[5..RESPONSE_HEADER_SIZE + 3]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[RESPONSE_HEADER_SIZE + 3..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"fragmented payload");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = ResponseBuffer::new();
        let bytes = make_frame_bytes(1, MethodState::Good, b"hi");

        let mut all = Vec::new();
        for byte in &bytes {
            all.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all.len(), 1);
        assert_eq!(&all[0].payload[..], b"hi");
    }

    #[test]
    fn test_max_payload_validation() {
        let mut buffer = ResponseBuffer::with_max_payload(100);
        let header = ResponseHeader::new(1, MethodState::Good, 0, 1000);

        let err = buffer.push(&header.encode()).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

}
