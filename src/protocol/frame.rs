//! Request and response frames.
//!
//! Responses keep their payload as `bytes::Bytes`, and result records are
//! zero-copy slices of it.
//!
//! # Example
//!
//! ```
//! use arenarpc::protocol::{build_request_frame, Parameter, RequestHeader, REQUEST_HEADER_SIZE};
//!
//! let header = RequestHeader::new(1, 5, 1);
//! let bytes = build_request_frame(&header, &[Parameter::S32(7)]);
//! assert_eq!(bytes.len(), REQUEST_HEADER_SIZE + 5);
//! ```

use bytes::Bytes;

use super::parameter::Parameter;
use super::wire_format::{
    MethodState, RequestHeader, ResponseHeader, RESPONSE_HEADER_SIZE, RESULT_BUFFER_HEADER_SIZE,
};
use crate::error::{Result, RpcError};

/// One `{buffer_id, payload}` record from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    /// Application-chosen buffer identifier.
    pub buffer_id: u32,
    /// Record payload.
    pub data: Bytes,
}

/// A complete response frame.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    /// Decoded header.
    pub header: ResponseHeader,
    /// Concatenated result records.
    pub payload: Bytes,
}

impl ResponseFrame {
    /// Create a new frame from header and payload.
    pub fn new(header: ResponseHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> u32 {
        self.header.request_id
    }

    /// Get the final method state.
    #[inline]
    pub fn state(&self) -> MethodState {
        self.header.state
    }

    /// Get the handler's return value.
    #[inline]
    pub fn return_value(&self) -> i32 {
        self.header.return_value
    }

    /// Check if the call finished `Good`.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.header.state == MethodState::Good
    }

    /// Split the payload into result records.
    pub fn records(&self) -> Result<Vec<ResultRecord>> {
        parse_result_records(&self.payload)
    }
}

/// Build a complete request frame as a single byte vector.
pub fn build_request_frame(header: &RequestHeader, parameters: &[Parameter]) -> Vec<u8> {
    let body: usize = parameters.iter().map(Parameter::encoded_len).sum();
    let mut buf = Vec::with_capacity(super::REQUEST_HEADER_SIZE + body);
    buf.extend_from_slice(&header.encode());
    for param in parameters {
        param.encode_into(&mut buf);
    }
    buf
}

/// Build a complete response frame as a single byte vector.
pub fn build_response_frame(header: &ResponseHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RESPONSE_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Split a response payload into result records.
///
/// Fails if a record header or body runs past the end of the payload.
pub fn parse_result_records(payload: &Bytes) -> Result<Vec<ResultRecord>> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < payload.len() {
        if payload.len() - pos < RESULT_BUFFER_HEADER_SIZE {
            return Err(RpcError::Protocol(format!(
                "Truncated result record header at offset {}",
                pos
            )));
        }
        let p = &payload[pos..];
        let buffer_id = u32::from_le_bytes([p[0], p[1], p[2], p[3]]);
        let size = u32::from_le_bytes([p[4], p[5], p[6], p[7]]) as usize;
        let start = pos + RESULT_BUFFER_HEADER_SIZE;

        if payload.len() - start < size {
            return Err(RpcError::Protocol(format!(
                "Result record {} claims {} bytes, only {} left",
                buffer_id,
                size,
                payload.len() - start
            )));
        }

        records.push(ResultRecord {
            buffer_id,
            data: payload.slice(start..start + size),
        });
        pos = start + size;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::REQUEST_HEADER_SIZE;

    fn record(id: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_build_request_frame() {
        let header = RequestHeader::new(3, 9, 2);
        let params = [Parameter::S8(1), Parameter::buffer(&b"xy"[..])];
        let bytes = build_request_frame(&header, &params);

        assert_eq!(bytes.len(), REQUEST_HEADER_SIZE + 2 + 7);
        assert_eq!(RequestHeader::decode(&bytes).unwrap(), header);
        assert_eq!(&bytes[REQUEST_HEADER_SIZE..REQUEST_HEADER_SIZE + 2], &[0, 1]);
    }

    #[test]
    fn test_parse_result_records() {
        let mut payload = record(1, b"hello");
        payload.extend(record(7, b""));
        payload.extend(record(2, b"xyz"));

        let records = parse_result_records(&Bytes::from(payload)).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].buffer_id, 1);
        assert_eq!(&records[0].data[..], b"hello");
        assert_eq!(records[1].buffer_id, 7);
        assert!(records[1].data.is_empty());
        assert_eq!(&records[2].data[..], b"xyz");
    }

    #[test]
    fn test_parse_result_records_empty() {
        assert!(parse_result_records(&Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_result_records_truncated() {
        let mut payload = record(1, b"hello");
        payload.truncate(payload.len() - 1);
        assert!(parse_result_records(&Bytes::from(payload)).is_err());

        assert!(parse_result_records(&Bytes::from_static(&[1, 0, 0])).is_err());
    }

    #[test]
    fn test_response_frame_accessors() {
        let payload = Bytes::from(record(4, b"data"));
        let header = ResponseHeader::new(11, MethodState::Good, 5, payload.len() as u32);
        let frame = ResponseFrame::new(header, payload);

        assert_eq!(frame.request_id(), 11);
        assert_eq!(frame.return_value(), 5);
        assert!(frame.is_good());
        assert_eq!(frame.records().unwrap()[0].buffer_id, 4);
    }

    #[test]
    fn test_build_response_frame() {
        let header = ResponseHeader::new(1, MethodState::InternalError, 0, 0);
        let bytes = build_response_frame(&header, b"");
        assert_eq!(bytes.len(), RESPONSE_HEADER_SIZE);
        assert_eq!(ResponseHeader::decode(&bytes).unwrap(), header);
    }
}
