//! Protocol module - wire format, parameters, and frames.
//!
//! This module implements the binary request/response protocol:
//! - 12-byte request header and tagged parameter encoding
//! - 13-byte response header followed by result records
//! - Response buffer for accumulating partial reads on the caller side

mod frame;
mod parameter;
mod response_buffer;
mod wire_format;

pub use frame::{
    build_request_frame, build_response_frame, parse_result_records, ResponseFrame, ResultRecord,
};
pub use parameter::{Parameter, ParameterTag};
pub use response_buffer::{ResponseBuffer, DEFAULT_MAX_RESPONSE_PAYLOAD};
pub use wire_format::{
    version_tag, MethodState, RequestHeader, ResponseHeader, DEFAULT_MAX_BUFFER_PARAMETER_SIZE,
    DEFAULT_WORK_BUFFER_SIZE, LIST_METHODS_METHOD_ID, MAX_PARAMETER_COUNT, PROTOCOL_VERSION,
    REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE, RESULT_BUFFER_HEADER_SIZE, VERSION_TAG_SIZE,
};
