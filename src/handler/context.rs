//! Method interface handed to request handlers.
//!
//! A handler sees one request through a [`MethodInterface`] and drives it
//! through two phases:
//! - `ParsingInput`: read each declared parameter in order, then call
//!   `finish_input_parameters`
//! - `GeneratingOutput`: reserve and fill result buffers in the worker's
//!   arena, then finish with `finish_good` or `finish_internal_error`
//!
//! # Example
//!
//! ```ignore
//! fn add(method: &mut MethodInterface<'_>) {
//!     let (Ok(a), Ok(b)) = (method.get_parameter_s32(), method.get_parameter_s32()) else {
//!         let _ = method.finish_internal_error();
//!         return;
//!     };
//!     if method.finish_input_parameters().is_err() {
//!         return;
//!     }
//!     let _ = method.finish_good(a.wrapping_add(b));
//! }
//! ```

use std::fmt;

use thiserror::Error;

use crate::arena::{ResizeOutcome, ResultBuffer, WorkArena};
use crate::protocol::{MethodState, Parameter, ParameterTag};
use crate::request::Request;

/// Misuse of a [`MethodInterface`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MethodError {
    /// The operation is not allowed in the current state.
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: MethodState,
    },

    /// The next parameter has a different kind.
    #[error("parameter {index} is {found}, not {expected}")]
    ParameterTypeMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// Every declared parameter was already read.
    #[error("all {count} parameters already consumed")]
    ParametersExhausted { count: usize },

    /// Input finished before every parameter was read.
    #[error("consumed {consumed} of {declared} parameters")]
    ParameterCountMismatch { consumed: usize, declared: usize },

    /// The work arena cannot hold the requested buffer.
    #[error("result buffer of {requested} bytes does not fit ({available} bytes left)")]
    OutOfMemory { requested: usize, available: usize },

    /// Only the most recently reserved buffer can be resized.
    #[error("buffer is not the last reserved result buffer")]
    NotTailBuffer,

    /// The handle does not belong to this request's output.
    #[error("stale result buffer handle")]
    StaleBuffer,
}

/// Per-request view over one request and one worker's work arena.
pub struct MethodInterface<'a> {
    request: &'a Request,
    arena: &'a mut WorkArena,
    cursor: usize,
    state: MethodState,
    return_value: i32,
}

impl<'a> MethodInterface<'a> {
    /// Bind a request to a worker's arena.
    pub fn new(request: &'a Request, arena: &'a mut WorkArena) -> Self {
        Self {
            request,
            arena,
            cursor: 0,
            state: MethodState::ParsingInput,
            return_value: 0,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> MethodState {
        self.state
    }

    /// Return value recorded by `finish_good`, 0 otherwise.
    #[inline]
    pub fn return_value(&self) -> i32 {
        self.return_value
    }

    #[inline]
    pub fn request_id(&self) -> u32 {
        self.request.request_id()
    }

    #[inline]
    pub fn method_id(&self) -> u16 {
        self.request.method_id()
    }

    /// Number of parameters the caller declared.
    #[inline]
    pub fn parameter_count(&self) -> u16 {
        self.request.parameter_count()
    }

    /// Bytes of output produced so far, record headers included.
    #[inline]
    pub fn result_size(&self) -> usize {
        self.arena.size()
    }

    /// Bytes the arena can still hold, record headers included.
    #[inline]
    pub fn result_remaining(&self) -> usize {
        self.arena.remaining()
    }

    pub fn get_parameter_s8(&mut self) -> Result<i8, MethodError> {
        self.take_parameter("get_parameter_s8", ParameterTag::S8, |p| match p {
            Parameter::S8(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_parameter_s16(&mut self) -> Result<i16, MethodError> {
        self.take_parameter("get_parameter_s16", ParameterTag::S16, |p| match p {
            Parameter::S16(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_parameter_s32(&mut self) -> Result<i32, MethodError> {
        self.take_parameter("get_parameter_s32", ParameterTag::S32, |p| match p {
            Parameter::S32(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_parameter_s64(&mut self) -> Result<i64, MethodError> {
        self.take_parameter("get_parameter_s64", ParameterTag::S64, |p| match p {
            Parameter::S64(v) => Some(*v),
            _ => None,
        })
    }

    /// Read the next parameter as a byte buffer.
    ///
    /// The slice borrows the received request data; nothing is copied.
    pub fn get_parameter_buffer(&mut self) -> Result<&'a [u8], MethodError> {
        self.take_parameter("get_parameter_buffer", ParameterTag::Buffer, |p| match p {
            Parameter::Buffer(data) => Some(&data[..]),
            _ => None,
        })
    }

    /// Close the input phase.
    ///
    /// Fails, and moves to `ParameterCountMismatch`, unless every declared
    /// parameter was read. On success the arena is emptied for output.
    pub fn finish_input_parameters(&mut self) -> Result<(), MethodError> {
        self.expect_state("finish_input_parameters", MethodState::ParsingInput)?;

        let declared = self.request.parameters.len();
        if self.cursor != declared {
            self.state = MethodState::ParameterCountMismatch;
            return Err(MethodError::ParameterCountMismatch {
                consumed: self.cursor,
                declared,
            });
        }

        self.arena.clear();
        self.state = MethodState::GeneratingOutput;
        Ok(())
    }

    /// Reserve a `size`-byte result buffer tagged `buffer_id`.
    ///
    /// The payload content is unspecified until written.
    pub fn reserve_result_buffer(
        &mut self,
        buffer_id: u32,
        size: usize,
    ) -> Result<ResultBuffer, MethodError> {
        self.expect_state("reserve_result_buffer", MethodState::GeneratingOutput)?;

        self.arena
            .reserve(buffer_id, size)
            .ok_or(MethodError::OutOfMemory {
                requested: size,
                available: self.arena.remaining(),
            })
    }

    /// Resize the most recently reserved buffer, returning the updated handle.
    pub fn resize_last_result_buffer(
        &mut self,
        buffer: ResultBuffer,
        new_size: usize,
    ) -> Result<ResultBuffer, MethodError> {
        self.expect_state("resize_last_result_buffer", MethodState::GeneratingOutput)?;

        let mut buffer = buffer;
        match self.arena.resize_last(&mut buffer, new_size) {
            ResizeOutcome::Good => Ok(buffer),
            ResizeOutcome::InputError => Err(MethodError::NotTailBuffer),
            ResizeOutcome::OutOfMemory => Err(MethodError::OutOfMemory {
                requested: new_size,
                available: self.arena.capacity() - (self.arena.size() - buffer.len()),
            }),
        }
    }

    /// Mutable payload of a buffer reserved for this request.
    pub fn result_buffer_mut(&mut self, buffer: &ResultBuffer) -> Result<&mut [u8], MethodError> {
        self.expect_state("result_buffer_mut", MethodState::GeneratingOutput)?;
        self.arena.buffer_mut(buffer).ok_or(MethodError::StaleBuffer)
    }

    /// Reserve a buffer sized to `data` and copy `data` into it.
    pub fn write_result_buffer(
        &mut self,
        buffer_id: u32,
        data: &[u8],
    ) -> Result<ResultBuffer, MethodError> {
        let buffer = self.reserve_result_buffer(buffer_id, data.len())?;
        self.arena
            .buffer_mut(&buffer)
            .ok_or(MethodError::StaleBuffer)?
            .copy_from_slice(data);
        Ok(buffer)
    }

    /// Finish successfully with `return_value`.
    pub fn finish_good(&mut self, return_value: i32) -> Result<(), MethodError> {
        self.expect_state("finish_good", MethodState::GeneratingOutput)?;
        self.return_value = return_value;
        self.state = MethodState::Good;
        Ok(())
    }

    /// Abandon the request. Any output produced so far is discarded.
    pub fn finish_internal_error(&mut self) -> Result<(), MethodError> {
        if self.state.is_terminal() {
            return Err(MethodError::InvalidState {
                operation: "finish_internal_error",
                state: self.state,
            });
        }
        self.state = MethodState::InternalError;
        Ok(())
    }

    /// Payload to transmit: the arena records when `Good`, nothing otherwise.
    pub(crate) fn output(&self) -> &[u8] {
        if self.state == MethodState::Good {
            self.arena.raw()
        } else {
            &[]
        }
    }

    fn expect_state(&self, operation: &'static str, expected: MethodState) -> Result<(), MethodError> {
        if self.state != expected {
            return Err(MethodError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Consume the parameter under the cursor if `extract` accepts it.
    fn take_parameter<T>(
        &mut self,
        operation: &'static str,
        expected: ParameterTag,
        extract: impl FnOnce(&'a Parameter) -> Option<T>,
    ) -> Result<T, MethodError> {
        self.expect_state(operation, MethodState::ParsingInput)?;

        let request: &'a Request = self.request;
        let param = request
            .parameters
            .get(self.cursor)
            .ok_or(MethodError::ParametersExhausted {
                count: request.parameters.len(),
            })?;

        let value = extract(param).ok_or(MethodError::ParameterTypeMismatch {
            index: self.cursor,
            expected: expected.name(),
            found: param.tag().name(),
        })?;
        self.cursor += 1;
        Ok(value)
    }
}

impl fmt::Debug for MethodInterface<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInterface")
            .field("request_id", &self.request_id())
            .field("method_id", &self.method_id())
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .field("return_value", &self.return_value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestHeader;
    use bytes::Bytes;

    fn request(params: Vec<Parameter>) -> Request {
        Request::new(RequestHeader::new(9, 3, params.len() as u16), params)
    }

    #[test]
    fn test_debug_shows_progress() {
        let req = request(vec![Parameter::S32(5)]);
        let mut arena = WorkArena::new(64);
        let mut m = MethodInterface::new(&req, &mut arena);
        m.get_parameter_s32().unwrap();

        let debug = format!("{:?}", m);
        assert!(debug.starts_with("MethodInterface"));
        assert!(debug.contains("request_id: 9"));
        assert!(debug.contains("cursor: 1"));
        assert!(debug.contains("ParsingInput"));
    }

    #[test]
    fn test_reads_parameters_in_order() {
        let req = request(vec![
            Parameter::S8(-1),
            Parameter::S16(300),
            Parameter::S32(-70_000),
            Parameter::S64(1 << 40),
            Parameter::Buffer(Bytes::from_static(b"blob")),
        ]);
        let mut arena = WorkArena::new(64);
        let mut m = MethodInterface::new(&req, &mut arena);

        assert_eq!(m.request_id(), 9);
        assert_eq!(m.method_id(), 3);
        assert_eq!(m.parameter_count(), 5);
        assert_eq!(m.get_parameter_s8().unwrap(), -1);
        assert_eq!(m.get_parameter_s16().unwrap(), 300);
        assert_eq!(m.get_parameter_s32().unwrap(), -70_000);
        assert_eq!(m.get_parameter_s64().unwrap(), 1 << 40);
        assert_eq!(m.get_parameter_buffer().unwrap(), b"blob");
        assert!(m.finish_input_parameters().is_ok());
        assert_eq!(m.state(), MethodState::GeneratingOutput);
    }

    #[test]
    fn test_type_mismatch_leaves_cursor() {
        let req = request(vec![Parameter::S32(5)]);
        let mut arena = WorkArena::new(64);
        let mut m = MethodInterface::new(&req, &mut arena);

        assert_eq!(
            m.get_parameter_s8(),
            Err(MethodError::ParameterTypeMismatch {
                index: 0,
                expected: "s8",
                found: "s32"
            })
        );
        assert_eq!(m.state(), MethodState::ParsingInput);
        assert_eq!(m.get_parameter_s32().unwrap(), 5);
        assert_eq!(
            m.get_parameter_s32(),
            Err(MethodError::ParametersExhausted { count: 1 })
        );
        assert!(m.finish_input_parameters().is_ok());
    }

    #[test]
    fn test_count_mismatch_is_terminal() {
        let req = request(vec![Parameter::S8(1), Parameter::S8(2)]);
        let mut arena = WorkArena::new(64);
        let mut m = MethodInterface::new(&req, &mut arena);

        m.get_parameter_s8().unwrap();
        assert_eq!(
            m.finish_input_parameters(),
            Err(MethodError::ParameterCountMismatch {
                consumed: 1,
                declared: 2
            })
        );
        assert_eq!(m.state(), MethodState::ParameterCountMismatch);

        assert!(matches!(
            m.get_parameter_s8(),
            Err(MethodError::InvalidState { .. })
        ));
        assert!(m.finish_internal_error().is_err());
        assert!(m.finish_good(1).is_err());
        assert_eq!(m.state(), MethodState::ParameterCountMismatch);
        assert!(m.output().is_empty());
    }

    #[test]
    fn test_finish_input_twice_fails() {
        let req = request(vec![]);
        let mut arena = WorkArena::new(64);
        let mut m = MethodInterface::new(&req, &mut arena);

        m.finish_input_parameters().unwrap();
        assert_eq!(
            m.finish_input_parameters(),
            Err(MethodError::InvalidState {
                operation: "finish_input_parameters",
                state: MethodState::GeneratingOutput
            })
        );
        assert_eq!(m.state(), MethodState::GeneratingOutput);
    }

    #[test]
    fn test_output_phase_requires_finished_input() {
        let req = request(vec![]);
        let mut arena = WorkArena::new(64);
        let mut m = MethodInterface::new(&req, &mut arena);

        assert!(matches!(
            m.reserve_result_buffer(1, 4),
            Err(MethodError::InvalidState { .. })
        ));
        assert!(matches!(
            m.finish_good(0),
            Err(MethodError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_finish_input_clears_arena() {
        let req = request(vec![]);
        let mut arena = WorkArena::new(64);
        arena.reserve(1, 10).unwrap();

        let mut m = MethodInterface::new(&req, &mut arena);
        m.finish_input_parameters().unwrap();
        assert_eq!(m.result_size(), 0);
    }

    #[test]
    fn test_reserve_resize_and_finish_good() {
        let req = request(vec![]);
        let mut arena = WorkArena::new(1024 * 1024 + 64);
        let mut m = MethodInterface::new(&req, &mut arena);
        m.finish_input_parameters().unwrap();

        let buf = m.reserve_result_buffer(1, 1024 * 1024).unwrap();
        let buf = m.resize_last_result_buffer(buf, 10).unwrap();
        m.result_buffer_mut(&buf).unwrap().copy_from_slice(b"0123456789");
        m.finish_good(42).unwrap();

        assert_eq!(m.state(), MethodState::Good);
        assert_eq!(m.return_value(), 42);
        assert_eq!(m.result_size(), 10 + 8);
        assert_eq!(&m.output()[8..], b"0123456789");
        assert!(m.reserve_result_buffer(2, 1).is_err());
    }

    #[test]
    fn test_resize_non_tail_fails() {
        let req = request(vec![]);
        let mut arena = WorkArena::new(128);
        let mut m = MethodInterface::new(&req, &mut arena);
        m.finish_input_parameters().unwrap();

        let first = m.write_result_buffer(1, b"abc").unwrap();
        m.write_result_buffer(2, b"de").unwrap();
        let before = m.result_size();

        assert_eq!(
            m.resize_last_result_buffer(first, 1),
            Err(MethodError::NotTailBuffer)
        );
        assert_eq!(m.result_size(), before);
    }

    #[test]
    fn test_out_of_memory() {
        let req = request(vec![]);
        let mut arena = WorkArena::new(16);
        let mut m = MethodInterface::new(&req, &mut arena);
        m.finish_input_parameters().unwrap();

        assert_eq!(
            m.reserve_result_buffer(1, 9),
            Err(MethodError::OutOfMemory {
                requested: 9,
                available: 16
            })
        );
        let buf = m.reserve_result_buffer(1, 8).unwrap();
        assert!(matches!(
            m.resize_last_result_buffer(buf, 9),
            Err(MethodError::OutOfMemory { .. })
        ));
        assert!(m.finish_internal_error().is_ok());
        assert_eq!(m.state(), MethodState::InternalError);
        assert!(m.output().is_empty());
    }

    #[test]
    fn test_internal_error_from_parsing_input() {
        let req = request(vec![Parameter::S8(1)]);
        let mut arena = WorkArena::new(16);
        let mut m = MethodInterface::new(&req, &mut arena);

        assert!(m.finish_internal_error().is_ok());
        assert_eq!(m.state(), MethodState::InternalError);
        assert!(m.finish_input_parameters().is_err());
    }

    #[test]
    fn test_stale_handle_rejected() {
        let req = request(vec![]);
        let mut arena = WorkArena::new(64);
        let stale = arena.reserve(1, 4).unwrap();

        let mut m = MethodInterface::new(&req, &mut arena);
        m.finish_input_parameters().unwrap();
        assert_eq!(m.result_buffer_mut(&stale), Err(MethodError::StaleBuffer));
    }
}
