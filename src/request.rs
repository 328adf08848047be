//! Parsed requests and the connection they came from.

use std::net::SocketAddr;

use crate::protocol::{Parameter, RequestHeader};
use crate::writer::WriterHandle;

/// The origin of a request: where its response must be written.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Server-assigned connection number, for logging.
    pub id: u64,
    /// Remote address.
    pub peer: SocketAddr,
    /// Handle to the connection's writer task.
    pub writer: WriterHandle,
}

/// A fully parsed request waiting for a worker.
///
/// The parameter list is exactly `header.parameter_count` long; requests
/// that fail to parse never reach the queue. A request is moved from its
/// reader into the queue and from there to one worker; it is never shared.
#[derive(Debug)]
pub struct Request {
    /// Decoded request header.
    pub header: RequestHeader,
    /// Decoded parameters, in wire order.
    pub parameters: Vec<Parameter>,
    /// Connection to answer on. A worker executes a request without one
    /// but has nowhere to send the response.
    pub connection: Option<Connection>,
}

impl Request {
    #[cfg(test)]
    pub(crate) fn new(header: RequestHeader, parameters: Vec<Parameter>) -> Self {
        Self {
            header,
            parameters,
            connection: None,
        }
    }

    /// Create a request bound to a connection.
    pub fn with_connection(
        header: RequestHeader,
        parameters: Vec<Parameter>,
        connection: Connection,
    ) -> Self {
        Self {
            header,
            parameters,
            connection: Some(connection),
        }
    }

    /// Request ID, echoed back in the response.
    #[inline]
    pub fn request_id(&self) -> u32 {
        self.header.request_id
    }

    /// Target method ID.
    #[inline]
    pub fn method_id(&self) -> u16 {
        self.header.method_id
    }

    /// Declared parameter count.
    #[inline]
    pub fn parameter_count(&self) -> u16 {
        self.header.parameter_count
    }
}
