//! Async client for calling a server.
//!
//! Calls are sequential on one connection: each `call` writes a request and
//! waits for the matching response. Method names are resolved through the
//! built-in listing (method 0) and cached.
//!
//! # Example
//!
//! ```no_run
//! use arenarpc::{Client, Parameter};
//!
//! # async fn run() -> arenarpc::Result<()> {
//! let mut client = Client::connect("127.0.0.1:5543").await?;
//! let response = client
//!     .call_by_name("echo", &[Parameter::buffer(&b"hello"[..])])
//!     .await?;
//! assert!(response.is_good());
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::control::{MethodListing, LISTING_BUFFER_ID};
use crate::error::{Result, RpcError};
use crate::protocol::{
    build_request_frame, MethodState, Parameter, RequestHeader, ResponseBuffer, ResponseFrame,
    ResultRecord, LIST_METHODS_METHOD_ID, MAX_PARAMETER_COUNT,
};
use crate::transport::{self, map_io_error};

/// Read chunk size.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A decoded response.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: u32,
    pub state: MethodState,
    pub return_value: i32,
    /// Result records in the order the handler reserved them.
    pub buffers: Vec<ResultRecord>,
}

impl Response {
    fn from_frame(frame: &ResponseFrame) -> Result<Self> {
        Ok(Self {
            request_id: frame.request_id(),
            state: frame.state(),
            return_value: frame.return_value(),
            buffers: frame.records()?,
        })
    }

    #[inline]
    pub fn is_good(&self) -> bool {
        self.state == MethodState::Good
    }

    /// Payload of the first record tagged `buffer_id`.
    pub fn buffer(&self, buffer_id: u32) -> Option<&Bytes> {
        self.buffers
            .iter()
            .find(|r| r.buffer_id == buffer_id)
            .map(|r| &r.data)
    }
}

/// A connection to a server.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    responses: ResponseBuffer,
    pending: Vec<ResponseFrame>,
    next_request_id: u32,
    listing: Option<MethodListing>,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = transport::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            responses: ResponseBuffer::new(),
            pending: Vec::new(),
            next_request_id: 1,
            listing: None,
        }
    }

    /// Call `method_id` and wait for its response.
    pub async fn call(&mut self, method_id: u16, parameters: &[Parameter]) -> Result<Response> {
        let request_id = self.send(method_id, parameters).await?;
        self.recv(request_id).await
    }

    /// Resolve `name` through the method listing, then call it.
    pub async fn call_by_name(&mut self, name: &str, parameters: &[Parameter]) -> Result<Response> {
        let method_id = self.resolve(name).await?;
        self.call(method_id, parameters).await
    }

    /// Fetch the server's method listing, refreshing the cache.
    pub async fn list_methods(&mut self) -> Result<MethodListing> {
        let response = self.call(LIST_METHODS_METHOD_ID, &[]).await?;
        if !response.is_good() {
            return Err(RpcError::Protocol(format!(
                "Method listing failed with state {:?}",
                response.state
            )));
        }
        let json = response.buffer(LISTING_BUFFER_ID).ok_or_else(|| {
            RpcError::Protocol("Method listing response has no listing buffer".to_string())
        })?;

        let listing = MethodListing::from_json(json)?;
        self.listing = Some(listing.clone());
        Ok(listing)
    }

    /// Look up a method ID, fetching the listing on first use.
    pub async fn resolve(&mut self, name: &str) -> Result<u16> {
        if let Some(id) = self.listing.as_ref().and_then(|l| l.get_method_id(name)) {
            return Ok(id);
        }
        self.list_methods()
            .await?
            .get_method_id(name)
            .ok_or_else(|| RpcError::Protocol(format!("Unknown method: {}", name)))
    }

    /// Write a request without waiting for the response. Returns its ID.
    ///
    /// Pair with [`recv`](Self::recv) to pipeline several calls.
    pub async fn send(&mut self, method_id: u16, parameters: &[Parameter]) -> Result<u32> {
        let count = u16::try_from(parameters.len())
            .ok()
            .filter(|&c| c <= MAX_PARAMETER_COUNT)
            .ok_or(RpcError::TooManyParameters {
                count: parameters.len().min(u16::MAX as usize) as u16,
                max: MAX_PARAMETER_COUNT,
            })?;

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);

        let header = RequestHeader::new(request_id, method_id, count);
        self.send_raw(&build_request_frame(&header, parameters))
            .await?;
        Ok(request_id)
    }

    /// Write pre-encoded bytes as-is.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        transport::write_all(&mut self.stream, bytes, "writing request").await
    }

    /// Wait for the response to `request_id`.
    ///
    /// Responses to other requests that arrive first are kept for later
    /// `recv` calls.
    pub async fn recv(&mut self, request_id: u32) -> Result<Response> {
        loop {
            if let Some(pos) = self.pending.iter().position(|f| f.request_id() == request_id) {
                let frame = self.pending.remove(pos);
                return Response::from_frame(&frame);
            }
            self.fill().await?;
        }
    }

    /// Wait for whichever response arrives next.
    pub async fn recv_next(&mut self) -> Result<Response> {
        loop {
            if !self.pending.is_empty() {
                let frame = self.pending.remove(0);
                return Response::from_frame(&frame);
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<()> {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        let n = self
            .stream
            .read(&mut chunk)
            .await
            .map_err(|e| map_io_error(e, "reading response"))?;
        if n == 0 {
            return Err(RpcError::ConnectionClosed);
        }
        let frames = self.responses.push(&chunk[..n])?;
        self.pending.extend(frames);
        Ok(())
    }
}
