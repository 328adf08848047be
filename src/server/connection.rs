//! Per-connection reader: the acceptor side of a connection.
//!
//! The read half is parsed here, one request at a time; the write half
//! belongs to the connection's writer task. A request is pushed to the queue
//! only once its header and every declared parameter were read, so a framing
//! error never leaves a partial request behind.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use super::StopHandle;
use crate::config::ServerConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{Parameter, ParameterTag, RequestHeader, REQUEST_HEADER_SIZE};
use crate::queue::RequestQueue;
use crate::request::{Connection, Request};
use crate::transport::{read_exact, read_frame_start};
use crate::writer::spawn_writer_task;

/// Serve one accepted connection until EOF, a framing error, or stop.
///
/// Returns after the connection's writer has flushed every response handed
/// to it.
pub(crate) async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    queue: Arc<RequestQueue>,
    stop: StopHandle,
    config: Arc<ServerConfig>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(connection = id, error = %e, "Failed to set TCP_NODELAY");
    }
    let (mut read_half, write_half) = stream.into_split();
    let (writer, writer_task) = spawn_writer_task(write_half, &config.writer);
    let connection = Connection { id, peer, writer };

    debug!(connection = id, %peer, "Connection opened");

    let result = tokio::select! {
        _ = stop.stopped() => Ok(()),
        r = read_loop(&mut read_half, &connection, &queue, RequestLimits::from_config(&config)) => r,
    };

    match result {
        Ok(()) | Err(RpcError::ConnectionClosed) | Err(RpcError::QueueClosed) => {
            debug!(connection = id, %peer, "Connection reader finished");
        }
        Err(e) => {
            warn!(connection = id, %peer, error = %e, "Closing connection after framing error");
        }
    }

    // In-flight requests hold their own writer handles; the writer task ends
    // once the last of them is answered.
    drop(connection);
    match writer_task.await {
        Ok(Ok(())) => debug!(connection = id, %peer, "Connection closed"),
        Ok(Err(e)) => debug!(connection = id, %peer, error = %e, "Connection writer failed"),
        Err(e) => error!(connection = id, error = %e, "Connection writer task failed"),
    }
}

/// Size limits applied while parsing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestLimits {
    pub max_buffer_parameter_size: u32,
    pub max_request_size: u32,
}

impl RequestLimits {
    pub(crate) fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_buffer_parameter_size: config.max_buffer_parameter_size,
            max_request_size: config.max_request_size,
        }
    }

    /// Fail unless `size` bytes fit in one request.
    fn check_request_size(&self, size: u64) -> Result<()> {
        if size > u64::from(self.max_request_size) {
            return Err(RpcError::RequestTooLarge {
                size,
                max: self.max_request_size,
            });
        }
        Ok(())
    }
}

async fn read_loop<R>(
    reader: &mut R,
    connection: &Connection,
    queue: &RequestQueue,
    limits: RequestLimits,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some((header, parameters)) = read_request(reader, limits).await? {
        let (request_id, method_id) = (header.request_id, header.method_id);
        queue
            .push(Request::with_connection(header, parameters, connection.clone()))
            .await?;
        debug!(
            connection = connection.id,
            request_id,
            method_id,
            queued = queue.len(),
            "Request queued"
        );
    }
    Ok(())
}

/// Read one complete request.
///
/// Returns `Ok(None)` on a clean EOF before the header. The header is
/// validated before any parameter is read, and every size limit is checked
/// before the bytes it covers are allocated.
pub(crate) async fn read_request<R>(
    reader: &mut R,
    limits: RequestLimits,
) -> Result<Option<(RequestHeader, Vec<Parameter>)>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; REQUEST_HEADER_SIZE];
    if !read_frame_start(reader, &mut buf).await? {
        return Ok(None);
    }

    let header = RequestHeader::decode(&buf)
        .ok_or_else(|| RpcError::Protocol("Short request header".to_string()))?;
    header.validate()?;

    let mut size = REQUEST_HEADER_SIZE as u64;
    let mut parameters = Vec::with_capacity(usize::from(header.parameter_count));
    for _ in 0..header.parameter_count {
        parameters.push(read_parameter(reader, limits, &mut size).await?);
    }

    Ok(Some((header, parameters)))
}

/// Read one parameter, adding its wire size to `size`.
async fn read_parameter<R>(reader: &mut R, limits: RequestLimits, size: &mut u64) -> Result<Parameter>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    read_exact(reader, &mut tag, "reading parameter tag").await?;
    let tag = ParameterTag::from_u8(tag[0])?;

    if let Some(width) = tag.scalar_width() {
        *size += 1 + width as u64;
        limits.check_request_size(*size)?;
        let mut body = [0u8; 8];
        read_exact(reader, &mut body[..width], "reading scalar parameter").await?;
        return Parameter::decode_scalar(tag, &body[..width]);
    }

    let mut len = [0u8; 4];
    read_exact(reader, &mut len, "reading buffer parameter length").await?;
    let len = u32::from_le_bytes(len);
    if len > limits.max_buffer_parameter_size {
        return Err(RpcError::BufferParameterTooLarge {
            size: len,
            max: limits.max_buffer_parameter_size,
        });
    }
    *size += 5 + u64::from(len);
    limits.check_request_size(*size)?;

    let mut data = BytesMut::zeroed(len as usize);
    read_exact(reader, &mut data, "reading buffer parameter").await?;
    Ok(Parameter::Buffer(data.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_request_frame;
    use tokio::io::{duplex, AsyncWriteExt};

    fn limits(max_buffer: u32) -> RequestLimits {
        RequestLimits {
            max_buffer_parameter_size: max_buffer,
            max_request_size: 1024 * 1024,
        }
    }

    async fn parse_with(
        bytes: Vec<u8>,
        limits: RequestLimits,
    ) -> Result<Option<(RequestHeader, Vec<Parameter>)>> {
        let (mut a, mut b) = duplex(64 * 1024);
        a.write_all(&bytes).await.unwrap();
        drop(a);
        read_request(&mut b, limits).await
    }

    async fn parse(bytes: Vec<u8>, max: u32) -> Result<Option<(RequestHeader, Vec<Parameter>)>> {
        parse_with(bytes, limits(max)).await
    }

    #[tokio::test]
    async fn test_read_request_with_parameters() {
        let header = RequestHeader::new(5, 2, 3);
        let params = vec![
            Parameter::S16(-2),
            Parameter::buffer(&b"payload"[..]),
            Parameter::S64(99),
        ];
        let bytes = build_request_frame(&header, &params);

        let (parsed, parsed_params) = parse(bytes, 1024).await.unwrap().unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed_params, params);
    }

    #[tokio::test]
    async fn test_read_request_clean_eof() {
        assert!(parse(vec![], 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected_before_parameters() {
        let header = RequestHeader::new(1, 1, 1).with_version("1");
        // Only the header is sent: a reader that tried to read parameters
        // would report ConnectionClosed instead.
        let err = parse(header.encode().to_vec(), 1024).await.unwrap_err();
        assert!(matches!(err, RpcError::UnsupportedVersion { .. }));
    }

    #[tokio::test]
    async fn test_too_many_parameters() {
        let header = RequestHeader::new(1, 1, 11);
        let err = parse(header.encode().to_vec(), 1024).await.unwrap_err();
        assert!(matches!(err, RpcError::TooManyParameters { count: 11, .. }));
    }

    #[tokio::test]
    async fn test_unknown_tag() {
        let mut bytes = RequestHeader::new(1, 1, 1).encode().to_vec();
        bytes.push(7);
        let err = parse(bytes, 1024).await.unwrap_err();
        assert!(matches!(err, RpcError::UnknownParameterTag(7)));
    }

    #[tokio::test]
    async fn test_buffer_too_large() {
        let header = RequestHeader::new(1, 1, 1);
        let bytes = build_request_frame(&header, &[Parameter::buffer(vec![0u8; 32])]);
        let err = parse(bytes, 16).await.unwrap_err();
        assert!(matches!(
            err,
            RpcError::BufferParameterTooLarge { size: 32, max: 16 }
        ));
    }

    #[tokio::test]
    async fn test_request_size_limit_counts_all_parameters() {
        let header = RequestHeader::new(1, 1, 3);
        let params = vec![
            Parameter::buffer(vec![1u8; 20]),
            Parameter::S32(7),
            Parameter::buffer(vec![2u8; 20]),
        ];
        // 12 header + 25 + 5 + 25 bytes on the wire.
        let exact = RequestLimits {
            max_buffer_parameter_size: 32,
            max_request_size: 67,
        };
        let (_, parsed) = parse_with(build_request_frame(&header, &params), exact)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parsed, params);

        // Each buffer is within its own limit, the request as a whole is not.
        let tight = RequestLimits {
            max_request_size: 66,
            ..exact
        };
        let err = parse_with(build_request_frame(&header, &params), tight)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::RequestTooLarge { size: 67, max: 66 }
        ));
    }

    #[tokio::test]
    async fn test_request_size_rejected_before_buffer_is_read() {
        let header = RequestHeader::new(1, 1, 1);
        let mut bytes = header.encode().to_vec();
        bytes.push(ParameterTag::Buffer as u8);
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        // No buffer body follows: a reader that tried to read it would
        // report ConnectionClosed instead.
        let limits = RequestLimits {
            max_buffer_parameter_size: 4096,
            max_request_size: 512,
        };
        let err = parse_with(bytes, limits).await.unwrap_err();
        assert!(matches!(err, RpcError::RequestTooLarge { max: 512, .. }));
    }

    #[tokio::test]
    async fn test_truncated_parameter() {
        let header = RequestHeader::new(1, 1, 2);
        let mut bytes = build_request_frame(&header, &[Parameter::S32(1), Parameter::S32(2)]);
        bytes.truncate(bytes.len() - 2);
        let err = parse(bytes, 1024).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_read_loop_enqueues_complete_requests_only() {
        let (mut a, mut b) = duplex(64 * 1024);
        let (w, _w_task) = spawn_writer_task(tokio::io::sink(), &Default::default());
        let connection = Connection {
            id: 1,
            peer: "127.0.0.1:1".parse().unwrap(),
            writer: w,
        };
        let queue = RequestQueue::new(8);

        let mut bytes = build_request_frame(&RequestHeader::new(1, 1, 0), &[]);
        bytes.extend(build_request_frame(
            &RequestHeader::new(2, 1, 1),
            &[Parameter::S8(1)],
        ));
        let mut bad = RequestHeader::new(3, 1, 1).encode().to_vec();
        bad.push(9);
        bytes.extend(bad);
        a.write_all(&bytes).await.unwrap();
        drop(a);

        let result = read_loop(&mut b, &connection, &queue, limits(1024)).await;
        assert!(matches!(result, Err(RpcError::UnknownParameterTag(9))));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await.unwrap().request_id(), 1);
        assert_eq!(queue.pop().await.unwrap().parameters, vec![Parameter::S8(1)]);
    }
}
