//! Size-exact TCP read and write primitives.
//!
//! Every helper either transfers the full byte count or fails. A peer that
//! disconnects mid-transfer is reported as `ConnectionClosed`; other socket
//! failures come back as `Io`.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::{Result, RpcError};

/// Connect to `addr` with Nagle's algorithm disabled.
pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| map_io_error(e, "connecting"))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Fill `buf` completely.
pub async fn read_exact<R>(reader: &mut R, buf: &mut [u8], context: &str) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    reader
        .read_exact(buf)
        .await
        .map(|_| ())
        .map_err(|e| map_io_error(e, context))
}

/// Fill `buf` completely, treating EOF before the first byte as a clean end.
///
/// Returns `Ok(false)` when the peer closed the connection at a frame
/// boundary, `Ok(true)` when `buf` was filled. EOF after a partial read is
/// `ConnectionClosed`.
pub async fn read_frame_start<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| map_io_error(e, "reading frame header"))?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            tracing::debug!(filled, expected = buf.len(), "EOF inside frame header");
            return Err(RpcError::ConnectionClosed);
        }
        filled += n;
    }
    Ok(true)
}

/// Write all of `data` and flush.
pub async fn write_all<W>(writer: &mut W, data: &[u8], context: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(data)
        .await
        .map_err(|e| map_io_error(e, context))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, context))
}

/// Map socket errors: a vanished peer becomes `ConnectionClosed`.
pub fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
    match err.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected => {
            tracing::trace!(context, error = %err, "Peer disconnected");
            RpcError::ConnectionClosed
        }
        _ => RpcError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_read_exact_full() {
        let (mut a, mut b) = duplex(64);
        write_all(&mut a, b"abcdef", "test").await.unwrap();

        let mut buf = [0u8; 6];
        read_exact(&mut b, &mut buf, "test").await.unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[tokio::test]
    async fn test_read_exact_short_is_connection_closed() {
        let (mut a, mut b) = duplex(64);
        write_all(&mut a, b"abc", "test").await.unwrap();
        drop(a);

        let mut buf = [0u8; 6];
        assert!(matches!(
            read_exact(&mut b, &mut buf, "test").await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_frame_start_clean_eof() {
        let (a, mut b) = duplex(64);
        drop(a);

        let mut buf = [0u8; 12];
        assert!(!read_frame_start(&mut b, &mut buf).await.unwrap());
    }

    #[tokio::test]
    async fn test_frame_start_partial_eof() {
        let (mut a, mut b) = duplex(64);
        write_all(&mut a, &[1, 2, 3], "test").await.unwrap();
        drop(a);

        let mut buf = [0u8; 12];
        assert!(matches!(
            read_frame_start(&mut b, &mut buf).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_frame_start_across_chunks() {
        let (mut a, mut b) = duplex(64);
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            let ok = read_frame_start(&mut b, &mut buf).await.unwrap();
            (ok, buf)
        });

        write_all(&mut a, &[1, 2, 3], "test").await.unwrap();
        tokio::task::yield_now().await;
        write_all(&mut a, &[4, 5, 6, 7, 8], "test").await.unwrap();

        let (ok, buf) = reader.await.unwrap();
        assert!(ok);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_map_io_error() {
        let reset = std::io::Error::from(ErrorKind::ConnectionReset);
        assert!(matches!(map_io_error(reset, "x"), RpcError::ConnectionClosed));

        let other = std::io::Error::from(ErrorKind::PermissionDenied);
        assert!(matches!(map_io_error(other, "x"), RpcError::Io(_)));
    }
}
