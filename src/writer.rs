//! Per-connection writer task: the data plane of a connection.
//!
//! Each accepted connection hands its write half to a dedicated task fed by
//! an mpsc channel. Workers never touch the socket directly; they push a
//! finished response frame into the channel and go back to the queue, so a
//! slow client delays only its own writer task.
//!
//! ```text
//! Worker 1 ─┐
//! Worker 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► socket write half
//! Worker N ─┘
//! ```
//!
//! Frames that are ready together are written in one vectored write, and a
//! pending-frame counter provides backpressure toward the workers.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::protocol::{ResponseHeader, RESPONSE_HEADER_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 64;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 16;

/// Poll interval while waiting for backpressure to clear.
const BACKPRESSURE_CHECK_INTERVAL: Duration = Duration::from_micros(100);

/// A response frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded response header.
    pub header: [u8; RESPONSE_HEADER_SIZE],
    /// Result records (empty for failed calls).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &ResponseHeader, payload: Bytes) -> Self {
        debug_assert_eq!(header.payload_length as usize, payload.len());
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        RESPONSE_HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout in milliseconds when waiting for backpressure to clear.
    pub backpressure_timeout_ms: u64,
}

impl WriterConfig {
    /// Backpressure timeout as a `Duration`.
    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Handle for sending frames to a connection's writer task.
///
/// Cheap to clone; every request parsed from a connection carries one.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Send a frame to the writer task.
    ///
    /// Waits while backpressure is active, timing out after the configured
    /// duration. Fails with `ConnectionClosed` once the writer task is gone.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            RpcError::ConnectionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }
            if self.tx.is_closed() {
                return Err(RpcError::ConnectionClosed);
            }
            if start.elapsed() > self.timeout {
                return Err(RpcError::BackpressureTimeout);
            }

            tokio::time::sleep(BACKPRESSURE_CHECK_INTERVAL).await;
        }
    }

    /// Whether the writer task has stopped (socket broken or closed).
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends cleanly once every [`WriterHandle`] is dropped and the
/// remaining frames are flushed, and ends with an error on the first failed
/// write. Dropping the task's writer closes the write direction of the socket.
pub fn spawn_writer_task<W>(writer: W, config: &WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames.max(1),
        config.backpressure_timeout(),
    );
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let count = batch.len();
        let written = write_batch(&mut writer, &batch).await;
        batch.clear();
        pending.fetch_sub(count, Ordering::Release);

        if let Err(e) = written {
            // Closing the receiver makes every later send fail fast.
            rx.close();
            return Err(e);
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of frames with vectored I/O, retrying on partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for frame in batch {
        slices.push(IoSlice::new(&frame.header));
        if !frame.payload.is_empty() {
            slices.push(IoSlice::new(&frame.payload));
        }
    }

    let mut remaining: &mut [IoSlice<'_>] = &mut slices;
    while !remaining.is_empty() {
        let written = writer.write_vectored(remaining).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        IoSlice::advance_slices(&mut remaining, written);
    }

    writer.flush().await?;
    Ok(())
}
