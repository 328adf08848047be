//! Bounded FIFO handing parsed requests from connection readers to workers.
//!
//! A `std::sync::Mutex<VecDeque>` guarded by two wake events: `available`
//! wakes workers when a request is pushed, `space` wakes readers when a
//! worker takes one. The lock is never held across an await.
//!
//! ```text
//! reader ─push─┐                     ┌─pop─ worker 1
//! reader ─push─┼─► [ r5 r4 r3 r2 ] ──┼─pop─ worker 2
//! reader ─push─┘                     └─pop─ worker N
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::{Result, RpcError};
use crate::request::Request;

#[derive(Debug)]
struct Inner {
    pending: VecDeque<Request>,
    closed: bool,
}

/// Shared request queue.
#[derive(Debug)]
pub struct RequestQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    available: Notify,
    space: Notify,
}

impl RequestQueue {
    /// Create a queue holding at most `capacity` pending requests.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                pending: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            available: Notify::new(),
            space: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a request, waiting while the queue is full.
    ///
    /// Fails with `QueueClosed` once [`close`](Self::close) was called; the
    /// request is dropped in that case.
    pub async fn push(&self, request: Request) -> Result<()> {
        let mut request = Some(request);
        loop {
            // Register interest before checking, so a pop between the check
            // and the await is not missed.
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(RpcError::QueueClosed);
                }
                if inner.pending.len() < self.capacity {
                    if let Some(request) = request.take() {
                        inner.pending.push_back(request);
                    }
                    drop(inner);
                    self.available.notify_one();
                    return Ok(());
                }
            }

            space.await;
        }
    }

    /// Take the oldest request, waiting until one arrives.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Request> {
        loop {
            let available = self.available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(request) = inner.pending.pop_front() {
                    let more = !inner.pending.is_empty();
                    drop(inner);
                    self.space.notify_one();
                    if more {
                        // Pass the wake-up on so a burst is not left to one worker.
                        self.available.notify_one();
                    }
                    return Some(request);
                }
            }

            available.await;
        }
    }

    /// Close the queue and drop every pending request.
    ///
    /// Wakes every waiting reader and worker. Returns how many requests were
    /// dropped.
    pub fn close(&self) -> usize {
        let dropped: Vec<Request> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.pending.drain(..).collect()
        };
        self.available.notify_waiters();
        self.space.notify_waiters();
        dropped.len()
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
