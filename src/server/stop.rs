//! Cooperative stop signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct StopState {
    stopped: AtomicBool,
    notify: Notify,
}

/// Handle for stopping a running server.
///
/// Cloneable and usable from any task. Stopping is one-way: once
/// `query_stop` is called the flag stays set.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    state: Arc<StopState>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the server to stop.
    ///
    /// Wakes the accept loop and every connection reader. The server then
    /// closes the request queue, which releases the workers.
    pub fn query_stop(&self) {
        if !self.state.stopped.swap(true, Ordering::AcqRel) {
            tracing::info!("Stop requested");
        }
        self.state.notify.notify_waiters();
    }

    /// Whether a stop was requested.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }

    /// Resolve once a stop is requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}
