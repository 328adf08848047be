//! Server builder and runtime loop.
//!
//! The [`ServerBuilder`] provides a fluent API for configuring the server
//! and registering handlers. The [`Server`] manages the lifecycle:
//! 1. Bind the listener
//! 2. Spawn the worker pool
//! 3. Accept connections, each with its own reader and writer task
//! 4. On stop: close the queue, join the workers, run destruct hooks, drain
//!    the connections
//!
//! # Example
//!
//! ```no_run
//! use arenarpc::{MethodInterface, Server};
//!
//! #[tokio::main]
//! async fn main() -> arenarpc::Result<()> {
//!     let server = Server::builder()
//!         .bind_addr("127.0.0.1:5543")
//!         .method("answer", |m: &mut MethodInterface<'_>| {
//!             if m.finish_input_parameters().is_ok() {
//!                 let _ = m.finish_good(42);
//!             }
//!         })
//!         .bind()
//!         .await?;
//!
//!     let stop = server.stop_handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         stop.query_stop();
//!     });
//!
//!     server.serve().await
//! }
//! ```

mod connection;
mod lifecycle;
mod stop;

pub use lifecycle::LifecycleHook;
pub use stop::StopHandle;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::handler::{Handler, MethodInterface, MethodTable};
use crate::queue::RequestQueue;
use crate::worker::{Dispatcher, WorkerPool};
use lifecycle::LifecycleHooks;

/// First delay after a failed accept; doubles per consecutive failure.
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Longest delay between accept attempts.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Builder for configuring and creating a server.
pub struct ServerBuilder {
    config: ServerConfig,
    methods: Vec<(String, Arc<dyn Handler>)>,
    hooks: LifecycleHooks,
}

impl ServerBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::from_config(ServerConfig::default())
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            methods: Vec::new(),
            hooks: LifecycleHooks::default(),
        }
    }

    /// Register a handler function. IDs are assigned in registration order,
    /// starting at 1.
    pub fn method<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&mut MethodInterface<'_>) + Send + Sync + 'static,
    {
        self.methods.push((name.to_string(), Arc::new(handler)));
        self
    }

    /// Register any [`Handler`] implementation.
    pub fn handler<H: Handler>(mut self, name: &str, handler: H) -> Self {
        self.methods.push((name.to_string(), Arc::new(handler)));
        self
    }

    /// Add a hook run by [`bind`](Self::bind) before the listener opens.
    ///
    /// Hooks run in registration order. One returning `false` fails the bind
    /// with a configuration error.
    pub fn on_setup<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.hooks.add_setup(Arc::new(hook));
        self
    }

    /// Add a hook run by [`Server::serve`] after every worker has stopped.
    ///
    /// A hook returning `false` is logged; the remaining hooks still run.
    pub fn on_destruct<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.hooks.add_destruct(Arc::new(hook));
        self
    }

    /// Set the listen address.
    ///
    /// Default: `0.0.0.0:5543`
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// Set the number of workers.
    ///
    /// Default: 4
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Set each worker's arena capacity in bytes.
    ///
    /// Default: 4.5 MiB
    pub fn work_buffer_size(mut self, size: usize) -> Self {
        self.config.work_buffer_size = size;
        self
    }

    /// Set the largest accepted buffer parameter.
    pub fn max_buffer_parameter_size(mut self, size: u32) -> Self {
        self.config.max_buffer_parameter_size = size;
        self
    }

    /// Set the largest whole request accepted, header included.
    ///
    /// Default: 8 MiB
    pub fn max_request_size(mut self, size: u32) -> Self {
        self.config.max_request_size = size;
        self
    }

    /// Set how many parsed requests may wait for a worker.
    ///
    /// Default: 64
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the per-connection pending frame limit for backpressure.
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Set the per-connection writer channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Set how long a worker waits for a congested connection.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Validate the configuration, build the method table, run the setup
    /// hooks and bind.
    pub async fn bind(self) -> Result<Server> {
        self.config.validate()?;

        let mut table = MethodTable::new();
        for (name, handler) in self.methods {
            let id = table.register_arc(&name, handler)?;
            debug!(method = %name, id, "Registered method");
        }

        self.hooks.run_setup()?;

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            workers = self.config.worker_count,
            methods = table.len(),
            "Server listening"
        );

        Ok(Server {
            listener,
            config: Arc::new(self.config),
            table: Arc::new(table),
            hooks: self.hooks,
            stop: StopHandle::new(),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound server, ready to serve.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    table: Arc<MethodTable>,
    hooks: LifecycleHooks,
    stop: StopHandle,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for stopping the server from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn method_table(&self) -> &MethodTable {
        &self.table
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept and serve connections until [`StopHandle::query_stop`].
    ///
    /// Requests still queued when the stop arrives are dropped; requests a
    /// worker already started are finished and their responses flushed
    /// before this returns.
    pub async fn serve(self) -> Result<()> {
        let dispatcher = Arc::new(Dispatcher::new(self.table.clone())?);
        let queue = Arc::new(RequestQueue::new(self.config.queue_capacity));
        let pool = WorkerPool::spawn(
            self.config.worker_count,
            self.config.work_buffer_size,
            queue.clone(),
            dispatcher,
        );

        info!(
            workers = pool.len(),
            queue_capacity = queue.capacity(),
            "Workers started"
        );

        let mut connections = JoinSet::new();
        let mut next_id: u64 = 0;
        let mut accept_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = self.stop.stopped() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        accept_failures = 0;
                        next_id += 1;
                        connections.spawn(connection::serve_connection(
                            stream,
                            peer,
                            next_id,
                            queue.clone(),
                            self.stop.clone(),
                            self.config.clone(),
                        ));
                    }
                    Err(e) => {
                        accept_failures = accept_failures.saturating_add(1);
                        let delay = accept_backoff(accept_failures);
                        warn!(error = %e, failures = accept_failures, retry_in = ?delay, "Accept failed");
                        tokio::select! {
                            _ = self.stop.stopped() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                },
            }

            while let Some(finished) = connections.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "Connection task failed");
                }
            }
        }

        drop(self.listener);
        let dropped = queue.close();
        info!(dropped, "Request queue closed");

        pool.join().await;
        let failed = self.hooks.run_destruct();
        if failed > 0 {
            warn!(failed, "Destruct hooks failed");
        }

        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "Connection task failed");
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Delay before the next accept after `failures` consecutive errors.
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1u32 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("methods", &self.table)
            .field("hooks", &self.hooks)
            .field("stopped", &self.stop.is_stopped())
            .finish()
    }
}
