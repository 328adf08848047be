//! Worker pool.
//!
//! A fixed set of long-lived workers, each owning one [`WorkArena`] for its
//! whole life. Every worker runs the same loop:
//!
//! 1. pop a request from the shared queue (waits while it is empty)
//! 2. resolve the method: ID 0 is the built-in listing, anything else goes
//!    through the method table
//! 3. run the handler over a [`MethodInterface`] bound to the worker's arena
//! 4. build the response from the final state, return value and arena bytes
//! 5. hand it to the connection's writer and clear the arena
//!
//! Handlers are synchronous. On a multi-threaded runtime they run inside
//! `block_in_place`, so a slow handler does not starve other tasks on the
//! same thread. A handler panic only fails its own request.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::arena::WorkArena;
use crate::control::ListMethods;
use crate::error::{Result, RpcError};
use crate::handler::{Handler, MethodInterface, MethodTable};
use crate::protocol::{ResponseHeader, LIST_METHODS_METHOD_ID};
use crate::queue::RequestQueue;
use crate::request::Request;
use crate::writer::OutboundFrame;

/// Everything a worker needs to resolve and run a method.
#[derive(Debug)]
pub struct Dispatcher {
    table: Arc<MethodTable>,
    listing: ListMethods,
}

impl Dispatcher {
    pub fn new(table: Arc<MethodTable>) -> Result<Self> {
        let listing = ListMethods::new(&table.build_listing())?;
        Ok(Self { table, listing })
    }

    fn call(&self, method_id: u16, method: &mut MethodInterface<'_>) -> Result<()> {
        if method_id == LIST_METHODS_METHOD_ID {
            self.listing.call(method);
            return Ok(());
        }
        self.table.dispatch(method_id, method)
    }
}

/// A finished call, ready to be written.
#[derive(Debug, Clone)]
pub struct Completion {
    pub header: ResponseHeader,
    pub payload: Bytes,
}

/// One worker and its private arena.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    arena: WorkArena,
    processed: u64,
}

impl Worker {
    pub fn new(id: usize, work_buffer_size: usize) -> Self {
        Self {
            id,
            arena: WorkArena::new(work_buffer_size),
            processed: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run one request to completion and build its response.
    ///
    /// Always produces a terminal state: an unknown method, a panic, or a
    /// handler that returns early all end as `InternalError`. The arena is
    /// empty again when this returns.
    pub fn execute(&mut self, request: &Request, dispatcher: &Dispatcher) -> Completion {
        let worker = self.id;
        let request_id = request.request_id();
        let method_id = request.method_id();

        let mut method = MethodInterface::new(request, &mut self.arena);
        let outcome = catch_unwind(AssertUnwindSafe(|| dispatcher.call(method_id, &mut method)));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(RpcError::HandlerNotFound(id))) => {
                warn!(worker, request_id, method_id = id, "Unknown method");
                let _ = method.finish_internal_error();
            }
            Ok(Err(e)) => {
                warn!(worker, request_id, method_id, error = %e, "Dispatch failed");
                let _ = method.finish_internal_error();
            }
            Err(panic) => {
                error!(
                    worker,
                    request_id,
                    method_id,
                    panic = panic_message(panic.as_ref()),
                    "Handler panicked"
                );
                let _ = method.finish_internal_error();
            }
        }

        if !method.state().is_terminal() {
            warn!(
                worker,
                request_id,
                method_id,
                state = ?method.state(),
                "Handler returned without finishing"
            );
            let _ = method.finish_internal_error();
        }

        let payload = Bytes::copy_from_slice(method.output());
        let header = ResponseHeader::new(
            request_id,
            method.state(),
            method.return_value(),
            payload.len() as u32,
        );
        debug!(
            worker,
            request_id,
            method_id,
            state = ?header.state,
            return_value = header.return_value,
            payload_len = header.payload_length,
            "Request finished"
        );

        self.arena.clear();
        self.processed += 1;
        Completion { header, payload }
    }

    /// Serve requests until the queue is closed.
    pub async fn run(mut self, queue: Arc<RequestQueue>, dispatcher: Arc<Dispatcher>) {
        debug!(worker = self.id, "Worker started");

        while let Some(request) = queue.pop().await {
            let completion = run_handler(|| self.execute(&request, &dispatcher));

            let Some(connection) = &request.connection else {
                continue;
            };
            if connection.writer.is_closed() {
                debug!(
                    worker = self.id,
                    connection = connection.id,
                    request_id = request.request_id(),
                    "Connection gone, dropping response"
                );
                continue;
            }
            debug!(
                worker = self.id,
                connection = connection.id,
                pending = connection.writer.pending_count(),
                "Handing off response"
            );
            let frame = OutboundFrame::new(&completion.header, completion.payload);
            if let Err(e) = connection.writer.send(frame).await {
                warn!(
                    worker = self.id,
                    connection = connection.id,
                    peer = %connection.peer,
                    request_id = request.request_id(),
                    error = %e,
                    "Failed to hand off response"
                );
            }
        }

        debug!(worker = self.id, processed = self.processed, "Worker stopped");
    }
}

/// Run a synchronous handler without stalling the runtime's other tasks.
fn run_handler<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// The running workers.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers on the current runtime.
    pub fn spawn(
        count: usize,
        work_buffer_size: usize,
        queue: Arc<RequestQueue>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let handles = (0..count)
            .map(|id| {
                let worker = Worker::new(id, work_buffer_size);
                tokio::spawn(worker.run(queue.clone(), dispatcher.clone()))
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit. Workers exit once the queue is closed
    /// and their current request is done.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
    }
}
