//! # arenarpc
//!
//! Binary RPC server with a fixed worker pool and per-worker result arenas.
//!
//! Callers send small binary requests (method ID plus up to ten typed
//! parameters) over TCP. Each request is parsed on its connection's reader
//! task, queued, and executed by one of a fixed set of workers. Handlers
//! write their results into the worker's pre-allocated work arena, and the
//! arena contents go back to the caller as the response payload.
//!
//! ## Architecture
//!
//! - **Control plane** (connection reader → queue): request parsing and
//!   dispatch; method discovery through the reserved method 0
//! - **Data plane** (worker → connection writer task): response transfer,
//!   batched and subject to backpressure, never blocking request parsing
//!
//! ## Example
//!
//! ```no_run
//! use arenarpc::{MethodInterface, Server};
//!
//! fn sum(m: &mut MethodInterface<'_>) {
//!     let (Ok(a), Ok(b)) = (m.get_parameter_s32(), m.get_parameter_s32()) else {
//!         let _ = m.finish_internal_error();
//!         return;
//!     };
//!     if m.finish_input_parameters().is_ok() {
//!         let _ = m.finish_good(a.wrapping_add(b));
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> arenarpc::Result<()> {
//!     let server = Server::builder().method("sum", sum).bind().await?;
//!     server.serve().await
//! }
//! ```

pub mod arena;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod queue;
pub mod request;
pub mod server;
pub mod transport;
pub mod worker;
pub mod writer;

pub use arena::{ResizeOutcome, ResultBuffer, WorkArena};
pub use client::{Client, Response};
pub use config::ServerConfig;
pub use error::{Result, RpcError};
pub use handler::{Handler, MethodError, MethodInterface, MethodTable};
pub use protocol::{MethodState, Parameter};
pub use server::{LifecycleHook, Server, ServerBuilder, StopHandle};
