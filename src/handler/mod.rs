//! Handler module - request handling and dispatch.
//!
//! Provides:
//! - [`MethodTable`] - maps method names and IDs to handlers
//! - [`MethodInterface`] - the handler's view of one request and its output
//!
//! # Example
//!
//! ```
//! use arenarpc::handler::{MethodInterface, MethodTable};
//!
//! let mut table = MethodTable::new();
//!
//! // Echo every buffer parameter back as a result buffer.
//! table
//!     .register("echo", |m: &mut MethodInterface<'_>| {
//!         let Ok(data) = m.get_parameter_buffer() else {
//!             let _ = m.finish_internal_error();
//!             return;
//!         };
//!         if m.finish_input_parameters().is_err() {
//!             return;
//!         }
//!         match m.write_result_buffer(0, data) {
//!             Ok(_) => {
//!                 let _ = m.finish_good(data.len() as i32);
//!             }
//!             Err(_) => {
//!                 let _ = m.finish_internal_error();
//!             }
//!         }
//!     })
//!     .unwrap();
//! ```

mod context;
mod registry;

pub use context::{MethodError, MethodInterface};
pub use registry::{Handler, MethodTable};
