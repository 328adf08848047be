//! Method table for dispatching requests by method ID.
//!
//! The table maps method names to handlers and manages ID assignment.
//! IDs are assigned sequentially starting from 1 (0 is the built-in method
//! listing).
//!
//! # Example
//!
//! ```
//! use arenarpc::handler::{MethodInterface, MethodTable};
//!
//! let mut table = MethodTable::new();
//! let id = table
//!     .register("ping", |m: &mut MethodInterface<'_>| {
//!         if m.finish_input_parameters().is_ok() {
//!             let _ = m.finish_good(0);
//!         }
//!     })
//!     .unwrap();
//!
//! assert_eq!(id, 1);
//! assert_eq!(table.get_method_id("ping"), Some(1));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::MethodInterface;
use crate::control::MethodListing;
use crate::error::{Result, RpcError};
use crate::protocol::LIST_METHODS_METHOD_ID;

/// A request handler.
///
/// Handlers run synchronously on a worker. They read parameters and write
/// results through the [`MethodInterface`] and should leave it in a terminal
/// state; a handler that does not is finished as `InternalError`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, method: &mut MethodInterface<'_>);
}

impl<F> Handler for F
where
    F: Fn(&mut MethodInterface<'_>) + Send + Sync + 'static,
{
    fn call(&self, method: &mut MethodInterface<'_>) {
        self(method)
    }
}

/// Entry for a registered method.
struct MethodEntry {
    name: String,
    handler: Arc<dyn Handler>,
}

/// Table mapping method names and IDs to handlers.
///
/// Built once before the server starts and shared read-only by all workers.
#[derive(Default)]
pub struct MethodTable {
    /// Entries in registration order; entry `i` has ID `i + 1`.
    entries: Vec<MethodEntry>,
    ids: HashMap<String, u16>,
}

impl MethodTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler function under `name`, returning its assigned ID.
    ///
    /// Fails if `name` is already taken or the ID space is exhausted.
    pub fn register<F>(&mut self, name: &str, handler: F) -> Result<u16>
    where
        F: Fn(&mut MethodInterface<'_>) + Send + Sync + 'static,
    {
        self.register_arc(name, Arc::new(handler))
    }

    /// Register any [`Handler`] implementation under `name`.
    pub fn register_handler<H: Handler>(&mut self, name: &str, handler: H) -> Result<u16> {
        self.register_arc(name, Arc::new(handler))
    }

    pub(crate) fn register_arc(&mut self, name: &str, handler: Arc<dyn Handler>) -> Result<u16> {
        if self.ids.contains_key(name) {
            return Err(RpcError::Config(format!("method '{}' registered twice", name)));
        }
        let id = u16::try_from(self.entries.len() + 1)
            .map_err(|_| RpcError::Config("too many methods".to_string()))?;

        self.entries.push(MethodEntry {
            name: name.to_string(),
            handler,
        });
        self.ids.insert(name.to_string(), id);
        Ok(id)
    }

    /// Get a handler by method ID.
    pub fn get_handler_by_id(&self, id: u16) -> Option<&dyn Handler> {
        self.entry(id).map(|e| e.handler.as_ref())
    }

    /// Get method name by ID.
    pub fn get_method_name(&self, id: u16) -> Option<&str> {
        self.entry(id).map(|e| e.name.as_str())
    }

    /// Get method ID by name.
    pub fn get_method_id(&self, name: &str) -> Option<u16> {
        self.ids.get(name).copied()
    }

    /// Number of registered methods (the built-in listing not included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the listing served under method ID 0.
    pub fn build_listing(&self) -> MethodListing {
        let mut listing = MethodListing::new();
        for (name, &id) in &self.ids {
            listing.add_method(name, id);
        }
        listing
    }

    /// Run the handler registered under `method_id`.
    pub fn dispatch(&self, method_id: u16, method: &mut MethodInterface<'_>) -> Result<()> {
        let handler = self
            .get_handler_by_id(method_id)
            .ok_or(RpcError::HandlerNotFound(method_id))?;

        handler.call(method);
        Ok(())
    }

    fn entry(&self, id: u16) -> Option<&MethodEntry> {
        if id == LIST_METHODS_METHOD_ID {
            return None;
        }
        self.entries.get(usize::from(id) - 1)
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().enumerate().map(|(i, e)| (i + 1, &e.name)))
            .finish()
    }
}
