//! Built-in method listing.
//!
//! Method ID 0 is reserved. Called with no parameters it returns one result
//! buffer (ID 0) holding the method table as JSON, with the number of
//! registered methods as the return value:
//!
//! ```json
//! {"version":"2","methods":{"echo":1,"sum":2}}
//! ```
//!
//! # Example
//!
//! ```
//! use arenarpc::control::MethodListing;
//!
//! let mut listing = MethodListing::new();
//! listing.add_method("echo", 1);
//!
//! let json = listing.to_json().unwrap();
//! let parsed = MethodListing::from_json(&json).unwrap();
//! assert_eq!(parsed.get_method_id("echo"), Some(1));
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::handler::{Handler, MethodInterface};
use crate::protocol::PROTOCOL_VERSION;

/// Buffer ID of the single result record returned by the listing.
pub const LISTING_BUFFER_ID: u32 = 0;

/// Names and IDs of the methods a server exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodListing {
    /// Protocol version the server speaks.
    pub version: String,
    /// Method name to method ID.
    pub methods: BTreeMap<String, u16>,
}

impl MethodListing {
    /// Create an empty listing for the current protocol version.
    pub fn new() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            methods: BTreeMap::new(),
        }
    }

    pub fn add_method(&mut self, name: &str, id: u16) {
        self.methods.insert(name.to_string(), id);
    }

    pub fn get_method_id(&self, name: &str) -> Option<u16> {
        self.methods.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Serialize as the JSON carried in the listing's result buffer.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a listing result buffer.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl Default for MethodListing {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler answering method ID 0.
///
/// The JSON is rendered once when the worker pool starts; the method table
/// does not change while the server runs.
#[derive(Debug, Clone)]
pub struct ListMethods {
    json: Vec<u8>,
    count: i32,
}

impl ListMethods {
    pub fn new(listing: &MethodListing) -> Result<Self> {
        Ok(Self {
            json: listing.to_json()?,
            count: i32::try_from(listing.methods.len()).unwrap_or(i32::MAX),
        })
    }
}

impl Handler for ListMethods {
    fn call(&self, method: &mut MethodInterface<'_>) {
        if method.finish_input_parameters().is_err() {
            return;
        }
        match method.write_result_buffer(LISTING_BUFFER_ID, &self.json) {
            Ok(_) => {
                let _ = method.finish_good(self.count);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Method listing does not fit the work arena");
                let _ = method.finish_internal_error();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::WorkArena;
    use crate::protocol::{
        MethodState, Parameter, RequestHeader, LIST_METHODS_METHOD_ID, RESULT_BUFFER_HEADER_SIZE,
    };
    use crate::request::Request;

    fn listing() -> MethodListing {
        let mut listing = MethodListing::new();
        listing.add_method("echo", 1);
        listing.add_method("sum", 2);
        listing
    }

    #[test]
    fn test_json_format() {
        let json = listing().to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();

        assert_eq!(parsed["version"], "2");
        assert_eq!(parsed["methods"]["echo"], 1);
        assert_eq!(parsed["methods"]["sum"], 2);
    }

    #[test]
    fn test_empty_listing() {
        let listing = MethodListing::new();
        assert!(listing.is_empty());

        let parsed: serde_json::Value = serde_json::from_slice(&listing.to_json().unwrap()).unwrap();
        assert!(parsed["methods"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(MethodListing::from_json(b"not json").is_err());
    }

    #[test]
    fn test_list_methods_handler() {
        let handler = ListMethods::new(&listing()).unwrap();
        let req = Request::new(RequestHeader::new(1, LIST_METHODS_METHOD_ID, 0), vec![]);
        let mut arena = WorkArena::new(1024);
        let mut m = MethodInterface::new(&req, &mut arena);

        handler.call(&mut m);

        assert_eq!(m.state(), MethodState::Good);
        assert_eq!(m.return_value(), 2);
        let raw = m.output();
        assert_eq!(&raw[..4], &LISTING_BUFFER_ID.to_le_bytes());
        let parsed = MethodListing::from_json(&raw[RESULT_BUFFER_HEADER_SIZE..]).unwrap();
        assert_eq!(parsed, listing());
    }

    #[test]
    fn test_list_methods_with_parameters() {
        let handler = ListMethods::new(&listing()).unwrap();
        let req = Request::new(
            RequestHeader::new(1, LIST_METHODS_METHOD_ID, 1),
            vec![Parameter::S8(0)],
        );
        let mut arena = WorkArena::new(1024);
        let mut m = MethodInterface::new(&req, &mut arena);

        handler.call(&mut m);

        assert_eq!(m.state(), MethodState::ParameterCountMismatch);
    }

    #[test]
    fn test_list_methods_arena_too_small() {
        let handler = ListMethods::new(&listing()).unwrap();
        let req = Request::new(RequestHeader::new(1, LIST_METHODS_METHOD_ID, 0), vec![]);
        let mut arena = WorkArena::new(12);
        let mut m = MethodInterface::new(&req, &mut arena);

        handler.call(&mut m);

        assert_eq!(m.state(), MethodState::InternalError);
    }
}
