//! Control plane - method discovery.
//!
//! Callers resolve method names to IDs by calling the reserved method 0,
//! which is answered from the server's method table. Everything else travels
//! as ordinary requests on the same connection.

mod listing;

pub use listing::{ListMethods, MethodListing, LISTING_BUFFER_ID};
