//! Transport module - TCP connection and size-exact I/O helpers.

mod tcp;

pub use tcp::{connect, map_io_error, read_exact, read_frame_start, write_all};
