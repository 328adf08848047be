//! Server configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes:
//!
//! ```
//! use arenarpc::ServerConfig;
//!
//! let config = ServerConfig::from_json(r#"{"worker_count": 8}"#).unwrap();
//! assert_eq!(config.worker_count, 8);
//! assert_eq!(config.queue_capacity, 64);
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, RpcError};
use crate::protocol::{
    DEFAULT_MAX_BUFFER_PARAMETER_SIZE, DEFAULT_WORK_BUFFER_SIZE, REQUEST_HEADER_SIZE,
    RESULT_BUFFER_HEADER_SIZE,
};
use crate::writer::WriterConfig;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5543";

/// Default number of workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default number of parsed requests waiting for a worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default limit on one request's wire size, header and parameters included.
pub const DEFAULT_MAX_REQUEST_SIZE: u32 = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: String,
    /// Number of workers, each owning one work arena.
    pub worker_count: usize,
    /// Capacity of each worker's arena in bytes.
    pub work_buffer_size: usize,
    /// Largest buffer parameter accepted from a caller.
    pub max_buffer_parameter_size: u32,
    /// Largest whole request accepted, header and every parameter counted.
    /// Bounds the memory one queued request can hold.
    pub max_request_size: u32,
    /// Parsed requests that may wait for a worker before readers block.
    pub queue_capacity: usize,
    /// Per-connection writer settings.
    pub writer: WriterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            worker_count: DEFAULT_WORKER_COUNT,
            work_buffer_size: DEFAULT_WORK_BUFFER_SIZE,
            max_buffer_parameter_size: DEFAULT_MAX_BUFFER_PARAMETER_SIZE,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            writer: WriterConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a JSON document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(RpcError::Config("worker_count must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(RpcError::Config("queue_capacity must be at least 1".into()));
        }
        if (self.max_request_size as usize) < REQUEST_HEADER_SIZE {
            return Err(RpcError::Config(format!(
                "max_request_size {} cannot hold a request header",
                self.max_request_size
            )));
        }
        if self.work_buffer_size < RESULT_BUFFER_HEADER_SIZE {
            return Err(RpcError::Config(format!(
                "work_buffer_size {} cannot hold a single result record",
                self.work_buffer_size
            )));
        }
        if self.work_buffer_size > u32::MAX as usize {
            return Err(RpcError::Config(format!(
                "work_buffer_size {} exceeds the u32 payload length",
                self.work_buffer_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:5543");
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.work_buffer_size, 4 * 1024 * 1024 + 512 * 1024);
        assert_eq!(config.max_request_size, DEFAULT_MAX_REQUEST_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = ServerConfig::from_json(
            r#"{"bind_addr": "127.0.0.1:0", "writer": {"max_pending_frames": 8}}"#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:0");
        assert_eq!(config.writer.max_pending_frames, 8);
        assert_eq!(config.writer.channel_capacity, WriterConfig::default().channel_capacity);
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = ServerConfig::from_json(r#"{"worker_count": 0}"#).unwrap_err();
        assert!(matches!(err, RpcError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_tiny_arena() {
        let config = ServerConfig {
            work_buffer_size: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_request_size_below_header() {
        let err = ServerConfig::from_json(r#"{"max_request_size": 11}"#).unwrap_err();
        assert!(matches!(err, RpcError::Config(_)));

        let config = ServerConfig::from_json(r#"{"max_request_size": 12}"#).unwrap();
        assert_eq!(config.max_request_size, 12);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            ServerConfig::from_json("{"),
            Err(RpcError::Json(_))
        ));
    }
}
