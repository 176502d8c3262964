//! Error types for forkpool.

use thiserror::Error;

/// Main error type for forkpool.
///
/// Only caller faults and unrecoverable process-control failures surface
/// here. Dead workers and partial reads are handled inside the pool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool size must be at least 1, got {0}")]
    InvalidPoolSize(usize),

    #[error("Failed to spawn worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {0} stdio was not captured")]
    StdioNotCaptured(&'static str),

    #[error("Frame payload of {0} bytes exceeds the 8-digit length header")]
    FrameTooLarge(usize),

    #[error("Process control error: {0}")]
    Process(#[from] nix::errno::Errno),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Worker(String),
}

/// Result type alias for forkpool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_invalid_pool_size_message() {
        let msg = PoolError::InvalidPoolSize(0).to_string();
        assert!(msg.contains("at least 1"));
        assert!(msg.contains('0'));
    }

    #[test]
    fn test_spawn_error_names_program() {
        let err = PoolError::Spawn {
            program: "/no/such/binary".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/no/such/binary"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn test_frame_too_large_message() {
        let msg = PoolError::FrameTooLarge(100_000_000).to_string();
        assert!(msg.contains("100000000"));
        assert!(msg.contains("8-digit"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: PoolError = io_err.into();
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_errno_conversion() {
        let err: PoolError = nix::errno::Errno::ECHILD.into();
        assert!(err.to_string().starts_with("Process control error"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err: PoolError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }

    #[test]
    fn test_worker_message_passthrough() {
        let err = PoolError::Worker("slot 3 unavailable".to_string());
        assert_eq!(err.to_string(), "slot 3 unavailable");
    }
}
