//! Error types for courier-relay.

use courier_types::{ErrorCode, ErrorReply};
use std::path::PathBuf;

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
///
/// The in-memory backend never fails; the SQLite backend surfaces database
/// errors as retryable failures rather than swallowing them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded.
    #[error("corrupt message record: {reason}")]
    CorruptRecord {
        /// Why the record could not be decoded.
        reason: String,
    },

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Protocol layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Invalid frame format.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Reason the frame is invalid.
        reason: String,
    },

    /// Session has not identified yet.
    #[error("session not identified: IDENTIFY required first")]
    NotIdentified,

    /// Identity rejected.
    #[error("invalid identity: {reason}")]
    InvalidIdentity {
        /// Why the identity was rejected.
        reason: String,
    },

    /// Unexpected frame type for the current session state.
    #[error("unexpected frame: expected {expected}, got {actual}")]
    UnexpectedFrame {
        /// Expected frame types.
        expected: String,
        /// Actual frame type received.
        actual: String,
    },

    /// Protocol version mismatch.
    #[error("protocol version mismatch: client={client}, server={server}")]
    VersionMismatch {
        /// Client protocol version.
        client: u32,
        /// Server protocol version.
        server: u32,
    },

    /// Payload exceeds the configured maximum.
    #[error("payload too large: {size} bytes (limit: {limit} bytes)")]
    PayloadTooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// Rate limit exceeded.
    #[error("rate limited: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Internal failure (storage backend down, etc.); retryable.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Whether this error should be reported to the client as an
    /// [`ErrorReply`] frame.
    ///
    /// Malformed frames and broken streams are not reportable: the former
    /// by policy (no parse internals leak to clients, surfaced via the
    /// error counter instead), the latter because there is nowhere to
    /// write the reply.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::InvalidFrame { .. } | Self::Stream(_))
    }

    /// Map to the wire-level rejection frame.
    pub fn to_reply(&self) -> ErrorReply {
        let code = match self {
            Self::NotIdentified => ErrorCode::NotIdentified,
            Self::InvalidIdentity { .. } => ErrorCode::InvalidIdentity,
            Self::UnexpectedFrame { .. } => ErrorCode::Unexpected,
            Self::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            _ => ErrorCode::Internal,
        };
        let detail = match code {
            // Internal details stay in the logs.
            ErrorCode::Internal => "internal error, retry later".to_string(),
            _ => self.to_string(),
        };
        ErrorReply { code, detail }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_identified_maps_to_reply() {
        let err = ProtocolError::NotIdentified;
        assert!(err.is_reportable());
        assert_eq!(err.to_reply().code, ErrorCode::NotIdentified);
    }

    #[test]
    fn malformed_frames_are_not_reportable() {
        let err = ProtocolError::InvalidFrame {
            reason: "truncated".to_string(),
        };
        assert!(!err.is_reportable());
    }

    #[test]
    fn internal_reply_hides_detail() {
        let err = ProtocolError::Internal("sqlite pool exhausted".to_string());
        let reply = err.to_reply();
        assert_eq!(reply.code, ErrorCode::Internal);
        assert!(!reply.detail.contains("sqlite"));
    }

    #[test]
    fn payload_too_large_display() {
        let err = ProtocolError::PayloadTooLarge {
            size: 2048,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "payload too large: 2048 bytes (limit: 1024 bytes)"
        );
    }
}
