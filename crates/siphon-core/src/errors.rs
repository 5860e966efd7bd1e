//! Error taxonomy for probing, discovery, and stream reads.
//!
//! Each public operation returns its own error type. None of them are
//! retried internally; [`ReadError::is_retryable`] is always `false` and
//! exists so callers can make that decision uniformly.

use siphon_state::StateError;
use siphon_types::common::CommonType;
use siphon_types::cursor::CursorValue;
use siphon_types::error::AdapterError;

use crate::engine::ReadState;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Coarse classification shared by every error type in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connectivity,
    Discovery,
    Configuration,
    Stream,
    State,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connectivity => "connectivity",
            Self::Discovery => "discovery",
            Self::Configuration => "configuration",
            Self::Stream => "stream",
            Self::State => "state",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Operation errors
// ---------------------------------------------------------------------------

/// Failure of the connection probe.
#[derive(Debug, thiserror::Error)]
pub enum ConnectivityError {
    /// The backend could not be reached or rejected the credentials.
    #[error("backend unreachable: {0}")]
    Unreachable(#[source] AdapterError),
    /// Connected, but the account may not read the configured scope.
    #[error("insufficient privilege: {0}")]
    InsufficientPrivilege(#[source] AdapterError),
}

impl ConnectivityError {
    /// Underlying adapter error.
    #[must_use]
    pub fn adapter_error(&self) -> &AdapterError {
        match self {
            Self::Unreachable(e) | Self::InsufficientPrivilege(e) => e,
        }
    }
}

/// Failure while enumerating the backend catalog.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to enumerate {target}: {source}")]
    Enumeration {
        target: String,
        #[source]
        source: AdapterError,
    },
    #[error("field '{field}' of table '{table}' has unmapped native type '{native_type}'")]
    UnmappedType {
        table: String,
        field: String,
        native_type: String,
    },
}

/// A stream read spec that cannot be executed.
///
/// Always raised before any query reaches the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("stream '{stream}' projects no columns")]
    EmptyProjection { stream: String },
    #[error("stream '{stream}' projects column '{column}' more than once")]
    DuplicateColumn { stream: String, column: String },
    #[error("stream '{stream}' projects unknown column '{column}'")]
    UnknownColumn { stream: String, column: String },
    #[error("stream '{stream}' is incremental but has no cursor")]
    MissingCursor { stream: String },
    #[error("cursor field '{field}' not found in stream '{stream}'")]
    CursorFieldNotFound { stream: String, field: String },
    #[error("cursor field '{field}' of stream '{stream}' has type {field_type}, which is not orderable")]
    CursorNotOrderable {
        stream: String,
        field: String,
        field_type: CommonType,
    },
    #[error("cursor field '{field}' of stream '{stream}' is declared {declared} but discovered as {discovered}")]
    CursorTypeMismatch {
        stream: String,
        field: String,
        declared: CommonType,
        discovered: CommonType,
    },
    #[error("cursor field '{field}' must be part of the projection of stream '{stream}'")]
    CursorNotProjected { stream: String, field: String },
    #[error("invalid checkpoint for stream '{stream}': {reason}")]
    InvalidCheckpoint { stream: String, reason: String },
    #[error("stream '{stream}' not found in the discovered catalog")]
    UnknownStream { stream: String },
}

/// Failure delivering a message to a record consumer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumerError {
    /// The receiving side hung up.
    #[error("record consumer closed")]
    Closed,
    #[error("record consumer rejected message: {0}")]
    Rejected(String),
}

/// Failure while pulling rows from an open stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("backend error: {0}")]
    Backend(#[source] AdapterError),
    #[error("cursor field '{field}' is null or missing after {records} records")]
    NullCursor { field: String, records: u64 },
    #[error("cursor field '{field}' holds a value that cannot be ordered: {reason}")]
    UnorderableCursor { field: String, reason: String },
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}

// ---------------------------------------------------------------------------
// ReadError
// ---------------------------------------------------------------------------

/// Failure of a complete stream read.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The stream failed after it was opened. Checkpoints emitted before the
    /// failure remain valid resume points.
    #[error("stream '{stream}' failed after {records_emitted} records: {source}")]
    Stream {
        stream: String,
        records_emitted: u64,
        last_checkpoint: Option<CursorValue>,
        state: ReadState,
        #[source]
        source: StreamError,
    },
    #[error("state store failed for stream '{stream}': {source}")]
    State {
        stream: String,
        #[source]
        source: StateError,
    },
}

impl ReadError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Stream { .. } => ErrorKind::Stream,
            Self::State { .. } => ErrorKind::State,
        }
    }

    /// Reads are never retried by the core.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Last checkpoint emitted before a stream failure, if any.
    #[must_use]
    pub fn last_checkpoint(&self) -> Option<&CursorValue> {
        match self {
            Self::Stream {
                last_checkpoint, ..
            } => last_checkpoint.as_ref(),
            Self::Configuration(_) | Self::State { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_exposes_adapter_error() {
        let err = ConnectivityError::InsufficientPrivilege(AdapterError::permission(
            "DENIED",
            "no usage on schema",
        ));
        assert_eq!(err.adapter_error().code, "DENIED");
        assert!(err.to_string().starts_with("insufficient privilege"));
    }

    #[test]
    fn configuration_messages_name_the_stream() {
        let err = ConfigurationError::CursorNotOrderable {
            stream: "public.users".into(),
            field: "active".into(),
            field_type: CommonType::Boolean,
        };
        let msg = err.to_string();
        assert!(msg.contains("public.users"));
        assert!(msg.contains("boolean"));
    }

    #[test]
    fn read_error_kinds_and_retry() {
        let config: ReadError = ConfigurationError::EmptyProjection {
            stream: "t".into(),
        }
        .into();
        assert_eq!(config.kind(), ErrorKind::Configuration);
        assert!(!config.is_retryable());
        assert!(config.last_checkpoint().is_none());

        let stream = ReadError::Stream {
            stream: "t".into(),
            records_emitted: 2,
            last_checkpoint: Some(CursorValue::Int64 { value: 2 }),
            state: ReadState::Failed,
            source: StreamError::NullCursor {
                field: "id".into(),
                records: 2,
            },
        };
        assert_eq!(stream.kind(), ErrorKind::Stream);
        assert_eq!(stream.kind().to_string(), "stream");
        assert!(!stream.is_retryable());
        assert_eq!(
            stream.last_checkpoint(),
            Some(&CursorValue::Int64 { value: 2 })
        );
    }

    #[test]
    fn consumer_error_converts_into_stream_error() {
        let err: StreamError = ConsumerError::Closed.into();
        assert!(matches!(err, StreamError::Consumer(ConsumerError::Closed)));
    }
}
