//! State backend model types.
//!
//! Pure data types used by `StateBackend`
//! implementations. Kept in the types crate so both the core and the state
//! crate can share them without circular dependencies.

use serde::{Deserialize, Serialize};

use crate::common::CommonType;
use crate::cursor::{Cursor, CursorType, CursorValue, CursorValueError};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque identifier of the connection/pipeline owning a set of streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(String);

impl PipelineId {
    /// Create a new pipeline identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for PipelineId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Opaque stream key (e.g. `"public.users"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    /// Create a new stream name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for StreamName {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Terminal status of a stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate statistics for a finished stream read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub records_read: u64,
    pub checkpoints_emitted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Cursor state
// ---------------------------------------------------------------------------

/// Snapshot of a persisted checkpoint for a (pipeline, stream) pair.
///
/// `updated_at` is an ISO-8601 UTC string (e.g. `"2026-01-15T10:00:00Z"`).
/// Backends handle timestamp formatting internally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    /// Column used for incremental sync (e.g. `"updated_at"`).
    pub cursor_field: String,
    /// Common type of the cursor column, needed to decode `cursor_value`.
    pub field_type: CommonType,
    /// Last checkpointed value, in [`CursorValue::to_checkpoint_string`] form.
    pub cursor_value: String,
    /// ISO-8601 UTC timestamp of when this checkpoint was last written.
    pub updated_at: String,
}

impl CursorState {
    /// Snapshot a cursor for persistence. Returns `None` without a checkpoint.
    #[must_use]
    pub fn from_cursor(cursor: &Cursor, updated_at: impl Into<String>) -> Option<Self> {
        cursor.checkpoint.as_ref().map(|value| Self {
            cursor_field: cursor.field_name.clone(),
            field_type: cursor.field_type,
            cursor_value: value.to_checkpoint_string(),
            updated_at: updated_at.into(),
        })
    }

    /// Decode the persisted checkpoint back into a typed cursor.
    ///
    /// # Errors
    ///
    /// Returns [`CursorValueError`] when the field type is not orderable or
    /// the stored value does not parse in its domain.
    pub fn to_cursor(&self) -> Result<Cursor, CursorValueError> {
        let cursor_type =
            CursorType::for_common(self.field_type).ok_or_else(|| CursorValueError::Incompatible {
                expected: CursorType::Utf8,
                found: format!("{} field '{}'", self.field_type, self.cursor_field),
            })?;
        let value = CursorValue::parse(cursor_type, &self.cursor_value)?;
        Ok(Cursor::new(self.cursor_field.clone(), self.field_type).with_checkpoint(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_id_display_and_as_str() {
        let pid = PipelineId::new("my-pipeline");
        assert_eq!(pid.as_str(), "my-pipeline");
        assert_eq!(pid.to_string(), "my-pipeline");
    }

    #[test]
    fn stream_name_from_and_display() {
        let sn = StreamName::from("public.users");
        assert_eq!(sn.as_str(), "public.users");
        assert_eq!(sn.to_string(), "public.users");
    }

    #[test]
    fn run_status_serde_roundtrip() {
        let json = serde_json::to_string(&RunStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        let back: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunStatus::Completed);
    }

    #[test]
    fn run_stats_default_is_zeroed() {
        let stats = RunStats::default();
        assert_eq!(stats.records_read, 0);
        assert_eq!(stats.checkpoints_emitted, 0);
        assert!(stats.error_message.is_none());
    }

    #[test]
    fn cursor_state_requires_checkpoint() {
        let cursor = Cursor::new("id", CommonType::Number);
        assert!(CursorState::from_cursor(&cursor, "2026-01-15T10:00:00Z").is_none());
    }

    #[test]
    fn cursor_state_decodes_typed_value() {
        let cursor = Cursor::new("born", CommonType::Temporal).with_checkpoint(
            CursorValue::parse(CursorType::Timestamp, "2124-03-04T01:01:01Z").unwrap(),
        );
        let state = CursorState::from_cursor(&cursor, "2026-01-15T10:00:00Z").unwrap();
        assert_eq!(state.cursor_value, "2124-03-04T01:01:01.000000Z");
        assert_eq!(state.to_cursor().unwrap(), cursor);
    }

    #[test]
    fn cursor_state_rejects_unorderable_field() {
        let state = CursorState {
            cursor_field: "flag".into(),
            field_type: CommonType::Boolean,
            cursor_value: "true".into(),
            updated_at: "2026-01-15T10:00:00Z".into(),
        };
        assert!(state.to_cursor().is_err());
    }

    #[test]
    fn pipeline_id_serde_transparent() {
        let pid = PipelineId::new("test");
        let json = serde_json::to_string(&pid).unwrap();
        assert_eq!(json, "\"test\"");
    }
}
