//! Extracted records and the messages delivered to record consumers.

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;

/// One extracted row keyed by column name.
///
/// Values are already normalized to the column's common type.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A record tagged with the stream it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    pub data: Record,
}

/// Checkpoint update for a stream.
///
/// Only valid once every record emitted before it has been delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMessage {
    pub stream: String,
    /// Cursor carrying the updated checkpoint.
    pub cursor: Cursor,
    /// Records emitted for the stream up to this checkpoint.
    pub records_emitted: u64,
}

/// Ordered output of a stream read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadMessage {
    Record(RecordMessage),
    Checkpoint(CheckpointMessage),
}

impl ReadMessage {
    /// The record payload, if this is a record message.
    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(m) => Some(&m.data),
            Self::Checkpoint(_) => None,
        }
    }

    /// The checkpoint payload, if this is a checkpoint message.
    #[must_use]
    pub fn as_checkpoint(&self) -> Option<&CheckpointMessage> {
        match self {
            Self::Checkpoint(m) => Some(m),
            Self::Record(_) => None,
        }
    }
}
