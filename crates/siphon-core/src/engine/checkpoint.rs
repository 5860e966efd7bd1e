//! Cursor tracking and checkpoint persistence for incremental reads.

use std::cmp::Ordering;

use siphon_state::{StateBackend, StateError};
use siphon_types::common::CommonType;
use siphon_types::cursor::{Cursor, CursorType, CursorValue, CursorValueError};
use siphon_types::record::Record;
use siphon_types::state::{CursorState, PipelineId, StreamName};

use crate::errors::StreamError;

/// Running cursor maximum and the last value handed out as a checkpoint.
///
/// Rows arrive ordered by the cursor, but several may share one value and
/// the resume filter is strict `>`. So while the stream is open only
/// `settled`, a value followed by a strictly greater one, is safe to
/// checkpoint; `max_seen` is offered only once the stream is exhausted.
/// Emitted checkpoints never decrease.
#[derive(Debug, Clone)]
pub(crate) struct CheckpointTracker {
    field_name: String,
    field_type: CommonType,
    cursor_type: CursorType,
    interval: u64,
    max_seen: Option<CursorValue>,
    settled: Option<CursorValue>,
    last_emitted: Option<CursorValue>,
    since_emit: u64,
}

impl CheckpointTracker {
    /// Tracker resuming from `prior`, which counts as already emitted.
    pub(crate) fn new(
        field_name: impl Into<String>,
        field_type: CommonType,
        cursor_type: CursorType,
        interval: u64,
        prior: Option<CursorValue>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            field_type,
            cursor_type,
            interval: interval.max(1),
            max_seen: prior.clone(),
            settled: prior.clone(),
            last_emitted: prior,
            since_emit: 0,
        }
    }

    pub(crate) fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Read the cursor value of a record about to be delivered.
    ///
    /// `delivered` is the number of records already delivered, for context.
    pub(crate) fn extract(&self, record: &Record, delivered: u64) -> Result<CursorValue, StreamError> {
        let raw = record.get(&self.field_name).unwrap_or(&serde_json::Value::Null);
        CursorValue::from_json(self.cursor_type, raw).map_err(|e| match e {
            CursorValueError::Null => StreamError::NullCursor {
                field: self.field_name.clone(),
                records: delivered,
            },
            other => StreamError::UnorderableCursor {
                field: self.field_name.clone(),
                reason: other.to_string(),
            },
        })
    }

    /// Fold the cursor value of a delivered record into the maximum.
    pub(crate) fn observe(&mut self, value: CursorValue) -> Result<(), StreamError> {
        self.since_emit += 1;
        let replace = match &self.max_seen {
            None => true,
            Some(current) => self.order(&value, current)? == Ordering::Greater,
        };
        if replace {
            self.settled = self.max_seen.replace(value);
        }
        Ok(())
    }

    /// Whether enough records passed since the last emission.
    pub(crate) fn due(&self) -> bool {
        self.since_emit >= self.interval
    }

    /// Value to emit now, if any.
    ///
    /// `complete` means no further row can carry the current maximum (the
    /// stream was exhausted, or stopped at a null cursor, which sorts
    /// last); otherwise only the settled value is considered.
    ///
    /// Without `force` a value is only offered when it is strictly greater
    /// than the last emitted one. With `force` an unchanged value is offered
    /// again; a lower one never is.
    pub(crate) fn candidate(
        &self,
        complete: bool,
        force: bool,
    ) -> Result<Option<CursorValue>, StreamError> {
        let source = if complete { &self.max_seen } else { &self.settled };
        let Some(max) = source else {
            return Ok(None);
        };
        let offer = match &self.last_emitted {
            None => true,
            Some(last) => match self.order(max, last)? {
                Ordering::Greater => true,
                Ordering::Equal => force,
                Ordering::Less => false,
            },
        };
        Ok(offer.then(|| max.clone()))
    }

    pub(crate) fn mark_emitted(&mut self, value: CursorValue) {
        self.last_emitted = Some(value);
        self.since_emit = 0;
    }

    pub(crate) fn last_emitted(&self) -> Option<&CursorValue> {
        self.last_emitted.as_ref()
    }

    pub(crate) fn max_seen(&self) -> Option<&CursorValue> {
        self.max_seen.as_ref()
    }

    /// Cursor carrying `value` as its checkpoint.
    pub(crate) fn cursor_at(&self, value: CursorValue) -> Cursor {
        Cursor::new(self.field_name.clone(), self.field_type).with_checkpoint(value)
    }

    fn order(&self, a: &CursorValue, b: &CursorValue) -> Result<Ordering, StreamError> {
        a.compare(b).map_err(|e| StreamError::UnorderableCursor {
            field: self.field_name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Persist `cursor` as the stream's checkpoint.
pub(crate) fn persist_checkpoint(
    state: &dyn StateBackend,
    pipeline: &PipelineId,
    stream: &StreamName,
    cursor: &Cursor,
) -> Result<(), StateError> {
    let updated_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let Some(snapshot) = CursorState::from_cursor(cursor, updated_at) else {
        return Ok(());
    };
    state.save_checkpoint(pipeline, stream, &snapshot)?;
    tracing::info!(
        pipeline = pipeline.as_str(),
        stream = stream.as_str(),
        cursor_field = snapshot.cursor_field.as_str(),
        cursor_value = snapshot.cursor_value.as_str(),
        "Checkpoint persisted"
    );
    Ok(())
}
