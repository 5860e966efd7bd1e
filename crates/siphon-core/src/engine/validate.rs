//! Read spec validation, performed before any query is issued.

use std::collections::HashSet;

use siphon_types::cursor::{Cursor, CursorType};
use siphon_types::state::CursorState;
use siphon_types::stream::{StreamReadSpec, SyncMode};

use crate::errors::ConfigurationError;

/// Check a read spec against its table.
///
/// Returns the cursor's comparison domain for incremental specs and `None`
/// for full refresh.
///
/// # Errors
///
/// Returns the first [`ConfigurationError`] found: empty, duplicated or
/// unknown projected columns; for incremental specs a missing, unknown,
/// unorderable, mistyped or unprojected cursor, or a checkpoint outside
/// the cursor's domain.
pub fn validate_read_spec(spec: &StreamReadSpec) -> Result<Option<CursorType>, ConfigurationError> {
    let stream = spec.stream_name();

    if spec.columns.is_empty() {
        return Err(ConfigurationError::EmptyProjection { stream });
    }
    let mut seen = HashSet::new();
    for column in &spec.columns {
        if !seen.insert(column.as_str()) {
            return Err(ConfigurationError::DuplicateColumn {
                stream,
                column: column.clone(),
            });
        }
        if spec.table.field(column).is_none() {
            return Err(ConfigurationError::UnknownColumn {
                stream,
                column: column.clone(),
            });
        }
    }

    if spec.mode == SyncMode::FullRefresh {
        return Ok(None);
    }

    let cursor = spec
        .cursor
        .as_ref()
        .ok_or_else(|| ConfigurationError::MissingCursor {
            stream: stream.clone(),
        })?;
    let field = spec.table.field(&cursor.field_name).ok_or_else(|| {
        ConfigurationError::CursorFieldNotFound {
            stream: stream.clone(),
            field: cursor.field_name.clone(),
        }
    })?;
    let cursor_type = CursorType::for_common(field.common_type).ok_or_else(|| {
        ConfigurationError::CursorNotOrderable {
            stream: stream.clone(),
            field: field.name.clone(),
            field_type: field.common_type,
        }
    })?;
    if cursor.field_type != field.common_type {
        return Err(ConfigurationError::CursorTypeMismatch {
            stream,
            field: field.name.clone(),
            declared: cursor.field_type,
            discovered: field.common_type,
        });
    }
    if !seen.contains(cursor.field_name.as_str()) {
        return Err(ConfigurationError::CursorNotProjected {
            stream,
            field: cursor.field_name.clone(),
        });
    }
    check_checkpoint_domain(&stream, cursor, cursor_type)?;

    Ok(Some(cursor_type))
}

fn check_checkpoint_domain(
    stream: &str,
    cursor: &Cursor,
    cursor_type: CursorType,
) -> Result<(), ConfigurationError> {
    match &cursor.checkpoint {
        Some(value) if value.cursor_type() != cursor_type => {
            Err(ConfigurationError::InvalidCheckpoint {
                stream: stream.to_string(),
                reason: format!(
                    "checkpoint is a {} value but cursor '{}' is {cursor_type}",
                    value.cursor_type(),
                    cursor.field_name
                ),
            })
        }
        _ => Ok(()),
    }
}

/// Apply a persisted checkpoint to a validated cursor.
///
/// A stored checkpoint for a different cursor field is ignored, so
/// changing the cursor column restarts the stream from the beginning.
/// Otherwise the stored value replaces any checkpoint already on `cursor`.
///
/// # Errors
///
/// Returns [`ConfigurationError::InvalidCheckpoint`] when the stored value
/// cannot be decoded in the cursor's domain.
pub fn resume_cursor(
    stream: &str,
    cursor: &Cursor,
    stored: Option<&CursorState>,
) -> Result<Cursor, ConfigurationError> {
    let Some(stored) = stored else {
        return Ok(cursor.clone());
    };
    if stored.cursor_field != cursor.field_name {
        tracing::warn!(
            stream,
            stored_field = stored.cursor_field.as_str(),
            cursor_field = cursor.field_name.as_str(),
            "Ignoring checkpoint saved for a different cursor field"
        );
        return Ok(cursor.clone());
    }
    let invalid = |reason: String| ConfigurationError::InvalidCheckpoint {
        stream: stream.to_string(),
        reason,
    };
    if stored.field_type != cursor.field_type {
        return Err(invalid(format!(
            "saved for a {} cursor, stream cursor is {}",
            stored.field_type, cursor.field_type
        )));
    }
    let restored = stored.to_cursor().map_err(|e| invalid(e.to_string()))?;
    Ok(Cursor {
        checkpoint: restored.checkpoint,
        ..cursor.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_types::catalog::{Field, TableInfo};
    use siphon_types::common::CommonType;
    use siphon_types::cursor::CursorValue;

    fn table() -> TableInfo {
        TableInfo {
            namespace: "dataset".into(),
            name: "events".into(),
            fields: vec![
                Field::new("id", "INT64", CommonType::Number),
                Field::new("name", "STRING", CommonType::String),
                Field::new("active", "BOOL", CommonType::Boolean),
                Field::new("at", "TIMESTAMP", CommonType::Temporal),
            ],
            primary_key: vec![],
        }
    }

    fn incremental(field: &str, field_type: CommonType) -> StreamReadSpec {
        StreamReadSpec::incremental(table(), Cursor::new(field, field_type))
    }

    #[test]
    fn full_refresh_needs_only_a_valid_projection() {
        let spec = StreamReadSpec::full_refresh(table());
        assert_eq!(validate_read_spec(&spec).unwrap(), None);
    }

    #[test]
    fn projection_errors() {
        let empty = StreamReadSpec::full_refresh(table()).with_columns(Vec::<String>::new());
        assert!(matches!(
            validate_read_spec(&empty),
            Err(ConfigurationError::EmptyProjection { .. })
        ));

        let dup = StreamReadSpec::full_refresh(table()).with_columns(["id", "id"]);
        assert!(matches!(
            validate_read_spec(&dup),
            Err(ConfigurationError::DuplicateColumn { ref column, .. }) if column == "id"
        ));

        let unknown = StreamReadSpec::full_refresh(table()).with_columns(["id", "nope"]);
        assert!(matches!(
            validate_read_spec(&unknown),
            Err(ConfigurationError::UnknownColumn { ref column, .. }) if column == "nope"
        ));
    }

    #[test]
    fn incremental_returns_cursor_domain() {
        assert_eq!(
            validate_read_spec(&incremental("at", CommonType::Temporal)).unwrap(),
            Some(CursorType::Timestamp)
        );
        assert_eq!(
            validate_read_spec(&incremental("name", CommonType::String)).unwrap(),
            Some(CursorType::Utf8)
        );
    }

    #[test]
    fn incremental_cursor_errors() {
        let mut missing = StreamReadSpec::full_refresh(table());
        missing.mode = SyncMode::Incremental;
        assert!(matches!(
            validate_read_spec(&missing),
            Err(ConfigurationError::MissingCursor { .. })
        ));

        assert!(matches!(
            validate_read_spec(&incremental("ghost", CommonType::Number)),
            Err(ConfigurationError::CursorFieldNotFound { .. })
        ));
        assert!(matches!(
            validate_read_spec(&incremental("active", CommonType::Boolean)),
            Err(ConfigurationError::CursorNotOrderable { .. })
        ));
        assert!(matches!(
            validate_read_spec(&incremental("id", CommonType::String)),
            Err(ConfigurationError::CursorTypeMismatch { .. })
        ));

        let unprojected = incremental("id", CommonType::Number).with_columns(["name"]);
        assert!(matches!(
            validate_read_spec(&unprojected),
            Err(ConfigurationError::CursorNotProjected { .. })
        ));
    }

    #[test]
    fn checkpoint_must_match_cursor_domain() {
        let spec = StreamReadSpec::incremental(
            table(),
            Cursor::new("id", CommonType::Number).with_checkpoint(CursorValue::Utf8 {
                value: "1".into(),
            }),
        );
        assert!(matches!(
            validate_read_spec(&spec),
            Err(ConfigurationError::InvalidCheckpoint { .. })
        ));
    }

    fn stored(field: &str, field_type: CommonType, value: &str) -> CursorState {
        CursorState {
            cursor_field: field.into(),
            field_type,
            cursor_value: value.into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn resume_uses_stored_value() {
        let cursor = Cursor::new("id", CommonType::Number)
            .with_checkpoint(CursorValue::Int64 { value: 1 });
        let resumed =
            resume_cursor("s", &cursor, Some(&stored("id", CommonType::Number, "42"))).unwrap();
        assert_eq!(resumed.checkpoint, Some(CursorValue::Int64 { value: 42 }));
    }

    #[test]
    fn resume_without_state_keeps_cursor() {
        let cursor = Cursor::new("id", CommonType::Number);
        assert_eq!(resume_cursor("s", &cursor, None).unwrap(), cursor);
    }

    #[test]
    fn resume_ignores_other_cursor_field() {
        let cursor = Cursor::new("at", CommonType::Temporal);
        let resumed =
            resume_cursor("s", &cursor, Some(&stored("id", CommonType::Number, "42"))).unwrap();
        assert_eq!(resumed.checkpoint, None);
    }

    #[test]
    fn resume_rejects_undecodable_state() {
        let cursor = Cursor::new("at", CommonType::Temporal);
        let err = resume_cursor(
            "s",
            &cursor,
            Some(&stored("at", CommonType::Temporal, "not a time")),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidCheckpoint { .. }));

        let err = resume_cursor("s", &cursor, Some(&stored("at", CommonType::String, "x")))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidCheckpoint { .. }));
    }
}
