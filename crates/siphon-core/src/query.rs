//! Read query construction with identifier quoting and typed bind parameters.
//!
//! Checkpoint values never appear in query text; they are bound as
//! [`QueryParam`]s carrying the adapter's native type name.

use siphon_types::cursor::CursorValue;
use siphon_types::stream::{StreamReadSpec, SyncMode};

use crate::adapter::Adapter;
use crate::errors::ConfigurationError;

/// Typed positional parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub value: CursorValue,
    /// Backend type name the value is bound as (e.g. `INT64`, `timestamptz`).
    pub native_type: String,
}

/// Query text plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl BackendQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, value: CursorValue, native_type: impl Into<String>) -> Self {
        self.params.push(QueryParam {
            value,
            native_type: native_type.into(),
        });
        self
    }
}

/// Quote an identifier with ANSI double quotes, doubling embedded quotes.
#[must_use]
pub fn ansi_quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an identifier with backticks, doubling embedded backticks.
#[must_use]
pub fn backtick_quote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Build the read query for `spec`.
///
/// Full refresh selects the projection from the table. Incremental reads
/// with a checkpoint add `WHERE cursor > $1` (strictly greater, so the row
/// at the checkpoint is not re-read), binding the checkpoint with the cursor
/// column's native type. Incremental reads are always ordered by the cursor
/// column.
///
/// # Errors
///
/// Returns [`ConfigurationError::MissingCursor`] for an incremental spec
/// without a cursor, and [`ConfigurationError::CursorFieldNotFound`] when a
/// checkpoint must be bound for a column the table does not have.
pub fn build_read_query<A: Adapter + ?Sized>(
    adapter: &A,
    spec: &StreamReadSpec,
) -> Result<BackendQuery, ConfigurationError> {
    let projection = spec
        .columns
        .iter()
        .map(|c| adapter.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let table = qualified_table(adapter, &spec.table.namespace, &spec.table.name);
    let mut query = BackendQuery::new(format!("SELECT {projection} FROM {table}"));

    if spec.mode == SyncMode::FullRefresh {
        return Ok(query);
    }

    let cursor = spec
        .cursor
        .as_ref()
        .ok_or_else(|| ConfigurationError::MissingCursor {
            stream: spec.stream_name(),
        })?;
    let cursor_col = adapter.quote_identifier(&cursor.field_name);

    if let Some(checkpoint) = &cursor.checkpoint {
        let field = spec.table.field(&cursor.field_name).ok_or_else(|| {
            ConfigurationError::CursorFieldNotFound {
                stream: spec.stream_name(),
                field: cursor.field_name.clone(),
            }
        })?;
        let placeholder = adapter.placeholder(1, &field.native_type);
        query.sql = format!("{} WHERE {cursor_col} > {placeholder}", query.sql);
        query = query.with_param(checkpoint.clone(), field.native_type.clone());
    }

    query.sql = format!("{} ORDER BY {cursor_col}", query.sql);
    Ok(query)
}

fn qualified_table<A: Adapter + ?Sized>(adapter: &A, namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        adapter.quote_identifier(name)
    } else {
        format!(
            "{}.{}",
            adapter.quote_identifier(namespace),
            adapter.quote_identifier(name)
        )
    }
}
