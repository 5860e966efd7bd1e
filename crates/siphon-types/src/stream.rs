//! Per-stream read configuration.
//!
//! A [`StreamReadSpec`] is built once per stream per read invocation and
//! never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::TableInfo;
use crate::cursor::Cursor;

/// Extraction mode of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Re-read every row, ignoring prior checkpoints.
    FullRefresh,
    /// Read only rows whose cursor value is past the checkpoint.
    Incremental,
}

impl SyncMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullRefresh => "full_refresh",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine needs to read one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamReadSpec {
    pub table: TableInfo,
    /// Projected columns, in output order.
    pub columns: Vec<String>,
    pub mode: SyncMode,
    /// Required for [`SyncMode::Incremental`], ignored otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

impl StreamReadSpec {
    /// Full-refresh spec projecting every field of `table`.
    #[must_use]
    pub fn full_refresh(table: TableInfo) -> Self {
        let columns = table.field_names();
        Self {
            table,
            columns,
            mode: SyncMode::FullRefresh,
            cursor: None,
        }
    }

    /// Incremental spec projecting every field of `table`.
    #[must_use]
    pub fn incremental(table: TableInfo, cursor: Cursor) -> Self {
        let columns = table.field_names();
        Self {
            table,
            columns,
            mode: SyncMode::Incremental,
            cursor: Some(cursor),
        }
    }

    /// Restrict the projection to `columns`.
    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Stream key used for state persistence and messages.
    #[must_use]
    pub fn stream_name(&self) -> String {
        self.table.qualified_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Field;
    use crate::common::CommonType;

    fn users() -> TableInfo {
        TableInfo {
            namespace: "public".into(),
            name: "users".into(),
            fields: vec![
                Field::new("id", "bigint", CommonType::Number),
                Field::new("email", "text", CommonType::String),
            ],
            primary_key: vec![],
        }
    }

    #[test]
    fn full_refresh_projects_every_field() {
        let spec = StreamReadSpec::full_refresh(users());
        assert_eq!(spec.columns, vec!["id", "email"]);
        assert_eq!(spec.mode, SyncMode::FullRefresh);
        assert!(spec.cursor.is_none());
        assert_eq!(spec.stream_name(), "public.users");
    }

    #[test]
    fn with_columns_overrides_projection() {
        let spec = StreamReadSpec::incremental(users(), Cursor::new("id", CommonType::Number))
            .with_columns(["id"]);
        assert_eq!(spec.columns, vec!["id"]);
        assert_eq!(spec.mode, SyncMode::Incremental);
    }

    #[test]
    fn sync_mode_serde() {
        assert_eq!(
            serde_json::to_string(&SyncMode::FullRefresh).unwrap(),
            "\"full_refresh\""
        );
        let back: SyncMode = serde_json::from_str("\"incremental\"").unwrap();
        assert_eq!(back, SyncMode::Incremental);
    }
}
