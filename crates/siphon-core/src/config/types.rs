//! Extraction config model.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use siphon_state::{SqliteStateBackend, StateBackend, StateError};
use siphon_types::catalog::TableInfo;
use siphon_types::cursor::Cursor;
use siphon_types::stream::{StreamReadSpec, SyncMode};

use crate::engine::DEFAULT_CHECKPOINT_INTERVAL;
use crate::errors::ConfigurationError;

/// Top-level extraction config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionConfig {
    pub version: String,
    pub pipeline: String,
    /// Discovery filter and default namespace for streams.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    #[serde(default)]
    pub state: StateConfig,
    pub streams: Vec<StreamConfig>,
}

fn default_checkpoint_interval() -> u64 {
    DEFAULT_CHECKPOINT_INTERVAL
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
    Memory,
}

/// Where checkpoints and run history are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Database file for the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StateConfig {
    /// Open the configured state backend.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the database cannot be opened, or when
    /// the sqlite backend has no path.
    pub fn open(&self) -> Result<Box<dyn StateBackend>, StateError> {
        match self.backend {
            StateBackendKind::Memory => Ok(Box::new(SqliteStateBackend::in_memory()?)),
            StateBackendKind::Sqlite => {
                let path = self.path.as_deref().ok_or_else(|| {
                    StateError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "sqlite state backend requires a path",
                    ))
                })?;
                Ok(Box::new(SqliteStateBackend::open(path)?))
            }
        }
    }
}

/// One stream to extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub cursor_field: Option<String>,
    /// Projection; every discovered field when absent.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl StreamConfig {
    /// Resolve this stream against discovered tables.
    ///
    /// The cursor carries no checkpoint; the engine resumes from the state
    /// store. Projection and cursor checks happen in the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownStream`] when no table matches,
    /// [`ConfigurationError::MissingCursor`] for incremental streams without
    /// a cursor field, and [`ConfigurationError::CursorFieldNotFound`] when
    /// the cursor field is not a column of the table.
    pub fn to_read_spec(
        &self,
        tables: &[TableInfo],
        default_namespace: Option<&str>,
    ) -> Result<StreamReadSpec, ConfigurationError> {
        let namespace = self.namespace.as_deref().or(default_namespace);
        let table = tables
            .iter()
            .find(|t| t.name == self.name && namespace.map_or(true, |ns| t.namespace == ns))
            .ok_or_else(|| ConfigurationError::UnknownStream {
                stream: match namespace {
                    Some(ns) => format!("{ns}.{}", self.name),
                    None => self.name.clone(),
                },
            })?;

        let mut spec = match self.sync_mode {
            SyncMode::FullRefresh => StreamReadSpec::full_refresh(table.clone()),
            SyncMode::Incremental => {
                let field_name =
                    self.cursor_field
                        .as_deref()
                        .ok_or_else(|| ConfigurationError::MissingCursor {
                            stream: table.qualified_name(),
                        })?;
                let field = table.field(field_name).ok_or_else(|| {
                    ConfigurationError::CursorFieldNotFound {
                        stream: table.qualified_name(),
                        field: field_name.to_string(),
                    }
                })?;
                StreamReadSpec::incremental(
                    table.clone(),
                    Cursor::new(field.name.clone(), field.common_type),
                )
            }
        };
        if let Some(columns) = &self.columns {
            spec = spec.with_columns(columns.iter().cloned());
        }
        Ok(spec)
    }
}

impl ExtractionConfig {
    /// Resolve every configured stream, in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] from
    /// [`StreamConfig::to_read_spec`].
    pub fn read_specs(&self, tables: &[TableInfo]) -> Result<Vec<StreamReadSpec>, ConfigurationError> {
        self.streams
            .iter()
            .map(|s| s.to_read_spec(tables, self.namespace.as_deref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_types::catalog::Field;
    use siphon_types::common::CommonType;

    fn tables() -> Vec<TableInfo> {
        vec![
            TableInfo {
                namespace: "public".into(),
                name: "users".into(),
                fields: vec![
                    Field::new("id", "int8", CommonType::Number),
                    Field::new("email", "text", CommonType::String),
                ],
                primary_key: vec!["id".into()],
            },
            TableInfo {
                namespace: "audit".into(),
                name: "users".into(),
                fields: vec![Field::new("id", "int8", CommonType::Number)],
                primary_key: vec![],
            },
        ]
    }

    fn stream(name: &str, mode: SyncMode, cursor: Option<&str>) -> StreamConfig {
        StreamConfig {
            name: name.into(),
            namespace: None,
            sync_mode: mode,
            cursor_field: cursor.map(Into::into),
            columns: None,
        }
    }

    #[test]
    fn incremental_stream_resolves_cursor_type() {
        let spec = stream("users", SyncMode::Incremental, Some("id"))
            .to_read_spec(&tables(), Some("public"))
            .unwrap();
        assert_eq!(spec.stream_name(), "public.users");
        let cursor = spec.cursor.unwrap();
        assert_eq!(cursor.field_type, CommonType::Number);
        assert!(cursor.checkpoint.is_none());
        assert_eq!(spec.columns, vec!["id", "email"]);
    }

    #[test]
    fn stream_namespace_overrides_default() {
        let mut cfg = stream("users", SyncMode::FullRefresh, None);
        cfg.namespace = Some("audit".into());
        let spec = cfg.to_read_spec(&tables(), Some("public")).unwrap();
        assert_eq!(spec.stream_name(), "audit.users");
    }

    #[test]
    fn explicit_columns_are_kept_verbatim() {
        let mut cfg = stream("users", SyncMode::FullRefresh, None);
        cfg.columns = Some(vec!["email".into()]);
        let spec = cfg.to_read_spec(&tables(), Some("public")).unwrap();
        assert_eq!(spec.columns, vec!["email"]);
    }

    #[test]
    fn unknown_stream_and_cursor_are_rejected() {
        let err = stream("orders", SyncMode::FullRefresh, None)
            .to_read_spec(&tables(), Some("public"))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownStream {
                stream: "public.orders".into()
            }
        );

        let err = stream("users", SyncMode::Incremental, Some("updated_at"))
            .to_read_spec(&tables(), Some("public"))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::CursorFieldNotFound { .. }));

        let err = stream("users", SyncMode::Incremental, None)
            .to_read_spec(&tables(), Some("public"))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingCursor { .. }));
    }

    #[test]
    fn memory_state_backend_opens() {
        let cfg = StateConfig {
            backend: StateBackendKind::Memory,
            path: None,
        };
        assert!(cfg.open().is_ok());
    }

    #[test]
    fn sqlite_state_backend_requires_path() {
        let cfg = StateConfig::default();
        assert!(matches!(cfg.open(), Err(StateError::Io(_))));
    }

    #[test]
    fn sqlite_state_backend_opens_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StateConfig {
            backend: StateBackendKind::Sqlite,
            path: Some(dir.path().join("state").join("siphon.db")),
        };
        assert!(cfg.open().is_ok());
        assert!(dir.path().join("state").join("siphon.db").exists());
    }
}
