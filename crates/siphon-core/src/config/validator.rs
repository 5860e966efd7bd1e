//! Semantic validation for parsed extraction config values.

use std::collections::HashSet;

use anyhow::{bail, Result};
use siphon_types::stream::SyncMode;

use crate::config::types::{ExtractionConfig, StateBackendKind};

/// Validate a parsed extraction config.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &ExtractionConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.checkpoint_interval == 0 {
        errors.push("checkpoint_interval must be at least 1".to_string());
    }

    if config.state.backend == StateBackendKind::Sqlite && config.state.path.is_none() {
        errors.push("State backend 'sqlite' requires a path".to_string());
    }

    if config.streams.is_empty() {
        errors.push("Config must define at least one stream".to_string());
    }

    let mut seen = HashSet::new();
    for (i, stream) in config.streams.iter().enumerate() {
        if stream.name.trim().is_empty() {
            errors.push(format!("Stream {i} has an empty name"));
            continue;
        }
        let namespace = stream
            .namespace
            .as_deref()
            .or(config.namespace.as_deref())
            .unwrap_or("");
        if !seen.insert((namespace, stream.name.as_str())) {
            errors.push(format!("Stream '{}' is defined more than once", stream.name));
        }
        if stream.sync_mode == SyncMode::Incremental && stream.cursor_field.is_none() {
            errors.push(format!(
                "Stream '{}' uses incremental sync but has no cursor_field",
                stream.name
            ));
        }
        if let Some(columns) = &stream.columns {
            if columns.is_empty() {
                errors.push(format!("Stream '{}' lists no columns", stream.name));
            }
            if let (SyncMode::Incremental, Some(cursor)) = (stream.sync_mode, &stream.cursor_field) {
                if !columns.contains(cursor) {
                    errors.push(format!(
                        "Stream '{}' must include cursor_field '{cursor}' in columns",
                        stream.name
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Config validation failed:\n  - {}", errors.join("\n  - "));
    }
}
