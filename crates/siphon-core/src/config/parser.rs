//! Extraction config YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::ExtractionConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            missing.push(caps[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse an extraction config YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml_str: &str) -> Result<ExtractionConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: ExtractionConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse extraction config YAML")?;
    Ok(config)
}

/// Parse an extraction config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<ExtractionConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::StateBackendKind;
    use siphon_types::stream::SyncMode;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SIPHON_TEST_DB", "/var/lib/siphon/state.db");
        let input = "path: ${SIPHON_TEST_DB}";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "path: /var/lib/siphon/state.db");
        std::env::remove_var("SIPHON_TEST_DB");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "pipeline: nightly\nnamespace: public";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_missing_env_vars_all_reported() {
        let err = substitute_env_vars("${SIPHON_MISSING_X} and ${SIPHON_MISSING_Y}")
            .unwrap_err()
            .to_string();
        assert!(err.contains("SIPHON_MISSING_X"));
        assert!(err.contains("SIPHON_MISSING_Y"));
    }

    #[test]
    fn test_parse_full_config() {
        std::env::set_var("SIPHON_TEST_NS", "public");
        let yaml = r#"
version: "1.0"
pipeline: nightly_users
namespace: ${SIPHON_TEST_NS}
checkpoint_interval: 500
state:
  backend: memory
streams:
  - name: users
    sync_mode: incremental
    cursor_field: id
    columns: [id, name]
  - name: audit_log
    namespace: audit
    sync_mode: full_refresh
"#;
        let config = parse_config_str(yaml).unwrap();
        std::env::remove_var("SIPHON_TEST_NS");

        assert_eq!(config.pipeline, "nightly_users");
        assert_eq!(config.namespace.as_deref(), Some("public"));
        assert_eq!(config.checkpoint_interval, 500);
        assert_eq!(config.state.backend, StateBackendKind::Memory);
        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.streams[0].sync_mode, SyncMode::Incremental);
        assert_eq!(config.streams[0].cursor_field.as_deref(), Some("id"));
        assert_eq!(
            config.streams[0].columns,
            Some(vec!["id".to_string(), "name".to_string()])
        );
        assert_eq!(config.streams[1].namespace.as_deref(), Some("audit"));
    }

    #[test]
    fn test_defaults_applied() {
        let yaml = r#"
version: "1.0"
pipeline: p
state:
  path: ./state.db
streams:
  - name: t
    sync_mode: full_refresh
"#;
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.checkpoint_interval, 1_000);
        assert_eq!(config.state.backend, StateBackendKind::Sqlite);
        assert!(config.namespace.is_none());
        assert!(config.streams[0].columns.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
version: "1.0"
pipeline: p
streams: []
destination: {}
"#;
        assert!(parse_config_str(yaml).is_err());
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        assert!(parse_config_str("this is not: [valid: yaml: {{{}}}").is_err());
    }

    #[test]
    fn test_parse_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extract.yaml");
        std::fs::write(
            &path,
            "version: \"1.0\"\npipeline: p\nstreams:\n  - name: t\n    sync_mode: full_refresh\n",
        )
        .unwrap();
        let config = parse_config(&path).unwrap();
        assert_eq!(config.streams[0].name, "t");
    }

    #[test]
    fn test_parse_config_file_not_found() {
        let err = parse_config(Path::new("/nonexistent/extract.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to read config file"));
    }
}
