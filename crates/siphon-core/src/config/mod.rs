//! Extraction config: YAML model, parsing, and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_config, parse_config_str, substitute_env_vars};
pub use types::{ExtractionConfig, StateBackendKind, StateConfig, StreamConfig};
pub use validator::validate_config;
