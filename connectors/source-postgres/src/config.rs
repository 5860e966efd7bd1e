//! Source PostgreSQL adapter configuration.

use serde::Deserialize;
use siphon_types::error::AdapterError;

/// PostgreSQL identifiers are truncated past this many bytes.
const MAX_IDENTIFIER_BYTES: usize = 63;

/// PostgreSQL connection config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    /// Schema the probe checks for `USAGE` privilege.
    #[serde(default)]
    pub schema: Option<String>,
    /// Rows pulled per `FETCH` from the server-side cursor.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: u32,
}

fn default_port() -> u16 {
    5432
}

fn default_fetch_size() -> u32 {
    10_000
}

impl Config {
    /// # Errors
    ///
    /// Returns an `INVALID_CONFIG` [`AdapterError`] for an empty host or
    /// database, a zero fetch size, or an unusable schema name.
    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.host.trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if self.database.trim().is_empty() {
            return Err(invalid("database must not be empty"));
        }
        if self.fetch_size == 0 {
            return Err(invalid("fetch_size must be at least 1"));
        }
        if let Some(schema) = &self.schema {
            if schema.is_empty() {
                return Err(invalid("schema must not be empty"));
            }
            if schema.len() > MAX_IDENTIFIER_BYTES {
                return Err(invalid(format!(
                    "schema '{schema}' exceeds PostgreSQL {MAX_IDENTIFIER_BYTES}-byte limit"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host);
        pg.port(self.port);
        pg.user(&self.user);
        if !self.password.is_empty() {
            pg.password(&self.password);
        }
        pg.dbname(&self.database);
        pg.application_name("siphon");
        pg
    }
}

fn invalid(message: impl Into<String>) -> AdapterError {
    AdapterError::internal("INVALID_CONFIG", message)
}
