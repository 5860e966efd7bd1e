//! Connection setup and PostgreSQL error classification.

use siphon_types::error::AdapterError;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};

use crate::config::Config;

/// Connect and drive the connection on a background task.
pub(crate) async fn connect(config: &Config) -> Result<Client, AdapterError> {
    let (client, connection) = config
        .pg_config()
        .connect(NoTls)
        .await
        .map_err(|e| classify(&e, "CONNECTION_FAILED"))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "PostgreSQL connection error");
        }
    });

    tracing::debug!(
        host = config.host.as_str(),
        port = config.port,
        database = config.database.as_str(),
        "Connected to PostgreSQL"
    );
    Ok(client)
}

/// Map a driver error onto an [`AdapterError`] category.
///
/// `fallback` is the code used when the server reported no SQLSTATE.
pub(crate) fn classify(err: &tokio_postgres::Error, fallback: &str) -> AdapterError {
    classify_state(err.code().map(SqlState::code), fallback, err.to_string())
}

fn classify_state(state: Option<&str>, fallback: &str, message: String) -> AdapterError {
    match state {
        Some(code) if code == SqlState::INSUFFICIENT_PRIVILEGE.code() => {
            AdapterError::permission(code, message)
        }
        // 28: invalid authorization
        Some(code) if code.starts_with("28") => AdapterError::auth(code, message),
        // 08: connection exception, 57P: operator intervention, 3D000: no such database
        Some(code) if code.starts_with("08") || code.starts_with("57P") || code == "3D000" => {
            AdapterError::connection(code, message)
        }
        Some(code) => AdapterError::query(code, message),
        None => AdapterError::connection(fallback, message),
    }
}
