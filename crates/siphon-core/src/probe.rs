//! Read-only connection probe.

use std::time::Instant;

use serde::Serialize;
use siphon_types::error::{AdapterError, ErrorCategory};

use crate::adapter::Adapter;
use crate::errors::{ConnectivityError, StreamError};
use crate::query::BackendQuery;
use crate::stream::RecordStream;

/// A probe check that passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeCheck {
    pub name: String,
    /// Rows returned by the check query.
    pub rows: u64,
    pub duration_ms: u64,
}

/// Successful probe with per-check timings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub checks: Vec<ProbeCheck>,
}

impl ProbeReport {
    #[must_use]
    pub fn total_duration_ms(&self) -> u64 {
        self.checks.iter().map(|c| c.duration_ms).sum()
    }
}

/// Verify the backend answers a trivial query and, when the adapter is
/// restricted to one namespace, that the namespace is readable.
///
/// # Errors
///
/// Returns [`ConnectivityError::Unreachable`] when the backend cannot be
/// reached or rejects the credentials, and
/// [`ConnectivityError::InsufficientPrivilege`] when queries are refused
/// or the namespace check fails for any reason.
pub async fn probe<A: Adapter>(adapter: &A) -> Result<ProbeReport, ConnectivityError> {
    let plan = adapter.probe_plan();
    let mut report = ProbeReport::default();

    let started = Instant::now();
    let rows = count_rows(adapter, plan.connectivity).await;
    let elapsed = elapsed_ms(started);
    match rows {
        Ok(n) if n > 0 => report.checks.push(passed("connectivity", n, elapsed)),
        Ok(_) => {
            tracing::warn!(check = "connectivity", "Probe query returned no rows");
            return Err(ConnectivityError::InsufficientPrivilege(
                AdapterError::permission("PROBE_EMPTY", "unable to execute any query on the source"),
            ));
        }
        Err(e) => {
            tracing::warn!(check = "connectivity", error = %e, "Probe query failed");
            return Err(if e.category == ErrorCategory::Permission {
                ConnectivityError::InsufficientPrivilege(e)
            } else {
                ConnectivityError::Unreachable(e)
            });
        }
    }

    if let Some(check) = plan.namespace {
        let name = format!("namespace:{}", check.namespace);
        let started = Instant::now();
        let rows = count_rows(adapter, check.query).await;
        let elapsed = elapsed_ms(started);
        match rows {
            Ok(0) => report.checks.push(passed(&name, 0, elapsed)),
            Ok(_) => {
                tracing::warn!(check = name.as_str(), "Namespace check returned rows");
                return Err(ConnectivityError::InsufficientPrivilege(AdapterError::permission(
                    "NAMESPACE_CHECK_FAILED",
                    format!("cannot read namespace '{}'", check.namespace),
                )));
            }
            Err(e) => {
                tracing::warn!(check = name.as_str(), error = %e, "Namespace check failed");
                return Err(if e.is_unreachable() {
                    ConnectivityError::Unreachable(e)
                } else {
                    ConnectivityError::InsufficientPrivilege(e)
                });
            }
        }
    }

    tracing::info!(
        checks = report.checks.len(),
        duration_ms = report.total_duration_ms(),
        "Connection probe passed"
    );
    Ok(report)
}

async fn count_rows<A: Adapter>(adapter: &A, query: BackendQuery) -> Result<u64, AdapterError> {
    let mut stream = RecordStream::open(adapter, query);
    loop {
        match stream.next().await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(stream.rows_yielded()),
            Err(StreamError::Backend(e)) => return Err(e),
            Err(other) => return Err(AdapterError::internal("PROBE", other.to_string())),
        }
    }
}

fn passed(name: &str, rows: u64, duration_ms: u64) -> ProbeCheck {
    ProbeCheck {
        name: name.to_string(),
        rows,
        duration_ms,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
