//! Server-side cursor reads.
//!
//! Each query runs in its own `REPEATABLE READ` transaction as
//! `DECLARE ... NO SCROLL CURSOR`, pulled `fetch_size` rows at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use siphon_core::{BackendQuery, RowCursor};
use siphon_types::error::AdapterError;
use siphon_types::record::Record;
use tokio::sync::OwnedMutexGuard;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};

use crate::client::classify;
use crate::types::decode_row;

/// Server-side cursor name used for streaming reads.
const CURSOR_NAME: &str = "siphon_cursor";

/// Open `query` as a server-side cursor.
///
/// `slot` serializes cursors on the connection: it is held until the cursor
/// is released. The cursor owns the transaction from `BEGIN` on, so
/// dropping this future part way rolls it back like [`RowCursor::abandon`].
pub(crate) async fn declare(
    client: Arc<Client>,
    slot: OwnedMutexGuard<()>,
    query: &BackendQuery,
    fetch_size: u32,
) -> Result<PgCursor, AdapterError> {
    let mut cursor = PgCursor {
        client,
        slot: Some(slot),
        fetch: format!("FETCH {fetch_size} FROM {CURSOR_NAME}"),
        fetch_size: usize::try_from(fetch_size).unwrap_or(usize::MAX),
        buffer: VecDeque::new(),
        exhausted: false,
        failed: false,
    };

    let begun = cursor
        .client
        .batch_execute("BEGIN TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .await;
    if let Err(e) = begun {
        cursor.rollback().await;
        return Err(classify(&e, "BEGIN_FAILED"));
    }

    // Parameters are rendered as `$n::text::<type>`, so they bind as text.
    let values: Vec<String> = query
        .params
        .iter()
        .map(|p| p.value.to_checkpoint_string())
        .collect();
    let params: Vec<&(dyn ToSql + Sync)> = values
        .iter()
        .map(|v| v as &(dyn ToSql + Sync))
        .collect();

    let declare = format!("DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {}", query.sql);
    let declared = cursor.client.execute(declare.as_str(), &params).await;
    if let Err(e) = declared {
        cursor.rollback().await;
        return Err(classify(&e, "DECLARE_FAILED"));
    }

    tracing::debug!(sql = query.sql.as_str(), params = values.len(), "Declared cursor");
    Ok(cursor)
}

pub struct PgCursor {
    client: Arc<Client>,
    /// Held while the transaction is open; `None` once released.
    slot: Option<OwnedMutexGuard<()>>,
    fetch: String,
    fetch_size: usize,
    buffer: VecDeque<Row>,
    exhausted: bool,
    failed: bool,
}

impl PgCursor {
    /// End the transaction now and free the slot.
    async fn rollback(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        self.buffer.clear();
        if let Err(e) = self.client.batch_execute("ROLLBACK").await {
            tracing::warn!(error = %e, "ROLLBACK of failed cursor open failed");
        }
        drop(slot);
    }

    async fn fill(&mut self) -> Result<(), AdapterError> {
        let rows = self
            .client
            .query(self.fetch.as_str(), &[])
            .await
            .map_err(|e| classify(&e, "FETCH_FAILED"))?;
        self.exhausted = rows.len() < self.fetch_size;
        self.buffer.extend(rows);
        Ok(())
    }
}

impl RowCursor for PgCursor {
    async fn next_row(&mut self) -> Result<Option<Record>, AdapterError> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                let decoded = decode_row(&row);
                self.failed |= decoded.is_err();
                return decoded.map(Some);
            }
            if self.exhausted || self.slot.is_none() {
                return Ok(None);
            }
            if let Err(e) = self.fill().await {
                self.failed = true;
                return Err(e);
            }
        }
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        let Some(slot) = self.slot.take() else {
            return Ok(());
        };
        self.buffer.clear();

        let close = format!("CLOSE {CURSOR_NAME}");
        if let Err(e) = self.client.batch_execute(&close).await {
            tracing::warn!(error = %e, "Cursor CLOSE failed; transaction end will close it");
        }
        let end = if self.failed { "ROLLBACK" } else { "COMMIT" };
        let result = self
            .client
            .batch_execute(end)
            .await
            .map_err(|e| classify(&e, "COMMIT_FAILED"));
        drop(slot);
        result
    }

    fn abandon(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        self.buffer.clear();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let client = Arc::clone(&self.client);
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        tracing::warn!(error = %e, "ROLLBACK of abandoned cursor failed");
                    }
                    drop(slot);
                });
            }
            Err(_) => {
                tracing::warn!("Cursor dropped outside a runtime; transaction stays open until the connection closes");
            }
        }
    }
}

impl Drop for PgCursor {
    fn drop(&mut self) {
        self.abandon();
    }
}
