//! Lazy, forward-only record stream with guaranteed cursor release.
//!
//! A [`RecordStream`] issues its query on the first [`RecordStream::next`]
//! call and releases the backend cursor exactly once: on exhaustion, on
//! the first error, on [`RecordStream::close`], or when dropped.

use std::ops::ControlFlow;

use siphon_types::error::AdapterError;
use siphon_types::record::Record;

use crate::adapter::{Adapter, RowCursor};
use crate::errors::StreamError;
use crate::query::BackendQuery;

/// Owns an open cursor and abandons it on drop unless it was closed.
struct CursorGuard<C: RowCursor>(Option<C>);

impl<C: RowCursor> CursorGuard<C> {
    async fn release(mut self) -> Result<(), AdapterError> {
        let result = match self.0.as_mut() {
            Some(cursor) => cursor.close().await,
            None => Ok(()),
        };
        // Closed (or close attempted to completion): nothing left to abandon.
        self.0 = None;
        result
    }
}

impl<C: RowCursor> Drop for CursorGuard<C> {
    fn drop(&mut self) {
        if let Some(mut cursor) = self.0.take() {
            cursor.abandon();
        }
    }
}

enum Phase<C: RowCursor> {
    Pending(BackendQuery),
    Open(CursorGuard<C>),
    Finished,
}

/// Single-pass sequence of records produced by one backend query.
pub struct RecordStream<'a, A: Adapter> {
    adapter: &'a A,
    phase: Phase<A::Cursor>,
    rows: u64,
}

impl<'a, A: Adapter> RecordStream<'a, A> {
    /// Prepare a stream for `query`. Nothing is sent to the backend yet.
    pub fn open(adapter: &'a A, query: BackendQuery) -> Self {
        Self {
            adapter,
            phase: Phase::Pending(query),
            rows: 0,
        }
    }

    /// Rows yielded so far.
    pub fn rows_yielded(&self) -> u64 {
        self.rows
    }

    /// Whether the backend cursor has been released (or never opened and
    /// the stream has ended).
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished)
    }

    /// Pull the next record.
    ///
    /// Returns `Ok(None)` once the result set is exhausted; every later call
    /// keeps returning `Ok(None)`. The stream cannot be restarted.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Backend`] when the query cannot be executed or
    /// a row cannot be fetched. The stream is released and finished first.
    pub async fn next(&mut self) -> Result<Option<Record>, StreamError> {
        self.phase = match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Pending(query) => {
                tracing::debug!(sql = %query.sql, params = query.params.len(), "Executing read query");
                let cursor = self
                    .adapter
                    .execute_query(&query)
                    .await
                    .map_err(StreamError::Backend)?;
                Phase::Open(CursorGuard(Some(cursor)))
            }
            other => other,
        };

        let Phase::Open(guard) = &mut self.phase else {
            return Ok(None);
        };
        let Some(cursor) = guard.0.as_mut() else {
            return Ok(None);
        };

        match cursor.next_row().await {
            Ok(Some(record)) => {
                self.rows += 1;
                Ok(Some(record))
            }
            Ok(None) => {
                self.release().await;
                Ok(None)
            }
            Err(e) => {
                self.release().await;
                Err(StreamError::Backend(e))
            }
        }
    }

    /// Release the backend cursor now. Idempotent.
    pub async fn close(&mut self) {
        self.release().await;
    }

    async fn release(&mut self) {
        if let Phase::Open(guard) = std::mem::replace(&mut self.phase, Phase::Finished) {
            if let Err(e) = guard.release().await {
                tracing::warn!(rows = self.rows, error = %e, "Failed to close backend cursor");
            }
        }
    }

    /// Feed every record to `f` until it breaks or the stream ends, then
    /// release the cursor on every path.
    ///
    /// Returns the break value, or `None` when the stream was exhausted.
    ///
    /// # Errors
    ///
    /// Propagates [`StreamError`] from [`RecordStream::next`].
    pub async fn scoped<B, F>(mut self, mut f: F) -> Result<Option<B>, StreamError>
    where
        F: FnMut(Record) -> ControlFlow<B>,
    {
        let outcome = loop {
            match self.next().await {
                Ok(Some(record)) => {
                    if let ControlFlow::Break(b) = f(record) {
                        break Ok(Some(b));
                    }
                }
                Ok(None) => break Ok(None),
                Err(e) => break Err(e),
            }
        };
        self.close().await;
        outcome
    }

    /// Drain the stream into a vector.
    ///
    /// # Errors
    ///
    /// Propagates [`StreamError`] from [`RecordStream::next`].
    pub async fn collect(self) -> Result<Vec<Record>, StreamError> {
        let mut rows = Vec::new();
        self.scoped(|record| {
            rows.push(record);
            ControlFlow::<()>::Continue(())
        })
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryAdapter, MemoryTable};
    use serde_json::json;
    use siphon_types::error::AdapterError;

    fn adapter() -> MemoryAdapter {
        MemoryAdapter::new().with_table(
            MemoryTable::new("dataset", "id_and_name")
                .column("id", "INT64")
                .column("name", "STRING")
                .row(json!({"id": 1, "name": "picard"}))
                .row(json!({"id": 2, "name": "crusher"}))
                .row(json!({"id": 3, "name": "vash"})),
        )
    }

    fn select_all() -> BackendQuery {
        BackendQuery::new("SELECT \"id\", \"name\" FROM \"dataset\".\"id_and_name\"")
    }

    #[tokio::test]
    async fn query_is_not_executed_until_first_pull() {
        let adapter = adapter();
        let mut stream = RecordStream::open(&adapter, select_all());
        assert_eq!(adapter.stats().queries_executed(), 0);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first["id"], json!(1));
        assert_eq!(adapter.stats().queries_executed(), 1);
        stream.close().await;
    }

    #[tokio::test]
    async fn exhaustion_releases_once_and_stays_finished() {
        let adapter = adapter();
        let mut stream = RecordStream::open(&adapter, select_all());
        let mut seen = 0;
        while stream.next().await.unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert!(stream.is_finished());
        assert!(stream.next().await.unwrap().is_none());
        stream.close().await;
        assert_eq!(adapter.stats().releases(), 1);
        assert_eq!(adapter.stats().closed(), 1);
    }

    #[tokio::test]
    async fn backend_error_terminates_and_releases() {
        let adapter = adapter().fail_after(
            "id_and_name",
            1,
            AdapterError::query("FETCH_FAILED", "connection reset while fetching"),
        );
        let mut stream = RecordStream::open(&adapter, select_all());
        assert!(stream.next().await.unwrap().is_some());
        let err = stream.next().await.unwrap_err();
        assert!(matches!(err, StreamError::Backend(ref e) if e.code == "FETCH_FAILED"));
        assert!(stream.next().await.unwrap().is_none());
        assert_eq!(adapter.stats().releases(), 1);
    }

    #[tokio::test]
    async fn failed_execution_opens_nothing() {
        let adapter = adapter();
        let mut stream =
            RecordStream::open(&adapter, BackendQuery::new("SELECT * FROM \"missing\""));
        assert!(matches!(
            stream.next().await,
            Err(StreamError::Backend(_))
        ));
        assert!(stream.is_finished());
        assert_eq!(adapter.stats().opened(), 0);
        assert_eq!(adapter.stats().releases(), 0);
    }

    #[tokio::test]
    async fn drop_without_close_abandons_cursor() {
        let adapter = adapter();
        {
            let mut stream = RecordStream::open(&adapter, select_all());
            stream.next().await.unwrap();
        }
        assert_eq!(adapter.stats().abandoned(), 1);
        assert_eq!(adapter.stats().closed(), 0);
        assert_eq!(adapter.stats().releases(), 1);
    }

    #[tokio::test]
    async fn dropping_unopened_stream_touches_nothing() {
        let adapter = adapter();
        drop(RecordStream::open(&adapter, select_all()));
        assert_eq!(adapter.stats().queries_executed(), 0);
        assert_eq!(adapter.stats().releases(), 0);
    }

    #[tokio::test]
    async fn scoped_early_stop_releases() {
        let adapter = adapter();
        let stream = RecordStream::open(&adapter, select_all());
        let found = stream
            .scoped(|record| {
                if record["id"] == json!(2) {
                    ControlFlow::Break(record["name"].clone())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await
            .unwrap();
        assert_eq!(found, Some(json!("crusher")));
        assert_eq!(adapter.stats().closed(), 1);
        assert_eq!(adapter.stats().abandoned(), 0);
    }

    #[tokio::test]
    async fn collect_reads_every_row() {
        let adapter = adapter();
        let rows = RecordStream::open(&adapter, select_all())
            .collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(adapter.stats().releases(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let adapter = adapter();
        let mut stream = RecordStream::open(&adapter, select_all());
        stream.next().await.unwrap();
        stream.close().await;
        stream.close().await;
        drop(stream);
        assert_eq!(adapter.stats().releases(), 1);
    }
}
