//! Stream read orchestration: full refresh and cursor-checkpointed
//! incremental extraction.
//!
//! A read moves through [`ReadState`]:
//!
//! ```text
//! Init -> FullRefresh | Incremental -> Draining -> Done
//!   \____________________\_______________\______-> Failed
//! ```
//!
//! `Init` loads the persisted checkpoint and validates the read spec; nothing
//! reaches the backend before validation passes. While draining, every
//! record is delivered to the [`RecordConsumer`] before its cursor value
//! counts towards the next checkpoint, and checkpoints are persisted to
//! the state store before the checkpoint message is sent.
//!
//! A mid-stream checkpoint only ever names a cursor value that a strictly
//! greater one has already followed, so resuming with `> checkpoint` never
//! skips an undelivered row that ties with it.

mod checkpoint;
mod validate;

use std::time::Instant;

use serde::Serialize;
use siphon_state::{StateBackend, StateError};
use siphon_types::cursor::CursorValue;
use siphon_types::record::{CheckpointMessage, ReadMessage, RecordMessage};
use siphon_types::state::{PipelineId, RunStats, RunStatus, StreamName};
use siphon_types::stream::{StreamReadSpec, SyncMode};

use crate::adapter::Adapter;
use crate::consumer::RecordConsumer;
use crate::errors::{ReadError, StreamError};
use crate::query::{build_read_query, BackendQuery};
use crate::stream::RecordStream;

use self::checkpoint::{persist_checkpoint, CheckpointTracker};
pub use self::validate::{resume_cursor, validate_read_spec};

/// Records between periodic checkpoints unless configured otherwise.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1_000;

/// Lifecycle of one stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadState {
    Init,
    FullRefresh,
    Incremental,
    Draining,
    Done,
    Failed,
}

impl ReadState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::FullRefresh => "full_refresh",
            Self::Incremental => "incremental",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ReadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful stream read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadSummary {
    pub stream: String,
    pub mode: SyncMode,
    pub state: ReadState,
    pub records_emitted: u64,
    pub checkpoints_emitted: u64,
    /// Checkpoint emitted when the read finished, if any.
    pub final_checkpoint: Option<CursorValue>,
    pub duration_ms: u64,
}

/// Why draining stopped early.
enum Halt {
    Stream(StreamError),
    State(StateError),
}

impl From<StreamError> for Halt {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

/// Per-read bookkeeping shared by the drain loop and checkpoint emission.
struct ReadContext<'s> {
    stream: &'s str,
    key: StreamName,
    state: ReadState,
    records: u64,
    checkpoints: u64,
}

impl ReadContext<'_> {
    fn transition(&mut self, next: ReadState) {
        tracing::debug!(
            stream = self.stream,
            from = self.state.as_str(),
            to = next.as_str(),
            records = self.records,
            "Read state transition"
        );
        self.state = next;
    }
}

/// Drives reads for one pipeline against one adapter and state store.
pub struct IncrementalReadEngine<'a, A: Adapter> {
    adapter: &'a A,
    state: &'a dyn StateBackend,
    pipeline: PipelineId,
    checkpoint_interval: u64,
}

impl<'a, A: Adapter> IncrementalReadEngine<'a, A> {
    pub fn new(adapter: &'a A, state: &'a dyn StateBackend, pipeline: PipelineId) -> Self {
        Self {
            adapter,
            state,
            pipeline,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }

    /// Emit a checkpoint every `interval` records (minimum 1).
    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    pub fn pipeline(&self) -> &PipelineId {
        &self.pipeline
    }

    /// Read one stream, delivering records and checkpoints to `consumer`.
    ///
    /// # Errors
    ///
    /// - [`ReadError::Configuration`] when the read spec or its stored checkpoint
    ///   is invalid; no query has been issued.
    /// - [`ReadError::Stream`] when the backend, a cursor value or the
    ///   consumer fails mid-stream. Checkpoints emitted before the failure
    ///   stay valid, and the best checkpoint covering already-delivered
    ///   records is emitted before returning.
    /// - [`ReadError::State`] when the state store fails.
    pub async fn read<C: RecordConsumer>(
        &self,
        spec: &StreamReadSpec,
        consumer: &mut C,
    ) -> Result<ReadSummary, ReadError> {
        let started = Instant::now();
        let stream = spec.stream_name();
        let mut ctx = ReadContext {
            stream: &stream,
            key: StreamName::new(stream.clone()),
            state: ReadState::Init,
            records: 0,
            checkpoints: 0,
        };

        let (query, mut tracker) = self.prepare(spec, &ctx)?;
        let run_id = self
            .state
            .start_run(&self.pipeline, &ctx.key)
            .map_err(|source| state_error(&stream, source))?;

        ctx.transition(match spec.mode {
            SyncMode::FullRefresh => ReadState::FullRefresh,
            SyncMode::Incremental => ReadState::Incremental,
        });
        let resume_from = tracker
            .as_ref()
            .and_then(CheckpointTracker::last_emitted)
            .map(ToString::to_string);
        tracing::info!(
            pipeline = self.pipeline.as_str(),
            stream = stream.as_str(),
            mode = spec.mode.as_str(),
            cursor_field = tracker.as_ref().map_or("", CheckpointTracker::field_name),
            resume_from = resume_from.as_deref().unwrap_or(""),
            "Starting stream read"
        );

        let outcome = self.drain(query, tracker.as_mut(), &mut ctx, consumer).await;

        // Every incremental run ends on a checkpoint, repeating the resume
        // point when nothing newer was read.
        let force_final = ctx.checkpoints == 0;
        let outcome = match outcome {
            Ok(()) => match tracker.as_mut() {
                Some(t) => self
                    .emit_checkpoint(t, &mut ctx, consumer, true, force_final)
                    .await
                    .map(|_| ()),
                None => Ok(()),
            },
            Err(halt) => {
                if let Some(t) = tracker.as_mut() {
                    // Nulls sort last, so every non-null row was delivered.
                    let complete = matches!(halt, Halt::Stream(StreamError::NullCursor { .. }));
                    self.salvage_checkpoint(t, &mut ctx, consumer, complete).await;
                }
                Err(halt)
            }
        };

        match outcome {
            Ok(()) => {
                ctx.transition(ReadState::Done);
                self.finish_run(run_id, &ctx, RunStatus::Completed, None);
                let final_checkpoint = tracker
                    .as_ref()
                    .and_then(CheckpointTracker::last_emitted)
                    .cloned();
                let summary = ReadSummary {
                    stream: stream.clone(),
                    mode: spec.mode,
                    state: ctx.state,
                    records_emitted: ctx.records,
                    checkpoints_emitted: ctx.checkpoints,
                    final_checkpoint,
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                };
                tracing::info!(
                    stream = stream.as_str(),
                    records = summary.records_emitted,
                    checkpoints = summary.checkpoints_emitted,
                    final_checkpoint = %summary
                        .final_checkpoint
                        .as_ref()
                        .map_or_else(String::new, ToString::to_string),
                    duration_ms = summary.duration_ms,
                    "Stream read complete"
                );
                Ok(summary)
            }
            Err(halt) => {
                ctx.transition(ReadState::Failed);
                let error = match halt {
                    Halt::Stream(source) => ReadError::Stream {
                        stream: stream.clone(),
                        records_emitted: ctx.records,
                        last_checkpoint: tracker
                            .as_ref()
                            .and_then(CheckpointTracker::last_emitted)
                            .cloned(),
                        state: ctx.state,
                        source,
                    },
                    Halt::State(source) => state_error(&stream, source),
                };
                self.finish_run(run_id, &ctx, RunStatus::Failed, Some(error.to_string()));
                tracing::error!(
                    stream = stream.as_str(),
                    records = ctx.records,
                    error = %error,
                    "Stream read failed"
                );
                Err(error)
            }
        }
    }

    /// Read every spec in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`ReadError`]; later streams are not read.
    pub async fn read_all<C: RecordConsumer>(
        &self,
        specs: &[StreamReadSpec],
        consumer: &mut C,
    ) -> Result<Vec<ReadSummary>, ReadError> {
        let mut summaries = Vec::with_capacity(specs.len());
        for spec in specs {
            summaries.push(self.read(spec, consumer).await?);
        }
        Ok(summaries)
    }

    /// `Init`: validate, resolve the resume point, and build the query.
    fn prepare(
        &self,
        spec: &StreamReadSpec,
        ctx: &ReadContext<'_>,
    ) -> Result<(BackendQuery, Option<CheckpointTracker>), ReadError> {
        let cursor_type = validate_read_spec(spec)?;
        let (Some(cursor_type), Some(cursor)) = (cursor_type, spec.cursor.as_ref()) else {
            return Ok((build_read_query(self.adapter, spec)?, None));
        };

        let stored = self
            .state
            .load_checkpoint(&self.pipeline, &ctx.key)
            .map_err(|source| state_error(ctx.stream, source))?;
        let cursor = resume_cursor(ctx.stream, cursor, stored.as_ref())?;

        let mut resolved = spec.clone();
        resolved.cursor = Some(cursor.clone());
        let query = build_read_query(self.adapter, &resolved)?;

        let tracker = CheckpointTracker::new(
            cursor.field_name,
            cursor.field_type,
            cursor_type,
            self.checkpoint_interval,
            cursor.checkpoint,
        );
        Ok((query, Some(tracker)))
    }

    /// `Draining`: pull every record, deliver it, and checkpoint periodically.
    async fn drain<C: RecordConsumer>(
        &self,
        query: BackendQuery,
        mut tracker: Option<&mut CheckpointTracker>,
        ctx: &mut ReadContext<'_>,
        consumer: &mut C,
    ) -> Result<(), Halt> {
        let mut rows = RecordStream::open(self.adapter, query);
        ctx.transition(ReadState::Draining);

        let result = loop {
            let record = match rows.next().await {
                Ok(Some(record)) => record,
                Ok(None) => break Ok(()),
                Err(e) => break Err(Halt::Stream(e)),
            };

            let value = match tracker.as_deref() {
                Some(t) => match t.extract(&record, ctx.records) {
                    Ok(v) => Some(v),
                    Err(e) => break Err(Halt::Stream(e)),
                },
                None => None,
            };

            let message = ReadMessage::Record(RecordMessage {
                stream: ctx.stream.to_string(),
                data: record,
            });
            if let Err(e) = consumer.accept(message).await {
                break Err(Halt::Stream(e.into()));
            }
            ctx.records += 1;

            if let (Some(t), Some(v)) = (tracker.as_deref_mut(), value) {
                if let Err(e) = t.observe(v) {
                    break Err(Halt::Stream(e));
                }
                if t.due() {
                    if let Err(halt) = self.emit_checkpoint(t, ctx, consumer, false, false).await {
                        break Err(halt);
                    }
                }
            }
        };

        rows.close().await;
        result
    }

    /// Persist then send a checkpoint if the tracker has one to offer.
    ///
    /// `complete` is set once no undelivered row can share the running
    /// maximum; see [`CheckpointTracker::candidate`].
    async fn emit_checkpoint<C: RecordConsumer>(
        &self,
        tracker: &mut CheckpointTracker,
        ctx: &mut ReadContext<'_>,
        consumer: &mut C,
        complete: bool,
        force: bool,
    ) -> Result<bool, Halt> {
        let Some(value) = tracker.candidate(complete, force)? else {
            return Ok(false);
        };
        let cursor = tracker.cursor_at(value.clone());
        persist_checkpoint(self.state, &self.pipeline, &ctx.key, &cursor).map_err(Halt::State)?;

        let message = ReadMessage::Checkpoint(CheckpointMessage {
            stream: ctx.stream.to_string(),
            cursor,
            records_emitted: ctx.records,
        });
        consumer
            .accept(message)
            .await
            .map_err(|e| Halt::Stream(e.into()))?;

        tracker.mark_emitted(value);
        ctx.checkpoints += 1;
        Ok(true)
    }

    /// Best-effort checkpoint for records delivered before a failure.
    async fn salvage_checkpoint<C: RecordConsumer>(
        &self,
        tracker: &mut CheckpointTracker,
        ctx: &mut ReadContext<'_>,
        consumer: &mut C,
        complete: bool,
    ) {
        match self.emit_checkpoint(tracker, ctx, consumer, complete, false).await {
            Ok(true) => tracing::info!(
                stream = ctx.stream,
                records = ctx.records,
                "Emitted checkpoint for records delivered before failure"
            ),
            Ok(false) => {}
            Err(Halt::Stream(e)) => {
                tracing::warn!(stream = ctx.stream, error = %e, "Could not emit checkpoint after failure");
            }
            Err(Halt::State(e)) => {
                tracing::warn!(stream = ctx.stream, error = %e, "Could not persist checkpoint after failure");
            }
        }
    }

    fn finish_run(&self, run_id: i64, ctx: &ReadContext<'_>, status: RunStatus, error: Option<String>) {
        let stats = RunStats {
            records_read: ctx.records,
            checkpoints_emitted: ctx.checkpoints,
            error_message: error,
        };
        if let Err(e) = self.state.complete_run(run_id, status, &stats) {
            tracing::warn!(stream = ctx.stream, run_id, error = %e, "Failed to record run completion");
        }
    }
}

fn state_error(stream: &str, source: StateError) -> ReadError {
    ReadError::State {
        stream: stream.to_string(),
        source,
    }
}
