//! Siphon extraction core.
//!
//! Plugs backend [`Adapter`]s into a uniform extraction protocol: connection
//! probe, catalog discovery, and full-refresh or cursor-checkpointed
//! incremental reads streamed to a [`RecordConsumer`].

pub mod adapter;
pub mod config;
pub mod consumer;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod probe;
pub mod query;
pub mod stream;
pub mod testing;
pub mod type_map;

// Re-export public API for convenience
pub use adapter::{Adapter, NamespaceCheck, NativeColumn, ProbePlan, RowCursor};
pub use consumer::RecordConsumer;
pub use discovery::discover;
pub use engine::{IncrementalReadEngine, ReadState, ReadSummary, DEFAULT_CHECKPOINT_INTERVAL};
pub use errors::{
    ConfigurationError, ConnectivityError, ConsumerError, DiscoveryError, ErrorKind, ReadError,
    StreamError,
};
pub use probe::{probe, ProbeCheck, ProbeReport};
pub use query::{build_read_query, BackendQuery, QueryParam};
pub use stream::RecordStream;
