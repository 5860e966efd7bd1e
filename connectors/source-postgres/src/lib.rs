//! PostgreSQL source adapter for Siphon.
//!
//! Discovery reads `information_schema`; reads stream through server-side
//! cursors inside read-only `REPEATABLE READ` transactions, with checkpoint
//! values bound as parameters.

mod adapter;
mod client;
pub mod config;
mod cursor;
pub mod types;

pub use adapter::PostgresAdapter;
pub use config::Config;
pub use cursor::PgCursor;
