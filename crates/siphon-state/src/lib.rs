//! Checkpoint persistence for the Siphon extraction core.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for stream checkpoints and read-run history.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;
