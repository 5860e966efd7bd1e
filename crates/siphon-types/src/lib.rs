//! Shared Siphon catalog, cursor, record, and error model types.
//!
//! This crate is dependency-boundary-safe for the extraction core, the
//! state backends, and backend adapters alike.

pub mod catalog;
pub mod common;
pub mod cursor;
pub mod error;
pub mod record;
pub mod state;
pub mod stream;
