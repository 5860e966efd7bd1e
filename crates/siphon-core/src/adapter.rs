//! Backend capability set implemented by every adapter.
//!
//! The core never talks to a backend directly. Discovery, probing, and
//! reads go through [`Adapter`]; rows come back through the adapter's
//! [`RowCursor`]. Adapters are expected to normalize row values to the
//! field's [`CommonType`] before handing them out.

use std::collections::{HashMap, HashSet};

use siphon_types::catalog::{TableInfo, TableKey};
use siphon_types::common::CommonType;
use siphon_types::error::AdapterError;
use siphon_types::record::Record;

use crate::query::BackendQuery;

/// Column as reported by the backend, before type mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeColumn {
    pub name: String,
    pub native_type: String,
}

impl NativeColumn {
    pub fn new(name: impl Into<String>, native_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_type: native_type.into(),
        }
    }
}

/// Queries issued by the connection probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbePlan {
    /// Trivial query that must return at least one row.
    pub connectivity: BackendQuery,
    /// Zero-row existence check scoped to the configured namespace.
    pub namespace: Option<NamespaceCheck>,
}

/// Scoped privilege check: must run without error and return no rows.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceCheck {
    pub namespace: String,
    pub query: BackendQuery,
}

impl Default for ProbePlan {
    fn default() -> Self {
        Self {
            connectivity: BackendQuery::new("SELECT 1"),
            namespace: None,
        }
    }
}

/// Backend-specific capabilities the extraction core depends on.
///
/// Query execution must be lazy with respect to row delivery: the returned
/// cursor pulls rows on demand and must not materialize the result set.
#[allow(async_fn_in_trait)]
pub trait Adapter {
    type Cursor: RowCursor;

    /// Execute `query`, binding its parameters with their declared native types.
    async fn execute_query(&self, query: &BackendQuery) -> Result<Self::Cursor, AdapterError>;

    async fn list_namespaces(&self) -> Result<Vec<String>, AdapterError>;

    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>, AdapterError>;

    /// Columns of `namespace.table` in ordinal order.
    async fn get_fields(
        &self,
        namespace: &str,
        table: &str,
    ) -> Result<Vec<NativeColumn>, AdapterError>;

    /// Primary keys keyed by [`TableInfo::key`]. Tables without an entry
    /// have no known key.
    async fn primary_keys(
        &self,
        tables: &[TableInfo],
    ) -> Result<HashMap<TableKey, Vec<String>>, AdapterError> {
        let _ = tables;
        Ok(HashMap::new())
    }

    /// Quote an identifier for safe inclusion in query text.
    fn quote_identifier(&self, name: &str) -> String;

    /// Map a native type name to a common type, `None` when unsupported.
    fn map_native_type(&self, native_type: &str) -> Option<CommonType>;

    /// Positional placeholder for the 1-based parameter `index`, bound as
    /// `native_type`.
    fn placeholder(&self, index: usize, native_type: &str) -> String {
        let _ = native_type;
        format!("${index}")
    }

    /// System namespaces skipped by unfiltered discovery.
    fn excluded_namespaces(&self) -> HashSet<String> {
        HashSet::new()
    }

    fn probe_plan(&self) -> ProbePlan {
        ProbePlan::default()
    }
}

/// Forward-only handle over a backend result set.
#[allow(async_fn_in_trait)]
pub trait RowCursor {
    /// Next row, or `None` once the result set is exhausted.
    async fn next_row(&mut self) -> Result<Option<Record>, AdapterError>;

    /// Release the backend resources held by this cursor.
    async fn close(&mut self) -> Result<(), AdapterError>;

    /// Synchronous best-effort release for a cursor dropped before
    /// [`close`](RowCursor::close) completed.
    fn abandon(&mut self) {}
}
