//! In-memory [`Adapter`] for exercising the core without a backend.
//!
//! [`MemoryAdapter`] understands exactly the queries this crate generates:
//! the default probe, the namespace check from its own probe plan, and
//! read queries from [`build_read_query`](crate::query::build_read_query)
//! quoted with [`ansi_quote`]. It counts executed queries and cursor
//! releases, and can inject failures or stall mid-stream.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;
use serde_json::Value;
use siphon_types::catalog::{TableInfo, TableKey};
use siphon_types::common::CommonType;
use siphon_types::cursor::CursorValue;
use siphon_types::error::AdapterError;
use siphon_types::record::Record;

use crate::adapter::{Adapter, NamespaceCheck, NativeColumn, ProbePlan, RowCursor};
use crate::query::{ansi_quote, BackendQuery};

static READ_QUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^SELECT (?P<cols>.+?) FROM (?P<table>"(?:[^"]|"")*"(?:\."(?:[^"]|"")*")?)(?: WHERE (?P<filter>"(?:[^"]|"")*") > \$1)?(?: ORDER BY (?P<order>"(?:[^"]|"")*"))?$"#,
    )
    .expect("valid read query regex")
});

static NAMESPACE_CHECK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^SELECT 1 FROM (?P<ns>"(?:[^"]|"")*")\.INFORMATION_SCHEMA\.TABLES WHERE 1 = 0$"#)
        .expect("valid namespace check regex")
});

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Table definition and contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    namespace: String,
    name: String,
    columns: Vec<NativeColumn>,
    primary_key: Vec<String>,
    rows: Vec<Record>,
}

impl MemoryTable {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>, native_type: impl Into<String>) -> Self {
        self.columns.push(NativeColumn::new(name, native_type));
        self
    }

    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Append a row given as a JSON object. Non-object values add an empty row.
    #[must_use]
    pub fn row(mut self, value: Value) -> Self {
        self.rows.push(into_record(value));
        self
    }

}

fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Shared counters observed by tests.
#[derive(Debug, Default)]
pub struct MemoryStats {
    executed: Mutex<Vec<BackendQuery>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    abandoned: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
}

impl MemoryStats {
    pub fn queries_executed(&self) -> usize {
        self.executed().len()
    }

    /// Every query passed to `execute_query`, in order.
    pub fn executed(&self) -> Vec<BackendQuery> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Cursors released by either path.
    pub fn releases(&self) -> usize {
        self.closed() + self.abandoned()
    }

    /// Highest number of cursors open at the same time.
    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    fn record_query(&self, query: &BackendQuery) {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.clone());
    }

    fn record_open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
    }

    fn record_release(&self, counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
        self.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Fault {
    FailAfter(usize, AdapterError),
    StallAfter(usize),
}

/// In-memory adapter with BigQuery-style native type names.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    tables: Vec<MemoryTable>,
    faults: HashMap<String, Fault>,
    unreachable: Option<AdapterError>,
    denied: HashSet<String>,
    excluded: HashSet<String>,
    restricted_namespace: Option<String>,
    stats: Arc<MemoryStats>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(mut self, table: MemoryTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Cursors over `table` yield `rows` rows, then fail with `error`.
    #[must_use]
    pub fn fail_after(mut self, table: &str, rows: usize, error: AdapterError) -> Self {
        self.faults
            .insert(table.to_string(), Fault::FailAfter(rows, error));
        self
    }

    /// Cursors over `table` yield `rows` rows, then never return.
    #[must_use]
    pub fn stall_after(mut self, table: &str, rows: usize) -> Self {
        self.faults.insert(table.to_string(), Fault::StallAfter(rows));
        self
    }

    /// Every backend call fails with `error`.
    #[must_use]
    pub fn unreachable(mut self, error: AdapterError) -> Self {
        self.unreachable = Some(error);
        self
    }

    /// Queries touching `namespace` fail with a permission error.
    #[must_use]
    pub fn deny_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.denied.insert(namespace.into());
        self
    }

    /// Namespace skipped by unfiltered discovery.
    #[must_use]
    pub fn exclude_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.excluded.insert(namespace.into());
        self
    }

    /// Add a namespace-scoped check to the probe plan.
    #[must_use]
    pub fn restrict_to_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.restricted_namespace = Some(namespace.into());
        self
    }

    /// Append a row to an existing table.
    ///
    /// # Errors
    ///
    /// Returns a query error when no table is named `table`.
    pub fn append_row(&mut self, table: &str, value: Value) -> Result<(), AdapterError> {
        let target = self
            .tables
            .iter_mut()
            .find(|t| t.name == table)
            .ok_or_else(|| AdapterError::query("TABLE_NOT_FOUND", format!("table '{table}' not found")))?;
        target.rows.push(into_record(value));
        Ok(())
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        Arc::clone(&self.stats)
    }

    fn reachable(&self) -> Result<(), AdapterError> {
        match &self.unreachable {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn check_namespace(&self, namespace: &str) -> Result<(), AdapterError> {
        if self.denied.contains(namespace) {
            return Err(AdapterError::permission(
                "ACCESS_DENIED",
                format!("access denied to namespace '{namespace}'"),
            ));
        }
        Ok(())
    }

    fn find_table(&self, namespace: &str, name: &str) -> Result<&MemoryTable, AdapterError> {
        self.check_namespace(namespace)?;
        self.tables
            .iter()
            .find(|t| t.namespace == namespace && t.name == name)
            .ok_or_else(|| {
                AdapterError::query("TABLE_NOT_FOUND", format!("table '{namespace}.{name}' not found"))
            })
    }

    fn cursor(&self, rows: Vec<Record>, table: &str) -> MemoryCursor {
        self.stats.record_open();
        MemoryCursor {
            rows: rows.into_iter(),
            yielded: 0,
            fault: self.faults.get(table).cloned(),
            stats: Arc::clone(&self.stats),
            released: false,
        }
    }

    fn run_read(&self, query: &BackendQuery) -> Result<MemoryCursor, AdapterError> {
        let caps = READ_QUERY_RE
            .captures(&query.sql)
            .ok_or_else(|| AdapterError::query("SYNTAX", format!("unsupported query: {}", query.sql)))?;

        let columns = unquote_all(&caps["cols"]);
        let table_path = unquote_all(&caps["table"]);
        let (namespace, name) = match table_path.as_slice() {
            [name] => ("", name.as_str()),
            [ns, name] => (ns.as_str(), name.as_str()),
            _ => return Err(AdapterError::query("SYNTAX", "bad table reference")),
        };
        let table = self.find_table(namespace, name)?;

        let mut rows: Vec<Record> = table.rows.clone();

        if let Some(filter) = caps.name("filter") {
            let column = unquote_all(filter.as_str()).join("");
            let param = query
                .params
                .first()
                .ok_or_else(|| AdapterError::query("PARAM_MISSING", "no value bound for $1"))?;
            let cursor_type = param.value.cursor_type();
            // NULL > x is never true.
            rows.retain(|row| {
                row.get(&column)
                    .and_then(|v| CursorValue::from_json(cursor_type, v).ok())
                    .and_then(|v| v.compare(&param.value).ok())
                    .is_some_and(std::cmp::Ordering::is_gt)
            });
        }

        if let Some(order) = caps.name("order") {
            let column = unquote_all(order.as_str()).join("");
            let key = |row: &Record| -> Option<Value> { row.get(&column).filter(|v| !v.is_null()).cloned() };
            // Nulls sort last.
            rows.sort_by(|a, b| match (key(a), key(b)) {
                (Some(x), Some(y)) => compare_json(&x, &y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
        }

        let projected = rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect::<Record>()
            })
            .collect();
        Ok(self.cursor(projected, name))
    }
}

impl Adapter for MemoryAdapter {
    type Cursor = MemoryCursor;

    async fn execute_query(&self, query: &BackendQuery) -> Result<MemoryCursor, AdapterError> {
        self.reachable()?;
        self.stats.record_query(query);

        if query.sql == "SELECT 1" {
            let mut row = Record::new();
            row.insert("?column?".into(), Value::from(1));
            return Ok(self.cursor(vec![row], ""));
        }
        if let Some(caps) = NAMESPACE_CHECK_RE.captures(&query.sql) {
            let namespace = unquote_all(&caps["ns"]).join("");
            self.check_namespace(&namespace)?;
            if !self.tables.iter().any(|t| t.namespace == namespace) {
                return Err(AdapterError::query(
                    "NAMESPACE_NOT_FOUND",
                    format!("namespace '{namespace}' not found"),
                ));
            }
            return Ok(self.cursor(Vec::new(), ""));
        }
        self.run_read(query)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, AdapterError> {
        self.reachable()?;
        let mut seen = Vec::new();
        for table in &self.tables {
            if !seen.contains(&table.namespace) {
                seen.push(table.namespace.clone());
            }
        }
        Ok(seen)
    }

    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>, AdapterError> {
        self.reachable()?;
        self.check_namespace(namespace)?;
        Ok(self
            .tables
            .iter()
            .filter(|t| t.namespace == namespace)
            .map(|t| t.name.clone())
            .collect())
    }

    async fn get_fields(
        &self,
        namespace: &str,
        table: &str,
    ) -> Result<Vec<NativeColumn>, AdapterError> {
        self.reachable()?;
        Ok(self.find_table(namespace, table)?.columns.clone())
    }

    async fn primary_keys(
        &self,
        tables: &[TableInfo],
    ) -> Result<HashMap<TableKey, Vec<String>>, AdapterError> {
        self.reachable()?;
        let wanted: HashSet<TableKey> = tables.iter().map(TableInfo::key).collect();
        Ok(self
            .tables
            .iter()
            .map(|t| ((t.namespace.clone(), t.name.clone()), &t.primary_key))
            .filter(|(key, pk)| !pk.is_empty() && wanted.contains(key))
            .map(|(key, pk)| (key, pk.clone()))
            .collect())
    }

    fn quote_identifier(&self, name: &str) -> String {
        ansi_quote(name)
    }

    fn map_native_type(&self, native_type: &str) -> Option<CommonType> {
        match native_type.to_ascii_uppercase().as_str() {
            "INT64" | "INTEGER" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => Some(CommonType::Number),
            "STRING" | "BYTES" | "TIME" => Some(CommonType::String),
            "BOOL" | "BOOLEAN" => Some(CommonType::Boolean),
            "DATE" | "DATETIME" | "TIMESTAMP" => Some(CommonType::Temporal),
            "ARRAY" => Some(CommonType::Array),
            "STRUCT" | "JSON" => Some(CommonType::Object),
            _ => None,
        }
    }

    fn excluded_namespaces(&self) -> HashSet<String> {
        self.excluded.clone()
    }

    fn probe_plan(&self) -> ProbePlan {
        ProbePlan {
            namespace: self.restricted_namespace.as_ref().map(|ns| NamespaceCheck {
                namespace: ns.clone(),
                query: BackendQuery::new(format!(
                    "SELECT 1 FROM {}.INFORMATION_SCHEMA.TABLES WHERE 1 = 0",
                    ansi_quote(ns)
                )),
            }),
            ..ProbePlan::default()
        }
    }
}

/// Cursor over a materialized in-memory result.
#[derive(Debug)]
pub struct MemoryCursor {
    rows: std::vec::IntoIter<Record>,
    yielded: usize,
    fault: Option<Fault>,
    stats: Arc<MemoryStats>,
    released: bool,
}

impl RowCursor for MemoryCursor {
    async fn next_row(&mut self) -> Result<Option<Record>, AdapterError> {
        match &self.fault {
            Some(Fault::FailAfter(n, e)) if *n == self.yielded => return Err(e.clone()),
            Some(Fault::StallAfter(n)) if *n == self.yielded => {
                std::future::pending::<()>().await;
            }
            _ => {}
        }
        let row = self.rows.next();
        if row.is_some() {
            self.yielded += 1;
        }
        Ok(row)
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        if !self.released {
            self.released = true;
            self.stats.record_release(&self.stats.closed);
        }
        Ok(())
    }

    fn abandon(&mut self) {
        if !self.released {
            self.released = true;
            self.stats.record_release(&self.stats.abandoned);
        }
    }
}

/// Extract every double-quoted identifier from `text`, in order.
fn unquote_all(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    ident.push('"');
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        out.push(ident);
    }
    out
}

fn compare_json(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unquote_handles_escaped_quotes() {
        assert_eq!(
            unquote_all("\"a\", \"b\"\"c\""),
            vec!["a".to_string(), "b\"c".to_string()]
        );
        assert_eq!(unquote_all("\"ns\".\"t\""), vec!["ns", "t"]);
    }

    #[tokio::test]
    async fn read_query_filters_orders_and_projects() {
        let adapter = MemoryAdapter::new().with_table(
            MemoryTable::new("d", "t")
                .column("id", "INT64")
                .column("name", "STRING")
                .row(json!({"id": 3, "name": "c"}))
                .row(json!({"id": 1, "name": "a"}))
                .row(json!({"id": 2, "name": "b"})),
        );
        let query = BackendQuery::new("SELECT \"name\" FROM \"d\".\"t\" WHERE \"id\" > $1 ORDER BY \"id\"")
            .with_param(CursorValue::Int64 { value: 1 }, "INT64");
        let mut cursor = adapter.execute_query(&query).await.unwrap();
        let mut names = Vec::new();
        while let Some(row) = cursor.next_row().await.unwrap() {
            assert_eq!(row.len(), 1);
            names.push(row["name"].clone());
        }
        // Ordered by id, which is not projected here.
        assert_eq!(names, vec![json!("b"), json!("c")]);
        cursor.close().await.unwrap();
        assert_eq!(adapter.stats().closed(), 1);
    }

    #[tokio::test]
    async fn unreachable_fails_every_call() {
        let adapter =
            MemoryAdapter::new().unreachable(AdapterError::connection("REFUSED", "connection refused"));
        assert!(adapter.list_namespaces().await.is_err());
        assert!(adapter
            .execute_query(&BackendQuery::new("SELECT 1"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn close_after_abandon_counts_once() {
        let adapter = MemoryAdapter::new();
        let mut cursor = adapter
            .execute_query(&BackendQuery::new("SELECT 1"))
            .await
            .unwrap();
        cursor.abandon();
        cursor.close().await.unwrap();
        assert_eq!(adapter.stats().releases(), 1);
        assert_eq!(adapter.stats().max_open(), 1);
    }
}
