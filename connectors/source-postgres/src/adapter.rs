//! [`Adapter`] implementation over a single `tokio-postgres` connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use siphon_core::{Adapter, BackendQuery, NamespaceCheck, NativeColumn, ProbePlan};
use siphon_types::catalog::{TableInfo, TableKey};
use siphon_types::common::CommonType;
use siphon_types::cursor::CursorValue;
use siphon_types::error::AdapterError;
use tokio::sync::Mutex;
use tokio_postgres::Client;

use crate::client::{classify, connect};
use crate::config::Config;
use crate::cursor::{declare, PgCursor};
use crate::types::{common_type, is_plain_type_name};

const SYSTEM_SCHEMAS: [&str; 3] = ["pg_catalog", "information_schema", "pg_toast"];

/// PostgreSQL source adapter.
///
/// Reads share one connection, so at most one cursor is open at a time;
/// opening another waits until the previous one is released.
pub struct PostgresAdapter {
    client: Arc<Client>,
    config: Config,
    cursor_slot: Arc<Mutex<()>>,
}

impl PostgresAdapter {
    /// Validate `config` and connect.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_CONFIG` for a bad config, or the classified
    /// connection failure.
    pub async fn connect(config: Config) -> Result<Self, AdapterError> {
        config.validate()?;
        let client = connect(&config).await?;
        Ok(Self {
            client: Arc::new(client),
            config,
            cursor_slot: Arc::new(Mutex::new(())),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Adapter for PostgresAdapter {
    type Cursor = PgCursor;

    async fn execute_query(&self, query: &BackendQuery) -> Result<PgCursor, AdapterError> {
        let slot = Arc::clone(&self.cursor_slot).lock_owned().await;
        declare(Arc::clone(&self.client), slot, query, self.config.fetch_size).await
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, AdapterError> {
        let rows = self
            .client
            .query(
                "SELECT schema_name FROM information_schema.schemata ORDER BY schema_name",
                &[],
            )
            .await
            .map_err(|e| classify(&e, "LIST_SCHEMAS_FAILED"))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>, AdapterError> {
        let rows = self
            .client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[&namespace],
            )
            .await
            .map_err(|e| classify(&e, "LIST_TABLES_FAILED"))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn get_fields(
        &self,
        namespace: &str,
        table: &str,
    ) -> Result<Vec<NativeColumn>, AdapterError> {
        let rows = self
            .client
            .query(
                "SELECT column_name, udt_name FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[&namespace, &table],
            )
            .await
            .map_err(|e| classify(&e, "LIST_COLUMNS_FAILED"))?;
        if rows.is_empty() {
            return Err(AdapterError::query(
                "TABLE_NOT_FOUND",
                format!("Table '{namespace}.{table}' not found or has no columns"),
            ));
        }
        Ok(rows
            .iter()
            .map(|row| NativeColumn::new(row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }

    async fn primary_keys(
        &self,
        tables: &[TableInfo],
    ) -> Result<HashMap<TableKey, Vec<String>>, AdapterError> {
        let mut schemas: Vec<&str> = tables.iter().map(|t| t.namespace.as_str()).collect();
        schemas.sort_unstable();
        schemas.dedup();
        if schemas.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = self
            .client
            .query(
                "SELECT kcu.table_schema, kcu.table_name, kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_schema = kcu.constraint_schema \
                  AND tc.constraint_name = kcu.constraint_name \
                  AND tc.table_name = kcu.table_name \
                 WHERE tc.constraint_type = 'PRIMARY KEY' \
                   AND kcu.table_schema = ANY($1) \
                 ORDER BY kcu.table_schema, kcu.table_name, kcu.ordinal_position",
                &[&schemas],
            )
            .await
            .map_err(|e| classify(&e, "LIST_PRIMARY_KEYS_FAILED"))?;

        let wanted: HashSet<TableKey> = tables.iter().map(TableInfo::key).collect();
        let mut keys: HashMap<TableKey, Vec<String>> = HashMap::new();
        for row in &rows {
            let key: TableKey = (row.get(0), row.get(1));
            if wanted.contains(&key) {
                keys.entry(key).or_default().push(row.get(2));
            }
        }
        Ok(keys)
    }

    fn quote_identifier(&self, name: &str) -> String {
        pg_escape::quote_identifier(name).into_owned()
    }

    fn map_native_type(&self, native_type: &str) -> Option<CommonType> {
        common_type(native_type)
    }

    fn placeholder(&self, index: usize, native_type: &str) -> String {
        render_placeholder(index, native_type)
    }

    fn excluded_namespaces(&self) -> HashSet<String> {
        SYSTEM_SCHEMAS.iter().map(ToString::to_string).collect()
    }

    fn probe_plan(&self) -> ProbePlan {
        probe_plan_for(self.config.schema.as_deref())
    }
}

/// Placeholder bound as text and cast to the column type server-side.
fn render_placeholder(index: usize, native_type: &str) -> String {
    if is_plain_type_name(native_type) {
        format!("${index}::text::{native_type}")
    } else {
        format!("${index}::text")
    }
}

fn probe_plan_for(schema: Option<&str>) -> ProbePlan {
    ProbePlan {
        namespace: schema.map(|schema| NamespaceCheck {
            namespace: schema.to_string(),
            // Errors for a missing schema, returns a row without USAGE.
            query: BackendQuery::new(
                "SELECT 1 WHERE NOT has_schema_privilege($1::text, 'USAGE')",
            )
            .with_param(
                CursorValue::Utf8 {
                    value: schema.to_string(),
                },
                "text",
            ),
        }),
        ..ProbePlan::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_casts_through_text() {
        assert_eq!(render_placeholder(1, "int4"), "$1::text::int4");
        assert_eq!(render_placeholder(2, "timestamptz"), "$2::text::timestamptz");
        assert_eq!(render_placeholder(1, "character varying"), "$1::text");
    }

    #[test]
    fn probe_plan_without_schema_is_select_one() {
        let plan = probe_plan_for(None);
        assert_eq!(plan.connectivity.sql, "SELECT 1");
        assert!(plan.namespace.is_none());
    }

    #[test]
    fn probe_plan_binds_schema_name() {
        let plan = probe_plan_for(Some("analytics"));
        let check = plan.namespace.unwrap();
        assert_eq!(check.namespace, "analytics");
        assert!(check.query.sql.contains("has_schema_privilege"));
        assert!(!check.query.sql.contains("analytics"));
        assert_eq!(
            check.query.params[0].value,
            CursorValue::Utf8 {
                value: "analytics".into()
            }
        );
    }

    #[test]
    fn identifiers_quote_only_when_needed() {
        assert_eq!(pg_escape::quote_identifier("users"), "users");
        assert_eq!(pg_escape::quote_identifier("Order Items"), "\"Order Items\"");
        assert_eq!(pg_escape::quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
