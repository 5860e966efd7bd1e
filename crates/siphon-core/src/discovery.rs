//! Catalog discovery across backend namespaces.

use std::collections::HashSet;

use siphon_types::catalog::TableInfo;

use crate::adapter::Adapter;
use crate::errors::DiscoveryError;
use crate::type_map;

/// Enumerate tables and map their fields to common types.
///
/// With `namespace_filter` only that namespace is read. Otherwise every
/// namespace the adapter lists is read except its excluded ones. Primary
/// keys come from [`Adapter::primary_keys`]; tables without one keep an
/// empty key.
///
/// # Errors
///
/// Returns [`DiscoveryError::Enumeration`] when any listing call fails and
/// [`DiscoveryError::UnmappedType`] for a column the adapter cannot map.
pub async fn discover<A: Adapter>(
    adapter: &A,
    namespace_filter: Option<&str>,
) -> Result<Vec<TableInfo>, DiscoveryError> {
    let namespaces = match namespace_filter {
        Some(ns) => vec![ns.to_string()],
        None => {
            let excluded = adapter.excluded_namespaces();
            adapter
                .list_namespaces()
                .await
                .map_err(|source| DiscoveryError::Enumeration {
                    target: "namespaces".into(),
                    source,
                })?
                .into_iter()
                .filter(|ns| !excluded.contains(ns))
                .collect()
        }
    };

    let mut tables = Vec::new();
    for namespace in &namespaces {
        let names = adapter
            .list_tables(namespace)
            .await
            .map_err(|source| DiscoveryError::Enumeration {
                target: format!("tables in namespace '{namespace}'"),
                source,
            })?;

        for name in names {
            let columns = adapter.get_fields(namespace, &name).await.map_err(|source| {
                DiscoveryError::Enumeration {
                    target: format!("fields of '{namespace}.{name}'"),
                    source,
                }
            })?;
            let qualified = format!("{namespace}.{name}");
            let fields = type_map::map_fields(adapter, &qualified, columns)?;
            tables.push(TableInfo {
                namespace: namespace.clone(),
                name,
                fields,
                primary_key: Vec::new(),
            });
        }
    }

    let mut keys = adapter
        .primary_keys(&tables)
        .await
        .map_err(|source| DiscoveryError::Enumeration {
            target: "primary keys".into(),
            source,
        })?;

    for table in &mut tables {
        let Some(key) = keys.remove(&table.key()) else {
            continue;
        };
        let mut seen = HashSet::new();
        table.primary_key = key
            .into_iter()
            .filter(|column| {
                let known = table.field(column).is_some();
                if !known {
                    tracing::warn!(
                        table = %table.qualified_name(),
                        column = column.as_str(),
                        "Ignoring primary key column missing from discovered fields"
                    );
                }
                known && seen.insert(column.clone())
            })
            .collect();
    }

    tracing::info!(
        namespaces = namespaces.len(),
        tables = tables.len(),
        "Catalog discovery complete"
    );
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryAdapter, MemoryTable};
    use siphon_types::common::CommonType;
    use siphon_types::error::{AdapterError, ErrorCategory};

    fn adapter() -> MemoryAdapter {
        MemoryAdapter::new()
            .with_table(
                MemoryTable::new("sales", "orders")
                    .column("id", "INT64")
                    .column("placed_at", "TIMESTAMP")
                    .primary_key(["id", "id", "ghost"]),
            )
            .with_table(MemoryTable::new("sales", "notes").column("body", "STRING"))
            .with_table(MemoryTable::new("hr", "people").column("name", "STRING"))
            .with_table(MemoryTable::new("sys", "internal").column("x", "INT64"))
            .exclude_namespace("sys")
    }

    #[tokio::test]
    async fn unfiltered_discovery_skips_excluded_namespaces() {
        let tables = discover(&adapter(), None).await.unwrap();
        let names: Vec<_> = tables.iter().map(TableInfo::qualified_name).collect();
        assert_eq!(names, vec!["sales.orders", "sales.notes", "hr.people"]);
    }

    #[tokio::test]
    async fn namespace_filter_limits_enumeration() {
        let tables = discover(&adapter(), Some("hr")).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].fields[0].common_type, CommonType::String);
    }

    #[tokio::test]
    async fn primary_keys_are_deduplicated_and_known() {
        let tables = discover(&adapter(), Some("sales")).await.unwrap();
        let orders = tables.iter().find(|t| t.name == "orders").unwrap();
        assert_eq!(orders.primary_key, vec!["id".to_string()]);
        let notes = tables.iter().find(|t| t.name == "notes").unwrap();
        assert!(notes.primary_key.is_empty());
    }

    #[tokio::test]
    async fn dotted_names_keep_their_own_primary_keys() {
        let adapter = MemoryAdapter::new()
            .with_table(
                MemoryTable::new("a", "b.c")
                    .column("id", "INT64")
                    .primary_key(["id"]),
            )
            .with_table(MemoryTable::new("a.b", "c").column("id", "INT64"));
        let tables = discover(&adapter, None).await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].qualified_name(), tables[1].qualified_name());

        let dotted_table = tables.iter().find(|t| t.namespace == "a").unwrap();
        assert_eq!(dotted_table.primary_key, vec!["id".to_string()]);
        let dotted_namespace = tables.iter().find(|t| t.namespace == "a.b").unwrap();
        assert!(dotted_namespace.primary_key.is_empty());
    }

    #[tokio::test]
    async fn unmapped_type_fails_discovery() {
        let adapter = adapter().with_table(
            MemoryTable::new("geo", "places").column("shape", "GEOGRAPHY"),
        );
        let err = discover(&adapter, Some("geo")).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::UnmappedType { ref native_type, .. } if native_type == "GEOGRAPHY"
        ));
    }

    #[tokio::test]
    async fn listing_failure_is_enumeration_error() {
        let adapter = adapter().deny_namespace("hr");
        let err = discover(&adapter, None).await.unwrap_err();
        match err {
            DiscoveryError::Enumeration { target, source } => {
                assert!(target.contains("hr"));
                assert_eq!(source.category, ErrorCategory::Permission);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_backend_fails_namespace_listing() {
        let adapter = adapter().unreachable(AdapterError::connection("DOWN", "no route"));
        let err = discover(&adapter, None).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Enumeration { ref target, .. } if target == "namespaces"));
    }
}
