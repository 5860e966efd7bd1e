//! Discovered table and catalog document types.
//!
//! [`TableInfo`] is the value snapshot produced per table by discovery. A
//! [`Catalog`] is the declarative schema document handed to catalog
//! consumers: one [`CatalogStream`] per table.

use serde::{Deserialize, Serialize};

use crate::common::CommonType;
use crate::stream::SyncMode;

/// Column definition discovered from a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Backend-native type name, opaque to the core.
    pub native_type: String,
    /// Common kind the native type maps to.
    pub common_type: CommonType,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>, native_type: impl Into<String>, common_type: CommonType) -> Self {
        Self {
            name: name.into(),
            native_type: native_type.into(),
            common_type,
        }
    }
}

/// One discoverable table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub namespace: String,
    pub name: String,
    /// Fields in backend ordinal order.
    pub fields: Vec<Field>,
    /// Primary key column names; empty when the backend cannot supply them.
    #[serde(default)]
    pub primary_key: Vec<String>,
}

/// `(namespace, name)` pair identifying a table.
pub type TableKey = (String, String);

impl TableInfo {
    /// `namespace.name`, or just `name` for backends without namespaces.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Exact `(namespace, name)` identity, unambiguous when either part
    /// contains a dot.
    #[must_use]
    pub fn key(&self) -> TableKey {
        (self.namespace.clone(), self.name.clone())
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// All field names in ordinal order.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Field entry of the catalog document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub common_type: CommonType,
}

/// A table as exposed to catalog consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStream {
    pub namespace: String,
    pub name: String,
    pub fields: Vec<FieldSchema>,
    /// Sync modes this stream supports.
    pub supported_sync_modes: Vec<SyncMode>,
    /// Source-defined primary key columns (possibly empty).
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Fields usable as an incremental cursor.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cursor_candidates: Vec<String>,
}

impl CatalogStream {
    /// JSON-schema object describing a record of this stream.
    #[must_use]
    pub fn json_schema(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.common_type.json_schema()))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
        })
    }
}

impl From<&TableInfo> for CatalogStream {
    fn from(table: &TableInfo) -> Self {
        let cursor_candidates: Vec<String> = table
            .fields
            .iter()
            .filter(|f| f.common_type.is_orderable())
            .map(|f| f.name.clone())
            .collect();
        let supported_sync_modes = if cursor_candidates.is_empty() {
            vec![SyncMode::FullRefresh]
        } else {
            vec![SyncMode::FullRefresh, SyncMode::Incremental]
        };
        Self {
            namespace: table.namespace.clone(),
            name: table.name.clone(),
            fields: table
                .fields
                .iter()
                .map(|f| FieldSchema {
                    name: f.name.clone(),
                    common_type: f.common_type,
                })
                .collect(),
            supported_sync_modes,
            primary_key: table.primary_key.clone(),
            cursor_candidates,
        }
    }
}

/// Collection of streams discovered from a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogStream>,
}

impl Catalog {
    /// Build the catalog document for a discovery result.
    #[must_use]
    pub fn from_tables(tables: &[TableInfo]) -> Self {
        Self {
            streams: tables.iter().map(CatalogStream::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_and_name() -> TableInfo {
        TableInfo {
            namespace: "dbo".into(),
            name: "id_and_name".into(),
            fields: vec![
                Field::new("id", "INTEGER", CommonType::Number),
                Field::new("name", "VARCHAR", CommonType::String),
                Field::new("born", "DATETIMEOFFSET", CommonType::Temporal),
                Field::new("tags", "JSON", CommonType::Object),
            ],
            primary_key: vec!["id".into()],
        }
    }

    #[test]
    fn qualified_name_joins_namespace() {
        let mut table = id_and_name();
        assert_eq!(table.qualified_name(), "dbo.id_and_name");
        table.namespace.clear();
        assert_eq!(table.qualified_name(), "id_and_name");
    }

    #[test]
    fn key_separates_dotted_names() {
        let mut dotted_table = id_and_name();
        dotted_table.namespace = "a".into();
        dotted_table.name = "b.c".into();
        let mut dotted_namespace = id_and_name();
        dotted_namespace.namespace = "a.b".into();
        dotted_namespace.name = "c".into();

        assert_eq!(dotted_table.qualified_name(), dotted_namespace.qualified_name());
        assert_ne!(dotted_table.key(), dotted_namespace.key());
        assert_eq!(dotted_table.key(), ("a".to_string(), "b.c".to_string()));
    }

    #[test]
    fn catalog_stream_lists_orderable_cursor_candidates() {
        let stream = CatalogStream::from(&id_and_name());
        assert_eq!(stream.cursor_candidates, vec!["id", "name", "born"]);
        assert_eq!(
            stream.supported_sync_modes,
            vec![SyncMode::FullRefresh, SyncMode::Incremental]
        );
        assert_eq!(stream.primary_key, vec!["id"]);
    }

    #[test]
    fn table_without_orderable_fields_is_full_refresh_only() {
        let table = TableInfo {
            namespace: String::new(),
            name: "blobs".into(),
            fields: vec![Field::new("payload", "JSON", CommonType::Object)],
            primary_key: vec![],
        };
        let stream = CatalogStream::from(&table);
        assert_eq!(stream.supported_sync_modes, vec![SyncMode::FullRefresh]);
        let json = serde_json::to_value(&stream).unwrap();
        assert!(json.get("cursor_candidates").is_none());
    }

    #[test]
    fn catalog_document_shape() {
        let catalog = Catalog::from_tables(&[id_and_name()]);
        let json = serde_json::to_value(&catalog).unwrap();
        let stream = &json["streams"][0];
        assert_eq!(stream["namespace"], "dbo");
        assert_eq!(stream["fields"][0], serde_json::json!({"name": "id", "type": "number"}));
        assert_eq!(stream["primary_key"], serde_json::json!(["id"]));
    }

    #[test]
    fn json_schema_uses_common_types() {
        let stream = CatalogStream::from(&id_and_name());
        let schema = stream.json_schema();
        assert_eq!(schema["properties"]["id"]["type"], "number");
        assert_eq!(schema["properties"]["born"]["format"], "date-time");
    }
}
