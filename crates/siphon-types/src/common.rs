//! Common field kinds shared by every backend.
//!
//! Adapters map their native column types onto [`CommonType`]; everything
//! downstream of discovery (query building, cursor tracking, the catalog
//! document) works only with the common kind.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend-independent kind of a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommonType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
    /// String-encoded RFC 3339 timestamp or ISO-8601 date.
    Temporal,
}

impl CommonType {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::String,
        Self::Number,
        Self::Boolean,
        Self::Object,
        Self::Array,
        Self::Null,
        Self::Temporal,
    ];

    /// Wire-format name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
            Self::Temporal => "temporal",
        }
    }

    /// Inverse of [`CommonType::as_str`].
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Whether values of this kind have a total order usable as a cursor.
    #[must_use]
    pub fn is_orderable(self) -> bool {
        matches!(self, Self::String | Self::Number | Self::Temporal)
    }

    /// JSON-schema fragment describing values of this kind.
    #[must_use]
    pub fn json_schema(self) -> serde_json::Value {
        match self {
            Self::Temporal => serde_json::json!({"type": "string", "format": "date-time"}),
            other => serde_json::json!({ "type": other.as_str() }),
        }
    }
}

impl fmt::Display for CommonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orderable_kinds() {
        let orderable: Vec<CommonType> = CommonType::ALL
            .into_iter()
            .filter(|t| t.is_orderable())
            .collect();
        assert_eq!(
            orderable,
            vec![CommonType::String, CommonType::Number, CommonType::Temporal]
        );
    }

    #[test]
    fn serde_names_match_as_str() {
        for kind in CommonType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn parse_reverses_as_str() {
        for kind in CommonType::ALL {
            assert_eq!(CommonType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CommonType::parse("decimal"), None);
    }

    #[test]
    fn temporal_schema_is_formatted_string() {
        assert_eq!(
            CommonType::Temporal.json_schema(),
            serde_json::json!({"type": "string", "format": "date-time"})
        );
        assert_eq!(
            CommonType::Boolean.json_schema(),
            serde_json::json!({"type": "boolean"})
        );
    }
}
