//! Cursor types for incremental extraction position tracking.
//!
//! A cursor marks the last value of an orderable column known to have been
//! fully processed, so that the next read resumes strictly after it.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::common::CommonType;

/// Comparison domain of a cursor column.
///
/// Derived from the column's [`CommonType`]; only orderable kinds have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorType {
    /// Integer or arbitrary-precision decimal, compared numerically.
    Number,
    /// UTF-8 string, compared lexicographically by byte.
    Utf8,
    /// Instant in time, compared chronologically.
    Timestamp,
}

impl CursorType {
    /// Cursor domain for a common type, or `None` when it is not orderable.
    #[must_use]
    pub fn for_common(common: CommonType) -> Option<Self> {
        match common {
            CommonType::Number => Some(Self::Number),
            CommonType::String => Some(Self::Utf8),
            CommonType::Temporal => Some(Self::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for CursorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Number => "number",
            Self::Utf8 => "utf8",
            Self::Timestamp => "timestamp",
        })
    }
}

/// Typed cursor position value.
///
/// Serializes as `{"type": "int64", "value": 42}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorValue {
    /// 64-bit signed integer position.
    Int64 { value: i64 },
    /// Arbitrary-precision decimal position, kept in its canonical text form.
    Decimal { value: String },
    /// UTF-8 string position.
    Utf8 { value: String },
    /// Microseconds since the Unix epoch (UTC).
    Timestamp { value: i64 },
}

/// Failure converting or comparing cursor values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorValueError {
    /// The source value was null or absent.
    #[error("cursor value is null")]
    Null,
    /// The source value cannot be interpreted in the requested domain.
    #[error("cannot read {found} as a {expected} cursor value")]
    Incompatible {
        expected: CursorType,
        found: String,
    },
    /// Two values from different domains were compared.
    #[error("cannot compare {left} cursor value with {right} cursor value")]
    Mismatch { left: CursorType, right: CursorType },
}

impl CursorValue {
    /// Comparison domain of this value.
    #[must_use]
    pub fn cursor_type(&self) -> CursorType {
        match self {
            Self::Int64 { .. } | Self::Decimal { .. } => CursorType::Number,
            Self::Utf8 { .. } => CursorType::Utf8,
            Self::Timestamp { .. } => CursorType::Timestamp,
        }
    }

    /// Build a cursor value from a normalized record value.
    ///
    /// # Errors
    ///
    /// Returns [`CursorValueError::Null`] for JSON null and
    /// [`CursorValueError::Incompatible`] when the value does not belong to
    /// the requested domain.
    pub fn from_json(
        cursor_type: CursorType,
        value: &serde_json::Value,
    ) -> Result<Self, CursorValueError> {
        use serde_json::Value;

        match (cursor_type, value) {
            (_, Value::Null) => Err(CursorValueError::Null),
            (CursorType::Number, Value::Number(n)) => Ok(match n.as_i64() {
                Some(v) => Self::Int64 { value: v },
                None => Self::parse_number(&n.to_string())?,
            }),
            (CursorType::Number, Value::String(s)) => Self::parse_number(s),
            (CursorType::Utf8, Value::String(s)) => Ok(Self::Utf8 { value: s.clone() }),
            (CursorType::Timestamp, Value::String(s)) => Self::parse_timestamp(s),
            (expected, other) => Err(CursorValueError::Incompatible {
                expected,
                found: describe_json(other),
            }),
        }
    }

    /// Parse a persisted checkpoint string back into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`CursorValueError::Incompatible`] when `raw` is not a valid
    /// value of `cursor_type`.
    pub fn parse(cursor_type: CursorType, raw: &str) -> Result<Self, CursorValueError> {
        match cursor_type {
            CursorType::Number => Self::parse_number(raw),
            CursorType::Utf8 => Ok(Self::Utf8 {
                value: raw.to_string(),
            }),
            CursorType::Timestamp => Self::parse_timestamp(raw),
        }
    }

    fn parse_number(raw: &str) -> Result<Self, CursorValueError> {
        let trimmed = raw.trim();
        if let Ok(v) = trimmed.parse::<i64>() {
            return Ok(Self::Int64 { value: v });
        }
        BigDecimal::from_str(trimmed)
            .map(|d| Self::Decimal {
                value: d.normalized().to_string(),
            })
            .map_err(|_| CursorValueError::Incompatible {
                expected: CursorType::Number,
                found: format!("'{raw}'"),
            })
    }

    fn parse_timestamp(raw: &str) -> Result<Self, CursorValueError> {
        parse_instant(raw)
            .map(|dt| Self::Timestamp {
                value: dt.timestamp_micros(),
            })
            .ok_or_else(|| CursorValueError::Incompatible {
                expected: CursorType::Timestamp,
                found: format!("'{raw}'"),
            })
    }

    /// Render the value as the opaque string persisted by state backends.
    ///
    /// [`CursorValue::parse`] with the same [`CursorType`] reverses this.
    #[must_use]
    pub fn to_checkpoint_string(&self) -> String {
        match self {
            Self::Int64 { value } => value.to_string(),
            Self::Decimal { value } | Self::Utf8 { value } => value.clone(),
            Self::Timestamp { value } => timestamp_micros_to_rfc3339(*value)
                .unwrap_or_else(|| value.to_string()),
        }
    }

    /// Total order between two values of the same domain.
    ///
    /// # Errors
    ///
    /// Returns [`CursorValueError::Mismatch`] when the domains differ.
    pub fn compare(&self, other: &Self) -> Result<Ordering, CursorValueError> {
        match (self, other) {
            (Self::Int64 { value: a }, Self::Int64 { value: b })
            | (Self::Timestamp { value: a }, Self::Timestamp { value: b }) => Ok(a.cmp(b)),
            (Self::Utf8 { value: a }, Self::Utf8 { value: b }) => Ok(a.cmp(b)),
            (a, b) if a.cursor_type() == CursorType::Number && b.cursor_type() == CursorType::Number => {
                Ok(a.as_decimal().cmp(&b.as_decimal()))
            }
            (a, b) => Err(CursorValueError::Mismatch {
                left: a.cursor_type(),
                right: b.cursor_type(),
            }),
        }
    }

    fn as_decimal(&self) -> BigDecimal {
        match self {
            Self::Int64 { value } => BigDecimal::from(*value),
            // Decimal values are only constructed from successfully parsed text.
            Self::Decimal { value } => BigDecimal::from_str(value).unwrap_or_default(),
            Self::Utf8 { .. } | Self::Timestamp { .. } => BigDecimal::default(),
        }
    }
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checkpoint_string())
    }
}

/// Cursor tracking state for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Column used to bound incremental extraction.
    pub field_name: String,
    /// Common type of the cursor column.
    pub field_type: CommonType,
    /// Last value known to be fully processed (`None` on first run).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CursorValue>,
}

impl Cursor {
    /// Cursor over `field_name` with no prior checkpoint.
    #[must_use]
    pub fn new(field_name: impl Into<String>, field_type: CommonType) -> Self {
        Self {
            field_name: field_name.into(),
            field_type,
            checkpoint: None,
        }
    }

    /// Same cursor resuming after `checkpoint`.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: CursorValue) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Comparison domain, or `None` when the field type is not orderable.
    #[must_use]
    pub fn cursor_type(&self) -> Option<CursorType> {
        CursorType::for_common(self.field_type)
    }
}

fn describe_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => format!("boolean {b}"),
        serde_json::Value::Number(n) => format!("number {n}"),
        serde_json::Value::String(s) => format!("string '{s}'"),
        serde_json::Value::Array(_) => "array".to_string(),
        serde_json::Value::Object(_) => "object".to_string(),
    }
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]` (as UTC), or `YYYY-MM-DD`.
fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ndt.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

/// Format microseconds since the epoch as RFC 3339 with microsecond precision.
#[must_use]
pub fn timestamp_micros_to_rfc3339(us: i64) -> Option<String> {
    let secs = us.div_euclid(1_000_000);
    // rem_euclid(1_000_000) is always in 0..999_999 which fits in u32.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let micros = us.rem_euclid(1_000_000) as u32;
    DateTime::from_timestamp(secs, micros * 1_000)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, true))
}
