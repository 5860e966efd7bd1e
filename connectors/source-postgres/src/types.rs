//! PostgreSQL type registry and row value decoding.
//!
//! Native type names are `information_schema.columns.udt_name` values
//! (`int4`, `timestamptz`, `_text`). Every name [`common_type`] maps is one
//! [`PgValue`] can decode, so discovery never admits a column the reader
//! would choke on.

use std::error::Error;
use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::Value;
use siphon_types::common::CommonType;
use siphon_types::error::AdapterError;
use siphon_types::record::Record;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::Row;

type BoxError = Box<dyn Error + Sync + Send>;

/// Map a PostgreSQL `udt_name` to its common type. `None` when unsupported.
#[must_use]
pub fn common_type(udt_name: &str) -> Option<CommonType> {
    if let Some(element) = udt_name.strip_prefix('_') {
        return common_type(element).map(|_| CommonType::Array);
    }
    let common = match udt_name {
        "int2" | "int4" | "int8" | "oid" | "float4" | "float8" | "numeric" => CommonType::Number,
        "text" | "varchar" | "bpchar" | "name" | "citext" | "uuid" | "time" | "bytea" => {
            CommonType::String
        }
        "bool" => CommonType::Boolean,
        "date" | "timestamp" | "timestamptz" => CommonType::Temporal,
        "json" | "jsonb" => CommonType::Object,
        _ => return None,
    };
    Some(common)
}

/// Whether `name` can be interpolated into query text as a cast target.
pub(crate) fn is_plain_type_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Decode every column of `row` into a record.
pub(crate) fn decode_row(row: &Row) -> Result<Record, AdapterError> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = row.try_get::<_, PgValue>(idx).map_err(|e| {
            AdapterError::data(
                "DECODE_FAILED",
                format!(
                    "cannot decode column '{}' of type {}: {e}",
                    column.name(),
                    column.type_()
                ),
            )
        })?;
        record.insert(column.name().to_string(), value.0);
    }
    Ok(record)
}

/// One column value normalized to JSON.
///
/// Integers and floats become JSON numbers; `numeric` becomes a decimal
/// string so no precision is lost. Temporal values are RFC 3339 (UTC) or
/// ISO dates.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PgValue(pub(crate) Value);

impl<'a> FromSql<'a> for PgValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let value = match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
            Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
            Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
            Type::OID => Value::from(u32::from_sql(ty, raw)?),
            Type::FLOAT4 => float(f64::from(f32::from_sql(ty, raw)?)),
            Type::FLOAT8 => float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => Value::String(decode_numeric(raw)?),
            Type::UUID => Value::String(decode_uuid(raw)?),
            Type::BYTEA => Value::String(hex(<&[u8]>::from_sql(ty, raw)?)),
            Type::TIME => Value::String(NaiveTime::from_sql(ty, raw)?.to_string()),
            Type::DATE => Value::String(NaiveDate::from_sql(ty, raw)?.format("%Y-%m-%d").to_string()),
            Type::TIMESTAMP => Value::String(rfc3339(NaiveDateTime::from_sql(ty, raw)?.and_utc())),
            Type::TIMESTAMPTZ => Value::String(rfc3339(DateTime::<Utc>::from_sql(ty, raw)?)),
            Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
            _ => match ty.kind() {
                Kind::Array(_) => Value::Array(
                    Vec::<PgValue>::from_sql(ty, raw)?
                        .into_iter()
                        .map(|v| v.0)
                        .collect(),
                ),
                _ => Value::String(String::from_sql(ty, raw)?),
            },
        };
        Ok(Self(value))
    }

    fn from_sql_null(_: &Type) -> Result<Self, BoxError> {
        Ok(Self(Value::Null))
    }

    fn accepts(ty: &Type) -> bool {
        match ty.kind() {
            Kind::Array(member) => Self::accepts(member),
            _ => {
                matches!(
                    *ty,
                    Type::BOOL
                        | Type::INT2
                        | Type::INT4
                        | Type::INT8
                        | Type::OID
                        | Type::FLOAT4
                        | Type::FLOAT8
                        | Type::NUMERIC
                        | Type::UUID
                        | Type::BYTEA
                        | Type::TIME
                        | Type::DATE
                        | Type::TIMESTAMP
                        | Type::TIMESTAMPTZ
                        | Type::JSON
                        | Type::JSONB
                ) || <String as FromSql>::accepts(ty)
            }
        }
    }
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or_else(|| Value::String(v.to_string()), Value::Number)
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn decode_uuid(raw: &[u8]) -> Result<String, BoxError> {
    let bytes: [u8; 16] = raw.try_into().map_err(|_| "invalid uuid length")?;
    let h = hex(&bytes);
    let h = &h[2..];
    Ok(format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    ))
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render the binary `numeric` wire format (base-10000 digit groups) as a
/// decimal string with the value's display scale.
fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    let mut words = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    let mut next = || words.next().ok_or("truncated numeric");
    let ndigits = usize::from(next()?);
    #[allow(clippy::cast_possible_wrap)]
    let weight = i32::from(next()? as i16);
    let sign = next()?;
    let dscale = usize::from(next()?);
    let digits = (0..ndigits).map(|_| next()).collect::<Result<Vec<u16>, _>>()?;

    match sign {
        NUMERIC_NAN => return Ok("NaN".into()),
        NUMERIC_PINF => return Ok("Infinity".into()),
        NUMERIC_NINF => return Ok("-Infinity".into()),
        _ => {}
    }

    let group = |i: i32| -> u16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        let _ = write!(out, "{}", group(0));
        for i in 1..=weight {
            let _ = write!(out, "{:04}", group(i));
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", group(i));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}
