//! Row to JSON conversion.
//!
//! Every engine returns rows as an ordered map of column name to a scalar JSON
//! value, whatever its native representation.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Engine-specific decoders handle the actual value extraction
//!
//! Ad-hoc statements are sent as plain text queries, so PostgreSQL and MySQL
//! return values in their text format; anything without a dedicated decoder
//! falls back to that text. SQLite is dynamically typed and is decoded from the
//! storage class of each value rather than the declared column type.

use crate::models::{EngineKind, Row};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Date,
    Time,
    DateTime,
    /// Timestamp with a time zone (or MySQL TIMESTAMP, stored as UTC)
    DateTimeTz,
    Unknown,
}

const INTEGER_TYPES: &[&str] = &[
    "int", "int2", "int4", "int8", "integer", "smallint", "bigint", "tinyint", "mediumint",
    "serial", "smallserial", "bigserial", "year",
];

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, engine: EngineKind) -> TypeCategory {
    let lower = type_name.to_lowercase();
    let base = lower
        .split(['(', ' '])
        .next()
        .unwrap_or(lower.as_str());

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if base == "decimal" || base == "numeric" {
        // SQLite's NUMERIC is a storage affinity, not an exact type
        if engine == EngineKind::Sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    match base {
        "date" => return TypeCategory::Date,
        "time" => return TypeCategory::Time,
        "datetime" => return TypeCategory::DateTime,
        "timestamp" if engine == EngineKind::MySql => return TypeCategory::DateTimeTz,
        "timestamp" => return TypeCategory::DateTime,
        "timestamptz" => return TypeCategory::DateTimeTz,
        _ => {}
    }

    if INTEGER_TYPES.contains(&base) {
        return TypeCategory::Integer;
    }

    if base == "bool" || base == "boolean" {
        return TypeCategory::Boolean;
    }

    if base.contains("float") || base.contains("double") || base == "real" {
        return TypeCategory::Float;
    }

    if base == "json" || base == "jsonb" {
        return TypeCategory::Json;
    }

    if base.contains("blob") || base.contains("binary") || base == "bytea" {
        return TypeCategory::Binary;
    }

    // varchar, text, uuid, interval, inet, enum, ...
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Scalar helpers
// =============================================================================

/// Binary data as UTF-8 text when valid, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

/// Floats as JSON numbers; NaN and infinities become strings.
pub fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

pub(crate) mod iso {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
    use serde_json::Value as JsonValue;

    pub fn date(v: NaiveDate) -> JsonValue {
        JsonValue::String(v.format("%Y-%m-%d").to_string())
    }

    pub fn time(v: NaiveTime) -> JsonValue {
        JsonValue::String(v.format("%H:%M:%S%.f").to_string())
    }

    pub fn datetime(v: NaiveDateTime) -> JsonValue {
        JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
    }

    pub fn datetime_tz<Tz: TimeZone>(v: DateTime<Tz>) -> JsonValue
    where
        Tz::Offset: std::fmt::Display,
    {
        JsonValue::String(v.to_rfc3339())
    }
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_row(&self) -> Row;
}

impl RowToJson for MySqlRow {
    fn to_json_row(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), EngineKind::MySql);
                (col.name().to_string(), mysql::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_row(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), EngineKind::Postgres);
                (col.name().to_string(), postgres::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_row(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name().to_string(), sqlite::decode_column(self, idx)))
            .collect()
    }
}

// =============================================================================
// Engine-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        let decoded = match category {
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(idx)
                .map(|v| v.map(|d| JsonValue::String(d.0))),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .map(|v| v.map(JsonValue::Bool)),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(idx)
                .map(|v| v.map(float_value)),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .map(|v| v.map(|b| decode_binary_value(&b))),
            TypeCategory::Json => row.try_get::<Option<JsonValue>, _>(idx),
            TypeCategory::Date => row
                .try_get::<Option<NaiveDate>, _>(idx)
                .map(|v| v.map(iso::date)),
            TypeCategory::Time => row
                .try_get::<Option<NaiveTime>, _>(idx)
                .map(|v| v.map(iso::time)),
            TypeCategory::DateTime => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .map(|v| v.map(iso::datetime)),
            TypeCategory::DateTimeTz => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)
                .map(|v| v.map(iso::datetime_tz)),
            TypeCategory::Unknown => Ok(None),
        };
        match decoded {
            Ok(Some(v)) => v,
            // TIME outside 00:00-24:00, enums, sets, bit fields, ...
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Result<Option<JsonValue>, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v.map(JsonValue::from));
        }
        row.try_get::<Option<u64>, _>(idx)
            .map(|v| v.map(JsonValue::from))
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get_unchecked::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        let decoded = match category {
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(idx)
                .map(|v| v.map(|d| JsonValue::String(d.0))),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .map(|v| v.map(JsonValue::Bool)),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .map(|v| v.map(|b| decode_binary_value(&b))),
            TypeCategory::Json => row.try_get::<Option<JsonValue>, _>(idx),
            TypeCategory::Date => row
                .try_get::<Option<NaiveDate>, _>(idx)
                .map(|v| v.map(iso::date)),
            TypeCategory::Time => row
                .try_get::<Option<NaiveTime>, _>(idx)
                .map(|v| v.map(iso::time)),
            TypeCategory::DateTime => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .map(|v| v.map(iso::datetime)),
            TypeCategory::DateTimeTz => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)
                .map(|v| v.map(iso::datetime_tz)),
            TypeCategory::Unknown => Ok(None),
        };
        match decoded {
            Ok(Some(v)) => v,
            // uuid, interval, inet, arrays, ...: the server's text rendering
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Result<Option<JsonValue>, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return Ok(v.map(JsonValue::from));
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(v.map(JsonValue::from));
        }
        row.try_get::<Option<i64>, _>(idx)
            .map(|v| v.map(JsonValue::from))
    }

    fn decode_float(row: &PgRow, idx: usize) -> Result<Option<JsonValue>, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v.map(float_value));
        }
        row.try_get::<Option<f32>, _>(idx)
            .map(|v| v.map(|f| float_value(f as f64)))
    }

    fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get_unchecked::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;
    use sqlx::ValueRef;

    /// Decode by the value's storage class, not the declared column type.
    pub fn decode_column(row: &SqliteRow, idx: usize) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
            Err(_) => return JsonValue::Null,
        };
        match storage.as_str() {
            "INTEGER" | "BOOLEAN" => row
                .try_get_unchecked::<i64, _>(idx)
                .map(JsonValue::from)
                .unwrap_or(JsonValue::Null),
            "REAL" => row
                .try_get_unchecked::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|b| decode_binary_value(&b))
                .unwrap_or(JsonValue::Null),
            _ => row
                .try_get_unchecked::<String, _>(idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}
