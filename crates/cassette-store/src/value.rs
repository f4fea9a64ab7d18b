// crates/cassette-store/src/value.rs
// ============================================================================
// Module: SQL Values
// Description: Closed tagged union for values crossing the storage boundary.
// Purpose: Replace ad-hoc value coercion with one explicit mapping.
// Dependencies: rusqlite, serde_json, base64
// ============================================================================

//! ## Overview
//! [`SqlValue`] is the only type bound as a statement parameter or returned
//! from a privileged query. JSON input maps onto it with [`SqlValue::from_json`];
//! anything that is not a scalar falls back to compact JSON text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::Value;
use rusqlite::types::ValueRef;
use serde_json::Number;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A single value bound to, or read from, the storage engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// UTF-8 text.
    Text(String),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// Boolean, stored as `0`/`1`.
    Boolean(bool),
    /// Raw bytes.
    Blob(Vec<u8>),
    /// Structured value stored as compact JSON text.
    Json(serde_json::Value),
}

/// One result row from a privileged query.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    /// Maps a decoded JSON value onto the union.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(flag) => Self::Boolean(*flag),
            serde_json::Value::String(text) => Self::Text(text.clone()),
            serde_json::Value::Number(number) => number_to_sql(number),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Self::Json(value.clone()),
        }
    }

    /// Converts a value read from the engine.
    #[must_use]
    pub fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(number) => Self::Integer(number),
            ValueRef::Real(number) => Self::Real(number),
            ValueRef::Text(bytes) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Self::Blob(bytes.to_vec()),
        }
    }

    /// Renders the value as JSON for query output.
    ///
    /// Blobs are emitted as base64 strings; non-finite reals become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Integer(number) => serde_json::Value::from(*number),
            Self::Real(number) => {
                Number::from_f64(*number).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Self::Boolean(flag) => serde_json::Value::Bool(*flag),
            Self::Blob(bytes) => serde_json::Value::String(STANDARD.encode(bytes)),
            Self::Json(value) => value.clone(),
        }
    }
}

/// Picks the narrowest numeric representation for a JSON number.
fn number_to_sql(number: &Number) -> SqlValue {
    if let Some(integer) = number.as_i64() {
        return SqlValue::Integer(integer);
    }
    number.as_f64().map_or(SqlValue::Null, SqlValue::Real)
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            Self::Integer(number) => ToSqlOutput::Owned(Value::Integer(*number)),
            Self::Real(number) => ToSqlOutput::Owned(Value::Real(*number)),
            Self::Boolean(flag) => ToSqlOutput::Owned(Value::Integer(i64::from(*flag))),
            Self::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            Self::Json(value) => ToSqlOutput::Owned(Value::Text(value.to_string())),
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests;
