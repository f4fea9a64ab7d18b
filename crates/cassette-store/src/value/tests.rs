// crates/cassette-store/src/value/tests.rs
// ============================================================================
// Module: SQL Value Unit Tests
// Description: Unit tests for the JSON to storage value mapping.
// Dependencies: cassette-store
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    reason = "Test-only assertions are permitted."
)]

use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::Value;
use serde_json::json;

use super::SqlValue;

#[test]
fn json_scalars_map_to_matching_variants() {
    assert_eq!(SqlValue::from_json(&json!(null)), SqlValue::Null);
    assert_eq!(SqlValue::from_json(&json!(true)), SqlValue::Boolean(true));
    assert_eq!(SqlValue::from_json(&json!("abc")), SqlValue::Text("abc".to_string()));
    assert_eq!(SqlValue::from_json(&json!(12)), SqlValue::Integer(12));
    assert_eq!(SqlValue::from_json(&json!(10.5)), SqlValue::Real(10.5));
}

#[test]
fn unsigned_overflow_falls_back_to_real() {
    let value = SqlValue::from_json(&json!(u64::MAX));
    match value {
        SqlValue::Real(number) => assert!(number > 1.8e19),
        other => panic!("expected real, got {other:?}"),
    }
}

#[test]
fn nested_values_bind_as_compact_json_text() {
    let value = SqlValue::from_json(&json!({"fld1": 10, "fld2": 10.1}));
    let output = value.to_sql().expect("to_sql");
    match output {
        ToSqlOutput::Owned(Value::Text(text)) => assert_eq!(text, r#"{"fld1":10,"fld2":10.1}"#),
        _ => panic!("expected owned text"),
    }
}

#[test]
fn booleans_bind_as_integers() {
    match SqlValue::Boolean(true).to_sql().expect("to_sql") {
        ToSqlOutput::Owned(Value::Integer(1)) => {}
        _ => panic!("expected integer 1"),
    }
}

#[test]
fn blobs_render_as_base64() {
    assert_eq!(SqlValue::Blob(vec![0xff, 0x00]).to_json(), json!("/wA="));
    assert_eq!(SqlValue::Real(f64::NAN).to_json(), json!(null));
}
