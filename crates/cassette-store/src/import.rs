// crates/cassette-store/src/import.rs
// ============================================================================
// Module: Dataset Import
// Description: CSV and JSON bulk loaders for dataset tables.
// Purpose: Populate dataset tables atomically from untrusted files.
// Dependencies: csv, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Both loaders run inside one transaction, so a failed import leaves the
//! cassette untouched (no rows and, for CSV, no newly created table).
//! CSV imports infer column types from the first data row; JSON imports
//! upsert flat objects into an existing table by its key columns.
//! Security posture: error messages name rows and columns, never cell values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;

use rusqlite::Transaction;
use rusqlite::params_from_iter;

use crate::cassette::Cassette;
use crate::cassette::resolve_table_schema;
use crate::error::StoreError;
use crate::table::ColumnDef;
use crate::table::TableDef;
use crate::table::load_table_def;
use crate::table::validate_column_name;
use crate::table::validate_table_name;
use crate::value::SqlValue;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum JSON import payload size in bytes.
pub const MAX_JSON_IMPORT_BYTES: u64 = 10_000_000;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Column type inferred from the first CSV data row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsvType {
    /// Base-10 integer.
    Integer,
    /// Floating point number.
    Real,
    /// Anything else.
    Text,
}

impl CsvType {
    /// Infers the type of a single cell.
    fn infer(cell: &str) -> Self {
        if cell.parse::<i64>().is_ok() {
            Self::Integer
        } else if cell.parse::<f64>().is_ok() {
            Self::Real
        } else {
            Self::Text
        }
    }

    /// Declared column type.
    const fn datatype(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
        }
    }

    /// Casts a cell to this type.
    fn cast(self, cell: &str) -> Option<SqlValue> {
        match self {
            Self::Integer => cell.parse::<i64>().ok().map(SqlValue::Integer),
            Self::Real => cell.parse::<f64>().ok().map(SqlValue::Real),
            Self::Text => Some(SqlValue::Text(cell.to_string())),
        }
    }
}

// ============================================================================
// SECTION: CSV
// ============================================================================

impl Cassette {
    /// Imports CSV rows into `table`, creating it when absent.
    ///
    /// The header names the columns; the first data row fixes each column's
    /// type (integer, then real, then text). Every row, the first included, is
    /// cast to those types. A header-only input imports nothing and creates
    /// nothing. Returns the number of rows imported.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidDataset`] for malformed CSV or a failed
    /// cast, and validation errors for bad table or column names. Nothing is
    /// applied when an error is returned.
    pub fn import_csv<R: Read>(&self, table: &str, reader: R) -> Result<usize, StoreError> {
        self.require_writable()?;
        validate_table_name(table)?;
        let invalid = |message: String| StoreError::InvalidDataset {
            table: table.to_string(),
            message,
        };
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|err| invalid(err.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        for header in &headers {
            validate_column_name(header)?;
        }
        let mut records = csv_reader.into_records();
        let Some(first) = records.next() else {
            return Ok(0);
        };
        let first = first.map_err(|err| invalid(err.to_string()))?;
        let types: Vec<CsvType> = first.iter().map(CsvType::infer).collect();

        let schema = self.user_schema();
        let mut guard = self.lock()?;
        let tx = guard.transaction()?;
        let target = match resolve_table_schema(&tx, self.dataset_attached(), table)? {
            Some(existing) => existing,
            None => {
                let definition = TableDef {
                    name: table.to_string(),
                    columns: headers
                        .iter()
                        .zip(&types)
                        .map(|(name, kind)| ColumnDef::new(name.clone(), kind.datatype()))
                        .collect(),
                    ..TableDef::default()
                };
                tx.execute_batch(&definition.render_ddl(schema)?)?;
                schema
            }
        };
        let placeholders: Vec<String> = (1 ..= headers.len()).map(|n| format!("?{n}")).collect();
        let sql = format!(
            "insert into {target}.{table} ({}) values ({})",
            headers.join(","),
            placeholders.join(",")
        );
        let mut imported = 0;
        let rows = std::iter::once(Ok(first)).chain(records);
        for (index, record) in rows.enumerate() {
            let record = record.map_err(|err| invalid(err.to_string()))?;
            let mut values = Vec::with_capacity(types.len());
            for ((cell, kind), header) in record.iter().zip(&types).zip(&headers) {
                let value = kind.cast(cell).ok_or_else(|| {
                    invalid(format!(
                        "row {} column {header}: expected {}",
                        index + 1,
                        kind.datatype()
                    ))
                })?;
                values.push(value);
            }
            insert_row(&tx, &sql, &values)?;
            imported += 1;
        }
        tx.commit()?;
        Ok(imported)
    }
}

// ============================================================================
// SECTION: JSON
// ============================================================================

impl Cassette {
    /// Upserts a JSON array of flat objects into an existing `table`.
    ///
    /// Rows conflicting on a key column update every non-key column they
    /// carry. Returns the number of rows applied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] when the table does not exist,
    /// [`StoreError::InvalidDataset`] for oversized or malformed payloads and
    /// [`StoreError::InvalidColumnName`] for undeclared columns. Nothing is
    /// applied when an error is returned.
    pub fn import_json<R: Read>(&self, table: &str, reader: R) -> Result<usize, StoreError> {
        self.require_writable()?;
        validate_table_name(table)?;
        let invalid = |message: String| StoreError::InvalidDataset {
            table: table.to_string(),
            message,
        };
        let mut payload = Vec::new();
        reader.take(MAX_JSON_IMPORT_BYTES + 1).read_to_end(&mut payload)?;
        if u64::try_from(payload.len()).unwrap_or(u64::MAX) > MAX_JSON_IMPORT_BYTES {
            return Err(invalid(format!("payload exceeds {MAX_JSON_IMPORT_BYTES} bytes")));
        }
        let objects: Vec<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_slice(&payload).map_err(|err| invalid(err.to_string()))?;

        let mut guard = self.lock()?;
        let tx = guard.transaction()?;
        let Some(schema) = resolve_table_schema(&tx, self.dataset_attached(), table)? else {
            return Err(StoreError::TableNotFound {
                name: table.to_string(),
            });
        };
        let Some(definition) = load_table_def(&tx, schema, table)? else {
            return Err(StoreError::TableNotFound {
                name: table.to_string(),
            });
        };
        let mut imported = 0;
        for object in &objects {
            let mut columns = Vec::with_capacity(object.len());
            let mut values = Vec::with_capacity(object.len());
            for (column, value) in object {
                if definition.column(column).is_none() {
                    return Err(StoreError::InvalidColumnName {
                        name: column.clone(),
                    });
                }
                columns.push(column.as_str());
                values.push(SqlValue::from_json(value));
            }
            if columns.is_empty() {
                return Err(invalid(format!("row {} has no columns", imported + 1)));
            }
            insert_row(&tx, &upsert_sql(schema, &definition, &columns), &values)?;
            imported += 1;
        }
        tx.commit()?;
        Ok(imported)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds an upsert statement for the given column subset.
fn upsert_sql(schema: &str, definition: &TableDef, columns: &[&str]) -> String {
    let placeholders: Vec<String> = (1 ..= columns.len()).map(|n| format!("?{n}")).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|column| definition.can_update(column))
        .map(|column| format!("{column} = excluded.{column}"))
        .collect();
    let conflict = if updates.is_empty() {
        "do nothing".to_string()
    } else {
        format!("do update set {}", updates.join(", "))
    };
    format!(
        "insert into {schema}.{} ({}) values ({}) on conflict {conflict}",
        definition.name,
        columns.join(","),
        placeholders.join(",")
    )
}

/// Executes one insert with cached statement preparation.
fn insert_row(tx: &Transaction<'_>, sql: &str, values: &[SqlValue]) -> Result<(), StoreError> {
    let mut statement = tx.prepare_cached(sql).map_err(|err| StoreError::Query {
        sql: sql.to_string(),
        message: err.to_string(),
    })?;
    statement.execute(params_from_iter(values.iter())).map_err(|err| StoreError::Query {
        sql: sql.to_string(),
        message: err.to_string(),
    })?;
    Ok(())
}
