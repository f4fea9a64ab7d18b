// crates/cassette-store/src/table.rs
// ============================================================================
// Module: Dataset Tables
// Description: User table definitions, validation, DDL rendering and loading.
// Purpose: Restrict dataset schemas to a safe, append-only subset of SQL.
// Dependencies: rusqlite, serde
// ============================================================================

//! ## Overview
//! A [`TableDef`] is the only way user tables enter a cassette. Every name is
//! checked against the identifier grammar before it is spliced into DDL, names
//! that could shadow internal tables are rejected, and column types are
//! limited to plain type words with an optional size suffix.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;

use rusqlite::Connection;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;

use crate::error::StoreError;
use crate::path::is_identifier;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Table name prefixes reserved for internal use (compared case-insensitively).
pub const RESTRICTED_TABLE_PREFIXES: [&str; 3] = ["bb_", "sqlite", "pragma"];
/// Prefix applied to unique index names.
const UNIQUE_INDEX_PREFIX: &str = "uidx_";

// ============================================================================
// SECTION: Types
// ============================================================================

/// User dataset table definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDef {
    /// Table name.
    #[serde(default)]
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Primary key columns.
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Unique constraints.
    #[serde(default)]
    pub unique: Vec<UniqueDef>,
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared column type.
    pub datatype: String,
}

/// Named unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueDef {
    /// Constraint name.
    pub name: String,
    /// Constrained columns.
    pub columns: Vec<String>,
}

impl ColumnDef {
    /// Creates a column definition.
    #[must_use]
    pub fn new(name: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datatype: datatype.into(),
        }
    }
}

impl TableDef {
    /// Returns true when `column` may be overwritten by an upsert.
    #[must_use]
    pub fn can_update(&self, column: &str) -> bool {
        !self.primary_key.iter().any(|key| key == column)
            && !self.unique.iter().any(|unique| unique.columns.iter().any(|col| col == column))
    }

    /// Returns the declared column with the given name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Validates every identifier and type in the definition.
    ///
    /// # Errors
    ///
    /// Returns the first naming violation found.
    pub fn validate(&self) -> Result<(), StoreError> {
        validate_table_name(&self.name)?;
        if self.columns.is_empty() {
            return Err(StoreError::InvalidDataset {
                table: self.name.clone(),
                message: "table requires at least one column".to_string(),
            });
        }
        for column in &self.columns {
            validate_column_name(&column.name)?;
            validate_column_type(&column.name, &column.datatype)?;
        }
        for key in &self.primary_key {
            self.require_declared(key)?;
        }
        for unique in &self.unique {
            if !is_identifier(&unique.name) || unique.columns.is_empty() {
                return Err(StoreError::InvalidColumnName {
                    name: unique.name.clone(),
                });
            }
            for column in &unique.columns {
                self.require_declared(column)?;
            }
        }
        Ok(())
    }

    /// Fails when `column` is not a declared column.
    fn require_declared(&self, column: &str) -> Result<(), StoreError> {
        if self.column(column).is_none() {
            return Err(StoreError::InvalidColumnName {
                name: column.to_string(),
            });
        }
        Ok(())
    }

    /// Renders the DDL for this table inside `schema`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the definition is invalid.
    pub fn render_ddl(&self, schema: &str) -> Result<String, StoreError> {
        self.validate()?;
        let mut ddl = String::new();
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|column| format!("{} {}", column.name, column.datatype))
            .collect();
        let _ = write!(
            ddl,
            "create table if not exists {schema}.{}({}",
            self.name,
            columns.join(",")
        );
        if !self.primary_key.is_empty() {
            let _ = write!(ddl, ", primary key({})", self.primary_key.join(","));
        }
        ddl.push_str(");\n");
        for unique in &self.unique {
            let _ = writeln!(
                ddl,
                "create unique index if not exists {schema}.{UNIQUE_INDEX_PREFIX}{} on {}({});",
                unique.name,
                self.name,
                unique.columns.join(",")
            );
        }
        Ok(ddl)
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates a dataset table name.
///
/// # Errors
///
/// Returns [`StoreError::InvalidTableName`] outside the identifier grammar and
/// [`StoreError::RestrictedTable`] for reserved prefixes.
pub fn validate_table_name(name: &str) -> Result<(), StoreError> {
    if !is_identifier(name) {
        return Err(StoreError::InvalidTableName {
            name: name.to_string(),
        });
    }
    let lowered = name.to_ascii_lowercase();
    if RESTRICTED_TABLE_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix)) {
        return Err(StoreError::RestrictedTable {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Validates a dataset column name.
///
/// # Errors
///
/// Returns [`StoreError::InvalidColumnName`] outside the identifier grammar.
pub fn validate_column_name(name: &str) -> Result<(), StoreError> {
    if !is_identifier(name) {
        return Err(StoreError::InvalidColumnName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Validates a column type: identifier words plus an optional `(n)`/`(n,m)`.
fn validate_column_type(column: &str, datatype: &str) -> Result<(), StoreError> {
    let invalid = || StoreError::InvalidColumnType {
        column: column.to_string(),
        datatype: datatype.to_string(),
    };
    let (words, size) = match datatype.split_once('(') {
        Some((words, rest)) => (words, Some(rest.strip_suffix(')').ok_or_else(invalid)?)),
        None => (datatype, None),
    };
    let mut word_count = 0;
    for word in words.split_whitespace() {
        if !is_identifier(word) {
            return Err(invalid());
        }
        word_count += 1;
    }
    if word_count == 0 {
        return Err(invalid());
    }
    if let Some(size) = size {
        let parts: Vec<&str> = size.split(',').map(str::trim).collect();
        let numeric = |part: &&str| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit());
        if parts.len() > 2 || !parts.iter().all(numeric) {
            return Err(invalid());
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Reconstructs a table definition from the engine catalog.
///
/// Returns `Ok(None)` when the table does not exist in `schema`.
///
/// # Errors
///
/// Returns [`StoreError::Db`] when catalog queries fail.
pub fn load_table_def(
    connection: &Connection,
    schema: &str,
    name: &str,
) -> Result<Option<TableDef>, StoreError> {
    let mut table = TableDef {
        name: name.to_string(),
        ..TableDef::default()
    };
    let mut keyed: Vec<(i64, String)> = Vec::new();
    {
        let mut statement = connection
            .prepare("select name, type, pk from pragma_table_info(?1, ?2) order by cid")?;
        let mut rows = statement.query(params![name, schema])?;
        while let Some(row) = rows.next()? {
            let column: String = row.get(0)?;
            let datatype: String = row.get(1)?;
            let pk_position: i64 = row.get(2)?;
            if pk_position > 0 {
                keyed.push((pk_position, column.clone()));
            }
            table.columns.push(ColumnDef::new(column, datatype));
        }
    }
    if table.columns.is_empty() {
        return Ok(None);
    }
    keyed.sort();
    table.primary_key = keyed.into_iter().map(|(_, column)| column).collect();

    let index_names: Vec<String> = {
        let mut statement = connection.prepare(
            "select name from pragma_index_list(?1, ?2) where \"unique\" = 1 and origin = 'c' \
             order by name",
        )?;
        let names = statement.query_map(params![name, schema], |row| row.get::<_, String>(0))?;
        names.collect::<Result<_, _>>()?
    };
    for index_name in index_names {
        let mut statement = connection
            .prepare("select name from pragma_index_info(?1, ?2) order by seqno")?;
        let columns = statement
            .query_map(params![index_name, schema], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let constraint = index_name
            .strip_prefix(UNIQUE_INDEX_PREFIX)
            .map_or_else(|| index_name.clone(), str::to_string);
        table.unique.push(UniqueDef {
            name: constraint,
            columns,
        });
    }
    Ok(Some(table))
}
