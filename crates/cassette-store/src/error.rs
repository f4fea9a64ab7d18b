// crates/cassette-store/src/error.rs
// ============================================================================
// Module: Cassette Store Errors
// Description: Error taxonomy for cassette storage operations.
// Purpose: Give every failure a stable class the HTTP boundary can map.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`StoreError`] is the single error type returned by the store. Each variant
//! belongs to exactly one [`ErrorKind`], which callers use to pick a transport
//! status without matching on individual variants.
//! Security posture: messages carry identifiers (paths, table names, SQL text)
//! but never asset content or decoded stored values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use thiserror::Error;

// ============================================================================
// SECTION: Error Kinds
// ============================================================================

/// Failure classes shared by every cassette component.
///
/// # Invariants
/// - Variants are stable labels used in audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Asset, route or table does not exist.
    NotFound,
    /// Input failed validation.
    Validation,
    /// Operation is not permitted by the privilege gate.
    Privilege,
    /// Output budget exhausted.
    Capacity,
    /// Operation conflicts with existing state.
    Conflict,
    /// Query or script execution failed or ran out of time.
    Execution,
    /// Stored data violates an expected invariant.
    Corruption,
    /// Engine or I/O failure.
    Internal,
}

impl ErrorKind {
    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Privilege => "privilege",
            Self::Capacity => "capacity",
            Self::Conflict => "conflict",
            Self::Execution => "execution",
            Self::Corruption => "corruption",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Write Overflow
// ============================================================================

/// Rejection of a write that would exceed the bounded output budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("write overflow: {total} bytes written, {next} more would exceed the {max} byte limit")]
pub struct WriteOverflow {
    /// Bytes accepted so far.
    pub total: usize,
    /// Configured budget.
    pub max: usize,
    /// Size of the rejected write.
    pub next: usize,
}

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Cassette store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw asset content or stored values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// No asset matches the normalized path.
    #[error("asset {path} not found")]
    AssetNotFound {
        /// Normalized asset path.
        path: String,
    },
    /// No route matches the template.
    #[error("route {route} not found")]
    RouteNotFound {
        /// Route template.
        route: String,
    },
    /// Asset exists but is not part of the codebase.
    #[error("asset {path} is not an enabled codebase asset")]
    CodebaseNotFound {
        /// Normalized asset path.
        path: String,
    },
    /// Deck has no cassette with this name.
    #[error("cassette {name} not found")]
    CassetteNotFound {
        /// Cassette name.
        name: String,
    },
    /// Dataset table does not exist.
    #[error("table {name} not found")]
    TableNotFound {
        /// Table name.
        name: String,
    },
    /// Asset path normalizes to nothing.
    #[error("invalid asset path: {path:?}")]
    InvalidAssetPath {
        /// Raw path as given.
        path: String,
    },
    /// Text mime type with non UTF-8 content.
    #[error("assets with mimetype {mime_type} must be utf-8 encoded ({path})")]
    InvalidTextContent {
        /// Normalized asset path.
        path: String,
        /// Declared mime type.
        mime_type: String,
    },
    /// Asset cannot be promoted to the codebase.
    #[error("invalid codebase asset {path} ({mime_type}): {reason}")]
    InvalidCodebase {
        /// Normalized asset path.
        path: String,
        /// Stored mime type.
        mime_type: String,
        /// Rule that failed.
        reason: String,
    },
    /// HTTP verb outside the supported set.
    #[error("invalid http method: {method}")]
    InvalidMethod {
        /// Offending verb after upper-casing.
        method: String,
    },
    /// Route template failed validation.
    #[error("invalid route {route}: {reason}")]
    InvalidRoute {
        /// Route template.
        route: String,
        /// Rule that failed.
        reason: String,
    },
    /// Table name outside the identifier grammar.
    #[error("invalid table name: {name}")]
    InvalidTableName {
        /// Offending name.
        name: String,
    },
    /// Cassette name outside the identifier grammar.
    #[error("invalid cassette name: {name}")]
    InvalidCassetteName {
        /// Offending name.
        name: String,
    },
    /// Column name outside the identifier grammar.
    #[error("invalid column name: {name}")]
    InvalidColumnName {
        /// Offending name.
        name: String,
    },
    /// Column type outside the accepted type grammar.
    #[error("invalid type {datatype} for column {column}")]
    InvalidColumnType {
        /// Column name.
        column: String,
        /// Offending type text.
        datatype: String,
    },
    /// Table name collides with internal tables.
    #[error("table name {name} is restricted")]
    RestrictedTable {
        /// Offending name.
        name: String,
    },
    /// Dataset import payload is malformed.
    #[error("unable to import {table}: {message}")]
    InvalidDataset {
        /// Target table.
        table: String,
        /// Failure description.
        message: String,
    },
    /// Table already exists.
    #[error("table {name} already exists")]
    TableAlreadyExists {
        /// Table name.
        name: String,
    },
    /// Write attempted on a read-only cassette.
    #[error("cassette is read-only")]
    ReadonlyStore,
    /// Privileged query attempted without extended privileges.
    #[error("cassette requires extended privileges for this operation")]
    MissingExtendedPrivileges,
    /// Query attempted on a writable cassette.
    #[error("cassette is writable and cannot be queried")]
    NotQueryable,
    /// Bounded output budget exhausted.
    #[error(transparent)]
    WriteOverflow(#[from] WriteOverflow),
    /// SQL statement failed.
    #[error("query failed: {message} (sql: {sql})")]
    Query {
        /// Statement text.
        sql: String,
        /// Engine message.
        message: String,
    },
    /// Deadline expired or the caller cancelled.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Stored data violates an invariant.
    #[error("cassette corruption: {0}")]
    Corrupt(String),
    /// `SQLite` engine error.
    #[error("cassette db error: {0}")]
    Db(String),
    /// Filesystem or sink error.
    #[error("cassette io error: {0}")]
    Io(String),
}

impl StoreError {
    /// Returns the failure class for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AssetNotFound {
                ..
            }
            | Self::RouteNotFound {
                ..
            }
            | Self::CodebaseNotFound {
                ..
            }
            | Self::CassetteNotFound {
                ..
            }
            | Self::TableNotFound {
                ..
            } => ErrorKind::NotFound,
            Self::InvalidAssetPath {
                ..
            }
            | Self::InvalidTextContent {
                ..
            }
            | Self::InvalidCodebase {
                ..
            }
            | Self::InvalidMethod {
                ..
            }
            | Self::InvalidRoute {
                ..
            }
            | Self::InvalidTableName {
                ..
            }
            | Self::InvalidCassetteName {
                ..
            }
            | Self::InvalidColumnName {
                ..
            }
            | Self::InvalidColumnType {
                ..
            }
            | Self::RestrictedTable {
                ..
            }
            | Self::InvalidDataset {
                ..
            } => ErrorKind::Validation,
            Self::TableAlreadyExists {
                ..
            } => ErrorKind::Conflict,
            Self::ReadonlyStore | Self::MissingExtendedPrivileges | Self::NotQueryable => {
                ErrorKind::Privilege
            }
            Self::WriteOverflow(_) => ErrorKind::Capacity,
            Self::Query {
                ..
            }
            | Self::DeadlineExceeded => ErrorKind::Execution,
            Self::Corrupt(_) => ErrorKind::Corruption,
            Self::Db(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        match error {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Self::DeadlineExceeded
            }
            other => Self::Db(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}
