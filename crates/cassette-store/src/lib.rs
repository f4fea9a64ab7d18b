// crates/cassette-store/src/lib.rs
// ============================================================================
// Module: Cassette Store
// Description: Content-addressed asset store with codebase, routes and data.
// Purpose: Provide the single owner of cassette state on disk.
// Dependencies: rusqlite, csv, serde, serde_json, thiserror, xxhash-rust
// ============================================================================

//! ## Overview
//! This crate provides the `SQLite`-backed [`Cassette`] store: assets keyed
//! by normalized path, a codebase marker promoting Lua assets to executable,
//! a route table binding HTTP verbs and path templates to codebase assets,
//! and user dataset tables created from validated [`TableDef`] values.
//! A [`PrivilegeGate`] guards every operation, [`BoundedWriter`] caps query
//! output, and a [`Deck`] groups named cassettes behind one index entry.
//! Security posture: SQL and asset content are untrusted inputs; identifiers
//! are grammar-checked before they reach DDL.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod bounded;
pub mod cassette;
pub mod deadline;
pub mod deck;
pub mod error;
pub mod import;
pub mod path;
pub mod table;
pub mod value;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use bounded::BoundedWriter;
pub use bounded::MAX_QUERY_BYTES;
pub use bounded::clamp_query_budget;
pub use cassette::Cassette;
pub use cassette::CopiedAsset;
pub use cassette::OpenMode;
pub use cassette::PrivilegeGate;
pub use cassette::RouteEntry;
pub use deadline::CancelOnDrop;
pub use deadline::Deadline;
pub use deck::Deck;
pub use error::ErrorKind;
pub use error::StoreError;
pub use error::WriteOverflow;
pub use import::MAX_JSON_IMPORT_BYTES;
pub use path::mime_type_for_extension;
pub use path::normalize_asset_path;
pub use table::ColumnDef;
pub use table::TableDef;
pub use table::UniqueDef;
pub use value::Row;
pub use value::SqlValue;
