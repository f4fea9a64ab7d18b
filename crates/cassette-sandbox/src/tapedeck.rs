// crates/cassette-sandbox/src/tapedeck.rs
// ============================================================================
// Module: Tapedeck Module
// Description: Cross-cassette query access for scripts.
// Purpose: Let a script resolve a named cassette and run bounded queries.
// Dependencies: cassette-store, mlua, serde_json
// ============================================================================

//! ## Overview
//! `require("tapedeck")` is only resolvable when the host grants a
//! [`DeckCapability`]. `list()` returns loaded cassette names and
//! `load(name)` returns a handle with `:query(sql, ...)` and, for privileged
//! capabilities, `:unsafe_query(sql, has_output, ...)`.
//!
//! ## Invariants
//! - Every call goes through the cassette's privilege gate; the capability
//!   flag only narrows what the gate would allow.
//! - Query output is bounded by the configured byte budget and the run's
//!   deadline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use cassette_store::Cassette;
use cassette_store::Deadline;
use cassette_store::SqlValue;
use mlua::Lua;
use mlua::LuaSerdeExt;
use mlua::Table;
use mlua::UserData;
use mlua::UserDataMethods;
use mlua::Value;
use mlua::Variadic;

use crate::capabilities::DeckCapability;

// ============================================================================
// SECTION: Cassette Handle
// ============================================================================

/// Script-facing handle to one cassette of the deck.
pub(crate) struct CassetteHandle {
    /// Resolved cassette.
    cassette: Arc<Cassette>,
    /// Whether `unsafe_query` is granted.
    privileged: bool,
    /// Deadline of the current run.
    deadline: Deadline,
    /// Output budget for `query`.
    max_query_bytes: usize,
}

impl CassetteHandle {
    /// Runs a bounded read-only query and decodes its JSON document.
    fn query<'lua>(
        &self,
        lua: &'lua Lua,
        sql: &str,
        args: &[SqlValue],
    ) -> mlua::Result<Value<'lua>> {
        let budget = i64::try_from(self.max_query_bytes).unwrap_or(i64::MAX);
        let mut output: Vec<u8> = Vec::new();
        self.cassette
            .query(&mut output, budget, sql, args, &self.deadline)
            .map_err(mlua::Error::external)?;
        let decoded: serde_json::Value =
            serde_json::from_slice(&output).map_err(mlua::Error::external)?;
        lua.to_value(&decoded)
    }

    /// Runs a privileged statement and returns its rows.
    fn unsafe_query<'lua>(
        &self,
        lua: &'lua Lua,
        sql: &str,
        has_output: bool,
        args: &[SqlValue],
    ) -> mlua::Result<Value<'lua>> {
        if !self.privileged {
            return Err(mlua::Error::runtime("unsafe_query is not granted to this script"));
        }
        let rows = self
            .cassette
            .unsafe_query(sql, has_output, args, &self.deadline)
            .map_err(mlua::Error::external)?;
        let rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| serde_json::Value::Array(row.iter().map(SqlValue::to_json).collect()))
            .collect();
        lua.to_value(&rows)
    }
}

/// Converts script arguments into bind values.
fn bind_args<'lua>(lua: &'lua Lua, args: Variadic<Value<'lua>>) -> mlua::Result<Vec<SqlValue>> {
    args.into_iter()
        .map(|value| {
            let decoded: serde_json::Value = lua.from_value(value)?;
            Ok(SqlValue::from_json(&decoded))
        })
        .collect()
}

impl UserData for CassetteHandle {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method(
            "query",
            |lua, this, (sql, args): (String, Variadic<Value<'lua>>)| {
                let args = bind_args(lua, args)?;
                this.query(lua, &sql, &args)
            },
        );
        methods.add_method(
            "unsafe_query",
            |lua, this, (sql, has_output, args): (String, bool, Variadic<Value<'lua>>)| {
                let args = bind_args(lua, args)?;
                this.unsafe_query(lua, &sql, has_output, &args)
            },
        );
    }
}

// ============================================================================
// SECTION: Module
// ============================================================================

/// Builds the `tapedeck` module table.
pub(crate) fn module<'lua>(
    lua: &'lua Lua,
    capability: &DeckCapability,
    deadline: &Deadline,
    max_query_bytes: usize,
) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;
    let deck = Arc::clone(&capability.deck);
    table.set("list", lua.create_function(move |_, ()| Ok(deck.list()))?)?;

    let deck = Arc::clone(&capability.deck);
    let privileged = capability.privileged;
    let deadline = deadline.clone();
    table.set(
        "load",
        lua.create_function(move |lua, name: String| {
            let cassette = deck.get(&name).ok_or_else(|| {
                mlua::Error::runtime(format!("cassette '{name}' is not loaded"))
            })?;
            lua.create_userdata(CassetteHandle {
                cassette,
                privileged,
                deadline: deadline.clone(),
                max_query_bytes,
            })
        })?,
    )?;
    Ok(table)
}
