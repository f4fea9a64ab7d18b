// crates/cassette-sandbox/src/json.rs
// ============================================================================
// Module: JSON Codec Module
// Description: The `json` module exposed to scripts.
// Purpose: Convert between Lua values and JSON text.
// Dependencies: mlua, serde_json
// ============================================================================

//! ## Overview
//! `require("json")` yields `{to_json, from_json}`. Conversion goes through
//! `serde_json::Value`, so arrays keep their shape and `json.null` round-trips
//! as JSON `null`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use mlua::Lua;
use mlua::LuaSerdeExt;
use mlua::Table;
use mlua::Value;

// ============================================================================
// SECTION: Module
// ============================================================================

/// Builds the `json` module table.
pub(crate) fn module(lua: &Lua) -> mlua::Result<Table<'_>> {
    let table = lua.create_table()?;
    table.set(
        "to_json",
        lua.create_function(|lua, value: Value| {
            let decoded: serde_json::Value = lua.from_value(value)?;
            serde_json::to_string(&decoded).map_err(mlua::Error::external)
        })?,
    )?;
    table.set(
        "from_json",
        lua.create_function(|lua, text: mlua::String| {
            let decoded: serde_json::Value =
                serde_json::from_slice(text.as_bytes()).map_err(mlua::Error::external)?;
            lua.to_value(&decoded)
        })?,
    )?;
    table.set("null", lua.null())?;
    Ok(table)
}
