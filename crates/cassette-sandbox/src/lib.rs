// crates/cassette-sandbox/src/lib.rs
// ============================================================================
// Module: Cassette Sandbox
// Description: Sandboxed execution host for codebase assets.
// Purpose: Run Lua page fragments with an explicit per-request capability set.
// Dependencies: cassette-store, mlua, serde_json, thiserror, url
// ============================================================================

//! ## Overview
//! A [`SandboxHost`] runs one [`Script`] per request in a fresh Lua
//! interpreter. The script reaches the outside world only through the
//! modules its [`Capabilities`] carry: `ctx` (request and response), `json`,
//! and optionally `tapedeck` (cross-cassette queries through a
//! [`cassette_store::Deck`]).
//! Security posture: script source and request data are untrusted; the host
//! enforces a deadline, a memory limit and a response body cap.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod capabilities;
mod ctx;
pub mod error;
pub mod host;
mod json;
mod tapedeck;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use capabilities::Capabilities;
pub use capabilities::DeckCapability;
pub use capabilities::ScriptRequest;
pub use capabilities::ScriptResponse;
pub use error::SandboxError;
pub use host::DEFAULT_INSTRUCTION_INTERVAL;
pub use host::DEFAULT_MAX_BODY_BYTES;
pub use host::DEFAULT_MEMORY_LIMIT_BYTES;
pub use host::MAX_SCRIPT_DEADLINE;
pub use host::SandboxConfig;
pub use host::SandboxHost;
pub use host::Script;
