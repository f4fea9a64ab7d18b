// crates/cassette-sandbox/src/host.rs
// ============================================================================
// Module: Sandbox Host
// Description: Per-request Lua interpreter with an explicit capability set.
// Purpose: Run codebase assets under deadline and memory bounds.
// Dependencies: cassette-store, mlua
// ============================================================================

//! ## Overview
//! [`SandboxHost::execute`] builds a fresh interpreter for every run, loads
//! only the `table`, `string`, `math` and `utf8` libraries on top of a
//! trimmed base library, registers the modules named by the run's
//! [`Capabilities`] behind `require`, and discards the interpreter once the
//! chunk returns.
//!
//! ## Invariants
//! - No filesystem, process, network or debug primitive is reachable.
//! - An instruction hook aborts the run once the deadline passes or the
//!   caller cancels it; `pcall` and `xpcall` re-raise that abort instead of
//!   returning it to the script.
//! - State never survives between runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use cassette_store::Deadline;
use cassette_store::MAX_QUERY_BYTES;
use mlua::Function;
use mlua::HookTriggers;
use mlua::Lua;
use mlua::LuaOptions;
use mlua::MultiValue;
use mlua::StdLib;
use mlua::Table;
use mlua::Value;

use crate::capabilities::Capabilities;
use crate::capabilities::ScriptResponse;
use crate::ctx;
use crate::ctx::ResponseState;
use crate::error::SandboxError;
use crate::json;
use crate::tapedeck;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hard ceiling on a single script run.
pub const MAX_SCRIPT_DEADLINE: Duration = Duration::from_secs(10);
/// Default interpreter memory limit.
pub const DEFAULT_MEMORY_LIMIT_BYTES: usize = 32 * 1024 * 1024;
/// Default response body cap.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
/// Default number of VM instructions between deadline checks.
pub const DEFAULT_INSTRUCTION_INTERVAL: u32 = 1000;

/// Base functions removed from the global table.
const REMOVED_GLOBALS: [&str; 5] = ["dofile", "loadfile", "load", "collectgarbage", "print"];
/// Registry slot holding the per-run module table.
const MODULES_REGISTRY_KEY: &str = "cassette.modules";
/// Protected-call globals that must not swallow a deadline error.
const GUARDED_CALLS: [&str; 2] = ["pcall", "xpcall"];
/// Error message raised once the deadline has passed.
const DEADLINE_MESSAGE: &str = "script deadline exceeded";

// ============================================================================
// SECTION: Script
// ============================================================================

/// Source of a codebase asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    /// Normalized asset path, used as the chunk name.
    pub asset_path: String,
    /// Lua source.
    pub source: String,
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Resource bounds for script runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Run deadline, capped at [`MAX_SCRIPT_DEADLINE`].
    pub deadline: Duration,
    /// Interpreter memory limit.
    pub memory_limit_bytes: usize,
    /// Response body cap.
    pub max_body_bytes: usize,
    /// Output budget for `tapedeck` queries.
    pub max_query_bytes: usize,
    /// VM instructions between deadline checks.
    pub instruction_interval: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            deadline: MAX_SCRIPT_DEADLINE,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_query_bytes: MAX_QUERY_BYTES,
            instruction_interval: DEFAULT_INSTRUCTION_INTERVAL,
        }
    }
}

// ============================================================================
// SECTION: Host
// ============================================================================

/// Executes codebase assets in isolated interpreters.
#[derive(Debug, Clone, Default)]
pub struct SandboxHost {
    /// Resource bounds.
    config: SandboxConfig,
}

impl SandboxHost {
    /// Creates a host; the deadline and budgets are clamped to their ceilings.
    #[must_use]
    pub fn new(mut config: SandboxConfig) -> Self {
        config.deadline = config.deadline.min(MAX_SCRIPT_DEADLINE);
        config.max_query_bytes = config.max_query_bytes.min(MAX_QUERY_BYTES);
        config.instruction_interval = config.instruction_interval.max(1);
        Self {
            config,
        }
    }

    /// Returns the effective configuration.
    #[must_use]
    pub const fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Runs `script` with `capabilities` until it returns or `deadline` passes.
    ///
    /// Blocks the calling thread; async callers run it on a blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Compile`] for syntax errors,
    /// [`SandboxError::Runtime`] for errors raised while running,
    /// [`SandboxError::DeadlineExceeded`] when the deadline passes or is
    /// cancelled, [`SandboxError::MemoryLimit`] when the memory limit is hit
    /// and [`SandboxError::Setup`] when the interpreter cannot be prepared.
    pub fn execute(
        &self,
        script: &Script,
        capabilities: &Capabilities,
        deadline: &Deadline,
    ) -> Result<ScriptResponse, SandboxError> {
        let deadline = deadline.capped(self.config.deadline);
        if deadline.is_expired() {
            return Err(SandboxError::DeadlineExceeded);
        }
        let response = Rc::new(RefCell::new(ResponseState::new(self.config.max_body_bytes)));
        let lua = self.prepare(capabilities, &response, &deadline).map_err(setup_error)?;
        let interval = self.config.instruction_interval;
        let hook_deadline = deadline.clone();
        lua.set_hook(HookTriggers::new().every_nth_instruction(interval), move |_, _| {
            if hook_deadline.is_expired() {
                return Err(mlua::Error::runtime(DEADLINE_MESSAGE));
            }
            Ok(())
        });
        let outcome = lua
            .load(script.source.as_str())
            .set_name(format!("={}", script.asset_path))
            .exec();
        drop(lua);
        match outcome {
            Ok(()) => Ok(response.borrow_mut().finish()),
            Err(err) => Err(classify(&err, &deadline)),
        }
    }

    /// Creates the interpreter and registers the run's modules.
    fn prepare(
        &self,
        capabilities: &Capabilities,
        response: &Rc<RefCell<ResponseState>>,
        deadline: &Deadline,
    ) -> mlua::Result<Lua> {
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
        let lua = Lua::new_with(libs, LuaOptions::default())?;
        lua.set_memory_limit(self.config.memory_limit_bytes)?;
        {
            let globals = lua.globals();
            for name in REMOVED_GLOBALS {
                globals.set(name, Value::Nil)?;
            }
            for name in GUARDED_CALLS {
                guard_protected_call(&lua, &globals, name, deadline)?;
            }

            let modules = lua.create_table()?;
            let request = Rc::new(capabilities.request.clone());
            modules.set("ctx", ctx::module(&lua, request, Rc::clone(response))?)?;
            modules.set("json", json::module(&lua)?)?;
            if let Some(capability) = &capabilities.deck {
                let budget = self.config.max_query_bytes;
                modules.set("tapedeck", tapedeck::module(&lua, capability, deadline, budget)?)?;
            }
            lua.set_named_registry_value(MODULES_REGISTRY_KEY, modules)?;
            globals.set("require", lua.create_function(require)?)?;
        }
        Ok(lua)
    }
}

/// Replaces the protected-call global `name` with a wrapper that re-raises
/// once `deadline` has passed, so a caught deadline error cannot resume the run.
fn guard_protected_call<'lua>(
    lua: &'lua Lua,
    globals: &Table<'lua>,
    name: &str,
    deadline: &Deadline,
) -> mlua::Result<()> {
    let original: Function<'lua> = globals.get(name)?;
    let key = format!("cassette.original.{name}");
    lua.set_named_registry_value(&key, original)?;
    let deadline = deadline.clone();
    let wrapper = lua.create_function(move |lua, args: MultiValue| {
        let original: Function = lua.named_registry_value(&key)?;
        let results: MultiValue = original.call(args)?;
        if deadline.is_expired() {
            return Err(mlua::Error::runtime(DEADLINE_MESSAGE));
        }
        Ok(results)
    })?;
    globals.set(name, wrapper)
}

/// Resolves a module from the per-run module table.
fn require<'lua>(lua: &'lua Lua, name: String) -> mlua::Result<Value<'lua>> {
    let modules: Table<'lua> = lua.named_registry_value(MODULES_REGISTRY_KEY)?;
    match modules.get::<_, Value<'lua>>(name.as_str())? {
        Value::Nil => Err(mlua::Error::runtime(format!("module '{name}' is not available"))),
        module => Ok(module),
    }
}

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

/// Maps an interpreter setup failure.
fn setup_error(err: mlua::Error) -> SandboxError {
    SandboxError::Setup(err.to_string())
}

/// Maps a failed run onto the sandbox taxonomy.
fn classify(err: &mlua::Error, deadline: &Deadline) -> SandboxError {
    if deadline.is_expired() {
        return SandboxError::DeadlineExceeded;
    }
    let mut cause = err;
    while let mlua::Error::CallbackError {
        cause: inner,
        ..
    } = cause
    {
        cause = inner.as_ref();
    }
    match cause {
        mlua::Error::SyntaxError {
            message,
            ..
        } => SandboxError::Compile {
            message: message.clone(),
        },
        mlua::Error::MemoryError(_) => SandboxError::MemoryLimit,
        _ => SandboxError::Runtime {
            message: err.to_string(),
        },
    }
}
