// crates/cassette-config/src/lib.rs
// ============================================================================
// Module: Cassette Config
// Description: TOML configuration model for serving a deck of cassettes.
// Purpose: Load, default and validate server settings fail-closed.
// Dependencies: cassette-sandbox, cassette-store, serde, thiserror, toml
// ============================================================================

//! ## Overview
//! [`CassetteConfig`] describes one serving process: the listener and its
//! mode, the dispatch refresh interval, sandbox bounds, query limits and the
//! deck of cassettes to mount. [`CassetteConfig::load`] reads a size-capped
//! UTF-8 TOML file, resolves relative cassette paths against the file's
//! directory and validates the result before returning it.
//! Security posture: config files are untrusted input; every limit is range
//! checked and a private (administrative) server may only bind loopback.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use cassette_sandbox::MAX_SCRIPT_DEADLINE;
use cassette_sandbox::SandboxConfig;
use cassette_store::MAX_QUERY_BYTES;
use cassette_store::OpenMode;
use cassette_store::path::is_identifier;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum config file size in bytes.
pub const MAX_CONFIG_BYTES: u64 = 1024 * 1024;
/// Default listener address.
pub const DEFAULT_BIND: &str = "127.0.0.1:7010";
/// Default request body cap in bytes.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
/// Default dispatch refresh interval in milliseconds.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 1_000;
/// Default script and query timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
/// Default interpreter memory limit in bytes.
pub const DEFAULT_MEMORY_LIMIT_BYTES: usize = 32 * 1024 * 1024;
/// Default number of VM instructions between deadline checks.
pub const DEFAULT_INSTRUCTION_INTERVAL: u32 = 1_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file is not valid TOML for the model.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Config values violate a constraint.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Model
// ============================================================================

/// Serving posture of every mounted cassette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeMode {
    /// Read-only cassettes with the `.query` endpoint.
    #[default]
    Public,
    /// Writable cassettes with extended privileges and the admin surface.
    Private,
}

impl ServeMode {
    /// Open mode cassettes are mounted with.
    #[must_use]
    pub const fn open_mode(self) -> OpenMode {
        match self {
            Self::Public => OpenMode::ReadOnly,
            Self::Private => OpenMode::Writable,
        }
    }

    /// Returns true when cassettes get extended privileges.
    #[must_use]
    pub const fn is_private(self) -> bool {
        matches!(self, Self::Private)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CassetteConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerSettings,
    /// Dynamic route refresh settings.
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Script execution bounds.
    #[serde(default)]
    pub sandbox: SandboxSettings,
    /// `.query` endpoint limits.
    #[serde(default)]
    pub query: QuerySettings,
    /// Cassettes to mount.
    pub deck: DeckSettings,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Serving posture.
    #[serde(default)]
    pub mode: ServeMode,
    /// Request and response body cap in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            mode: ServeMode::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Dynamic route refresh settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSettings {
    /// Interval between route table refreshes in milliseconds.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

/// Script execution bounds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxSettings {
    /// Script deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub deadline_ms: u64,
    /// Interpreter memory limit in bytes.
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: usize,
    /// VM instructions between deadline checks.
    #[serde(default = "default_instruction_interval")]
    pub instruction_interval: u32,
    /// Exposes the `tapedeck` module to scripts.
    #[serde(default = "default_true")]
    pub enable_deck: bool,
    /// Includes the error and script source in failure responses.
    #[serde(default)]
    pub debug_source: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            deadline_ms: DEFAULT_TIMEOUT_MS,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            instruction_interval: DEFAULT_INSTRUCTION_INTERVAL,
            enable_deck: true,
            debug_source: false,
        }
    }
}

/// `.query` endpoint limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuerySettings {
    /// Output budget ceiling in bytes.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
    /// Query timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_buffer_bytes: MAX_QUERY_BYTES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Cassettes to mount.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeckSettings {
    /// Name of the cassette mounted at `/`.
    pub index: String,
    /// Mounted cassettes.
    #[serde(default)]
    pub cassettes: Vec<CassetteEntry>,
}

/// One mounted cassette.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CassetteEntry {
    /// Deck name, also the URL prefix.
    pub name: String,
    /// Cassette directory.
    pub path: PathBuf,
    /// Attaches the dataset file.
    #[serde(default)]
    pub dataset: bool,
}

/// Returns the default bind address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Returns the default body cap.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Returns the default refresh interval.
const fn default_refresh_interval_ms() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MS
}

/// Returns the default timeout.
const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Returns the default memory limit.
const fn default_memory_limit_bytes() -> usize {
    DEFAULT_MEMORY_LIMIT_BYTES
}

/// Returns the default hook interval.
const fn default_instruction_interval() -> u32 {
    DEFAULT_INSTRUCTION_INTERVAL
}

/// Returns the default query budget.
const fn default_max_buffer_bytes() -> usize {
    MAX_QUERY_BYTES
}

/// Returns `true`.
const fn default_true() -> bool {
    true
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl CassetteConfig {
    /// Loads and validates a config file.
    ///
    /// Relative cassette paths are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read,
    /// [`ConfigError::Parse`] for malformed TOML and [`ConfigError::Invalid`]
    /// for oversized, non-UTF-8 or out-of-range configs.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = read_config_bytes(path)?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config = Self::parse(text)?;
        if let Some(base) = path.parent() {
            for entry in &mut config.deck.cassettes {
                if entry.path.is_relative() {
                    entry.path = base.join(&entry.path);
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates config text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config = Self::parse(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses config text without validation.
    fn parse(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks every constraint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_limits()?;
        self.validate_deck()
    }

    /// Parsed listener address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `server.bind` is not a socket
    /// address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let bind = &self.server.bind;
        bind.parse().map_err(|_| {
            ConfigError::Invalid(format!("server.bind is not a socket address: {bind}"))
        })
    }

    /// Interval between route table refreshes.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch.refresh_interval_ms)
    }

    /// Timeout applied to `.query` requests.
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query.timeout_ms)
    }

    /// Sandbox bounds derived from the config.
    #[must_use]
    pub const fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            deadline: Duration::from_millis(self.sandbox.deadline_ms),
            memory_limit_bytes: self.sandbox.memory_limit_bytes,
            max_body_bytes: self.server.max_body_bytes,
            max_query_bytes: self.query.max_buffer_bytes,
            instruction_interval: self.sandbox.instruction_interval,
        }
    }

    /// Validates the listener.
    fn validate_server(&self) -> Result<(), ConfigError> {
        let addr = self.bind_addr()?;
        if self.server.mode.is_private() && !addr.ip().is_loopback() {
            return Err(ConfigError::Invalid(format!(
                "private mode requires a loopback bind address, got {addr}"
            )));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates dispatch, sandbox and query limits.
    fn validate_limits(&self) -> Result<(), ConfigError> {
        if self.dispatch.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.refresh_interval_ms must be greater than zero".to_string(),
            ));
        }
        let max_deadline_ms = MAX_SCRIPT_DEADLINE.as_millis();
        let deadline_ms = u128::from(self.sandbox.deadline_ms);
        if deadline_ms == 0 || deadline_ms > max_deadline_ms {
            return Err(ConfigError::Invalid(format!(
                "sandbox.deadline_ms out of range: {deadline_ms} (max {max_deadline_ms})"
            )));
        }
        if self.sandbox.memory_limit_bytes == 0 {
            return Err(ConfigError::Invalid(
                "sandbox.memory_limit_bytes must be greater than zero".to_string(),
            ));
        }
        if self.sandbox.instruction_interval == 0 {
            return Err(ConfigError::Invalid(
                "sandbox.instruction_interval must be greater than zero".to_string(),
            ));
        }
        let max_buffer = self.query.max_buffer_bytes;
        if max_buffer == 0 || max_buffer > MAX_QUERY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "query.max_buffer_bytes out of range: {max_buffer} (max {MAX_QUERY_BYTES})"
            )));
        }
        if self.query.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "query.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates cassette names and the index.
    fn validate_deck(&self) -> Result<(), ConfigError> {
        if self.deck.cassettes.is_empty() {
            return Err(ConfigError::Invalid("deck.cassettes must not be empty".to_string()));
        }
        let mut names = BTreeSet::new();
        for entry in &self.deck.cassettes {
            if !is_identifier(&entry.name) {
                return Err(ConfigError::Invalid(format!(
                    "invalid cassette name: {}",
                    entry.name
                )));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate cassette name: {}",
                    entry.name
                )));
            }
            if entry.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "cassette {} requires a path",
                    entry.name
                )));
            }
        }
        if !names.contains(self.deck.index.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "deck.index names an unknown cassette: {}",
                self.deck.index
            )));
        }
        Ok(())
    }
}

/// Reads the config file with a size cap.
fn read_config_bytes(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let file = fs::File::open(path).map_err(|err| ConfigError::Io(err.to_string()))?;
    let metadata = file.metadata().map_err(|err| ConfigError::Io(err.to_string()))?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
    }
    let mut bytes = Vec::new();
    file.take(MAX_CONFIG_BYTES + 1)
        .read_to_end(&mut bytes)
        .map_err(|err| ConfigError::Io(err.to_string()))?;
    if u64::try_from(bytes.len()).unwrap_or(u64::MAX) > MAX_CONFIG_BYTES {
        return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
    }
    Ok(bytes)
}
