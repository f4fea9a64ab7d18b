// crates/cassette-sandbox/src/error.rs
// ============================================================================
// Module: Sandbox Errors
// Description: Failure taxonomy for sandboxed script execution.
// Purpose: Separate script faults from host faults at the HTTP boundary.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Script faults (syntax errors, runtime errors, deadline or memory
//! exhaustion) are reported as [`SandboxError`] values and never unwind into
//! the host. Messages come from the interpreter and may quote script source,
//! never request data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Sandboxed execution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    /// Script failed to compile.
    #[error("script syntax error: {message}")]
    Compile {
        /// Interpreter message.
        message: String,
    },
    /// Script raised an error while running.
    #[error("script runtime error: {message}")]
    Runtime {
        /// Interpreter message with traceback.
        message: String,
    },
    /// Script outlived its deadline or the request was cancelled.
    #[error("script deadline exceeded")]
    DeadlineExceeded,
    /// Script exceeded the interpreter memory limit.
    #[error("script memory limit exceeded")]
    MemoryLimit,
    /// Interpreter could not be prepared.
    #[error("sandbox setup failed: {0}")]
    Setup(String),
}

impl SandboxError {
    /// Returns a stable label for audit events.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Compile {
                ..
            } => "compile",
            Self::Runtime {
                ..
            } => "runtime",
            Self::DeadlineExceeded => "deadline",
            Self::MemoryLimit => "memory",
            Self::Setup(_) => "setup",
        }
    }
}
