// crates/cassette-server/src/audit.rs
// ============================================================================
// Module: Serve Audit Logging
// Description: Structured audit events for request handling and dispatch.
// Purpose: Emit JSON lines without binding the server to a log pipeline.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Each request, route refresh and script or query failure produces one
//! event. Sinks decide where events go; the stderr sink writes one JSON
//! document per line. Events never carry request bodies or asset content.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Surface that answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    /// Stored asset served as-is.
    Static,
    /// Routed script execution.
    Dynamic,
    /// Read-only query endpoint.
    Query,
    /// Read-only introspection pages.
    Internals,
    /// Privileged catalog and schema writes.
    Admin,
    /// Nothing matched.
    Unmatched,
}

/// Outcome of a route refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A new snapshot was published.
    Published,
    /// The refresh failed; the previous snapshot stays active.
    Failed,
}

/// Request audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Cassette that served the request.
    pub cassette: String,
    /// HTTP method.
    pub method: String,
    /// Path relative to the cassette mount.
    pub path: String,
    /// Response status code.
    pub status: u16,
    /// Answering surface.
    pub surface: Surface,
    /// Normalized error kind label.
    pub error_kind: Option<&'static str>,
}

impl RequestAuditEvent {
    /// Creates a request event with a consistent timestamp.
    #[must_use]
    pub fn new(
        cassette: &str,
        method: &str,
        path: &str,
        status: u16,
        surface: Surface,
        error_kind: Option<&'static str>,
    ) -> Self {
        Self {
            event: "cassette_request",
            timestamp_ms: now_ms(),
            cassette: cassette.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            status,
            surface,
            error_kind,
        }
    }
}

/// Route refresh audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Cassette whose routes were refreshed.
    pub cassette: String,
    /// Refresh outcome.
    pub outcome: RefreshOutcome,
    /// Catalog change stamp of the snapshot.
    pub stamp: i64,
    /// Active dynamic routes.
    pub routes: usize,
    /// Static asset paths.
    pub assets: usize,
    /// Failure message when the refresh failed.
    pub error: Option<String>,
}

impl RefreshAuditEvent {
    /// Event for a published snapshot.
    #[must_use]
    pub fn published(cassette: &str, stamp: i64, routes: usize, assets: usize) -> Self {
        Self {
            event: "dispatch_refresh",
            timestamp_ms: now_ms(),
            cassette: cassette.to_string(),
            outcome: RefreshOutcome::Published,
            stamp,
            routes,
            assets,
            error: None,
        }
    }

    /// Event for a failed refresh.
    #[must_use]
    pub fn failed(cassette: &str, stamp: i64, error: String) -> Self {
        Self {
            event: "dispatch_refresh",
            timestamp_ms: now_ms(),
            cassette: cassette.to_string(),
            outcome: RefreshOutcome::Failed,
            stamp,
            routes: 0,
            assets: 0,
            error: Some(error),
        }
    }
}

/// Script or query failure audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct FailureAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Cassette that served the request.
    pub cassette: String,
    /// Route template or endpoint path.
    pub route: String,
    /// Script asset path, when a script ran.
    pub asset_path: Option<String>,
    /// Normalized error kind label.
    pub error_kind: &'static str,
    /// Full failure message.
    pub message: String,
}

impl FailureAuditEvent {
    /// Event for a failed script execution.
    #[must_use]
    pub fn script(
        cassette: &str,
        route: &str,
        asset_path: &str,
        error_kind: &'static str,
        message: String,
    ) -> Self {
        Self {
            event: "sandbox_failure",
            timestamp_ms: now_ms(),
            cassette: cassette.to_string(),
            route: route.to_string(),
            asset_path: Some(asset_path.to_string()),
            error_kind,
            message,
        }
    }

    /// Event for a failed store operation behind an endpoint.
    #[must_use]
    pub fn store(cassette: &str, route: &str, error_kind: &'static str, message: String) -> Self {
        Self {
            event: "store_failure",
            timestamp_ms: now_ms(),
            cassette: cassette.to_string(),
            route: route.to_string(),
            asset_path: None,
            error_kind,
            message,
        }
    }
}

/// Milliseconds since the epoch, zero when the clock is before it.
fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for serve events.
pub trait ServeAuditSink: Send + Sync {
    /// Records a request event.
    fn record_request(&self, event: &RequestAuditEvent);

    /// Records a route refresh event.
    fn record_refresh(&self, _event: &RefreshAuditEvent) {}

    /// Records a failure event.
    fn record_failure(&self, _event: &FailureAuditEvent) {}
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl StderrAuditSink {
    /// Writes one serialized event as a line.
    fn emit<E: Serialize>(event: &E) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

impl ServeAuditSink for StderrAuditSink {
    fn record_request(&self, event: &RequestAuditEvent) {
        Self::emit(event);
    }

    fn record_refresh(&self, event: &RefreshAuditEvent) {
        Self::emit(event);
    }

    fn record_failure(&self, event: &FailureAuditEvent) {
        Self::emit(event);
    }
}

/// No-op audit sink for tests or disabled logging.
pub struct NoopAuditSink;

impl ServeAuditSink for NoopAuditSink {
    fn record_request(&self, _event: &RequestAuditEvent) {}
}
