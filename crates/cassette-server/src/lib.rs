// crates/cassette-server/src/lib.rs
// ============================================================================
// Module: Cassette Server
// Description: HTTP serving for a deck of cassettes.
// Purpose: Expose static assets, scripted routes and queries over HTTP.
// Dependencies: axum, arc-swap, matchit, tokio, cassette-*
// ============================================================================

//! ## Overview
//! The server mounts every cassette of a [`cassette_store::Deck`] behind one
//! axum router. Each cassette gets a [`site::CassetteSite`] whose
//! [`dispatch::Dispatcher`] keeps an immutable routing snapshot in sync with
//! the cassette's route table by polling its change stamp.
//! Security posture: request paths, bodies and script output are untrusted;
//! the admin surface only exists in private mode on a loopback bind.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod site;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::FailureAuditEvent;
pub use audit::NoopAuditSink;
pub use audit::RefreshAuditEvent;
pub use audit::RefreshOutcome;
pub use audit::RequestAuditEvent;
pub use audit::ServeAuditSink;
pub use audit::StderrAuditSink;
pub use audit::Surface;
pub use dispatch::Dispatcher;
pub use dispatch::FULL_REBUILD_TICKS;
pub use dispatch::Resolution;
pub use dispatch::RouteSnapshot;
pub use error::ApiError;
pub use error::ServerError;
pub use server::CassetteServer;
pub use site::CassetteSite;
pub use site::SiteOptions;
pub use site::SiteRequest;
