// crates/cassette-server/src/dispatch.rs
// ============================================================================
// Module: Dynamic Dispatch
// Description: Immutable routing snapshots and their refresh task.
// Purpose: Keep request routing in sync with a mutable route table.
// Dependencies: arc-swap, cassette-store, matchit, tokio
// ============================================================================

//! ## Overview
//! A [`RouteSnapshot`] is built from one cassette's asset list and active
//! route table. The [`Dispatcher`] publishes snapshots through an atomic
//! pointer swap: request tasks load the current snapshot without locking and
//! keep it for the whole request, while a background task polls the catalog
//! change stamp and publishes a fresh snapshot when it moves. Every
//! [`FULL_REBUILD_TICKS`] ticks the task rebuilds regardless of the stamp, so
//! catalog rows written without bumping it (privileged statements, other
//! processes) are still picked up.
//!
//! ## Invariants
//! - A published snapshot is never mutated.
//! - The first snapshot is built synchronously; startup fails if it cannot be.
//! - A failed refresh stops the refresh task and keeps the last good snapshot.
//! - A rebuild with the same stamp and routing as the current snapshot is not
//!   published.
//! - Dynamic routes take precedence over static paths.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use cassette_store::Cassette;
use cassette_store::RouteEntry;
use cassette_store::StoreError;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audit::RefreshAuditEvent;
use crate::audit::ServeAuditSink;
use crate::error::ServerError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name of the directory default document.
pub const INDEX_DOCUMENT: &str = "index.html";

/// Methods answered by static paths.
pub const STATIC_METHODS: [&str; 2] = ["GET", "HEAD"];

/// Refresh ticks between rebuilds that ignore the change stamp.
pub const FULL_REBUILD_TICKS: u32 = 10;

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Result of resolving a request against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// A dynamic route accepts the method.
    Dynamic {
        /// Matched route.
        route: &'a RouteEntry,
        /// Captured route parameters in template order.
        params: Vec<(String, String)>,
    },
    /// The path is known but the method is not accepted.
    MethodNotAllowed {
        /// Accepted methods.
        allow: Vec<String>,
    },
    /// A static path maps onto a stored asset.
    Static {
        /// Normalized asset path.
        asset_path: &'a str,
    },
    /// Neither table knows the path.
    Unmatched,
}

/// Immutable routing table for one cassette.
#[derive(Debug, Clone)]
pub struct RouteSnapshot {
    /// Catalog change stamp read before listing.
    stamp: i64,
    /// Request path to asset path.
    static_paths: BTreeMap<String, String>,
    /// Path matcher; values index into `routes`.
    dynamic: matchit::Router<usize>,
    /// Routes accepted by the matcher.
    routes: Vec<RouteEntry>,
    /// Route templates the matcher rejected, with the reason.
    conflicts: Vec<(String, String)>,
}

impl RouteSnapshot {
    /// Builds a snapshot from the cassette's current catalog.
    ///
    /// The stamp is read first so a concurrent change can only make the
    /// snapshot look older than it is, which triggers another rebuild.
    ///
    /// # Errors
    ///
    /// Returns the store error of the first listing call that fails.
    pub fn build(cassette: &Cassette) -> Result<Self, StoreError> {
        let stamp = cassette.change_stamp()?;
        let assets = cassette.list_assets()?;
        let routes = cassette.list_routes()?;
        Ok(Self::from_parts(stamp, &assets, routes))
    }

    /// Builds a snapshot from already listed assets and routes.
    #[must_use]
    pub fn from_parts(stamp: i64, assets: &[String], routes: Vec<RouteEntry>) -> Self {
        let mut dynamic = matchit::Router::new();
        let mut accepted = Vec::with_capacity(routes.len());
        let mut conflicts = Vec::new();
        for route in routes {
            match dynamic.insert(matcher_template(&route.route), accepted.len()) {
                Ok(()) => accepted.push(route),
                Err(err) => conflicts.push((route.route, err.to_string())),
            }
        }
        Self {
            stamp,
            static_paths: static_paths(assets),
            dynamic,
            routes: accepted,
            conflicts,
        }
    }

    /// Catalog change stamp of the snapshot.
    #[must_use]
    pub const fn stamp(&self) -> i64 {
        self.stamp
    }

    /// Active dynamic routes.
    #[must_use]
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// Static request paths and their assets.
    #[must_use]
    pub const fn static_paths(&self) -> &BTreeMap<String, String> {
        &self.static_paths
    }

    /// Route templates rejected because they overlap an earlier route.
    #[must_use]
    pub fn conflicts(&self) -> &[(String, String)] {
        &self.conflicts
    }

    /// Returns true when both snapshots route every request the same way.
    #[must_use]
    pub fn same_routing(&self, other: &Self) -> bool {
        self.routes == other.routes
            && self.static_paths == other.static_paths
            && self.conflicts == other.conflicts
    }

    /// Resolves `method` and a decoded request `path`.
    #[must_use]
    pub fn resolve(&self, method: &str, path: &str) -> Resolution<'_> {
        if let Ok(matched) = self.dynamic.at(path)
            && let Some(route) = self.routes.get(*matched.value)
        {
            if !route.methods.iter().any(|allowed| allowed == method) {
                return Resolution::MethodNotAllowed {
                    allow: route.methods.clone(),
                };
            }
            let params = matched
                .params
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            return Resolution::Dynamic {
                route,
                params,
            };
        }
        let Some(asset_path) = self.static_paths.get(path) else {
            return Resolution::Unmatched;
        };
        if !STATIC_METHODS.contains(&method) {
            return Resolution::MethodNotAllowed {
                allow: STATIC_METHODS.iter().map(ToString::to_string).collect(),
            };
        }
        Resolution::Static {
            asset_path,
        }
    }
}

/// Converts a stored template (`:name`, `*name`) into matcher syntax.
#[must_use]
pub fn matcher_template(route: &str) -> String {
    route
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Maps request paths onto assets, including directory defaults.
///
/// Assets are applied longest path first and later entries replace earlier
/// ones, so the shallowest `index.html` claims `/` and each directory keeps
/// its own `index.html`.
fn static_paths(assets: &[String]) -> BTreeMap<String, String> {
    let mut ordered: Vec<&String> = assets.iter().collect();
    ordered.sort_by(|left, right| right.len().cmp(&left.len()).then_with(|| right.cmp(left)));
    let mut paths = BTreeMap::new();
    for asset in ordered {
        paths.insert(format!("/{asset}"), asset.clone());
        if asset == INDEX_DOCUMENT {
            paths.insert("/".to_string(), asset.clone());
            continue;
        }
        let Some(parent) = asset.strip_suffix(INDEX_DOCUMENT).and_then(|p| p.strip_suffix('/'))
        else {
            continue;
        };
        paths.insert(format!("/{parent}/"), asset.clone());
        if !parent.contains('/') {
            paths.insert("/".to_string(), asset.clone());
        }
    }
    paths
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Publishes route snapshots for one cassette.
///
/// # Invariants
/// - Dropping the dispatcher aborts its refresh task.
pub struct Dispatcher {
    /// Currently published snapshot.
    current: Arc<ArcSwap<RouteSnapshot>>,
    /// Background refresh task.
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Builds the first snapshot and starts refreshing every `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Init`] when called outside a tokio runtime or
    /// when the first snapshot cannot be built.
    pub fn start(
        name: &str,
        cassette: Arc<Cassette>,
        interval: Duration,
        audit: Arc<dyn ServeAuditSink>,
    ) -> Result<Self, ServerError> {
        let runtime = Handle::try_current().map_err(|err| {
            ServerError::Init(format!("dispatcher requires a tokio runtime: {err}"))
        })?;
        let snapshot = RouteSnapshot::build(&cassette)
            .map_err(|err| ServerError::Init(format!("cassette {name}: {err}")))?;
        audit.record_refresh(&RefreshAuditEvent::published(
            name,
            snapshot.stamp(),
            snapshot.routes().len(),
            snapshot.static_paths().len(),
        ));
        let current = Arc::new(ArcSwap::from_pointee(snapshot));
        let task = runtime.spawn(refresh_loop(
            name.to_string(),
            cassette,
            interval,
            Arc::clone(&current),
            audit,
        ));
        Ok(Self {
            current,
            task,
        })
    }

    /// Returns the currently published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.current.load_full()
    }

    /// Returns true while the refresh task is still running.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Polls the change stamp and publishes rebuilt snapshots.
async fn refresh_loop(
    name: String,
    cassette: Arc<Cassette>,
    interval: Duration,
    current: Arc<ArcSwap<RouteSnapshot>>,
    audit: Arc<dyn ServeAuditSink>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut ticks: u32 = 0;
    loop {
        ticker.tick().await;
        ticks = ticks.wrapping_add(1);
        let full = ticks % FULL_REBUILD_TICKS == 0;
        let published = current.load_full();
        let known = published.stamp();
        let worker = Arc::clone(&cassette);
        let outcome =
            tokio::task::spawn_blocking(move || rebuild(&worker, &published, full)).await;
        let error = match outcome {
            Ok(Ok(Some(snapshot))) => {
                audit.record_refresh(&RefreshAuditEvent::published(
                    &name,
                    snapshot.stamp(),
                    snapshot.routes().len(),
                    snapshot.static_paths().len(),
                ));
                current.store(Arc::new(snapshot));
                continue;
            }
            Ok(Ok(None)) => continue,
            Ok(Err(err)) => err.to_string(),
            Err(err) => format!("refresh worker failed: {err}"),
        };
        audit.record_refresh(&RefreshAuditEvent::failed(&name, known, error));
        return;
    }
}

/// Rebuilds the snapshot when the catalog stamp moved or `full` is set.
///
/// Returns `None` when nothing new needs publishing.
fn rebuild(
    cassette: &Cassette,
    published: &RouteSnapshot,
    full: bool,
) -> Result<Option<RouteSnapshot>, StoreError> {
    if !full && cassette.change_stamp()? == published.stamp() {
        return Ok(None);
    }
    let snapshot = RouteSnapshot::build(cassette)?;
    if snapshot.stamp() == published.stamp() && snapshot.same_routing(published) {
        return Ok(None);
    }
    Ok(Some(snapshot))
}
