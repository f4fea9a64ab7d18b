// crates/cassette-server/src/server.rs
// ============================================================================
// Module: Cassette Server
// Description: Deck loading, cassette mounting and the HTTP listener.
// Purpose: Serve every cassette of a deck from one axum router.
// Dependencies: axum, cassette-config, cassette-store, percent-encoding, tokio
// ============================================================================

//! ## Overview
//! [`CassetteServer`] opens the configured cassettes into a [`Deck`], builds
//! one [`CassetteSite`] per cassette and mounts them: `/<name>/...` reaches the
//! named cassette with the prefix stripped, every other path reaches the
//! index cassette. Public mode opens cassettes read-only; private mode opens
//! them writable with extended privileges and requires a loopback bind.
//!
//! ## Invariants
//! - Configuration is validated before any cassette is opened.
//! - Request bodies are read up to `server.max_body_bytes` and rejected past it.
//! - Request paths are percent-decoded once before mounting.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::IntoResponse;
use axum::response::Response;
use cassette_config::CassetteConfig;
use cassette_config::ServeMode;
use cassette_store::Cassette;
use cassette_store::Deck;
use cassette_store::ErrorKind;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;

use crate::audit::ServeAuditSink;
use crate::audit::StderrAuditSink;
use crate::error::ApiError;
use crate::error::ServerError;
use crate::site::CassetteSite;
use crate::site::SiteOptions;
use crate::site::SiteRequest;

// ============================================================================
// SECTION: Server
// ============================================================================

/// HTTP server for a deck of cassettes.
pub struct CassetteServer {
    /// Validated configuration.
    config: CassetteConfig,
    /// Loaded cassettes.
    deck: Arc<Deck>,
    /// Audit sink shared by every site.
    audit: Arc<dyn ServeAuditSink>,
}

impl CassetteServer {
    /// Validates `config` and opens every configured cassette.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] when validation fails and
    /// [`ServerError::Init`] when a cassette cannot be opened, privileged or
    /// loaded.
    pub fn from_config(config: CassetteConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let mode = config.server.mode;
        let mut deck = Deck::new();
        for entry in &config.deck.cassettes {
            let init = |err: cassette_store::StoreError| {
                ServerError::Init(format!("cassette {}: {err}", entry.name))
            };
            let cassette = Cassette::open(&entry.path, mode.open_mode(), entry.dataset)
                .map_err(init)?;
            if mode.is_private() {
                cassette.enable_privileges().map_err(init)?;
            }
            deck.load(&entry.name, cassette).map_err(init)?;
        }
        deck.set_index(&config.deck.index)
            .map_err(|err| ServerError::Init(format!("deck index: {err}")))?;
        Ok(Self {
            config,
            deck: Arc::new(deck),
            audit: Arc::new(StderrAuditSink),
        })
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn ServeAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Loaded deck.
    #[must_use]
    pub fn deck(&self) -> Arc<Deck> {
        Arc::clone(&self.deck)
    }

    /// Serving mode.
    #[must_use]
    pub const fn mode(&self) -> ServeMode {
        self.config.server.mode
    }

    /// Builds the axum router and starts one dispatcher per cassette.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Init`] when a site refuses its cassette or its
    /// first route snapshot cannot be built.
    pub fn router(&self) -> Result<Router, ServerError> {
        let options = Arc::new(SiteOptions::from_config(&self.config));
        let mut sites = BTreeMap::new();
        for name in self.deck.list() {
            let cassette = self
                .deck
                .get(&name)
                .ok_or_else(|| ServerError::Init(format!("cassette {name} vanished from deck")))?;
            let site = CassetteSite::new(
                &name,
                cassette,
                Arc::clone(&self.deck),
                Arc::clone(&options),
                Arc::clone(&self.audit),
            )?;
            sites.insert(name, Arc::new(site));
        }
        let index = self
            .deck
            .index_name()
            .and_then(|name| sites.get(name))
            .cloned()
            .ok_or_else(|| ServerError::Init("deck has no index cassette".to_string()))?;
        let state = Arc::new(ServerState {
            sites,
            index,
            max_body_bytes: self.config.server.max_body_bytes,
        });
        Ok(Router::new().fallback(handle_request).with_state(state))
    }

    /// Binds the configured address and serves until the process stops.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let addr = self.config.bind_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| ServerError::Transport(format!("bind {addr} failed: {err}")))?;
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serves on `listener` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Init`] when the router cannot be built and
    /// [`ServerError::Transport`] when serving fails.
    pub async fn serve_with_shutdown<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router()?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|err| ServerError::Transport(format!("http server failed: {err}")))
    }
}

// ============================================================================
// SECTION: Mounting
// ============================================================================

/// Shared router state.
struct ServerState {
    /// Sites by cassette name.
    sites: BTreeMap<String, Arc<CassetteSite>>,
    /// Site answering unprefixed paths.
    index: Arc<CassetteSite>,
    /// Request body limit.
    max_body_bytes: usize,
}

/// Where a decoded request path lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mount<'a> {
    /// Named cassette with the path below its prefix.
    Cassette {
        /// Cassette name.
        name: &'a str,
        /// Path relative to the mount, starting with `/`.
        path: String,
    },
    /// Bare cassette name; redirect to the directory form.
    Redirect {
        /// Cassette name.
        name: &'a str,
    },
    /// Index cassette with the full path.
    Index,
}

/// Splits `path` into a mount decision given the mounted `names`.
#[must_use]
pub fn mount<'a, I>(path: &'a str, names: I) -> Mount<'a>
where
    I: IntoIterator<Item = &'a str>,
{
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (first, rest) = match trimmed.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (trimmed, None),
    };
    if first.is_empty() || !names.into_iter().any(|name| name == first) {
        return Mount::Index;
    }
    match rest {
        Some(rest) => Mount::Cassette {
            name: first,
            path: format!("/{rest}"),
        },
        None => Mount::Redirect {
            name: first,
        },
    }
}

/// Fallback handler for every request.
async fn handle_request(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let Ok(decoded) = percent_decode_str(parts.uri.path()).decode_utf8() else {
        return ApiError::bad_request("request path is not valid utf-8").into_response();
    };
    let decoded = decoded.into_owned();
    let query = parts.uri.query().map(str::to_string);
    let (site, path) = match mount(&decoded, state.sites.keys().map(String::as_str)) {
        Mount::Cassette {
            name,
            path,
        } => match state.sites.get(name) {
            Some(site) => (Arc::clone(site), path),
            None => (Arc::clone(&state.index), decoded.clone()),
        },
        Mount::Redirect {
            name,
        } => return redirect(name, query.as_deref()),
        Mount::Index => (Arc::clone(&state.index), decoded.clone()),
    };
    let Ok(body) = axum::body::to_bytes(body, state.max_body_bytes).await else {
        return ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Capacity.as_str(),
            format!("request body exceeds {} bytes", state.max_body_bytes),
        )
        .into_response();
    };
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    site.handle(SiteRequest {
        method: parts.method.as_str().to_string(),
        path,
        query,
        headers,
        body: body.to_vec(),
    })
    .await
}

/// 301 from `/<name>` to `/<name>/`, keeping the query string.
fn redirect(name: &str, query: Option<&str>) -> Response {
    let location = query.map_or_else(|| format!("/{name}/"), |query| format!("/{name}/?{query}"));
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            response.headers_mut().insert(LOCATION, value);
            response
        }
        Err(_) => ApiError::bad_request("invalid redirect location").into_response(),
    }
}
