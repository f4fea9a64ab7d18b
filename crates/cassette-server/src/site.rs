// crates/cassette-server/src/site.rs
// ============================================================================
// Module: Cassette Site
// Description: HTTP surface of one mounted cassette.
// Purpose: Answer static, dynamic, query and administrative requests.
// Dependencies: axum, cassette-sandbox, cassette-store, serde, tokio, url
// ============================================================================

//! ## Overview
//! A [`CassetteSite`] owns the dispatcher of one cassette and answers requests
//! whose path is already relative to the cassette mount. Resolution order:
//! `/.query` (public mode), `/.internals/...` (private mode), dynamic routes,
//! static paths from the snapshot, then a direct asset lookup so assets
//! written since the last refresh are served at once.
//!
//! ## Invariants
//! - Public sites require a read-only cassette; private sites require
//!   extended privileges. Construction fails otherwise.
//! - Every store call and script run is bounded by a deadline that is
//!   cancelled when the request future is dropped.
//! - Client-facing failure bodies never carry store internals; script
//!   source is only echoed when `debug_source` is set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::ALLOW;
use axum::http::header::CONTENT_DISPOSITION;
use axum::http::header::CONTENT_LENGTH;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::Response;
use cassette_config::CassetteConfig;
use cassette_config::ServeMode;
use cassette_sandbox::Capabilities;
use cassette_sandbox::SandboxError;
use cassette_sandbox::SandboxHost;
use cassette_sandbox::Script;
use cassette_sandbox::ScriptRequest;
use cassette_sandbox::ScriptResponse;
use cassette_store::Cassette;
use cassette_store::Deadline;
use cassette_store::Deck;
use cassette_store::ErrorKind;
use cassette_store::RouteEntry;
use cassette_store::StoreError;
use cassette_store::TableDef;
use cassette_store::mime_type_for_extension;
use cassette_store::path::is_script_mime_type;
use serde::Deserialize;
use serde_json::json;

use crate::audit::FailureAuditEvent;
use crate::audit::RequestAuditEvent;
use crate::audit::ServeAuditSink;
use crate::audit::Surface;
use crate::dispatch::Dispatcher;
use crate::dispatch::INDEX_DOCUMENT;
use crate::dispatch::Resolution;
use crate::dispatch::RouteSnapshot;
use crate::dispatch::STATIC_METHODS;
use crate::error::ApiError;
use crate::error::ServerError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Path of the read-only query endpoint.
pub const QUERY_PATH: &str = "/.query";

/// Prefix of the introspection and administrative endpoints.
pub const INTERNALS_PREFIX: &str = "/.internals/";

/// Prefix of the table creation endpoint below [`INTERNALS_PREFIX`].
const CREATE_TABLE_PREFIX: &str = "ddl/create/table/";

/// Header line of a failed dynamic page.
const SCRIPT_FAILURE_MESSAGE: &str = "Dynamic page failed with unexpected error";

// ============================================================================
// SECTION: Options
// ============================================================================

/// Serving options shared by every site of a deck.
#[derive(Debug, Clone)]
pub struct SiteOptions {
    /// Public or private surface.
    pub mode: ServeMode,
    /// Script host with its resource bounds.
    pub sandbox: SandboxHost,
    /// Whether scripts may open other cassettes of the deck.
    pub enable_deck: bool,
    /// Whether script failures echo the error and source.
    pub debug_source: bool,
    /// Output budget of `/.query`.
    pub query_max_bytes: usize,
    /// Deadline of `/.query`.
    pub query_timeout: Duration,
    /// Route refresh interval.
    pub refresh_interval: Duration,
}

impl SiteOptions {
    /// Derives site options from a validated configuration.
    #[must_use]
    pub fn from_config(config: &CassetteConfig) -> Self {
        Self {
            mode: config.server.mode,
            sandbox: SandboxHost::new(config.sandbox_config()),
            enable_deck: config.sandbox.enable_deck,
            debug_source: config.sandbox.debug_source,
            query_max_bytes: config.query.max_buffer_bytes,
            query_timeout: config.query_timeout(),
            refresh_interval: config.refresh_interval(),
        }
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Transport-neutral request addressed to one site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Decoded path relative to the cassette mount, starting with `/`.
    pub path: String,
    /// Raw query string without the `?`.
    pub query: Option<String>,
    /// Request headers with lower-case names.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl SiteRequest {
    /// Decoded query string pairs in order.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(|raw| url::form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
            .unwrap_or_default()
    }

    /// First query parameter named `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_pairs().into_iter().find(|(key, _)| key == name).map(|(_, value)| value)
    }

    /// Whether the method only asks for headers.
    fn is_head(&self) -> bool {
        self.method == "HEAD"
    }
}

/// Body of `POST /.internals/set-route`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SetRoutePayload {
    /// Route template.
    route: String,
    /// Target codebase asset.
    asset: String,
    /// Accepted methods.
    methods: Vec<String>,
}

/// Response plus the audit facts it carries.
struct Outcome {
    /// HTTP response.
    response: Response,
    /// Answering surface.
    surface: Surface,
    /// Error kind label when the request failed.
    error_kind: Option<&'static str>,
}

impl Outcome {
    /// Successful outcome.
    fn ok(surface: Surface, response: Response) -> Self {
        Self {
            response,
            surface,
            error_kind: None,
        }
    }

    /// Outcome from a surface result.
    fn from_result(surface: Surface, result: Result<Response, ApiError>) -> Self {
        match result {
            Ok(response) => Self::ok(surface, response),
            Err(error) => Self::failed(surface, error),
        }
    }

    /// Failed outcome.
    fn failed(surface: Surface, error: ApiError) -> Self {
        let error_kind = Some(error.kind);
        Self {
            response: error.into_response(),
            surface,
            error_kind,
        }
    }
}

// ============================================================================
// SECTION: Site
// ============================================================================

/// HTTP surface of one cassette.
pub struct CassetteSite {
    /// Mount name.
    name: String,
    /// Served cassette.
    cassette: Arc<Cassette>,
    /// Deck handed to scripts when enabled.
    deck: Arc<Deck>,
    /// Route snapshot publisher.
    dispatcher: Dispatcher,
    /// Shared serving options.
    options: Arc<SiteOptions>,
    /// Audit sink.
    audit: Arc<dyn ServeAuditSink>,
}

impl CassetteSite {
    /// Builds the site and starts its dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Init`] when a public site is given a writable
    /// cassette, a private site lacks extended privileges, or the first route
    /// snapshot cannot be built.
    pub fn new(
        name: &str,
        cassette: Arc<Cassette>,
        deck: Arc<Deck>,
        options: Arc<SiteOptions>,
        audit: Arc<dyn ServeAuditSink>,
    ) -> Result<Self, ServerError> {
        let refused = match options.mode {
            ServeMode::Public if !cassette.queryable() => Some(StoreError::NotQueryable),
            ServeMode::Private if !cassette.has_privileges() => {
                Some(StoreError::MissingExtendedPrivileges)
            }
            ServeMode::Public | ServeMode::Private => None,
        };
        if let Some(error) = refused {
            return Err(ServerError::Init(format!("cassette {name}: {error}")));
        }
        let dispatcher = Dispatcher::start(
            name,
            Arc::clone(&cassette),
            options.refresh_interval,
            Arc::clone(&audit),
        )?;
        Ok(Self {
            name: name.to_string(),
            cassette,
            deck,
            dispatcher,
            options,
            audit,
        })
    }

    /// Mount name of the site.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Currently published route snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.dispatcher.snapshot()
    }

    /// Answers one request and records its audit event.
    pub async fn handle(&self, request: SiteRequest) -> Response {
        let outcome = self.dispatch(&request).await;
        self.audit.record_request(&RequestAuditEvent::new(
            &self.name,
            &request.method,
            &request.path,
            outcome.response.status().as_u16(),
            outcome.surface,
            outcome.error_kind,
        ));
        outcome.response
    }

    /// Picks the surface for `request`.
    async fn dispatch(&self, request: &SiteRequest) -> Outcome {
        if request.path == QUERY_PATH && self.options.mode == ServeMode::Public {
            return Outcome::from_result(Surface::Query, self.query(request).await);
        }
        if let Some(rest) = request.path.strip_prefix(INTERNALS_PREFIX)
            && self.options.mode == ServeMode::Private
        {
            return self.internals(request, rest).await;
        }
        let snapshot = self.dispatcher.snapshot();
        match snapshot.resolve(&request.method, &request.path) {
            Resolution::Dynamic {
                route,
                params,
            } => {
                let result = self.run_script(request, route, params).await;
                Outcome::from_result(Surface::Dynamic, result)
            }
            Resolution::MethodNotAllowed {
                allow,
            } => method_not_allowed(Surface::Dynamic, &allow),
            Resolution::Static {
                asset_path,
            } => {
                let result = self.serve_asset(request, asset_path).await;
                Outcome::from_result(Surface::Static, result)
            }
            Resolution::Unmatched => self.fallback(request).await,
        }
    }

    // ------------------------------------------------------------------------
    // Static assets
    // ------------------------------------------------------------------------

    /// Looks up paths missing from the snapshot directly in the store.
    async fn fallback(&self, request: &SiteRequest) -> Outcome {
        if !STATIC_METHODS.contains(&request.method.as_str()) {
            return Outcome::failed(Surface::Unmatched, not_found(&request.path));
        }
        let mut asset_path = request.path.trim_start_matches('/').to_string();
        if asset_path.is_empty() || asset_path.ends_with('/') {
            asset_path.push_str(INDEX_DOCUMENT);
        }
        match self.serve_asset(request, &asset_path).await {
            Ok(response) => Outcome::ok(Surface::Static, response),
            Err(error) => Outcome::failed(Surface::Unmatched, error),
        }
    }

    /// Copies an asset into a response.
    async fn serve_asset(
        &self,
        request: &SiteRequest,
        asset_path: &str,
    ) -> Result<Response, ApiError> {
        let cassette = Arc::clone(&self.cassette);
        let path = asset_path.to_string();
        let copied = self
            .blocking(&request.path, move || {
                let mut content: Vec<u8> = Vec::new();
                let copied = cassette.copy_asset(&path, &mut content)?;
                Ok((copied.mime_type, content))
            })
            .await;
        match copied {
            Ok((mime_type, content)) => Ok(asset_response(&mime_type, content, request.is_head())),
            Err(error) if error.status == StatusCode::NOT_FOUND => Err(not_found(&request.path)),
            Err(error) if error.status == StatusCode::BAD_REQUEST => Err(not_found(&request.path)),
            Err(error) => Err(error),
        }
    }

    // ------------------------------------------------------------------------
    // Dynamic routes
    // ------------------------------------------------------------------------

    /// Runs the route's script on the blocking pool.
    async fn run_script(
        &self,
        request: &SiteRequest,
        route: &RouteEntry,
        params: Vec<(String, String)>,
    ) -> Result<Response, ApiError> {
        let script_request = ScriptRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query_pairs(),
            route_params: params,
            headers: request.headers.clone(),
            body: request.body.clone(),
        };
        let mut capabilities = Capabilities::for_request(script_request);
        if self.options.enable_deck {
            let privileged = self.options.mode == ServeMode::Private;
            capabilities = capabilities.with_deck(Arc::clone(&self.deck), privileged);
        }
        let script = Script {
            asset_path: route.asset_path.clone(),
            source: route.source.clone(),
        };
        let deadline = Deadline::after(self.options.sandbox.config().deadline);
        let _cancel = deadline.cancel_on_drop();
        let host = self.options.sandbox.clone();
        let run_script = script.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            host.execute(&run_script, &capabilities, &deadline)
        })
        .await;
        let error = match outcome {
            Ok(Ok(response)) => return script_response(response),
            Ok(Err(error)) => error,
            Err(join) => SandboxError::Setup(format!("script worker failed: {join}")),
        };
        self.audit.record_failure(&FailureAuditEvent::script(
            &self.name,
            &route.route,
            &script.asset_path,
            error.label(),
            error.to_string(),
        ));
        if matches!(error, SandboxError::Setup(_)) {
            return Err(ApiError::internal());
        }
        let message = if self.options.debug_source {
            format!("{SCRIPT_FAILURE_MESSAGE}:\n{error}\n\n\n----\n\n\n{}", script.source)
        } else {
            SCRIPT_FAILURE_MESSAGE.to_string()
        };
        Err(ApiError::new(StatusCode::BAD_GATEWAY, ErrorKind::Execution.as_str(), message))
    }

    // ------------------------------------------------------------------------
    // Query endpoint
    // ------------------------------------------------------------------------

    /// Answers `GET /.query?sql=...&maxBuffer=...`.
    async fn query(&self, request: &SiteRequest) -> Result<Response, ApiError> {
        if !STATIC_METHODS.contains(&request.method.as_str()) {
            return Err(ApiError::method_not_allowed());
        }
        let Some(sql) = request.query_param("sql").filter(|sql| !sql.trim().is_empty()) else {
            return Err(ApiError::bad_request("missing sql parameter"));
        };
        let configured = i64::try_from(self.options.query_max_bytes).unwrap_or(i64::MAX);
        let budget = match request.query_param("maxBuffer") {
            None => configured,
            Some(raw) => {
                let requested = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ApiError::bad_request("invalid maxBuffer parameter"))?;
                if requested <= 0 { configured } else { requested.min(configured) }
            }
        };
        let deadline = Deadline::after(self.options.query_timeout);
        let _cancel = deadline.cancel_on_drop();
        let cassette = Arc::clone(&self.cassette);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut output: Vec<u8> = Vec::new();
            cassette.query(&mut output, budget, &sql, &[], &deadline).map(|_| output)
        })
        .await;
        let error = match outcome {
            Ok(Ok(output)) => {
                return Ok(sized_response(
                    StatusCode::OK,
                    "application/json; charset=utf-8",
                    output,
                    request.is_head(),
                ));
            }
            Ok(Err(error)) => error,
            Err(join) => {
                self.audit.record_failure(&FailureAuditEvent::store(
                    &self.name,
                    QUERY_PATH,
                    ErrorKind::Internal.as_str(),
                    format!("query worker failed: {join}"),
                ));
                return Err(ApiError::internal());
            }
        };
        self.audit.record_failure(&FailureAuditEvent::store(
            &self.name,
            QUERY_PATH,
            error.kind().as_str(),
            error.to_string(),
        ));
        if matches!(error, StoreError::WriteOverflow(_)) {
            return Err(ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorKind::Capacity.as_str(),
                "unable to perform query, your query returns too much data",
            ));
        }
        Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            error.kind().as_str(),
            "unable to perform query, check logs for more information",
        ))
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Answers `/.internals/...`; `rest` excludes the prefix.
    async fn internals(&self, request: &SiteRequest, rest: &str) -> Outcome {
        let Some((surface, allowed)) = internals_endpoint(rest) else {
            return Outcome::failed(Surface::Internals, not_found(&request.path));
        };
        if !allowed.contains(&request.method.as_str()) {
            let allow: Vec<String> = allowed.iter().map(ToString::to_string).collect();
            return method_not_allowed(surface, &allow);
        }
        let result = if rest == "asset-list" {
            self.asset_list(request).await
        } else if rest == "dynamic-routes" {
            self.dynamic_routes(request).await
        } else if rest == "set-route" {
            self.set_route(request).await
        } else if let Some(path) = strip_segment(rest, "write-asset") {
            self.write_asset(request, path).await
        } else if let Some(path) = strip_segment(rest, "enable-code") {
            self.enable_code(request, path).await
        } else if let Some(table) = rest.strip_prefix(CREATE_TABLE_PREFIX) {
            self.create_table(request, table).await
        } else {
            Err(not_found(&request.path))
        };
        Outcome::from_result(surface, result)
    }

    /// Lists every asset as an HTML page.
    async fn asset_list(&self, request: &SiteRequest) -> Result<Response, ApiError> {
        let cassette = Arc::clone(&self.cassette);
        let assets = self.blocking(&request.path, move || cassette.list_assets()).await?;
        let mut page = page_header(&format!("Assets of {}", self.name));
        page.push_str("<ul>\n");
        for asset in &assets {
            let escaped = escape_html(asset);
            let _ = writeln!(page, "<li><a href=\"../{escaped}\">{escaped}</a></li>");
        }
        page.push_str("</ul>\n</body>\n</html>\n");
        Ok(html_response(page, request.is_head()))
    }

    /// Lists active routes and matcher conflicts as an HTML page.
    async fn dynamic_routes(&self, request: &SiteRequest) -> Result<Response, ApiError> {
        let cassette = Arc::clone(&self.cassette);
        let routes = self.blocking(&request.path, move || cassette.list_routes()).await?;
        let snapshot = self.dispatcher.snapshot();
        let mut page = page_header(&format!("Dynamic routes of {}", self.name));
        let _ = writeln!(page, "<p>Published stamp: {}</p>", snapshot.stamp());
        page.push_str("<table>\n<tr><th>Route</th><th>Methods</th><th>Asset</th></tr>\n");
        for route in &routes {
            let _ = writeln!(
                page,
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&route.route),
                escape_html(&route.methods.join(", ")),
                escape_html(&route.asset_path)
            );
        }
        page.push_str("</table>\n");
        if !snapshot.conflicts().is_empty() {
            page.push_str("<h2>Conflicts</h2>\n<ul>\n");
            for (route, reason) in snapshot.conflicts() {
                let _ = writeln!(page, "<li>{}: {}</li>", escape_html(route), escape_html(reason));
            }
            page.push_str("</ul>\n");
        }
        page.push_str("</body>\n</html>\n");
        Ok(html_response(page, request.is_head()))
    }

    /// Stores the request body as the asset at `path`.
    async fn write_asset(&self, request: &SiteRequest, path: &str) -> Result<Response, ApiError> {
        if path.is_empty() {
            return Err(ApiError::bad_request("Missing assetPath information"));
        }
        if path.ends_with('/') {
            return Err(ApiError::bad_request(
                "Cannot write a directory, upload files individually",
            ));
        }
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let extension = match file_name.rsplit_once('.') {
            Some((stem, extension)) if !stem.is_empty() && !extension.is_empty() => extension,
            _ => return Err(ApiError::bad_request("Extension is required for assets")),
        };
        let mime_type = mime_type_for_extension(extension);
        let cassette = Arc::clone(&self.cassette);
        let owned_path = path.to_string();
        let body = request.body.clone();
        let asset_id = self
            .blocking(&request.path, move || cassette.store_asset(&owned_path, mime_type, &body))
            .await?;
        Ok(json_response(
            StatusCode::OK,
            &json!({
                "assetId": asset_id,
                "path": path,
                "mimeType": mime_type,
            }),
        ))
    }

    /// Enables or disables the asset at `path` as codebase.
    async fn enable_code(&self, request: &SiteRequest, path: &str) -> Result<Response, ApiError> {
        if path.is_empty() {
            return Err(ApiError::bad_request("Missing assetPath information"));
        }
        let raw = request.query_param("enabled").unwrap_or_default();
        let Some(enabled) = parse_enabled(&raw) else {
            return Err(ApiError::bad_request(format!(
                "Invalid value [{raw}] for enabled parameter. Must be one of [y/n]"
            )));
        };
        let cassette = Arc::clone(&self.cassette);
        let owned_path = path.to_string();
        self.blocking(&request.path, move || cassette.toggle_codebase(&owned_path, enabled))
            .await?;
        Ok(json_response(
            StatusCode::OK,
            &json!({
                "path": path,
                "enabled": enabled,
            }),
        ))
    }

    /// Upserts a route mapping from a JSON body.
    async fn set_route(&self, request: &SiteRequest) -> Result<Response, ApiError> {
        let payload: SetRoutePayload = serde_json::from_slice(&request.body)
            .map_err(|err| ApiError::bad_request(format!("invalid set-route payload: {err}")))?;
        if payload.asset.trim().is_empty() {
            return Err(ApiError::bad_request("Missing asset path"));
        }
        let cassette = Arc::clone(&self.cassette);
        let mapped = payload.clone();
        self.blocking(&request.path, move || {
            cassette.map_route(&mapped.methods, &mapped.route, &mapped.asset)
        })
        .await?;
        Ok(json_response(
            StatusCode::OK,
            &json!({
                "route": payload.route,
                "asset": payload.asset,
                "methods": payload.methods,
            }),
        ))
    }

    /// Creates a dataset table from a JSON table definition.
    async fn create_table(&self, request: &SiteRequest, table: &str) -> Result<Response, ApiError> {
        let definition: TableDef = serde_json::from_slice(&request.body)
            .map_err(|err| ApiError::bad_request(format!("invalid table payload: {err}")))?;
        if definition.name != table {
            return Err(ApiError::bad_request("table name from payload does not match url path"));
        }
        let cassette = Arc::clone(&self.cassette);
        let ddl = self.blocking(&request.path, move || cassette.create_table(&definition)).await?;
        Ok(sized_response(
            StatusCode::CREATED,
            "text/plain; charset=utf-8",
            ddl.into_bytes(),
            false,
        ))
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Runs a store call on the blocking pool and maps its failure.
    async fn blocking<T, F>(&self, route: &str, task: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    {
        let error = match tokio::task::spawn_blocking(task).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(join) => {
                self.audit.record_failure(&FailureAuditEvent::store(
                    &self.name,
                    route,
                    ErrorKind::Internal.as_str(),
                    format!("store worker failed: {join}"),
                ));
                return Err(ApiError::internal());
            }
        };
        let kind = error.kind();
        if matches!(kind, ErrorKind::Execution | ErrorKind::Corruption | ErrorKind::Internal) {
            self.audit.record_failure(&FailureAuditEvent::store(
                &self.name,
                route,
                kind.as_str(),
                error.to_string(),
            ));
        }
        Err(ApiError::from(&error))
    }
}

// ============================================================================
// SECTION: Responses
// ============================================================================

/// 404 naming the requested path.
fn not_found(path: &str) -> ApiError {
    ApiError::not_found(format!("not found: {path}"))
}

/// 405 carrying an `Allow` header.
fn method_not_allowed(surface: Surface, allow: &[String]) -> Outcome {
    let mut outcome = Outcome::failed(surface, ApiError::method_not_allowed());
    if let Ok(value) = HeaderValue::from_str(&allow.join(", ")) {
        outcome.response.headers_mut().insert(ALLOW, value);
    }
    outcome
}

/// Response with an explicit content type and length.
fn sized_response(status: StatusCode, content_type: &str, body: Vec<u8>, head: bool) -> Response {
    let length = body.len();
    let body = if head { Body::empty() } else { Body::from(body) };
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    response
}

/// Stored asset response.
///
/// Script sources are shown inline as plain text; UTF-8 bodies get an
/// explicit charset.
fn asset_response(mime_type: &str, content: Vec<u8>, head: bool) -> Response {
    let script = is_script_mime_type(mime_type);
    let mut content_type = if script { "text/plain".to_string() } else { mime_type.to_string() };
    if !content_type.contains("charset") && std::str::from_utf8(&content).is_ok() {
        content_type.push_str("; charset=utf-8");
    }
    let mut response = sized_response(StatusCode::OK, &content_type, content, head);
    if script {
        response.headers_mut().insert(CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
    }
    response
}

/// Converts a finished script response.
fn script_response(script: ScriptResponse) -> Result<Response, ApiError> {
    let status = StatusCode::from_u16(script.status).map_err(|_| ApiError::internal())?;
    let has_type = script.headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
    let default_type = if std::str::from_utf8(&script.body).is_ok() {
        "text/html; charset=utf-8"
    } else {
        "application/octet-stream"
    };
    let mut builder = Response::builder().status(status);
    for (name, value) in &script.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !has_type {
        builder = builder.header(CONTENT_TYPE, default_type);
    }
    builder.body(Body::from(script.body)).map_err(|_| ApiError::internal())
}

/// JSON response.
fn json_response(status: StatusCode, value: &serde_json::Value) -> Response {
    let body = serde_json::to_vec(value).unwrap_or_default();
    sized_response(status, "application/json; charset=utf-8", body, false)
}

/// HTML page response.
fn html_response(page: String, head: bool) -> Response {
    sized_response(StatusCode::OK, "text/html; charset=utf-8", page.into_bytes(), head)
}

/// Opening markup of an introspection page.
fn page_header(title: &str) -> String {
    let title = escape_html(title);
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n<h1>{title}</h1>\n"
    )
}

/// Escapes text for HTML element and attribute content.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Parses the `enabled` flag of `enable-code`.
#[must_use]
pub fn parse_enabled(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "1" | "true" | "t" => Some(true),
        "n" | "no" | "0" | "false" | "f" => Some(false),
        _ => None,
    }
}

/// Surface and accepted methods of an internals endpoint.
fn internals_endpoint(rest: &str) -> Option<(Surface, &'static [&'static str])> {
    if rest == "asset-list" || rest == "dynamic-routes" {
        return Some((Surface::Internals, &STATIC_METHODS));
    }
    if rest == "set-route" || rest.starts_with(CREATE_TABLE_PREFIX) {
        return Some((Surface::Admin, &["POST"]));
    }
    if strip_segment(rest, "write-asset").is_some() || strip_segment(rest, "enable-code").is_some()
    {
        return Some((Surface::Admin, &["PUT"]));
    }
    None
}

/// Strips `name` and the following `/` from `rest`; a bare `name` yields "".
fn strip_segment<'a>(rest: &'a str, name: &str) -> Option<&'a str> {
    let tail = rest.strip_prefix(name)?;
    if tail.is_empty() {
        return Some("");
    }
    tail.strip_prefix('/')
}

#[cfg(test)]
mod tests;
