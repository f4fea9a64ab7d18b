// crates/cassette-server/tests/private_surface.rs
// ============================================================================
// Module: Private Surface Tests
// Description: Administrative endpoints, live route refresh and deck mounts.
// Purpose: Validate privileged serving end to end.
// ============================================================================

//! ## Overview
//! Serves writable cassettes with extended privileges and checks:
//! - Asset upload, codebase toggling and route mapping over HTTP
//! - Route changes reaching dispatch only through the refresh task
//! - Table creation and its conflict status
//! - Mounting of secondary cassettes and privileged deck access

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

mod support;

use std::path::Path;
use std::sync::Arc;

use cassette_config::CassetteConfig;
use cassette_server::CassetteServer;
use cassette_server::CassetteSite;
use cassette_server::NoopAuditSink;
use cassette_server::RefreshOutcome;
use cassette_server::ServerError;
use cassette_server::SiteOptions;
use cassette_store::Cassette;
use cassette_store::Deck;
use cassette_store::OpenMode;
use reqwest::Method;
use support::RecordingSink;
use support::TestServer;
use support::config_text;
use tempfile::TempDir;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

const HELLO_SCRIPT: &str = r#"
local ctx = require("ctx")
local name = ctx.req:route_param("name")
ctx.res:write_status(201)
ctx.res:set_header("X-Name", name)
ctx.res:write_body("hello " .. name)
"#;

const BYE_SCRIPT: &str = r#"
local ctx = require("ctx")
ctx.res:write_body("bye " .. ctx.req:route_param("name"))
"#;

const UPLOAD_HELLO: &str = "/.internals/write-asset/codebase/hello.lua";

async fn start_private(dir: &Path) -> (TestServer, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let text = config_text("private", "site", &[("site", dir)]);
    let server = TestServer::start(&text, sink.clone()).await;
    (server, sink)
}

async fn put(server: &TestServer, path: &str, body: &str) -> (u16, String) {
    let (status, _, text) =
        server.send(Method::PUT, &server.url(path), body.as_bytes().to_vec()).await;
    (status, text)
}

async fn post(server: &TestServer, path: &str, body: &str) -> (u16, String) {
    let (status, _, text) =
        server.send(Method::POST, &server.url(path), body.as_bytes().to_vec()).await;
    (status, text)
}

// ============================================================================
// SECTION: Administrative Surface
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn uploaded_assets_are_served_before_the_next_refresh() {
    let dir = TempDir::new().unwrap();
    let (server, _sink) = start_private(dir.path()).await;

    let (status, body) = put(&server, "/.internals/write-asset/index.html", "<p>hi</p>").await;
    assert_eq!(status, 200, "{body}");
    let reply: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(reply["path"], "index.html");
    assert_eq!(reply["mimeType"], "text/html");

    let (status, _, body) = server.get("/").await;
    assert_eq!((status, body.as_str()), (200, "<p>hi</p>"));

    let (status, _, body) = server.get("/.internals/asset-list").await;
    assert_eq!(status, 200);
    assert!(body.contains("index.html"), "{body}");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_paths_are_validated() {
    let dir = TempDir::new().unwrap();
    let (server, _sink) = start_private(dir.path()).await;

    let cases = [
        ("/.internals/write-asset/", "Missing assetPath information\n"),
        (
            "/.internals/write-asset/docs/",
            "Cannot write a directory, upload files individually\n",
        ),
        ("/.internals/write-asset/README", "Extension is required for assets\n"),
    ];
    for (path, message) in cases {
        assert_eq!(put(&server, path, "x").await, (400, message.to_string()), "{path}");
    }

    let url = server.url("/.internals/write-asset/a.html");
    let (status, _, _) = server.send(Method::GET, &url, Vec::new()).await;
    assert_eq!(status, 405);

    let (status, _) = put(&server, "/.internals/write-asset/bad.html", "").await;
    assert_eq!(status, 200);
    let (status, body) = put(&server, "/.internals/enable-code/bad.html?enabled=y", "").await;
    assert_eq!(status, 400, "{body}");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn routes_publish_through_refresh() {
    let dir = TempDir::new().unwrap();
    let (server, sink) = start_private(dir.path()).await;

    let (status, _) = put(&server, UPLOAD_HELLO, HELLO_SCRIPT).await;
    assert_eq!(status, 200);
    let (status, body) =
        put(&server, "/.internals/enable-code/codebase/hello.lua?enabled=maybe", "").await;
    assert_eq!(status, 400);
    assert_eq!(body, "Invalid value [maybe] for enabled parameter. Must be one of [y/n]\n");
    let (status, body) =
        put(&server, "/.internals/enable-code/codebase/hello.lua?enabled=yes", "").await;
    assert_eq!(status, 200, "{body}");

    let (status, body) = post(&server, "/.internals/set-route", r#"{"route":"/api/x"}"#).await;
    assert_eq!((status, body.as_str()), (400, "Missing asset path\n"));
    let route = r#"{"route":"/api/hello/:name","asset":"codebase/hello.lua","methods":["get"]}"#;
    let (status, body) = post(&server, "/.internals/set-route", route).await;
    assert_eq!(status, 200, "{body}");

    let body = server.wait_for("/api/hello/world", 201, "hello").await;
    assert_eq!(body, "hello world");
    let (_, headers, _) = server.get("/api/hello/world").await;
    assert_eq!(headers["x-name"], "world");
    assert_eq!(headers["content-type"], "text/html; charset=utf-8");

    let (status, headers, _) =
        server.send(Method::POST, &server.url("/api/hello/world"), Vec::new()).await;
    assert_eq!(status, 405);
    assert_eq!(headers["allow"], "GET");

    let (status, _) = put(&server, UPLOAD_HELLO, BYE_SCRIPT).await;
    assert_eq!(status, 200);
    let body = server.wait_for("/api/hello/moon", 200, "bye").await;
    assert_eq!(body, "bye moon");

    let (status, _, body) = server.get("/.internals/dynamic-routes").await;
    assert_eq!(status, 200);
    assert!(body.contains("/api/hello/:name"), "{body}");
    assert!(body.contains("codebase/hello.lua"), "{body}");

    let (status, body) =
        put(&server, "/.internals/enable-code/codebase/hello.lua?enabled=n", "").await;
    assert_eq!(status, 200, "{body}");
    let body = server.wait_for("/api/hello/moon", 404, "not found").await;
    assert_eq!(body, "not found: /api/hello/moon\n");
    server.stop().await;

    let refreshes = sink.refreshes.lock().unwrap();
    assert!(refreshes.len() >= 3, "{refreshes:?}");
    assert!(refreshes.iter().all(|event| event.outcome == RefreshOutcome::Published));
    assert!(refreshes.windows(2).all(|pair| pair[0].stamp < pair[1].stamp), "{refreshes:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn script_failures_answer_bad_gateway() {
    let dir = TempDir::new().unwrap();
    let cassette = Cassette::open(dir.path(), OpenMode::Writable, true).unwrap();
    cassette.store_asset("codebase/broken.lua", "text/x-lua", b"error('boom')").unwrap();
    cassette.toggle_codebase("codebase/broken.lua", true).unwrap();
    cassette.map_route(&["GET"], "/api/broken", "codebase/broken.lua").unwrap();
    cassette.close().unwrap();
    let (server, sink) = start_private(dir.path()).await;

    let (status, _, body) = server.get("/api/broken").await;
    assert_eq!(status, 502);
    assert!(body.starts_with("Dynamic page failed with unexpected error:\n"), "{body}");
    assert!(body.contains("boom"), "{body}");
    assert!(body.contains("\n\n\n----\n\n\nerror('boom')"), "{body}");
    server.stop().await;

    let failures = sink.failures.lock().unwrap();
    let failure = failures.iter().find(|event| event.event == "sandbox_failure").unwrap();
    assert_eq!(failure.route, "/api/broken");
    assert_eq!(failure.asset_path.as_deref(), Some("codebase/broken.lua"));
    assert_eq!(failure.error_kind, "runtime");
}

#[tokio::test(flavor = "multi_thread")]
async fn tables_are_created_once() {
    let dir = TempDir::new().unwrap();
    let (server, _sink) = start_private(dir.path()).await;
    let definition = r#"{
        "name": "people",
        "columns": [
            {"name": "id", "datatype": "INTEGER"},
            {"name": "name", "datatype": "TEXT"}
        ],
        "primaryKey": ["id"]
    }"#;

    let (status, body) = post(&server, "/.internals/ddl/create/table/people", definition).await;
    assert_eq!(status, 201, "{body}");
    assert!(body.contains("people"), "{body}");

    let (status, _) = post(&server, "/.internals/ddl/create/table/people", definition).await;
    assert_eq!(status, 409);

    let (status, body) = post(&server, "/.internals/ddl/create/table/others", definition).await;
    assert_eq!(status, 400);
    assert_eq!(body, "table name from payload does not match url path\n");

    let (status, _) = post(&server, "/.internals/ddl/create/table/people", "{").await;
    assert_eq!(status, 400);

    assert_eq!(server.get("/.query?sql=select+1").await.0, 404);
    server.stop().await;
}

// ============================================================================
// SECTION: Deck Mounting
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn secondary_cassettes_mount_under_their_name() {
    let index_dir = TempDir::new().unwrap();
    let people_dir = TempDir::new().unwrap();

    let people = Cassette::open(people_dir.path(), OpenMode::Writable, true).unwrap();
    people.import_csv("people", "name,age\nbob,30\ncharlie,31\n".as_bytes()).unwrap();
    people.store_asset("index.html", "text/html", b"<p>people</p>").unwrap();
    people.close().unwrap();

    let index = Cassette::open(index_dir.path(), OpenMode::Writable, true).unwrap();
    let script = r#"
local ctx = require("ctx")
local deck = require("tapedeck")
local rows = deck.load("people"):unsafe_query("select name from people order by age", true)
ctx.res:set_header("Content-Type", "text/plain")
ctx.res:write_body(rows[1][1] .. "," .. rows[2][1])
"#;
    index.store_asset("codebase/names.lua", "text/x-lua", script.as_bytes()).unwrap();
    index.toggle_codebase("codebase/names.lua", true).unwrap();
    index.map_route(&["GET"], "/api/names", "codebase/names.lua").unwrap();
    index.close().unwrap();

    let text = config_text(
        "private",
        "site",
        &[("site", index_dir.path()), ("people", people_dir.path())],
    );
    let server = TestServer::start(&text, Arc::new(NoopAuditSink)).await;

    let (status, _, body) = server.get("/api/names").await;
    assert_eq!((status, body.as_str()), (200, "bob,charlie"));

    let (status, _, body) = server.get("/people/").await;
    assert_eq!((status, body.as_str()), (200, "<p>people</p>"));

    let (status, headers, _) = server.get("/people?x=1").await;
    assert_eq!(status, 301);
    assert_eq!(headers["location"], "/people/?x=1");

    let (status, _, body) = server.get("/people/.internals/asset-list").await;
    assert_eq!(status, 200);
    assert!(body.contains("index.html"), "{body}");
    server.stop().await;
}

// ============================================================================
// SECTION: Construction
// ============================================================================

fn site_options(mode: &str, dir: &Path) -> Arc<SiteOptions> {
    let text = config_text(mode, "site", &[("site", dir)]);
    let config = CassetteConfig::from_toml_str(&text).unwrap();
    Arc::new(SiteOptions::from_config(&config))
}

fn init_error(result: Result<CassetteSite, ServerError>) -> String {
    match result {
        Err(ServerError::Init(message)) => message,
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("site construction should fail"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn public_sites_refuse_writable_cassettes() {
    let dir = TempDir::new().unwrap();
    let cassette = Arc::new(Cassette::open(dir.path(), OpenMode::Writable, false).unwrap());
    let result = CassetteSite::new(
        "site",
        cassette,
        Arc::new(Deck::new()),
        site_options("public", dir.path()),
        Arc::new(NoopAuditSink),
    );
    assert!(init_error(result).contains("cannot be queried"));
}

#[tokio::test(flavor = "multi_thread")]
async fn private_sites_require_privileges() {
    let dir = TempDir::new().unwrap();
    let cassette = Arc::new(Cassette::open(dir.path(), OpenMode::Writable, false).unwrap());
    let result = CassetteSite::new(
        "site",
        Arc::clone(&cassette),
        Arc::new(Deck::new()),
        site_options("private", dir.path()),
        Arc::new(NoopAuditSink),
    );
    assert!(init_error(result).contains("requires extended privileges"));

    cassette.enable_privileges().unwrap();
    let site = CassetteSite::new(
        "site",
        cassette,
        Arc::new(Deck::new()),
        site_options("private", dir.path()),
        Arc::new(NoopAuditSink),
    );
    assert!(site.is_ok());
}

#[test]
fn private_mode_rejects_public_binds() {
    let dir = TempDir::new().unwrap();
    let text = config_text("private", "site", &[("site", dir.path())]);
    let mut config = CassetteConfig::from_toml_str(&text).unwrap();
    config.server.bind = "0.0.0.0:7010".to_string();
    match CassetteServer::from_config(config) {
        Err(ServerError::Config(message)) => {
            assert!(message.contains("loopback"), "{message}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("non-loopback private bind should be rejected"),
    }
}

#[test]
fn public_mode_requires_existing_cassettes() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent");
    let text = config_text("public", "site", &[("site", &missing)]);
    let config = CassetteConfig::from_toml_str(&text).unwrap();
    assert!(matches!(CassetteServer::from_config(config), Err(ServerError::Init(_))));
}
