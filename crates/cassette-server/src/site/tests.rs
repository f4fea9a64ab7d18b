// crates/cassette-server/src/site/tests.rs
// ============================================================================
// Module: Site Helper Tests
// Description: Response shaping, flag parsing and endpoint lookup.
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use axum::http::StatusCode;
use axum::http::header::CONTENT_DISPOSITION;
use axum::http::header::CONTENT_LENGTH;
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use cassette_sandbox::ScriptResponse;

use super::SiteRequest;
use super::asset_response;
use super::escape_html;
use super::internals_endpoint;
use super::parse_enabled;
use super::script_response;
use super::strip_segment;
use crate::audit::Surface;

fn header<'a>(response: &'a Response, name: axum::http::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|value| value.to_str().ok())
}

#[test]
fn enabled_flag_accepts_yes_and_no_spellings() {
    for value in ["y", "yes", "1", "true", "t", "Y", " TRUE "] {
        assert_eq!(parse_enabled(value), Some(true), "{value}");
    }
    for value in ["n", "no", "0", "false", "f", "N"] {
        assert_eq!(parse_enabled(value), Some(false), "{value}");
    }
    assert_eq!(parse_enabled(""), None);
    assert_eq!(parse_enabled("maybe"), None);
}

#[test]
fn html_escaping_covers_markup_characters() {
    assert_eq!(
        escape_html("<a href=\"x\">'&'</a>"),
        "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
    );
}

#[test]
fn segments_strip_only_on_boundaries() {
    assert_eq!(strip_segment("write-asset/a/b.html", "write-asset"), Some("a/b.html"));
    assert_eq!(strip_segment("write-asset", "write-asset"), Some(""));
    assert_eq!(strip_segment("write-asset/", "write-asset"), Some(""));
    assert_eq!(strip_segment("write-assets/x", "write-asset"), None);
}

#[test]
fn internals_endpoints_declare_methods() {
    assert_eq!(
        internals_endpoint("asset-list"),
        Some((Surface::Internals, &["GET", "HEAD"][..]))
    );
    assert_eq!(internals_endpoint("set-route"), Some((Surface::Admin, &["POST"][..])));
    assert_eq!(
        internals_endpoint("ddl/create/table/people"),
        Some((Surface::Admin, &["POST"][..]))
    );
    assert_eq!(
        internals_endpoint("enable-code/codebase/a.lua"),
        Some((Surface::Admin, &["PUT"][..]))
    );
    assert_eq!(internals_endpoint("unknown"), None);
}

#[test]
fn lua_assets_are_served_as_inline_text() {
    let response = asset_response("text/x-lua", b"return 1".to_vec(), false);
    assert_eq!(header(&response, CONTENT_TYPE), Some("text/plain; charset=utf-8"));
    assert_eq!(header(&response, CONTENT_DISPOSITION), Some("inline"));
    assert_eq!(header(&response, CONTENT_LENGTH), Some("8"));
}

#[test]
fn binary_assets_keep_their_mime_type() {
    let response = asset_response("image/png", vec![0x89, 0x50, 0xFF, 0x00], true);
    assert_eq!(header(&response, CONTENT_TYPE), Some("image/png"));
    assert_eq!(header(&response, CONTENT_LENGTH), Some("4"));
    assert!(header(&response, CONTENT_DISPOSITION).is_none());
}

#[test]
fn script_responses_default_to_html() {
    let response = script_response(ScriptResponse {
        status: 201,
        headers: vec![("x-trace".to_string(), "abc".to_string())],
        body: b"<p>ok</p>".to_vec(),
    })
    .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header(&response, CONTENT_TYPE), Some("text/html; charset=utf-8"));
    assert_eq!(response.headers().get("x-trace").unwrap(), "abc");

    let response = script_response(ScriptResponse {
        status: 200,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: b"{}".to_vec(),
    })
    .unwrap();
    assert_eq!(header(&response, CONTENT_TYPE), Some("application/json"));
}

#[test]
fn query_pairs_are_decoded() {
    let request = SiteRequest {
        method: "GET".to_string(),
        path: "/.query".to_string(),
        query: Some("sql=select+1%3B&maxBuffer=10&sql=ignored".to_string()),
        ..SiteRequest::default()
    };
    assert_eq!(request.query_param("sql").as_deref(), Some("select 1;"));
    assert_eq!(request.query_param("maxBuffer").as_deref(), Some("10"));
    assert_eq!(request.query_param("absent"), None);
}
