// crates/cassette-sandbox/tests/sandbox_host.rs
// ============================================================================
// Module: Sandbox Host Tests
// Description: Script execution against request, JSON and deck capabilities.
// Purpose: Validate isolation, resource bounds and error classification.
// ============================================================================

//! ## Overview
//! Integration tests for the sandbox host:
//! - Request/response handles and the `json` module
//! - Library allow-list and per-run isolation
//! - Deadline, memory and body bounds
//! - Cross-cassette queries through `tapedeck`

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cassette_sandbox::Capabilities;
use cassette_sandbox::SandboxConfig;
use cassette_sandbox::SandboxError;
use cassette_sandbox::SandboxHost;
use cassette_sandbox::Script;
use cassette_sandbox::ScriptRequest;
use cassette_sandbox::ScriptResponse;
use cassette_store::Cassette;
use cassette_store::Deadline;
use cassette_store::Deck;
use cassette_store::OpenMode;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn script(source: &str) -> Script {
    Script {
        asset_path: "codebase/test.lua".to_string(),
        source: source.to_string(),
    }
}

fn request() -> ScriptRequest {
    ScriptRequest {
        method: "GET".to_string(),
        path: "/api/test".to_string(),
        ..ScriptRequest::default()
    }
}

fn run_with(
    host: &SandboxHost,
    source: &str,
    capabilities: &Capabilities,
) -> Result<ScriptResponse, SandboxError> {
    host.execute(&script(source), capabilities, &Deadline::after(Duration::from_secs(5)))
}

fn run(source: &str, request: ScriptRequest) -> Result<ScriptResponse, SandboxError> {
    run_with(&SandboxHost::default(), source, &Capabilities::for_request(request))
}

fn body(response: &ScriptResponse) -> &str {
    std::str::from_utf8(&response.body).unwrap()
}

fn people_cassette(dir: &Path) {
    let cassette = Cassette::open(dir, OpenMode::Writable, true).unwrap();
    cassette.import_csv("people", "name,age\nbob,30\ncharlie,31\n".as_bytes()).unwrap();
    cassette.close().unwrap();
}

// ============================================================================
// SECTION: Request And Response
// ============================================================================

#[test]
fn script_reads_params_and_writes_body() {
    let mut request = request();
    request.query = vec![("name".to_string(), "world".to_string())];
    request.route_params = vec![("id".to_string(), "7".to_string())];
    request.headers = vec![("x-trace".to_string(), "abc".to_string())];
    let source = r#"
        local ctx = require("ctx")
        local req = ctx.req
        ctx.res:write_body("hello " .. req:param("name"))
        ctx.res:write_body(" #" .. req:route_param("id"))
        ctx.res:write_body(" " .. req:method() .. " " .. req:path())
        ctx.res:write_body(" " .. req:header("X-Trace"))
        ctx.res:write_body(" " .. tostring(req:param("missing")))
    "#;
    let response = run(source, request).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(body(&response), "hello world #7 GET /api/test abc nil");
}

#[test]
fn status_and_headers_are_recorded() {
    let source = r#"
        local res = require("ctx").res
        local first = res:write_status(201)
        local second = res:write_status(500)
        res:set_header("Content-Type", "application/json")
        local written = res:write_body(tostring(first) .. "," .. tostring(second))
        res:write_body("," .. written)
    "#;
    let response = run(source, request()).unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(
        response.headers,
        vec![("Content-Type".to_string(), "application/json".to_string())]
    );
    assert_eq!(body(&response), "true,false,10");
}

#[test]
fn form_parameters_shadow_query_parameters() {
    let mut request = request();
    request.method = "POST".to_string();
    request.query = vec![("name".to_string(), "query".to_string())];
    request.headers = vec![(
        "content-type".to_string(),
        "application/x-www-form-urlencoded; charset=utf-8".to_string(),
    )];
    request.body = b"name=form+value&other=1".to_vec();
    let source = r#"
        local ctx = require("ctx")
        ctx.res:write_body(ctx.req:param("name") .. "|" .. ctx.req:param("other"))
    "#;
    assert_eq!(body(&run(source, request).unwrap()), "form value|1");
}

#[test]
fn json_body_is_parsed_once() {
    let mut request = request();
    request.body = br#"{"n": 41, "tags": ["a", "b"]}"#.to_vec();
    let source = r#"
        local ctx = require("ctx")
        local first = ctx.req:parse_body()
        local again = ctx.req:parse_body("json")
        assert(first == again)
        ctx.res:write_body(tostring(first.n + 1) .. " " .. first.tags[2])
        local ok = pcall(function() return ctx.req:parse_body("text") end)
        ctx.res:write_body(" " .. tostring(ok))
    "#;
    assert_eq!(body(&run(source, request).unwrap()), "42 b false");
}

#[test]
fn text_body_is_returned_raw() {
    let mut request = request();
    request.body = b"raw body".to_vec();
    let source = r#"
        local ctx = require("ctx")
        ctx.res:write_body(ctx.req:parse_body("text"))
    "#;
    assert_eq!(body(&run(source, request).unwrap()), "raw body");
}

#[test]
fn json_module_round_trips() {
    let source = r#"
        local json = require("json")
        local value = json.from_json('{"b":"x","a":[1,2,3],"c":null}')
        assert(value.c == json.null)
        require("ctx").res:write_body(json.to_json(value))
    "#;
    assert_eq!(body(&run(source, request()).unwrap()), r#"{"a":[1,2,3],"b":"x","c":null}"#);
}

#[test]
fn body_cap_stops_the_script() {
    let host = SandboxHost::new(SandboxConfig {
        max_body_bytes: 4,
        ..SandboxConfig::default()
    });
    let capabilities = Capabilities::for_request(request());
    let err = run_with(&host, r#"require("ctx").res:write_body("hello")"#, &capabilities)
        .unwrap_err();
    match err {
        SandboxError::Runtime {
            message,
        } => assert!(message.contains("response body exceeds 4 bytes"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

// ============================================================================
// SECTION: Isolation
// ============================================================================

#[test]
fn only_allow_listed_libraries_are_reachable() {
    let source = r#"
        assert(io == nil and os == nil and package == nil and debug == nil)
        assert(load == nil and loadfile == nil and dofile == nil and print == nil)
        assert(collectgarbage == nil)
        assert(string.upper("x") == "X" and math.max(1, 2) == 2)
        assert(table.concat({"a", "b"}) == "ab" and utf8.char(72) == "H")
        local ok, err = pcall(require, "io")
        assert(not ok and string.find(tostring(err), "module 'io' is not available", 1, true))
        local ok_deck = pcall(require, "tapedeck")
        require("ctx").res:write_body(tostring(ok_deck))
    "#;
    assert_eq!(body(&run(source, request()).unwrap()), "false");
}

#[test]
fn globals_do_not_survive_between_runs() {
    let host = SandboxHost::default();
    let capabilities = Capabilities::for_request(request());
    let source = r#"
        counter = (counter or 0) + 1
        require("ctx").res:write_body(tostring(counter))
    "#;
    assert_eq!(body(&run_with(&host, source, &capabilities).unwrap()), "1");
    assert_eq!(body(&run_with(&host, source, &capabilities).unwrap()), "1");
}

// ============================================================================
// SECTION: Failures
// ============================================================================

#[test]
fn syntax_errors_are_compile_failures() {
    let err = run("local = 1", request()).unwrap_err();
    match err {
        SandboxError::Compile {
            message,
        } => assert!(message.contains("codebase/test.lua"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn raised_errors_are_runtime_failures() {
    let err = run(r#"error("boom")"#, request()).unwrap_err();
    match err {
        SandboxError::Runtime {
            message,
        } => assert!(message.contains("boom"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn runaway_scripts_hit_the_deadline() {
    let host = SandboxHost::default();
    let capabilities = Capabilities::for_request(request());
    let deadline = Deadline::after(Duration::from_millis(100));
    let err = host.execute(&script("while true do end"), &capabilities, &deadline).unwrap_err();
    assert_eq!(err, SandboxError::DeadlineExceeded);
}

#[test]
fn protected_calls_cannot_swallow_the_deadline() {
    let sources = [
        "while true do pcall(function() while true do end end) end",
        "while true do xpcall(function() while true do end end, function(e) return e end) end",
        "pcall(function() while true do pcall(function() while true do end end) end end)",
    ];
    for source in sources {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let host = SandboxHost::default();
            let capabilities = Capabilities::for_request(request());
            let deadline = Deadline::after(Duration::from_millis(200));
            let _ = sender.send(host.execute(&script(source), &capabilities, &deadline));
        });
        let outcome = receiver
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| panic!("script outlived its deadline: {source}"));
        assert_eq!(outcome.unwrap_err(), SandboxError::DeadlineExceeded, "{source}");
    }
}

#[test]
fn protected_calls_still_catch_script_errors() {
    let response = run(
        "local ok, err = pcall(error, 'boom'); require('ctx').res:write_body(tostring(ok))",
        request(),
    )
    .unwrap();
    assert_eq!(body(&response), "false");
}

#[test]
fn cancelled_requests_do_not_run() {
    let host = SandboxHost::default();
    let capabilities = Capabilities::for_request(request());
    let deadline = Deadline::after(Duration::from_secs(5));
    deadline.cancel();
    let err = host.execute(&script("error('unreachable')"), &capabilities, &deadline).unwrap_err();
    assert_eq!(err, SandboxError::DeadlineExceeded);
}

#[test]
fn memory_hungry_scripts_hit_the_limit() {
    let host = SandboxHost::new(SandboxConfig {
        memory_limit_bytes: 1024 * 1024,
        ..SandboxConfig::default()
    });
    let capabilities = Capabilities::for_request(request());
    let source = r#"
        local parts = {}
        for i = 1, 10000000 do parts[i] = string.rep("x", 64) .. i end
    "#;
    assert_eq!(run_with(&host, source, &capabilities).unwrap_err(), SandboxError::MemoryLimit);
}

#[test]
fn deadline_is_capped_at_the_ceiling() {
    let host = SandboxHost::new(SandboxConfig {
        deadline: Duration::from_secs(3600),
        ..SandboxConfig::default()
    });
    assert_eq!(host.config().deadline, Duration::from_secs(10));
}

// ============================================================================
// SECTION: Tapedeck
// ============================================================================

#[test]
fn tapedeck_queries_read_only_cassettes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data");
    people_cassette(&path);
    let mut deck = Deck::new();
    deck.load("data", Cassette::open(&path, OpenMode::ReadOnly, true).unwrap()).unwrap();
    let capabilities = Capabilities::for_request(request()).with_deck(Arc::new(deck), false);

    let source = r#"
        local tapedeck = require("tapedeck")
        local cassette = tapedeck.load(tapedeck.list()[1])
        local result = cassette:query("select name, age from people where age > ?", 30)
        local row = result.rows[1]
        require("ctx").res:write_body(result.columns[1] .. ":" .. row[1] .. ":" .. #result.rows)
        local ok = pcall(function() return cassette:unsafe_query("select 1", true) end)
        require("ctx").res:write_body(":" .. tostring(ok))
        local missing = pcall(tapedeck.load, "absent")
        require("ctx").res:write_body(":" .. tostring(missing))
    "#;
    let response = run_with(&SandboxHost::default(), source, &capabilities).unwrap();
    assert_eq!(body(&response), "name:charlie:1:false:false");
}

#[test]
fn privileged_tapedeck_runs_unsafe_queries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("admin");
    people_cassette(&path);
    let cassette = Cassette::open(&path, OpenMode::Writable, true).unwrap();
    cassette.enable_privileges().unwrap();
    let mut deck = Deck::new();
    deck.load("admin", cassette).unwrap();
    let capabilities = Capabilities::for_request(request()).with_deck(Arc::new(deck), true);

    let source = r#"
        local admin = require("tapedeck").load("admin")
        admin:unsafe_query("insert into people(name, age) values (?, ?)", false, "dana", 40)
        local rows = admin:unsafe_query("select count(*), max(age) from people", true)
        require("ctx").res:write_body(rows[1][1] .. "," .. rows[1][2])
        local ok = pcall(function() return admin:query("select 1") end)
        require("ctx").res:write_body("," .. tostring(ok))
    "#;
    let response = run_with(&SandboxHost::default(), source, &capabilities).unwrap();
    assert_eq!(body(&response), "3,40,false");
}
