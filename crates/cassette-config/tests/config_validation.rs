// crates/cassette-config/tests/config_validation.rs
// ============================================================================
// Module: Config Validation Tests
// Description: Defaults, load guards and fail-closed validation.
// Purpose: Ensure serving configs are strict about limits and exposure.
// ============================================================================

//! ## Overview
//! Loads config text and files and checks defaults, size and encoding guards,
//! and the fail-closed validation rules.

#![allow(clippy::use_debug, reason = "Test-only diagnostics are permitted.")]

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use cassette_config::CassetteConfig;
use cassette_config::ConfigError;
use cassette_config::ServeMode;
use cassette_store::OpenMode;
use tempfile::NamedTempFile;
use tempfile::TempDir;

type TestResult = Result<(), String>;

const MINIMAL: &str = r#"
[deck]
index = "site"

[[deck.cassettes]]
name = "site"
path = "/srv/site"
"#;

fn minimal() -> Result<CassetteConfig, String> {
    CassetteConfig::from_toml_str(MINIMAL).map_err(|err| err.to_string())
}

fn assert_invalid<T>(result: Result<T, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config".to_string()),
    }
}

#[test]
fn minimal_config_gets_defaults() -> TestResult {
    let config = minimal()?;
    if config.server.bind != "127.0.0.1:7010" || config.server.mode != ServeMode::Public {
        return Err(format!("unexpected server defaults: {:?}", config.server));
    }
    if config.refresh_interval() != Duration::from_secs(1) {
        return Err("unexpected refresh interval".to_string());
    }
    let sandbox = config.sandbox_config();
    if sandbox.deadline != Duration::from_secs(10) || sandbox.max_query_bytes != 1_000_000 {
        return Err(format!("unexpected sandbox defaults: {sandbox:?}"));
    }
    if !config.sandbox.enable_deck || config.sandbox.debug_source {
        return Err("unexpected sandbox flags".to_string());
    }
    if config.server.mode.open_mode() != OpenMode::ReadOnly {
        return Err("public mode must open read-only".to_string());
    }
    Ok(())
}

#[test]
fn full_config_parses() -> TestResult {
    let text = r#"
[server]
bind = "127.0.0.1:0"
mode = "private"
max_body_bytes = 4096

[dispatch]
refresh_interval_ms = 250

[sandbox]
deadline_ms = 500
memory_limit_bytes = 1048576
enable_deck = false
debug_source = true

[query]
max_buffer_bytes = 2048
timeout_ms = 1000

[deck]
index = "index"

[[deck.cassettes]]
name = "index"
path = "/srv/index"
dataset = true

[[deck.cassettes]]
name = "auth"
path = "/srv/auth"
"#;
    let config = CassetteConfig::from_toml_str(text).map_err(|err| err.to_string())?;
    let sandbox = config.sandbox_config();
    if sandbox.max_body_bytes != 4096 || sandbox.deadline != Duration::from_millis(500) {
        return Err(format!("unexpected sandbox config: {sandbox:?}"));
    }
    if config.server.mode.open_mode() != OpenMode::Writable || config.deck.cassettes.len() != 2 {
        return Err("unexpected deck".to_string());
    }
    if !config.deck.cassettes[0].dataset || config.deck.cassettes[1].dataset {
        return Err("unexpected dataset flags".to_string());
    }
    Ok(())
}

#[test]
fn unknown_fields_are_rejected() -> TestResult {
    let text = format!("{MINIMAL}\n[server]\nport = 1\n");
    assert_invalid(CassetteConfig::from_toml_str(&text), "config parse error")
}

#[test]
fn private_mode_requires_loopback() -> TestResult {
    let mut config = minimal()?;
    config.server.mode = ServeMode::Private;
    config.server.bind = "0.0.0.0:7010".to_string();
    assert_invalid(config.validate(), "private mode requires a loopback bind address")?;
    config.server.bind = "[::1]:7010".to_string();
    config.validate().map_err(|err| err.to_string())
}

#[test]
fn bind_must_be_a_socket_address() -> TestResult {
    let mut config = minimal()?;
    config.server.bind = "localhost".to_string();
    assert_invalid(config.validate(), "server.bind is not a socket address")
}

#[test]
fn limits_are_range_checked() -> TestResult {
    let mut config = minimal()?;
    config.sandbox.deadline_ms = 10_001;
    assert_invalid(config.validate(), "sandbox.deadline_ms out of range")?;

    let mut config = minimal()?;
    config.query.max_buffer_bytes = 1_000_001;
    assert_invalid(config.validate(), "query.max_buffer_bytes out of range")?;

    let mut config = minimal()?;
    config.dispatch.refresh_interval_ms = 0;
    assert_invalid(config.validate(), "dispatch.refresh_interval_ms must be greater than zero")?;

    let mut config = minimal()?;
    config.server.max_body_bytes = 0;
    assert_invalid(config.validate(), "server.max_body_bytes must be greater than zero")
}

#[test]
fn deck_names_are_checked() -> TestResult {
    let mut config = minimal()?;
    config.deck.index = "other".to_string();
    assert_invalid(config.validate(), "deck.index names an unknown cassette")?;

    let mut config = minimal()?;
    let mut duplicate = config.deck.cassettes[0].clone();
    duplicate.path = PathBuf::from("/srv/copy");
    config.deck.cassettes.push(duplicate);
    assert_invalid(config.validate(), "duplicate cassette name: site")?;

    let mut config = minimal()?;
    config.deck.cassettes[0].name = "bad name".to_string();
    assert_invalid(config.validate(), "invalid cassette name")
}

#[test]
fn load_resolves_relative_paths() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let path = dir.path().join("cassette.toml");
    let text = MINIMAL.replace("/srv/site", "tapes/site");
    std::fs::write(&path, text).map_err(|err| err.to_string())?;
    let config = CassetteConfig::load(&path).map_err(|err| err.to_string())?;
    if config.deck.cassettes[0].path != dir.path().join("tapes/site") {
        return Err(format!("unexpected path: {}", config.deck.cassettes[0].path.display()));
    }
    Ok(())
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&vec![b'#'; 1_048_577]).map_err(|err| err.to_string())?;
    assert_invalid(CassetteConfig::load(file.path()), "config file exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(CassetteConfig::load(file.path()), "config file must be utf-8")
}

#[test]
fn load_reports_missing_files() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    assert_invalid(CassetteConfig::load(&dir.path().join("absent.toml")), "config io error")
}
