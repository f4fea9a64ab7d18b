// crates/cassette-server/tests/support/mod.rs
// ============================================================================
// Module: HTTP Test Support
// Description: Test server lifecycle, config text and a recording audit sink.
// Purpose: Share setup across the HTTP surface suites.
// ============================================================================

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only helpers; not every suite uses every helper."
)]

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use cassette_config::CassetteConfig;
use cassette_server::CassetteServer;
use cassette_server::FailureAuditEvent;
use cassette_server::RefreshAuditEvent;
use cassette_server::RequestAuditEvent;
use cassette_server::ServeAuditSink;
use cassette_server::ServerError;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Renders a config serving `cassettes` with a fast refresh interval.
pub fn config_text(mode: &str, index: &str, cassettes: &[(&str, &Path)]) -> String {
    let mut text = format!(
        "[server]\nbind = \"127.0.0.1:0\"\nmode = \"{mode}\"\n\n\
         [dispatch]\nrefresh_interval_ms = 50\n\n\
         [sandbox]\ndebug_source = true\n\n\
         [deck]\nindex = \"{index}\"\n"
    );
    for (name, path) in cassettes {
        writeln!(
            text,
            "\n[[deck.cassettes]]\nname = \"{name}\"\npath = \"{}\"\ndataset = true",
            path.display()
        )
        .unwrap();
    }
    text
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink keeping every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    /// Request events.
    pub requests: Mutex<Vec<RequestAuditEvent>>,
    /// Refresh events.
    pub refreshes: Mutex<Vec<RefreshAuditEvent>>,
    /// Failure events.
    pub failures: Mutex<Vec<FailureAuditEvent>>,
}

impl ServeAuditSink for RecordingSink {
    fn record_request(&self, event: &RequestAuditEvent) {
        self.requests.lock().unwrap().push(event.clone());
    }

    fn record_refresh(&self, event: &RefreshAuditEvent) {
        self.refreshes.lock().unwrap().push(event.clone());
    }

    fn record_failure(&self, event: &FailureAuditEvent) {
        self.failures.lock().unwrap().push(event.clone());
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Running server bound to an ephemeral loopback port.
pub struct TestServer {
    /// Base URL without a trailing slash.
    pub base: String,
    /// Client that does not follow redirects.
    pub client: reqwest::Client,
    /// Shutdown trigger.
    shutdown: Option<oneshot::Sender<()>>,
    /// Serve task.
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Loads `config_text`, opens the deck and starts serving.
    pub async fn start(config_text: &str, audit: Arc<dyn ServeAuditSink>) -> Self {
        let config = CassetteConfig::from_toml_str(config_text).unwrap();
        let server = CassetteServer::from_config(config).unwrap().with_audit(audit);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_with_shutdown(listener, async move {
            let _ = signal.await;
        }));
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        Self {
            base: format!("http://{addr}"),
            client,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Absolute URL for `path` with encoded query pairs.
    pub fn url_with(&self, path: &str, pairs: &[(&str, &str)]) -> String {
        url::Url::parse_with_params(&self.url(path), pairs).unwrap().to_string()
    }

    /// Sends `method` to `path` and returns status, headers and body text.
    pub async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Vec<u8>,
    ) -> (u16, reqwest::header::HeaderMap, String) {
        let response = self.client.request(method, url).body(body).send().await.unwrap();
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await.unwrap();
        (status, headers, text)
    }

    /// GET shorthand.
    pub async fn get(&self, path: &str) -> (u16, reqwest::header::HeaderMap, String) {
        self.send(reqwest::Method::GET, &self.url(path), Vec::new()).await
    }

    /// Polls `path` until it answers `status`, returning the body.
    pub async fn wait_for(&self, path: &str, status: u16, body_prefix: &str) -> String {
        let started = Instant::now();
        loop {
            let (current, _, body) = self.get(path).await;
            if current == status && body.starts_with(body_prefix) {
                return body;
            }
            assert!(
                started.elapsed() < Duration::from_secs(5),
                "{path} still answers {current}: {body}"
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Triggers graceful shutdown and waits for the serve task.
    pub async fn stop(self) {
        let Self {
            shutdown,
            task,
            ..
        } = self;
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        task.await.unwrap().unwrap();
    }
}
