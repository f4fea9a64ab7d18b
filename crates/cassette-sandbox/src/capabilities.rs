// crates/cassette-sandbox/src/capabilities.rs
// ============================================================================
// Module: Script Capabilities
// Description: Request, response and deck capabilities handed to a script.
// Purpose: Make everything a script can touch explicit and per request.
// Dependencies: cassette-store, url
// ============================================================================

//! ## Overview
//! A script sees exactly what its [`Capabilities`] value carries: a snapshot
//! of the inbound request and, when the host opts in, a [`DeckCapability`]
//! for querying other cassettes. Nothing is registered process-wide; each
//! request builds its own capability object and it dies with the interpreter.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use cassette_store::Deck;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Content type whose body is decoded as form parameters.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

// ============================================================================
// SECTION: Request
// ============================================================================

/// Snapshot of the inbound request visible to a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Request path as received.
    pub path: String,
    /// Decoded query string pairs.
    pub query: Vec<(String, String)>,
    /// Parameters captured by the route template.
    pub route_params: Vec<(String, String)>,
    /// Header pairs with lower-case names.
    pub headers: Vec<(String, String)>,
    /// Raw request body.
    pub body: Vec<u8>,
}

impl ScriptRequest {
    /// Returns the first header value for `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Decodes the body as form parameters when the content type says so.
    #[must_use]
    pub fn form_params(&self) -> Vec<(String, String)> {
        let is_form = self.header("content-type").is_some_and(|value| {
            value
                .split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
        });
        if !is_form {
            return Vec::new();
        }
        url::form_urlencoded::parse(&self.body).into_owned().collect()
    }

    /// Returns the route parameter `name`.
    #[must_use]
    pub fn route_param(&self, name: &str) -> Option<&str> {
        lookup(&self.route_params, name)
    }

    /// Returns the query parameter `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        lookup(&self.query, name)
    }
}

/// Returns the first value stored under `name`.
pub(crate) fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
}

// ============================================================================
// SECTION: Response
// ============================================================================

/// Response produced by a script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers set by the script.
    pub headers: Vec<(String, String)>,
    /// Buffered response body.
    pub body: Vec<u8>,
}

impl Default for ScriptResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Capabilities
// ============================================================================

/// Cross-cassette access granted to a script.
#[derive(Debug, Clone)]
pub struct DeckCapability {
    /// Registry the script may resolve cassettes from.
    pub deck: Arc<Deck>,
    /// Whether `unsafe_query` is exposed on resolved cassettes.
    pub privileged: bool,
}

/// Everything a single script run may use.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Inbound request.
    pub request: ScriptRequest,
    /// Optional deck access (the `tapedeck` module).
    pub deck: Option<DeckCapability>,
}

impl Capabilities {
    /// Creates capabilities exposing only the request.
    #[must_use]
    pub fn for_request(request: ScriptRequest) -> Self {
        Self {
            request,
            deck: None,
        }
    }

    /// Adds deck access.
    #[must_use]
    pub fn with_deck(mut self, deck: Arc<Deck>, privileged: bool) -> Self {
        self.deck = Some(DeckCapability {
            deck,
            privileged,
        });
        self
    }
}
