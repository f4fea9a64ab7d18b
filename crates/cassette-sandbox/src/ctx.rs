// crates/cassette-sandbox/src/ctx.rs
// ============================================================================
// Module: Request/Response Handles
// Description: The `ctx` module exposed to scripts.
// Purpose: Give scripts read access to the request and buffered response writes.
// Dependencies: mlua, serde_json
// ============================================================================

//! ## Overview
//! `require("ctx")` yields `{req, res}`. `req` reads route, query and form
//! parameters, headers and a lazily parsed body. `res` buffers the response
//! body (capped), the status (first write wins) and headers.
//!
//! ## Invariants
//! - The body is parsed at most once per run; later calls return the cache.
//! - Header names are HTTP tokens and values never carry CR, LF or NUL.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use mlua::Lua;
use mlua::LuaSerdeExt;
use mlua::RegistryKey;
use mlua::Table;
use mlua::UserData;
use mlua::UserDataMethods;
use mlua::Value;

use crate::capabilities::ScriptRequest;
use crate::capabilities::ScriptResponse;
use crate::capabilities::lookup;

// ============================================================================
// SECTION: Body Codecs
// ============================================================================

/// Body decoding requested by `req:parse_body`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyCodec {
    /// Decode as JSON into Lua values.
    Json,
    /// Return the raw body as a Lua string.
    Text,
}

impl BodyCodec {
    /// Parses a codec name; `None` selects JSON.
    fn parse(name: Option<&str>) -> mlua::Result<Self> {
        match name {
            None | Some("json") => Ok(Self::Json),
            Some("text") => Ok(Self::Text),
            Some(other) => Err(mlua::Error::runtime(format!("unsupported body codec '{other}'"))),
        }
    }

    /// Codec name as scripts spell it.
    const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

// ============================================================================
// SECTION: Request Handle
// ============================================================================

/// Script-facing view of the inbound request.
pub(crate) struct RequestHandle {
    /// Request snapshot.
    request: Rc<ScriptRequest>,
    /// Form parameters decoded from the body.
    form: Vec<(String, String)>,
    /// First parse of the body.
    parsed: RefCell<Option<(BodyCodec, RegistryKey)>>,
}

impl RequestHandle {
    /// Wraps a request snapshot.
    pub(crate) fn new(request: Rc<ScriptRequest>) -> Self {
        let form = request.form_params();
        Self {
            request,
            form,
            parsed: RefCell::new(None),
        }
    }

    /// Form parameter first, then query parameter.
    fn param(&self, name: &str) -> Option<String> {
        lookup(&self.form, name).or_else(|| self.request.query_param(name)).map(str::to_string)
    }

    /// Decodes the body once and caches the result in the registry.
    fn parse_body<'lua>(&self, lua: &'lua Lua, codec: BodyCodec) -> mlua::Result<Value<'lua>> {
        if let Some((cached, key)) = self.parsed.borrow().as_ref() {
            if *cached != codec {
                return Err(mlua::Error::runtime(format!(
                    "body already parsed as {}",
                    cached.as_str()
                )));
            }
            return lua.registry_value(key);
        }
        let value = match codec {
            BodyCodec::Text => Value::String(lua.create_string(&self.request.body)?),
            BodyCodec::Json if self.request.body.is_empty() => Value::Nil,
            BodyCodec::Json => {
                let decoded: serde_json::Value =
                    serde_json::from_slice(&self.request.body).map_err(mlua::Error::external)?;
                lua.to_value(&decoded)?
            }
        };
        let key = lua.create_registry_value(value.clone())?;
        *self.parsed.borrow_mut() = Some((codec, key));
        Ok(value)
    }
}

impl UserData for RequestHandle {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("method", |_, this, ()| Ok(this.request.method.clone()));
        methods.add_method("path", |_, this, ()| Ok(this.request.path.clone()));
        methods.add_method("param", |_, this, name: String| Ok(this.param(&name)));
        methods.add_method("route_param", |_, this, name: String| {
            Ok(this.request.route_param(&name).map(str::to_string))
        });
        methods.add_method("header", |_, this, name: String| {
            Ok(this.request.header(&name).map(str::to_string))
        });
        methods.add_method("parse_body", |lua, this, codec: Option<String>| {
            let codec = BodyCodec::parse(codec.as_deref())?;
            this.parse_body(lua, codec)
        });
    }
}

// ============================================================================
// SECTION: Response State
// ============================================================================

/// Buffered response written by a script.
#[derive(Debug)]
pub(crate) struct ResponseState {
    /// Status set by the first `write_status` call.
    status: Option<u16>,
    /// Headers in insertion order.
    headers: Vec<(String, String)>,
    /// Body bytes.
    body: Vec<u8>,
    /// Body cap.
    max_body_bytes: usize,
}

impl ResponseState {
    /// Creates an empty response with a body cap.
    pub(crate) const fn new(max_body_bytes: usize) -> Self {
        Self {
            status: None,
            headers: Vec::new(),
            body: Vec::new(),
            max_body_bytes,
        }
    }

    /// Appends body bytes, failing past the cap.
    pub(crate) fn write_body(&mut self, bytes: &[u8]) -> Result<usize, String> {
        let total = self.body.len().saturating_add(bytes.len());
        if total > self.max_body_bytes {
            return Err(format!("response body exceeds {} bytes", self.max_body_bytes));
        }
        self.body.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Sets the status unless one was already set.
    pub(crate) fn write_status(&mut self, code: i64) -> Result<bool, String> {
        let code = u16::try_from(code)
            .ok()
            .filter(|code| (100 ..= 599).contains(code))
            .ok_or_else(|| format!("invalid status code {code}"))?;
        if self.status.is_some() {
            return Ok(false);
        }
        self.status = Some(code);
        Ok(true)
    }

    /// Replaces any header with the same name (case-insensitive).
    pub(crate) fn set_header(&mut self, name: &str, value: &str) -> Result<(), String> {
        if !is_header_name(name) {
            return Err(format!("invalid header name '{name}'"));
        }
        if value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0)) {
            return Err(format!("invalid value for header '{name}'"));
        }
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Moves the buffered response out.
    pub(crate) fn finish(&mut self) -> ScriptResponse {
        ScriptResponse {
            status: self.status.unwrap_or(200),
            headers: std::mem::take(&mut self.headers),
            body: std::mem::take(&mut self.body),
        }
    }
}

/// Returns true when `name` is a non-empty HTTP token.
fn is_header_name(name: &str) -> bool {
    const TOKEN_SYMBOLS: &[u8] = b"!#$%&'*+-.^_`|~";
    !name.is_empty()
        && name.bytes().all(|byte| byte.is_ascii_alphanumeric() || TOKEN_SYMBOLS.contains(&byte))
}

// ============================================================================
// SECTION: Response Handle
// ============================================================================

/// Script-facing writer over the shared response state.
pub(crate) struct ResponseHandle {
    /// State read back by the host after the run.
    state: Rc<RefCell<ResponseState>>,
}

impl UserData for ResponseHandle {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("write_body", |_, this, body: mlua::String| {
            this.state.borrow_mut().write_body(body.as_bytes()).map_err(mlua::Error::runtime)
        });
        methods.add_method("write_status", |_, this, code: i64| {
            this.state.borrow_mut().write_status(code).map_err(mlua::Error::runtime)
        });
        methods.add_method("set_header", |_, this, (name, value): (String, String)| {
            this.state.borrow_mut().set_header(&name, &value).map_err(mlua::Error::runtime)
        });
    }
}

// ============================================================================
// SECTION: Module
// ============================================================================

/// Builds the `ctx` module table.
pub(crate) fn module<'lua>(
    lua: &'lua Lua,
    request: Rc<ScriptRequest>,
    response: Rc<RefCell<ResponseState>>,
) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;
    table.set("req", RequestHandle::new(request))?;
    table.set(
        "res",
        ResponseHandle {
            state: response,
        },
    )?;
    Ok(table)
}
