// crates/cassette-store/src/path.rs
// ============================================================================
// Module: Asset Paths and Catalog Rules
// Description: Path normalization, path hashing, mime and route validation.
// Purpose: Keep every catalog naming rule in one pure module.
// Dependencies: xxhash-rust
// ============================================================================

//! ## Overview
//! Asset paths are normalized before every lookup or write so that
//! `a//b/./c`, `/a/b/c` and `a/b/c` address the same asset. The normalized
//! path is hashed with XXH64 as a fast pre-filter; lookups always pair the
//! hash with an exact path comparison.

// ============================================================================
// SECTION: Imports
// ============================================================================

use xxhash_rust::xxh64::xxh64;

use crate::error::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix every codebase asset must live under.
pub const CODEBASE_PREFIX: &str = "codebase/";
/// Extension every codebase asset must carry.
pub const CODEBASE_EXTENSION: &str = ".lua";
/// Mime types accepted as executable script source.
pub const SCRIPT_MIME_TYPES: [&str; 2] = ["text/x-lua", "application/x-lua"];
/// Mime types whose content must be valid UTF-8.
pub const TEXT_MIME_TYPES: [&str; 5] =
    ["text/html", "text/json", "application/json", "application/x-lua", "text/x-lua"];
/// HTTP verbs a route may be mapped to.
pub const ROUTE_METHODS: [&str; 7] = ["GET", "POST", "HEAD", "PUT", "DELETE", "OPTIONS", "PATCH"];

// ============================================================================
// SECTION: Asset Paths
// ============================================================================

/// Normalizes an asset path to its slash-separated, relative form.
///
/// # Errors
///
/// Returns [`StoreError::InvalidAssetPath`] when nothing remains after
/// normalization.
pub fn normalize_asset_path(raw: &str) -> Result<String, StoreError> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(StoreError::InvalidAssetPath {
            path: raw.to_string(),
        });
    }
    Ok(segments.join("/"))
}

/// Hashes a normalized path for the lookup pre-filter.
#[must_use]
pub fn path_hash(normalized: &str) -> i64 {
    i64::from_ne_bytes(xxh64(normalized.as_bytes(), 0).to_ne_bytes())
}

/// Returns true when the mime type requires UTF-8 content.
#[must_use]
pub fn is_text_mime_type(mime_type: &str) -> bool {
    TEXT_MIME_TYPES.contains(&mime_type)
}

/// Returns true when the mime type marks executable script source.
#[must_use]
pub fn is_script_mime_type(mime_type: &str) -> bool {
    SCRIPT_MIME_TYPES.contains(&mime_type)
}

/// Checks the codebase prefix and extension rule for a normalized path.
///
/// # Errors
///
/// Returns [`StoreError::InvalidCodebase`] when the path is outside
/// `codebase/` or lacks the `.lua` extension.
pub fn validate_codebase_path(path: &str, mime_type: &str) -> Result<(), StoreError> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let valid = path.starts_with(CODEBASE_PREFIX)
        && file_name.len() > CODEBASE_EXTENSION.len()
        && file_name.ends_with(CODEBASE_EXTENSION);
    if valid {
        return Ok(());
    }
    Err(StoreError::InvalidCodebase {
        path: path.to_string(),
        mime_type: mime_type.to_string(),
        reason: format!(
            "codebase assets must be stored under {CODEBASE_PREFIX} with a {CODEBASE_EXTENSION} \
             extension"
        ),
    })
}

/// Guesses a mime type from a file extension (with or without the dot).
#[must_use]
pub fn mime_type_for_extension(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "lua" => "text/x-lua",
        "js" => "application/javascript",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// SECTION: Routes
// ============================================================================

/// Upper-cases and validates route methods, dropping duplicates.
///
/// # Errors
///
/// Returns [`StoreError::InvalidMethod`] for verbs outside [`ROUTE_METHODS`],
/// and [`StoreError::InvalidRoute`] when no method is given.
pub fn normalize_methods<S: AsRef<str>>(
    route: &str,
    methods: &[S],
) -> Result<Vec<String>, StoreError> {
    let mut normalized: Vec<String> = Vec::with_capacity(methods.len());
    for method in methods {
        let upper = method.as_ref().trim().to_ascii_uppercase();
        if !ROUTE_METHODS.contains(&upper.as_str()) {
            return Err(StoreError::InvalidMethod {
                method: upper,
            });
        }
        if !normalized.contains(&upper) {
            normalized.push(upper);
        }
    }
    if normalized.is_empty() {
        return Err(StoreError::InvalidRoute {
            route: route.to_string(),
            reason: "at least one method is required".to_string(),
        });
    }
    Ok(normalized)
}

/// Validates a route template.
///
/// Templates start with `/`; each segment is a literal, a `:name` parameter,
/// or (last only) a `*name` catch-all.
///
/// # Errors
///
/// Returns [`StoreError::InvalidRoute`] describing the first violation.
pub fn validate_route_template(route: &str) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidRoute {
        route: route.to_string(),
        reason: reason.to_string(),
    };
    let Some(rest) = route.strip_prefix('/') else {
        return Err(invalid("route must start with /"));
    };
    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len().saturating_sub(1);
    for (index, segment) in segments.iter().enumerate() {
        if segment.contains(['{', '}']) {
            return Err(invalid("braces are not allowed in routes"));
        }
        if let Some(name) = segment.strip_prefix(':') {
            if !is_identifier(name) {
                return Err(invalid("route parameters must be identifiers"));
            }
        } else if let Some(name) = segment.strip_prefix('*') {
            if index != last {
                return Err(invalid("catch-all parameter must be the last segment"));
            }
            if !is_identifier(name) {
                return Err(invalid("route parameters must be identifiers"));
            }
        } else if segment.contains([':', '*']) {
            return Err(invalid("parameters must occupy a whole segment"));
        }
    }
    Ok(())
}

/// Returns true when `name` matches `[A-Za-z_][A-Za-z0-9_]{0,127}`.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 128
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
