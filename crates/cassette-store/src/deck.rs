// crates/cassette-store/src/deck.rs
// ============================================================================
// Module: Deck Registry
// Description: Named registry of cassettes with one designated index entry.
// Purpose: Resolve which cassette answers a given top-level path segment.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A [`Deck`] maps identifier names to shared [`Cassette`] handles. Loading a
//! name that already exists retires the previous cassette first. The deck is
//! mutated during startup and administration only; request paths read it
//! through a shared reference.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cassette::Cassette;
use crate::error::StoreError;
use crate::path::is_identifier;

// ============================================================================
// SECTION: Deck
// ============================================================================

/// Name to cassette registry.
///
/// # Invariants
/// - Every key matches the identifier grammar.
/// - `index`, when set, names a loaded cassette.
#[derive(Debug, Default)]
pub struct Deck {
    /// Loaded cassettes by name.
    entries: BTreeMap<String, Arc<Cassette>>,
    /// Designated index cassette.
    index: Option<String>,
}

impl Deck {
    /// Creates an empty deck.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `cassette` under `name`, retiring any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidCassetteName`] for names outside the
    /// identifier grammar, or the close error of the retired cassette.
    pub fn load(&mut self, name: &str, cassette: Cassette) -> Result<Arc<Cassette>, StoreError> {
        if !is_identifier(name) {
            return Err(StoreError::InvalidCassetteName {
                name: name.to_string(),
            });
        }
        if let Some(previous) = self.entries.remove(name) {
            retire(previous)?;
        }
        let shared = Arc::new(cassette);
        self.entries.insert(name.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    /// Designates the loaded cassette `name` as the index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CassetteNotFound`] when `name` is not loaded.
    pub fn set_index(&mut self, name: &str) -> Result<(), StoreError> {
        if !self.entries.contains_key(name) {
            return Err(StoreError::CassetteNotFound {
                name: name.to_string(),
            });
        }
        self.index = Some(name.to_string());
        Ok(())
    }

    /// Name of the index cassette.
    #[must_use]
    pub fn index_name(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// Index cassette handle.
    #[must_use]
    pub fn index(&self) -> Option<Arc<Cassette>> {
        self.index.as_deref().and_then(|name| self.get(name))
    }

    /// Cassette handle for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Cassette>> {
        self.entries.get(name).cloned()
    }

    /// Loaded names in lexicographic order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Closes every cassette, reporting the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first close error; later cassettes are still closed.
    pub fn close(self) -> Result<(), StoreError> {
        let mut first_error = None;
        for (_, cassette) in self.entries {
            if let Err(err) = retire(cassette)
                && first_error.is_none()
            {
                first_error = Some(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Closes a cassette when this is its last handle.
///
/// Handles still held elsewhere (in-flight requests) release the connection
/// when the last of them drops.
fn retire(cassette: Arc<Cassette>) -> Result<(), StoreError> {
    match Arc::try_unwrap(cassette) {
        Ok(cassette) => cassette.close(),
        Err(_) => Ok(()),
    }
}
