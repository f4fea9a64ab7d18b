// crates/cassette-store/src/bounded.rs
// ============================================================================
// Module: Bounded Output
// Description: Write-through sink guard with an all-or-nothing byte budget.
// Purpose: Stream query results of unknown size without unbounded output.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`BoundedWriter`] forwards whole chunks to its sink while the running total
//! stays within budget. A chunk that would overshoot is rejected entirely with
//! [`WriteOverflow`]; nothing of it reaches the sink.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;

use crate::error::StoreError;
use crate::error::WriteOverflow;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hard ceiling (and default) for query output in bytes.
pub const MAX_QUERY_BYTES: usize = 1_000_000;

/// Clamps a caller-requested budget to the ceiling.
///
/// Negative or oversized requests fall back to [`MAX_QUERY_BYTES`].
#[must_use]
pub fn clamp_query_budget(requested: i64) -> usize {
    usize::try_from(requested)
        .ok()
        .filter(|budget| *budget <= MAX_QUERY_BYTES)
        .unwrap_or(MAX_QUERY_BYTES)
}

// ============================================================================
// SECTION: Writer
// ============================================================================

/// Byte-budget guard around an output sink.
#[derive(Debug)]
pub struct BoundedWriter<W> {
    /// Destination sink.
    sink: W,
    /// Budget in bytes.
    max_bytes: usize,
    /// Bytes accepted so far.
    total_bytes: usize,
}

impl<W: Write> BoundedWriter<W> {
    /// Wraps `sink` with a budget of `max_bytes`.
    pub const fn new(sink: W, max_bytes: usize) -> Self {
        Self {
            sink,
            max_bytes,
            total_bytes: 0,
        }
    }

    /// Writes `chunk` in full or rejects it in full.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteOverflow`] when the chunk would exceed the
    /// budget, or [`StoreError::Io`] when the sink fails.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        let next_total = self.total_bytes.saturating_add(chunk.len());
        if next_total > self.max_bytes {
            return Err(WriteOverflow {
                total: self.total_bytes,
                max: self.max_bytes,
                next: chunk.len(),
            }
            .into());
        }
        self.sink.write_all(chunk)?;
        self.total_bytes = next_total;
        Ok(())
    }

    /// Bytes accepted so far.
    #[must_use]
    pub const fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Flushes and returns the sink.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when flushing fails.
    pub fn finish(mut self) -> Result<W, StoreError> {
        self.sink.flush()?;
        Ok(self.sink)
    }
}
