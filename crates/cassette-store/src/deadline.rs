// crates/cassette-store/src/deadline.rs
// ============================================================================
// Module: Deadlines
// Description: Cancellable deadline shared by queries and script runs.
// Purpose: Propagate request cancellation into blocking work.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A [`Deadline`] combines a fixed expiry instant with a shared cancellation
//! flag. Blocking work polls [`Deadline::check`] at safe points; the async
//! side holds a [`CancelOnDrop`] guard so a dropped request future cancels the
//! work it spawned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use crate::error::StoreError;

// ============================================================================
// SECTION: Deadline
// ============================================================================

/// Expiry instant plus a shared cancellation flag.
#[derive(Debug, Clone)]
pub struct Deadline {
    /// Instant after which work must stop.
    expires_at: Instant,
    /// Set when the owner abandons the work.
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// Creates a deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            expires_at: now.checked_add(timeout).unwrap_or(now),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a deadline no later than `ceiling` from now.
    #[must_use]
    pub fn capped(&self, ceiling: Duration) -> Self {
        let now = Instant::now();
        let cap = now.checked_add(ceiling).unwrap_or(now);
        Self {
            expires_at: self.expires_at.min(cap),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Marks the work as abandoned.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once cancelled or past expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || Instant::now() >= self.expires_at
    }

    /// Time left before expiry.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Fails once the deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DeadlineExceeded`] when expired or cancelled.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_expired() {
            return Err(StoreError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Returns a guard that cancels this deadline when dropped.
    #[must_use]
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop {
            deadline: self.clone(),
        }
    }
}

/// Cancels its deadline on drop.
#[derive(Debug)]
pub struct CancelOnDrop {
    /// Deadline to cancel.
    deadline: Deadline,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.deadline.cancel();
    }
}
