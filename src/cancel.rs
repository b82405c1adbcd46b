//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a cheaply clonable flag shared between the job router
//! and the worker executing a job. Workers poll it at batch boundaries; there
//! is no preemption.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ChatlensError, Result};

/// Shared cancellation flag polled at job-defined checkpoints.
///
/// # Example
///
/// ```rust
/// use chatlens::cancel::CancelToken;
///
/// let token = CancelToken::new();
/// let for_worker = token.clone();
///
/// assert!(!for_worker.is_canceled());
/// token.cancel();
/// assert!(for_worker.is_canceled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a fresh, un-canceled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `Err(Canceled)` once cancellation has been requested.
    ///
    /// Convenience for the common checkpoint shape:
    ///
    /// ```rust
    /// # use chatlens::cancel::CancelToken;
    /// # fn process_batch() {}
    /// # fn run(cancel: &CancelToken) -> chatlens::error::Result<()> {
    /// loop {
    ///     cancel.check()?;
    ///     process_batch();
    ///     # break;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(ChatlensError::Canceled)
        } else {
            Ok(())
        }
    }
}
