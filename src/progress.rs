//! Progress reporting types for long-running imports.
//!
//! This module provides a callback-based progress reporting mechanism.
//! The import coordinator pushes [`ImportProgress`] updates through a
//! [`ProgressCallback`] at a bounded rate: at least every
//! [`ProgressThrottle::DEFAULT_MESSAGES`] messages or every
//! [`ProgressThrottle::DEFAULT_INTERVAL`], whichever comes first.
//!
//! # Example
//!
//! ```rust
//! use chatlens::progress::{ImportPhase, ImportProgress, ProgressCallback};
//! use std::sync::Arc;
//!
//! let callback: ProgressCallback = Arc::new(|progress| {
//!     if let Some(pct) = progress.percentage() {
//!         println!("{:?}: {:.1}%", progress.phase, pct);
//!     }
//! });
//!
//! callback(ImportProgress::new(ImportPhase::Parsing, 512, Some(2048), 10));
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Phase of the import pipeline currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPhase {
    /// Identifying the file format.
    Sniffing,
    /// Streaming events out of the parser.
    Parsing,
    /// Bulk-inserting normalized batches into the store.
    Writing,
    /// Import finished.
    Done,
}

/// Progress information for a running import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportProgress {
    /// Pipeline phase currently executing.
    pub phase: ImportPhase,

    /// Number of input bytes consumed so far.
    pub bytes_processed: u64,

    /// Total input bytes, if known.
    pub total_bytes: Option<u64>,

    /// Number of messages that have passed normalization.
    pub messages_processed: u64,

    /// Free-form note for the boundary (e.g. detected format name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ImportProgress {
    /// Creates a new progress snapshot.
    pub fn new(
        phase: ImportPhase,
        bytes_processed: u64,
        total_bytes: Option<u64>,
        messages_processed: u64,
    ) -> Self {
        Self {
            phase,
            bytes_processed,
            total_bytes,
            messages_processed,
            note: None,
        }
    }

    /// Attaches a note to this snapshot.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Returns the progress as a percentage (0.0 - 100.0).
    ///
    /// Returns `None` if total bytes is not known.
    pub fn percentage(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.bytes_processed as f64 / total as f64) * 100.0
            }
        })
    }

    /// Returns whether the import has reached its terminal phase.
    pub fn is_done(&self) -> bool {
        self.phase == ImportPhase::Done
    }
}

/// Callback type for receiving progress updates.
///
/// Thread-safe; the import worker invokes it from its own thread.
pub type ProgressCallback = Arc<dyn Fn(ImportProgress) + Send + Sync>;

/// Creates a no-op progress callback.
pub fn no_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

/// Rate limiter deciding when a progress update is due.
///
/// Emits when either the message delta or the elapsed time since the last
/// emission crosses its threshold.
#[derive(Debug)]
pub struct ProgressThrottle {
    every_messages: u64,
    min_interval: Duration,
    last_emit: Instant,
    last_count: u64,
}

impl ProgressThrottle {
    /// Emit at least every this many messages.
    pub const DEFAULT_MESSAGES: u64 = 1000;
    /// Emit at least this often.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

    /// Creates a throttle with the default cadence.
    pub fn new() -> Self {
        Self::with_cadence(Self::DEFAULT_MESSAGES, Self::DEFAULT_INTERVAL)
    }

    /// Creates a throttle with a custom cadence.
    pub fn with_cadence(every_messages: u64, min_interval: Duration) -> Self {
        Self {
            every_messages,
            min_interval,
            last_emit: Instant::now(),
            last_count: 0,
        }
    }

    /// Returns `true` if an update should be emitted for `messages_processed`,
    /// and records the emission.
    pub fn should_emit(&mut self, messages_processed: u64) -> bool {
        let due = messages_processed.saturating_sub(self.last_count) >= self.every_messages
            || self.last_emit.elapsed() >= self.min_interval;
        if due {
            self.last_emit = Instant::now();
            self.last_count = messages_processed;
        }
        due
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let progress = ImportProgress::new(ImportPhase::Parsing, 500, Some(1000), 50);
        assert_eq!(progress.percentage(), Some(50.0));

        let unknown = ImportProgress::new(ImportPhase::Parsing, 500, None, 50);
        assert_eq!(unknown.percentage(), None);

        let empty = ImportProgress::new(ImportPhase::Parsing, 0, Some(0), 0);
        assert_eq!(empty.percentage(), Some(100.0));
    }

    #[test]
    fn test_is_done() {
        assert!(ImportProgress::new(ImportPhase::Done, 1, Some(1), 1).is_done());
        assert!(!ImportProgress::new(ImportPhase::Writing, 1, Some(1), 1).is_done());
    }

    #[test]
    fn test_throttle_message_threshold() {
        let mut throttle = ProgressThrottle::with_cadence(100, Duration::from_secs(3600));
        assert!(!throttle.should_emit(50));
        assert!(throttle.should_emit(150));
        // Counter resets after emission
        assert!(!throttle.should_emit(200));
        assert!(throttle.should_emit(250));
    }

    #[test]
    fn test_throttle_time_threshold() {
        let mut throttle = ProgressThrottle::with_cadence(u64::MAX, Duration::ZERO);
        assert!(throttle.should_emit(1));
        assert!(throttle.should_emit(2));
    }

    #[test]
    fn test_no_progress_callback() {
        let callback = no_progress();
        callback(ImportProgress::new(ImportPhase::Sniffing, 0, None, 0));
    }

    #[test]
    fn test_progress_serialization() {
        let progress = ImportProgress::new(ImportPhase::Writing, 10, Some(20), 5).with_note("line");
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"writing\""));
        assert!(json.contains("\"line\""));
    }
}
