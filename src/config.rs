//! Configuration types for parsing and the application shell.
//!
//! # Example
//!
//! ```rust
//! use chatlens::config::ParseOptions;
//! use chrono::FixedOffset;
//!
//! let options = ParseOptions::new()
//!     .with_batch_size(250)
//!     .with_tz_offset(FixedOffset::east_opt(9 * 3600).unwrap());
//! assert_eq!(options.batch_size, 250);
//! ```

use std::env;
use std::path::PathBuf;

use chrono::{FixedOffset, Local, Offset};

use crate::progress::ProgressThrottle;

/// Options controlling a single parse/import run.
///
/// Batches bound parser memory: a parser may buffer at most `batch_size`
/// messages plus its open-file buffers, independent of file size.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Messages per emitted batch (and per write transaction).
    ///
    /// Default: 500. Capped at [`ProgressThrottle::DEFAULT_MESSAGES`]:
    /// progress is only reportable at batch boundaries, so a larger batch
    /// would break the 1000-message reporting cadence.
    pub batch_size: usize,

    /// Buffer size for file reading.
    ///
    /// Default: 64 KiB.
    pub buffer_size: usize,

    /// Maximum size of a single assembled message in bytes.
    ///
    /// Default: 1 MiB. Larger records are treated as record-level errors.
    pub max_message_size: usize,

    /// Skip records that fail to parse instead of aborting.
    ///
    /// Default: `true`. Structural errors abort regardless.
    pub skip_invalid: bool,

    /// Timezone offset used to interpret wall-clock timestamps in exports
    /// that carry no zone.
    ///
    /// Default: the host's local offset.
    pub tz_offset: FixedOffset,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            buffer_size: 64 * 1024,
            max_message_size: 1024 * 1024,
            skip_invalid: true,
            tz_offset: host_offset(),
        }
    }
}

impl ParseOptions {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size, clamped to
    /// `1..=`[`ProgressThrottle::DEFAULT_MESSAGES`].
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.clamp(1, ProgressThrottle::DEFAULT_MESSAGES as usize);
        self
    }

    /// Sets the read buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the maximum assembled message size.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets whether record-level errors are skipped.
    #[must_use]
    pub fn with_skip_invalid(mut self, skip: bool) -> Self {
        self.skip_invalid = skip;
        self
    }

    /// Sets the wall-clock timezone offset.
    #[must_use]
    pub fn with_tz_offset(mut self, offset: FixedOffset) -> Self {
        self.tz_offset = offset;
        self
    }
}

/// Returns the host's current UTC offset.
pub fn host_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// Application-level configuration, read from the environment.
///
/// | Variable | Meaning | Default |
/// |---|---|---|
/// | `CHATLENS_DB` | corpus database path | `./chatlens.db` |
/// | `CHATLENS_LOG` | tracing filter | `info` |
/// | `CHATLENS_TZ_OFFSET` | wall-clock offset in seconds east of UTC | host zone |
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the single corpus database file.
    pub db_path: PathBuf,

    /// Tracing filter directive (e.g. `info`, `chatlens=debug`).
    pub log_filter: String,

    /// Timezone override applied to new imports, if set.
    pub tz_offset: Option<FixedOffset>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("chatlens.db"),
            log_filter: "info".to_string(),
            tz_offset: None,
        }
    }
}

impl AppConfig {
    /// Builds the configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = env::var("CHATLENS_DB") {
            if !path.is_empty() {
                config.db_path = PathBuf::from(path);
            }
        }
        if let Ok(filter) = env::var("CHATLENS_LOG") {
            if !filter.is_empty() {
                config.log_filter = filter;
            }
        }
        if let Ok(secs) = env::var("CHATLENS_TZ_OFFSET") {
            config.tz_offset = secs
                .parse::<i32>()
                .ok()
                .and_then(FixedOffset::east_opt);
        }
        config
    }

    /// Parse options derived from this configuration.
    pub fn parse_options(&self) -> ParseOptions {
        let mut options = ParseOptions::default();
        if let Some(offset) = self.tz_offset {
            options.tz_offset = offset;
        }
        options
    }
}
