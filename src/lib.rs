//! # chatlens
//!
//! A local-first chat-log analytics engine. chatlens imports raw export
//! files from messaging platforms (LINE, QQ, WeChat, plus its own native
//! exports) into a normalized SQLite corpus and answers analytics queries
//! over it: activity ranking, per-day "dragon king" top talkers, monologue
//! streaks, repeat chains, catchphrases, name history and conversation
//! sessions.
//!
//! ## Overview
//!
//! An import flows sniff → parse → normalize → bulk write:
//!
//! - [`sniffer`] identifies the file format from extension and content
//!   signatures;
//! - [`parsers`] stream the file as a uniform tagged event sequence with
//!   bounded memory;
//! - [`normalize`] canonicalizes sender identity, timestamps, replies and
//!   name history, deduplicating on re-import;
//! - [`store`] persists everything in one embedded SQLite file under a
//!   versioned, idempotently migrated schema.
//!
//! [`import`] drives that pipeline with progress reporting and cooperative
//! cancellation; [`analytics`] reads the store back; [`worker`] keeps both
//! off the interactive thread; [`catalog`] tracks the imported corpora; and
//! [`engine`] ties it all together as the boundary API.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatlens::prelude::*;
//!
//! let engine = Engine::new(AppConfig::from_env())?;
//!
//! // Import an export file; progress streams back on the job id.
//! let job = engine.import_start("line_export.txt".as_ref(), None);
//! let output = engine.wait(job, |p| {
//!     if let Some(pct) = p.percentage() {
//!         eprintln!("{:?} {pct:.0}%", p.phase);
//!     }
//! })?;
//!
//! // Query it.
//! if let JobOutput::Import(report) = output {
//!     let job = engine.analytics_start(
//!         report.corpus_id,
//!         TimeFilter::all(),
//!         AnalyticsKind::Activity,
//!         None,
//!     );
//!     println!("{:?}", engine.wait(job, |_| {})?);
//! }
//! # Ok::<(), chatlens::ChatlensError>(())
//! ```
//!
//! ## Module Structure
//!
//! - [`engine`] — boundary facade ([`Engine`](engine::Engine))
//! - [`sniffer`] — format registry and content sniffing
//! - [`parsers`] — one streaming parser per input format
//! - [`normalize`] — identity, name history, replies, dedup
//! - [`store`] — SQLite store, migrations, SQL lab
//! - [`import`] — the import pipeline
//! - [`analytics`] — the statistics queries
//! - [`worker`] — worker pool and job router
//! - [`catalog`] — corpus list and selection
//! - [`error`] — unified error type ([`ChatlensError`])

pub mod analytics;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod import;
pub mod message;
pub mod normalize;
pub mod parsers;
pub mod progress;
pub mod sniffer;
pub mod store;
pub mod worker;

pub use error::{ChatlensError, Result};

/// Convenient re-exports for common usage.
///
/// ```rust
/// use chatlens::prelude::*;
/// ```
pub mod prelude {
    pub use crate::analytics::TimeFilter;
    pub use crate::cancel::CancelToken;
    pub use crate::config::{AppConfig, ParseOptions};
    pub use crate::engine::Engine;
    pub use crate::error::{ChatlensError, Result};
    pub use crate::import::ImportReport;
    pub use crate::message::{ChatKind, MessageKind};
    pub use crate::progress::{ImportPhase, ImportProgress};
    pub use crate::store::corpus::{CorpusId, CorpusMeta};
    pub use crate::worker::{AnalyticsKind, JobEvent, JobId, JobOutput, JobUpdate};
}
