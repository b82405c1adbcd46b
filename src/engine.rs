//! Boundary facade.
//!
//! The [`Engine`] is the single entry point the shell talks to. It owns the
//! interactive store connection (catalog reads and small writes), the worker
//! pool, and the update channel. Long-running work (imports, analytics,
//! SQL-lab queries) never runs on the caller's thread: it is submitted to
//! the [`JobRouter`](crate::worker::JobRouter) and observed through
//! [`JobUpdate`] events.
//!
//! # Example
//!
//! ```rust,no_run
//! use chatlens::config::AppConfig;
//! use chatlens::engine::Engine;
//!
//! let engine = Engine::new(AppConfig::from_env())?;
//! let job = engine.import_start("export.txt".as_ref(), None);
//! let report = engine.wait(job, |p| eprintln!("{:?}", p.phase))?;
//! println!("{report:?}");
//! # Ok::<(), chatlens::ChatlensError>(())
//! ```

use std::path::Path;
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

use tracing::debug;

use crate::analytics::TimeFilter;
use crate::catalog::SessionCatalog;
use crate::config::{AppConfig, ParseOptions};
use crate::error::{ChatlensError, Result};
use crate::progress::ImportProgress;
use crate::store::corpus::{CorpusId, CorpusMeta};
use crate::store::{MigrationInfo, SqlResult, Store, TableSchema, DEFAULT_SQL_ROW_CAP};
use crate::worker::{
    AnalyticsKind, JobEvent, JobId, JobKind, JobOutput, JobRouter, JobUpdate,
};

/// The boundary API.
pub struct Engine {
    config: AppConfig,
    store: Store,
    router: JobRouter,
    updates: Receiver<JobUpdate>,
}

impl Engine {
    /// Opens the store (running pending migrations) and starts the pool.
    pub fn new(config: AppConfig) -> Result<Self> {
        let store = Store::open(&config.db_path)?;
        let (tx, rx) = channel();
        let router = JobRouter::new(config.db_path.clone(), tx);
        Ok(Self {
            config,
            store,
            router,
            updates: rx,
        })
    }

    /// Application configuration in effect.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// `sessions.list`
    pub fn sessions_list(&self) -> Result<Vec<CorpusMeta>> {
        SessionCatalog::new(&self.store).list()
    }

    /// `sessions.select`
    pub fn sessions_select(&self, corpus: CorpusId) -> Result<()> {
        SessionCatalog::new(&self.store).select(corpus)
    }

    /// The selected corpus, if any.
    pub fn sessions_selected(&self) -> Result<Option<CorpusMeta>> {
        SessionCatalog::new(&self.store).selected()
    }

    /// `sessions.delete`
    pub fn sessions_delete(&self, corpus: CorpusId) -> Result<()> {
        SessionCatalog::new(&self.store).delete(corpus)
    }

    /// `sessions.setOwner`
    pub fn sessions_set_owner(&self, corpus: CorpusId, platform_id: Option<&str>) -> Result<()> {
        SessionCatalog::new(&self.store).set_owner(corpus, platform_id)
    }

    // =========================================================================
    // Schema & migrations
    // =========================================================================

    /// `schema.get`
    pub fn schema(&self, corpus: CorpusId) -> Result<Vec<TableSchema>> {
        self.store.get_corpus(corpus)?;
        self.store.table_schema()
    }

    /// `migrations.pending`
    pub fn pending_migrations(&self) -> Result<Vec<MigrationInfo>> {
        self.store.pending_migrations()
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// `import.start`: submits an import, returns its job id.
    pub fn import_start(&self, path: &Path, options: Option<ParseOptions>) -> JobId {
        let options = options.unwrap_or_else(|| self.config.parse_options());
        self.router.submit(JobKind::Import {
            path: path.to_path_buf(),
            options,
        })
    }

    /// `analytics.*`: submits one analysis, remembering the filter as the
    /// corpus's UI state.
    pub fn analytics_start(
        &self,
        corpus: CorpusId,
        filter: TimeFilter,
        kind: AnalyticsKind,
        timeout: Option<Duration>,
    ) -> JobId {
        if let Err(e) = SessionCatalog::new(&self.store).remember_filter(corpus, &filter) {
            debug!(corpus, error = %e, "could not persist time filter");
        }
        self.router.submit(JobKind::Analytics {
            corpus,
            filter,
            kind,
            timeout,
        })
    }

    /// `query.sql`: submits a guarded read-only query.
    pub fn sql_start(&self, corpus: CorpusId, sql: String) -> Result<JobId> {
        self.store.get_corpus(corpus)?;
        Ok(self.router.submit(JobKind::Sql {
            sql,
            max_rows: DEFAULT_SQL_ROW_CAP,
        }))
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self, id: JobId) {
        self.router.cancel(id);
    }

    /// Next job update, if one arrives within `timeout`.
    pub fn next_update(&self, timeout: Duration) -> Option<JobUpdate> {
        self.updates.recv_timeout(timeout).ok()
    }

    /// Blocks until `id` finishes, forwarding its progress to `on_progress`.
    ///
    /// Updates for other jobs arriving meanwhile are dropped; use
    /// [`next_update`](Self::next_update) directly when multiplexing.
    pub fn wait<F>(&self, id: JobId, mut on_progress: F) -> Result<JobOutput>
    where
        F: FnMut(ImportProgress),
    {
        loop {
            let update = self
                .updates
                .recv()
                .map_err(|_| ChatlensError::internal("worker pool hung up"))?;
            if update.id != id {
                debug!(id = %update.id, "dropping update for unobserved job");
                continue;
            }
            match update.event {
                JobEvent::Progress(progress) => on_progress(progress),
                JobEvent::Done(output) => return Ok(output),
                JobEvent::Failed(e) => return Err(e),
                JobEvent::Canceled => return Err(ChatlensError::Canceled),
            }
        }
    }

    /// Stops the pool and closes the boundary store.
    pub fn shutdown(self) {
        self.router.shutdown();
    }
}
