//! Worker pool and job router.
//!
//! A fixed pool of `min(4, hardware parallelism)` worker threads keeps
//! imports and heavy analytics off the interactive thread. Worker 0 is the
//! designated import worker and holds the only read-write store connection;
//! the other workers open read-only connections and serve analytics and
//! SQL-lab jobs. Each job is correlated by id; results and progress come
//! back as [`JobUpdate`] values over an `mpsc` channel.
//!
//! Cancellation is cooperative: [`JobRouter::cancel`] flips the job's
//! [`CancelToken`], which executors poll at their checkpoints (batch
//! boundaries for imports, row batches for analytics).

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::analytics::activity::{activity_ranking, ActivityReport};
use crate::analytics::dragon::{dragon_king, DragonReport};
use crate::analytics::names::{name_history, NameSpan};
use crate::analytics::phrase::{catchphrases, PhraseOptions, PhraseReport};
use crate::analytics::repeat::{repeat_chains, ChainOptions, ChainReport};
use crate::analytics::session::{sessions, SessionInfo, SessionOptions};
use crate::analytics::streak::{monologue_streaks, StreakOptions, StreakReport};
use crate::analytics::{QueryCtx, TimeFilter};
use crate::cancel::CancelToken;
use crate::config::ParseOptions;
use crate::error::{ChatlensError, Result};
use crate::import::{run_import, ImportReport};
use crate::progress::{ImportProgress, ProgressCallback};
use crate::store::corpus::CorpusId;
use crate::store::{SqlResult, Store};

/// Correlates submissions with their updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// One analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnalyticsKind {
    Activity,
    NameHistory { member_id: i64 },
    DragonKing,
    MonologueStreaks(StreakOptions),
    RepeatChains(ChainOptions),
    Catchphrases(PhraseOptions),
    Sessions(SessionOptions),
}

/// Work submitted to the router.
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Import a file (runs on the designated import worker).
    Import {
        path: PathBuf,
        options: ParseOptions,
    },
    /// Run one analysis over a corpus snapshot.
    Analytics {
        corpus: CorpusId,
        filter: TimeFilter,
        kind: AnalyticsKind,
        /// Deadline carried down to the store scan.
        timeout: Option<Duration>,
    },
    /// Read-only SQL-lab query.
    Sql { sql: String, max_rows: usize },
}

/// Successful job payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutput {
    Import(ImportReport),
    Activity(ActivityReport),
    NameHistory(Vec<NameSpan>),
    DragonKing(DragonReport),
    MonologueStreaks(StreakReport),
    RepeatChains(ChainReport),
    Catchphrases(PhraseReport),
    Sessions(Vec<SessionInfo>),
    Sql(SqlResult),
}

/// One update on a job's channel.
#[derive(Debug)]
pub enum JobEvent {
    Progress(ImportProgress),
    Done(JobOutput),
    Failed(ChatlensError),
    Canceled,
}

/// Routed update.
#[derive(Debug)]
pub struct JobUpdate {
    pub id: JobId,
    pub event: JobEvent,
}

struct QueuedJob {
    id: JobId,
    kind: JobKind,
    cancel: CancelToken,
}

#[derive(Default)]
struct Queues {
    /// Import jobs; popped only by worker 0.
    import: VecDeque<QueuedJob>,
    /// Analytics and SQL jobs; popped by anyone.
    shared: VecDeque<QueuedJob>,
}

struct RouterState {
    queues: Mutex<Queues>,
    condvar: Condvar,
    stop: AtomicBool,
}

/// Fixed worker pool with job-id correlation.
pub struct JobRouter {
    state: Arc<RouterState>,
    pending: Arc<Mutex<HashMap<JobId, CancelToken>>>,
    next_id: AtomicU64,
    threads: Vec<JoinHandle<()>>,
}

impl JobRouter {
    /// Spawns `min(4, hardware parallelism)` workers against `db_path`.
    pub fn new(db_path: PathBuf, updates: Sender<JobUpdate>) -> Self {
        let worker_count = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(4);

        let state = Arc::new(RouterState {
            queues: Mutex::new(Queues::default()),
            condvar: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let pending: Arc<Mutex<HashMap<JobId, CancelToken>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut threads = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let state = Arc::clone(&state);
            let pending = Arc::clone(&pending);
            let updates = updates.clone();
            let db_path = db_path.clone();
            threads.push(thread::spawn(move || {
                worker_loop(worker_id, db_path, state, pending, updates);
            }));
        }
        info!(workers = worker_count, "job router started");

        Self {
            state,
            pending,
            next_id: AtomicU64::new(1),
            threads,
        }
    }

    /// Enqueues a job and returns its id.
    pub fn submit(&self, kind: JobKind) -> JobId {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancelToken::new();
        self.pending.lock().unwrap().insert(id, cancel.clone());

        let job = QueuedJob { id, kind, cancel };
        {
            let mut queues = self.state.queues.lock().unwrap();
            match &job.kind {
                JobKind::Import { .. } => queues.import.push_back(job),
                _ => queues.shared.push_back(job),
            }
        }
        self.state.condvar.notify_all();
        debug!(%id, "job submitted");
        id
    }

    /// Requests cooperative cancellation of a pending or running job.
    pub fn cancel(&self, id: JobId) {
        if let Some(token) = self.pending.lock().unwrap().get(&id) {
            token.cancel();
            debug!(%id, "cancellation requested");
        }
    }

    /// Jobs submitted but not yet finished.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Signals stop and joins all workers.
    pub fn shutdown(self) {
        info!("shutting down job router");
        self.state.stop.store(true, Ordering::Relaxed);
        self.state.condvar.notify_all();
        for (idx, handle) in self.threads.into_iter().enumerate() {
            if handle.join().is_err() {
                error!(worker = idx, "worker join failed");
            }
        }
    }
}

fn worker_loop(
    worker_id: usize,
    db_path: PathBuf,
    state: Arc<RouterState>,
    pending: Arc<Mutex<HashMap<JobId, CancelToken>>>,
    updates: Sender<JobUpdate>,
) {
    debug!(worker = worker_id, "worker started");
    let is_import_worker = worker_id == 0;
    // Opened on first use so the pool can start before the file exists.
    let mut store: Option<Store> = None;

    loop {
        let job = {
            let mut queues = state.queues.lock().unwrap();
            loop {
                if state.stop.load(Ordering::Relaxed) {
                    debug!(worker = worker_id, "worker received shutdown signal");
                    return;
                }
                let next = if is_import_worker {
                    queues.import.pop_front().or_else(|| queues.shared.pop_front())
                } else {
                    queues.shared.pop_front()
                };
                match next {
                    Some(job) => break job,
                    None => queues = state.condvar.wait(queues).unwrap(),
                }
            }
        };

        let id = job.id;
        debug!(worker = worker_id, %id, "job picked up");

        let outcome = if job.cancel.is_canceled() {
            Err(ChatlensError::Canceled)
        } else {
            open_store(&mut store, is_import_worker, &db_path)
                .and_then(|store| execute(store, &job, &updates))
        };
        pending.lock().unwrap().remove(&id);

        let fatal = matches!(&outcome, Err(e) if e.is_fatal());
        let event = match outcome {
            Ok(output) => JobEvent::Done(output),
            Err(e) if e.is_canceled() => JobEvent::Canceled,
            Err(e) => JobEvent::Failed(e),
        };
        if updates.send(JobUpdate { id, event }).is_err() {
            // Receiver gone; nothing left to report to.
            return;
        }
        if fatal {
            error!(worker = worker_id, %id, "fatal job error, worker exiting");
            return;
        }
    }
}

fn open_store<'a>(
    slot: &'a mut Option<Store>,
    read_write: bool,
    db_path: &PathBuf,
) -> Result<&'a Store> {
    if slot.is_none() {
        let store = if read_write {
            Store::open(db_path)?
        } else {
            Store::open_read_only(db_path)?
        };
        *slot = Some(store);
    }
    match slot.as_ref() {
        Some(store) => Ok(store),
        None => Err(ChatlensError::internal("worker store slot empty")),
    }
}

fn execute(store: &Store, job: &QueuedJob, updates: &Sender<JobUpdate>) -> Result<JobOutput> {
    match &job.kind {
        JobKind::Import { path, options } => {
            let id = job.id;
            let sink = Mutex::new(updates.clone());
            let progress: ProgressCallback = Arc::new(move |update| {
                let _ = sink.lock().unwrap().send(JobUpdate {
                    id,
                    event: JobEvent::Progress(update),
                });
            });
            run_import(store, path, options, &progress, &job.cancel).map(JobOutput::Import)
        }
        JobKind::Analytics {
            corpus,
            filter,
            kind,
            timeout,
        } => {
            let mut ctx = QueryCtx::new(*corpus).with_filter(*filter);
            if let Some(timeout) = timeout {
                ctx = ctx.with_deadline(Instant::now() + *timeout);
            }
            run_analytics(store, &ctx, kind)
        }
        JobKind::Sql { sql, max_rows } => store.query_sql(sql, *max_rows).map(JobOutput::Sql),
    }
}

fn run_analytics(store: &Store, ctx: &QueryCtx, kind: &AnalyticsKind) -> Result<JobOutput> {
    match kind {
        AnalyticsKind::Activity => activity_ranking(store, ctx).map(JobOutput::Activity),
        AnalyticsKind::NameHistory { member_id } => {
            name_history(store, ctx, *member_id).map(JobOutput::NameHistory)
        }
        AnalyticsKind::DragonKing => dragon_king(store, ctx).map(JobOutput::DragonKing),
        AnalyticsKind::MonologueStreaks(options) => {
            monologue_streaks(store, ctx, *options).map(JobOutput::MonologueStreaks)
        }
        AnalyticsKind::RepeatChains(options) => {
            repeat_chains(store, ctx, *options).map(JobOutput::RepeatChains)
        }
        AnalyticsKind::Catchphrases(options) => {
            catchphrases(store, ctx, options.clone()).map(JobOutput::Catchphrases)
        }
        AnalyticsKind::Sessions(options) => {
            sessions(store, ctx, *options).map(JobOutput::Sessions)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatKind;
    use std::sync::mpsc::channel;

    fn wait_done(rx: &std::sync::mpsc::Receiver<JobUpdate>, id: JobId) -> JobEvent {
        loop {
            let update = rx.recv_timeout(Duration::from_secs(10)).expect("update");
            if update.id != id {
                continue;
            }
            match update.event {
                JobEvent::Progress(_) => continue,
                terminal => return terminal,
            }
        }
    }

    fn temp_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");
        // Create and migrate so read-only workers can open it.
        drop(Store::open(&path).unwrap());
        (dir, path)
    }

    #[test]
    fn test_import_job_round_trip() {
        let (dir, db_path) = temp_db();
        let chat = dir.path().join("chat.txt");
        std::fs::write(
            &chat,
            "[LINE] Chat history in G\n\n2025/01/02 Friday\n10:15\tA\thi\n10:16\tB\tyo\n",
        )
        .unwrap();

        let (tx, rx) = channel();
        let router = JobRouter::new(db_path.clone(), tx);
        let id = router.submit(JobKind::Import {
            path: chat,
            options: ParseOptions::new()
                .with_tz_offset(chrono::FixedOffset::east_opt(0).unwrap()),
        });

        match wait_done(&rx, id) {
            JobEvent::Done(JobOutput::Import(report)) => {
                assert_eq!(report.messages_imported, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(router.pending_count(), 0);
        router.shutdown();
    }

    #[test]
    fn test_analytics_job_on_reader_connection() {
        let (_dir, db_path) = temp_db();
        {
            let store = Store::open(&db_path).unwrap();
            store
                .create_corpus("c", "line", ChatKind::Group, 0)
                .unwrap();
        }

        let (tx, rx) = channel();
        let router = JobRouter::new(db_path, tx);
        let id = router.submit(JobKind::Analytics {
            corpus: 1,
            filter: TimeFilter::all(),
            kind: AnalyticsKind::Activity,
            timeout: None,
        });
        match wait_done(&rx, id) {
            JobEvent::Done(JobOutput::Activity(report)) => {
                assert_eq!(report.total_messages, 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        router.shutdown();
    }

    #[test]
    fn test_sql_job_guardrail() {
        let (_dir, db_path) = temp_db();
        let (tx, rx) = channel();
        let router = JobRouter::new(db_path, tx);

        let id = router.submit(JobKind::Sql {
            sql: "DELETE FROM message".to_string(),
            max_rows: 10,
        });
        match wait_done(&rx, id) {
            JobEvent::Failed(e) => {
                assert!(matches!(e, ChatlensError::QueryRejected(_)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        router.shutdown();
    }

    #[test]
    fn test_cancel_before_pickup() {
        let (_dir, db_path) = temp_db();
        let (tx, rx) = channel();
        let router = JobRouter::new(db_path, tx);

        // Saturate with a burst so at least some jobs are still queued when
        // cancel lands; canceled-before-start jobs must report Canceled.
        let mut ids = Vec::new();
        for _ in 0..32 {
            ids.push(router.submit(JobKind::Sql {
                sql: "SELECT 1".to_string(),
                max_rows: 1,
            }));
        }
        for id in &ids {
            router.cancel(*id);
        }
        let mut canceled = 0;
        let mut done = 0;
        for id in ids {
            match wait_done(&rx, id) {
                JobEvent::Canceled => canceled += 1,
                JobEvent::Done(_) => done += 1,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(canceled + done, 32);
        router.shutdown();
    }
}
