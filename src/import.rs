//! Import coordinator.
//!
//! Drives the sniff → parse → normalize → bulk-write pipeline for one file.
//! Each message batch is written in its own transaction, so a crash or
//! cancellation leaves a complete prefix of batches plus the corpus's
//! `partial` flag (set before the first batch, cleared on success).
//! Cancellation is checked at every batch boundary; progress is reported at
//! least every 1000 messages or 250 ms, whichever comes first.
//!
//! Re-importing a file whose `(name, platform)` identity matches an existing
//! corpus appends to that corpus: the normalizer is seeded with its members,
//! platform message ids and dedup keys, so duplicates are skipped and
//! internal ids keep growing monotonically.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::ParseOptions;
use crate::error::{ChatlensError, Result};
use crate::message::{ChatMeta, ParseEvent, ParseSummary};
use crate::normalize::{ImportWarning, Normalizer};
use crate::progress::{ImportPhase, ImportProgress, ProgressCallback, ProgressThrottle};
use crate::sniffer::sniff;
use crate::store::corpus::CorpusId;
use crate::store::Store;

/// Outcome of a finished import.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImportReport {
    /// The corpus written to (created or re-imported).
    pub corpus_id: CorpusId,
    /// Messages inserted by this run.
    pub messages_imported: u64,
    /// Messages in the corpus after this run.
    pub total_messages: i64,
    /// Members in the corpus after this run.
    pub total_members: i64,
    /// Records the parser could not read (counted, logged, skipped).
    pub skipped_records: u64,
    /// Re-imported duplicates skipped by the normalizer.
    pub duplicates_skipped: u64,
    /// Non-fatal normalization warnings.
    pub warnings: Vec<ImportWarning>,
}

/// Imports one export file into the store.
///
/// # Errors
///
/// Structural errors ([`ChatlensError::UnknownFormat`],
/// [`ChatlensError::ParseStructural`], [`ChatlensError::Io`]) abort the
/// import; the corpus keeps its `partial` flag. Cancellation surfaces as
/// [`ChatlensError::Canceled`] with the same partial semantics.
pub fn run_import(
    store: &Store,
    path: &Path,
    options: &ParseOptions,
    progress: &ProgressCallback,
    cancel: &CancelToken,
) -> Result<ImportReport> {
    cancel.check()?;
    progress(ImportProgress::new(ImportPhase::Sniffing, 0, None, 0));

    let descriptor = sniff(path)?;
    info!(path = %path.display(), format = descriptor.id, "format detected");
    progress(
        ImportProgress::new(ImportPhase::Sniffing, 0, None, 0).with_note(descriptor.name),
    );

    let mut events = descriptor.format.events(path, options)?;
    let mut pipeline = Pipeline {
        store,
        options,
        progress,
        cancel,
        throttle: ProgressThrottle::new(),
        normalizer: Normalizer::new(),
        corpus: None,
        meta: None,
        summary: None,
        messages_imported: 0,
    };

    let result = pipeline.consume(&mut events);
    match result {
        Ok(()) => pipeline.finish(),
        Err(e) => {
            if let Some(corpus) = pipeline.corpus {
                // Committed prefix stays; the partial flag tells the story.
                warn!(corpus, error = %e, "import aborted, corpus left partial");
            }
            Err(e)
        }
    }
}

struct Pipeline<'a> {
    store: &'a Store,
    options: &'a ParseOptions,
    progress: &'a ProgressCallback,
    cancel: &'a CancelToken,
    throttle: ProgressThrottle,
    normalizer: Normalizer,
    corpus: Option<CorpusId>,
    meta: Option<ChatMeta>,
    summary: Option<ParseSummary>,
    messages_imported: u64,
}

impl<'a> Pipeline<'a> {
    fn consume(
        &mut self,
        events: &mut crate::parsers::EventIter,
    ) -> Result<()> {
        for event in events {
            match event? {
                ParseEvent::Meta(meta) => self.on_meta(meta)?,
                ParseEvent::Members(records) => self.normalizer.ingest_members(records),
                ParseEvent::Messages(batch) => self.on_batch(batch)?,
                ParseEvent::Progress(update) => {
                    if self.throttle.should_emit(update.messages_processed) {
                        (self.progress)(update);
                    }
                }
                ParseEvent::Done(summary) => self.summary = Some(summary),
            }
        }
        Ok(())
    }

    fn on_meta(&mut self, meta: ChatMeta) -> Result<()> {
        let corpus = match self.store.find_corpus(&meta.name, &meta.platform)? {
            Some(existing) => {
                debug!(corpus = existing, "re-importing into existing corpus");
                self.seed_from(existing)?;
                existing
            }
            None => self.store.create_corpus(
                &meta.name,
                &meta.platform,
                meta.kind,
                self.options.tz_offset.local_minus_utc(),
            )?,
        };
        // Set before the first batch so a crash is visible as a partial
        // import; cleared only on success.
        self.store.set_partial(corpus, true)?;
        self.corpus = Some(corpus);
        self.meta = Some(meta);
        Ok(())
    }

    fn seed_from(&mut self, corpus: CorpusId) -> Result<()> {
        let next_member = self.store.next_member_id(corpus)?;
        let next_message = self.store.next_message_id(corpus)?;
        self.normalizer = Normalizer::with_next_ids(next_member, next_message);
        for (member, current_name, name_since) in self.store.members_for_seeding(corpus)? {
            self.normalizer.seed_member(member, current_name, name_since);
        }
        for (platform_id, internal) in self.store.platform_message_ids(corpus)? {
            self.normalizer.seed_msg_id(platform_id, internal);
        }
        for (ts, sender, content) in self.store.dedup_triples(corpus)? {
            self.normalizer
                .seed_dedup_key(Normalizer::dedup_key(ts, &sender, content.as_deref()));
        }
        Ok(())
    }

    fn on_batch(&mut self, batch: Vec<crate::message::RawMessage>) -> Result<()> {
        // Batch boundary: the only cancellation checkpoint. No transaction
        // is open here, so cancel never leaves a torn batch behind.
        self.cancel.check()?;

        let corpus = self
            .corpus
            .ok_or_else(|| ChatlensError::internal("messages before meta event"))?;
        let stored = self.normalizer.ingest_batch(batch);
        if stored.is_empty() {
            return Ok(());
        }

        let batch_min = stored.iter().map(|m| m.ts).min().unwrap_or(0);
        let batch_max = stored.iter().map(|m| m.ts).max().unwrap_or(0);

        let tx = self.store.begin()?;
        self.store.insert_messages(corpus, &stored)?;
        self.store.widen_bounds(corpus, batch_min, batch_max)?;
        tx.commit()?;

        self.messages_imported += stored.len() as u64;
        // Batch boundaries are the only reporting points; ParseOptions caps
        // the batch size at the 1000-message reporting interval, so one
        // update per committed batch meets the cadence.
        (self.progress)(ImportProgress::new(
            ImportPhase::Writing,
            0,
            None,
            self.messages_imported,
        ));
        Ok(())
    }

    fn finish(mut self) -> Result<ImportReport> {
        let corpus = self
            .corpus
            .ok_or_else(|| ChatlensError::internal("parser emitted no meta event"))?;
        let meta = self
            .meta
            .take()
            .ok_or_else(|| ChatlensError::internal("parser emitted no meta event"))?;

        let (resolved, dangling) = self.normalizer.resolve_replies();
        let kind = self.normalizer.effective_kind(&meta);
        let touched = self.normalizer.seeded_member_ids();
        let output = self.normalizer.finish();

        let tx = self.store.begin()?;
        self.store.bind_replies(corpus, &resolved)?;
        self.store.stash_dangling_replies(corpus, &dangling)?;
        self.store.upsert_members(corpus, &output.members)?;
        self.store.write_name_history(corpus, &touched, &output.intervals)?;
        self.store.set_chat_kind(corpus, kind)?;
        self.store.set_partial(corpus, false)?;
        tx.commit()?;

        let total_messages = self.store.message_count(corpus)?;
        let total_members = self.store.member_count(corpus)?;
        (self.progress)(ImportProgress::new(
            ImportPhase::Done,
            0,
            None,
            self.messages_imported,
        ));

        let summary = self.summary.unwrap_or_default();
        info!(
            corpus,
            imported = self.messages_imported,
            skipped = summary.skipped_records,
            duplicates = output.duplicates_skipped,
            "import finished"
        );

        Ok(ImportReport {
            corpus_id: corpus,
            messages_imported: self.messages_imported,
            total_messages,
            total_members,
            skipped_records: summary.skipped_records,
            duplicates_skipped: output.duplicates_skipped,
            warnings: output.warnings,
        })
    }
}
