//! Analytics engine.
//!
//! Parameterized read-only queries producing the statistics the shell
//! consumes. Every analysis takes a corpus id and an optional time window
//! via [`QueryCtx`]; the window is pushed into the SQL `WHERE` clause, never
//! applied in post-processing. Scan-based analyses (dragon king, streaks,
//! repeat chains, sessions) iterate a single time-ordered query and check
//! their deadline between row batches.
//!
//! | Module | Analysis |
//! |--------|----------|
//! | [`activity`] | per-member message counts and shares |
//! | [`names`] | name-history intervals for one member |
//! | [`dragon`] | per-day top sender ("dragon king") |
//! | [`streak`] | monologue streaks |
//! | [`repeat`] | repeat chains (originator / initiator / breaker) |
//! | [`phrase`] | catchphrases |
//! | [`session`] | burst partition by idle gap |

pub mod activity;
pub mod dragon;
pub mod names;
pub mod phrase;
pub mod repeat;
pub mod session;
pub mod streak;

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{ChatlensError, Result};
use crate::store::corpus::CorpusId;
use crate::store::Store;

/// Rows scanned between deadline checks.
const DEADLINE_CHECK_ROWS: usize = 4096;

/// Optional inclusive time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub start_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub end_ts: Option<i64>,
}

impl TimeFilter {
    /// No bounds.
    pub fn all() -> Self {
        Self::default()
    }

    /// Both bounds, inclusive.
    pub fn between(start_ts: i64, end_ts: i64) -> Self {
        Self {
            start_ts: Some(start_ts),
            end_ts: Some(end_ts),
        }
    }

    /// Appends `AND <column> >= ?n AND <column> <= ?m` for the present
    /// bounds, pushing their values onto `params`. Placeholder numbers
    /// continue from the current `params` length.
    pub(crate) fn push_sql(&self, sql: &mut String, column: &str, params: &mut Vec<i64>) {
        if let Some(start) = self.start_ts {
            params.push(start);
            sql.push_str(&format!(" AND {column} >= ?{}", params.len()));
        }
        if let Some(end) = self.end_ts {
            params.push(end);
            sql.push_str(&format!(" AND {column} <= ?{}", params.len()));
        }
    }
}

/// Execution context shared by all analyses.
#[derive(Debug, Clone)]
pub struct QueryCtx {
    pub corpus: CorpusId,
    pub filter: TimeFilter,
    /// Absolute deadline; crossing it aborts with
    /// [`ChatlensError::Timeout`].
    pub deadline: Option<Instant>,
}

impl QueryCtx {
    /// Context for a whole corpus, no deadline.
    pub fn new(corpus: CorpusId) -> Self {
        Self {
            corpus,
            filter: TimeFilter::all(),
            deadline: None,
        }
    }

    /// Restricts the time window.
    #[must_use]
    pub fn with_filter(mut self, filter: TimeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Errors with [`ChatlensError::Timeout`] past the deadline.
    pub(crate) fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() > deadline => Err(ChatlensError::Timeout),
            _ => Ok(()),
        }
    }

    /// Deadline check amortized over row scans.
    pub(crate) fn check_deadline_every(&self, row: usize) -> Result<()> {
        if row % DEADLINE_CHECK_ROWS == 0 {
            self.check_deadline()
        } else {
            Ok(())
        }
    }
}

/// Display names for all members of a corpus.
pub(crate) fn member_names(store: &Store, corpus: CorpusId) -> Result<HashMap<i64, String>> {
    Ok(store
        .list_members(corpus)?
        .into_iter()
        .map(|m| {
            let name = m.display_name().to_string();
            (m.id, name)
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Shared corpus fixtures for analytics tests.

    use crate::message::{ChatKind, MessageKind};
    use crate::normalize::{StoredMember, StoredMessage};
    use crate::store::corpus::CorpusId;
    use crate::store::Store;

    /// Creates a corpus with the given `(sender, ts, content)` text
    /// messages; members are created as `m<id>` for each distinct sender.
    pub fn corpus_of(store: &Store, messages: &[(i64, i64, &str)]) -> CorpusId {
        corpus_with_kinds(
            store,
            &messages
                .iter()
                .map(|&(sender, ts, content)| (sender, ts, content, MessageKind::Text))
                .collect::<Vec<_>>(),
        )
    }

    /// Same as [`corpus_of`] with explicit kinds.
    pub fn corpus_with_kinds(
        store: &Store,
        messages: &[(i64, i64, &str, MessageKind)],
    ) -> CorpusId {
        let corpus = store
            .create_corpus("fixture", "line", ChatKind::Group, 0)
            .unwrap();

        let mut senders: Vec<i64> = messages.iter().map(|m| m.0).collect();
        senders.sort_unstable();
        senders.dedup();
        let members: Vec<StoredMember> = senders
            .iter()
            .map(|&id| StoredMember {
                id,
                platform_id: format!("m{id}"),
                account_name: Some(format!("member-{id}")),
                group_nickname: None,
                aliases: Vec::new(),
                roles: Vec::new(),
                avatar: None,
            })
            .collect();
        store.upsert_members(corpus, &members).unwrap();

        let stored: Vec<StoredMessage> = messages
            .iter()
            .enumerate()
            .map(|(i, &(sender, ts, content, kind))| StoredMessage {
                id: (i + 1) as i64,
                sender_id: sender,
                ts,
                kind,
                content: Some(content.to_string()),
                reply_to: None,
                platform_msg_id: None,
                extra: None,
            })
            .collect();
        store.insert_messages(corpus, &stored).unwrap();
        if let (Some(min), Some(max)) = (
            messages.iter().map(|m| m.1).min(),
            messages.iter().map(|m| m.1).max(),
        ) {
            store.widen_bounds(corpus, min, max).unwrap();
        }
        corpus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_filter_sql() {
        let mut sql = String::from("SELECT * FROM message WHERE corpus_id = ?1");
        let mut params = vec![1i64];
        TimeFilter::between(10, 20).push_sql(&mut sql, "ts", &mut params);
        assert!(sql.ends_with("AND ts >= ?2 AND ts <= ?3"));
        assert_eq!(params, vec![1, 10, 20]);
    }

    #[test]
    fn test_time_filter_partial_bounds() {
        let mut sql = String::new();
        let mut params = vec![7i64];
        TimeFilter {
            start_ts: None,
            end_ts: Some(99),
        }
        .push_sql(&mut sql, "msg.ts", &mut params);
        assert_eq!(sql, " AND msg.ts <= ?2");
        assert_eq!(params, vec![7, 99]);
    }

    #[test]
    fn test_deadline_check() {
        let ctx = QueryCtx::new(1);
        assert!(ctx.check_deadline().is_ok());

        let expired = QueryCtx::new(1)
            .with_deadline(Instant::now() - std::time::Duration::from_secs(1));
        assert!(expired.check_deadline().unwrap_err().is_timeout());
        // Amortized check only fires on boundary rows.
        assert!(expired.check_deadline_every(1).is_ok());
        assert!(expired.check_deadline_every(0).is_err());
    }
}
