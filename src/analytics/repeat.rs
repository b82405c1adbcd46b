//! Repeat-chain analysis.
//!
//! A repeat chain is a maximal sequence of *distinct* senders echoing
//! identical normalized text (trimmed, case-sensitive), each consecutive
//! pair within `chain_idle_gap` seconds, length at least 2. The first
//! sender originates the chain, the second picks it up (initiator), and the
//! sender of the first different-text message after a chain breaks it.

use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};

use crate::analytics::{member_names, QueryCtx};
use crate::error::Result;
use crate::message::MessageKind;
use crate::store::Store;

/// Tunable thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChainOptions {
    /// Maximum seconds between consecutive chain links.
    pub chain_idle_gap: i64,
    /// Entries kept in `hot_contents`.
    pub hot_top: usize,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            chain_idle_gap: 600,
            hot_top: 10,
        }
    }
}

/// Per-member chain participation.
#[derive(Debug, Clone, Serialize)]
pub struct ChainMemberEntry {
    pub member_id: i64,
    pub name: String,
    pub originator_count: u64,
    pub initiator_count: u64,
    pub breaker_count: u64,
    /// Counts divided by the member's total messages in range.
    pub originator_rate: f64,
    pub initiator_rate: f64,
    pub breaker_rate: f64,
}

/// One frequently-repeated content.
#[derive(Debug, Clone, Serialize)]
pub struct HotContent {
    pub content: String,
    /// Display name of the originator of the longest chain of this content.
    pub originator_name: String,
    /// Times this exact content triggered a chain.
    pub count: u64,
    pub max_chain_length: u32,
    /// Timestamp of the most recent chain link with this content.
    pub last_ts: i64,
}

/// Repeat-chain report over the filtered window.
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub chain_count: u64,
    pub members: Vec<ChainMemberEntry>,
    /// Histogram of chain lengths.
    pub chain_length_distribution: BTreeMap<u32, u64>,
    /// Top contents by longest chain.
    pub hot_contents: Vec<HotContent>,
}

#[derive(Debug, Default)]
struct MemberTally {
    originator: u64,
    initiator: u64,
    breaker: u64,
    total_messages: u64,
}

struct OpenChain {
    text: String,
    senders: Vec<i64>,
    seen: HashSet<i64>,
    last_ts: i64,
}

#[derive(Debug)]
struct ContentStats {
    count: u64,
    max_len: u32,
    last_ts: i64,
    best_originator: i64,
}

/// Computes repeat chains and their derived metrics.
pub fn repeat_chains(store: &Store, ctx: &QueryCtx, options: ChainOptions) -> Result<ChainReport> {
    ctx.check_deadline()?;

    let mut sql = String::from(
        "SELECT sender_id, ts, kind, content FROM message WHERE corpus_id = ?1",
    );
    let mut params = vec![ctx.corpus];
    ctx.filter.push_sql(&mut sql, "ts", &mut params);
    sql.push_str(" ORDER BY ts, id");

    let mut stmt = store.conn().prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut tallies: HashMap<i64, MemberTally> = HashMap::new();
    let mut distribution: BTreeMap<u32, u64> = BTreeMap::new();
    let mut contents: HashMap<String, ContentStats> = HashMap::new();
    let mut chain_count = 0u64;
    let mut open: Option<OpenChain> = None;
    let mut scanned = 0usize;

    let mut close_chain = |chain: OpenChain,
                           tallies: &mut HashMap<i64, MemberTally>,
                           distribution: &mut BTreeMap<u32, u64>,
                           contents: &mut HashMap<String, ContentStats>,
                           chain_count: &mut u64|
     -> bool {
        let len = chain.senders.len() as u32;
        if len < 2 {
            return false;
        }
        *chain_count += 1;
        *distribution.entry(len).or_default() += 1;
        tallies.entry(chain.senders[0]).or_default().originator += 1;
        tallies.entry(chain.senders[1]).or_default().initiator += 1;

        let stats = contents.entry(chain.text).or_insert(ContentStats {
            count: 0,
            max_len: 0,
            last_ts: chain.last_ts,
            best_originator: chain.senders[0],
        });
        stats.count += 1;
        stats.last_ts = stats.last_ts.max(chain.last_ts);
        if len > stats.max_len {
            stats.max_len = len;
            stats.best_originator = chain.senders[0];
        }
        true
    };

    while let Some(row) = rows.next()? {
        scanned += 1;
        ctx.check_deadline_every(scanned)?;

        let sender: i64 = row.get(0)?;
        let ts: i64 = row.get(1)?;
        let kind = MessageKind::from_tag(&row.get::<_, String>(2)?);
        let content: Option<String> = row.get(3)?;

        tallies.entry(sender).or_default().total_messages += 1;

        let text = if kind == MessageKind::Text {
            content.as_deref().map(str::trim).filter(|t| !t.is_empty())
        } else {
            None
        };

        open = match (open.take(), text) {
            (Some(mut chain), Some(text)) if chain.text == text => {
                if ts - chain.last_ts <= options.chain_idle_gap && !chain.seen.contains(&sender) {
                    chain.seen.insert(sender);
                    chain.senders.push(sender);
                    chain.last_ts = ts;
                    Some(chain)
                } else {
                    // Gap exceeded or a sender echoing twice: the old chain
                    // ends (same text, so no breaker) and a fresh one opens.
                    close_chain(
                        chain,
                        &mut tallies,
                        &mut distribution,
                        &mut contents,
                        &mut chain_count,
                    );
                    Some(OpenChain {
                        text: text.to_string(),
                        senders: vec![sender],
                        seen: HashSet::from([sender]),
                        last_ts: ts,
                    })
                }
            }
            (Some(chain), other_text) => {
                // Different text (or non-text): close; a completed chain
                // credits this sender as its breaker.
                let closed = close_chain(
                    chain,
                    &mut tallies,
                    &mut distribution,
                    &mut contents,
                    &mut chain_count,
                );
                if closed {
                    tallies.entry(sender).or_default().breaker += 1;
                }
                other_text.map(|text| OpenChain {
                    text: text.to_string(),
                    senders: vec![sender],
                    seen: HashSet::from([sender]),
                    last_ts: ts,
                })
            }
            (None, Some(text)) => Some(OpenChain {
                text: text.to_string(),
                senders: vec![sender],
                seen: HashSet::from([sender]),
                last_ts: ts,
            }),
            (None, None) => None,
        };
    }
    if let Some(chain) = open.take() {
        close_chain(
            chain,
            &mut tallies,
            &mut distribution,
            &mut contents,
            &mut chain_count,
        );
    }

    let names = member_names(store, ctx.corpus)?;
    let display = |id: i64| {
        names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("#{id}"))
    };

    let mut members: Vec<ChainMemberEntry> = tallies
        .iter()
        .filter(|(_, t)| t.originator + t.initiator + t.breaker > 0)
        .map(|(&member_id, tally)| {
            let total = tally.total_messages.max(1) as f64;
            ChainMemberEntry {
                member_id,
                name: display(member_id),
                originator_count: tally.originator,
                initiator_count: tally.initiator,
                breaker_count: tally.breaker,
                originator_rate: tally.originator as f64 / total,
                initiator_rate: tally.initiator as f64 / total,
                breaker_rate: tally.breaker as f64 / total,
            }
        })
        .collect();
    members.sort_by(|a, b| {
        (b.originator_count + b.initiator_count + b.breaker_count)
            .cmp(&(a.originator_count + a.initiator_count + a.breaker_count))
            .then(a.member_id.cmp(&b.member_id))
    });

    let mut hot: Vec<HotContent> = contents
        .into_iter()
        .map(|(content, stats)| HotContent {
            content,
            originator_name: display(stats.best_originator),
            count: stats.count,
            max_chain_length: stats.max_len,
            last_ts: stats.last_ts,
        })
        .collect();
    hot.sort_by(|a, b| {
        b.max_chain_length
            .cmp(&a.max_chain_length)
            .then(b.last_ts.cmp(&a.last_ts))
            .then(a.content.cmp(&b.content))
    });
    hot.truncate(options.hot_top);

    Ok(ChainReport {
        chain_count,
        members,
        chain_length_distribution: distribution,
        hot_contents: hot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testutil::{corpus_of, corpus_with_kinds};

    #[test]
    fn test_scenario_gg_chain() {
        let store = Store::open_in_memory().unwrap();
        // [A:"gg"@0, B:"gg"@10, C:"gg"@20, D:"stop"@25]
        let corpus = corpus_of(
            &store,
            &[(1, 0, "gg"), (2, 10, "gg"), (3, 20, "gg"), (4, 25, "stop")],
        );
        let report =
            repeat_chains(&store, &QueryCtx::new(corpus), ChainOptions::default()).unwrap();

        assert_eq!(report.chain_count, 1);
        assert_eq!(report.chain_length_distribution.get(&3), Some(&1));

        let by_id: HashMap<i64, &ChainMemberEntry> =
            report.members.iter().map(|m| (m.member_id, m)).collect();
        assert_eq!(by_id[&1].originator_count, 1);
        assert_eq!(by_id[&2].initiator_count, 1);
        assert_eq!(by_id[&4].breaker_count, 1);
        assert_eq!(by_id[&1].initiator_count, 0);

        assert_eq!(report.hot_contents[0].content, "gg");
        assert_eq!(report.hot_contents[0].max_chain_length, 3);
        assert_eq!(report.hot_contents[0].count, 1);
        assert_eq!(report.hot_contents[0].last_ts, 20);
        assert_eq!(report.hot_contents[0].originator_name, "member-1");
    }

    #[test]
    fn test_rates_use_member_totals() {
        let store = Store::open_in_memory().unwrap();
        let corpus = corpus_of(
            &store,
            &[
                (1, 0, "gg"),
                (2, 10, "gg"),
                (3, 20, "no"),
                (1, 30, "x"),
                (1, 40, "y"),
                (1, 50, "z"),
            ],
        );
        let report =
            repeat_chains(&store, &QueryCtx::new(corpus), ChainOptions::default()).unwrap();
        let a = report
            .members
            .iter()
            .find(|m| m.member_id == 1)
            .unwrap();
        // 1 origination over 4 messages in range
        assert_eq!(a.originator_count, 1);
        assert!((a.originator_rate - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_sender_does_not_extend() {
        let store = Store::open_in_memory().unwrap();
        let corpus = corpus_of(
            &store,
            &[(1, 0, "gg"), (2, 10, "gg"), (1, 20, "gg"), (2, 30, "gg")],
        );
        let report =
            repeat_chains(&store, &QueryCtx::new(corpus), ChainOptions::default()).unwrap();
        // First chain A,B closes when A echoes again; second chain A,B.
        assert_eq!(report.chain_count, 2);
        assert_eq!(report.chain_length_distribution.get(&2), Some(&2));
        // Same-text closures have no breaker.
        assert!(report.members.iter().all(|m| m.breaker_count == 0));
    }

    #[test]
    fn test_gap_breaks_chain_without_breaker() {
        let store = Store::open_in_memory().unwrap();
        let corpus = corpus_of(
            &store,
            &[(1, 0, "gg"), (2, 10, "gg"), (3, 700, "gg"), (4, 710, "gg")],
        );
        let report =
            repeat_chains(&store, &QueryCtx::new(corpus), ChainOptions::default()).unwrap();
        assert_eq!(report.chain_count, 2);
        assert!(report.members.iter().all(|m| m.breaker_count == 0));
        // One content triggered two chains.
        assert_eq!(report.hot_contents[0].count, 2);
    }

    #[test]
    fn test_single_echo_is_not_a_chain() {
        let store = Store::open_in_memory().unwrap();
        let corpus = corpus_of(&store, &[(1, 0, "gg"), (2, 700, "gg"), (3, 710, "other")]);
        let report =
            repeat_chains(&store, &QueryCtx::new(corpus), ChainOptions::default()).unwrap();
        assert_eq!(report.chain_count, 0);
        assert!(report.members.is_empty());
        // An unfinished echo has no breaker either.
        assert!(report.hot_contents.is_empty());
    }

    #[test]
    fn test_non_text_messages_break_without_credit() {
        let store = Store::open_in_memory().unwrap();
        let corpus = corpus_with_kinds(
            &store,
            &[
                (1, 0, "gg", MessageKind::Text),
                (2, 10, "gg", MessageKind::Text),
                (3, 20, "[Photo]", MessageKind::Image),
            ],
        );
        let report =
            repeat_chains(&store, &QueryCtx::new(corpus), ChainOptions::default()).unwrap();
        assert_eq!(report.chain_count, 1);
        let breaker = report.members.iter().find(|m| m.member_id == 3).unwrap();
        assert_eq!(breaker.breaker_count, 1);
    }

    #[test]
    fn test_chain_length_sum_matches_participants() {
        let store = Store::open_in_memory().unwrap();
        let corpus = corpus_of(
            &store,
            &[
                (1, 0, "gg"),
                (2, 10, "gg"),
                (3, 20, "gg"),
                (4, 30, "brb"),
                (5, 40, "brb"),
                (1, 600, "solo"),
            ],
        );
        let report =
            repeat_chains(&store, &QueryCtx::new(corpus), ChainOptions::default()).unwrap();
        let sum: u64 = report
            .chain_length_distribution
            .iter()
            .map(|(len, count)| u64::from(*len) * count)
            .sum();
        // 3 (gg) + 2 (brb) participants
        assert_eq!(sum, 5);
        assert_eq!(report.chain_count, 2);
    }

    #[test]
    fn test_whitespace_trimmed_case_sensitive() {
        let store = Store::open_in_memory().unwrap();
        let corpus = corpus_of(&store, &[(1, 0, " gg "), (2, 10, "gg"), (3, 20, "GG")]);
        let report =
            repeat_chains(&store, &QueryCtx::new(corpus), ChainOptions::default()).unwrap();
        // " gg " and "gg" chain; "GG" breaks.
        assert_eq!(report.chain_count, 1);
        let by_id: HashMap<i64, &ChainMemberEntry> =
            report.members.iter().map(|m| (m.member_id, m)).collect();
        assert_eq!(by_id[&3].breaker_count, 1);
    }
}
