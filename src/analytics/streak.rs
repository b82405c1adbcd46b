//! Monologue-streak analysis.
//!
//! A streak is a maximal run of at least `min_run` consecutive messages
//! from the same sender where each consecutive pair is within `idle_gap`
//! seconds. Runs are bucketed as low (3-4), mid (5-9) and high (>= 10).

use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};

use crate::analytics::{member_names, QueryCtx};
use crate::error::Result;
use crate::store::Store;

/// Tunable thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreakOptions {
    /// Minimum run length that counts as a streak.
    pub min_run: u32,
    /// Maximum seconds between consecutive messages of one run.
    pub idle_gap: i64,
}

impl Default for StreakOptions {
    fn default() -> Self {
        Self {
            min_run: 3,
            idle_gap: 300,
        }
    }
}

/// Per-member streak statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StreakEntry {
    pub member_id: i64,
    pub name: String,
    pub total_streaks: u64,
    pub max_combo: u32,
    /// Streaks of length 3-4.
    pub low_streak: u64,
    /// Streaks of length 5-9.
    pub mid_streak: u64,
    /// Streaks of length >= 10.
    pub high_streak: u64,
}

/// The single longest streak on record.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MaxComboRecord {
    pub member_id: i64,
    pub combo_length: u32,
    pub start_ts: i64,
}

/// Streak report over the filtered window.
#[derive(Debug, Clone, Serialize)]
pub struct StreakReport {
    /// Members with at least one streak, ordered by total streaks
    /// descending, ties by member id ascending.
    pub entries: Vec<StreakEntry>,
    /// All-time longest run; ties broken by later start (most recent wins).
    pub max_combo_record: Option<MaxComboRecord>,
}

#[derive(Debug, Default)]
struct Tally {
    total_streaks: u64,
    max_combo: u32,
    low: u64,
    mid: u64,
    high: u64,
}

struct Run {
    sender: i64,
    len: u32,
    start_ts: i64,
    last_ts: i64,
}

/// Computes monologue streaks.
pub fn monologue_streaks(
    store: &Store,
    ctx: &QueryCtx,
    options: StreakOptions,
) -> Result<StreakReport> {
    ctx.check_deadline()?;

    let mut sql = String::from(
        "SELECT sender_id, ts FROM message WHERE corpus_id = ?1",
    );
    let mut params = vec![ctx.corpus];
    ctx.filter.push_sql(&mut sql, "ts", &mut params);
    sql.push_str(" ORDER BY ts, id");

    let mut stmt = store.conn().prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut tallies: std::collections::HashMap<i64, Tally> = std::collections::HashMap::new();
    let mut best: Option<MaxComboRecord> = None;
    let mut run: Option<Run> = None;
    let mut scanned = 0usize;

    let mut finish_run = |run: Run,
                          tallies: &mut std::collections::HashMap<i64, Tally>,
                          best: &mut Option<MaxComboRecord>| {
        if run.len < options.min_run {
            return;
        }
        let tally = tallies.entry(run.sender).or_default();
        tally.total_streaks += 1;
        tally.max_combo = tally.max_combo.max(run.len);
        // Buckets are fixed by definition even when min_run is tuned lower.
        if run.len >= 10 {
            tally.high += 1;
        } else if run.len >= 5 {
            tally.mid += 1;
        } else if run.len >= 3 {
            tally.low += 1;
        }
        let better = match best {
            None => true,
            // Most recent wins on equal length.
            Some(b) => run.len > b.combo_length
                || (run.len == b.combo_length && run.start_ts > b.start_ts),
        };
        if better {
            *best = Some(MaxComboRecord {
                member_id: run.sender,
                combo_length: run.len,
                start_ts: run.start_ts,
            });
        }
    };

    while let Some(row) = rows.next()? {
        scanned += 1;
        ctx.check_deadline_every(scanned)?;

        let sender: i64 = row.get(0)?;
        let ts: i64 = row.get(1)?;

        run = Some(match run.take() {
            Some(mut current)
                if current.sender == sender && ts - current.last_ts <= options.idle_gap =>
            {
                current.len += 1;
                current.last_ts = ts;
                current
            }
            Some(finished) => {
                finish_run(finished, &mut tallies, &mut best);
                Run {
                    sender,
                    len: 1,
                    start_ts: ts,
                    last_ts: ts,
                }
            }
            None => Run {
                sender,
                len: 1,
                start_ts: ts,
                last_ts: ts,
            },
        });
    }
    if let Some(finished) = run.take() {
        finish_run(finished, &mut tallies, &mut best);
    }

    let names = member_names(store, ctx.corpus)?;
    let mut entries: Vec<StreakEntry> = tallies
        .into_iter()
        .map(|(member_id, tally)| StreakEntry {
            member_id,
            name: names
                .get(&member_id)
                .cloned()
                .unwrap_or_else(|| format!("#{member_id}")),
            total_streaks: tally.total_streaks,
            max_combo: tally.max_combo,
            low_streak: tally.low,
            mid_streak: tally.mid,
            high_streak: tally.high,
        })
        .collect();
    entries.sort_by(|a, b| {
        b.total_streaks
            .cmp(&a.total_streaks)
            .then(a.member_id.cmp(&b.member_id))
    });

    Ok(StreakReport {
        entries,
        max_combo_record: best,
    })
}
