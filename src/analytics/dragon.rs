//! Dragon-king analysis: the per-day top sender.
//!
//! Days are bucketized in the corpus timezone (`meta.tz_offset_secs`), so a
//! late-night run of messages lands on the day the participants experienced,
//! not the UTC day.

use rusqlite::params_from_iter;
use serde::Serialize;

use crate::analytics::{member_names, QueryCtx};
use crate::error::Result;
use crate::store::Store;

/// Days won per member.
#[derive(Debug, Clone, Serialize)]
pub struct DragonEntry {
    pub member_id: i64,
    pub name: String,
    pub days_won: u64,
}

/// Dragon-king report over the filtered window.
#[derive(Debug, Clone, Serialize)]
pub struct DragonReport {
    /// Distinct calendar days that contained at least one message.
    pub total_days: u64,
    /// Ordered by days won descending, ties by member id ascending.
    pub entries: Vec<DragonEntry>,
}

/// Per-day message accounting for one member.
#[derive(Debug, Clone, Copy)]
struct DayStanding {
    count: u64,
    first_ts: i64,
}

/// Computes, for every day in the window, the member who sent the most
/// messages (ties broken by earliest message that day), then counts wins.
pub fn dragon_king(store: &Store, ctx: &QueryCtx) -> Result<DragonReport> {
    ctx.check_deadline()?;
    let tz_offset = i64::from(store.get_corpus(ctx.corpus)?.tz_offset_secs);

    let mut sql = String::from(
        "SELECT sender_id, ts FROM message WHERE corpus_id = ?1",
    );
    let mut params = vec![ctx.corpus];
    ctx.filter.push_sql(&mut sql, "ts", &mut params);
    sql.push_str(" ORDER BY ts, id");

    let mut stmt = store.conn().prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut total_days = 0u64;
    let mut wins: std::collections::HashMap<i64, u64> = std::collections::HashMap::new();
    let mut current_day: Option<i64> = None;
    let mut standings: std::collections::HashMap<i64, DayStanding> =
        std::collections::HashMap::new();
    let mut scanned = 0usize;

    let mut close_day = |standings: &mut std::collections::HashMap<i64, DayStanding>,
                         wins: &mut std::collections::HashMap<i64, u64>,
                         total_days: &mut u64| {
        if standings.is_empty() {
            return;
        }
        *total_days += 1;
        let mut best: Option<(i64, DayStanding)> = None;
        for (&member, &standing) in standings.iter() {
            best = match best {
                None => Some((member, standing)),
                Some((_, b)) if standing.count > b.count => Some((member, standing)),
                Some((_, b)) if standing.count == b.count && standing.first_ts < b.first_ts => {
                    Some((member, standing))
                }
                other => other,
            };
        }
        if let Some((member, _)) = best {
            *wins.entry(member).or_default() += 1;
        }
        standings.clear();
    };

    while let Some(row) = rows.next()? {
        scanned += 1;
        ctx.check_deadline_every(scanned)?;

        let sender: i64 = row.get(0)?;
        let ts: i64 = row.get(1)?;
        let day = (ts + tz_offset).div_euclid(86_400);

        if current_day != Some(day) {
            close_day(&mut standings, &mut wins, &mut total_days);
            current_day = Some(day);
        }
        let standing = standings.entry(sender).or_insert(DayStanding {
            count: 0,
            first_ts: ts,
        });
        standing.count += 1;
    }
    close_day(&mut standings, &mut wins, &mut total_days);

    let names = member_names(store, ctx.corpus)?;
    let mut entries: Vec<DragonEntry> = wins
        .into_iter()
        .map(|(member_id, days_won)| DragonEntry {
            member_id,
            name: names
                .get(&member_id)
                .cloned()
                .unwrap_or_else(|| format!("#{member_id}")),
            days_won,
        })
        .collect();
    entries.sort_by(|a, b| {
        b.days_won
            .cmp(&a.days_won)
            .then(a.member_id.cmp(&b.member_id))
    });

    Ok(DragonReport {
        total_days,
        entries,
    })
}
