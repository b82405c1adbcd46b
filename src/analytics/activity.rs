//! Activity ranking.

use rusqlite::params_from_iter;
use serde::Serialize;

use crate::analytics::{member_names, QueryCtx};
use crate::error::Result;
use crate::store::Store;

/// One member's share of the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub member_id: i64,
    pub name: String,
    pub message_count: u64,
    /// `message_count / total_messages`, 0.0 when the corpus is empty.
    pub percentage: f64,
}

/// Activity ranking over the filtered window.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub total_messages: u64,
    /// Ordered by count descending, ties by member id ascending.
    pub entries: Vec<ActivityEntry>,
}

/// Computes per-member message counts and shares.
pub fn activity_ranking(store: &Store, ctx: &QueryCtx) -> Result<ActivityReport> {
    ctx.check_deadline()?;

    let mut sql = String::from(
        "SELECT sender_id, COUNT(*) FROM message WHERE corpus_id = ?1",
    );
    let mut params = vec![ctx.corpus];
    ctx.filter.push_sql(&mut sql, "ts", &mut params);
    sql.push_str(" GROUP BY sender_id");

    let mut stmt = store.conn().prepare(&sql)?;
    let counts: Vec<(i64, u64)> = stmt
        .query_map(params_from_iter(params), |row| {
            Ok((row.get(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let total_messages: u64 = counts.iter().map(|(_, c)| c).sum();
    let names = member_names(store, ctx.corpus)?;

    let mut entries: Vec<ActivityEntry> = counts
        .into_iter()
        .map(|(member_id, message_count)| ActivityEntry {
            member_id,
            name: names
                .get(&member_id)
                .cloned()
                .unwrap_or_else(|| format!("#{member_id}")),
            message_count,
            percentage: if total_messages == 0 {
                0.0
            } else {
                message_count as f64 / total_messages as f64
            },
        })
        .collect();
    entries.sort_by(|a, b| {
        b.message_count
            .cmp(&a.message_count)
            .then(a.member_id.cmp(&b.member_id))
    });

    Ok(ActivityReport {
        total_messages,
        entries,
    })
}
