//! Catchphrase analysis.
//!
//! Per member, the most frequent text messages after whitespace
//! normalization, bounded by a character-length window so one-letter
//! reactions and pasted essays both stay out.

use std::collections::HashMap;

use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};

use crate::analytics::{member_names, QueryCtx};
use crate::error::Result;
use crate::store::Store;

/// Tunable thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseOptions {
    /// Catchphrases returned per member.
    pub top: usize,
    /// Minimum content length in characters.
    pub min_len: usize,
    /// Maximum content length in characters.
    pub max_len: usize,
}

impl Default for PhraseOptions {
    fn default() -> Self {
        Self {
            top: 5,
            min_len: 2,
            max_len: 30,
        }
    }
}

/// One catchphrase.
#[derive(Debug, Clone, Serialize)]
pub struct Catchphrase {
    pub content: String,
    pub count: u64,
}

/// Catchphrases of one member.
#[derive(Debug, Clone, Serialize)]
pub struct MemberPhrases {
    pub member_id: i64,
    pub name: String,
    /// Ordered by count descending, ties by most recent use.
    pub catchphrases: Vec<Catchphrase>,
}

/// Catchphrase report over the filtered window.
#[derive(Debug, Clone, Serialize)]
pub struct PhraseReport {
    /// Ordered by member id; members without qualifying phrases omitted.
    pub members: Vec<MemberPhrases>,
}

/// Collapses interior whitespace and trims.
fn normalize(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Computes per-member catchphrases.
pub fn catchphrases(store: &Store, ctx: &QueryCtx, options: PhraseOptions) -> Result<PhraseReport> {
    ctx.check_deadline()?;

    let mut sql = String::from(
        "SELECT sender_id, ts, content FROM message
         WHERE corpus_id = ?1 AND kind = 'text' AND content IS NOT NULL",
    );
    let mut params = vec![ctx.corpus];
    ctx.filter.push_sql(&mut sql, "ts", &mut params);

    let mut stmt = store.conn().prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;

    // (member, normalized content) -> (count, last use)
    let mut counts: HashMap<(i64, String), (u64, i64)> = HashMap::new();
    let mut scanned = 0usize;
    while let Some(row) = rows.next()? {
        scanned += 1;
        ctx.check_deadline_every(scanned)?;

        let sender: i64 = row.get(0)?;
        let ts: i64 = row.get(1)?;
        let content: String = row.get(2)?;
        let normalized = normalize(&content);
        let chars = normalized.chars().count();
        if chars < options.min_len || chars > options.max_len {
            continue;
        }
        let entry = counts.entry((sender, normalized)).or_insert((0, ts));
        entry.0 += 1;
        entry.1 = entry.1.max(ts);
    }

    let mut per_member: HashMap<i64, Vec<(String, u64, i64)>> = HashMap::new();
    for ((member, content), (count, last_ts)) in counts {
        per_member
            .entry(member)
            .or_default()
            .push((content, count, last_ts));
    }

    let names = member_names(store, ctx.corpus)?;
    let mut members: Vec<MemberPhrases> = per_member
        .into_iter()
        .map(|(member_id, mut phrases)| {
            phrases.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)).then(a.0.cmp(&b.0)));
            phrases.truncate(options.top);
            MemberPhrases {
                member_id,
                name: names
                    .get(&member_id)
                    .cloned()
                    .unwrap_or_else(|| format!("#{member_id}")),
                catchphrases: phrases
                    .into_iter()
                    .map(|(content, count, _)| Catchphrase { content, count })
                    .collect(),
            }
        })
        .collect();
    members.sort_by_key(|m| m.member_id);

    Ok(PhraseReport { members })
}
