//! Conversation-burst partition.
//!
//! Splits a corpus into sessions: a new session starts when the gap to the
//! previous message exceeds the idle threshold. Sessions are derived data,
//! computed on demand from the message stream.

use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};

use crate::analytics::QueryCtx;
use crate::error::Result;
use crate::store::Store;

/// Tunable threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Seconds of silence that end a session.
    pub idle_threshold: i64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            idle_threshold: 1800,
        }
    }
}

/// One conversation burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// 1-based ordinal within the filtered window.
    pub id: u64,
    pub start_ts: i64,
    pub end_ts: i64,
    pub first_message_id: i64,
}

/// Partitions the filtered window into sessions.
pub fn sessions(store: &Store, ctx: &QueryCtx, options: SessionOptions) -> Result<Vec<SessionInfo>> {
    ctx.check_deadline()?;

    let mut sql = String::from("SELECT id, ts FROM message WHERE corpus_id = ?1");
    let mut params = vec![ctx.corpus];
    ctx.filter.push_sql(&mut sql, "ts", &mut params);
    sql.push_str(" ORDER BY ts, id");

    let mut stmt = store.conn().prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut result: Vec<SessionInfo> = Vec::new();
    let mut scanned = 0usize;
    while let Some(row) = rows.next()? {
        scanned += 1;
        ctx.check_deadline_every(scanned)?;

        let id: i64 = row.get(0)?;
        let ts: i64 = row.get(1)?;
        match result.last_mut() {
            Some(open) if ts - open.end_ts <= options.idle_threshold => {
                open.end_ts = ts;
            }
            _ => {
                result.push(SessionInfo {
                    id: result.len() as u64 + 1,
                    start_ts: ts,
                    end_ts: ts,
                    first_message_id: id,
                });
            }
        }
    }
    Ok(result)
}
