//! Name-history query.

use rusqlite::params;
use serde::Serialize;

use crate::analytics::QueryCtx;
use crate::error::Result;
use crate::store::Store;

/// One display-name interval; `end_ts = None` is the current name.
#[derive(Debug, Clone, Serialize)]
pub struct NameSpan {
    pub name: String,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
}

/// Ordered name history of one member.
pub fn name_history(store: &Store, ctx: &QueryCtx, member_id: i64) -> Result<Vec<NameSpan>> {
    ctx.check_deadline()?;
    let mut stmt = store.conn().prepare(
        "SELECT name, start_ts, end_ts FROM name_history
         WHERE corpus_id = ?1 AND member_id = ?2
         ORDER BY start_ts",
    )?;
    let spans = stmt
        .query_map(params![ctx.corpus, member_id], |row| {
            Ok(NameSpan {
                name: row.get(0)?,
                start_ts: row.get(1)?,
                end_ts: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(spans)
}
