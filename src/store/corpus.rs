//! Corpus rows and bulk writes.
//!
//! Inherent methods on [`Store`] covering the `meta`, `member`, `message`
//! and `name_history` tables. Import batches are written inside one
//! transaction per batch (see [`crate::import`]); everything here runs on
//! whatever transaction is open on the store's connection.

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use crate::error::{ChatlensError, Result};
use crate::message::ChatKind;
use crate::normalize::{NameInterval, StoredMember, StoredMessage};
use crate::store::{migrations, Store};

/// Opaque corpus identifier.
pub type CorpusId = i64;

/// One row of the `meta` table.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusMeta {
    pub id: CorpusId,
    pub name: String,
    pub platform: String,
    pub kind: ChatKind,
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
    pub owner_member_id: Option<i64>,
    pub tz_offset_secs: i32,
    pub schema_version: i32,
    pub partial: bool,
    pub last_filter_start: Option<i64>,
    pub last_filter_end: Option<i64>,
    pub created_at: i64,
}

/// One row of the `member` table.
#[derive(Debug, Clone, Serialize)]
pub struct MemberRow {
    pub id: i64,
    pub platform_id: String,
    pub account_name: Option<String>,
    pub group_nickname: Option<String>,
    pub aliases: Vec<String>,
    pub roles: Vec<String>,
    pub avatar: Option<String>,
}

impl MemberRow {
    /// Display name: first of group nickname, account name, platform id.
    pub fn display_name(&self) -> &str {
        self.group_nickname
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.account_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.platform_id)
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn parse_json_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

impl Store {
    // =========================================================================
    // Corpus lifecycle
    // =========================================================================

    /// Creates a corpus row and returns its id.
    pub fn create_corpus(
        &self,
        name: &str,
        platform: &str,
        kind: ChatKind,
        tz_offset_secs: i32,
    ) -> Result<CorpusId> {
        self.conn().execute(
            "INSERT INTO meta (name, platform, chat_kind, tz_offset_secs, schema_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                name,
                platform,
                kind.as_str(),
                tz_offset_secs,
                migrations::latest_version(),
                now_secs()
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        debug!(corpus = id, name, platform, "created corpus");
        Ok(id)
    }

    /// Finds a corpus by `(name, platform)`, the re-import identity.
    pub fn find_corpus(&self, name: &str, platform: &str) -> Result<Option<CorpusId>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT corpus_id FROM meta WHERE name = ?1 AND platform = ?2",
                params![name, platform],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Loads one corpus row.
    pub fn get_corpus(&self, corpus: CorpusId) -> Result<CorpusMeta> {
        self.conn()
            .query_row(
                "SELECT corpus_id, name, platform, chat_kind, min_ts, max_ts,
                        owner_member_id, tz_offset_secs, schema_version, partial,
                        last_filter_start, last_filter_end, created_at
                 FROM meta WHERE corpus_id = ?1",
                params![corpus],
                corpus_from_row,
            )
            .optional()?
            .ok_or(ChatlensError::CorpusNotFound(corpus))
    }

    /// All corpora, most recently created first.
    pub fn list_corpora(&self) -> Result<Vec<CorpusMeta>> {
        let mut stmt = self.conn().prepare(
            "SELECT corpus_id, name, platform, chat_kind, min_ts, max_ts,
                    owner_member_id, tz_offset_secs, schema_version, partial,
                    last_filter_start, last_filter_end, created_at
             FROM meta ORDER BY created_at DESC, corpus_id DESC",
        )?;
        let rows = stmt
            .query_map([], corpus_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Deletes a corpus and everything beneath it, in one transaction.
    pub fn delete_corpus(&self, corpus: CorpusId) -> Result<()> {
        let tx = self.begin()?;
        let removed = self
            .conn()
            .execute("DELETE FROM meta WHERE corpus_id = ?1", params![corpus])?;
        if removed == 0 {
            return Err(ChatlensError::CorpusNotFound(corpus));
        }
        // Children go through ON DELETE CASCADE; make the intent explicit for
        // stores created before foreign keys were enforced.
        self.conn()
            .execute("DELETE FROM message WHERE corpus_id = ?1", params![corpus])?;
        self.conn()
            .execute("DELETE FROM member WHERE corpus_id = ?1", params![corpus])?;
        self.conn().execute(
            "DELETE FROM name_history WHERE corpus_id = ?1",
            params![corpus],
        )?;
        tx.commit()?;
        debug!(corpus, "deleted corpus");
        Ok(())
    }

    /// Sets or clears the corpus owner by member platform id.
    pub fn set_owner(&self, corpus: CorpusId, platform_id: Option<&str>) -> Result<()> {
        let member_id = match platform_id {
            None => None,
            Some(pid) => {
                let found: Option<i64> = self
                    .conn()
                    .query_row(
                        "SELECT id FROM member WHERE corpus_id = ?1 AND platform_id = ?2",
                        params![corpus, pid],
                        |row| row.get(0),
                    )
                    .optional()?;
                match found {
                    Some(id) => Some(id),
                    None => {
                        return Err(ChatlensError::internal(format!(
                            "no member with platform id '{pid}' in corpus {corpus}"
                        )))
                    }
                }
            }
        };
        let updated = self.conn().execute(
            "UPDATE meta SET owner_member_id = ?2 WHERE corpus_id = ?1",
            params![corpus, member_id],
        )?;
        if updated == 0 {
            return Err(ChatlensError::CorpusNotFound(corpus));
        }
        Ok(())
    }

    /// Flags or clears the partial-import marker.
    pub fn set_partial(&self, corpus: CorpusId, partial: bool) -> Result<()> {
        self.conn().execute(
            "UPDATE meta SET partial = ?2 WHERE corpus_id = ?1",
            params![corpus, partial as i64],
        )?;
        Ok(())
    }

    /// Persists the effective chat kind.
    pub fn set_chat_kind(&self, corpus: CorpusId, kind: ChatKind) -> Result<()> {
        self.conn().execute(
            "UPDATE meta SET chat_kind = ?2 WHERE corpus_id = ?1",
            params![corpus, kind.as_str()],
        )?;
        Ok(())
    }

    /// Widens the corpus time bounds to cover `[batch_min, batch_max]`.
    pub fn widen_bounds(&self, corpus: CorpusId, batch_min: i64, batch_max: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE meta SET
                 min_ts = MIN(COALESCE(min_ts, ?2), ?2),
                 max_ts = MAX(COALESCE(max_ts, ?3), ?3)
             WHERE corpus_id = ?1",
            params![corpus, batch_min, batch_max],
        )?;
        Ok(())
    }

    /// Stores the last time filter used for this corpus (UI state).
    pub fn remember_filter(
        &self,
        corpus: CorpusId,
        start_ts: Option<i64>,
        end_ts: Option<i64>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE meta SET last_filter_start = ?2, last_filter_end = ?3 WHERE corpus_id = ?1",
            params![corpus, start_ts, end_ts],
        )?;
        Ok(())
    }

    // =========================================================================
    // Members
    // =========================================================================

    /// Upserts normalized members.
    pub fn upsert_members(&self, corpus: CorpusId, members: &[StoredMember]) -> Result<()> {
        let mut stmt = self.conn().prepare_cached(
            "INSERT INTO member (corpus_id, id, platform_id, account_name, group_nickname,
                                 aliases, roles, avatar)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(corpus_id, id) DO UPDATE SET
                 account_name = excluded.account_name,
                 group_nickname = excluded.group_nickname,
                 aliases = excluded.aliases,
                 roles = excluded.roles,
                 avatar = excluded.avatar",
        )?;
        for member in members {
            stmt.execute(params![
                corpus,
                member.id,
                member.platform_id,
                member.account_name,
                member.group_nickname,
                json_list(&member.aliases),
                json_list(&member.roles),
                member.avatar,
            ])?;
        }
        Ok(())
    }

    /// All members of a corpus, ordered by internal id.
    pub fn list_members(&self, corpus: CorpusId) -> Result<Vec<MemberRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, platform_id, account_name, group_nickname, aliases, roles, avatar
             FROM member WHERE corpus_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![corpus], |row| {
                Ok(MemberRow {
                    id: row.get(0)?,
                    platform_id: row.get(1)?,
                    account_name: row.get(2)?,
                    group_nickname: row.get(3)?,
                    aliases: parse_json_list(row.get(4)?),
                    roles: parse_json_list(row.get(5)?),
                    avatar: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Inserts one normalized batch. Caller owns the transaction.
    pub fn insert_messages(&self, corpus: CorpusId, messages: &[StoredMessage]) -> Result<()> {
        let mut stmt = self.conn().prepare_cached(
            "INSERT INTO message (corpus_id, id, sender_id, ts, kind, content,
                                  reply_to_message_id, platform_message_id, extra)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for msg in messages {
            let extra = msg
                .extra
                .as_ref()
                .map(|v| serde_json::to_string(v))
                .transpose()?;
            stmt.execute(params![
                corpus,
                msg.id,
                msg.sender_id,
                msg.ts,
                msg.kind.as_str(),
                msg.content,
                msg.reply_to,
                msg.platform_msg_id,
                extra,
            ])?;
        }
        Ok(())
    }

    /// Binds replies resolved in the end-of-import second pass.
    pub fn bind_replies(&self, corpus: CorpusId, resolved: &[(i64, i64)]) -> Result<()> {
        let mut stmt = self.conn().prepare_cached(
            "UPDATE message SET reply_to_message_id = ?3 WHERE corpus_id = ?1 AND id = ?2",
        )?;
        for (msg_id, target_id) in resolved {
            stmt.execute(params![corpus, msg_id, target_id])?;
        }
        Ok(())
    }

    /// Preserves unresolvable reply targets in the message's extra payload.
    pub fn stash_dangling_replies(
        &self,
        corpus: CorpusId,
        dangling: &[(i64, String)],
    ) -> Result<()> {
        let mut stmt = self.conn().prepare_cached(
            "UPDATE message
             SET extra = json_set(COALESCE(extra, '{}'), '$.pending_reply', ?3)
             WHERE corpus_id = ?1 AND id = ?2",
        )?;
        for (msg_id, target) in dangling {
            stmt.execute(params![corpus, msg_id, target])?;
        }
        Ok(())
    }

    /// Message count for one corpus.
    pub fn message_count(&self, corpus: CorpusId) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM message WHERE corpus_id = ?1",
            params![corpus],
            |row| row.get(0),
        )?)
    }

    /// Member count for one corpus.
    pub fn member_count(&self, corpus: CorpusId) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM member WHERE corpus_id = ?1",
            params![corpus],
            |row| row.get(0),
        )?)
    }

    // =========================================================================
    // Name history
    // =========================================================================

    /// Replaces the open name intervals of `touched_members` and appends the
    /// given intervals. Historical closed rows are never rewritten.
    pub fn write_name_history(
        &self,
        corpus: CorpusId,
        touched_members: &[i64],
        intervals: &[NameInterval],
    ) -> Result<()> {
        let mut delete = self.conn().prepare_cached(
            "DELETE FROM name_history
             WHERE corpus_id = ?1 AND member_id = ?2 AND end_ts IS NULL",
        )?;
        for member_id in touched_members {
            delete.execute(params![corpus, member_id])?;
        }

        let mut insert = self.conn().prepare_cached(
            "INSERT INTO name_history (corpus_id, member_id, name, start_ts, end_ts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for interval in intervals {
            insert.execute(params![
                corpus,
                interval.member_id,
                interval.name,
                interval.start_ts,
                interval.end_ts,
            ])?;
        }
        Ok(())
    }

    // =========================================================================
    // Re-import seeding
    // =========================================================================

    /// Next free member id for a corpus.
    pub fn next_member_id(&self, corpus: CorpusId) -> Result<i64> {
        let max: Option<i64> = self.conn().query_row(
            "SELECT MAX(id) FROM member WHERE corpus_id = ?1",
            params![corpus],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Next free message id for a corpus.
    pub fn next_message_id(&self, corpus: CorpusId) -> Result<i64> {
        let max: Option<i64> = self.conn().query_row(
            "SELECT MAX(id) FROM message WHERE corpus_id = ?1",
            params![corpus],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Members with their open name interval, for normalizer seeding.
    pub fn members_for_seeding(
        &self,
        corpus: CorpusId,
    ) -> Result<Vec<(StoredMember, String, i64)>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id, m.platform_id, m.account_name, m.group_nickname, m.aliases,
                    m.roles, m.avatar, h.name, h.start_ts
             FROM member m
             LEFT JOIN name_history h
               ON h.corpus_id = m.corpus_id AND h.member_id = m.id AND h.end_ts IS NULL
             WHERE m.corpus_id = ?1
             ORDER BY m.id",
        )?;
        let rows = stmt
            .query_map(params![corpus], |row| {
                let member = StoredMember {
                    id: row.get(0)?,
                    platform_id: row.get(1)?,
                    account_name: row.get(2)?,
                    group_nickname: row.get(3)?,
                    aliases: parse_json_list(row.get(4)?),
                    roles: parse_json_list(row.get(5)?),
                    avatar: row.get(6)?,
                };
                let name: Option<String> = row.get(7)?;
                let since: Option<i64> = row.get(8)?;
                Ok((member, name, since))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|(member, name, since)| {
                let name = name.unwrap_or_else(|| member.display_name().to_string());
                (member, name, since.unwrap_or(0))
            })
            .collect())
    }

    /// Platform message ids already known, for reply-map seeding.
    pub fn platform_message_ids(&self, corpus: CorpusId) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn().prepare(
            "SELECT platform_message_id, id FROM message
             WHERE corpus_id = ?1 AND platform_message_id IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(params![corpus], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// `(ts, sender platform id, content)` triples for dedup seeding.
    pub fn dedup_triples(
        &self,
        corpus: CorpusId,
    ) -> Result<Vec<(i64, String, Option<String>)>> {
        let mut stmt = self.conn().prepare(
            "SELECT msg.ts, mb.platform_id, msg.content
             FROM message msg
             JOIN member mb ON mb.corpus_id = msg.corpus_id AND mb.id = msg.sender_id
             WHERE msg.corpus_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![corpus], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // =========================================================================
    // App state (session catalog)
    // =========================================================================

    /// Reads a catalog key.
    pub fn app_state_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Writes or clears a catalog key.
    pub fn app_state_set(&self, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => {
                self.conn().execute(
                    "INSERT INTO app_state (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )?;
            }
            None => {
                self.conn()
                    .execute("DELETE FROM app_state WHERE key = ?1", params![key])?;
            }
        }
        Ok(())
    }
}

fn corpus_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CorpusMeta> {
    Ok(CorpusMeta {
        id: row.get(0)?,
        name: row.get(1)?,
        platform: row.get(2)?,
        kind: ChatKind::from_tag(&row.get::<_, String>(3)?),
        min_ts: row.get(4)?,
        max_ts: row.get(5)?,
        owner_member_id: row.get(6)?,
        tz_offset_secs: row.get(7)?,
        schema_version: row.get(8)?,
        partial: row.get::<_, i64>(9)? != 0,
        last_filter_start: row.get(10)?,
        last_filter_end: row.get(11)?,
        created_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn store_with_corpus() -> (Store, CorpusId) {
        let store = Store::open_in_memory().unwrap();
        let corpus = store
            .create_corpus("Test", "line", ChatKind::Group, 0)
            .unwrap();
        (store, corpus)
    }

    fn member(id: i64, platform_id: &str, name: &str) -> StoredMember {
        StoredMember {
            id,
            platform_id: platform_id.to_string(),
            account_name: Some(name.to_string()),
            group_nickname: None,
            aliases: Vec::new(),
            roles: Vec::new(),
            avatar: None,
        }
    }

    fn message(id: i64, sender: i64, ts: i64, content: &str) -> StoredMessage {
        StoredMessage {
            id,
            sender_id: sender,
            ts,
            kind: MessageKind::Text,
            content: Some(content.to_string()),
            reply_to: None,
            platform_msg_id: None,
            extra: None,
        }
    }

    #[test]
    fn test_create_and_get_corpus() {
        let (store, corpus) = store_with_corpus();
        let meta = store.get_corpus(corpus).unwrap();
        assert_eq!(meta.name, "Test");
        assert_eq!(meta.platform, "line");
        assert_eq!(meta.kind, ChatKind::Group);
        assert_eq!(meta.schema_version, migrations::latest_version());
        assert!(!meta.partial);
        assert!(meta.min_ts.is_none());
    }

    #[test]
    fn test_get_missing_corpus() {
        let store = Store::open_in_memory().unwrap();
        let err = store.get_corpus(99).unwrap_err();
        assert!(matches!(err, ChatlensError::CorpusNotFound(99)));
    }

    #[test]
    fn test_find_corpus_identity() {
        let (store, corpus) = store_with_corpus();
        assert_eq!(store.find_corpus("Test", "line").unwrap(), Some(corpus));
        assert_eq!(store.find_corpus("Test", "qq").unwrap(), None);
    }

    #[test]
    fn test_member_upsert_and_unique_platform_id() {
        let (store, corpus) = store_with_corpus();
        store
            .upsert_members(corpus, &[member(1, "u1", "Alice")])
            .unwrap();
        let mut updated = member(1, "u1", "Alice");
        updated.aliases = vec!["Al".to_string()];
        store.upsert_members(corpus, &[updated]).unwrap();

        let members = store.list_members(corpus).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].aliases, vec!["Al".to_string()]);

        // Same platform id under a different internal id violates UNIQUE.
        let err = store.upsert_members(corpus, &[member(2, "u1", "Alice")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_messages_and_counts() {
        let (store, corpus) = store_with_corpus();
        store
            .upsert_members(corpus, &[member(1, "u1", "Alice")])
            .unwrap();
        store
            .insert_messages(
                corpus,
                &[message(1, 1, 10, "a"), message(2, 1, 20, "b")],
            )
            .unwrap();
        assert_eq!(store.message_count(corpus).unwrap(), 2);
        assert_eq!(store.member_count(corpus).unwrap(), 1);
        assert_eq!(store.next_message_id(corpus).unwrap(), 3);
        assert_eq!(store.next_member_id(corpus).unwrap(), 2);
    }

    #[test]
    fn test_delete_corpus_cascades() {
        let (store, corpus) = store_with_corpus();
        store
            .upsert_members(corpus, &[member(1, "u1", "Alice")])
            .unwrap();
        store.insert_messages(corpus, &[message(1, 1, 10, "a")]).unwrap();
        store
            .write_name_history(
                corpus,
                &[],
                &[NameInterval {
                    member_id: 1,
                    name: "Alice".to_string(),
                    start_ts: 10,
                    end_ts: None,
                }],
            )
            .unwrap();

        store.delete_corpus(corpus).unwrap();
        assert!(store.get_corpus(corpus).is_err());
        assert_eq!(store.message_count(corpus).unwrap(), 0);
        assert_eq!(store.member_count(corpus).unwrap(), 0);
        let history: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM name_history", [], |row| row.get(0))
            .unwrap();
        assert_eq!(history, 0);
    }

    #[test]
    fn test_set_owner_resolves_platform_id() {
        let (store, corpus) = store_with_corpus();
        store
            .upsert_members(corpus, &[member(7, "u7", "Owner")])
            .unwrap();
        store.set_owner(corpus, Some("u7")).unwrap();
        assert_eq!(store.get_corpus(corpus).unwrap().owner_member_id, Some(7));

        store.set_owner(corpus, None).unwrap();
        assert_eq!(store.get_corpus(corpus).unwrap().owner_member_id, None);

        assert!(store.set_owner(corpus, Some("nobody")).is_err());
    }

    #[test]
    fn test_widen_bounds() {
        let (store, corpus) = store_with_corpus();
        store.widen_bounds(corpus, 100, 200).unwrap();
        store.widen_bounds(corpus, 50, 150).unwrap();
        let meta = store.get_corpus(corpus).unwrap();
        assert_eq!(meta.min_ts, Some(50));
        assert_eq!(meta.max_ts, Some(200));
    }

    #[test]
    fn test_partial_flag_round_trip() {
        let (store, corpus) = store_with_corpus();
        store.set_partial(corpus, true).unwrap();
        assert!(store.get_corpus(corpus).unwrap().partial);
        store.set_partial(corpus, false).unwrap();
        assert!(!store.get_corpus(corpus).unwrap().partial);
    }

    #[test]
    fn test_reply_binding_and_dangling_stash() {
        let (store, corpus) = store_with_corpus();
        store
            .upsert_members(corpus, &[member(1, "u1", "Alice")])
            .unwrap();
        store
            .insert_messages(
                corpus,
                &[message(1, 1, 10, "a"), message(2, 1, 20, "b")],
            )
            .unwrap();

        store.bind_replies(corpus, &[(2, 1)]).unwrap();
        let bound: Option<i64> = store
            .conn()
            .query_row(
                "SELECT reply_to_message_id FROM message WHERE corpus_id = ?1 AND id = 2",
                params![corpus],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(bound, Some(1));

        store
            .stash_dangling_replies(corpus, &[(1, "ghost".to_string())])
            .unwrap();
        let extra: String = store
            .conn()
            .query_row(
                "SELECT extra FROM message WHERE corpus_id = ?1 AND id = 1",
                params![corpus],
                |row| row.get(0),
            )
            .unwrap();
        let extra: serde_json::Value = serde_json::from_str(&extra).unwrap();
        assert_eq!(extra["pending_reply"], "ghost");
    }

    #[test]
    fn test_name_history_open_interval_replacement() {
        let (store, corpus) = store_with_corpus();
        store
            .upsert_members(corpus, &[member(1, "u1", "Alice")])
            .unwrap();
        store
            .write_name_history(
                corpus,
                &[],
                &[NameInterval {
                    member_id: 1,
                    name: "Alice".to_string(),
                    start_ts: 10,
                    end_ts: None,
                }],
            )
            .unwrap();

        // Re-import: the open interval is closed and a new one appended.
        store
            .write_name_history(
                corpus,
                &[1],
                &[
                    NameInterval {
                        member_id: 1,
                        name: "Alice".to_string(),
                        start_ts: 10,
                        end_ts: Some(50),
                    },
                    NameInterval {
                        member_id: 1,
                        name: "Ally".to_string(),
                        start_ts: 60,
                        end_ts: None,
                    },
                ],
            )
            .unwrap();

        let open_count: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM name_history WHERE end_ts IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(open_count, 1);
        let total: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM name_history", [], |row| row.get(0))
            .unwrap();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_seeding_queries() {
        let (store, corpus) = store_with_corpus();
        store
            .upsert_members(corpus, &[member(1, "u1", "Alice")])
            .unwrap();
        let mut msg = message(1, 1, 10, "a");
        msg.platform_msg_id = Some("m1".to_string());
        store.insert_messages(corpus, &[msg]).unwrap();
        store
            .write_name_history(
                corpus,
                &[],
                &[NameInterval {
                    member_id: 1,
                    name: "Alice".to_string(),
                    start_ts: 10,
                    end_ts: None,
                }],
            )
            .unwrap();

        let seeds = store.members_for_seeding(corpus).unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].1, "Alice");
        assert_eq!(seeds[0].2, 10);

        let ids = store.platform_message_ids(corpus).unwrap();
        assert_eq!(ids, vec![("m1".to_string(), 1)]);

        let triples = store.dedup_triples(corpus).unwrap();
        assert_eq!(triples, vec![(10, "u1".to_string(), Some("a".to_string()))]);
    }

    #[test]
    fn test_app_state_round_trip() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.app_state_get("selected").unwrap(), None);
        store.app_state_set("selected", Some("3")).unwrap();
        assert_eq!(
            store.app_state_get("selected").unwrap(),
            Some("3".to_string())
        );
        store.app_state_set("selected", None).unwrap();
        assert_eq!(store.app_state_get("selected").unwrap(), None);
    }

    #[test]
    fn test_remember_filter() {
        let (store, corpus) = store_with_corpus();
        store.remember_filter(corpus, Some(5), None).unwrap();
        let meta = store.get_corpus(corpus).unwrap();
        assert_eq!(meta.last_filter_start, Some(5));
        assert_eq!(meta.last_filter_end, None);
    }
}
