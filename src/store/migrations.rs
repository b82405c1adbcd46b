//! Versioned schema migrations.
//!
//! An append-only ordered list of steps, each with a monotonically
//! increasing integer version. The database-level version lives in
//! `PRAGMA user_version`; every corpus row additionally mirrors the version
//! it was written under in `meta.schema_version`.
//!
//! On open the store applies all steps newer than the current version inside
//! one transaction, advancing `user_version` after each step. Steps are
//! idempotent (column existence is checked before `ALTER TABLE`, DDL uses
//! `IF NOT EXISTS`), so a partially re-run sequence is safe. Migrations
//! never destroy data; column additions carry `DEFAULT` values.

use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::error::{ChatlensError, Result};

/// One migration step.
pub struct Migration {
    /// Monotonically increasing version this step migrates *to*.
    pub version: i32,
    /// Short technical description (logs).
    pub description: &'static str,
    /// Human-readable reason surfaced at the boundary.
    pub user_message: &'static str,
    apply: fn(&Connection) -> rusqlite::Result<()>,
}

/// Boundary-facing view of a pending migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationInfo {
    pub version: i32,
    pub description: String,
    pub user_message: String,
}

/// The ordered migration list. Append only.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "base schema",
        user_message: "Create the corpus tables",
        apply: migrate_base_schema,
    },
    Migration {
        version: 2,
        description: "member roles column",
        user_message: "Track member roles (owner, admin)",
        apply: migrate_member_roles,
    },
    Migration {
        version: 3,
        description: "partial-import flag",
        user_message: "Mark corpora left incomplete by a canceled or crashed import",
        apply: migrate_partial_flag,
    },
];

/// Highest declared migration version.
pub fn latest_version() -> i32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Reads `PRAGMA user_version`.
pub fn current_version(conn: &Connection) -> Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Migrations newer than the store's current version.
pub fn pending(conn: &Connection) -> Result<Vec<MigrationInfo>> {
    let current = current_version(conn)?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| m.version > current)
        .map(|m| MigrationInfo {
            version: m.version,
            description: m.description.to_string(),
            user_message: m.user_message.to_string(),
        })
        .collect())
}

/// Applies all pending migrations inside a single transaction.
///
/// # Errors
///
/// [`ChatlensError::StoreIntegrity`] when the store's version is newer than
/// this build knows (downgrade), or when a step fails; the transaction rolls
/// back and the store is left at its prior version.
pub fn run(conn: &Connection) -> Result<()> {
    let current = current_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(ChatlensError::integrity(format!(
            "store schema version {current} is newer than supported version {latest}"
        )));
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        (migration.apply)(conn).map_err(|e| {
            ChatlensError::integrity(format!(
                "migration {} ({}) failed: {e}",
                migration.version, migration.description
            ))
        })?;
        conn.pragma_update(None, "user_version", migration.version)?;
        info!(
            version = migration.version,
            description = migration.description,
            "applied migration"
        );
    }
    tx.commit()?;
    Ok(())
}

/// Returns `true` if `table.column` exists.
fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        rusqlite::params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn migrate_base_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS meta (
            corpus_id        INTEGER PRIMARY KEY,
            name             TEXT NOT NULL,
            platform         TEXT NOT NULL,
            chat_kind        TEXT NOT NULL DEFAULT 'group',
            min_ts           INTEGER,
            max_ts           INTEGER,
            owner_member_id  INTEGER,
            tz_offset_secs   INTEGER NOT NULL DEFAULT 0,
            schema_version   INTEGER NOT NULL DEFAULT 0,
            last_filter_start INTEGER,
            last_filter_end  INTEGER,
            created_at       INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS member (
            corpus_id        INTEGER NOT NULL REFERENCES meta(corpus_id) ON DELETE CASCADE,
            id               INTEGER NOT NULL,
            platform_id      TEXT NOT NULL,
            account_name     TEXT,
            group_nickname   TEXT,
            aliases          TEXT NOT NULL DEFAULT '[]',
            avatar           TEXT,
            PRIMARY KEY (corpus_id, id),
            UNIQUE (corpus_id, platform_id)
        );

        CREATE TABLE IF NOT EXISTS message (
            corpus_id           INTEGER NOT NULL REFERENCES meta(corpus_id) ON DELETE CASCADE,
            id                  INTEGER NOT NULL,
            sender_id           INTEGER NOT NULL,
            ts                  INTEGER NOT NULL,
            kind                TEXT NOT NULL,
            content             TEXT,
            reply_to_message_id INTEGER,
            platform_message_id TEXT,
            extra               TEXT,
            PRIMARY KEY (corpus_id, id)
        );

        CREATE INDEX IF NOT EXISTS idx_message_ts
            ON message(corpus_id, ts);
        CREATE INDEX IF NOT EXISTS idx_message_sender
            ON message(corpus_id, sender_id);
        CREATE INDEX IF NOT EXISTS idx_message_platform_id
            ON message(corpus_id, platform_message_id);

        CREATE TABLE IF NOT EXISTS name_history (
            corpus_id  INTEGER NOT NULL REFERENCES meta(corpus_id) ON DELETE CASCADE,
            member_id  INTEGER NOT NULL,
            name       TEXT NOT NULL,
            start_ts   INTEGER NOT NULL,
            end_ts     INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_name_history_member
            ON name_history(corpus_id, member_id);

        CREATE TABLE IF NOT EXISTS app_state (
            key   TEXT PRIMARY KEY,
            value TEXT
        );
        ",
    )
}

fn migrate_member_roles(conn: &Connection) -> rusqlite::Result<()> {
    if !column_exists(conn, "member", "roles")? {
        conn.execute_batch("ALTER TABLE member ADD COLUMN roles TEXT NOT NULL DEFAULT '[]';")?;
    }
    Ok(())
}

fn migrate_partial_flag(conn: &Connection) -> rusqlite::Result<()> {
    if !column_exists(conn, "meta", "partial")? {
        conn.execute_batch("ALTER TABLE meta ADD COLUMN partial INTEGER NOT NULL DEFAULT 0;")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_versions_strictly_increase() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
        assert_eq!(latest_version(), 3);
    }

    #[test]
    fn test_fresh_store_migrates_to_latest() {
        let conn = raw_conn();
        assert_eq!(current_version(&conn).unwrap(), 0);
        run(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), latest_version());
        assert!(column_exists(&conn, "member", "roles").unwrap());
        assert!(column_exists(&conn, "meta", "partial").unwrap());
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = raw_conn();
        run(&conn).unwrap();
        // Force a full re-run of every step.
        conn.pragma_update(None, "user_version", 0).unwrap();
        run(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), latest_version());

        // Columns exist exactly once.
        let roles_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('member') WHERE name = 'roles'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(roles_count, 1);
    }

    #[test]
    fn test_future_version_is_integrity_error() {
        let conn = raw_conn();
        run(&conn).unwrap();
        conn.pragma_update(None, "user_version", latest_version() + 7)
            .unwrap();
        let err = run(&conn).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_pending_lists_user_messages() {
        let conn = raw_conn();
        let pending = pending(&conn).unwrap();
        assert_eq!(pending.len(), MIGRATIONS.len());
        assert_eq!(pending[0].version, 1);
        assert!(!pending[0].user_message.is_empty());

        run(&conn).unwrap();
        assert!(super::pending(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_roles_default_is_empty_list() {
        let conn = raw_conn();
        run(&conn).unwrap();
        conn.execute(
            "INSERT INTO meta (corpus_id, name, platform, created_at) VALUES (1, 'c', 'line', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO member (corpus_id, id, platform_id) VALUES (1, 1, 'u1')",
            [],
        )
        .unwrap();
        let roles: String = conn
            .query_row("SELECT roles FROM member WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(roles, "[]");
    }
}
