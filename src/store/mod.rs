//! Embedded corpus store.
//!
//! A single SQLite database file per installation holds every imported
//! corpus. One [`Store`] wraps one `rusqlite::Connection`; the import worker
//! holds the only read-write store while analytics workers open read-only
//! ones (each worker owns its connection, nothing is shared).
//!
//! Logical tables: `meta` (one row per corpus), `member`, `message`,
//! `name_history`, plus the `app_state` key-value table used by the session
//! catalog. Schema lifecycle lives in [`migrations`]; corpus CRUD and bulk
//! writes in [`corpus`] (implemented as inherent methods on [`Store`]).

pub mod corpus;
pub mod migrations;

use std::path::Path;
use std::time::Instant;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Transaction};
use serde::Serialize;
use tracing::debug;

use crate::error::{ChatlensError, Result};

pub use migrations::MigrationInfo;

/// Default row cap for SQL-lab queries.
pub const DEFAULT_SQL_ROW_CAP: usize = 1000;

/// Handle to the corpus database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (or creates) the database read-write and applies pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// [`ChatlensError::StoreIntegrity`] when the on-disk schema version is
    /// newer than this build or a migration fails.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        migrations::run(&conn)?;
        debug!(path = %path.display(), "opened store read-write");
        Ok(Self { conn })
    }

    /// Opens the database read-only (analytics workers).
    ///
    /// Each reader sees a snapshot taken at the start of its own read
    /// transaction; no migrations are applied here.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let current = migrations::current_version(&conn)?;
        if current > migrations::latest_version() {
            return Err(ChatlensError::integrity(format!(
                "store schema version {current} is newer than supported"
            )));
        }
        debug!(path = %path.display(), "opened store read-only");
        Ok(Self { conn })
    }

    /// Opens an in-memory store (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        migrations::run(&conn)?;
        Ok(Self { conn })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    /// Borrow the underlying connection.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Starts a transaction covering subsequent writes on this store.
    pub(crate) fn begin(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    /// Migrations newer than the store's current schema version.
    pub fn pending_migrations(&self) -> Result<Vec<MigrationInfo>> {
        migrations::pending(&self.conn)
    }

    /// Schema of the corpus tables, for the SQL-lab surface.
    pub fn table_schema(&self) -> Result<Vec<TableSchema>> {
        let mut names_stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names: Vec<String> = names_stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let mut stmt = self
                .conn
                .prepare("SELECT name, type, pk FROM pragma_table_info(?1)")?;
            let columns = stmt
                .query_map([&name], |row| {
                    Ok(ColumnSchema {
                        name: row.get(0)?,
                        col_type: row.get(1)?,
                        pk: row.get::<_, i64>(2)? > 0,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;
            tables.push(TableSchema { name, columns });
        }
        Ok(tables)
    }

    /// Executes one read-only SELECT with a row cap.
    ///
    /// The guardrail parses just enough SQL to reject anything other than a
    /// single `SELECT` (or `WITH ... SELECT`) statement; it does not attempt
    /// to sandbox arbitrary SQL.
    pub fn query_sql(&self, sql: &str, max_rows: usize) -> Result<SqlResult> {
        ensure_single_select(sql)?;

        let started = Instant::now();
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        let column_count = columns.len();

        let mut rows = stmt.query([])?;
        let mut data: Vec<Vec<serde_json::Value>> = Vec::new();
        let mut limited = false;
        while let Some(row) = rows.next()? {
            if data.len() >= max_rows {
                limited = true;
                break;
            }
            let mut record = Vec::with_capacity(column_count);
            for i in 0..column_count {
                record.push(json_value(row.get_ref(i)?));
            }
            data.push(record);
        }

        let row_count = data.len();
        Ok(SqlResult {
            columns,
            rows: data,
            row_count,
            duration_ms: started.elapsed().as_millis() as u64,
            limited,
        })
    }
}

/// One table in [`Store::table_schema`].
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// One column in [`TableSchema`].
#[derive(Debug, Clone, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: String,
    pub pk: bool,
}

/// Result of a SQL-lab query.
#[derive(Debug, Clone, Serialize)]
pub struct SqlResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub duration_ms: u64,
    pub limited: bool,
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(format!("<blob {} bytes>", b.len())),
    }
}

/// Statement keywords that disqualify a SQL-lab query wherever they appear
/// outside string literals.
const FORBIDDEN_WORDS: &[&str] = &[
    "insert", "update", "delete", "replace", "drop", "alter", "create", "attach", "detach",
    "pragma", "vacuum", "reindex", "begin", "commit", "rollback", "savepoint",
];

/// Rejects everything but a single SELECT statement.
fn ensure_single_select(sql: &str) -> Result<()> {
    let stripped = strip_comments(sql);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return Err(ChatlensError::rejected("empty statement"));
    }

    let lowered = trimmed.to_lowercase();
    let first_word: String = lowered
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if first_word != "select" && first_word != "with" {
        return Err(ChatlensError::rejected(format!(
            "only SELECT statements are allowed, got '{first_word}'"
        )));
    }

    // A second statement after a semicolon.
    if let Some(pos) = find_outside_strings(&lowered, ';') {
        if lowered[pos + 1..].trim().is_empty() {
            // Trailing semicolon is fine.
        } else {
            return Err(ChatlensError::rejected("multiple statements"));
        }
    }

    // Data- or schema-modifying keywords anywhere outside strings
    // (covers `WITH x AS (...) INSERT ...`).
    for word in words_outside_strings(&lowered) {
        if FORBIDDEN_WORDS.contains(&word.as_str()) {
            return Err(ChatlensError::rejected(format!(
                "statement contains forbidden keyword '{word}'"
            )));
        }
    }
    Ok(())
}

/// Removes `-- line` and `/* block */` comments.
fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let bytes: Vec<char> = sql.chars().collect();
    let mut i = 0;
    let mut in_string: Option<char> = None;
    while i < bytes.len() {
        let c = bytes[i];
        match in_string {
            Some(quote) => {
                out.push(c);
                if c == quote {
                    in_string = None;
                }
                i += 1;
            }
            None => {
                if c == '\'' || c == '"' {
                    in_string = Some(c);
                    out.push(c);
                    i += 1;
                } else if c == '-' && bytes.get(i + 1) == Some(&'-') {
                    while i < bytes.len() && bytes[i] != '\n' {
                        i += 1;
                    }
                } else if c == '/' && bytes.get(i + 1) == Some(&'*') {
                    i += 2;
                    while i + 1 < bytes.len() && !(bytes[i] == '*' && bytes[i + 1] == '/') {
                        i += 1;
                    }
                    i = (i + 2).min(bytes.len());
                    out.push(' ');
                } else {
                    out.push(c);
                    i += 1;
                }
            }
        }
    }
    out
}

/// Byte position of `needle` outside string literals, if any.
fn find_outside_strings(sql: &str, needle: char) -> Option<usize> {
    let mut in_string: Option<char> = None;
    for (pos, c) in sql.char_indices() {
        match in_string {
            Some(quote) if c == quote => in_string = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => in_string = Some(c),
            None if c == needle => return Some(pos),
            None => {}
        }
    }
    None
}

/// Identifier-ish words outside string literals.
fn words_outside_strings(sql: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_string: Option<char> = None;
    for c in sql.chars() {
        match in_string {
            Some(quote) => {
                if c == quote {
                    in_string = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    in_string = Some(c);
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                } else if c.is_ascii_alphanumeric() || c == '_' {
                    current.push(c);
                } else if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
