//! Persistent SQLite log of daily check-ins.

use chrono::{DateTime, NaiveDate, TimeZone};
use rusqlite::{Connection, params};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Errors from the storage layer.
#[derive(Debug)]
pub enum DbError {
    /// Failed to open the database file.
    Open { path: PathBuf, source: rusqlite::Error },
    /// A statement failed.
    Sqlite(rusqlite::Error),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "failed to open database '{}': {}", path.display(), source)
            }
            Self::Sqlite(e) => write!(f, "database error: {e}"),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::Sqlite(e) => Some(e),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

/// What an inbound message asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A daily report that gets advice back.
    Report,
    /// A request for a profile summary.
    Summary,
}

impl EntryKind {
    fn as_str(self) -> &'static str {
        match self {
            EntryKind::Report => "report",
            EntryKind::Summary => "summary",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "summary" => EntryKind::Summary,
            _ => EntryKind::Report,
        }
    }
}

/// One logged interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub user_id: String,
    /// Local calendar date, `YYYY-MM-DD`.
    pub log_date: String,
    /// Local timestamp, RFC 3339.
    pub created_at: String,
    pub kind: EntryKind,
    pub user_message: String,
    /// None until a reply has been generated.
    pub bot_reply: Option<String>,
    pub model_used: Option<String>,
}

/// SQLite-backed log store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path).map_err(|e| DbError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;

        let (entries, users) = db.counts()?;
        info!("Loaded database from {:?} ({} entries, {} users)", path, entries, users);
        Ok(db)
    }

    /// Create a new in-memory database.
    pub fn in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<(), DbError> {
        self.conn().execute_batch(r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                log_date TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'report',
                user_text TEXT NOT NULL,
                ai_reply TEXT,
                model_used TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY(user_id) REFERENCES users(user_id)
            );

            CREATE TABLE IF NOT EXISTS push_runs (
                run_date TEXT PRIMARY KEY,
                fired_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_daily_logs_user ON daily_logs(user_id, id);
        "#)?;
        Ok(())
    }

    /// (log entries, registered users).
    pub fn counts(&self) -> Result<(usize, usize), DbError> {
        let conn = self.conn();
        let entries: i64 = conn.query_row("SELECT COUNT(*) FROM daily_logs", [], |row| row.get(0))?;
        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok((entries as usize, users as usize))
    }

    // ==================== USERS ====================

    /// Register a user as a push target. No-op if already known.
    pub fn upsert_user<Tz: TimeZone>(&self, user_id: &str, now: &DateTime<Tz>) -> Result<(), DbError>
    where
        Tz::Offset: fmt::Display,
    {
        self.conn().execute(
            "INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?1, ?2)",
            params![user_id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// All registered users, oldest first.
    pub fn list_users(&self) -> Result<Vec<String>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY created_at, user_id")?;
        let users = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    // ==================== LOG ENTRIES ====================

    /// Append an entry with no reply yet. Returns the new id.
    pub fn append<Tz: TimeZone>(
        &self,
        user_id: &str,
        kind: EntryKind,
        user_message: &str,
        now: &DateTime<Tz>,
    ) -> Result<i64, DbError>
    where
        Tz::Offset: fmt::Display,
    {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO daily_logs (user_id, log_date, kind, user_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                now.date_naive().format("%Y-%m-%d").to_string(),
                kind.as_str(),
                user_message,
                now.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Write the reply for an entry. Only the first write wins.
    pub fn record_reply(&self, id: i64, reply: &str, model: Option<&str>) -> Result<bool, DbError> {
        let changed = self.conn().execute(
            "UPDATE daily_logs SET ai_reply = ?2, model_used = ?3
             WHERE id = ?1 AND ai_reply IS NULL",
            params![id, reply, model],
        )?;
        Ok(changed == 1)
    }

    /// The last `n` reports from a user, most recent last.
    pub fn recent(&self, user_id: &str, n: usize) -> Result<Vec<LogEntry>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, log_date, created_at, kind, user_text, ai_reply, model_used
             FROM daily_logs
             WHERE user_id = ?1 AND kind = 'report'
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        // A negative LIMIT means unlimited in SQLite, so never let n wrap.
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let mut entries = stmt
            .query_map(params![user_id, limit], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        entries.reverse();
        Ok(entries)
    }

    /// Look up a single entry.
    #[cfg(test)]
    pub fn get(&self, id: i64) -> Result<Option<LogEntry>, DbError> {
        let conn = self.conn();
        let result = conn.query_row(
            "SELECT id, user_id, log_date, created_at, kind, user_text, ai_reply, model_used
             FROM daily_logs WHERE id = ?1",
            params![id],
            entry_from_row,
        );
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ==================== PUSH RUNS ====================

    /// Claim the nightly push for `date`. True only on the first claim.
    pub fn claim_push<Tz: TimeZone>(&self, date: NaiveDate, now: &DateTime<Tz>) -> Result<bool, DbError>
    where
        Tz::Offset: fmt::Display,
    {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO push_runs (run_date, fired_at) VALUES (?1, ?2)",
            params![date.format("%Y-%m-%d").to_string(), now.to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        log_date: row.get(2)?,
        created_at: row.get(3)?,
        kind: EntryKind::from_str(&row.get::<_, String>(4)?),
        user_message: row.get(5)?,
        bot_reply: row.get(6)?,
        model_used: row.get(7)?,
    })
}
