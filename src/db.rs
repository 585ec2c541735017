use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

/// Stored repository with its latest metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub id: i64,
    pub url: String,
    pub line_count: i64,
    /// Logins joined by a single space
    pub top_committers: String,
    /// Raw commit message, may contain newlines
    pub last_commit: String,
}

impl RepositoryRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            line_count: row.get(2)?,
            top_committers: row.get(3)?,
            last_commit: row.get(4)?,
        })
    }

    pub fn committers(&self) -> impl Iterator<Item = &str> {
        self.top_committers.split(' ').filter(|s| !s.is_empty())
    }
}

/// Every non-key column of a record, written as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub url: String,
    pub line_count: i64,
    pub top_committers: String,
    pub last_commit: String,
}

const SELECT_RECORD: &str =
    "SELECT id, url, line_count, top_committers, last_commit FROM repositories";

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // Concurrent CLI invocations and the server may share the file
        conn.busy_timeout(std::time::Duration::from_secs(30))?;

        let db = Self {
            conn,
            path: db_path.to_path_buf(),
        };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database for testing
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT UNIQUE NOT NULL COLLATE NOCASE,
                line_count INTEGER NOT NULL DEFAULT 0,
                top_committers TEXT NOT NULL DEFAULT '',
                last_commit TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_repositories_url_lower ON repositories(LOWER(url));
            ",
            )
            .context("Failed to create schema")?;
        Ok(())
    }

    /// Number of records whose url matches, ignoring case
    pub fn count_by_url(&self, url: &str) -> rusqlite::Result<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM repositories WHERE LOWER(url) = LOWER(?1)",
            [url],
            |row| row.get(0),
        )
    }

    /// Insert a new record in its own transaction
    ///
    /// Fails with a constraint violation if the url is already stored (in any case).
    pub fn insert_record(&mut self, record: &NewRecord) -> rusqlite::Result<i64> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO repositories (url, line_count, top_committers, last_commit)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.url,
                record.line_count,
                record.top_committers,
                record.last_commit
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Overwrite every non-key column of the record matching `url` (case-insensitive)
    ///
    /// Returns the number of rows changed.
    pub fn update_by_url(&mut self, url: &str, record: &NewRecord) -> rusqlite::Result<usize> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE repositories
             SET url = ?1, line_count = ?2, top_committers = ?3, last_commit = ?4
             WHERE LOWER(url) = LOWER(?5)",
            params![
                record.url,
                record.line_count,
                record.top_committers,
                record.last_commit,
                url
            ],
        )?;
        tx.commit()?;
        Ok(changed)
    }

    /// Exact url lookup, used by the detail page
    pub fn get_by_url(&self, url: &str) -> rusqlite::Result<Option<RepositoryRecord>> {
        self.conn
            .query_row(
                &format!("{SELECT_RECORD} WHERE url = ?1 COLLATE BINARY"),
                [url],
                RepositoryRecord::from_row,
            )
            .optional()
    }

    pub fn list_records(&self) -> rusqlite::Result<Vec<RepositoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_RECORD} ORDER BY LOWER(url)"))?;
        let records = stmt
            .query_map([], RepositoryRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Remove every tracked repository, returning how many were removed
    pub fn delete_all(&self) -> rusqlite::Result<usize> {
        self.conn.execute("DELETE FROM repositories", [])
    }
}

/// Whether an error is a UNIQUE/NOT NULL/CHECK constraint failure
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
