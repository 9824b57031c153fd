use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::adapters::FetchRequest;

/// Content-addressed key of a resolved request: SHA-256 of method, URL and body.
pub fn cache_key(request: &FetchRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.url.as_bytes());
    hasher.update(b"\n");
    hasher.update(request.body.as_deref().unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Durable store of raw responses. Entries never expire.
pub struct PageCache {
    conn: Mutex<Connection>,
}

impl PageCache {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
              key TEXT PRIMARY KEY,
              method TEXT NOT NULL,
              url TEXT NOT NULL,
              body TEXT,
              content BLOB NOT NULL,
              fetched_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, key: &str) -> rusqlite::Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.query_row("SELECT content FROM pages WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
    }

    pub fn put(&self, key: &str, request: &FetchRequest, content: &[u8]) -> rusqlite::Result<()> {
        let fetched_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.execute(
            r#"
            INSERT INTO pages (key, method, url, body, content, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(key) DO UPDATE SET
              content=excluded.content,
              fetched_at=excluded.fetched_at
            "#,
            params![
                key,
                request.method.as_str(),
                request.url,
                request.body,
                content,
                fetched_at
            ],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.execute("DELETE FROM pages WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn len(&self) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> rusqlite::Result<bool> {
        Ok(self.len()? == 0)
    }
}
