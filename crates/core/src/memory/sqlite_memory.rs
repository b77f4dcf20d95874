//! # SQLite Memory Service
//!
//! Ancillary, expiring notes kept per project next to the shared store.
//! Uses the shared connection from [`DossierDb`].
//!
//! Search is a keyword `LIKE` match; expired entries are invisible to reads
//! and removed by [`SqliteMemoryService::clean_expired`].

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

use crate::state::db::DossierDb;
use crate::state::{db_time, lock_error};

/// A memory entry stored in SQLite
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub id: i64,
    pub project_id: String,
    pub text: String,
    pub kind: String,
    pub origin: String,
    pub created_at: String,
    pub expires_at: Option<String>,
}

/// SQLite-backed memory service using the shared [`DossierDb`] connection
pub struct SqliteMemoryService {
    conn: Arc<Mutex<Connection>>,
    default_ttl: Option<Duration>,
}

impl SqliteMemoryService {
    /// Entries added without an explicit TTL never expire
    pub fn new(db: &DossierDb) -> Self {
        Self {
            conn: db.connection(),
            default_ttl: None,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Add a memory entry; `ttl` overrides the service default
    pub fn remember(
        &self,
        project_id: &str,
        text: &str,
        kind: &str,
        origin: &str,
        ttl: Option<Duration>,
    ) -> Result<i64> {
        let conn = self.conn.lock().map_err(lock_error)?;
        self.remember_in(&conn, project_id, text, kind, origin, ttl)
    }

    /// [`Self::remember`] on a connection the caller already holds, so the
    /// insert can join a larger transaction
    pub(crate) fn remember_in(
        &self,
        conn: &Connection,
        project_id: &str,
        text: &str,
        kind: &str,
        origin: &str,
        ttl: Option<Duration>,
    ) -> Result<i64> {
        let now = Utc::now();
        let expires_at = match ttl.or(self.default_ttl) {
            Some(ttl) => {
                let expires = now
                    .checked_add_signed(ttl)
                    .with_context(|| format!("Memory TTL of {}s is out of range", ttl.num_seconds()))?;
                Some(db_time(&expires))
            }
            None => None,
        };

        conn.execute(
            r#"
            INSERT INTO memories (project_id, text, kind, origin, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![project_id, text, kind, origin, db_time(&now), expires_at],
        )
        .context("Failed to insert memory")?;

        Ok(conn.last_insert_rowid())
    }

    /// Search live memories of a project by keyword
    pub fn search(&self, project_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let pattern = format!("%{}%", query);
        let mut stmt = conn.prepare(
            r#"
            SELECT id, project_id, text, kind, origin, created_at, expires_at
            FROM memories
            WHERE project_id = ?1 AND text LIKE ?2
              AND (expires_at IS NULL OR expires_at > ?3)
            ORDER BY created_at DESC, id DESC
            LIMIT ?4
            "#,
        )?;

        let entries = stmt
            .query_map(
                params![project_id, pattern, db_time(&Utc::now()), limit as i64],
                Self::row_to_entry,
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect search results")?;

        Ok(entries)
    }

    /// Live memories of a project, newest first
    pub fn list(&self, project_id: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, project_id, text, kind, origin, created_at, expires_at
            FROM memories
            WHERE project_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
            "#,
        )?;

        let entries = stmt
            .query_map(
                params![project_id, db_time(&Utc::now()), limit as i64],
                Self::row_to_entry,
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list memories")?;

        Ok(entries)
    }

    /// Delete every entry whose expiry has passed; returns the count removed
    pub fn clean_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(lock_error)?;

        let removed = conn
            .execute(
                "DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![db_time(&Utc::now())],
            )
            .context("Failed to clean expired memories")?;

        if removed > 0 {
            tracing::debug!("Removed {} expired memories", removed);
        }
        Ok(removed)
    }

    /// Count of all stored entries, expired or not
    pub fn count(&self) -> Result<i64> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
        Ok(MemoryEntry {
            id: row.get(0)?,
            project_id: row.get(1)?,
            text: row.get(2)?,
            kind: row.get(3)?,
            origin: row.get(4)?,
            created_at: row.get(5)?,
            expires_at: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remember_and_search() {
        let db = DossierDb::open_in_memory().unwrap();
        let service = SqliteMemoryService::new(&db);

        service
            .remember("p1", "Acme revenue grew 12%", "insight", "financial_analyst", None)
            .unwrap();
        service
            .remember("p1", "Acme entered Brazil", "insight", "market_analyst", None)
            .unwrap();
        service
            .remember("p2", "Acme is unrelated here", "note", "researcher", None)
            .unwrap();

        assert_eq!(service.search("p1", "Acme", 10).unwrap().len(), 2);
        assert_eq!(service.search("p1", "revenue", 10).unwrap().len(), 1);
        assert_eq!(service.list("p2", 10).unwrap().len(), 1);
        assert_eq!(service.count().unwrap(), 3);
    }

    #[test]
    fn test_clean_expired() {
        let db = DossierDb::open_in_memory().unwrap();
        let service = SqliteMemoryService::new(&db).with_default_ttl(Duration::hours(1));

        service
            .remember("p1", "stale", "note", "", Some(Duration::seconds(-5)))
            .unwrap();
        service.remember("p1", "fresh", "note", "", None).unwrap();

        // Expired entries are hidden before they are cleaned
        let live = service.list("p1", 10).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].text, "fresh");
        assert!(live[0].expires_at.is_some());

        assert_eq!(service.clean_expired().unwrap(), 1);
        assert_eq!(service.clean_expired().unwrap(), 0);
        assert_eq!(service.count().unwrap(), 1);
    }

    #[test]
    fn test_out_of_range_ttl_is_an_error() {
        let db = DossierDb::open_in_memory().unwrap();
        let service = SqliteMemoryService::new(&db).with_default_ttl(Duration::MAX);

        let err = service
            .remember("p1", "forever", "insight", "researcher", None)
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert_eq!(service.count().unwrap(), 0);

        // An explicit TTL still wins over the default
        service
            .remember("p1", "soon", "insight", "researcher", Some(Duration::hours(1)))
            .unwrap();
        assert_eq!(service.count().unwrap(), 1);
    }
}
