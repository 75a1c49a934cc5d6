//! Word repository for looked-up word persistence

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use serde::Serialize;
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// A word the user looked up, with its definition and review history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordRecord {
    pub id: String,
    pub word: String,
    pub definition: String,
    pub created_at: DateTime<Utc>,
    pub review_count: u32,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

impl WordRecord {
    /// New record with a fresh id, never reviewed
    #[must_use]
    pub fn new(word: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            word: word.into(),
            definition: definition.into(),
            created_at: Utc::now(),
            review_count: 0,
            last_reviewed_at: None,
        }
    }
}

/// Sink for finished lookups
pub trait WordStore: Send + Sync {
    /// Persist a record
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be written
    fn save(&self, record: &WordRecord) -> Result<()>;
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Word repository for CRUD operations on looked-up words
#[derive(Clone)]
pub struct WordRepo {
    pool: DbPool,
}

impl WordRepo {
    const COLUMNS: &'static str =
        "id, word, definition, created_at, review_count, last_reviewed_at";

    /// Create a new word repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<super::DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Get a record by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<WordRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM words WHERE id = ?1", Self::COLUMNS);

        match conn.query_row(&sql, rusqlite::params![id], Self::row_to_record) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    /// Most recent record for a word, case-insensitive
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_word(&self, word: &str) -> Result<Option<WordRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM words WHERE word = ?1 COLLATE NOCASE ORDER BY created_at DESC LIMIT 1",
            Self::COLUMNS
        );

        match conn.query_row(&sql, rusqlite::params![word], Self::row_to_record) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    /// List records, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, limit: usize) -> Result<Vec<WordRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM words ORDER BY created_at DESC LIMIT ?1",
            Self::COLUMNS
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(rusqlite::params![limit], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Number of stored records
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM words", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Bump the review counter and stamp the review time
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record has this id
    pub fn record_review(&self, id: &str) -> Result<WordRecord> {
        {
            let conn = self.conn()?;
            let rows = conn.execute(
                "UPDATE words
                 SET review_count = review_count + 1, last_reviewed_at = ?2
                 WHERE id = ?1",
                rusqlite::params![id, timestamp(&Utc::now())],
            )?;
            if rows == 0 {
                return Err(Error::NotFound(format!("word {id}")));
            }
        }

        tracing::debug!(id, "word reviewed");
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("word {id}")))
    }

    /// Delete a record
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM words WHERE id = ?1", rusqlite::params![id])?;

        if rows > 0 {
            tracing::info!(id, "word deleted");
        }

        Ok(rows > 0)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<WordRecord> {
        let created_at: String = row.get(3)?;
        let last_reviewed_at: Option<String> = row.get(5)?;

        Ok(WordRecord {
            id: row.get(0)?,
            word: row.get(1)?,
            definition: row.get(2)?,
            created_at: parse_timestamp(3, &created_at)?,
            review_count: row.get(4)?,
            last_reviewed_at: last_reviewed_at
                .as_deref()
                .map(|s| parse_timestamp(5, s))
                .transpose()?,
        })
    }
}

impl WordStore for WordRepo {
    /// Insert or update word and definition; review fields are left alone
    fn save(&self, record: &WordRecord) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            r"
            INSERT INTO words (id, word, definition, created_at, review_count, last_reviewed_at)
            VALUES (?1, ?2, ?3, ?4, 0, NULL)
            ON CONFLICT(id) DO UPDATE SET
                word = excluded.word,
                definition = excluded.definition
            ",
            rusqlite::params![
                record.id,
                record.word,
                record.definition,
                timestamp(&record.created_at),
            ],
        )?;

        tracing::info!(id = %record.id, word = %record.word, "word saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn repo() -> WordRepo {
        WordRepo::new(init_memory().unwrap())
    }

    #[test]
    fn test_save_and_reload_preserves_identity() {
        let repo = repo();
        let record = WordRecord::new("ephemeral", "Lasting for a short period of time.");
        repo.save(&record).unwrap();

        let loaded = repo.get(&record.id).unwrap().unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.word, record.word);
        assert_eq!(loaded.definition, record.definition);
        assert_eq!(loaded.created_at, record.created_at);
        assert_eq!(loaded.review_count, 0);
        assert!(loaded.last_reviewed_at.is_none());
    }

    #[test]
    fn test_save_never_touches_review_count() {
        let repo = repo();
        let mut record = WordRecord::new("apple", "A fruit.");
        repo.save(&record).unwrap();
        repo.record_review(&record.id).unwrap();

        record.review_count = 42;
        record.definition = "A round fruit.".to_string();
        repo.save(&record).unwrap();

        let loaded = repo.get(&record.id).unwrap().unwrap();
        assert_eq!(loaded.review_count, 1);
        assert_eq!(loaded.definition, "A round fruit.");
        assert!(loaded.last_reviewed_at.is_some());
    }

    #[test]
    fn test_record_review_increments() {
        let repo = repo();
        let record = WordRecord::new("apple", "A fruit.");
        repo.save(&record).unwrap();

        repo.record_review(&record.id).unwrap();
        let reviewed = repo.record_review(&record.id).unwrap();
        assert_eq!(reviewed.review_count, 2);
    }

    #[test]
    fn test_record_review_unknown_id() {
        let err = repo().record_review("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_list_find_count_delete() {
        let repo = repo();
        let first = WordRecord::new("apple", "A fruit.");
        repo.save(&first).unwrap();
        let mut second = WordRecord::new("pear", "Another fruit.");
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        repo.save(&second).unwrap();

        assert_eq!(repo.count().unwrap(), 2);

        let listed = repo.list(10).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].word, "pear");
        assert_eq!(repo.list(1).unwrap().len(), 1);

        let found = repo.find_by_word("APPLE").unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(repo.find_by_word("plum").unwrap().is_none());

        assert!(repo.delete(&first.id).unwrap());
        assert!(!repo.delete(&first.id).unwrap());
        assert_eq!(repo.count().unwrap(), 1);
    }
}
