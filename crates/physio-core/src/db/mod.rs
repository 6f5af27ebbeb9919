//! Database layer for the clinic backend.
//!
//! One SQLite connection holds every table. Invariants that span rows (one
//! active medical record per patient, evolutions only on active records,
//! categories in use cannot be deleted, proposals approve once) are enforced
//! by the schema or inside a single transaction, never by a read followed by
//! a separate write.

mod schema;
mod access;
mod appointments;
mod exercises;
mod financial;
mod packages;
mod patients;
mod plans;
mod pre_evaluations;
mod records;
mod stats;

pub use schema::*;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, Row};
use thiserror::Error;

use crate::feed::{ChangeFeed, ChangeKind};
use crate::models::{Entity, Table};

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Database lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Database handle shared between tasks.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Lock a shared database, mapping poisoning to [`DbError::Poisoned`].
pub fn lock(db: &SharedDatabase) -> DbResult<MutexGuard<'_, Database>> {
    db.lock().map_err(|_| DbError::Poisoned)
}

/// Map a constraint failure to [`DbError::Constraint`].
///
/// Trigger messages are kept as-is; generic UNIQUE/FOREIGN KEY/CHECK
/// messages are replaced by `context`.
pub(crate) fn constraint(context: &str) -> impl FnOnce(rusqlite::Error) -> DbError + '_ {
    move |err| match &err {
        rusqlite::Error::SqliteFailure(e, msg)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let msg = msg.as_deref().unwrap_or_default();
            if msg.is_empty()
                || msg.starts_with("UNIQUE")
                || msg.starts_with("FOREIGN KEY")
                || msg.starts_with("CHECK")
                || msg.starts_with("NOT NULL")
            {
                DbError::Constraint(context.to_string())
            } else {
                DbError::Constraint(msg.to_string())
            }
        }
        _ => DbError::Sqlite(err),
    }
}

/// Read a text column into an enum.
pub(crate) fn text_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Read a JSON text column.
pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
    feed: ChangeFeed,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::open_with_feed(path, ChangeFeed::default())
    }

    /// Open database at path, publishing changes on an existing feed.
    pub fn open_with_feed<P: AsRef<Path>>(path: P, feed: ChangeFeed) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn, feed };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            feed: ChangeFeed::default(),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Wrap in a shared handle.
    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Feed this database publishes on.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Publish an insert or update of `row`.
    pub(crate) fn publish<E: Entity>(&self, kind: ChangeKind, row: &E) -> DbResult<u64> {
        let record = serde_json::to_value(row)?;
        Ok(self.feed.publish(E::TABLE, kind, row.id(), Some(record)))
    }

    /// Publish a delete.
    pub(crate) fn publish_delete(&self, table: Table, id: &str) -> u64 {
        self.feed.publish(table, ChangeKind::Delete, id, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_open_file_twice_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clinic.db");
        {
            Database::open(&path).unwrap();
        }
        let db = Database::open(&path);
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "patients",
            "appointments",
            "medical_records",
            "evolutions",
            "exercises",
            "treatment_plans",
            "plan_exercises",
            "packages",
            "package_proposals",
            "patient_packages",
            "financial_categories",
            "financial_transactions",
            "pre_evaluations",
            "patient_access",
            "staff_users",
            "sessions",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }
}
