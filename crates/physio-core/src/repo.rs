//! Repository seam between entity stores and the database.

use std::marker::PhantomData;

use crate::db::{lock, Database, DbError, DbResult, SharedDatabase};
use crate::models::Entity;

/// Rows of a table together with the table sequence they reflect.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<E> {
    pub rows: Vec<E>,
    pub seq: u64,
}

/// One row and the table sequence of the change that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<E> {
    pub row: E,
    pub seq: u64,
}

/// Table-style CRUD for one entity.
///
/// Calls are blocking; [`EntityStore`](crate::store::EntityStore) runs them
/// off the async executor.
pub trait Repository: Send + Sync + 'static {
    type Entity: Entity;
    type New: Send + 'static;
    type Patch: Send + 'static;

    fn list(&self) -> DbResult<Snapshot<Self::Entity>>;

    fn insert(&self, new: Self::New) -> DbResult<Versioned<Self::Entity>>;

    fn update(&self, id: &str, patch: Self::Patch) -> DbResult<Versioned<Self::Entity>>;

    /// Hard delete. Returns the sequence of the delete.
    fn delete(&self, id: &str) -> DbResult<u64>;

    /// Soft delete (`is_active = false`).
    fn deactivate(&self, id: &str) -> DbResult<Versioned<Self::Entity>> {
        let _ = id;
        Err(DbError::Unsupported(format!(
            "soft delete on {}",
            Self::Entity::TABLE
        )))
    }
}

/// Per-table operations on a locked [`Database`].
pub trait TableOps: Entity {
    type New: Send + 'static;
    type Patch: Send + 'static;

    fn list(db: &Database) -> DbResult<Vec<Self>>;

    fn insert(db: &Database, new: Self::New) -> DbResult<Self>;

    fn update(db: &Database, id: &str, patch: Self::Patch) -> DbResult<Self>;

    fn delete(db: &Database, id: &str) -> DbResult<()>;

    fn deactivate(db: &Database, id: &str) -> DbResult<Self> {
        let _ = (db, id);
        Err(DbError::Unsupported(format!("soft delete on {}", Self::TABLE)))
    }
}

/// [`Repository`] over a shared SQLite database.
pub struct SqliteRepository<T> {
    db: SharedDatabase,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SqliteRepository<T> {
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            db,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for SqliteRepository<T> {
    fn clone(&self) -> Self {
        Self::new(SharedDatabase::clone(&self.db))
    }
}

impl<T: TableOps> Repository for SqliteRepository<T> {
    type Entity = T;
    type New = T::New;
    type Patch = T::Patch;

    fn list(&self) -> DbResult<Snapshot<T>> {
        let db = lock(&self.db)?;
        let rows = T::list(&db)?;
        Ok(Snapshot {
            rows,
            seq: db.feed().sequence(T::TABLE),
        })
    }

    fn insert(&self, new: T::New) -> DbResult<Versioned<T>> {
        let db = lock(&self.db)?;
        let row = T::insert(&db, new)?;
        Ok(Versioned {
            row,
            seq: db.feed().sequence(T::TABLE),
        })
    }

    fn update(&self, id: &str, patch: T::Patch) -> DbResult<Versioned<T>> {
        let db = lock(&self.db)?;
        let row = T::update(&db, id, patch)?;
        Ok(Versioned {
            row,
            seq: db.feed().sequence(T::TABLE),
        })
    }

    fn delete(&self, id: &str) -> DbResult<u64> {
        let db = lock(&self.db)?;
        T::delete(&db, id)?;
        Ok(db.feed().sequence(T::TABLE))
    }

    fn deactivate(&self, id: &str) -> DbResult<Versioned<T>> {
        let db = lock(&self.db)?;
        let row = T::deactivate(&db, id)?;
        Ok(Versioned {
            row,
            seq: db.feed().sequence(T::TABLE),
        })
    }
}
