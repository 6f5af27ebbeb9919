//! Financial category and transaction database operations.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{constraint, text_col, Database, DbError, DbResult};
use crate::feed::ChangeKind;
use crate::models::{
    Entity, FinancialCategory, FinancialCategoryPatch, FinancialTransaction,
    FinancialTransactionPatch, NewFinancialCategory, NewFinancialTransaction,
};
use crate::repo::TableOps;

const CATEGORY_COLUMNS: &str = "id, name, kind, created_at";

const TRANSACTION_SELECT: &str = r#"
    SELECT t.id, t.kind, t.amount, t.description, t.category_id, c.name,
           t.patient_id, t.date, t.payment_method, t.created_at, t.updated_at
    FROM financial_transactions t
    LEFT JOIN financial_categories c ON c.id = t.category_id
"#;

const TRANSACTION_ORDER: &str = "ORDER BY t.date DESC, t.created_at DESC, t.id";

fn row_to_category(row: &Row<'_>) -> rusqlite::Result<FinancialCategory> {
    Ok(FinancialCategory {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: text_col(row, 2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<FinancialTransaction> {
    Ok(FinancialTransaction {
        id: row.get(0)?,
        kind: text_col(row, 1)?,
        amount: row.get(2)?,
        description: row.get(3)?,
        category_id: row.get(4)?,
        category_name: row.get(5)?,
        patient_id: row.get(6)?,
        date: row.get(7)?,
        payment_method: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Insert a transaction row on `conn`, which may be an open transaction.
pub(super) fn insert_transaction_row(
    conn: &Connection,
    transaction: &FinancialTransaction,
) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO financial_transactions (
            id, kind, amount, description, category_id, patient_id, date,
            payment_method, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            transaction.id,
            transaction.kind.as_str(),
            transaction.amount,
            transaction.description,
            transaction.category_id,
            transaction.patient_id,
            transaction.date,
            transaction.payment_method,
            transaction.created_at,
            transaction.updated_at,
        ],
    )
    .map_err(constraint(
        "amount must be positive and category/patient must exist",
    ))?;
    Ok(())
}

pub(super) fn get_transaction_on(
    conn: &Connection,
    id: &str,
) -> DbResult<Option<FinancialTransaction>> {
    conn.query_row(
        &format!("{TRANSACTION_SELECT} WHERE t.id = ?"),
        [id],
        row_to_transaction,
    )
    .optional()
    .map_err(Into::into)
}

impl Database {
    // =========================================================================
    // Categories
    // =========================================================================

    pub fn insert_financial_category(
        &self,
        new: NewFinancialCategory,
    ) -> DbResult<FinancialCategory> {
        let category = FinancialCategory::from_new(new);
        self.conn
            .execute(
                "INSERT INTO financial_categories (id, name, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    category.id,
                    category.name,
                    category.kind.as_str(),
                    category.created_at,
                ],
            )
            .map_err(constraint("category already exists"))?;
        self.publish(ChangeKind::Insert, &category)?;
        Ok(category)
    }

    pub fn get_financial_category(&self, id: &str) -> DbResult<Option<FinancialCategory>> {
        self.conn
            .query_row(
                &format!("SELECT {CATEGORY_COLUMNS} FROM financial_categories WHERE id = ?"),
                [id],
                row_to_category,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_financial_categories(&self) -> DbResult<Vec<FinancialCategory>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM financial_categories ORDER BY name, id"
        ))?;
        let rows = stmt.query_map([], row_to_category)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Rename a category. Transactions filed under it are re-published so
    /// subscribers pick up the new `category_name`.
    pub fn update_financial_category(
        &self,
        id: &str,
        patch: FinancialCategoryPatch,
    ) -> DbResult<FinancialCategory> {
        let mut category = self
            .get_financial_category(id)?
            .ok_or_else(|| DbError::NotFound(format!("financial category {}", id)))?;
        if let Some(name) = patch.name {
            category.name = name;
        }
        self.conn
            .execute(
                "UPDATE financial_categories SET name = ?2 WHERE id = ?1",
                params![category.id, category.name],
            )
            .map_err(constraint("category already exists"))?;
        self.publish(ChangeKind::Update, &category)?;

        let filed = {
            let mut stmt = self.conn.prepare(&format!(
                "{TRANSACTION_SELECT} WHERE t.category_id = ?1 {TRANSACTION_ORDER}"
            ))?;
            let rows = stmt.query_map([&category.id], row_to_transaction)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        for transaction in &filed {
            self.publish(ChangeKind::Update, transaction)?;
        }
        Ok(category)
    }

    /// Delete a category. The foreign key rejects it while a transaction
    /// still references it.
    pub fn delete_financial_category(&self, id: &str) -> DbResult<()> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM financial_categories WHERE id = ?", [id])
            .map_err(constraint("category in use"))?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("financial category {}", id)));
        }
        self.publish_delete(FinancialCategory::TABLE, id);
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub fn insert_financial_transaction(
        &self,
        new: NewFinancialTransaction,
    ) -> DbResult<FinancialTransaction> {
        let transaction = FinancialTransaction::from_new(new);
        insert_transaction_row(&self.conn, &transaction)?;
        let transaction = self.require_transaction(&transaction.id)?;
        self.publish(ChangeKind::Insert, &transaction)?;
        Ok(transaction)
    }

    pub fn get_financial_transaction(&self, id: &str) -> DbResult<Option<FinancialTransaction>> {
        get_transaction_on(&self.conn, id)
    }

    /// List transactions, newest first, with category names joined.
    pub fn list_financial_transactions(&self) -> DbResult<Vec<FinancialTransaction>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TRANSACTION_SELECT} {TRANSACTION_ORDER}"))?;
        let rows = stmt.query_map([], row_to_transaction)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Transactions dated within `[start, end]`, both bounds included.
    pub fn list_financial_transactions_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DbResult<Vec<FinancialTransaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TRANSACTION_SELECT} WHERE t.date BETWEEN ?1 AND ?2 {TRANSACTION_ORDER}"
        ))?;
        let rows = stmt.query_map(params![start, end], row_to_transaction)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn update_financial_transaction(
        &self,
        id: &str,
        patch: FinancialTransactionPatch,
    ) -> DbResult<FinancialTransaction> {
        let mut transaction = self.require_transaction(id)?;
        transaction.apply(patch);
        self.conn
            .execute(
                r#"
                UPDATE financial_transactions SET
                    kind = ?2, amount = ?3, description = ?4, category_id = ?5,
                    patient_id = ?6, date = ?7, payment_method = ?8, updated_at = ?9
                WHERE id = ?1
                "#,
                params![
                    transaction.id,
                    transaction.kind.as_str(),
                    transaction.amount,
                    transaction.description,
                    transaction.category_id,
                    transaction.patient_id,
                    transaction.date,
                    transaction.payment_method,
                    transaction.updated_at,
                ],
            )
            .map_err(constraint(
                "amount must be positive and category/patient must exist",
            ))?;
        // Re-read to pick up a changed category name.
        let transaction = self.require_transaction(id)?;
        self.publish(ChangeKind::Update, &transaction)?;
        Ok(transaction)
    }

    pub fn delete_financial_transaction(&self, id: &str) -> DbResult<()> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM financial_transactions WHERE id = ?", [id])?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("financial transaction {}", id)));
        }
        self.publish_delete(FinancialTransaction::TABLE, id);
        Ok(())
    }

    fn require_transaction(&self, id: &str) -> DbResult<FinancialTransaction> {
        self.get_financial_transaction(id)?
            .ok_or_else(|| DbError::NotFound(format!("financial transaction {}", id)))
    }
}

impl TableOps for FinancialCategory {
    type New = NewFinancialCategory;
    type Patch = FinancialCategoryPatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_financial_categories()
    }

    fn insert(db: &Database, new: NewFinancialCategory) -> DbResult<Self> {
        db.insert_financial_category(new)
    }

    fn update(db: &Database, id: &str, patch: FinancialCategoryPatch) -> DbResult<Self> {
        db.update_financial_category(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_financial_category(id)
    }
}

impl TableOps for FinancialTransaction {
    type New = NewFinancialTransaction;
    type Patch = FinancialTransactionPatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_financial_transactions()
    }

    fn insert(db: &Database, new: NewFinancialTransaction) -> DbResult<Self> {
        db.insert_financial_transaction(new)
    }

    fn update(db: &Database, id: &str, patch: FinancialTransactionPatch) -> DbResult<Self> {
        db.update_financial_transaction(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_financial_transaction(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Delivery;
    use crate::models::{Table, TransactionKind};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, day).unwrap()
    }

    fn new_transaction(category_id: Option<String>, day: u32, amount: f64) -> NewFinancialTransaction {
        NewFinancialTransaction {
            kind: TransactionKind::Income,
            amount,
            description: "Session".into(),
            category_id,
            patient_id: None,
            date: date(day),
            payment_method: Some("pix".into()),
        }
    }

    fn category(db: &Database, name: &str) -> FinancialCategory {
        db.insert_financial_category(NewFinancialCategory {
            name: name.into(),
            kind: TransactionKind::Income,
        })
        .unwrap()
    }

    #[test]
    fn test_category_in_use_cannot_be_deleted() {
        let db = Database::open_in_memory().unwrap();
        let used = category(&db, "Sessions");
        let unused = category(&db, "Workshops");
        db.insert_financial_transaction(new_transaction(Some(used.id.clone()), 1, 150.0))
            .unwrap();

        match db.delete_financial_category(&used.id) {
            Err(DbError::Constraint(msg)) => assert_eq!(msg, "category in use"),
            other => panic!("expected constraint error, got {:?}", other),
        }
        db.delete_financial_category(&unused.id).unwrap();
        assert_eq!(db.list_financial_categories().unwrap(), vec![used]);
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let db = Database::open_in_memory().unwrap();
        category(&db, "Sessions");
        assert!(matches!(
            db.insert_financial_category(NewFinancialCategory {
                name: "Sessions".into(),
                kind: TransactionKind::Income,
            }),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_transaction_joins_category_name() {
        let db = Database::open_in_memory().unwrap();
        let sessions = category(&db, "Sessions");
        let tx = db
            .insert_financial_transaction(new_transaction(Some(sessions.id), 3, 200.0))
            .unwrap();
        assert_eq!(tx.category_name.as_deref(), Some("Sessions"));
    }

    #[tokio::test]
    async fn test_rename_republishes_filed_transactions() {
        let db = Database::open_in_memory().unwrap();
        let sessions = category(&db, "Sessions");
        let filed = db
            .insert_financial_transaction(new_transaction(Some(sessions.id.clone()), 3, 200.0))
            .unwrap();
        db.insert_financial_transaction(new_transaction(None, 4, 50.0))
            .unwrap();
        let mut sub = db.feed().subscribe(Table::FinancialTransactions, None);

        db.update_financial_category(
            &sessions.id,
            FinancialCategoryPatch {
                name: Some("Private sessions".into()),
            },
        )
        .unwrap();

        match sub.recv().await {
            Some(Delivery::Event(event)) => {
                assert_eq!(event.kind, ChangeKind::Update);
                assert_eq!(event.id, filed.id);
                assert_eq!(event.seq, 3);
                let row: FinancialTransaction =
                    serde_json::from_value(event.record.unwrap()).unwrap();
                assert_eq!(row.category_name.as_deref(), Some("Private sessions"));
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
        assert_eq!(db.feed().sequence(Table::FinancialTransactions), 3);
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.insert_financial_transaction(new_transaction(None, 3, 0.0)),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_between_is_inclusive() {
        let db = Database::open_in_memory().unwrap();
        for day in [9, 10, 15, 20, 21] {
            db.insert_financial_transaction(new_transaction(None, day, 10.0))
                .unwrap();
        }

        let in_range = db
            .list_financial_transactions_between(date(10), date(20))
            .unwrap();
        let days: Vec<_> = in_range.iter().map(|t| t.date).collect();
        assert_eq!(days, vec![date(20), date(15), date(10)]);
    }
}
