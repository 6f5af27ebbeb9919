//! Package, proposal and patient package database operations.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::financial::{get_transaction_on, insert_transaction_row};
use super::{constraint, json_col, text_col, Database, DbError, DbResult};
use crate::feed::ChangeKind;
use crate::models::{
    new_id, now_rfc3339, Entity, FinancialTransaction, NewFinancialTransaction, NewPackage,
    NewPackageProposal, Package, PackagePatch, PackageProposal, PackageProposalPatch,
    PatientPackage, ProposalApproval, ProposalStatus, TransactionKind,
};
use crate::repo::TableOps;

const PACKAGE_COLUMNS: &str = r#"
    id, name, description, price, services, sessions_included, validity_days,
    is_active, created_at, updated_at
"#;

const PROPOSAL_COLUMNS: &str = r#"
    id, patient_id, package_id, price, status, notes, decided_at, created_at, updated_at
"#;

const PATIENT_PACKAGE_COLUMNS: &str = r#"
    id, patient_id, package_id, proposal_id, sessions_remaining, purchased_at,
    expires_at, created_at
"#;

fn row_to_package(row: &Row<'_>) -> rusqlite::Result<Package> {
    Ok(Package {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        services: json_col(row, 4)?,
        sessions_included: row.get(5)?,
        validity_days: row.get(6)?,
        is_active: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_proposal(row: &Row<'_>) -> rusqlite::Result<PackageProposal> {
    Ok(PackageProposal {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        package_id: row.get(2)?,
        price: row.get(3)?,
        status: text_col(row, 4)?,
        notes: row.get(5)?,
        decided_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_patient_package(row: &Row<'_>) -> rusqlite::Result<PatientPackage> {
    Ok(PatientPackage {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        package_id: row.get(2)?,
        proposal_id: row.get(3)?,
        sessions_remaining: row.get(4)?,
        purchased_at: row.get(5)?,
        expires_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl Database {
    // =========================================================================
    // Packages
    // =========================================================================

    pub fn insert_package(&self, new: NewPackage) -> DbResult<Package> {
        let package = Package::from_new(new);
        self.conn
            .execute(
                r#"
                INSERT INTO packages (
                    id, name, description, price, services, sessions_included,
                    validity_days, is_active, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    package.id,
                    package.name,
                    package.description,
                    package.price,
                    serde_json::to_string(&package.services)?,
                    package.sessions_included,
                    package.validity_days,
                    package.is_active,
                    package.created_at,
                    package.updated_at,
                ],
            )
            .map_err(constraint("price must not be negative and validity must be positive"))?;
        self.publish(ChangeKind::Insert, &package)?;
        Ok(package)
    }

    pub fn get_package(&self, id: &str) -> DbResult<Option<Package>> {
        self.conn
            .query_row(
                &format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = ?"),
                [id],
                row_to_package,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_packages(&self) -> DbResult<Vec<Package>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages ORDER BY name, id"
        ))?;
        let rows = stmt.query_map([], row_to_package)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn update_package(&self, id: &str, patch: PackagePatch) -> DbResult<Package> {
        let mut package = self.require_package(id)?;
        package.apply(patch);
        self.conn
            .execute(
                r#"
                UPDATE packages SET
                    name = ?2, description = ?3, price = ?4, services = ?5,
                    sessions_included = ?6, validity_days = ?7, is_active = ?8,
                    updated_at = ?9
                WHERE id = ?1
                "#,
                params![
                    package.id,
                    package.name,
                    package.description,
                    package.price,
                    serde_json::to_string(&package.services)?,
                    package.sessions_included,
                    package.validity_days,
                    package.is_active,
                    package.updated_at,
                ],
            )
            .map_err(constraint("price must not be negative and validity must be positive"))?;
        self.publish(ChangeKind::Update, &package)?;
        Ok(package)
    }

    /// Soft delete. Sold packages keep referencing the row.
    pub fn deactivate_package(&self, id: &str) -> DbResult<Package> {
        self.update_package(
            id,
            PackagePatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
    }

    pub fn delete_package(&self, id: &str) -> DbResult<()> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM packages WHERE id = ?", [id])
            .map_err(constraint("package has proposals or sales"))?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("package {}", id)));
        }
        self.publish_delete(Package::TABLE, id);
        Ok(())
    }

    fn require_package(&self, id: &str) -> DbResult<Package> {
        self.get_package(id)?
            .ok_or_else(|| DbError::NotFound(format!("package {}", id)))
    }

    // =========================================================================
    // Proposals
    // =========================================================================

    /// Offer a package to a patient. Without an explicit price the package
    /// list price is used.
    pub fn insert_package_proposal(&self, new: NewPackageProposal) -> DbResult<PackageProposal> {
        let package = self.require_package(&new.package_id)?;
        if !package.is_active {
            return Err(DbError::Invalid(format!(
                "package {} is no longer offered",
                package.id
            )));
        }
        let proposal = PackageProposal::new(new, package.price);
        self.conn
            .execute(
                r#"
                INSERT INTO package_proposals (
                    id, patient_id, package_id, price, status, notes, decided_at,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    proposal.id,
                    proposal.patient_id,
                    proposal.package_id,
                    proposal.price,
                    proposal.status.as_str(),
                    proposal.notes,
                    proposal.decided_at,
                    proposal.created_at,
                    proposal.updated_at,
                ],
            )
            .map_err(constraint("unknown patient or negative price"))?;
        self.publish(ChangeKind::Insert, &proposal)?;
        Ok(proposal)
    }

    pub fn get_package_proposal(&self, id: &str) -> DbResult<Option<PackageProposal>> {
        self.conn
            .query_row(
                &format!("SELECT {PROPOSAL_COLUMNS} FROM package_proposals WHERE id = ?"),
                [id],
                row_to_proposal,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_package_proposals(&self) -> DbResult<Vec<PackageProposal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM package_proposals ORDER BY created_at DESC, id"
        ))?;
        let rows = stmt.query_map([], row_to_proposal)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Edit a pending proposal's price or notes.
    pub fn update_package_proposal(
        &self,
        id: &str,
        patch: PackageProposalPatch,
    ) -> DbResult<PackageProposal> {
        let mut proposal = self.require_proposal(id)?;
        proposal.apply(patch);
        let rows_affected = self
            .conn
            .execute(
                r#"
                UPDATE package_proposals SET price = ?2, notes = ?3, updated_at = ?4
                WHERE id = ?1 AND status = 'pending'
                "#,
                params![proposal.id, proposal.price, proposal.notes, proposal.updated_at],
            )
            .map_err(constraint("price must not be negative"))?;
        if rows_affected == 0 {
            return Err(DbError::Constraint("proposal already decided".into()));
        }
        self.publish(ChangeKind::Update, &proposal)?;
        Ok(proposal)
    }

    /// Reject a pending proposal.
    pub fn reject_package_proposal(&self, id: &str) -> DbResult<PackageProposal> {
        let mut proposal = self.require_proposal(id)?;
        let now = now_rfc3339();
        let rows_affected = self.conn.execute(
            r#"
            UPDATE package_proposals SET status = 'rejected', decided_at = ?2, updated_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![id, now],
        )?;
        if rows_affected == 0 {
            return Err(DbError::Constraint("proposal already decided".into()));
        }
        proposal.status = ProposalStatus::Rejected;
        proposal.decided_at = Some(now.clone());
        proposal.updated_at = now;
        self.publish(ChangeKind::Update, &proposal)?;
        Ok(proposal)
    }

    /// Approve a pending proposal.
    ///
    /// In one transaction: flips the proposal to approved, creates the
    /// patient package and records the income. A zero-price proposal records
    /// no income. Approving anything but a pending proposal fails and writes
    /// nothing.
    pub fn approve_package_proposal(
        &self,
        id: &str,
        purchased_at: NaiveDate,
    ) -> DbResult<ProposalApproval> {
        let tx = self.conn.unchecked_transaction()?;
        let now = now_rfc3339();

        let mut proposal = tx
            .query_row(
                &format!("SELECT {PROPOSAL_COLUMNS} FROM package_proposals WHERE id = ?"),
                [id],
                row_to_proposal,
            )
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("package proposal {}", id)))?;

        let rows_affected = tx.execute(
            r#"
            UPDATE package_proposals SET status = 'approved', decided_at = ?2, updated_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![id, now],
        )?;
        if rows_affected == 0 {
            return Err(DbError::Constraint("proposal already decided".into()));
        }
        proposal.status = ProposalStatus::Approved;
        proposal.decided_at = Some(now.clone());
        proposal.updated_at = now.clone();

        let package = tx
            .query_row(
                &format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = ?"),
                [&proposal.package_id],
                row_to_package,
            )
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("package {}", proposal.package_id)))?;

        let patient_package = PatientPackage {
            id: new_id(),
            patient_id: proposal.patient_id.clone(),
            package_id: package.id.clone(),
            proposal_id: proposal.id.clone(),
            sessions_remaining: package.sessions_included,
            purchased_at,
            expires_at: package.expires_on(purchased_at),
            created_at: now,
        };
        tx.execute(
            &format!(
                "INSERT INTO patient_packages ({PATIENT_PACKAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                patient_package.id,
                patient_package.patient_id,
                patient_package.package_id,
                patient_package.proposal_id,
                patient_package.sessions_remaining,
                patient_package.purchased_at,
                patient_package.expires_at,
                patient_package.created_at,
            ],
        )
        .map_err(constraint("proposal already has a patient package"))?;

        let transaction = if proposal.price > 0.0 {
            let income = FinancialTransaction::from_new(NewFinancialTransaction {
                kind: TransactionKind::Income,
                amount: proposal.price,
                description: format!("Package: {}", package.name),
                category_id: None,
                patient_id: Some(proposal.patient_id.clone()),
                date: purchased_at,
                payment_method: None,
            });
            insert_transaction_row(&tx, &income)?;
            let stored = get_transaction_on(&tx, &income.id)?.ok_or_else(|| {
                DbError::NotFound(format!("financial transaction {}", income.id))
            })?;
            Some(stored)
        } else {
            None
        };

        tx.commit()?;

        self.publish(ChangeKind::Update, &proposal)?;
        self.publish(ChangeKind::Insert, &patient_package)?;
        if let Some(transaction) = &transaction {
            self.publish(ChangeKind::Insert, transaction)?;
        }
        Ok(ProposalApproval {
            proposal,
            patient_package,
            transaction,
        })
    }

    pub fn delete_package_proposal(&self, id: &str) -> DbResult<()> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM package_proposals WHERE id = ?", [id])
            .map_err(constraint("approved proposal has a patient package"))?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("package proposal {}", id)));
        }
        self.publish_delete(PackageProposal::TABLE, id);
        Ok(())
    }

    fn require_proposal(&self, id: &str) -> DbResult<PackageProposal> {
        self.get_package_proposal(id)?
            .ok_or_else(|| DbError::NotFound(format!("package proposal {}", id)))
    }

    // =========================================================================
    // Patient packages
    // =========================================================================

    pub fn get_patient_package(&self, id: &str) -> DbResult<Option<PatientPackage>> {
        self.conn
            .query_row(
                &format!("SELECT {PATIENT_PACKAGE_COLUMNS} FROM patient_packages WHERE id = ?"),
                [id],
                row_to_patient_package,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_patient_packages(&self, patient_id: &str) -> DbResult<Vec<PatientPackage>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PATIENT_PACKAGE_COLUMNS} FROM patient_packages WHERE patient_id = ? \
             ORDER BY purchased_at DESC, id"
        ))?;
        let rows = stmt.query_map([patient_id], row_to_patient_package)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Use one session of a patient package on `today`.
    ///
    /// Fails when the package is expired or has no sessions left; the check
    /// and the decrement are one statement.
    pub fn consume_package_session(&self, id: &str, today: NaiveDate) -> DbResult<PatientPackage> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE patient_packages SET sessions_remaining = sessions_remaining - 1
            WHERE id = ?1 AND sessions_remaining > 0 AND expires_at >= ?2
            "#,
            params![id, today],
        )?;
        let package = self
            .get_patient_package(id)?
            .ok_or_else(|| DbError::NotFound(format!("patient package {}", id)))?;
        if rows_affected == 0 {
            let reason = if package.is_expired(today) {
                "patient package expired"
            } else {
                "no sessions remaining"
            };
            return Err(DbError::Constraint(reason.into()));
        }
        self.publish(ChangeKind::Update, &package)?;
        Ok(package)
    }
}

impl TableOps for Package {
    type New = NewPackage;
    type Patch = PackagePatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_packages()
    }

    fn insert(db: &Database, new: NewPackage) -> DbResult<Self> {
        db.insert_package(new)
    }

    fn update(db: &Database, id: &str, patch: PackagePatch) -> DbResult<Self> {
        db.update_package(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_package(id)
    }

    fn deactivate(db: &Database, id: &str) -> DbResult<Self> {
        db.deactivate_package(id)
    }
}

impl TableOps for PackageProposal {
    type New = NewPackageProposal;
    type Patch = PackageProposalPatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_package_proposals()
    }

    fn insert(db: &Database, new: NewPackageProposal) -> DbResult<Self> {
        db.insert_package_proposal(new)
    }

    fn update(db: &Database, id: &str, patch: PackageProposalPatch) -> DbResult<Self> {
        db.update_package_proposal(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_package_proposal(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPatient;

    struct Fixture {
        db: Database,
        patient_id: String,
        package_id: String,
    }

    fn setup() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let patient = db
            .insert_patient(NewPatient {
                name: "Beatriz Souza".into(),
                ..Default::default()
            })
            .unwrap();
        let package = db
            .insert_package(NewPackage {
                name: "Pilates 8".into(),
                price: 640.0,
                services: vec!["pilates".into(), "assessment".into()],
                sessions_included: 8,
                validity_days: 60,
                ..Default::default()
            })
            .unwrap();
        Fixture {
            db,
            patient_id: patient.id,
            package_id: package.id,
        }
    }

    fn propose(f: &Fixture, price: Option<f64>) -> PackageProposal {
        f.db.insert_package_proposal(NewPackageProposal {
            patient_id: f.patient_id.clone(),
            package_id: f.package_id.clone(),
            price,
            notes: None,
        })
        .unwrap()
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_services_round_trip_json() {
        let f = setup();
        let package = f.db.get_package(&f.package_id).unwrap().unwrap();
        assert_eq!(package.services, vec!["pilates", "assessment"]);
    }

    #[test]
    fn test_approve_creates_package_and_income() {
        let f = setup();
        let proposal = propose(&f, Some(600.0));
        let bought = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();

        let approval = f.db.approve_package_proposal(&proposal.id, bought).unwrap();
        assert_eq!(approval.proposal.status, ProposalStatus::Approved);
        assert_eq!(approval.patient_package.sessions_remaining, 8);
        assert_eq!(
            approval.patient_package.expires_at,
            NaiveDate::from_ymd_opt(2026, 6, 30).unwrap()
        );
        let income = approval.transaction.unwrap();
        assert_eq!(income.amount, 600.0);
        assert_eq!(income.kind, TransactionKind::Income);
        assert_eq!(
            f.db.get_package_proposal(&proposal.id).unwrap().unwrap(),
            approval.proposal
        );
    }

    #[test]
    fn test_approve_twice_fails_and_writes_once() {
        let f = setup();
        let proposal = propose(&f, None);
        let bought = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();

        f.db.approve_package_proposal(&proposal.id, bought).unwrap();
        let second = f.db.approve_package_proposal(&proposal.id, bought);
        assert!(matches!(second, Err(DbError::Constraint(_))));

        assert_eq!(count(&f.db, "patient_packages"), 1);
        assert_eq!(count(&f.db, "financial_transactions"), 1);
    }

    #[test]
    fn test_rejected_proposal_cannot_be_approved() {
        let f = setup();
        let proposal = propose(&f, None);
        f.db.reject_package_proposal(&proposal.id).unwrap();

        let result = f
            .db
            .approve_package_proposal(&proposal.id, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
        assert!(matches!(result, Err(DbError::Constraint(_))));
        assert_eq!(count(&f.db, "patient_packages"), 0);
    }

    #[test]
    fn test_complimentary_package_approves_without_income() {
        let f = setup();
        let proposal = propose(&f, Some(0.0));

        let approval = f
            .db
            .approve_package_proposal(&proposal.id, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap())
            .unwrap();
        assert_eq!(approval.proposal.status, ProposalStatus::Approved);
        assert!(approval.transaction.is_none());
        assert_eq!(approval.patient_package.sessions_remaining, 8);
        assert_eq!(count(&f.db, "patient_packages"), 1);
        assert_eq!(count(&f.db, "financial_transactions"), 0);
    }

    #[test]
    fn test_consume_sessions_until_empty_or_expired() {
        let f = setup();
        let proposal = propose(&f, None);
        let bought = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let approval = f.db.approve_package_proposal(&proposal.id, bought).unwrap();
        let id = approval.patient_package.id;

        let used = f.db.consume_package_session(&id, bought).unwrap();
        assert_eq!(used.sessions_remaining, 7);

        let late = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        match f.db.consume_package_session(&id, late) {
            Err(DbError::Constraint(msg)) => assert_eq!(msg, "patient package expired"),
            other => panic!("expected expiry, got {:?}", other),
        }
    }

    #[test]
    fn test_inactive_package_cannot_be_proposed() {
        let f = setup();
        f.db.deactivate_package(&f.package_id).unwrap();
        let result = f.db.insert_package_proposal(NewPackageProposal {
            patient_id: f.patient_id.clone(),
            package_id: f.package_id.clone(),
            price: None,
            notes: None,
        });
        assert!(matches!(result, Err(DbError::Invalid(_))));
    }
}
