//! Patient database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{constraint, text_col, Database, DbError, DbResult};
use crate::feed::ChangeKind;
use crate::models::{Entity, NewPatient, Patient, PatientPatch};
use crate::repo::TableOps;

const PATIENT_COLUMNS: &str = r#"
    id, name, email, phone, cpf, birth_date, address, emergency_contact,
    emergency_phone, notes, status, is_active, created_at, updated_at
"#;

fn row_to_patient(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        cpf: row.get(4)?,
        birth_date: row.get(5)?,
        address: row.get(6)?,
        emergency_contact: row.get(7)?,
        emergency_phone: row.get(8)?,
        notes: row.get(9)?,
        status: text_col(row, 10)?,
        is_active: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl Database {
    /// Insert a new patient.
    pub fn insert_patient(&self, new: NewPatient) -> DbResult<Patient> {
        let patient = Patient::from_new(new);
        self.conn
            .execute(
                r#"
                INSERT INTO patients (
                    id, name, email, phone, cpf, birth_date, address,
                    emergency_contact, emergency_phone, notes, status,
                    is_active, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
                params![
                    patient.id,
                    patient.name,
                    patient.email,
                    patient.phone,
                    patient.cpf,
                    patient.birth_date,
                    patient.address,
                    patient.emergency_contact,
                    patient.emergency_phone,
                    patient.notes,
                    patient.status.as_str(),
                    patient.is_active,
                    patient.created_at,
                    patient.updated_at,
                ],
            )
            .map_err(constraint("invalid patient"))?;
        self.publish(ChangeKind::Insert, &patient)?;
        Ok(patient)
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, id: &str) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?"),
                [id],
                row_to_patient,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all patients, including soft-deleted ones.
    pub fn list_patients(&self) -> DbResult<Vec<Patient>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PATIENT_COLUMNS} FROM patients ORDER BY name, id"))?;
        let rows = stmt.query_map([], row_to_patient)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Search active patients by name (prefix match).
    pub fn search_patients(&self, query: &str, limit: usize) -> DbResult<Vec<Patient>> {
        let pattern = format!("{}%", query);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patients WHERE is_active = 1 AND name LIKE ? ORDER BY name LIMIT ?"
        ))?;
        let rows = stmt.query_map(params![pattern, limit as i64], row_to_patient)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Apply a partial update.
    pub fn update_patient(&self, id: &str, patch: PatientPatch) -> DbResult<Patient> {
        let mut patient = self
            .get_patient(id)?
            .ok_or_else(|| DbError::NotFound(format!("patient {}", id)))?;
        patient.apply(patch);
        self.write_patient(&patient)?;
        self.publish(ChangeKind::Update, &patient)?;
        Ok(patient)
    }

    /// Soft delete.
    pub fn deactivate_patient(&self, id: &str) -> DbResult<Patient> {
        self.update_patient(
            id,
            PatientPatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
    }

    /// Delete a patient. Fails while other rows reference them.
    pub fn delete_patient(&self, id: &str) -> DbResult<()> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM patients WHERE id = ?", [id])
            .map_err(constraint("patient has related records"))?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("patient {}", id)));
        }
        self.publish_delete(Patient::TABLE, id);
        Ok(())
    }

    fn write_patient(&self, patient: &Patient) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                UPDATE patients SET
                    name = ?2, email = ?3, phone = ?4, cpf = ?5, birth_date = ?6,
                    address = ?7, emergency_contact = ?8, emergency_phone = ?9,
                    notes = ?10, status = ?11, is_active = ?12, updated_at = ?13
                WHERE id = ?1
                "#,
                params![
                    patient.id,
                    patient.name,
                    patient.email,
                    patient.phone,
                    patient.cpf,
                    patient.birth_date,
                    patient.address,
                    patient.emergency_contact,
                    patient.emergency_phone,
                    patient.notes,
                    patient.status.as_str(),
                    patient.is_active,
                    patient.updated_at,
                ],
            )
            .map_err(constraint("invalid patient"))?;
        Ok(())
    }
}

impl TableOps for Patient {
    type New = NewPatient;
    type Patch = PatientPatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_patients()
    }

    fn insert(db: &Database, new: NewPatient) -> DbResult<Self> {
        db.insert_patient(new)
    }

    fn update(db: &Database, id: &str, patch: PatientPatch) -> DbResult<Self> {
        db.update_patient(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_patient(id)
    }

    fn deactivate(db: &Database, id: &str) -> DbResult<Self> {
        db.deactivate_patient(id)
    }
}
