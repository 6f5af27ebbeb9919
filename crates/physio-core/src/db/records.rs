//! Medical record and evolution database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{constraint, text_col, Database, DbError, DbResult};
use crate::feed::ChangeKind;
use crate::models::{
    Entity, Evolution, EvolutionPatch, MedicalRecord, MedicalRecordPatch, NewEvolution,
    NewMedicalRecord,
};
use crate::repo::TableOps;

const RECORD_COLUMNS: &str = r#"
    id, patient_id, status, chief_complaint, diagnosis, history,
    treatment_goals, discharge_notes, discharged_at, created_at, updated_at
"#;

const EVOLUTION_COLUMNS: &str = r#"
    id, patient_id, medical_record_id, session_date, notes, progress_score,
    pain_level, created_at, updated_at
"#;

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MedicalRecord> {
    Ok(MedicalRecord {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        status: text_col(row, 2)?,
        chief_complaint: row.get(3)?,
        diagnosis: row.get(4)?,
        history: row.get(5)?,
        treatment_goals: row.get(6)?,
        discharge_notes: row.get(7)?,
        discharged_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_evolution(row: &Row<'_>) -> rusqlite::Result<Evolution> {
    Ok(Evolution {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        medical_record_id: row.get(2)?,
        session_date: row.get(3)?,
        notes: row.get(4)?,
        progress_score: row.get(5)?,
        pain_level: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    // =========================================================================
    // Medical records
    // =========================================================================

    /// Open a medical record. Fails if the patient already has an active one.
    pub fn insert_medical_record(&self, new: NewMedicalRecord) -> DbResult<MedicalRecord> {
        let record = MedicalRecord::from_new(new);
        self.conn
            .execute(
                r#"
                INSERT INTO medical_records (
                    id, patient_id, status, chief_complaint, diagnosis, history,
                    treatment_goals, discharge_notes, discharged_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    record.id,
                    record.patient_id,
                    record.status.as_str(),
                    record.chief_complaint,
                    record.diagnosis,
                    record.history,
                    record.treatment_goals,
                    record.discharge_notes,
                    record.discharged_at,
                    record.created_at,
                    record.updated_at,
                ],
            )
            .map_err(constraint(
                "patient already has an active medical record or does not exist",
            ))?;
        self.publish(ChangeKind::Insert, &record)?;
        Ok(record)
    }

    pub fn get_medical_record(&self, id: &str) -> DbResult<Option<MedicalRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM medical_records WHERE id = ?"),
                [id],
                row_to_record,
            )
            .optional()
            .map_err(Into::into)
    }

    /// The patient's active record, if any.
    pub fn get_active_medical_record(&self, patient_id: &str) -> DbResult<Option<MedicalRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM medical_records WHERE patient_id = ? AND status = 'active'"
                ),
                [patient_id],
                row_to_record,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all records, newest first.
    pub fn list_medical_records(&self) -> DbResult<Vec<MedicalRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM medical_records ORDER BY created_at DESC, id"
        ))?;
        let rows = stmt.query_map([], row_to_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Apply a partial update. Re-activating a record is subject to the
    /// one-active-record constraint.
    pub fn update_medical_record(
        &self,
        id: &str,
        patch: MedicalRecordPatch,
    ) -> DbResult<MedicalRecord> {
        let mut record = self
            .get_medical_record(id)?
            .ok_or_else(|| DbError::NotFound(format!("medical record {}", id)))?;
        record.apply(patch);
        self.conn
            .execute(
                r#"
                UPDATE medical_records SET
                    status = ?2, chief_complaint = ?3, diagnosis = ?4, history = ?5,
                    treatment_goals = ?6, discharge_notes = ?7, discharged_at = ?8,
                    updated_at = ?9
                WHERE id = ?1
                "#,
                params![
                    record.id,
                    record.status.as_str(),
                    record.chief_complaint,
                    record.diagnosis,
                    record.history,
                    record.treatment_goals,
                    record.discharge_notes,
                    record.discharged_at,
                    record.updated_at,
                ],
            )
            .map_err(constraint("patient already has an active medical record"))?;
        self.publish(ChangeKind::Update, &record)?;
        Ok(record)
    }

    /// Discharge a record.
    pub fn discharge_medical_record(
        &self,
        id: &str,
        notes: Option<String>,
    ) -> DbResult<MedicalRecord> {
        self.update_medical_record(
            id,
            MedicalRecordPatch {
                status: Some(crate::models::RecordStatus::Discharged),
                discharge_notes: notes,
                ..Default::default()
            },
        )
    }

    /// Delete a record. Fails while evolutions reference it.
    pub fn delete_medical_record(&self, id: &str) -> DbResult<()> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM medical_records WHERE id = ?", [id])
            .map_err(constraint("medical record has evolutions"))?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("medical record {}", id)));
        }
        self.publish_delete(MedicalRecord::TABLE, id);
        Ok(())
    }

    // =========================================================================
    // Evolutions
    // =========================================================================

    /// Record a session evolution. The schema rejects it unless the
    /// referenced record is the patient's and still active.
    pub fn insert_evolution(&self, new: NewEvolution) -> DbResult<Evolution> {
        let evolution = Evolution::from_new(new);
        self.conn
            .execute(
                r#"
                INSERT INTO evolutions (
                    id, patient_id, medical_record_id, session_date, notes,
                    progress_score, pain_level, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    evolution.id,
                    evolution.patient_id,
                    evolution.medical_record_id,
                    evolution.session_date,
                    evolution.notes,
                    evolution.progress_score,
                    evolution.pain_level,
                    evolution.created_at,
                    evolution.updated_at,
                ],
            )
            .map_err(constraint("invalid evolution"))?;
        self.publish(ChangeKind::Insert, &evolution)?;
        Ok(evolution)
    }

    pub fn get_evolution(&self, id: &str) -> DbResult<Option<Evolution>> {
        self.conn
            .query_row(
                &format!("SELECT {EVOLUTION_COLUMNS} FROM evolutions WHERE id = ?"),
                [id],
                row_to_evolution,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all evolutions, most recent session first.
    pub fn list_evolutions(&self) -> DbResult<Vec<Evolution>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVOLUTION_COLUMNS} FROM evolutions ORDER BY session_date DESC, created_at DESC"
        ))?;
        let rows = stmt.query_map([], row_to_evolution)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Evolutions of one record, most recent first.
    pub fn list_record_evolutions(&self, medical_record_id: &str) -> DbResult<Vec<Evolution>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVOLUTION_COLUMNS} FROM evolutions WHERE medical_record_id = ? \
             ORDER BY session_date DESC, created_at DESC"
        ))?;
        let rows = stmt.query_map([medical_record_id], row_to_evolution)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn update_evolution(&self, id: &str, patch: EvolutionPatch) -> DbResult<Evolution> {
        let mut evolution = self
            .get_evolution(id)?
            .ok_or_else(|| DbError::NotFound(format!("evolution {}", id)))?;
        evolution.apply(patch);
        self.conn
            .execute(
                r#"
                UPDATE evolutions SET
                    session_date = ?2, notes = ?3, progress_score = ?4,
                    pain_level = ?5, updated_at = ?6
                WHERE id = ?1
                "#,
                params![
                    evolution.id,
                    evolution.session_date,
                    evolution.notes,
                    evolution.progress_score,
                    evolution.pain_level,
                    evolution.updated_at,
                ],
            )
            .map_err(constraint("invalid evolution"))?;
        self.publish(ChangeKind::Update, &evolution)?;
        Ok(evolution)
    }

    pub fn delete_evolution(&self, id: &str) -> DbResult<()> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM evolutions WHERE id = ?", [id])?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("evolution {}", id)));
        }
        self.publish_delete(Evolution::TABLE, id);
        Ok(())
    }
}

impl TableOps for MedicalRecord {
    type New = NewMedicalRecord;
    type Patch = MedicalRecordPatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_medical_records()
    }

    fn insert(db: &Database, new: NewMedicalRecord) -> DbResult<Self> {
        db.insert_medical_record(new)
    }

    fn update(db: &Database, id: &str, patch: MedicalRecordPatch) -> DbResult<Self> {
        db.update_medical_record(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_medical_record(id)
    }
}

impl TableOps for Evolution {
    type New = NewEvolution;
    type Patch = EvolutionPatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_evolutions()
    }

    fn insert(db: &Database, new: NewEvolution) -> DbResult<Self> {
        db.insert_evolution(new)
    }

    fn update(db: &Database, id: &str, patch: EvolutionPatch) -> DbResult<Self> {
        db.update_evolution(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_evolution(id)
    }
}
