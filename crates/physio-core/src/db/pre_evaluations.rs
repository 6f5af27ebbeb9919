//! Pre-evaluation database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{constraint, Database, DbError, DbResult};
use crate::feed::ChangeKind;
use crate::models::{Entity, NewPreEvaluation, PreEvaluation, PreEvaluationPatch};
use crate::repo::TableOps;

const PRE_EVALUATION_COLUMNS: &str = r#"
    id, patient_id, chief_complaint, pain_location, pain_intensity,
    symptom_duration, medical_history, medications, previous_treatments,
    lifestyle, goals, observations, created_at, updated_at
"#;

fn row_to_pre_evaluation(row: &Row<'_>) -> rusqlite::Result<PreEvaluation> {
    Ok(PreEvaluation {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        chief_complaint: row.get(2)?,
        pain_location: row.get(3)?,
        pain_intensity: row.get(4)?,
        symptom_duration: row.get(5)?,
        medical_history: row.get(6)?,
        medications: row.get(7)?,
        previous_treatments: row.get(8)?,
        lifestyle: row.get(9)?,
        goals: row.get(10)?,
        observations: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl Database {
    pub fn insert_pre_evaluation(&self, new: NewPreEvaluation) -> DbResult<PreEvaluation> {
        let evaluation = PreEvaluation::from_new(new);
        self.conn
            .execute(
                &format!(
                    "INSERT INTO pre_evaluations ({PRE_EVALUATION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    evaluation.id,
                    evaluation.patient_id,
                    evaluation.chief_complaint,
                    evaluation.pain_location,
                    evaluation.pain_intensity,
                    evaluation.symptom_duration,
                    evaluation.medical_history,
                    evaluation.medications,
                    evaluation.previous_treatments,
                    evaluation.lifestyle,
                    evaluation.goals,
                    evaluation.observations,
                    evaluation.created_at,
                    evaluation.updated_at,
                ],
            )
            .map_err(constraint("unknown patient or pain intensity out of range"))?;
        self.publish(ChangeKind::Insert, &evaluation)?;
        Ok(evaluation)
    }

    pub fn get_pre_evaluation(&self, id: &str) -> DbResult<Option<PreEvaluation>> {
        self.conn
            .query_row(
                &format!("SELECT {PRE_EVALUATION_COLUMNS} FROM pre_evaluations WHERE id = ?"),
                [id],
                row_to_pre_evaluation,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_pre_evaluations(&self) -> DbResult<Vec<PreEvaluation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PRE_EVALUATION_COLUMNS} FROM pre_evaluations ORDER BY created_at DESC, id"
        ))?;
        let rows = stmt.query_map([], row_to_pre_evaluation)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn update_pre_evaluation(
        &self,
        id: &str,
        patch: PreEvaluationPatch,
    ) -> DbResult<PreEvaluation> {
        let mut evaluation = self
            .get_pre_evaluation(id)?
            .ok_or_else(|| DbError::NotFound(format!("pre-evaluation {}", id)))?;
        evaluation.apply(patch);
        self.conn
            .execute(
                r#"
                UPDATE pre_evaluations SET
                    chief_complaint = ?2, pain_location = ?3, pain_intensity = ?4,
                    symptom_duration = ?5, medical_history = ?6, medications = ?7,
                    previous_treatments = ?8, lifestyle = ?9, goals = ?10,
                    observations = ?11, updated_at = ?12
                WHERE id = ?1
                "#,
                params![
                    evaluation.id,
                    evaluation.chief_complaint,
                    evaluation.pain_location,
                    evaluation.pain_intensity,
                    evaluation.symptom_duration,
                    evaluation.medical_history,
                    evaluation.medications,
                    evaluation.previous_treatments,
                    evaluation.lifestyle,
                    evaluation.goals,
                    evaluation.observations,
                    evaluation.updated_at,
                ],
            )
            .map_err(constraint("pain intensity out of range"))?;
        self.publish(ChangeKind::Update, &evaluation)?;
        Ok(evaluation)
    }

    pub fn delete_pre_evaluation(&self, id: &str) -> DbResult<()> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM pre_evaluations WHERE id = ?", [id])?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("pre-evaluation {}", id)));
        }
        self.publish_delete(PreEvaluation::TABLE, id);
        Ok(())
    }
}

impl TableOps for PreEvaluation {
    type New = NewPreEvaluation;
    type Patch = PreEvaluationPatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_pre_evaluations()
    }

    fn insert(db: &Database, new: NewPreEvaluation) -> DbResult<Self> {
        db.insert_pre_evaluation(new)
    }

    fn update(db: &Database, id: &str, patch: PreEvaluationPatch) -> DbResult<Self> {
        db.update_pre_evaluation(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_pre_evaluation(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPatient;

    #[test]
    fn test_sparse_evaluation_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let patient = db
            .insert_patient(NewPatient {
                name: "Rita".into(),
                ..Default::default()
            })
            .unwrap();

        let evaluation = db
            .insert_pre_evaluation(NewPreEvaluation {
                patient_id: patient.id,
                pain_intensity: Some(7),
                ..Default::default()
            })
            .unwrap();
        let stored = db.get_pre_evaluation(&evaluation.id).unwrap().unwrap();
        assert_eq!(stored, evaluation);
        assert!(stored.medications.is_none());
    }

    #[test]
    fn test_pain_intensity_range_enforced() {
        let db = Database::open_in_memory().unwrap();
        let patient = db
            .insert_patient(NewPatient {
                name: "Rita".into(),
                ..Default::default()
            })
            .unwrap();
        let result = db.insert_pre_evaluation(NewPreEvaluation {
            patient_id: patient.id,
            pain_intensity: Some(11),
            ..Default::default()
        });
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }
}
