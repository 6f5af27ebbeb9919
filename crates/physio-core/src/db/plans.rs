//! Treatment plan and prescribed exercise database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{constraint, text_col, Database, DbError, DbResult};
use crate::feed::ChangeKind;
use crate::models::{
    plan_progress, Entity, NewPlanExercise, NewTreatmentPlan, PlanExercise, PlanExercisePatch,
    TreatmentPlan, TreatmentPlanPatch,
};
use crate::repo::TableOps;

const PLAN_COLUMNS: &str = r#"
    id, patient_id, title, description, start_date, end_date,
    progress_percentage, status, is_active, created_at, updated_at
"#;

const PLAN_EXERCISE_SELECT: &str = r#"
    SELECT pe.id, pe.plan_id, pe.exercise_id, e.name, pe.sets, pe.repetitions,
           pe.frequency, pe.completed, pe.created_at, pe.updated_at
    FROM plan_exercises pe
    LEFT JOIN exercises e ON e.id = pe.exercise_id
"#;

fn row_to_plan(row: &Row<'_>) -> rusqlite::Result<TreatmentPlan> {
    Ok(TreatmentPlan {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        progress_percentage: row.get(6)?,
        status: text_col(row, 7)?,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_plan_exercise(row: &Row<'_>) -> rusqlite::Result<PlanExercise> {
    Ok(PlanExercise {
        id: row.get(0)?,
        plan_id: row.get(1)?,
        exercise_id: row.get(2)?,
        exercise_name: row.get(3)?,
        sets: row.get(4)?,
        repetitions: row.get(5)?,
        frequency: row.get(6)?,
        completed: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl Database {
    // =========================================================================
    // Treatment plans
    // =========================================================================

    pub fn insert_treatment_plan(&self, new: NewTreatmentPlan) -> DbResult<TreatmentPlan> {
        let plan = TreatmentPlan::from_new(new);
        self.conn
            .execute(
                r#"
                INSERT INTO treatment_plans (
                    id, patient_id, title, description, start_date, end_date,
                    progress_percentage, status, is_active, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    plan.id,
                    plan.patient_id,
                    plan.title,
                    plan.description,
                    plan.start_date,
                    plan.end_date,
                    plan.progress_percentage,
                    plan.status.as_str(),
                    plan.is_active,
                    plan.created_at,
                    plan.updated_at,
                ],
            )
            .map_err(constraint("unknown patient or invalid treatment plan"))?;
        self.publish(ChangeKind::Insert, &plan)?;
        Ok(plan)
    }

    pub fn get_treatment_plan(&self, id: &str) -> DbResult<Option<TreatmentPlan>> {
        self.conn
            .query_row(
                &format!("SELECT {PLAN_COLUMNS} FROM treatment_plans WHERE id = ?"),
                [id],
                row_to_plan,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List plans, most recent start first.
    pub fn list_treatment_plans(&self) -> DbResult<Vec<TreatmentPlan>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM treatment_plans ORDER BY start_date DESC, id"
        ))?;
        let rows = stmt.query_map([], row_to_plan)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn list_patient_treatment_plans(&self, patient_id: &str) -> DbResult<Vec<TreatmentPlan>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM treatment_plans WHERE patient_id = ? ORDER BY start_date DESC, id"
        ))?;
        let rows = stmt.query_map([patient_id], row_to_plan)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn update_treatment_plan(
        &self,
        id: &str,
        patch: TreatmentPlanPatch,
    ) -> DbResult<TreatmentPlan> {
        let mut plan = self.require_plan(id)?;
        plan.apply(patch);
        self.write_plan(&plan)?;
        self.publish(ChangeKind::Update, &plan)?;
        Ok(plan)
    }

    /// Soft delete.
    pub fn deactivate_treatment_plan(&self, id: &str) -> DbResult<TreatmentPlan> {
        self.update_treatment_plan(
            id,
            TreatmentPlanPatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
    }

    /// Delete a plan together with its prescribed exercises.
    pub fn delete_treatment_plan(&self, id: &str) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let exercise_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM plan_exercises WHERE plan_id = ?")?;
            let rows = stmt.query_map([id], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.execute("DELETE FROM plan_exercises WHERE plan_id = ?", [id])?;
        let rows_affected = tx
            .execute("DELETE FROM treatment_plans WHERE id = ?", [id])
            .map_err(constraint("treatment plan is referenced"))?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("treatment plan {}", id)));
        }
        tx.commit()?;

        for exercise_id in &exercise_ids {
            self.publish_delete(PlanExercise::TABLE, exercise_id);
        }
        self.publish_delete(TreatmentPlan::TABLE, id);
        Ok(())
    }

    fn require_plan(&self, id: &str) -> DbResult<TreatmentPlan> {
        self.get_treatment_plan(id)?
            .ok_or_else(|| DbError::NotFound(format!("treatment plan {}", id)))
    }

    fn write_plan(&self, plan: &TreatmentPlan) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                UPDATE treatment_plans SET
                    title = ?2, description = ?3, start_date = ?4, end_date = ?5,
                    progress_percentage = ?6, status = ?7, is_active = ?8,
                    updated_at = ?9
                WHERE id = ?1
                "#,
                params![
                    plan.id,
                    plan.title,
                    plan.description,
                    plan.start_date,
                    plan.end_date,
                    plan.progress_percentage,
                    plan.status.as_str(),
                    plan.is_active,
                    plan.updated_at,
                ],
            )
            .map_err(constraint("invalid treatment plan"))?;
        Ok(())
    }

    /// Recompute a plan's progress from its exercises, publishing the plan
    /// only when the value moved.
    fn refresh_plan_progress(&self, plan_id: &str) -> DbResult<()> {
        let exercises = self.list_plan_exercises(plan_id)?;
        let progress = plan_progress(&exercises);
        let mut plan = self.require_plan(plan_id)?;
        if plan.progress_percentage == progress {
            return Ok(());
        }
        plan.apply(TreatmentPlanPatch {
            progress_percentage: Some(progress),
            ..Default::default()
        });
        self.write_plan(&plan)?;
        self.publish(ChangeKind::Update, &plan)?;
        Ok(())
    }

    // =========================================================================
    // Plan exercises
    // =========================================================================

    pub fn insert_plan_exercise(&self, new: NewPlanExercise) -> DbResult<PlanExercise> {
        let entry = PlanExercise::from_new(new);
        self.conn
            .execute(
                r#"
                INSERT INTO plan_exercises (
                    id, plan_id, exercise_id, sets, repetitions, frequency,
                    completed, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    entry.id,
                    entry.plan_id,
                    entry.exercise_id,
                    entry.sets,
                    entry.repetitions,
                    entry.frequency,
                    entry.completed,
                    entry.created_at,
                    entry.updated_at,
                ],
            )
            .map_err(constraint("unknown plan or exercise"))?;
        let entry = self.require_plan_exercise(&entry.id)?;
        self.publish(ChangeKind::Insert, &entry)?;
        self.refresh_plan_progress(&entry.plan_id)?;
        Ok(entry)
    }

    pub fn get_plan_exercise(&self, id: &str) -> DbResult<Option<PlanExercise>> {
        self.conn
            .query_row(
                &format!("{PLAN_EXERCISE_SELECT} WHERE pe.id = ?"),
                [id],
                row_to_plan_exercise,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Exercises prescribed in one plan, in prescription order.
    pub fn list_plan_exercises(&self, plan_id: &str) -> DbResult<Vec<PlanExercise>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PLAN_EXERCISE_SELECT} WHERE pe.plan_id = ? ORDER BY pe.created_at, pe.id"
        ))?;
        let rows = stmt.query_map([plan_id], row_to_plan_exercise)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn list_all_plan_exercises(&self) -> DbResult<Vec<PlanExercise>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PLAN_EXERCISE_SELECT} ORDER BY pe.plan_id, pe.created_at, pe.id"
        ))?;
        let rows = stmt.query_map([], row_to_plan_exercise)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn update_plan_exercise(
        &self,
        id: &str,
        patch: PlanExercisePatch,
    ) -> DbResult<PlanExercise> {
        let mut entry = self.require_plan_exercise(id)?;
        let was_completed = entry.completed;
        entry.apply(patch);
        self.conn
            .execute(
                r#"
                UPDATE plan_exercises SET
                    sets = ?2, repetitions = ?3, frequency = ?4, completed = ?5,
                    updated_at = ?6
                WHERE id = ?1
                "#,
                params![
                    entry.id,
                    entry.sets,
                    entry.repetitions,
                    entry.frequency,
                    entry.completed,
                    entry.updated_at,
                ],
            )
            .map_err(constraint("invalid plan exercise"))?;
        self.publish(ChangeKind::Update, &entry)?;
        if entry.completed != was_completed {
            self.refresh_plan_progress(&entry.plan_id)?;
        }
        Ok(entry)
    }

    pub fn delete_plan_exercise(&self, id: &str) -> DbResult<()> {
        let entry = self.require_plan_exercise(id)?;
        self.conn
            .execute("DELETE FROM plan_exercises WHERE id = ?", [id])?;
        self.publish_delete(PlanExercise::TABLE, id);
        self.refresh_plan_progress(&entry.plan_id)?;
        Ok(())
    }

    fn require_plan_exercise(&self, id: &str) -> DbResult<PlanExercise> {
        self.get_plan_exercise(id)?
            .ok_or_else(|| DbError::NotFound(format!("plan exercise {}", id)))
    }
}

impl TableOps for TreatmentPlan {
    type New = NewTreatmentPlan;
    type Patch = TreatmentPlanPatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_treatment_plans()
    }

    fn insert(db: &Database, new: NewTreatmentPlan) -> DbResult<Self> {
        db.insert_treatment_plan(new)
    }

    fn update(db: &Database, id: &str, patch: TreatmentPlanPatch) -> DbResult<Self> {
        db.update_treatment_plan(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_treatment_plan(id)
    }

    fn deactivate(db: &Database, id: &str) -> DbResult<Self> {
        db.deactivate_treatment_plan(id)
    }
}

impl TableOps for PlanExercise {
    type New = NewPlanExercise;
    type Patch = PlanExercisePatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_all_plan_exercises()
    }

    fn insert(db: &Database, new: NewPlanExercise) -> DbResult<Self> {
        db.insert_plan_exercise(new)
    }

    fn update(db: &Database, id: &str, patch: PlanExercisePatch) -> DbResult<Self> {
        db.update_plan_exercise(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_plan_exercise(id)
    }
}
