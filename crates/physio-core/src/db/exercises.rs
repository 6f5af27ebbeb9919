//! Exercise library database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{constraint, text_col, Database, DbError, DbResult};
use crate::feed::ChangeKind;
use crate::models::{Entity, Exercise, ExercisePatch, NewExercise};
use crate::repo::TableOps;

const EXERCISE_COLUMNS: &str =
    "id, name, category, description, difficulty, is_active, created_at, updated_at";

fn row_to_exercise(row: &Row<'_>) -> rusqlite::Result<Exercise> {
    Ok(Exercise {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        description: row.get(3)?,
        difficulty: text_col(row, 4)?,
        is_active: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl Database {
    pub fn insert_exercise(&self, new: NewExercise) -> DbResult<Exercise> {
        let exercise = Exercise::from_new(new);
        self.conn
            .execute(
                r#"
                INSERT INTO exercises (
                    id, name, category, description, difficulty, is_active,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    exercise.id,
                    exercise.name,
                    exercise.category,
                    exercise.description,
                    exercise.difficulty.as_str(),
                    exercise.is_active,
                    exercise.created_at,
                    exercise.updated_at,
                ],
            )
            .map_err(constraint("invalid exercise"))?;
        self.publish(ChangeKind::Insert, &exercise)?;
        Ok(exercise)
    }

    pub fn get_exercise(&self, id: &str) -> DbResult<Option<Exercise>> {
        self.conn
            .query_row(
                &format!("SELECT {EXERCISE_COLUMNS} FROM exercises WHERE id = ?"),
                [id],
                row_to_exercise,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List the whole library, inactive exercises included.
    pub fn list_exercises(&self) -> DbResult<Vec<Exercise>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EXERCISE_COLUMNS} FROM exercises ORDER BY name, id"
        ))?;
        let rows = stmt.query_map([], row_to_exercise)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn update_exercise(&self, id: &str, patch: ExercisePatch) -> DbResult<Exercise> {
        let mut exercise = self
            .get_exercise(id)?
            .ok_or_else(|| DbError::NotFound(format!("exercise {}", id)))?;
        exercise.apply(patch);
        self.conn
            .execute(
                r#"
                UPDATE exercises SET
                    name = ?2, category = ?3, description = ?4, difficulty = ?5,
                    is_active = ?6, updated_at = ?7
                WHERE id = ?1
                "#,
                params![
                    exercise.id,
                    exercise.name,
                    exercise.category,
                    exercise.description,
                    exercise.difficulty.as_str(),
                    exercise.is_active,
                    exercise.updated_at,
                ],
            )
            .map_err(constraint("invalid exercise"))?;
        self.publish(ChangeKind::Update, &exercise)?;
        Ok(exercise)
    }

    /// Soft delete; plans that prescribe the exercise keep referencing it.
    pub fn deactivate_exercise(&self, id: &str) -> DbResult<Exercise> {
        self.update_exercise(
            id,
            ExercisePatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
    }

    pub fn delete_exercise(&self, id: &str) -> DbResult<()> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM exercises WHERE id = ?", [id])
            .map_err(constraint("exercise is prescribed in a treatment plan"))?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("exercise {}", id)));
        }
        self.publish_delete(Exercise::TABLE, id);
        Ok(())
    }
}

impl TableOps for Exercise {
    type New = NewExercise;
    type Patch = ExercisePatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_exercises()
    }

    fn insert(db: &Database, new: NewExercise) -> DbResult<Self> {
        db.insert_exercise(new)
    }

    fn update(db: &Database, id: &str, patch: ExercisePatch) -> DbResult<Self> {
        db.update_exercise(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_exercise(id)
    }

    fn deactivate(db: &Database, id: &str) -> DbResult<Self> {
        db.deactivate_exercise(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;

    #[test]
    fn test_insert_update_deactivate() {
        let db = Database::open_in_memory().unwrap();
        let exercise = db
            .insert_exercise(NewExercise {
                name: "Wall slide".into(),
                category: Some("mobility".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(exercise.difficulty, Difficulty::Beginner);

        let updated = db
            .update_exercise(
                &exercise.id,
                ExercisePatch {
                    difficulty: Some(Difficulty::Intermediate),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            db.get_exercise(&exercise.id).unwrap().unwrap(),
            updated
        );

        let inactive = db.deactivate_exercise(&exercise.id).unwrap();
        assert!(!inactive.is_active);
        assert_eq!(db.list_exercises().unwrap().len(), 1);
    }
}
