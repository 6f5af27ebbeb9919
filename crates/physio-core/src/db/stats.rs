//! Aggregate queries behind the dashboard.

use super::{Database, DbResult};

/// Points awarded per completed plan exercise.
pub const POINTS_PER_COMPLETED_EXERCISE: u64 = 10;

impl Database {
    /// Patients in treatment: status active and not soft-deleted.
    pub fn count_active_patients(&self) -> DbResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM patients WHERE status = 'active' AND is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_completed_appointments(&self) -> DbResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM appointments WHERE status = 'completed'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Mean progress of active plans, rounded; 0 without active plans.
    pub fn average_active_plan_progress(&self) -> DbResult<u8> {
        let avg: Option<f64> = self.conn.query_row(
            "SELECT AVG(progress_percentage) FROM treatment_plans \
             WHERE status = 'active' AND is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(avg.map(|v| v.round().clamp(0.0, 100.0) as u8).unwrap_or(0))
    }

    pub fn gamification_points(&self) -> DbResult<u64> {
        let completed: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM plan_exercises WHERE completed = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(completed as u64 * POINTS_PER_COMPLETED_EXERCISE)
    }
}
