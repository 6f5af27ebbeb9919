//! Appointment database operations.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{constraint, text_col, Database, DbError, DbResult};
use crate::feed::ChangeKind;
use crate::models::{Appointment, AppointmentPatch, Entity, NewAppointment};
use crate::repo::TableOps;

const APPOINTMENT_SELECT: &str = r#"
    SELECT a.id, a.patient_id, p.name, a.date, a.time, a.duration_minutes,
           a.kind, a.status, a.notes, a.created_at, a.updated_at
    FROM appointments a
    LEFT JOIN patients p ON p.id = a.patient_id
"#;

fn row_to_appointment(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        patient_name: row.get(2)?,
        date: row.get(3)?,
        time: row.get(4)?,
        duration_minutes: row.get(5)?,
        kind: row.get(6)?,
        status: text_col(row, 7)?,
        notes: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl Database {
    /// Insert a new appointment.
    pub fn insert_appointment(&self, new: NewAppointment) -> DbResult<Appointment> {
        let appointment = Appointment::from_new(new);
        self.conn
            .execute(
                r#"
                INSERT INTO appointments (
                    id, patient_id, date, time, duration_minutes, kind,
                    status, notes, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    appointment.id,
                    appointment.patient_id,
                    appointment.date,
                    appointment.time,
                    appointment.duration_minutes,
                    appointment.kind,
                    appointment.status.as_str(),
                    appointment.notes,
                    appointment.created_at,
                    appointment.updated_at,
                ],
            )
            .map_err(constraint("unknown patient or invalid appointment"))?;
        let appointment = self.require_appointment(&appointment.id)?;
        self.publish(ChangeKind::Insert, &appointment)?;
        Ok(appointment)
    }

    /// Get an appointment by ID, with the patient name joined.
    pub fn get_appointment(&self, id: &str) -> DbResult<Option<Appointment>> {
        self.conn
            .query_row(
                &format!("{APPOINTMENT_SELECT} WHERE a.id = ?"),
                [id],
                row_to_appointment,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all appointments ordered by date and time.
    pub fn list_appointments(&self) -> DbResult<Vec<Appointment>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{APPOINTMENT_SELECT} ORDER BY a.date, a.time, a.id"))?;
        let rows = stmt.query_map([], row_to_appointment)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// List a patient's appointments.
    pub fn list_patient_appointments(&self, patient_id: &str) -> DbResult<Vec<Appointment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{APPOINTMENT_SELECT} WHERE a.patient_id = ? ORDER BY a.date, a.time, a.id"
        ))?;
        let rows = stmt.query_map([patient_id], row_to_appointment)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// List appointments within an inclusive date range.
    pub fn list_appointments_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DbResult<Vec<Appointment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{APPOINTMENT_SELECT} WHERE a.date BETWEEN ?1 AND ?2 ORDER BY a.date, a.time, a.id"
        ))?;
        let rows = stmt.query_map(params![start, end], row_to_appointment)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Apply a partial update. Any status may follow any status.
    pub fn update_appointment(&self, id: &str, patch: AppointmentPatch) -> DbResult<Appointment> {
        let mut appointment = self.require_appointment(id)?;
        appointment.apply(patch);
        self.conn
            .execute(
                r#"
                UPDATE appointments SET
                    date = ?2, time = ?3, duration_minutes = ?4, kind = ?5,
                    status = ?6, notes = ?7, updated_at = ?8
                WHERE id = ?1
                "#,
                params![
                    appointment.id,
                    appointment.date,
                    appointment.time,
                    appointment.duration_minutes,
                    appointment.kind,
                    appointment.status.as_str(),
                    appointment.notes,
                    appointment.updated_at,
                ],
            )
            .map_err(constraint("invalid appointment"))?;
        self.publish(ChangeKind::Update, &appointment)?;
        Ok(appointment)
    }

    /// Delete an appointment.
    pub fn delete_appointment(&self, id: &str) -> DbResult<()> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM appointments WHERE id = ?", [id])?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("appointment {}", id)));
        }
        self.publish_delete(Appointment::TABLE, id);
        Ok(())
    }

    fn require_appointment(&self, id: &str) -> DbResult<Appointment> {
        self.get_appointment(id)?
            .ok_or_else(|| DbError::NotFound(format!("appointment {}", id)))
    }
}

impl TableOps for Appointment {
    type New = NewAppointment;
    type Patch = AppointmentPatch;

    fn list(db: &Database) -> DbResult<Vec<Self>> {
        db.list_appointments()
    }

    fn insert(db: &Database, new: NewAppointment) -> DbResult<Self> {
        db.insert_appointment(new)
    }

    fn update(db: &Database, id: &str, patch: AppointmentPatch) -> DbResult<Self> {
        db.update_appointment(id, patch)
    }

    fn delete(db: &Database, id: &str) -> DbResult<()> {
        db.delete_appointment(id)
    }
}
