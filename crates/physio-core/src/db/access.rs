//! Staff accounts, patient portal credentials and sessions.
//!
//! Password hashes arrive already hashed; see [`crate::auth`].

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{constraint, text_col, Database, DbResult};
use crate::models::{PatientAccess, Session, StaffUser};

const STAFF_COLUMNS: &str = "id, name, email, role, password_hash, created_at";
const ACCESS_COLUMNS: &str = "patient_id, email, password_hash, created_at";
const SESSION_COLUMNS: &str = "token, subject_id, kind, expires_at, created_at";

fn row_to_staff(row: &Row<'_>) -> rusqlite::Result<StaffUser> {
    Ok(StaffUser {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: text_col(row, 3)?,
        password_hash: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_access(row: &Row<'_>) -> rusqlite::Result<PatientAccess> {
    Ok(PatientAccess {
        patient_id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        token: row.get(0)?,
        subject_id: row.get(1)?,
        kind: text_col(row, 2)?,
        expires_at: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl Database {
    // =========================================================================
    // Staff
    // =========================================================================

    pub fn insert_staff_user(&self, user: &StaffUser) -> DbResult<()> {
        self.conn
            .execute(
                &format!("INSERT INTO staff_users ({STAFF_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    user.id,
                    user.name,
                    user.email,
                    user.role.as_str(),
                    user.password_hash,
                    user.created_at,
                ],
            )
            .map_err(constraint("email already registered"))?;
        Ok(())
    }

    pub fn get_staff_user(&self, id: &str) -> DbResult<Option<StaffUser>> {
        self.conn
            .query_row(
                &format!("SELECT {STAFF_COLUMNS} FROM staff_users WHERE id = ?"),
                [id],
                row_to_staff,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Case-insensitive lookup.
    pub fn find_staff_user_by_email(&self, email: &str) -> DbResult<Option<StaffUser>> {
        self.conn
            .query_row(
                &format!("SELECT {STAFF_COLUMNS} FROM staff_users WHERE email = ?"),
                [email],
                row_to_staff,
            )
            .optional()
            .map_err(Into::into)
    }

    // =========================================================================
    // Patient portal
    // =========================================================================

    pub fn insert_patient_access(&self, access: &PatientAccess) -> DbResult<()> {
        self.conn
            .execute(
                &format!("INSERT INTO patient_access ({ACCESS_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
                params![
                    access.patient_id,
                    access.email,
                    access.password_hash,
                    access.created_at,
                ],
            )
            .map_err(constraint(
                "patient already has portal access, email in use, or unknown patient",
            ))?;
        Ok(())
    }

    pub fn find_patient_access_by_email(&self, email: &str) -> DbResult<Option<PatientAccess>> {
        self.conn
            .query_row(
                &format!("SELECT {ACCESS_COLUMNS} FROM patient_access WHERE email = ?"),
                [email],
                row_to_access,
            )
            .optional()
            .map_err(Into::into)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn insert_session(&self, session: &Session) -> DbResult<()> {
        self.conn.execute(
            &format!("INSERT INTO sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                session.token,
                session.subject_id,
                session.kind.as_str(),
                session.expires_at,
                session.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, token: &str) -> DbResult<Option<Session>> {
        self.conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token = ?"),
                [token],
                row_to_session,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Returns whether a session was removed.
    pub fn delete_session(&self, token: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?", [token])?;
        Ok(rows_affected > 0)
    }

    /// Remove every session expired at `now`. Returns how many were removed.
    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> DbResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM sessions WHERE expires_at <= ?", [now])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use crate::models::{SessionKind, StaffRole};
    use chrono::Duration;

    fn staff(email: &str) -> StaffUser {
        StaffUser {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Dr. Ana".into(),
            email: email.into(),
            role: StaffRole::Admin,
            password_hash: "pbkdf2-sha256$1$00$00".into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_staff_email_unique_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let user = staff("ana@clinic.com");
        db.insert_staff_user(&user).unwrap();

        let found = db.find_staff_user_by_email("ANA@clinic.com").unwrap();
        assert_eq!(found, Some(user));
        assert!(matches!(
            db.insert_staff_user(&staff("Ana@Clinic.com")),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_session_round_trip_and_purge() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let live = Session {
            token: "live".into(),
            subject_id: "u1".into(),
            kind: SessionKind::Staff,
            expires_at: now + Duration::hours(1),
            created_at: now.to_rfc3339(),
        };
        let stale = Session {
            token: "stale".into(),
            expires_at: now - Duration::minutes(1),
            ..live.clone()
        };
        db.insert_session(&live).unwrap();
        db.insert_session(&stale).unwrap();

        assert_eq!(db.get_session("live").unwrap(), Some(live));
        assert_eq!(db.purge_expired_sessions(now).unwrap(), 1);
        assert!(db.get_session("stale").unwrap().is_none());
        assert!(db.delete_session("live").unwrap());
        assert!(!db.delete_session("live").unwrap());
    }
}
