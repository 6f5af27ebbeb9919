//! Staff accounts, patient portal access and sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;

text_enum! {
    pub enum StaffRole {
        Admin => "admin",
        Therapist => "therapist",
        Receptionist => "receptionist",
    }
}

impl Default for StaffRole {
    fn default() -> Self {
        StaffRole::Therapist
    }
}

/// A clinic staff member who can sign in to the back office.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaffUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: StaffRole,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: String,
}

/// Patient portal credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientAccess {
    pub patient_id: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: String,
}

text_enum! {
    /// Who a session token belongs to.
    pub enum SessionKind {
        Staff => "staff",
        Patient => "patient",
    }
}

/// A server-side session issued on login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Opaque bearer token
    pub token: String,
    /// Staff user id or patient id, depending on `kind`
    pub subject_id: String,
    pub kind: SessionKind,
    pub expires_at: DateTime<Utc>,
    pub created_at: String,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
