//! Patient models.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{join_search, new_id, now_rfc3339, text_enum, Entity, Table};

text_enum! {
    /// Where a patient stands in their course of treatment.
    pub enum PatientStatus {
        Active => "active",
        Inactive => "inactive",
        Completed => "completed",
    }
}

impl Default for PatientStatus {
    fn default() -> Self {
        PatientStatus::Active
    }
}

/// A patient record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// UUID primary key
    pub id: String,
    /// Full name
    pub name: String,
    /// Contact email
    pub email: Option<String>,
    /// Contact phone
    pub phone: Option<String>,
    /// CPF, stored formatted (000.000.000-00)
    pub cpf: Option<String>,
    /// Date of birth
    pub birth_date: Option<NaiveDate>,
    /// Street address
    pub address: Option<String>,
    /// Emergency contact name
    pub emergency_contact: Option<String>,
    /// Emergency contact phone
    pub emergency_phone: Option<String>,
    /// Free-form notes
    pub notes: Option<String>,
    /// Treatment status
    pub status: PatientStatus,
    /// False once soft-deleted
    pub is_active: bool,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

/// Insert payload for a patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NewPatient {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub emergency_phone: Option<String>,
    pub notes: Option<String>,
    pub status: PatientStatus,
}

/// Partial update for a patient. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PatientPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub emergency_phone: Option<String>,
    pub notes: Option<String>,
    pub status: Option<PatientStatus>,
    pub is_active: Option<bool>,
}

impl Patient {
    /// Build a new active patient from an insert payload.
    pub fn from_new(new: NewPatient) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            name: new.name,
            email: new.email,
            phone: new.phone,
            cpf: new.cpf,
            birth_date: new.birth_date,
            address: new.address,
            emergency_contact: new.emergency_contact,
            emergency_phone: new.emergency_phone,
            notes: new.notes,
            status: new.status,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Apply a partial update.
    pub fn apply(&mut self, patch: PatientPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if patch.email.is_some() {
            self.email = patch.email;
        }
        if patch.phone.is_some() {
            self.phone = patch.phone;
        }
        if patch.cpf.is_some() {
            self.cpf = patch.cpf;
        }
        if patch.birth_date.is_some() {
            self.birth_date = patch.birth_date;
        }
        if patch.address.is_some() {
            self.address = patch.address;
        }
        if patch.emergency_contact.is_some() {
            self.emergency_contact = patch.emergency_contact;
        }
        if patch.emergency_phone.is_some() {
            self.emergency_phone = patch.emergency_phone;
        }
        if patch.notes.is_some() {
            self.notes = patch.notes;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        self.updated_at = now_rfc3339();
    }

    /// Active patients are the ones counted on the dashboard.
    pub fn is_in_treatment(&self) -> bool {
        self.is_active && self.status == PatientStatus::Active
    }
}

impl Entity for Patient {
    const TABLE: Table = Table::Patients;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        join_search([
            Some(self.name.as_str()),
            self.email.as_deref(),
            self.phone.as_deref(),
            self.cpf.as_deref(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_new() {
        let patient = Patient::from_new(NewPatient {
            name: "Ana Souza".into(),
            ..Default::default()
        });
        assert_eq!(patient.name, "Ana Souza");
        assert_eq!(patient.status, PatientStatus::Active);
        assert!(patient.is_active);
        assert_eq!(patient.id.len(), 36);
    }

    #[test]
    fn test_apply_leaves_absent_fields() {
        let mut patient = Patient::from_new(NewPatient {
            name: "Ana Souza".into(),
            phone: Some("11 99999-0000".into()),
            ..Default::default()
        });

        patient.apply(PatientPatch {
            status: Some(PatientStatus::Completed),
            ..Default::default()
        });

        assert_eq!(patient.status, PatientStatus::Completed);
        assert_eq!(patient.phone.as_deref(), Some("11 99999-0000"));
        assert!(!patient.is_in_treatment());
    }

    #[test]
    fn test_patch_deserializes_partial_json() {
        let patch: PatientPatch = serde_json::from_str(r#"{"status":"inactive"}"#).unwrap();
        assert_eq!(patch.status, Some(PatientStatus::Inactive));
        assert!(patch.name.is_none());
    }
}
