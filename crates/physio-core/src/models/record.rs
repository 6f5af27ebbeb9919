//! Medical record and session evolution models.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{join_search, new_id, now_rfc3339, text_enum, Entity, Table};

text_enum! {
    /// A patient has at most one active record at a time.
    pub enum RecordStatus {
        Active => "active",
        Discharged => "discharged",
    }
}

/// A patient's clinical record for one course of treatment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicalRecord {
    pub id: String,
    pub patient_id: String,
    pub status: RecordStatus,
    /// Main complaint at admission
    pub chief_complaint: String,
    pub diagnosis: Option<String>,
    /// Clinical history
    pub history: Option<String>,
    pub treatment_goals: Option<String>,
    pub discharge_notes: Option<String>,
    /// Set when the record is discharged
    pub discharged_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NewMedicalRecord {
    pub patient_id: String,
    pub chief_complaint: String,
    pub diagnosis: Option<String>,
    pub history: Option<String>,
    pub treatment_goals: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MedicalRecordPatch {
    pub chief_complaint: Option<String>,
    pub diagnosis: Option<String>,
    pub history: Option<String>,
    pub treatment_goals: Option<String>,
    pub status: Option<RecordStatus>,
    pub discharge_notes: Option<String>,
}

impl MedicalRecord {
    pub fn from_new(new: NewMedicalRecord) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            patient_id: new.patient_id,
            status: RecordStatus::Active,
            chief_complaint: new.chief_complaint,
            diagnosis: new.diagnosis,
            history: new.history,
            treatment_goals: new.treatment_goals,
            discharge_notes: None,
            discharged_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: MedicalRecordPatch) {
        let now = now_rfc3339();
        if let Some(complaint) = patch.chief_complaint {
            self.chief_complaint = complaint;
        }
        if patch.diagnosis.is_some() {
            self.diagnosis = patch.diagnosis;
        }
        if patch.history.is_some() {
            self.history = patch.history;
        }
        if patch.treatment_goals.is_some() {
            self.treatment_goals = patch.treatment_goals;
        }
        if patch.discharge_notes.is_some() {
            self.discharge_notes = patch.discharge_notes;
        }
        if let Some(status) = patch.status {
            if status == RecordStatus::Discharged && self.status == RecordStatus::Active {
                self.discharged_at = Some(now.clone());
            }
            if status == RecordStatus::Active {
                self.discharged_at = None;
            }
            self.status = status;
        }
        self.updated_at = now;
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

impl Entity for MedicalRecord {
    const TABLE: Table = Table::MedicalRecords;

    fn id(&self) -> &str {
        &self.id
    }

    // Newest first.
    fn list_order(a: &Self, b: &Self) -> Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        join_search([Some(self.chief_complaint.as_str()), self.diagnosis.as_deref()])
    }
}

/// Progress note for one session, tied to an active medical record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evolution {
    pub id: String,
    pub patient_id: String,
    pub medical_record_id: String,
    pub session_date: NaiveDate,
    pub notes: String,
    /// 0..=10
    pub progress_score: u8,
    /// 0..=10
    pub pain_level: Option<u8>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewEvolution {
    pub patient_id: String,
    pub medical_record_id: String,
    pub session_date: NaiveDate,
    #[serde(default)]
    pub notes: String,
    pub progress_score: u8,
    #[serde(default)]
    pub pain_level: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvolutionPatch {
    pub session_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub progress_score: Option<u8>,
    pub pain_level: Option<u8>,
}

impl Evolution {
    pub fn from_new(new: NewEvolution) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            patient_id: new.patient_id,
            medical_record_id: new.medical_record_id,
            session_date: new.session_date,
            notes: new.notes,
            progress_score: new.progress_score,
            pain_level: new.pain_level,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: EvolutionPatch) {
        if let Some(date) = patch.session_date {
            self.session_date = date;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
        if let Some(score) = patch.progress_score {
            self.progress_score = score;
        }
        if patch.pain_level.is_some() {
            self.pain_level = patch.pain_level;
        }
        self.updated_at = now_rfc3339();
    }
}

impl Entity for Evolution {
    const TABLE: Table = Table::Evolutions;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        b.session_date
            .cmp(&a.session_date)
            .then_with(|| b.created_at.cmp(&a.created_at))
    }

    fn search_text(&self) -> String {
        self.notes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discharge_sets_timestamp() {
        let mut record = MedicalRecord::from_new(NewMedicalRecord {
            patient_id: "p1".into(),
            chief_complaint: "Low back pain".into(),
            ..Default::default()
        });
        assert!(record.is_active());

        record.apply(MedicalRecordPatch {
            status: Some(RecordStatus::Discharged),
            discharge_notes: Some("Goals met".into()),
            ..Default::default()
        });

        assert!(!record.is_active());
        assert!(record.discharged_at.is_some());
        assert_eq!(record.discharge_notes.as_deref(), Some("Goals met"));
    }

    #[test]
    fn test_reopen_clears_discharge() {
        let mut record = MedicalRecord::from_new(NewMedicalRecord {
            patient_id: "p1".into(),
            chief_complaint: "Neck pain".into(),
            ..Default::default()
        });
        record.apply(MedicalRecordPatch {
            status: Some(RecordStatus::Discharged),
            ..Default::default()
        });
        record.apply(MedicalRecordPatch {
            status: Some(RecordStatus::Active),
            ..Default::default()
        });
        assert!(record.discharged_at.is_none());
    }
}
