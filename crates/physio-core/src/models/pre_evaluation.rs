//! Pre-evaluation questionnaire filled before the first session.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::{new_id, now_rfc3339, Entity, Table};

/// Intake questionnaire. Every clinical field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PreEvaluation {
    pub id: String,
    pub patient_id: String,
    pub chief_complaint: Option<String>,
    pub pain_location: Option<String>,
    /// 0..=10
    pub pain_intensity: Option<u8>,
    pub symptom_duration: Option<String>,
    pub medical_history: Option<String>,
    pub medications: Option<String>,
    pub previous_treatments: Option<String>,
    pub lifestyle: Option<String>,
    pub goals: Option<String>,
    pub observations: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NewPreEvaluation {
    pub patient_id: String,
    pub chief_complaint: Option<String>,
    pub pain_location: Option<String>,
    pub pain_intensity: Option<u8>,
    pub symptom_duration: Option<String>,
    pub medical_history: Option<String>,
    pub medications: Option<String>,
    pub previous_treatments: Option<String>,
    pub lifestyle: Option<String>,
    pub goals: Option<String>,
    pub observations: Option<String>,
}

/// Partial update. Same shape as the insert payload minus the patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreEvaluationPatch {
    pub chief_complaint: Option<String>,
    pub pain_location: Option<String>,
    pub pain_intensity: Option<u8>,
    pub symptom_duration: Option<String>,
    pub medical_history: Option<String>,
    pub medications: Option<String>,
    pub previous_treatments: Option<String>,
    pub lifestyle: Option<String>,
    pub goals: Option<String>,
    pub observations: Option<String>,
}

impl PreEvaluation {
    pub fn from_new(new: NewPreEvaluation) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            patient_id: new.patient_id,
            chief_complaint: new.chief_complaint,
            pain_location: new.pain_location,
            pain_intensity: new.pain_intensity,
            symptom_duration: new.symptom_duration,
            medical_history: new.medical_history,
            medications: new.medications,
            previous_treatments: new.previous_treatments,
            lifestyle: new.lifestyle,
            goals: new.goals,
            observations: new.observations,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: PreEvaluationPatch) {
        fn set<T>(field: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *field = value;
            }
        }
        set(&mut self.chief_complaint, patch.chief_complaint);
        set(&mut self.pain_location, patch.pain_location);
        set(&mut self.pain_intensity, patch.pain_intensity);
        set(&mut self.symptom_duration, patch.symptom_duration);
        set(&mut self.medical_history, patch.medical_history);
        set(&mut self.medications, patch.medications);
        set(&mut self.previous_treatments, patch.previous_treatments);
        set(&mut self.lifestyle, patch.lifestyle);
        set(&mut self.goals, patch.goals);
        set(&mut self.observations, patch.observations);
        self.updated_at = now_rfc3339();
    }
}

impl Entity for PreEvaluation {
    const TABLE: Table = Table::PreEvaluations;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        self.chief_complaint.clone().unwrap_or_default()
    }
}
