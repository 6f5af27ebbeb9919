//! Appointment models.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{join_search, new_id, now_rfc3339, text_enum, Entity, Table};

text_enum! {
    /// Appointment status. Any update may set any status.
    pub enum AppointmentStatus {
        Scheduled => "scheduled",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
    }
}

impl Default for AppointmentStatus {
    fn default() -> Self {
        AppointmentStatus::Scheduled
    }
}

/// A scheduled session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    /// Patient name, joined from patients on list
    #[serde(default)]
    pub patient_name: Option<String>,
    pub date: NaiveDate,
    /// Start time, HH:MM
    pub time: String,
    pub duration_minutes: u32,
    /// Session type (evaluation, session, reassessment...)
    pub kind: Option<String>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Insert payload for an appointment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAppointment {
    pub patient_id: String,
    pub date: NaiveDate,
    pub time: String,
    #[serde(default = "default_duration")]
    pub duration_minutes: u32,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_duration() -> u32 {
    60
}

/// Partial update for an appointment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppointmentPatch {
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub duration_minutes: Option<u32>,
    pub kind: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
}

impl Appointment {
    pub fn from_new(new: NewAppointment) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            patient_id: new.patient_id,
            patient_name: None,
            date: new.date,
            time: new.time,
            duration_minutes: new.duration_minutes,
            kind: new.kind,
            status: new.status,
            notes: new.notes,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: AppointmentPatch) {
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(time) = patch.time {
            self.time = time;
        }
        if let Some(duration) = patch.duration_minutes {
            self.duration_minutes = duration;
        }
        if patch.kind.is_some() {
            self.kind = patch.kind;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if patch.notes.is_some() {
            self.notes = patch.notes;
        }
        self.updated_at = now_rfc3339();
    }
}

impl Entity for Appointment {
    const TABLE: Table = Table::Appointments;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        a.date
            .cmp(&b.date)
            .then_with(|| a.time.cmp(&b.time))
            .then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        join_search([
            self.patient_name.as_deref(),
            self.kind.as_deref(),
            self.notes.as_deref(),
        ])
    }
}
