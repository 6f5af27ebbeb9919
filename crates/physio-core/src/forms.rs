//! Typed input forms and the dialog that submits them.
//!
//! A form holds raw field input the way a user typed it, validates all of it
//! at once, and only then produces the insert payload a store accepts.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::auth::{Credentials, NewStaffUser};
use crate::models::{
    AppointmentStatus, NewAppointment, NewEvolution, NewFinancialTransaction, NewMedicalRecord,
    NewPatient, NewPreEvaluation, NewTreatmentPlan, PatientStatus, StaffRole, TransactionKind,
};
use crate::store::MutationResult;
use crate::validation::{self as check, ValidationErrors};

/// Minimum password length for staff and portal accounts.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Input that validates into a payload.
pub trait Form {
    type Output;

    /// Every field error at once, or the payload.
    fn validate(&self) -> Result<Self::Output, ValidationErrors>;
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_date(errs: &mut ValidationErrors, field: &str, value: &str) -> Option<NaiveDate> {
    if value.trim().is_empty() {
        errs.add(field, "is required");
        return None;
    }
    match NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errs.add(field, "must be a date (YYYY-MM-DD)");
            None
        }
    }
}

fn parse_optional_date(
    errs: &mut ValidationErrors,
    field: &str,
    value: &Option<String>,
) -> Option<NaiveDate> {
    trimmed(value).and_then(|v| parse_date(errs, field, &v))
}

/// Money as typed: `150`, `150.5` or `150,50`.
fn parse_amount(errs: &mut ValidationErrors, field: &str, value: &str) -> Option<f64> {
    match value.trim().replace(',', ".").parse::<f64>() {
        Ok(amount) if amount.is_finite() && amount > 0.0 => Some(amount),
        Ok(_) => {
            errs.add(field, "must be greater than zero");
            None
        }
        Err(_) => {
            errs.add(field, "must be a number");
            None
        }
    }
}

// =========================================================================
// Patients and scheduling
// =========================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PatientForm {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    pub birth_date: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub emergency_phone: Option<String>,
    pub notes: Option<String>,
    pub status: Option<PatientStatus>,
}

impl Form for PatientForm {
    type Output = NewPatient;

    fn validate(&self) -> Result<NewPatient, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check::require(&mut errs, "name", &self.name);
        check::min_len(&mut errs, "name", &self.name, 2);
        check::optional_email(&mut errs, "email", self.email.as_deref());
        check::cpf(&mut errs, "cpf", self.cpf.as_deref());
        let birth_date = parse_optional_date(&mut errs, "birth_date", &self.birth_date);
        if let Some(date) = birth_date {
            if date > chrono::Utc::now().date_naive() {
                errs.add("birth_date", "cannot be in the future");
            }
        }

        errs.into_result(NewPatient {
            name: self.name.trim().to_string(),
            email: trimmed(&self.email),
            phone: trimmed(&self.phone),
            cpf: trimmed(&self.cpf).map(|c| check::format_cpf(&c)),
            birth_date,
            address: trimmed(&self.address),
            emergency_contact: trimmed(&self.emergency_contact),
            emergency_phone: trimmed(&self.emergency_phone),
            notes: trimmed(&self.notes),
            status: self.status.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppointmentForm {
    pub patient_id: String,
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub duration_minutes: Option<u32>,
    pub kind: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
}

impl Form for AppointmentForm {
    type Output = NewAppointment;

    fn validate(&self) -> Result<NewAppointment, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check::require(&mut errs, "patient_id", &self.patient_id);
        let date = parse_date(&mut errs, "date", &self.date);
        if NaiveTime::parse_from_str(self.time.trim(), "%H:%M").is_err() {
            errs.add("time", "must be a time (HH:MM)");
        }
        let duration = self.duration_minutes.unwrap_or(60);
        check::range(&mut errs, "duration_minutes", duration, 5, 480);

        let date = match date {
            Some(date) if errs.is_empty() => date,
            _ => return Err(errs),
        };
        Ok(NewAppointment {
            patient_id: self.patient_id.trim().to_string(),
            date,
            time: self.time.trim().to_string(),
            duration_minutes: duration,
            kind: trimmed(&self.kind),
            status: self.status.unwrap_or_default(),
            notes: trimmed(&self.notes),
        })
    }
}

// =========================================================================
// Clinical
// =========================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MedicalRecordForm {
    pub patient_id: String,
    pub chief_complaint: String,
    pub diagnosis: Option<String>,
    pub history: Option<String>,
    pub treatment_goals: Option<String>,
}

impl Form for MedicalRecordForm {
    type Output = NewMedicalRecord;

    fn validate(&self) -> Result<NewMedicalRecord, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check::require(&mut errs, "patient_id", &self.patient_id);
        check::require(&mut errs, "chief_complaint", &self.chief_complaint);
        errs.into_result(NewMedicalRecord {
            patient_id: self.patient_id.trim().to_string(),
            chief_complaint: self.chief_complaint.trim().to_string(),
            diagnosis: trimmed(&self.diagnosis),
            history: trimmed(&self.history),
            treatment_goals: trimmed(&self.treatment_goals),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvolutionForm {
    pub patient_id: String,
    pub medical_record_id: String,
    pub session_date: String,
    pub notes: String,
    pub progress_score: Option<u8>,
    pub pain_level: Option<u8>,
}

impl Form for EvolutionForm {
    type Output = NewEvolution;

    fn validate(&self) -> Result<NewEvolution, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check::require(&mut errs, "patient_id", &self.patient_id);
        check::require(&mut errs, "medical_record_id", &self.medical_record_id);
        let session_date = parse_date(&mut errs, "session_date", &self.session_date);
        check::min_len(&mut errs, "notes", &self.notes, 10);
        match self.progress_score {
            Some(score) => check::range(&mut errs, "progress_score", score, 0, 10),
            None => errs.add("progress_score", "is required"),
        }
        if let Some(pain) = self.pain_level {
            check::range(&mut errs, "pain_level", pain, 0, 10);
        }

        match (session_date, self.progress_score) {
            (Some(session_date), Some(progress_score)) if errs.is_empty() => Ok(NewEvolution {
                patient_id: self.patient_id.trim().to_string(),
                medical_record_id: self.medical_record_id.trim().to_string(),
                session_date,
                notes: self.notes.trim().to_string(),
                progress_score,
                pain_level: self.pain_level,
            }),
            _ => Err(errs),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TreatmentPlanForm {
    pub patient_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: String,
    pub end_date: Option<String>,
}

impl Form for TreatmentPlanForm {
    type Output = NewTreatmentPlan;

    fn validate(&self) -> Result<NewTreatmentPlan, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check::require(&mut errs, "patient_id", &self.patient_id);
        check::min_len(&mut errs, "title", &self.title, 3);
        let start_date = parse_date(&mut errs, "start_date", &self.start_date);
        let end_date = parse_optional_date(&mut errs, "end_date", &self.end_date);
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if end < start {
                errs.add("end_date", "must not be before the start date");
            }
        }

        match start_date {
            Some(start_date) if errs.is_empty() => Ok(NewTreatmentPlan {
                patient_id: self.patient_id.trim().to_string(),
                title: self.title.trim().to_string(),
                description: trimmed(&self.description),
                start_date,
                end_date,
            }),
            _ => Err(errs),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreEvaluationForm {
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

impl Form for PreEvaluationForm {
    type Output = NewPreEvaluation;

    fn validate(&self) -> Result<NewPreEvaluation, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check::require(&mut errs, "patient_id", &self.patient_id);
        if let Some(pain) = self.pain_intensity {
            check::range(&mut errs, "pain_intensity", pain, 0, 10);
        }
        errs.into_result(NewPreEvaluation {
            patient_id: self.patient_id.trim().to_string(),
            chief_complaint: trimmed(&self.chief_complaint),
            pain_location: trimmed(&self.pain_location),
            pain_intensity: self.pain_intensity,
            symptom_duration: trimmed(&self.symptom_duration),
            medical_history: trimmed(&self.medical_history),
            medications: trimmed(&self.medications),
            previous_treatments: trimmed(&self.previous_treatments),
            lifestyle: trimmed(&self.lifestyle),
            goals: trimmed(&self.goals),
            observations: trimmed(&self.observations),
        })
    }
}

// =========================================================================
// Finance
// =========================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FinancialTransactionForm {
    pub kind: Option<TransactionKind>,
    /// As typed; a decimal comma is accepted
    pub amount: String,
    pub description: String,
    pub category_id: Option<String>,
    pub patient_id: Option<String>,
    pub date: String,
    pub payment_method: Option<String>,
}

impl Form for FinancialTransactionForm {
    type Output = NewFinancialTransaction;

    fn validate(&self) -> Result<NewFinancialTransaction, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        if self.kind.is_none() {
            errs.add("kind", "is required");
        }
        let amount = parse_amount(&mut errs, "amount", &self.amount);
        check::require(&mut errs, "description", &self.description);
        let date = parse_date(&mut errs, "date", &self.date);

        match (self.kind, amount, date) {
            (Some(kind), Some(amount), Some(date)) if errs.is_empty() => {
                Ok(NewFinancialTransaction {
                    kind,
                    amount,
                    description: self.description.trim().to_string(),
                    category_id: trimmed(&self.category_id),
                    patient_id: trimmed(&self.patient_id),
                    date,
                    payment_method: trimmed(&self.payment_method),
                })
            }
            _ => Err(errs),
        }
    }
}

// =========================================================================
// Accounts
// =========================================================================

/// Self-service staff sign-up. Always yields the default role; a `role`
/// in the request body is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Form for RegistrationForm {
    type Output = NewStaffUser;

    fn validate(&self) -> Result<NewStaffUser, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check::require(&mut errs, "name", &self.name);
        check::email(&mut errs, "email", &self.email);
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errs.add(
                "password",
                format!("must have at least {MIN_PASSWORD_LEN} characters"),
            );
        }
        errs.into_result(NewStaffUser {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password.clone(),
            role: StaffRole::default(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl Form for LoginForm {
    type Output = Credentials;

    fn validate(&self) -> Result<Credentials, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check::email(&mut errs, "email", &self.email);
        check::require(&mut errs, "password", &self.password);
        errs.into_result(Credentials {
            email: self.email.trim().to_string(),
            password: self.password.clone(),
        })
    }
}

// =========================================================================
// Dialog
// =========================================================================

/// Result of [`FormDialog::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome<T> {
    /// The mutation succeeded; the dialog closed and the form was reset.
    Done(Option<T>),
    /// Validation failed; nothing was sent.
    Invalid(ValidationErrors),
    /// The mutation failed; the dialog stays open with its values.
    Failed(String),
    /// Another submission is still running.
    Busy,
}

/// Open/submitting state around one form.
pub struct FormDialog<F> {
    form: Mutex<F>,
    open: AtomicBool,
    submitting: AtomicBool,
}

struct SubmittingGuard<'a>(&'a AtomicBool);

impl Drop for SubmittingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<F: Form + Clone + Default> FormDialog<F> {
    pub fn new(form: F) -> Self {
        Self {
            form: Mutex::new(form),
            open: AtomicBool::new(false),
            submitting: AtomicBool::new(false),
        }
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::SeqCst)
    }

    /// Current field values.
    pub fn form(&self) -> F {
        self.form
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn edit(&self, change: impl FnOnce(&mut F)) {
        change(&mut self.form.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Validate and run exactly one mutation.
    ///
    /// Closes and resets only when the mutation reports success. A second
    /// call while one is in flight returns [`SubmitOutcome::Busy`].
    pub async fn submit<T, Fut>(&self, action: impl FnOnce(F::Output) -> Fut) -> SubmitOutcome<T>
    where
        Fut: Future<Output = MutationResult<T>>,
    {
        if self.submitting.swap(true, Ordering::SeqCst) {
            return SubmitOutcome::Busy;
        }
        let _guard = SubmittingGuard(&self.submitting);

        let payload = match self.form().validate() {
            Ok(payload) => payload,
            Err(errs) => return SubmitOutcome::Invalid(errs),
        };

        let result = action(payload).await;
        if result.success {
            *self.form.lock().unwrap_or_else(PoisonError::into_inner) = F::default();
            self.close();
            SubmitOutcome::Done(result.data)
        } else {
            SubmitOutcome::Failed(result.error.unwrap_or_else(|| "unknown error".into()))
        }
    }
}
