//! Exercise library and treatment plan models.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{join_search, new_id, now_rfc3339, text_enum, Entity, Table};

text_enum! {
    pub enum Difficulty {
        Beginner => "beginner",
        Intermediate => "intermediate",
        Advanced => "advanced",
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty::Beginner
    }
}

text_enum! {
    pub enum PlanStatus {
        Active => "active",
        Paused => "paused",
        Completed => "completed",
    }
}

impl Default for PlanStatus {
    fn default() -> Self {
        PlanStatus::Active
    }
}

/// An exercise in the clinic's library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exercise {
    pub id: String,
    pub name: String,
    /// Body region or goal (mobility, strength...)
    pub category: Option<String>,
    pub description: Option<String>,
    pub difficulty: Difficulty,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NewExercise {
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExercisePatch {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub is_active: Option<bool>,
}

impl Exercise {
    pub fn from_new(new: NewExercise) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            name: new.name,
            category: new.category,
            description: new.description,
            difficulty: new.difficulty,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: ExercisePatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if patch.category.is_some() {
            self.category = patch.category;
        }
        if patch.description.is_some() {
            self.description = patch.description;
        }
        if let Some(difficulty) = patch.difficulty {
            self.difficulty = difficulty;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        self.updated_at = now_rfc3339();
    }
}

impl Entity for Exercise {
    const TABLE: Table = Table::Exercises;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        join_search([
            Some(self.name.as_str()),
            self.category.as_deref(),
            self.description.as_deref(),
        ])
    }
}

/// A patient's treatment plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreatmentPlan {
    pub id: String,
    pub patient_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// 0..=100
    pub progress_percentage: u8,
    pub status: PlanStatus,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTreatmentPlan {
    pub patient_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TreatmentPlanPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub progress_percentage: Option<u8>,
    pub status: Option<PlanStatus>,
    pub is_active: Option<bool>,
}

impl TreatmentPlan {
    pub fn from_new(new: NewTreatmentPlan) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            patient_id: new.patient_id,
            title: new.title,
            description: new.description,
            start_date: new.start_date,
            end_date: new.end_date,
            progress_percentage: 0,
            status: PlanStatus::Active,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: TreatmentPlanPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if patch.description.is_some() {
            self.description = patch.description;
        }
        if let Some(start) = patch.start_date {
            self.start_date = start;
        }
        if patch.end_date.is_some() {
            self.end_date = patch.end_date;
        }
        if let Some(progress) = patch.progress_percentage {
            self.progress_percentage = progress.min(100);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        self.updated_at = now_rfc3339();
    }
}

impl Entity for TreatmentPlan {
    const TABLE: Table = Table::TreatmentPlans;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        b.start_date
            .cmp(&a.start_date)
            .then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        join_search([Some(self.title.as_str()), self.description.as_deref()])
    }
}

/// An exercise prescribed within a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanExercise {
    pub id: String,
    pub plan_id: String,
    pub exercise_id: String,
    /// Exercise name, joined from exercises on list
    #[serde(default)]
    pub exercise_name: Option<String>,
    pub sets: u32,
    pub repetitions: u32,
    /// e.g. "3x per week"
    pub frequency: Option<String>,
    pub completed: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPlanExercise {
    pub plan_id: String,
    pub exercise_id: String,
    #[serde(default = "default_sets")]
    pub sets: u32,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default)]
    pub frequency: Option<String>,
}

fn default_sets() -> u32 {
    3
}

fn default_repetitions() -> u32 {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanExercisePatch {
    pub sets: Option<u32>,
    pub repetitions: Option<u32>,
    pub frequency: Option<String>,
    pub completed: Option<bool>,
}

impl PlanExercise {
    pub fn from_new(new: NewPlanExercise) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            plan_id: new.plan_id,
            exercise_id: new.exercise_id,
            exercise_name: None,
            sets: new.sets,
            repetitions: new.repetitions,
            frequency: new.frequency,
            completed: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: PlanExercisePatch) {
        if let Some(sets) = patch.sets {
            self.sets = sets;
        }
        if let Some(reps) = patch.repetitions {
            self.repetitions = reps;
        }
        if patch.frequency.is_some() {
            self.frequency = patch.frequency;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        self.updated_at = now_rfc3339();
    }
}

impl Entity for PlanExercise {
    const TABLE: Table = Table::PlanExercises;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        a.plan_id
            .cmp(&b.plan_id)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        join_search([self.exercise_name.as_deref(), self.frequency.as_deref()])
    }
}

/// Plan progress as the rounded share of completed exercises.
pub fn plan_progress(exercises: &[PlanExercise]) -> u8 {
    if exercises.is_empty() {
        return 0;
    }
    let done = exercises.iter().filter(|e| e.completed).count();
    ((done as f64 / exercises.len() as f64) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(completed: bool) -> PlanExercise {
        let mut e = PlanExercise::from_new(NewPlanExercise {
            plan_id: "plan".into(),
            exercise_id: "ex".into(),
            sets: 3,
            repetitions: 10,
            frequency: None,
        });
        e.completed = completed;
        e
    }

    #[test]
    fn test_plan_progress() {
        assert_eq!(plan_progress(&[]), 0);
        assert_eq!(
            plan_progress(&[exercise(true), exercise(false), exercise(false)]),
            33
        );
        assert_eq!(plan_progress(&[exercise(true), exercise(true)]), 100);
    }

    #[test]
    fn test_progress_patch_is_clamped() {
        let mut plan = TreatmentPlan::from_new(NewTreatmentPlan {
            patient_id: "p1".into(),
            title: "Knee rehab".into(),
            description: None,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            end_date: None,
        });
        plan.apply(TreatmentPlanPatch {
            progress_percentage: Some(140),
            ..Default::default()
        });
        assert_eq!(plan.progress_percentage, 100);
    }
}
