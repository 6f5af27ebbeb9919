//! Domain models for the physio clinic.

mod access;
mod appointment;
mod financial;
mod package;
mod patient;
mod plan;
mod pre_evaluation;
mod record;

pub use access::*;
pub use appointment::*;
pub use financial::*;
pub use package::*;
pub use patient::*;
pub use plan::*;
pub use pre_evaluation::*;
pub use record::*;

use std::cmp::Ordering;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stored text value did not name any variant of the enum.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a snake_case text enum with `as_str`, `Display` and `FromStr`.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Stored text form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    _ => Err($crate::models::UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use text_enum;

/// Backend tables that publish change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Patients,
    Appointments,
    MedicalRecords,
    Evolutions,
    Exercises,
    TreatmentPlans,
    PlanExercises,
    Packages,
    PackageProposals,
    PatientPackages,
    FinancialCategories,
    FinancialTransactions,
    PreEvaluations,
}

impl Table {
    pub const COUNT: usize = 13;

    /// SQL table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Patients => "patients",
            Table::Appointments => "appointments",
            Table::MedicalRecords => "medical_records",
            Table::Evolutions => "evolutions",
            Table::Exercises => "exercises",
            Table::TreatmentPlans => "treatment_plans",
            Table::PlanExercises => "plan_exercises",
            Table::Packages => "packages",
            Table::PackageProposals => "package_proposals",
            Table::PatientPackages => "patient_packages",
            Table::FinancialCategories => "financial_categories",
            Table::FinancialTransactions => "financial_transactions",
            Table::PreEvaluations => "pre_evaluations",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row mirrored from a backend table.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Table the row lives in.
    const TABLE: Table;

    /// Primary key.
    fn id(&self) -> &str;

    /// Ordering used by the table's list query.
    fn list_order(a: &Self, b: &Self) -> Ordering;

    /// Text matched by list filters.
    fn search_text(&self) -> String {
        String::new()
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Join the present parts of a search text with spaces.
pub(crate) fn join_search<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
