//! Physio Clinic Core Library
//!
//! Records, scheduling, treatment plans and finance for a physiotherapy
//! clinic, backed by one SQLite database with a change feed.
//!
//! # Architecture
//!
//! ```text
//!   Form ──validate──▶ EntityStore ──spawn_blocking──▶ Repository ──▶ Database
//!                          ▲  │                                         │
//!                          │  └─ optimistic apply (seq) ◀───────────────┤
//!                          │                                            │
//!                          └──── Subscription ◀──── ChangeFeed ◀────────┘
//!                                 (patch by id, refetch on gap)
//! ```
//!
//! Every committed mutation gets a per-table sequence number. Stores apply
//! their own confirmed writes immediately and drop any feed event they have
//! already seen, so both paths converge on the same rows.
//!
//! # Modules
//!
//! - [`db`]: SQLite schema and per-table queries
//! - [`models`]: Domain types (Patient, Appointment, TreatmentPlan, ...)
//! - [`feed`]: Per-table change notifications
//! - [`repo`]: Blocking CRUD seam used by stores
//! - [`store`]: Generic reconciling entity cache
//! - [`forms`] and [`validation`]: Typed input and field errors
//! - [`filter`]: Text and date-range list filters
//! - [`report`]: Pre-evaluation document and financial report
//! - [`stats`]: Dashboard figures
//! - [`auth`] and [`session`]: Server-side login, client-side session state

pub mod auth;
pub mod db;
pub mod feed;
pub mod filter;
pub mod forms;
pub mod models;
pub mod report;
pub mod repo;
pub mod session;
pub mod stats;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use auth::{AuthConfig, AuthError, Authenticator, Credentials, NewStaffUser};
pub use db::{Database, DbError, DbResult, SharedDatabase};
pub use feed::{ChangeEvent, ChangeFeed, ChangeKind, RowFilter};
pub use forms::{Form, FormDialog, SubmitOutcome};
pub use models::{
    Appointment, Entity, Evolution, Exercise, FinancialCategory, FinancialTransaction,
    MedicalRecord, Package, PackageProposal, Patient, PlanExercise, PreEvaluation, Table,
    TreatmentPlan,
};
pub use repo::{Repository, SqliteRepository};
pub use session::{FileSessionStore, MemorySessionStore, SessionManager, SessionStore};
pub use stats::{load_dashboard_stats, DashboardStats, DatabaseStats, StatsConfig};
pub use store::{EntityStore, MutationResult, StoreConfig, SubscriptionState};
pub use validation::ValidationErrors;

/// Store for one table of the shared database.
pub type SqliteStore<T> = EntityStore<SqliteRepository<T>>;

pub type PatientStore = SqliteStore<Patient>;
pub type AppointmentStore = SqliteStore<Appointment>;
pub type MedicalRecordStore = SqliteStore<MedicalRecord>;
pub type EvolutionStore = SqliteStore<Evolution>;
pub type ExerciseStore = SqliteStore<Exercise>;
pub type TreatmentPlanStore = SqliteStore<TreatmentPlan>;
pub type PlanExerciseStore = SqliteStore<PlanExercise>;
pub type PackageStore = SqliteStore<Package>;
pub type PackageProposalStore = SqliteStore<PackageProposal>;
pub type FinancialCategoryStore = SqliteStore<FinancialCategory>;
pub type FinancialTransactionStore = SqliteStore<FinancialTransaction>;
pub type PreEvaluationStore = SqliteStore<PreEvaluation>;
