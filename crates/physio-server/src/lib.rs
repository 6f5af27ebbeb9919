//! HTTP API for the physio clinic backend.
//!
//! Thin axum layer over [`physio_core`]: forms validate request bodies,
//! database work runs on the blocking pool, and every failure maps to an
//! [`ApiError`] with a JSON `{"error": ...}` body.

pub mod config;
pub mod error;
mod handlers;
mod middleware;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRequest, Request};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use physio_core::db::{lock, Database, SharedDatabase};
use physio_core::forms::{
    AppointmentForm, FinancialTransactionForm, PatientForm, PreEvaluationForm, TreatmentPlanForm,
};
use physio_core::models::{Appointment, FinancialTransaction, Patient, PreEvaluation, TreatmentPlan};
use physio_core::Authenticator;

use handlers::{auth, dashboard, entities, reports};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: SharedDatabase,
    pub auth: Authenticator,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: SharedDatabase, config: ServerConfig) -> Self {
        Self {
            db,
            auth: Authenticator::new(config.auth()),
            config: Arc::new(config),
        }
    }

    /// Run `f` against the locked database on the blocking pool.
    pub async fn blocking<T, F>(&self, f: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> ApiResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&db)?;
            f(&guard)
        })
        .await?
    }
}

/// JSON body whose rejection is an [`ApiError`] (400 with a JSON body).
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/api/patients",
            get(entities::list::<Patient>).post(entities::create::<Patient, PatientForm>),
        )
        .route(
            "/api/patients/:id",
            patch(entities::update::<Patient>).delete(entities::remove::<Patient>),
        )
        .route("/api/patients/:id/access", post(auth::grant_access))
        .route(
            "/api/appointments",
            get(entities::list::<Appointment>)
                .post(entities::create::<Appointment, AppointmentForm>),
        )
        .route(
            "/api/appointments/:id",
            patch(entities::update::<Appointment>).delete(entities::remove::<Appointment>),
        )
        .route(
            "/api/treatment-plans",
            get(entities::list::<TreatmentPlan>)
                .post(entities::create::<TreatmentPlan, TreatmentPlanForm>),
        )
        .route(
            "/api/treatment-plans/:id",
            patch(entities::update::<TreatmentPlan>).delete(entities::remove::<TreatmentPlan>),
        )
        .route(
            "/api/financial-transactions",
            get(entities::list::<FinancialTransaction>)
                .post(entities::create::<FinancialTransaction, FinancialTransactionForm>),
        )
        .route(
            "/api/financial-transactions/:id",
            patch(entities::update::<FinancialTransaction>)
                .delete(entities::remove::<FinancialTransaction>),
        )
        .route(
            "/api/pre-evaluations",
            get(entities::list::<PreEvaluation>)
                .post(entities::create::<PreEvaluation, PreEvaluationForm>),
        )
        .route(
            "/api/pre-evaluations/:id/print",
            get(reports::pre_evaluation_print),
        )
        .route("/api/dashboard/stats", get(dashboard::stats))
        .route("/api/reports/financial", get(reports::financial))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_staff_session,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/patient", post(auth::patient_login))
        .route("/api/auth/logout", post(auth::logout))
        .merge(protected)
        .with_state(state)
}

/// Periodically delete expired sessions until the handle is aborted.
pub fn spawn_session_purge(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let purged = state
                .blocking(|db| Ok(db.purge_expired_sessions(chrono::Utc::now())?))
                .await;
            match purged {
                Ok(0) => {}
                Ok(n) => debug!(purged = n, "expired sessions removed"),
                Err(e) => warn!(error = %e, "session purge failed"),
            }
        }
    })
}
