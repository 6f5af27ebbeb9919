//! Dashboard statistics.
//!
//! The four figures load concurrently and each one races its own timeout. A
//! figure that fails or times out reads as 0; the others are unaffected.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::{lock, Database, DbResult, SharedDatabase};
use crate::store::StoreError;

pub const DEFAULT_STATS_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsConfig {
    /// Budget for each query
    pub timeout: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_STATS_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub active_patients: u64,
    pub completed_sessions: u64,
    /// Average progress of active treatment plans, 0..=100
    pub progress_rate: u8,
    pub gamification_points: u64,
}

/// Backend answering the dashboard queries.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn active_patients(&self) -> Result<u64, StoreError>;
    async fn completed_sessions(&self) -> Result<u64, StoreError>;
    async fn progress_rate(&self) -> Result<u8, StoreError>;
    async fn gamification_points(&self) -> Result<u64, StoreError>;
}

/// Stats read from the shared database on the blocking pool.
#[derive(Clone)]
pub struct DatabaseStats {
    db: SharedDatabase,
}

impl DatabaseStats {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    async fn query<T: Send + 'static>(
        &self,
        f: fn(&Database) -> DbResult<T>,
    ) -> Result<T, StoreError> {
        let db = self.db.clone();
        let value = tokio::task::spawn_blocking(move || f(&*lock(&db)?)).await??;
        Ok(value)
    }
}

#[async_trait]
impl StatsSource for DatabaseStats {
    async fn active_patients(&self) -> Result<u64, StoreError> {
        self.query(Database::count_active_patients).await
    }

    async fn completed_sessions(&self) -> Result<u64, StoreError> {
        self.query(Database::count_completed_appointments).await
    }

    async fn progress_rate(&self) -> Result<u8, StoreError> {
        self.query(Database::average_active_plan_progress).await
    }

    async fn gamification_points(&self) -> Result<u64, StoreError> {
        self.query(Database::gamification_points).await
    }
}

async fn bounded<T: Default>(
    name: &'static str,
    limit: Duration,
    query: impl Future<Output = Result<T, StoreError>>,
) -> T {
    match tokio::time::timeout(limit, query).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!(stat = name, error = %e, "dashboard query failed");
            T::default()
        }
        Err(_) => {
            warn!(stat = name, timeout_ms = limit.as_millis() as u64, "dashboard query timed out");
            T::default()
        }
    }
}

/// Load all four figures. Never fails.
pub async fn load_dashboard_stats<S: StatsSource + ?Sized>(
    source: &S,
    config: &StatsConfig,
) -> DashboardStats {
    let limit = config.timeout;
    let (active_patients, completed_sessions, progress_rate, gamification_points) = tokio::join!(
        bounded("active_patients", limit, source.active_patients()),
        bounded("completed_sessions", limit, source.completed_sessions()),
        bounded("progress_rate", limit, source.progress_rate()),
        bounded("gamification_points", limit, source.gamification_points()),
    );
    DashboardStats {
        active_patients,
        completed_sessions,
        progress_rate,
        gamification_points,
    }
}
