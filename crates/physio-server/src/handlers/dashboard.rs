use axum::extract::State;
use axum::Json;

use physio_core::stats::{load_dashboard_stats, DashboardStats, DatabaseStats};

use crate::AppState;

pub(crate) async fn stats(State(state): State<AppState>) -> Json<DashboardStats> {
    let source = DatabaseStats::new(state.db.clone());
    Json(load_dashboard_stats(&source, &state.config.stats()).await)
}
