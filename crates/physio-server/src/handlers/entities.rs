//! Generic list/create/update/delete handlers over a table.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use physio_core::db::DbError;
use physio_core::filter::TextFilter;
use physio_core::forms::Form;
use physio_core::repo::TableOps;

use crate::{ApiJson, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListParams {
    /// Accent-insensitive text search over the row's searchable fields
    q: Option<String>,
}

pub(crate) async fn list<T: TableOps>(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<T>>> {
    let rows = state.blocking(|db| Ok(T::list(db)?)).await?;
    let rows = match params.q.as_deref().map(TextFilter::new) {
        Some(filter) if !filter.is_empty() => filter.apply(&rows).into_iter().cloned().collect(),
        _ => rows,
    };
    Ok(Json(rows))
}

pub(crate) async fn create<T, F>(
    State(state): State<AppState>,
    ApiJson(form): ApiJson<F>,
) -> ApiResult<(StatusCode, Json<T>)>
where
    T: TableOps,
    F: Form<Output = T::New> + DeserializeOwned + Send,
{
    let new = form.validate()?;
    let row = state.blocking(move |db| Ok(T::insert(db, new)?)).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub(crate) async fn update<T>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<T::Patch>,
) -> ApiResult<Json<T>>
where
    T: TableOps,
    T::Patch: DeserializeOwned,
{
    let row = state.blocking(move |db| Ok(T::update(db, &id, patch)?)).await?;
    Ok(Json(row))
}

/// Soft delete where the table has an active flag, hard delete otherwise.
pub(crate) async fn remove<T: TableOps>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .blocking(move |db| match T::deactivate(db, &id) {
            Ok(_) => Ok(()),
            Err(DbError::Unsupported(_)) => Ok(T::delete(db, &id)?),
            Err(e) => Err(e.into()),
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
