//! Registration, login and logout.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};

use physio_core::forms::{Form, LoginForm, RegistrationForm, MIN_PASSWORD_LEN};
use physio_core::models::PatientAccess;
use physio_core::validation::ValidationErrors;

use crate::middleware::bearer_token;
use crate::{ApiError, ApiJson, ApiResult, AppState};

pub(crate) async fn register(
    State(state): State<AppState>,
    ApiJson(form): ApiJson<RegistrationForm>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let new = form.validate()?;
    let auth = state.auth.clone();
    let user = state
        .blocking(move |db| Ok(auth.register_staff(db, new)?))
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "user": user }))))
}

pub(crate) async fn login(
    State(state): State<AppState>,
    ApiJson(form): ApiJson<LoginForm>,
) -> ApiResult<Json<Value>> {
    let creds = form.validate()?;
    let auth = state.auth.clone();
    let (session, user) = state
        .blocking(move |db| Ok(auth.login_staff(db, &creds)?))
        .await?;
    Ok(Json(json!({
        "token": session.token,
        "user": user,
        "expires_at": session.expires_at,
    })))
}

pub(crate) async fn patient_login(
    State(state): State<AppState>,
    ApiJson(form): ApiJson<LoginForm>,
) -> ApiResult<Json<Value>> {
    let creds = form.validate()?;
    let auth = state.auth.clone();
    let (session, patient) = state
        .blocking(move |db| {
            let (session, access) = auth.login_patient(db, &creds)?;
            let patient = db
                .get_patient(&access.patient_id)?
                .ok_or_else(|| ApiError::NotFound(format!("patient {}", access.patient_id)))?;
            Ok((session, patient))
        })
        .await?;
    Ok(Json(json!({
        "token": session.token,
        "patient": patient,
        "expires_at": session.expires_at,
    })))
}

/// Give a patient portal credentials.
pub(crate) async fn grant_access(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    ApiJson(form): ApiJson<LoginForm>,
) -> ApiResult<(StatusCode, Json<PatientAccess>)> {
    let creds = form.validate()?;
    if creds.password.chars().count() < MIN_PASSWORD_LEN {
        let mut errs = ValidationErrors::new();
        errs.add(
            "password",
            format!("must have at least {MIN_PASSWORD_LEN} characters"),
        );
        return Err(errs.into());
    }
    let auth = state.auth.clone();
    let access = state
        .blocking(move |db| Ok(auth.grant_patient_access(db, &patient_id, &creds)?))
        .await?;
    Ok((StatusCode::CREATED, Json(access)))
}

pub(crate) async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
    let auth = state.auth.clone();
    state
        .blocking(move |db| Ok(auth.logout(db, &token)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
