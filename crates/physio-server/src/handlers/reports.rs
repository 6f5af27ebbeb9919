//! Financial report and printable pre-evaluation.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use physio_core::filter::DateRange;
use physio_core::report::{FinancialReport, PreEvaluationDocument};

use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FinancialParams {
    start: Option<String>,
    end: Option<String>,
    /// `json` (default) or `csv`
    format: Option<String>,
}

fn parse_date(field: &str, value: Option<&str>) -> ApiResult<Option<NaiveDate>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("{field} must be a date (YYYY-MM-DD)"))),
    }
}

pub(crate) async fn financial(
    State(state): State<AppState>,
    Query(params): Query<FinancialParams>,
) -> ApiResult<Response> {
    let range = DateRange::new(
        parse_date("start", params.start.as_deref())?,
        parse_date("end", params.end.as_deref())?,
    );
    if let (Some(start), Some(end)) = (range.start, range.end) {
        if end < start {
            return Err(ApiError::BadRequest("end must not be before start".into()));
        }
    }

    let rows = state
        .blocking(move |db| match (range.start, range.end) {
            (Some(start), Some(end)) => Ok(db.list_financial_transactions_between(start, end)?),
            _ => Ok(db.list_financial_transactions()?),
        })
        .await?;
    let report = FinancialReport::build(&rows, range);

    match params.format.as_deref() {
        None | Some("json") => Ok(Json(report).into_response()),
        Some("csv") => {
            let disposition = format!("attachment; filename=\"{}\"", report.file_name("csv"));
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                report.to_csv(),
            )
                .into_response())
        }
        Some(other) => Err(ApiError::BadRequest(format!("unsupported format: {other}"))),
    }
}

pub(crate) async fn pre_evaluation_print(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let (patient, evaluation) = state
        .blocking(move |db| {
            let evaluation = db
                .get_pre_evaluation(&id)?
                .ok_or_else(|| ApiError::NotFound(format!("pre-evaluation {id}")))?;
            let patient = db
                .get_patient(&evaluation.patient_id)?
                .ok_or_else(|| ApiError::NotFound(format!("patient {}", evaluation.patient_id)))?;
            Ok((patient, evaluation))
        })
        .await?;

    let doc = PreEvaluationDocument::new(&patient, &evaluation, chrono::Utc::now().date_naive());
    let disposition = format!("inline; filename=\"{}\"", doc.file_name("html"));
    Ok((
        [(header::CONTENT_DISPOSITION, disposition)],
        Html(doc.to_html()),
    )
        .into_response())
}
