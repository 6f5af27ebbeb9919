//! HTTP round trips through the full router.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use physio_core::Database;
use physio_server::{build_router, AppState, ServerConfig};

fn app(require_auth: bool) -> Router {
    let config = ServerConfig {
        require_auth,
        pbkdf2_iterations: 10,
        ..Default::default()
    };
    let db = Database::open_in_memory().unwrap().into_shared();
    build_router(AppState::new(db, config))
}

struct Reply {
    status: StatusCode,
    content_type: Option<String>,
    text: String,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_str(&self.text).unwrap()
    }
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<&str>,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    Reply {
        status,
        content_type,
        text: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

async fn post(app: &Router, uri: &str, token: Option<&str>, body: Value) -> Reply {
    send(app, Method::POST, uri, token, Some(&body.to_string())).await
}

async fn get(app: &Router, uri: &str, token: Option<&str>) -> Reply {
    send(app, Method::GET, uri, token, None).await
}

async fn create_patient(app: &Router, token: Option<&str>, name: &str) -> String {
    let reply = post(app, "/api/patients", token, json!({ "name": name })).await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.text);
    reply.json()["id"].as_str().unwrap().to_string()
}

async fn staff_token(app: &Router) -> String {
    let reply = post(
        app,
        "/api/auth/register",
        None,
        json!({ "name": "Ana", "email": "ana@clinic.com", "password": "correct horse" }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.text);

    let reply = post(
        app,
        "/api/auth/login",
        None,
        json!({ "email": "ana@clinic.com", "password": "correct horse" }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.text);
    reply.json()["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_healthz() {
    let reply = get(&app(true), "/healthz", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["status"], "ok");
}

#[tokio::test]
async fn test_post_then_get_round_trip() {
    let app = app(false);
    let id = create_patient(&app, None, "Maria Conceição").await;

    let reply = get(&app, "/api/patients", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let rows = reply.json();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["id"], id.as_str());
    assert_eq!(rows[0]["name"], "Maria Conceição");

    let reply = get(&app, "/api/patients?q=conceicao", None).await;
    assert_eq!(reply.json().as_array().unwrap().len(), 1);
    let reply = get(&app, "/api/patients?q=pedro", None).await;
    assert_eq!(reply.json().as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_bad_input_is_400() {
    let app = app(false);

    let reply = send(&app, Method::POST, "/api/patients", None, Some("{not json")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.json()["error"].is_string());

    let reply = post(
        &app,
        "/api/patients",
        None,
        json!({ "name": "", "email": "nope", "cpf": "111.111.111-11" }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    let body = reply.json();
    assert!(body["error"].is_string());
    assert!(body["fields"]["name"].is_string());
    assert!(body["fields"]["email"].is_string());
    assert!(body["fields"]["cpf"].is_string());

    let reply = get(&app, "/api/reports/financial?start=03/01/2026", None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_auth_required() {
    let app = app(true);

    let reply = get(&app, "/api/patients", None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.json()["error"].is_string());

    let reply = get(&app, "/api/patients", Some("bogus")).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let token = staff_token(&app).await;
    let reply = get(&app, "/api/patients", Some(&token)).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = send(&app, Method::POST, "/api/auth/logout", Some(&token), None).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let reply = get(&app, "/api/patients", Some(&token)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_failures() {
    let app = app(true);
    staff_token(&app).await;

    let reply = post(
        &app,
        "/api/auth/login",
        None,
        json!({ "email": "ana@clinic.com", "password": "wrong password" }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = post(
        &app,
        "/api/auth/register",
        None,
        json!({ "name": "Other", "email": "ANA@clinic.com", "password": "another pass" }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.json()["error"], "email already registered");
}

#[tokio::test]
async fn test_patient_portal_login() {
    let app = app(true);
    let token = staff_token(&app).await;
    let patient_id = create_patient(&app, Some(&token), "Bia").await;

    let reply = post(
        &app,
        &format!("/api/patients/{patient_id}/access"),
        Some(&token),
        json!({ "email": "bia@mail.com", "password": "portal-pass" }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.text);
    assert!(reply.json().get("password_hash").is_none());

    let reply = post(
        &app,
        "/api/auth/patient",
        None,
        json!({ "email": "bia@mail.com", "password": "portal-pass" }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let body = reply.json();
    assert_eq!(body["patient"]["id"], patient_id.as_str());
    assert!(body["token"].is_string());
    assert!(body["expires_at"].is_string());
}

#[tokio::test]
async fn test_patient_token_cannot_reach_staff_routes() {
    let app = app(true);
    let token = staff_token(&app).await;
    let patient_id = create_patient(&app, Some(&token), "Bia").await;
    create_patient(&app, Some(&token), "Caio").await;
    let reply = post(
        &app,
        &format!("/api/patients/{patient_id}/access"),
        Some(&token),
        json!({ "email": "bia@mail.com", "password": "portal-pass" }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.text);

    let reply = post(
        &app,
        "/api/auth/patient",
        None,
        json!({ "email": "bia@mail.com", "password": "portal-pass" }),
    )
    .await;
    let portal = reply.json()["token"].as_str().unwrap().to_string();

    let reply = get(&app, "/api/patients", Some(&portal)).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert!(reply.json()["error"].is_string());
    let reply = post(&app, "/api/patients", Some(&portal), json!({ "name": "Mallory" })).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    let reply = get(&app, "/api/reports/financial", Some(&portal)).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = send(&app, Method::POST, "/api/auth/logout", Some(&portal), None).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let reply = get(&app, "/api/patients", Some(&portal)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let rows = get(&app, "/api/patients", Some(&token)).await.json();
    assert_eq!(rows.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_self_registration_cannot_pick_admin() {
    let app = app(true);
    let reply = post(
        &app,
        "/api/auth/register",
        None,
        json!({ "name": "Eve", "email": "eve@clinic.com", "password": "long enough", "role": "admin" }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.text);
    assert_eq!(reply.json()["user"]["role"], "therapist");
}

#[tokio::test]
async fn test_patch_and_delete() {
    let app = app(false);
    let id = create_patient(&app, None, "Caio").await;

    let reply = send(
        &app,
        Method::PATCH,
        &format!("/api/patients/{id}"),
        None,
        Some(r#"{"phone": "11 99999-0000"}"#),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["phone"], "11 99999-0000");

    let reply = send(
        &app,
        Method::PATCH,
        "/api/patients/missing",
        None,
        Some(r#"{"phone": "1"}"#),
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = send(&app, Method::DELETE, &format!("/api/patients/{id}"), None, None).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let rows = get(&app, "/api/patients", None).await.json();
    assert_eq!(rows[0]["is_active"], false);

    let reply = send(&app, Method::DELETE, "/api/appointments/missing", None, None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_financial_report_inclusive_csv() {
    let app = app(false);
    for (day, amount) in [(9, "10"), (10, "100"), (20, "50,50"), (21, "1000")] {
        let reply = post(
            &app,
            "/api/financial-transactions",
            None,
            json!({
                "kind": "income",
                "amount": amount,
                "description": format!("Session {day}"),
                "date": format!("2026-03-{day:02}"),
            }),
        )
        .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.text);
    }

    let reply = get(
        &app,
        "/api/reports/financial?start=2026-03-10&end=2026-03-20",
        None,
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let report = reply.json();
    assert_eq!(report["total_income"], 150.5);
    assert_eq!(report["transactions"].as_array().unwrap().len(), 2);

    let reply = get(
        &app,
        "/api/reports/financial?start=2026-03-10&end=2026-03-20&format=csv",
        None,
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.content_type.unwrap().starts_with("text/csv"));
    let lines: Vec<&str> = reply.text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("2026-03-20,income,Session 20"));
    assert!(lines[2].starts_with("2026-03-10,income,Session 10"));
}

#[tokio::test]
async fn test_pre_evaluation_print() {
    let app = app(false);
    let patient_id = create_patient(&app, None, "Davi Sá").await;
    let reply = post(
        &app,
        "/api/pre-evaluations",
        None,
        json!({ "patient_id": patient_id }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.text);
    let id = reply.json()["id"].as_str().unwrap().to_string();

    let reply = get(&app, &format!("/api/pre-evaluations/{id}/print"), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.content_type.unwrap().starts_with("text/html"));
    assert!(reply.text.matches("Não informado").count() >= 10);
    assert!(reply.text.contains("Davi Sá"));

    let reply = get(&app, "/api/pre-evaluations/missing/print", None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dashboard_stats() {
    let app = app(false);
    create_patient(&app, None, "Eva").await;

    let reply = get(&app, "/api/dashboard/stats", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.json(),
        json!({
            "active_patients": 1,
            "completed_sessions": 0,
            "progress_rate": 0,
            "gamification_points": 0,
        })
    );
}

#[tokio::test]
async fn test_file_backed_database_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clinic.db");
    let config = ServerConfig {
        require_auth: false,
        db_path: path.clone(),
        ..Default::default()
    };

    let db = Database::open(&path).unwrap().into_shared();
    let first = build_router(AppState::new(db, config.clone()));
    create_patient(&first, None, "Fábio").await;
    drop(first);

    let db = Database::open(&path).unwrap().into_shared();
    let second = build_router(AppState::new(db, config));
    let rows = get(&second, "/api/patients", None).await.json();
    assert_eq!(rows[0]["name"], "Fábio");
}
