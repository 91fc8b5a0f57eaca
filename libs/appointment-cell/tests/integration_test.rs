use std::sync::Arc;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt;
use serde_json::{json, Value};
use wiremock::{MockServer, Mock, ResponseTemplate};
use wiremock::matchers::{method, path, query_param};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use appointment_cell::models::AppointmentValidationRules;
use appointment_cell::router::{appointment_routes, AppointmentState};
use appointment_cell::services::{AppointmentBookingService, SupabaseAppointmentStore};
use doctor_cell::DoctorService;
use patient_cell::PatientService;
use shared_database::SupabaseClient;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

struct TestApp {
    router: Router,
    server: MockServer,
    config: TestConfig,
}

async fn create_test_app() -> TestApp {
    let server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&server.uri());
    let app_config = config.to_arc();

    let supabase = Arc::new(SupabaseClient::new(&app_config));
    let booking = AppointmentBookingService::new(
        Arc::new(SupabaseAppointmentStore::new(Arc::clone(&supabase))),
        Arc::new(PatientService::new(Arc::clone(&supabase))),
        Arc::new(DoctorService::new(Arc::clone(&supabase))),
        AppointmentValidationRules::default(),
    );

    let router = appointment_routes(AppointmentState {
        config: app_config,
        booking: Arc::new(booking),
    });

    TestApp { router, server, config }
}

fn tomorrow_at(hour: u32) -> DateTime<Utc> {
    let date = (Utc::now() + Duration::days(1)).date_naive();
    date.and_hms_opt(hour, 0, 0).unwrap().and_utc()
}

async fn mock_rows(server: &MockServer, table: &str, key: &str, value: String, rows: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/rest/v1/{}", table)))
        .and(query_param(key, value))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn authed(user: &TestUser, config: &TestConfig, method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let token = JwtTestUtils::create_test_token(user, &config.jwt_secret, None);
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token));

    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn booking_body(patient_id: Uuid, practitioner_id: Uuid, start: DateTime<Utc>) -> Value {
    json!({
        "patient_id": patient_id,
        "practitioner_id": practitioner_id,
        "start_time": start.to_rfc3339(),
        "reason": "Follow-up on memory assessment"
    })
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = create_test_app().await;

    let request = Request::builder().uri("/upcoming").body(Body::empty()).unwrap();
    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_patient_books_own_appointment() {
    let app = create_test_app().await;
    let user = TestUser::patient("patient@example.com");
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let start = tomorrow_at(10);

    mock_rows(&app.server, "patients", "id", format!("eq.{}", patient_id),
        json!([MockSupabaseResponses::patient_response(patient_id, user.id, None)])).await;
    mock_rows(&app.server, "doctors", "id", format!("eq.{}", doctor_id),
        json!([MockSupabaseResponses::doctor_response(doctor_id, Uuid::new_v4())])).await;
    mock_rows(&app.server, "appointments", "practitioner_id", format!("eq.{}", doctor_id), json!([])).await;

    let created_id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_response(created_id, patient_id, doctor_id, start, "scheduled")
        ])))
        .expect(1)
        .mount(&app.server)
        .await;

    let request = authed(&user, &app.config, "POST", "/", Some(booking_body(patient_id, doctor_id, start)));
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], json!(created_id));
    assert_eq!(body["status"], "scheduled");
}

#[tokio::test]
async fn test_patient_with_caregiver_is_forbidden() {
    let app = create_test_app().await;
    let user = TestUser::patient("patient@example.com");
    let patient_id = Uuid::new_v4();

    mock_rows(&app.server, "patients", "id", format!("eq.{}", patient_id),
        json!([MockSupabaseResponses::patient_response(patient_id, user.id, Some(Uuid::new_v4()))])).await;

    let request = authed(&user, &app.config, "POST", "/",
        Some(booking_body(patient_id, Uuid::new_v4(), tomorrow_at(10))));
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("caregiver"));
}

#[tokio::test]
async fn test_overlapping_booking_is_conflict() {
    let app = create_test_app().await;
    let admin = TestUser::admin("admin@example.com");
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    mock_rows(&app.server, "patients", "id", format!("eq.{}", patient_id),
        json!([MockSupabaseResponses::patient_response(patient_id, Uuid::new_v4(), None)])).await;
    mock_rows(&app.server, "doctors", "id", format!("eq.{}", doctor_id),
        json!([MockSupabaseResponses::doctor_response(doctor_id, Uuid::new_v4())])).await;
    mock_rows(&app.server, "appointments", "practitioner_id", format!("eq.{}", doctor_id), json!([
        MockSupabaseResponses::appointment_response(Uuid::new_v4(), Uuid::new_v4(), doctor_id, tomorrow_at(9), "scheduled")
    ])).await;

    let proposed = tomorrow_at(9) + Duration::minutes(30);
    let request = authed(&admin, &app.config, "POST", "/", Some(booking_body(patient_id, doctor_id, proposed)));
    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_exclusion_violation_from_store_is_conflict() {
    let app = create_test_app().await;
    let admin = TestUser::admin("admin@example.com");
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    mock_rows(&app.server, "patients", "id", format!("eq.{}", patient_id),
        json!([MockSupabaseResponses::patient_response(patient_id, Uuid::new_v4(), None)])).await;
    mock_rows(&app.server, "doctors", "id", format!("eq.{}", doctor_id),
        json!([MockSupabaseResponses::doctor_response(doctor_id, Uuid::new_v4())])).await;
    mock_rows(&app.server, "appointments", "practitioner_id", format!("eq.{}", doctor_id), json!([])).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            MockSupabaseResponses::error_response("conflicting key value violates exclusion constraint", "23P01")
        ))
        .expect(1)
        .mount(&app.server)
        .await;

    let request = authed(&admin, &app.config, "POST", "/", Some(booking_body(patient_id, doctor_id, tomorrow_at(10))));
    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_updating_completed_appointment_is_bad_request() {
    let app = create_test_app().await;
    let admin = TestUser::admin("admin@example.com");
    let appointment_id = Uuid::new_v4();

    mock_rows(&app.server, "appointments", "id", format!("eq.{}", appointment_id), json!([
        MockSupabaseResponses::appointment_response(appointment_id, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(9), "completed")
    ])).await;

    let request = authed(&admin, &app.config, "PUT", &format!("/{}", appointment_id),
        Some(json!({ "notes": "late addendum" })));
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("cannot be modified"));
}

#[tokio::test]
async fn test_patient_cannot_read_foreign_appointment() {
    let app = create_test_app().await;
    let user = TestUser::patient("patient@example.com");
    let own_patient_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_rows(&app.server, "appointments", "id", format!("eq.{}", appointment_id), json!([
        MockSupabaseResponses::appointment_response(appointment_id, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(9), "scheduled")
    ])).await;
    mock_rows(&app.server, "patients", "user_id", format!("eq.{}", user.id),
        json!([MockSupabaseResponses::patient_response(own_patient_id, user.id, None)])).await;

    let request = authed(&user, &app.config, "GET", &format!("/{}", appointment_id), None);
    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_appointment_is_not_found() {
    let app = create_test_app().await;
    let admin = TestUser::admin("admin@example.com");
    let appointment_id = Uuid::new_v4();

    mock_rows(&app.server, "appointments", "id", format!("eq.{}", appointment_id), json!([])).await;

    let request = authed(&admin, &app.config, "GET", &format!("/{}", appointment_id), None);
    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_availability_for_free_day() {
    let app = create_test_app().await;
    let caregiver = TestUser::caregiver("carer@example.com");
    let doctor_id = Uuid::new_v4();

    mock_rows(&app.server, "doctors", "id", format!("eq.{}", doctor_id),
        json!([MockSupabaseResponses::doctor_response(doctor_id, Uuid::new_v4())])).await;
    mock_rows(&app.server, "appointments", "practitioner_id", format!("eq.{}", doctor_id), json!([])).await;

    let uri = format!("/availability?practitioner_id={}&date=2024-06-01", doctor_id);
    let request = authed(&caregiver, &app.config, "GET", &uri, None);
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slots"].as_array().unwrap().len(), 10);
    assert_eq!(body["available_count"], 10);
    assert_eq!(body["slots"][0]["start_time"], "2024-06-01T08:00:00Z");
}

#[tokio::test]
async fn test_admin_list_reports_paging() {
    let app = create_test_app().await;
    let admin = TestUser::admin("admin@example.com");
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("order", "start_time.desc"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200)
            .insert_header("Content-Range", "0-1/5")
            .set_body_json(json!([
                MockSupabaseResponses::appointment_response(Uuid::new_v4(), Uuid::new_v4(), doctor_id, tomorrow_at(11), "scheduled"),
                MockSupabaseResponses::appointment_response(Uuid::new_v4(), Uuid::new_v4(), doctor_id, tomorrow_at(10), "scheduled")
            ])))
        .mount(&app.server)
        .await;

    let request = authed(&admin, &app.config, "GET", "/?limit=2", None);
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 5);
    assert_eq!(body["total_pages"], 3);
    assert_eq!(body["page"], 1);
    assert_eq!(body["appointments"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancel_requires_reason() {
    let app = create_test_app().await;
    let admin = TestUser::admin("admin@example.com");

    let request = authed(&admin, &app.config, "POST", &format!("/{}/cancel", Uuid::new_v4()),
        Some(json!({ "reason": "no" })));
    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_change_to_cancelled_requires_reason() {
    let app = create_test_app().await;
    let admin = TestUser::admin("admin@example.com");

    let request = authed(&admin, &app.config, "PATCH", &format!("/{}/status", Uuid::new_v4()),
        Some(json!({ "status": "cancelled" })));
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("reason"));
}

async fn mock_caregiver_appointment(app: &TestApp, caregiver_id: Uuid, assigned: bool) -> (Uuid, Uuid, Uuid) {
    let appointment_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    mock_rows(&app.server, "appointments", "id", format!("eq.{}", appointment_id), json!([
        MockSupabaseResponses::appointment_response(appointment_id, patient_id, doctor_id, tomorrow_at(9), "scheduled")
    ])).await;
    let visible = if assigned { json!([{ "id": patient_id }]) } else { json!([]) };
    mock_rows(&app.server, "patients", "caregiver_id", format!("eq.{}", caregiver_id), visible).await;
    let assigned_to = if assigned { caregiver_id } else { Uuid::new_v4() };
    mock_rows(&app.server, "patients", "id", format!("eq.{}", patient_id),
        json!([MockSupabaseResponses::patient_response(patient_id, Uuid::new_v4(), Some(assigned_to))])).await;

    (appointment_id, patient_id, doctor_id)
}

#[tokio::test]
async fn test_assigned_caregiver_completes_appointment() {
    let app = create_test_app().await;
    let caregiver = TestUser::caregiver("carer@example.com");
    let (appointment_id, patient_id, doctor_id) = mock_caregiver_appointment(&app, caregiver.id, true).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(appointment_id, patient_id, doctor_id, tomorrow_at(9), "completed")
        ])))
        .expect(1)
        .mount(&app.server)
        .await;

    let request = authed(&caregiver, &app.config, "PATCH", &format!("/{}/status", appointment_id),
        Some(json!({ "status": "completed" })));
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn test_unassigned_caregiver_cannot_change_status() {
    let app = create_test_app().await;
    let caregiver = TestUser::caregiver("carer@example.com");
    let (appointment_id, _, _) = mock_caregiver_appointment(&app, caregiver.id, false).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&app.server)
        .await;

    let request = authed(&caregiver, &app.config, "PATCH", &format!("/{}/status", appointment_id),
        Some(json!({ "status": "completed" })));
    let (status, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_assigned_caregiver_reschedules_appointment() {
    let app = create_test_app().await;
    let caregiver = TestUser::caregiver("carer@example.com");
    let (appointment_id, patient_id, doctor_id) = mock_caregiver_appointment(&app, caregiver.id, true).await;
    let new_start = tomorrow_at(14);

    mock_rows(&app.server, "appointments", "practitioner_id", format!("eq.{}", doctor_id), json!([])).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(appointment_id, patient_id, doctor_id, new_start, "rescheduled")
        ])))
        .expect(1)
        .mount(&app.server)
        .await;

    let request = authed(&caregiver, &app.config, "PATCH", &format!("/{}/reschedule", appointment_id),
        Some(json!({ "new_start_time": new_start.to_rfc3339(), "reason": "Transport unavailable" })));
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rescheduled");
    assert_eq!(body["id"], json!(appointment_id));
}
