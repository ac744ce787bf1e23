// libs/booking-cell/tests/booking_test.rs
//
// Integration tests for the booking composer against a mocked store:
// validation order, submit-time conflict detection, session numbering,
// per-line pricing and the store's authoritative 409 rejection.

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use booking_cell::models::{
    BookAppointmentRequest, BookingError, ProcedureSelection, QuoteRequest,
};
use booking_cell::services::booking::BookingService;
use shared_config::AppConfig;

struct TestSetup {
    service: BookingService,
    mock_server: MockServer,
}

impl TestSetup {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mock_server = MockServer::start().await;

        let mut config = AppConfig {
            supabase_url: mock_server.uri(),
            supabase_anon_key: "test-key".to_string(),
            notification_webhook_url: String::new(),
            require_professional: false,
            allow_booking_when_closed: true,
        };
        adjust(&mut config);

        Self {
            service: BookingService::new(&config),
            mock_server,
        }
    }

    async fn mount_procedure(&self, procedure: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/procedures"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![procedure]))
            .mount(&self.mock_server)
            .await;
    }

    async fn mount_specifications(&self, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/specifications"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.mock_server)
            .await;
    }

    async fn mount_discount_configs(&self, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/discount_configs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.mock_server)
            .await;
    }

    async fn mount_existing_appointments(&self, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.mock_server)
            .await;
    }

    async fn mount_prior_sessions(&self, count: usize) {
        let rows: Vec<serde_json::Value> = (0..count)
            .map(|_| json!({ "appointment_id": Uuid::new_v4() }))
            .collect();
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointment_procedures"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(&self.mock_server)
            .await;
    }

    async fn mount_inserts(&self, appointment: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(vec![appointment]))
            .mount(&self.mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/appointment_procedures"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
            .mount(&self.mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/appointment_specifications"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
            .mount(&self.mock_server)
            .await;
    }
}

fn procedure_json(id: Uuid, sessions_required: i32, requires_specs: bool) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Laser epilation",
        "duration_minutes": 60,
        "price": 100.0,
        "sessions_required": sessions_required,
        "requires_specifications": requires_specs
    })
}

fn appointment_json(client_id: Uuid, session_number: i32, total_sessions: i32) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "client_id": client_id,
        "appointment_date": "2099-06-16",
        "appointment_time": "10:00:00",
        "status": "scheduled",
        "city_id": Uuid::new_v4(),
        "professional_id": null,
        "session_number": session_number,
        "total_sessions": total_sessions,
        "total_price": 100.0,
        "notes": null,
        "created_at": "2099-06-01T12:00:00Z",
        "updated_at": "2099-06-01T12:00:00Z"
    })
}

fn booking_request(procedure_id: Uuid) -> BookAppointmentRequest {
    BookAppointmentRequest {
        client_id: Uuid::new_v4(),
        procedures: vec![ProcedureSelection {
            procedure_id,
            specification_ids: vec![],
            custom_price: None,
        }],
        appointment_date: Some(NaiveDate::from_ymd_opt(2099, 6, 16).unwrap()),
        appointment_time: Some(NaiveTime::from_hms_opt(10, 0, 0).unwrap()),
        city_id: Some(Uuid::new_v4()),
        professional_id: None,
        notes: None,
    }
}

// ==============================================================================
// VALIDATION
// ==============================================================================

#[tokio::test]
async fn rejects_empty_procedure_selection() {
    let setup = TestSetup::new().await;
    let mut request = booking_request(Uuid::new_v4());
    request.procedures.clear();

    let result = setup.service.book_appointment(request, "token").await;
    assert_matches!(result, Err(BookingError::ValidationError(_)));
}

#[tokio::test]
async fn rejects_missing_city() {
    let setup = TestSetup::new().await;
    let mut request = booking_request(Uuid::new_v4());
    request.city_id = None;

    let result = setup.service.book_appointment(request, "token").await;
    assert_matches!(result, Err(BookingError::ValidationError(_)));
}

#[tokio::test]
async fn rejects_missing_professional_when_required() {
    let setup = TestSetup::with_config(|c| c.require_professional = true).await;
    let request = booking_request(Uuid::new_v4());

    let result = setup.service.book_appointment(request, "token").await;
    assert_matches!(result, Err(BookingError::ValidationError(_)));
}

#[tokio::test]
async fn rejects_procedure_without_required_specifications() {
    let setup = TestSetup::new().await;
    let procedure_id = Uuid::new_v4();
    setup
        .mount_procedure(procedure_json(procedure_id, 1, true))
        .await;
    setup.mount_specifications(json!([])).await;

    let result = setup
        .service
        .book_appointment(booking_request(procedure_id), "token")
        .await;
    assert_matches!(result, Err(BookingError::ValidationError(_)));
}

// ==============================================================================
// CONFLICTS
// ==============================================================================

#[tokio::test]
async fn conflict_at_submission_rejects_without_writing() {
    let setup = TestSetup::new().await;
    let procedure_id = Uuid::new_v4();
    setup
        .mount_procedure(procedure_json(procedure_id, 1, false))
        .await;
    // Slot 10:00 taken by a 60-minute appointment booked since the list was shown.
    setup
        .mount_existing_appointments(json!([{
            "id": Uuid::new_v4(),
            "appointment_time": "10:00:00",
            "appointment_procedures": [
                { "order_index": 0, "procedures": { "duration_minutes": 60 } }
            ]
        }]))
        .await;

    let result = setup
        .service
        .book_appointment(booking_request(procedure_id), "token")
        .await;
    assert_matches!(result, Err(BookingError::ConflictDetected));

    // No insert was attempted.
    let requests = setup.mock_server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| r.method != wiremock::http::Method::POST));
}

#[tokio::test]
async fn store_level_conflict_rejection_is_surfaced() {
    let setup = TestSetup::new().await;
    let procedure_id = Uuid::new_v4();
    setup
        .mount_procedure(procedure_json(procedure_id, 1, false))
        .await;
    setup.mount_existing_appointments(json!([])).await;
    setup.mount_discount_configs(json!([])).await;
    // The store's atomic overlap check fires even though the client-side
    // re-check passed.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_string("overlap constraint"))
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .service
        .book_appointment(booking_request(procedure_id), "token")
        .await;
    assert_matches!(result, Err(BookingError::ConflictDetected));
}

// ==============================================================================
// SESSION NUMBERING
// ==============================================================================

#[tokio::test]
async fn second_booking_of_three_session_package_gets_session_two() {
    let setup = TestSetup::new().await;
    let procedure_id = Uuid::new_v4();
    let request = booking_request(procedure_id);
    let client_id = request.client_id;

    setup
        .mount_procedure(procedure_json(procedure_id, 3, false))
        .await;
    setup.mount_existing_appointments(json!([])).await;
    setup.mount_discount_configs(json!([])).await;
    setup.mount_prior_sessions(1).await;
    setup.mount_inserts(appointment_json(client_id, 2, 3)).await;

    let appointment = setup.service.book_appointment(request, "token").await.unwrap();

    assert_eq!(appointment.session_number, 2);
    assert_eq!(appointment.total_sessions, 3);
}

#[tokio::test]
async fn single_session_procedure_books_as_one_of_one() {
    let setup = TestSetup::new().await;
    let procedure_id = Uuid::new_v4();
    let request = booking_request(procedure_id);
    let client_id = request.client_id;

    setup
        .mount_procedure(procedure_json(procedure_id, 1, false))
        .await;
    setup.mount_existing_appointments(json!([])).await;
    setup.mount_discount_configs(json!([])).await;
    setup.mount_inserts(appointment_json(client_id, 1, 1)).await;

    let appointment = setup.service.book_appointment(request, "token").await.unwrap();
    assert_eq!(appointment.session_number, 1);
    assert_eq!(appointment.total_sessions, 1);
}

// ==============================================================================
// PRICING
// ==============================================================================

#[tokio::test]
async fn quote_applies_tier_to_specification_sum() {
    let setup = TestSetup::new().await;
    let procedure_id = Uuid::new_v4();
    let (spec_a, spec_b) = (Uuid::new_v4(), Uuid::new_v4());

    setup
        .mount_procedure(procedure_json(procedure_id, 1, true))
        .await;
    setup
        .mount_specifications(json!([
            { "id": spec_a, "procedure_id": procedure_id, "name": "Upper lip", "price": 60.0 },
            { "id": spec_b, "procedure_id": procedure_id, "name": "Chin", "price": 40.0 }
        ]))
        .await;
    setup
        .mount_discount_configs(json!([{
            "id": Uuid::new_v4(),
            "procedure_id": procedure_id,
            "min_groups": 2,
            "max_groups": 3,
            "discount_percentage": 10.0,
            "is_active": true
        }]))
        .await;

    let quote = setup
        .service
        .quote_selection(
            QuoteRequest {
                procedures: vec![ProcedureSelection {
                    procedure_id,
                    specification_ids: vec![spec_a, spec_b],
                    custom_price: None,
                }],
            },
            "token",
        )
        .await
        .unwrap();

    let line = &quote.lines[0];
    assert_eq!(line.selected_groups_count, 2);
    assert_eq!(line.original_total, 100.0);
    assert_eq!(line.discount_percentage, 10.0);
    assert_eq!(line.discount_amount, 10.0);
    assert_eq!(line.final_total, 90.0);
    assert_eq!(quote.total, 90.0);
}

#[tokio::test]
async fn custom_price_skips_discount_tiers() {
    let setup = TestSetup::new().await;
    let procedure_id = Uuid::new_v4();

    setup
        .mount_procedure(procedure_json(procedure_id, 1, false))
        .await;
    // A generous tier exists, but the operator override wins untouched.
    setup
        .mount_discount_configs(json!([{
            "id": Uuid::new_v4(),
            "procedure_id": procedure_id,
            "min_groups": 0,
            "max_groups": null,
            "discount_percentage": 50.0,
            "is_active": true
        }]))
        .await;

    let quote = setup
        .service
        .quote_selection(
            QuoteRequest {
                procedures: vec![ProcedureSelection {
                    procedure_id,
                    specification_ids: vec![],
                    custom_price: Some(75.0),
                }],
            },
            "token",
        )
        .await
        .unwrap();

    assert_eq!(quote.lines[0].final_total, 75.0);
    assert_eq!(quote.lines[0].discount_percentage, 0.0);
}

// ==============================================================================
// EDITING AND STATUS CHANGES
// ==============================================================================

#[tokio::test]
async fn noop_edit_is_rejected() {
    let setup = TestSetup::new().await;
    let procedure_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let city_id = Uuid::new_v4();
    let client_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": appointment_id,
            "client_id": client_id,
            "appointment_date": "2099-06-16",
            "appointment_time": "10:00:00",
            "status": "scheduled",
            "city_id": city_id,
            "professional_id": null,
            "session_number": 1,
            "total_sessions": 1,
            "total_price": 100.0,
            "notes": null,
            "created_at": "2099-06-01T12:00:00Z",
            "updated_at": "2099-06-01T12:00:00Z"
        }])))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_procedures"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "appointment_id": appointment_id,
            "procedure_id": procedure_id,
            "order_index": 0,
            "custom_price": null,
            "line_total": 100.0
        }])))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_specifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;

    let request = BookAppointmentRequest {
        client_id,
        procedures: vec![ProcedureSelection {
            procedure_id,
            specification_ids: vec![],
            custom_price: None,
        }],
        appointment_date: Some(NaiveDate::from_ymd_opt(2099, 6, 16).unwrap()),
        appointment_time: Some(NaiveTime::from_hms_opt(10, 0, 0).unwrap()),
        city_id: Some(city_id),
        professional_id: None,
        notes: None,
    };

    let result = setup
        .service
        .update_appointment(appointment_id, request, "token")
        .await;
    assert_matches!(result, Err(BookingError::ValidationError(msg)) if msg.contains("No changes"));
}

fn stored_appointment_json(
    id: Uuid,
    client_id: Uuid,
    city_id: Uuid,
    time: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "client_id": client_id,
        "appointment_date": "2099-06-16",
        "appointment_time": time,
        "status": "scheduled",
        "city_id": city_id,
        "professional_id": null,
        "session_number": 1,
        "total_sessions": 1,
        "total_price": 100.0,
        "notes": null,
        "created_at": "2099-06-01T12:00:00Z",
        "updated_at": "2099-06-01T12:00:00Z"
    })
}

fn occupied_slot_json(id: Uuid, time: &str, duration: i32) -> serde_json::Value {
    json!({
        "id": id,
        "appointment_time": time,
        "appointment_procedures": [
            { "order_index": 0, "procedures": { "duration_minutes": duration } }
        ]
    })
}

async fn mount_edit_reads(
    setup: &TestSetup,
    appointment_id: Uuid,
    client_id: Uuid,
    city_id: Uuid,
    procedure_id: Uuid,
    occupied: serde_json::Value,
) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            stored_appointment_json(appointment_id, client_id, city_id, "09:00:00")
        ])))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("appointment_date", "eq.2099-06-16"))
        .respond_with(ResponseTemplate::new(200).set_body_json(occupied))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_procedures"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "appointment_id": appointment_id,
            "procedure_id": procedure_id,
            "order_index": 0,
            "custom_price": null,
            "line_total": 100.0
        }])))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_specifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;
    setup
        .mount_procedure(procedure_json(procedure_id, 1, false))
        .await;
}

#[tokio::test]
async fn editing_to_a_new_time_ignores_own_booking_and_replaces_lines() {
    let setup = TestSetup::new().await;
    let procedure_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let city_id = Uuid::new_v4();
    let client_id = Uuid::new_v4();

    // Only the edited appointment occupies the day: moving it from 09:00 to
    // 09:30 overlaps its own interval, which must not count.
    mount_edit_reads(
        &setup,
        appointment_id,
        client_id,
        city_id,
        procedure_id,
        json!([occupied_slot_json(appointment_id, "09:00:00", 60)]),
    )
    .await;
    setup.mount_discount_configs(json!([])).await;

    let mut updated_row = stored_appointment_json(appointment_id, client_id, city_id, "09:30:00");
    updated_row["updated_at"] = json!("2099-06-02T12:00:00Z");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([updated_row])))
        .mount(&setup.mock_server)
        .await;
    for table in ["appointment_procedures", "appointment_specifications"] {
        Mock::given(method("DELETE"))
            .and(path(format!("/rest/v1/{}", table)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&setup.mock_server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_procedures"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;

    let mut request = booking_request(procedure_id);
    request.client_id = client_id;
    request.city_id = Some(city_id);
    request.appointment_time = Some(NaiveTime::from_hms_opt(9, 30, 0).unwrap());

    let updated = setup
        .service
        .update_appointment(appointment_id, request, "token")
        .await
        .unwrap();

    assert_eq!(
        updated.appointment_time,
        NaiveTime::from_hms_opt(9, 30, 0).unwrap()
    );

    // Line rows were replaced, not appended: one delete and one re-insert.
    let requests = setup.mock_server.received_requests().await.unwrap();
    let line_path = "/rest/v1/appointment_procedures";
    let deletes = requests
        .iter()
        .filter(|r| r.method == wiremock::http::Method::DELETE && r.url.path() == line_path)
        .count();
    let inserts = requests
        .iter()
        .filter(|r| r.method == wiremock::http::Method::POST && r.url.path() == line_path)
        .count();
    assert_eq!(deletes, 1);
    assert_eq!(inserts, 1);
}

#[tokio::test]
async fn editing_into_another_booking_is_rejected() {
    let setup = TestSetup::new().await;
    let procedure_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let city_id = Uuid::new_v4();
    let client_id = Uuid::new_v4();

    // Another client holds 10:00-11:00; moving this appointment there must
    // fail even though its own 09:00 interval is excluded.
    mount_edit_reads(
        &setup,
        appointment_id,
        client_id,
        city_id,
        procedure_id,
        json!([
            occupied_slot_json(appointment_id, "09:00:00", 60),
            occupied_slot_json(Uuid::new_v4(), "10:00:00", 60),
        ]),
    )
    .await;

    let mut request = booking_request(procedure_id);
    request.client_id = client_id;
    request.city_id = Some(city_id);
    request.appointment_time = Some(NaiveTime::from_hms_opt(10, 0, 0).unwrap());

    let result = setup
        .service
        .update_appointment(appointment_id, request, "token")
        .await;
    assert_matches!(result, Err(BookingError::ConflictDetected));

    // Nothing was written.
    let requests = setup.mock_server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| r.method == wiremock::http::Method::GET));
}

#[tokio::test]
async fn completed_appointment_cannot_be_canceled() {
    let setup = TestSetup::new().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": appointment_id,
            "client_id": Uuid::new_v4(),
            "appointment_date": "2099-06-16",
            "appointment_time": "10:00:00",
            "status": "completed",
            "city_id": Uuid::new_v4(),
            "professional_id": null,
            "session_number": 1,
            "total_sessions": 1,
            "total_price": 100.0,
            "notes": null,
            "created_at": "2099-06-01T12:00:00Z",
            "updated_at": "2099-06-01T12:00:00Z"
        }])))
        .mount(&setup.mock_server)
        .await;

    let result = setup.service.cancel_appointment(appointment_id, "token").await;
    assert_matches!(result, Err(BookingError::InvalidStatusTransition { .. }));
}
