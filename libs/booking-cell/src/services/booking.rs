// libs/booking-cell/src/services/booking.rs
use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use schedule_cell::models::{EditContext, SchedulePolicy};
use schedule_cell::services::resolver::ScheduleResolver;
use schedule_cell::services::slots::{filter_conflicts, AvailabilityService};
use shared_config::AppConfig;
use shared_database::supabase::{ApiError, SupabaseClient};

use crate::models::{
    Appointment, AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest,
    BookingError, LineQuote, Procedure, ProcedureSelection, QuoteRequest, QuoteResponse,
    Specification,
};
use crate::services::discount::DiscountService;
use crate::services::notification::{BookingNotification, NotificationService};
use crate::services::sessions::SessionTracker;

/// Orchestrates validation, pricing, session assignment and persistence of
/// one appointment with its line items.
pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    availability: AvailabilityService,
    discount: DiscountService,
    sessions: SessionTracker,
    notification: NotificationService,
    require_professional: bool,
}

/// A validated booking form: the request with required fields proven present.
struct ValidatedBooking {
    client_id: Uuid,
    selections: Vec<ProcedureSelection>,
    date: NaiveDate,
    time: NaiveTime,
    city_id: Uuid,
    professional_id: Option<Uuid>,
    notes: Option<String>,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let policy = SchedulePolicy {
            allow_booking_when_closed: config.allow_booking_when_closed,
            ..SchedulePolicy::default()
        };
        let resolver = ScheduleResolver::with_policy(Arc::clone(&supabase), policy);

        Self {
            availability: AvailabilityService::new(Arc::clone(&supabase), resolver),
            discount: DiscountService::new(Arc::clone(&supabase)),
            sessions: SessionTracker::new(Arc::clone(&supabase)),
            notification: NotificationService::new(config.notification_webhook_url.clone()),
            require_professional: config.require_professional,
            supabase,
        }
    }

    /// Book one appointment, possibly bundling several procedures with
    /// per-line custom prices.
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let form = self.validate(request)?;

        let procedures = self.fetch_procedures(&form.selections, auth_token).await?;
        let specifications = self
            .fetch_specifications(&form.selections, auth_token)
            .await?;
        validate_selections(&form.selections, &procedures, &specifications)?;

        let primary = &procedures[&form.selections[0].procedure_id];
        self.check_slot_conflict(form.date, form.time, primary.duration_minutes, None, auth_token)
            .await?;

        let lines = self
            .price_lines(&form.selections, &procedures, &specifications, auth_token)
            .await?;
        let total_price: f64 = lines.iter().map(|l| l.final_total).sum();

        // Session numbers are fixed before the row is inserted and never
        // recomputed afterwards.
        let assignment = self
            .sessions
            .assign(
                form.client_id,
                primary.id,
                primary.sessions_required,
                auth_token,
            )
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let appointment = self
            .insert_appointment(&form, assignment.session_number, assignment.total_sessions, total_price, auth_token)
            .await?;
        self.insert_lines(appointment.id, &form.selections, &lines, auth_token)
            .await?;

        info!(
            "Appointment {} booked for client {} on {} at {} (session {}/{})",
            appointment.id,
            appointment.client_id,
            appointment.appointment_date,
            appointment.appointment_time,
            appointment.session_number,
            appointment.total_sessions
        );

        self.dispatch_notification(&appointment, &form, &procedures, &specifications)
            .await;

        Ok(appointment)
    }

    /// Edit an existing appointment. No-op saves are rejected; the original
    /// slot stays valid even when it would otherwise be filtered.
    pub async fn update_appointment(
        &self,
        appointment_id: Uuid,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;
        let current_selections = self.load_selections(appointment_id, auth_token).await?;

        let form = self.validate(request)?;

        if is_noop_edit(&current, &current_selections, &form) {
            return Err(BookingError::ValidationError(
                "No changes to save".to_string(),
            ));
        }

        let procedures = self.fetch_procedures(&form.selections, auth_token).await?;
        let specifications = self
            .fetch_specifications(&form.selections, auth_token)
            .await?;
        validate_selections(&form.selections, &procedures, &specifications)?;

        let primary = &procedures[&form.selections[0].procedure_id];
        let edit = EditContext {
            appointment_id,
            original_time: (current.appointment_date == form.date)
                .then_some(current.appointment_time),
        };
        self.check_slot_conflict(
            form.date,
            form.time,
            primary.duration_minutes,
            Some(&edit),
            auth_token,
        )
        .await?;

        let lines = self
            .price_lines(&form.selections, &procedures, &specifications, auth_token)
            .await?;
        let total_price: f64 = lines.iter().map(|l| l.final_total).sum();

        // session_number/total_sessions are immutable after creation.
        let update_data = json!({
            "appointment_date": form.date,
            "appointment_time": format_time(form.time),
            "city_id": form.city_id,
            "professional_id": form.professional_id,
            "notes": form.notes,
            "total_price": total_price,
            "updated_at": chrono::Utc::now().to_rfc3339(),
        });

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update_data),
                Some(representation_headers()),
            )
            .await
            .map_err(map_store_error)?;

        let updated: Appointment = parse_single(result)?;

        self.replace_lines(appointment_id, &form.selections, &lines, auth_token)
            .await?;

        info!("Appointment {} updated", appointment_id);
        Ok(updated)
    }

    /// Appointments are never hard-deleted, only status-canceled.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        self.update_status(appointment_id, AppointmentStatus::Canceled, auth_token)
            .await
    }

    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;

        if !current.status.can_transition_to(new_status) {
            return Err(BookingError::InvalidStatusTransition {
                from: current.status,
                to: new_status,
            });
        }

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let update_data = json!({
            "status": new_status.to_string(),
            "updated_at": chrono::Utc::now().to_rfc3339(),
        });
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update_data),
                Some(representation_headers()),
            )
            .await
            .map_err(map_store_error)?;

        let updated: Appointment = parse_single(result)?;
        info!("Appointment {} moved to status {}", appointment_id, new_status);
        Ok(updated)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        if result.is_empty() {
            return Err(BookingError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointment: {}", e)))
    }

    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        let mut query_parts = Vec::new();
        if let Some(client_id) = query.client_id {
            query_parts.push(format!("client_id=eq.{}", client_id));
        }
        if let Some(date) = query.date {
            let date_str = date.to_string();
            query_parts.push(format!(
                "appointment_date=eq.{}",
                urlencoding::encode(&date_str)
            ));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        query_parts.push(format!("limit={}", query.limit.unwrap_or(100)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0)));

        let path = format!(
            "/rest/v1/appointments?{}&order=appointment_date.asc,appointment_time.asc",
            query_parts.join("&")
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        result
            .into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    BookingError::DatabaseError(format!("Failed to parse appointment: {}", e))
                })
            })
            .collect()
    }

    /// Price a selection without booking it: per-line totals and discounts
    /// for the client-facing preview.
    pub async fn quote_selection(
        &self,
        request: QuoteRequest,
        auth_token: &str,
    ) -> Result<QuoteResponse, BookingError> {
        if request.procedures.is_empty() {
            return Err(BookingError::ValidationError(
                "At least one procedure must be selected".to_string(),
            ));
        }

        let procedures = self.fetch_procedures(&request.procedures, auth_token).await?;
        let specifications = self
            .fetch_specifications(&request.procedures, auth_token)
            .await?;
        validate_selections(&request.procedures, &procedures, &specifications)?;

        let lines = self
            .price_lines(&request.procedures, &procedures, &specifications, auth_token)
            .await?;
        let total = lines.iter().map(|l| l.final_total).sum();

        Ok(QuoteResponse { lines, total })
    }

    // ==========================================================================
    // PRIVATE HELPER METHODS
    // ==========================================================================

    fn validate(&self, request: BookAppointmentRequest) -> Result<ValidatedBooking, BookingError> {
        if request.procedures.is_empty() {
            return Err(BookingError::ValidationError(
                "At least one procedure must be selected".to_string(),
            ));
        }
        let date = request.appointment_date.ok_or_else(|| {
            BookingError::ValidationError("Appointment date is required".to_string())
        })?;
        let time = request.appointment_time.ok_or_else(|| {
            BookingError::ValidationError("Appointment time is required".to_string())
        })?;
        let city_id = request
            .city_id
            .ok_or_else(|| BookingError::ValidationError("City is required".to_string()))?;

        if self.require_professional && request.professional_id.is_none() {
            return Err(BookingError::ValidationError(
                "A professional must be selected".to_string(),
            ));
        }

        Ok(ValidatedBooking {
            client_id: request.client_id,
            selections: request.procedures,
            date,
            time,
            city_id,
            professional_id: request.professional_id,
            notes: request.notes,
        })
    }

    async fn fetch_procedures(
        &self,
        selections: &[ProcedureSelection],
        auth_token: &str,
    ) -> Result<HashMap<Uuid, Procedure>, BookingError> {
        let ids: Vec<String> = selections.iter().map(|s| s.procedure_id.to_string()).collect();
        let path = format!("/rest/v1/procedures?id=in.({})", ids.join(","));
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        let procedures: Vec<Procedure> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Procedure>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse procedures: {}", e)))?;

        let map: HashMap<Uuid, Procedure> =
            procedures.into_iter().map(|p| (p.id, p)).collect();

        for selection in selections {
            if !map.contains_key(&selection.procedure_id) {
                return Err(BookingError::ProcedureNotFound(selection.procedure_id));
            }
        }
        Ok(map)
    }

    async fn fetch_specifications(
        &self,
        selections: &[ProcedureSelection],
        auth_token: &str,
    ) -> Result<HashMap<Uuid, Specification>, BookingError> {
        let ids: Vec<String> = selections
            .iter()
            .flat_map(|s| s.specification_ids.iter().map(|id| id.to_string()))
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let path = format!("/rest/v1/specifications?id=in.({})", ids.join(","));
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        let specifications: Vec<Specification> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<Specification>, _>>()
            .map_err(|e| {
                BookingError::DatabaseError(format!("Failed to parse specifications: {}", e))
            })?;

        Ok(specifications.into_iter().map(|s| (s.id, s)).collect())
    }

    /// Submit-time re-check: the slot list shown earlier is not a
    /// reservation, so the occupied intervals are read again here. The store
    /// remains the final authority; a 409 on insert is also surfaced as a
    /// conflict.
    async fn check_slot_conflict(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: i32,
        edit: Option<&EditContext>,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let booked = self
            .availability
            .booked_intervals(date, auth_token)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let admitted = filter_conflicts(&[time], duration_minutes, &booked, None, edit);
        if admitted.is_empty() {
            warn!("Conflict detected at submission for {} {}", date, time);
            return Err(BookingError::ConflictDetected);
        }
        Ok(())
    }

    async fn price_lines(
        &self,
        selections: &[ProcedureSelection],
        procedures: &HashMap<Uuid, Procedure>,
        specifications: &HashMap<Uuid, Specification>,
        auth_token: &str,
    ) -> Result<Vec<LineQuote>, BookingError> {
        let mut lines = Vec::with_capacity(selections.len());

        for selection in selections {
            let procedure = &procedures[&selection.procedure_id];
            let original = line_original_total(selection, procedure, specifications);
            let groups = selection.specification_ids.len() as i32;

            // A custom price is an explicit operator override; discount
            // tiers are not applied on top of it.
            let quote = if selection.custom_price.is_some() {
                crate::models::DiscountQuote::none(original)
            } else {
                self.discount
                    .quote(procedure.id, groups, original, auth_token)
                    .await
                    .map_err(|e| BookingError::DatabaseError(e.to_string()))?
            };

            lines.push(LineQuote {
                procedure_id: procedure.id,
                selected_groups_count: groups,
                original_total: quote.original_total,
                discount_percentage: quote.discount_percentage,
                discount_amount: quote.discount_amount,
                final_total: quote.final_total,
            });
        }

        Ok(lines)
    }

    async fn insert_appointment(
        &self,
        form: &ValidatedBooking,
        session_number: i32,
        total_sessions: i32,
        total_price: f64,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let appointment_data = json!({
            "client_id": form.client_id,
            "appointment_date": form.date,
            "appointment_time": format_time(form.time),
            "status": AppointmentStatus::Scheduled.to_string(),
            "city_id": form.city_id,
            "professional_id": form.professional_id,
            "session_number": session_number,
            "total_sessions": total_sessions,
            "total_price": total_price,
            "notes": form.notes,
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(representation_headers()),
            )
            .await
            .map_err(map_store_error)?;

        parse_single(result)
    }

    async fn insert_lines(
        &self,
        appointment_id: Uuid,
        selections: &[ProcedureSelection],
        lines: &[LineQuote],
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let line_rows: Vec<Value> = selections
            .iter()
            .zip(lines)
            .enumerate()
            .map(|(index, (selection, line))| {
                json!({
                    "appointment_id": appointment_id,
                    "procedure_id": selection.procedure_id,
                    "order_index": index as i32,
                    "custom_price": selection.custom_price,
                    "line_total": line.final_total,
                })
            })
            .collect();

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointment_procedures",
                Some(auth_token),
                Some(Value::Array(line_rows)),
                Some(representation_headers()),
            )
            .await
            .map_err(map_store_error)?;

        let spec_rows: Vec<Value> = selections
            .iter()
            .flat_map(|selection| {
                selection.specification_ids.iter().map(move |spec_id| {
                    json!({
                        "appointment_id": appointment_id,
                        "procedure_id": selection.procedure_id,
                        "specification_id": spec_id,
                    })
                })
            })
            .collect();

        if !spec_rows.is_empty() {
            let _: Vec<Value> = self
                .supabase
                .request_with_headers(
                    Method::POST,
                    "/rest/v1/appointment_specifications",
                    Some(auth_token),
                    Some(Value::Array(spec_rows)),
                    Some(representation_headers()),
                )
                .await
                .map_err(map_store_error)?;
        }

        Ok(())
    }

    async fn replace_lines(
        &self,
        appointment_id: Uuid,
        selections: &[ProcedureSelection],
        lines: &[LineQuote],
        auth_token: &str,
    ) -> Result<(), BookingError> {
        for table in ["appointment_specifications", "appointment_procedures"] {
            let path = format!("/rest/v1/{}?appointment_id=eq.{}", table, appointment_id);
            let _: Vec<Value> = self
                .supabase
                .request_with_headers(
                    Method::DELETE,
                    &path,
                    Some(auth_token),
                    None,
                    Some(representation_headers()),
                )
                .await
                .map_err(map_store_error)?;
        }
        self.insert_lines(appointment_id, selections, lines, auth_token)
            .await
    }

    async fn load_selections(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<ProcedureSelection>, BookingError> {
        let path = format!(
            "/rest/v1/appointment_procedures?appointment_id=eq.{}&order=order_index.asc",
            appointment_id
        );
        let line_rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        let spec_path = format!(
            "/rest/v1/appointment_specifications?appointment_id=eq.{}",
            appointment_id
        );
        let spec_rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &spec_path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        let mut specs_by_procedure: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for row in &spec_rows {
            let procedure_id = parse_uuid_field(row, "procedure_id")?;
            let specification_id = parse_uuid_field(row, "specification_id")?;
            specs_by_procedure
                .entry(procedure_id)
                .or_default()
                .push(specification_id);
        }

        line_rows
            .iter()
            .map(|row| {
                let procedure_id = parse_uuid_field(row, "procedure_id")?;
                Ok(ProcedureSelection {
                    procedure_id,
                    specification_ids: specs_by_procedure
                        .get(&procedure_id)
                        .cloned()
                        .unwrap_or_default(),
                    custom_price: row["custom_price"].as_f64(),
                })
            })
            .collect()
    }

    async fn dispatch_notification(
        &self,
        appointment: &Appointment,
        form: &ValidatedBooking,
        procedures: &HashMap<Uuid, Procedure>,
        specifications: &HashMap<Uuid, Specification>,
    ) {
        let notification = BookingNotification {
            appointment_id: appointment.id,
            client_id: appointment.client_id,
            appointment_date: appointment.appointment_date,
            appointment_time: appointment.appointment_time,
            city_id: appointment.city_id,
            procedure_names: form
                .selections
                .iter()
                .map(|s| procedures[&s.procedure_id].name.clone())
                .collect(),
            specification_names: form
                .selections
                .iter()
                .flat_map(|s| s.specification_ids.iter())
                .filter_map(|id| specifications.get(id).map(|s| s.name.clone()))
                .collect(),
            session_number: appointment.session_number,
            total_sessions: appointment.total_sessions,
            total_price: appointment.total_price,
            notes: appointment.notes.clone(),
        };

        self.notification
            .send_booking_confirmation(&notification)
            .await;
    }
}

// ==============================================================================
// PURE HELPERS
// ==============================================================================

/// `custom_price` if set, else the sum of selected specification prices,
/// else the procedure's base price.
fn line_original_total(
    selection: &ProcedureSelection,
    procedure: &Procedure,
    specifications: &HashMap<Uuid, Specification>,
) -> f64 {
    if let Some(custom) = selection.custom_price {
        return custom;
    }
    if !selection.specification_ids.is_empty() {
        return selection
            .specification_ids
            .iter()
            .filter_map(|id| specifications.get(id).map(|s| s.price))
            .sum();
    }
    procedure.price
}

fn validate_selections(
    selections: &[ProcedureSelection],
    procedures: &HashMap<Uuid, Procedure>,
    specifications: &HashMap<Uuid, Specification>,
) -> Result<(), BookingError> {
    for selection in selections {
        let procedure = &procedures[&selection.procedure_id];

        if procedure.requires_specifications && selection.specification_ids.is_empty() {
            return Err(BookingError::ValidationError(format!(
                "Procedure '{}' requires at least one specification",
                procedure.name
            )));
        }

        for spec_id in &selection.specification_ids {
            match specifications.get(spec_id) {
                Some(spec) if spec.procedure_id == procedure.id => {}
                Some(_) => {
                    return Err(BookingError::ValidationError(format!(
                        "Specification {} does not belong to procedure '{}'",
                        spec_id, procedure.name
                    )))
                }
                None => {
                    return Err(BookingError::ValidationError(format!(
                        "Specification not found: {}",
                        spec_id
                    )))
                }
            }
        }
    }
    Ok(())
}

/// An edit that changes nothing is rejected rather than written.
fn is_noop_edit(
    current: &Appointment,
    current_selections: &[ProcedureSelection],
    form: &ValidatedBooking,
) -> bool {
    current.appointment_date == form.date
        && current.appointment_time == form.time
        && current.city_id == form.city_id
        && current.professional_id == form.professional_id
        && notes_or_none(&current.notes) == notes_or_none(&form.notes)
        && normalized(current_selections) == normalized(&form.selections)
}

/// Absent notes and an empty notes field are the same thing.
fn notes_or_none(notes: &Option<String>) -> Option<&str> {
    notes.as_deref().filter(|n| !n.is_empty())
}

fn normalized(selections: &[ProcedureSelection]) -> Vec<ProcedureSelection> {
    selections
        .iter()
        .cloned()
        .map(|mut s| {
            s.specification_ids.sort();
            s
        })
        .collect()
}

fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

fn representation_headers() -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        "Prefer",
        reqwest::header::HeaderValue::from_static("return=representation"),
    );
    headers
}

fn parse_single(result: Vec<Value>) -> Result<Appointment, BookingError> {
    let row = result
        .into_iter()
        .next()
        .ok_or_else(|| BookingError::DatabaseError("Empty response from store".to_string()))?;
    serde_json::from_value(row)
        .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointment: {}", e)))
}

fn parse_uuid_field(row: &Value, field: &str) -> Result<Uuid, BookingError> {
    row[field]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| BookingError::DatabaseError(format!("Missing field: {}", field)))
}

/// A 409 from the store is its atomic overlap constraint firing; that
/// verdict is authoritative.
fn map_store_error(e: anyhow::Error) -> BookingError {
    match e.downcast_ref::<ApiError>() {
        Some(api) if api.status == 409 => BookingError::ConflictDetected,
        _ => BookingError::DatabaseError(e.to_string()),
    }
}
