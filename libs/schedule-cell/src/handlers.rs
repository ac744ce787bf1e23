// libs/schedule-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::error::AppError;

use crate::models::SchedulePolicy;
use crate::services::resolver::ScheduleResolver;
use crate::services::slots::AvailabilityService;

#[derive(Debug, Deserialize)]
pub struct AvailableTimesQuery {
    pub date: NaiveDate,
    pub procedure_id: Uuid,
    pub edit_appointment_id: Option<Uuid>,
}

fn availability_service(config: &AppConfig) -> AvailabilityService {
    let supabase = Arc::new(SupabaseClient::new(config));
    let policy = SchedulePolicy {
        allow_booking_when_closed: config.allow_booking_when_closed,
        ..SchedulePolicy::default()
    };
    let resolver = ScheduleResolver::with_policy(Arc::clone(&supabase), policy);
    AvailabilityService::new(supabase, resolver)
}

/// Bookable start times for a date/procedure pair.
#[axum::debug_handler]
pub async fn get_available_times(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<AvailableTimesQuery>,
) -> Result<Json<Value>, AppError> {
    let service = availability_service(&state);

    let response = service
        .available_times(
            query.date,
            query.procedure_id,
            query.edit_appointment_id,
            auth.token(),
        )
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(Json(json!({
        "date": response.date,
        "available_times": response.available_times,
        "closed": response.closed,
    })))
}
