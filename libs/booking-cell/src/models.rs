// libs/booking-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: AppointmentStatus,
    pub city_id: Uuid,
    pub professional_id: Option<Uuid>,
    /// Fixed at creation, never recomputed, even if earlier sessions are
    /// later canceled.
    pub session_number: i32,
    pub total_sessions: i32,
    pub total_price: f64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Canceled,
    #[serde(alias = "unscheduled-photo")]
    UnscheduledPhoto,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Canceled => write!(f, "canceled"),
            AppointmentStatus::UnscheduledPhoto => write!(f, "unscheduled_photo"),
        }
    }
}

impl AppointmentStatus {
    /// Appointments are never hard-deleted; completed and canceled are the
    /// terminal states.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Scheduled, Confirmed)
                | (Scheduled, Canceled)
                | (Confirmed, Completed)
                | (Confirmed, Canceled)
                | (UnscheduledPhoto, Scheduled)
                | (UnscheduledPhoto, Canceled)
        )
    }
}

/// One bundled procedure inside an appointment, order preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentProcedureLine {
    pub appointment_id: Uuid,
    pub procedure_id: Uuid,
    pub order_index: i32,
    pub custom_price: Option<f64>,
    pub line_total: f64,
}

/// One selected specification / area group on a procedure line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentSpecification {
    pub appointment_id: Uuid,
    pub procedure_id: Uuid,
    pub specification_id: Uuid,
}

// ==============================================================================
// CATALOG MODELS (read-only to this cell)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub id: Uuid,
    pub name: String,
    pub duration_minutes: i32,
    pub price: f64,
    pub sessions_required: i32,
    pub requires_specifications: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specification {
    pub id: Uuid,
    pub procedure_id: Uuid,
    pub name: String,
    pub price: f64,
}

/// Quantity-based discount tier for a procedure. Ranges for the same
/// procedure do not overlap; that is enforced at configuration time, not
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountConfig {
    pub id: Uuid,
    pub procedure_id: Uuid,
    pub min_groups: i32,
    pub max_groups: Option<i32>,
    pub discount_percentage: f64,
    pub is_active: bool,
}

impl DiscountConfig {
    pub fn matches(&self, selected_groups_count: i32) -> bool {
        self.is_active
            && selected_groups_count >= self.min_groups
            && self.max_groups.map_or(true, |max| selected_groups_count <= max)
    }
}

/// Confirmed presence of the provider in a city. Advisory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityAvailabilityWindow {
    pub id: Uuid,
    pub city_id: Uuid,
    pub date_start: NaiveDate,
    pub date_end: Option<NaiveDate>,
}

impl CityAvailabilityWindow {
    /// Open-ended when `date_end` is null.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.date_start <= date && self.date_end.map_or(true, |end| date <= end)
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcedureSelection {
    pub procedure_id: Uuid,
    #[serde(default)]
    pub specification_ids: Vec<Uuid>,
    pub custom_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub client_id: Uuid,
    #[serde(default)]
    pub procedures: Vec<ProcedureSelection>,
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<NaiveTime>,
    pub city_id: Option<Uuid>,
    pub professional_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    #[serde(default)]
    pub procedures: Vec<ProcedureSelection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteResponse {
    pub lines: Vec<LineQuote>,
    pub total: f64,
}

/// Priced procedure line: discount tiers are scoped per procedure line, not
/// across the whole booking.
#[derive(Debug, Clone, Serialize)]
pub struct LineQuote {
    pub procedure_id: Uuid,
    pub selected_groups_count: i32,
    pub original_total: f64,
    pub discount_percentage: f64,
    pub discount_amount: f64,
    pub final_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountQuote {
    pub original_total: f64,
    pub discount_amount: f64,
    pub final_total: f64,
    pub discount_percentage: f64,
}

impl DiscountQuote {
    pub fn none(original_total: f64) -> Self {
        Self {
            original_total,
            discount_amount: 0.0,
            final_total: original_total,
            discount_percentage: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAssignment {
    pub session_number: i32,
    pub total_sessions: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub client_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// AVAILABILITY ADVISORY
// ==============================================================================

/// Informational only; never blocks slot generation or submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AvailabilityAdvisory {
    Available,
    DifferentCity { city_name: String },
    NotAvailable,
}

impl AvailabilityAdvisory {
    pub fn warning(&self) -> Option<String> {
        match self {
            AvailabilityAdvisory::Available => None,
            AvailabilityAdvisory::DifferentCity { city_name } => Some(format!(
                "The provider is scheduled in {} on this date",
                city_name
            )),
            AvailabilityAdvisory::NotAvailable => {
                Some("The provider is not recorded as available on this date".to_string())
            }
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BookingError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Procedure not found: {0}")]
    ProcedureNotFound(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Appointment conflicts with an existing booking")]
    ConflictDetected,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),
}
