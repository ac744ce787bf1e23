// libs/schedule-cell/src/models.rs
use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// SCHEDULE CONFIGURATION MODELS
// ==============================================================================

/// Administrator-managed weekly default hours. Read-only to this cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub id: Uuid,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub interval_minutes: i32,
    pub available_days: AvailableDays,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableDays {
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl AvailableDays {
    pub fn is_available(&self, weekday: Weekday) -> bool {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }
}

/// A date-range override to the weekly default: a closure or custom hours.
/// `date_end = None` means a single-day exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleException {
    pub id: Uuid,
    pub date_start: NaiveDate,
    pub date_end: Option<NaiveDate>,
    pub is_closed: bool,
    pub custom_start_time: Option<NaiveTime>,
    pub custom_end_time: Option<NaiveTime>,
    pub custom_interval_minutes: Option<i32>,
}

impl ScheduleException {
    pub fn covers(&self, date: NaiveDate) -> bool {
        let end = self.date_end.unwrap_or(self.date_start);
        self.date_start <= date && date <= end
    }
}

/// The canonical operating window for one date, after merging defaults with
/// any exception. `closed` is advisory: slots are still produced so the
/// caller is never left without times to offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveWindow {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub interval_minutes: i32,
    pub closed: bool,
}

impl EffectiveWindow {
    /// Degraded window used for closed dates and weekdays flagged off.
    pub fn degraded() -> Self {
        Self {
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            interval_minutes: 60,
            closed: true,
        }
    }

    /// Hardcoded fallback when the schedule configuration cannot be read.
    pub fn store_fallback() -> Self {
        Self {
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            interval_minutes: 30,
            closed: false,
        }
    }
}

/// Policy knobs for slot generation.
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    /// Closures are advisory; when true a closed date still yields the
    /// degraded window instead of refusing to generate slots.
    pub allow_booking_when_closed: bool,
    /// Same-day slots at or before now + this many minutes are dropped.
    pub same_day_lead_minutes: i32,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            allow_booking_when_closed: true,
            same_day_lead_minutes: 30,
        }
    }
}

// ==============================================================================
// CONFLICT FILTER MODELS
// ==============================================================================

/// An existing non-canceled appointment on the target date, reduced to the
/// interval it occupies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookedInterval {
    pub appointment_id: Uuid,
    pub start: NaiveTime,
    pub duration_minutes: i32,
}

/// Present when the caller is editing an existing appointment: that
/// appointment is excluded from the conflict set and its original time
/// always remains selectable.
#[derive(Debug, Clone)]
pub struct EditContext {
    pub appointment_id: Uuid,
    /// Set when the edited appointment already sits on the target date.
    pub original_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableTimesResponse {
    pub date: NaiveDate,
    pub available_times: Vec<NaiveTime>,
    pub closed: bool,
}
