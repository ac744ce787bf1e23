// libs/schedule-cell/src/services/slots.rs
use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{
    AvailableTimesResponse, BookedInterval, EditContext, EffectiveWindow,
};
use crate::services::resolver::ScheduleResolver;

/// Expands an operating window into candidate start times and removes the
/// ones that would collide with existing appointments.
pub struct AvailabilityService {
    supabase: Arc<SupabaseClient>,
    resolver: ScheduleResolver,
}

impl AvailabilityService {
    pub fn new(supabase: Arc<SupabaseClient>, resolver: ScheduleResolver) -> Self {
        Self { supabase, resolver }
    }

    /// Bookable start times for a date/procedure pair. An empty list is a
    /// valid result (fully booked day).
    pub async fn available_times(
        &self,
        date: NaiveDate,
        procedure_id: Uuid,
        edit_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<AvailableTimesResponse> {
        let now = Local::now().naive_local();
        self.available_times_at(date, procedure_id, edit_appointment_id, now.date(), now.time(), auth_token)
            .await
    }

    pub(crate) async fn available_times_at(
        &self,
        date: NaiveDate,
        procedure_id: Uuid,
        edit_appointment_id: Option<Uuid>,
        today: NaiveDate,
        now: NaiveTime,
        auth_token: &str,
    ) -> Result<AvailableTimesResponse> {
        let duration_minutes = self.fetch_procedure_duration(procedure_id, auth_token).await?;
        let window = self.resolver.effective_window(date, auth_token).await;
        let slots = generate_slots(&window);

        let booked = self.booked_intervals(date, auth_token).await?;

        let edit = edit_appointment_id.map(|id| EditContext {
            appointment_id: id,
            original_time: booked
                .iter()
                .find(|b| b.appointment_id == id)
                .map(|b| b.start),
        });

        let cutoff = if date == today {
            Some(lead_cutoff(now, self.resolver.policy().same_day_lead_minutes))
        } else {
            None
        };

        let available_times =
            filter_conflicts(&slots, duration_minutes, &booked, cutoff, edit.as_ref());

        debug!(
            "{} of {} candidate slots bookable on {} for procedure {}",
            available_times.len(),
            slots.len(),
            date,
            procedure_id
        );

        Ok(AvailableTimesResponse {
            date,
            available_times,
            closed: window.closed,
        })
    }

    async fn fetch_procedure_duration(
        &self,
        procedure_id: Uuid,
        auth_token: &str,
    ) -> Result<i32> {
        let path = format!(
            "/rest/v1/procedures?id=eq.{}&select=duration_minutes",
            procedure_id
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        result
            .first()
            .and_then(|row| row["duration_minutes"].as_i64())
            .map(|d| d as i32)
            .ok_or_else(|| anyhow!("Procedure not found: {}", procedure_id))
    }

    /// Occupied intervals for a date (non-canceled appointments only). Also
    /// used by the booking composer for its submit-time conflict re-check.
    pub async fn booked_intervals(
        &self,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<BookedInterval>> {
        #[derive(Deserialize)]
        struct AppointmentRow {
            id: Uuid,
            appointment_time: NaiveTime,
            appointment_procedures: Vec<LineRow>,
        }
        #[derive(Deserialize)]
        struct LineRow {
            order_index: i32,
            procedures: ProcedureRow,
        }
        #[derive(Deserialize)]
        struct ProcedureRow {
            duration_minutes: i32,
        }

        let path = format!(
            "/rest/v1/appointments?appointment_date=eq.{}&status=neq.canceled\
             &select=id,appointment_time,appointment_procedures(order_index,procedures(duration_minutes))\
             &order=appointment_time.asc",
            date
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let rows: Vec<AppointmentRow> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<AppointmentRow>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|row| {
                // The primary line's duration governs the occupied interval.
                let duration_minutes = row
                    .appointment_procedures
                    .iter()
                    .min_by_key(|line| line.order_index)
                    .map(|line| line.procedures.duration_minutes)
                    .unwrap_or(30);
                BookedInterval {
                    appointment_id: row.id,
                    start: row.appointment_time,
                    duration_minutes,
                }
            })
            .collect())
    }
}

/// Expand a window into start times: start inclusive, spaced
/// `interval_minutes` apart, stopping strictly before end. Deterministic and
/// pure; degenerate windows produce an empty sequence.
pub fn generate_slots(window: &EffectiveWindow) -> Vec<NaiveTime> {
    let start = minutes_of(window.start_time);
    let end = minutes_of(window.end_time);
    if start >= end || window.interval_minutes <= 0 {
        return Vec::new();
    }

    let mut slots = Vec::new();
    let mut current = start;
    while current < end {
        slots.push(time_from_minutes(current));
        current += window.interval_minutes;
    }
    slots
}

/// Keep the slots whose `[s, s+d)` interval overlaps none of the existing
/// `[t, t+d')` intervals. Same-day slots at or before `cutoff` are dropped;
/// in edit mode the edited appointment is ignored and its original time is
/// always retained.
pub fn filter_conflicts(
    slots: &[NaiveTime],
    duration_minutes: i32,
    booked: &[BookedInterval],
    cutoff: Option<NaiveTime>,
    edit: Option<&EditContext>,
) -> Vec<NaiveTime> {
    let occupied: Vec<(i32, i32)> = booked
        .iter()
        .filter(|b| edit.map_or(true, |e| b.appointment_id != e.appointment_id))
        .map(|b| (minutes_of(b.start), b.duration_minutes.max(0)))
        .collect();

    slots
        .iter()
        .copied()
        .filter(|&slot| {
            if let Some(edit) = edit {
                if edit.original_time == Some(slot) {
                    return true;
                }
            }

            let s = minutes_of(slot);
            if let Some(cutoff) = cutoff {
                if s <= minutes_of(cutoff) {
                    return false;
                }
            }

            !occupied
                .iter()
                .any(|&(t, d)| s < t + d && t < s + duration_minutes)
        })
        .collect()
}

/// now + lead, saturating at end of day so a late-evening "now" excludes
/// every remaining slot instead of wrapping to the morning.
pub fn lead_cutoff(now: NaiveTime, lead_minutes: i32) -> NaiveTime {
    let total = minutes_of(now) + lead_minutes.max(0);
    if total >= 24 * 60 {
        NaiveTime::from_hms_opt(23, 59, 59).unwrap()
    } else {
        time_from_minutes(total)
    }
}

fn minutes_of(time: NaiveTime) -> i32 {
    (time.hour() * 60 + time.minute()) as i32
}

fn time_from_minutes(minutes: i32) -> NaiveTime {
    NaiveTime::from_hms_opt((minutes / 60) as u32, (minutes % 60) as u32, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: NaiveTime, end: NaiveTime, interval: i32) -> EffectiveWindow {
        EffectiveWindow {
            start_time: start,
            end_time: end,
            interval_minutes: interval,
            closed: false,
        }
    }

    fn booked(start: NaiveTime, duration: i32) -> BookedInterval {
        BookedInterval {
            appointment_id: Uuid::new_v4(),
            start,
            duration_minutes: duration,
        }
    }

    #[test]
    fn hourly_morning_window() {
        let slots = generate_slots(&window(t(8, 0), t(12, 0), 60));
        assert_eq!(slots, vec![t(8, 0), t(9, 0), t(10, 0), t(11, 0)]);
    }

    #[test]
    fn slot_count_matches_ceil_of_span_over_interval() {
        for (start, end, interval) in [
            (t(8, 0), t(12, 0), 60),
            (t(8, 0), t(12, 30), 60),
            (t(9, 15), t(10, 0), 20),
            (t(0, 0), t(23, 59), 30),
        ] {
            let slots = generate_slots(&window(start, end, interval));
            let span = minutes_of(end) - minutes_of(start);
            let expected = (span + interval - 1) / interval;
            assert_eq!(slots.len() as i32, expected, "{}..{} @{}", start, end, interval);
            assert_eq!(slots[0], start);
            assert!(slots.iter().all(|&s| s < end));
            for pair in slots.windows(2) {
                assert_eq!(minutes_of(pair[1]) - minutes_of(pair[0]), interval);
            }
        }
    }

    #[test]
    fn degenerate_windows_produce_no_slots() {
        assert!(generate_slots(&window(t(12, 0), t(8, 0), 30)).is_empty());
        assert!(generate_slots(&window(t(8, 0), t(8, 0), 30)).is_empty());
        assert!(generate_slots(&window(t(8, 0), t(12, 0), 0)).is_empty());
        assert!(generate_slots(&window(t(8, 0), t(12, 0), -15)).is_empty());
    }

    #[test]
    fn overlapping_slot_is_rejected_adjacent_is_kept() {
        // Existing 60-minute appointment at 09:00; requesting 60 minutes.
        let existing = vec![booked(t(9, 0), 60)];
        let slots = vec![t(9, 30), t(10, 0)];

        let result = filter_conflicts(&slots, 60, &existing, None, None);
        assert_eq!(result, vec![t(10, 0)]);
    }

    #[test]
    fn filter_never_returns_overlapping_slot() {
        let existing = vec![booked(t(9, 0), 45), booked(t(14, 0), 90)];
        let slots = generate_slots(&window(t(8, 0), t(18, 0), 30));
        let duration = 60;

        for &slot in &filter_conflicts(&slots, duration, &existing, None, None) {
            let s = minutes_of(slot);
            for b in &existing {
                let tb = minutes_of(b.start);
                assert!(
                    s + duration <= tb || tb + b.duration_minutes <= s,
                    "slot {} overlaps booking at {}",
                    slot,
                    b.start
                );
            }
        }
    }

    #[test]
    fn filtering_is_idempotent() {
        let existing = vec![booked(t(9, 0), 60)];
        let slots = generate_slots(&window(t(8, 0), t(12, 0), 30));

        let once = filter_conflicts(&slots, 30, &existing, None, None);
        let twice = filter_conflicts(&once, 30, &existing, None, None);
        assert_eq!(once, twice);
    }

    #[test]
    fn same_day_slots_before_cutoff_are_dropped() {
        let slots = generate_slots(&window(t(8, 0), t(12, 0), 60));
        let cutoff = lead_cutoff(t(8, 45), 30); // 09:15

        let result = filter_conflicts(&slots, 30, &[], Some(cutoff), None);
        assert_eq!(result, vec![t(10, 0), t(11, 0)]);
    }

    #[test]
    fn cutoff_at_slot_time_excludes_that_slot() {
        let slots = vec![t(10, 0), t(10, 30)];
        let cutoff = lead_cutoff(t(9, 30), 30); // exactly 10:00

        let result = filter_conflicts(&slots, 30, &[], Some(cutoff), None);
        assert_eq!(result, vec![t(10, 30)]);
    }

    #[test]
    fn late_evening_cutoff_saturates() {
        let cutoff = lead_cutoff(t(23, 45), 30);
        let slots = vec![t(23, 0), t(23, 30)];
        assert!(filter_conflicts(&slots, 30, &[], Some(cutoff), None).is_empty());
    }

    #[test]
    fn edit_keeps_own_time_and_ignores_own_booking() {
        let own = booked(t(9, 0), 60);
        let edit = EditContext {
            appointment_id: own.appointment_id,
            original_time: Some(own.start),
        };
        let slots = vec![t(9, 0), t(9, 30), t(10, 0)];

        // Without the edit context the 09:00 booking blocks 09:00 and 09:30.
        let blocked = filter_conflicts(&slots, 60, &[own.clone()], None, None);
        assert_eq!(blocked, vec![t(10, 0)]);

        let result = filter_conflicts(&slots, 60, &[own], None, Some(&edit));
        assert_eq!(result, vec![t(9, 0), t(9, 30), t(10, 0)]);
    }

    #[test]
    fn edit_original_time_survives_past_cutoff() {
        let own = booked(t(9, 0), 30);
        let edit = EditContext {
            appointment_id: own.appointment_id,
            original_time: Some(own.start),
        };
        let slots = vec![t(9, 0), t(9, 30), t(10, 0)];
        let cutoff = lead_cutoff(t(9, 15), 30); // 09:45

        let result = filter_conflicts(&slots, 30, &[own], Some(cutoff), Some(&edit));
        assert_eq!(result, vec![t(9, 0), t(10, 0)]);
    }
}
