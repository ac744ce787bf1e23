// libs/schedule-cell/src/services/resolver.rs
use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use shared_database::supabase::SupabaseClient;

use crate::models::{EffectiveWindow, SchedulePolicy, ScheduleException, ScheduleSettings};

/// Merges the weekly default hours with date-range exceptions to produce the
/// operating window for a date.
pub struct ScheduleResolver {
    supabase: Arc<SupabaseClient>,
    policy: SchedulePolicy,
}

impl ScheduleResolver {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            policy: SchedulePolicy::default(),
        }
    }

    pub fn with_policy(supabase: Arc<SupabaseClient>, policy: SchedulePolicy) -> Self {
        Self { supabase, policy }
    }

    pub fn policy(&self) -> &SchedulePolicy {
        &self.policy
    }

    /// Resolve the operating window for a date. Store failures degrade to a
    /// hardcoded fallback window rather than erroring, so the caller always
    /// has slots to offer.
    pub async fn effective_window(&self, date: NaiveDate, auth_token: &str) -> EffectiveWindow {
        let settings = match self.fetch_settings(auth_token).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Schedule settings unavailable, using fallback window: {}", e);
                return EffectiveWindow::store_fallback();
            }
        };

        let exceptions = match self.fetch_exceptions(date, auth_token).await {
            Ok(ex) => ex,
            Err(e) => {
                warn!("Schedule exceptions unavailable, ignoring for {}: {}", date, e);
                Vec::new()
            }
        };

        resolve_window(date, &exceptions, settings.as_ref(), &self.policy)
    }

    async fn fetch_settings(&self, auth_token: &str) -> Result<Option<ScheduleSettings>> {
        let path = "/rest/v1/schedule_settings?is_active=eq.true&limit=1";
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await?;

        match result.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    async fn fetch_exceptions(
        &self,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<ScheduleException>> {
        let path = exceptions_query(date);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let exceptions: Vec<ScheduleException> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<ScheduleException>, _>>()?;

        debug!("Loaded {} schedule exceptions up to {}", exceptions.len(), date);
        Ok(exceptions)
    }
}

/// Exceptions that can cover the date: ranges started on or before it and
/// still open on it, plus single-day exceptions (null `date_end`) on the
/// date itself. covers() re-checks client-side.
fn exceptions_query(date: NaiveDate) -> String {
    format!(
        "/rest/v1/schedule_exceptions?date_start=lte.{d}\
         &or=(date_end.gte.{d},and(date_end.is.null,date_start.eq.{d}))\
         &order=date_start.asc",
        d = date
    )
}

/// Pure resolution rule.
///
/// Precedence when several exceptions cover the date: earliest `date_start`
/// wins, ties broken by earliest `date_end`. Closures and weekday-off days
/// produce the degraded window with `closed = true` instead of refusing.
pub fn resolve_window(
    date: NaiveDate,
    exceptions: &[ScheduleException],
    settings: Option<&ScheduleSettings>,
    policy: &SchedulePolicy,
) -> EffectiveWindow {
    let mut covering: Vec<&ScheduleException> =
        exceptions.iter().filter(|e| e.covers(date)).collect();
    covering.sort_by_key(|e| (e.date_start, e.date_end.unwrap_or(e.date_start)));

    if let Some(exception) = covering.first() {
        if exception.is_closed {
            debug!("{} is marked closed by exception {}", date, exception.id);
            if policy.allow_booking_when_closed {
                return EffectiveWindow::degraded();
            }
            let mut window = EffectiveWindow::degraded();
            window.end_time = window.start_time;
            return window;
        }

        let default = settings.cloned().unwrap_or_else(default_settings);
        return EffectiveWindow {
            start_time: exception.custom_start_time.unwrap_or(default.start_time),
            end_time: exception.custom_end_time.unwrap_or(default.end_time),
            interval_minutes: exception
                .custom_interval_minutes
                .unwrap_or(default.interval_minutes),
            closed: false,
        };
    }

    let Some(settings) = settings else {
        return EffectiveWindow::store_fallback();
    };

    if !settings.is_active || !settings.available_days.is_available(date.weekday()) {
        debug!("{} falls outside the default weekly schedule", date);
        return EffectiveWindow::degraded();
    }

    EffectiveWindow {
        start_time: settings.start_time,
        end_time: settings.end_time,
        interval_minutes: settings.interval_minutes,
        closed: false,
    }
}

fn default_settings() -> ScheduleSettings {
    let fallback = EffectiveWindow::store_fallback();
    ScheduleSettings {
        id: uuid::Uuid::nil(),
        start_time: fallback.start_time,
        end_time: fallback.end_time,
        interval_minutes: fallback.interval_minutes,
        available_days: crate::models::AvailableDays {
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: true,
            sunday: true,
        },
        is_active: true,
    }
}
