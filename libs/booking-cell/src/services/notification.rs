// libs/booking-cell/src/services/notification.rs
use chrono::{NaiveDate, NaiveTime};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Booking summary handed to the external dispatch channel.
#[derive(Debug, Clone, Serialize)]
pub struct BookingNotification {
    pub appointment_id: Uuid,
    pub client_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub city_id: Uuid,
    pub procedure_names: Vec<String>,
    pub specification_names: Vec<String>,
    pub session_number: i32,
    pub total_sessions: i32,
    pub total_price: f64,
    pub notes: Option<String>,
}

/// Best-effort dispatch: failures are logged and swallowed, never surfaced
/// as a booking failure.
pub struct NotificationService {
    client: Client,
    webhook_url: String,
}

impl NotificationService {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
        }
    }

    pub async fn send_booking_confirmation(&self, notification: &BookingNotification) {
        if self.webhook_url.is_empty() {
            debug!(
                "Notification webhook not configured, skipping dispatch for appointment {}",
                notification.appointment_id
            );
            return;
        }

        let result = self
            .client
            .post(&self.webhook_url)
            .json(notification)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(
                    "Booking notification dispatched for appointment {}",
                    notification.appointment_id
                );
            }
            Ok(response) => {
                warn!(
                    "Booking notification rejected ({}) for appointment {}",
                    response.status(),
                    notification.appointment_id
                );
            }
            Err(e) => {
                warn!(
                    "Booking notification failed for appointment {}: {}",
                    notification.appointment_id, e
                );
            }
        }
    }
}
