use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub notification_webhook_url: String,
    /// When true, a booking must name a professional.
    pub require_professional: bool,
    /// Closed days still produce a degraded slot window instead of refusing
    /// bookings. Kept as an explicit flag so the policy stays visible.
    pub allow_booking_when_closed: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("NOTIFICATION_WEBHOOK_URL not set, notifications disabled");
                    String::new()
                }),
            require_professional: env::var("REQUIRE_PROFESSIONAL")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            allow_booking_when_closed: env::var("ALLOW_BOOKING_WHEN_CLOSED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn notifications_configured(&self) -> bool {
        !self.notification_webhook_url.is_empty()
    }
}
