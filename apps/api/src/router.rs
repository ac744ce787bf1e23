use std::sync::Arc;

use axum::{routing::get, Router};

use booking_cell::router::booking_routes;
use schedule_cell::router::schedule_routes;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .nest("/schedule", schedule_routes(state.clone()))
        .nest("/appointments", booking_routes(state.clone()))
}
