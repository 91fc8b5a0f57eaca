// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, patch},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::booking::AppointmentBookingService;

#[derive(Clone)]
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub booking: Arc<AppointmentBookingService>,
}

pub fn appointment_routes(state: AppointmentState) -> Router {
    Router::new()
        // Booking and queries
        .route("/", post(handlers::create_appointment).get(handlers::list_appointments))
        .route("/upcoming", get(handlers::get_upcoming_appointments))
        .route("/availability", get(handlers::get_availability))
        .route("/conflicts/check", get(handlers::check_conflicts))
        .route("/patients/{patient_id}", get(handlers::get_patient_appointments))
        .route("/practitioners/{practitioner_id}", get(handlers::get_practitioner_appointments))

        // Lifecycle
        .route("/{appointment_id}", get(handlers::get_appointment).put(handlers::update_appointment))
        .route("/{appointment_id}/status", patch(handlers::change_appointment_status))
        .route("/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
