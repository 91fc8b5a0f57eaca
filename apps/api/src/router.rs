use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::models::AppointmentValidationRules;
use appointment_cell::router::{appointment_routes, AppointmentState};
use appointment_cell::services::{AppointmentBookingService, SupabaseAppointmentStore};
use doctor_cell::router::{doctor_routes, DoctorState};
use doctor_cell::DoctorService;
use patient_cell::{patient_routes, PatientService, PatientState};
use shared_config::AppConfig;
use shared_database::SupabaseClient;

/// Per-cell state, built once at startup and shared by every request.
#[derive(Clone)]
pub struct ApiState {
    pub patients: PatientState,
    pub doctors: DoctorState,
    pub appointments: AppointmentState,
}

pub fn build_state(config: Arc<AppConfig>) -> ApiState {
    let supabase = Arc::new(SupabaseClient::new(&config));

    let patients = Arc::new(PatientService::new(Arc::clone(&supabase)));
    let doctors = Arc::new(DoctorService::new(Arc::clone(&supabase)));
    let store = Arc::new(SupabaseAppointmentStore::new(Arc::clone(&supabase)));

    let rules = AppointmentValidationRules {
        max_write_attempts: config.appointment_write_retries.max(1),
        ..AppointmentValidationRules::default()
    };
    let booking = Arc::new(AppointmentBookingService::new(
        store,
        patients.clone(),
        doctors.clone(),
        rules,
    ));

    ApiState {
        patients: PatientState { config: Arc::clone(&config), patients },
        doctors: DoctorState { config: Arc::clone(&config), doctors },
        appointments: AppointmentState { config, booking },
    }
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/patients", patient_routes(state.patients))
        .nest("/practitioners", doctor_routes(state.doctors))
        .nest("/appointments", appointment_routes(state.appointments))
}
