use std::sync::Arc;

use axum::{middleware, routing::{get, put}, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::*;
use crate::services::PatientService;

#[derive(Clone)]
pub struct PatientState {
    pub config: Arc<AppConfig>,
    pub patients: Arc<PatientService>,
}

pub fn patient_routes(state: PatientState) -> Router {
    Router::new()
        .route("/assigned", get(list_assigned_patients))
        .route("/{patient_id}", get(get_patient))
        .route("/{patient_id}/caregiver", put(assign_caregiver))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
