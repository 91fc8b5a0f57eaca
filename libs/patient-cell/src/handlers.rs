use axum::{
    extract::{Path, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::Actor;
use shared_models::error::AppError;

use crate::models::{AssignCaregiverRequest, PatientError};
use crate::router::PatientState;

impl From<PatientError> for AppError {
    fn from(e: PatientError) -> Self {
        match e {
            PatientError::NotFound => AppError::NotFound("Patient not found".to_string()),
            PatientError::Unauthorized => AppError::Forbidden("Unauthorized access to patient data".to_string()),
            PatientError::ValidationError(msg) => AppError::ValidationError(msg),
            PatientError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

#[axum::debug_handler]
pub async fn get_patient(
    State(state): State<PatientState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(actor): Extension<Actor>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let patient = state.patients.get_patient(&actor, patient_id, auth.token()).await?;

    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn list_assigned_patients(
    State(state): State<PatientState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Value>, AppError> {
    let patients = state.patients.list_assigned_patients(&actor, auth.token()).await?;

    Ok(Json(json!({
        "patients": patients,
        "total": patients.len()
    })))
}

#[axum::debug_handler]
pub async fn assign_caregiver(
    State(state): State<PatientState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(actor): Extension<Actor>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<AssignCaregiverRequest>,
) -> Result<Json<Value>, AppError> {
    let patient = state.patients
        .assign_caregiver(&actor, patient_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "patient": patient,
        "message": if patient.has_caregiver() {
            "Caregiver assigned; appointments are now managed by the caregiver"
        } else {
            "Caregiver removed; the patient manages their own appointments"
        }
    })))
}
