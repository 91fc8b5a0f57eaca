use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;
use shared_models::auth::{Actor, Role};

use crate::models::{AssignCaregiverRequest, Patient, PatientError};
use crate::services::directory::PatientDirectory;

pub struct PatientService {
    supabase: Arc<SupabaseClient>,
}

impl PatientService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Fetch a patient record the actor is allowed to see.
    pub async fn get_patient(
        &self,
        actor: &Actor,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let patient = self.find(patient_id, auth_token).await?
            .ok_or(PatientError::NotFound)?;

        if !can_view(actor, &patient) {
            warn!("{} {} denied access to patient {}", actor.role, actor.user_id, patient_id);
            return Err(PatientError::Unauthorized);
        }

        Ok(patient)
    }

    /// Patients visible to the actor: the caregiver's assigned patients, or the
    /// patient's own record.
    pub async fn list_assigned_patients(
        &self,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        let filter = match actor.role {
            Role::Caregiver => format!("caregiver_id=eq.{}", actor.user_id),
            Role::Patient => format!("user_id=eq.{}", actor.user_id),
            Role::Admin => "caregiver_id=not.is.null".to_string(),
            Role::Doctor => return Err(PatientError::Unauthorized),
        };

        let path = format!("/rest/v1/patients?{}&order=last_name.asc", filter);
        self.fetch_patients(&path, auth_token).await
    }

    /// Assign or clear the caregiver of a patient. Admin only.
    pub async fn assign_caregiver(
        &self,
        actor: &Actor,
        patient_id: Uuid,
        request: AssignCaregiverRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        if !actor.is_admin() {
            return Err(PatientError::Unauthorized);
        }

        let patient = self.find(patient_id, auth_token).await?
            .ok_or(PatientError::NotFound)?;

        if request.caregiver_id == Some(patient.user_id) {
            return Err(PatientError::ValidationError(
                "A patient cannot be their own caregiver".to_string()
            ));
        }

        let update_data = json!({
            "caregiver_id": request.caregiver_id,
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(update_data),
            Some(headers),
        ).await?;

        let updated = result.into_iter().next()
            .ok_or(PatientError::NotFound)
            .and_then(parse_patient)?;

        match updated.caregiver_id {
            Some(caregiver_id) => info!("Caregiver {} assigned to patient {}", caregiver_id, patient_id),
            None => info!("Caregiver cleared for patient {}", patient_id),
        }

        Ok(updated)
    }

    async fn fetch_patients(&self, path: &str, auth_token: &str) -> Result<Vec<Patient>, PatientError> {
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            Some(auth_token),
            None,
        ).await?;

        result.into_iter().map(parse_patient).collect()
    }

    async fn fetch_one(&self, path: &str, auth_token: &str) -> Result<Option<Patient>, PatientError> {
        Ok(self.fetch_patients(path, auth_token).await?.into_iter().next())
    }
}

#[async_trait]
impl PatientDirectory for PatientService {
    async fn find(&self, patient_id: Uuid, auth_token: &str) -> Result<Option<Patient>, PatientError> {
        debug!("Fetching patient: {}", patient_id);
        self.fetch_one(&format!("/rest/v1/patients?id=eq.{}", patient_id), auth_token).await
    }

    async fn find_by_user(&self, user_id: Uuid, auth_token: &str) -> Result<Option<Patient>, PatientError> {
        debug!("Fetching patient record for user: {}", user_id);
        self.fetch_one(&format!("/rest/v1/patients?user_id=eq.{}", user_id), auth_token).await
    }

    async fn ids_for_caregiver(&self, caregiver_id: Uuid, auth_token: &str) -> Result<Vec<Uuid>, PatientError> {
        debug!("Fetching patients assigned to caregiver: {}", caregiver_id);

        let path = format!("/rest/v1/patients?caregiver_id=eq.{}&select=id", caregiver_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        parse_patient_ids(&result)
    }
}

/// A row without a valid `id` fails the whole lookup rather than shrinking
/// the caregiver's scope.
fn parse_patient_ids(rows: &[Value]) -> Result<Vec<Uuid>, PatientError> {
    rows.iter()
        .map(|row| {
            row.get("id")
                .and_then(Value::as_str)
                .and_then(|id| Uuid::parse_str(id).ok())
                .ok_or_else(|| PatientError::DatabaseError(format!("Invalid patient id in row: {}", row)))
        })
        .collect()
}

fn parse_patient(row: Value) -> Result<Patient, PatientError> {
    serde_json::from_value(row)
        .map_err(|e| PatientError::DatabaseError(format!("Failed to parse patient: {}", e)))
}

/// Admins and doctors see any patient; patients see themselves; caregivers see
/// the patients assigned to them.
pub fn can_view(actor: &Actor, patient: &Patient) -> bool {
    match actor.role {
        Role::Admin | Role::Doctor => true,
        Role::Patient => patient.is_owned_by(actor.user_id),
        Role::Caregiver => patient.is_assigned_to(actor.user_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(user_id: Uuid, caregiver_id: Option<Uuid>) -> Patient {
        Patient {
            id: Uuid::new_v4(),
            user_id,
            first_name: "Rosa".to_string(),
            last_name: "Quispe".to_string(),
            email: None,
            caregiver_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn caregiver_sees_only_assigned_patients() {
        let caregiver = Actor::new(Uuid::new_v4(), Role::Caregiver);
        assert!(can_view(&caregiver, &patient(Uuid::new_v4(), Some(caregiver.user_id))));
        assert!(!can_view(&caregiver, &patient(Uuid::new_v4(), Some(Uuid::new_v4()))));
        assert!(!can_view(&caregiver, &patient(Uuid::new_v4(), None)));
    }

    #[test]
    fn patient_sees_only_own_record() {
        let me = Actor::new(Uuid::new_v4(), Role::Patient);
        assert!(can_view(&me, &patient(me.user_id, None)));
        assert!(!can_view(&me, &patient(Uuid::new_v4(), None)));
    }

    #[test]
    fn patient_ids_are_read_from_rows() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let rows = vec![json!({ "id": first }), json!({ "id": second })];
        assert_eq!(parse_patient_ids(&rows).unwrap(), vec![first, second]);
        assert!(parse_patient_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn malformed_patient_id_is_an_error() {
        let rows = vec![json!({ "id": Uuid::new_v4() }), json!({ "id": "not-a-uuid" })];
        assert!(matches!(parse_patient_ids(&rows), Err(PatientError::DatabaseError(_))));

        let rows = vec![json!({ "name": "Rosa" })];
        assert!(matches!(parse_patient_ids(&rows), Err(PatientError::DatabaseError(_))));
    }

    #[test]
    fn staff_roles_see_everyone() {
        let record = patient(Uuid::new_v4(), None);
        assert!(can_view(&Actor::new(Uuid::new_v4(), Role::Admin), &record));
        assert!(can_view(&Actor::new(Uuid::new_v4(), Role::Doctor), &record));
    }
}
