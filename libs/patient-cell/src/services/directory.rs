use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Patient, PatientError};

/// Read side of the patient records, consumed by the appointment permission checks.
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn find(&self, patient_id: Uuid, auth_token: &str) -> Result<Option<Patient>, PatientError>;

    async fn find_by_user(&self, user_id: Uuid, auth_token: &str) -> Result<Option<Patient>, PatientError>;

    /// Ids of every patient whose assigned caregiver is `caregiver_id`.
    async fn ids_for_caregiver(&self, caregiver_id: Uuid, auth_token: &str) -> Result<Vec<Uuid>, PatientError>;
}
