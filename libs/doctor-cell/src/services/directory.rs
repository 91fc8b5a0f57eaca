use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Doctor, DoctorError, Location};

/// Lookups the scheduling core needs about practitioners and where they practice.
#[async_trait]
pub trait PractitionerDirectory: Send + Sync {
    async fn find(&self, doctor_id: Uuid, auth_token: &str) -> Result<Option<Doctor>, DoctorError>;

    /// The practitioner record linked to a login, if the user is a doctor.
    async fn find_by_user(&self, user_id: Uuid, auth_token: &str) -> Result<Option<Doctor>, DoctorError>;

    async fn find_location(&self, location_id: Uuid, auth_token: &str) -> Result<Option<Location>, DoctorError>;
}
