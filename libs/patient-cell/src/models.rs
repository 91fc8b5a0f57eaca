use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use shared_database::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: Uuid,
    /// Identity of the login that owns this record.
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    /// Identity of the assigned caregiver. When set, the caregiver manages
    /// this patient's appointments instead of the patient.
    pub caregiver_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn has_caregiver(&self) -> bool {
        self.caregiver_id.is_some()
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    pub fn is_assigned_to(&self, caregiver_id: Uuid) -> bool {
        self.caregiver_id == Some(caregiver_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignCaregiverRequest {
    /// `None` clears the assignment and returns the patient to self-management.
    pub caregiver_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum PatientError {
    #[error("Patient not found")]
    NotFound,

    #[error("Unauthorized access to patient data")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<DatabaseError> for PatientError {
    fn from(e: DatabaseError) -> Self {
        PatientError::DatabaseError(e.to_string())
    }
}
