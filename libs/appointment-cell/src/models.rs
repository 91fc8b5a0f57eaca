// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fmt;

use doctor_cell::DoctorError;
use patient_cell::PatientError;
use shared_database::DatabaseError;

/// Every appointment occupies a fixed one-hour block.
pub const APPOINTMENT_DURATION_MINUTES: i64 = 60;

pub fn appointment_duration() -> Duration {
    Duration::minutes(APPOINTMENT_DURATION_MINUTES)
}

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub practitioner_id: Uuid,
    pub location_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Exclusive end of the half-open interval `[start_time, end_time)`.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + appointment_duration()
    }

    /// Whether the appointment still holds its slot.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    Rescheduled,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

/// Row payload for a new appointment; ids and timestamps are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub practitioner_id: Uuid,
    pub location_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub practitioner_id: Uuid,
    pub location_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub start_time: Option<DateTime<Utc>>,
    pub location_id: Option<Uuid>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl UpdateAppointmentRequest {
    pub fn is_empty(&self) -> bool {
        self.start_time.is_none()
            && self.location_id.is_none()
            && self.reason.is_none()
            && self.notes.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: AppointmentStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_start_time: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentListQuery {
    pub patient_id: Option<Uuid>,
    pub practitioner_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentPage {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
    pub appointments: Vec<Appointment>,
}

impl AppointmentPage {
    pub fn new(appointments: Vec<Appointment>, total: u64, page: u32, limit: u32) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total.div_ceil(u64::from(limit)) as u32
        };

        Self {
            total,
            page,
            limit,
            total_pages,
            appointments,
        }
    }

    pub fn empty(page: u32, limit: u32) -> Self {
        Self::new(Vec::new(), 0, page, limit)
    }
}

// ==============================================================================
// AVAILABILITY AND CONFLICT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilitySlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayAvailability {
    pub practitioner_id: Uuid,
    pub date: NaiveDate,
    pub slots: Vec<AvailabilitySlot>,
}

impl DayAvailability {
    pub fn available_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.available).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictingSlot {
    pub appointment_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
}

impl From<&Appointment> for ConflictingSlot {
    fn from(appointment: &Appointment) -> Self {
        Self {
            appointment_id: appointment.id,
            start_time: appointment.start_time,
            end_time: appointment.end_time(),
            status: appointment.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub practitioner_id: Uuid,
    pub proposed_start: DateTime<Utc>,
    pub proposed_end: DateTime<Utc>,
    pub conflicts: Vec<ConflictingSlot>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

/// Why an actor was denied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForbiddenReason {
    NotOwner,
    DelegationRequired,
    WrongPractitioner,
    RoleNotPermitted,
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForbiddenReason::NotOwner => {
                write!(f, "Appointments of this patient are not yours to manage")
            }
            ForbiddenReason::DelegationRequired => {
                write!(f, "Appointments must be managed by the patient's assigned caregiver")
            }
            ForbiddenReason::WrongPractitioner => {
                write!(f, "Only the assigned practitioner may act on this appointment")
            }
            ForbiddenReason::RoleNotPermitted => {
                write!(f, "Your role is not permitted to perform this action")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Practitioner not found")]
    PractitionerNotFound,

    #[error("Location not found")]
    LocationNotFound,

    #[error("{0}")]
    Forbidden(ForbiddenReason),

    #[error("Practitioner {practitioner_id} already has an appointment overlapping {start_time}")]
    ScheduleConflict {
        practitioner_id: Uuid,
        start_time: DateTime<Utc>,
    },

    /// `to` is `None` when the rejected change is a field edit rather than a status change.
    #[error("{}", transition_message(.from, .to))]
    InvalidTransition {
        from: AppointmentStatus,
        to: Option<AppointmentStatus>,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

fn transition_message(from: &AppointmentStatus, to: &Option<AppointmentStatus>) -> String {
    match to {
        Some(to) => format!("Cannot change appointment status from {} to {}", from, to),
        None => format!("A {} appointment cannot be modified", from),
    }
}

impl From<DatabaseError> for AppointmentError {
    fn from(e: DatabaseError) -> Self {
        AppointmentError::DatabaseError(e.to_string())
    }
}

impl From<PatientError> for AppointmentError {
    fn from(e: PatientError) -> Self {
        match e {
            PatientError::NotFound => AppointmentError::PatientNotFound,
            PatientError::Unauthorized => AppointmentError::Forbidden(ForbiddenReason::NotOwner),
            PatientError::ValidationError(msg) => AppointmentError::ValidationError(msg),
            PatientError::DatabaseError(msg) => AppointmentError::DatabaseError(msg),
        }
    }
}

impl From<DoctorError> for AppointmentError {
    fn from(e: DoctorError) -> Self {
        match e {
            DoctorError::NotFound => AppointmentError::PractitionerNotFound,
            DoctorError::DatabaseError(msg) => AppointmentError::DatabaseError(msg),
        }
    }
}

// ==============================================================================
// VALIDATION MODELS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct AppointmentValidationRules {
    pub min_reason_length: usize,
    pub max_reason_length: usize,
    pub max_notes_length: usize,
    pub min_status_reason_length: usize,
    pub max_status_reason_length: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub default_upcoming_days: i64,
    pub max_upcoming_days: i64,
    pub max_upcoming_results: u32,
    pub max_write_attempts: u32,
}

impl Default for AppointmentValidationRules {
    fn default() -> Self {
        Self {
            min_reason_length: 10,
            max_reason_length: 1000,
            max_notes_length: 2000,
            min_status_reason_length: 5,
            max_status_reason_length: 500,
            default_page_size: 10,
            max_page_size: 100,
            default_upcoming_days: 7,
            max_upcoming_days: 30,
            max_upcoming_results: 100,
            max_write_attempts: 3,
        }
    }
}
