// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

pub struct AppointmentLifecycleService;

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: &AppointmentStatus,
        new_status: &AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidTransition {
                from: *current_status,
                to: Some(*new_status),
            });
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: &AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled | AppointmentStatus::Rescheduled => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rescheduled,
            ],
            // Terminal states
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::Cancelled => vec![],
        }
    }

    /// Field edits (time, location, reason, notes) are only accepted while the
    /// appointment is still open. No role bypasses this.
    pub fn ensure_modifiable(&self, current_status: &AppointmentStatus) -> Result<(), AppointmentError> {
        if current_status.is_terminal() {
            warn!("Attempted to modify a {} appointment", current_status);
            return Err(AppointmentError::InvalidTransition {
                from: *current_status,
                to: None,
            });
        }
        Ok(())
    }

    pub fn validate_start_time(
        &self,
        start_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if start_time <= now {
            return Err(AppointmentError::ValidationError(
                "Appointment start time must be in the future".to_string(),
            ));
        }
        Ok(())
    }

    /// Appends a timestamped line to the notes, keeping whatever was there.
    pub fn append_note(&self, notes: Option<&str>, at: DateTime<Utc>, text: &str) -> String {
        let entry = format!("[{}] {}", at.format("%Y-%m-%d %H:%M"), text);
        match notes {
            Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, entry),
            _ => entry,
        }
    }

    pub fn status_change_note(
        &self,
        notes: Option<&str>,
        at: DateTime<Utc>,
        new_status: &AppointmentStatus,
        reason: &str,
    ) -> String {
        self.append_note(
            notes,
            at,
            &format!("Status changed to '{}': {}", new_status, reason),
        )
    }
}
