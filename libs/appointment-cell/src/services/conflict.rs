use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::DatabaseError;

use crate::models::{appointment_duration, Appointment, ConflictCheckResponse, ConflictingSlot};
use crate::services::store::AppointmentStore;

/// Half-open interval overlap: touching endpoints do not conflict.
pub fn appointments_overlap(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && start2 < end1
}

/// Active appointments of `practitioner_id` that overlap a one-hour block at
/// `proposed_start`, ignoring `exclude` (the appointment being edited).
pub fn find_conflicts<'a>(
    existing: &'a [Appointment],
    practitioner_id: Uuid,
    proposed_start: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Vec<&'a Appointment> {
    let proposed_end = proposed_start + appointment_duration();

    existing
        .iter()
        .filter(|a| a.practitioner_id == practitioner_id)
        .filter(|a| a.is_active())
        .filter(|a| Some(a.id) != exclude)
        .filter(|a| appointments_overlap(proposed_start, proposed_end, a.start_time, a.end_time()))
        .collect()
}

/// Every appointment that could overlap a block at `proposed_start` starts in
/// `[proposed_start - duration, proposed_start + duration)`.
pub fn candidate_window(proposed_start: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        proposed_start - appointment_duration(),
        proposed_start + appointment_duration(),
    )
}

pub struct ConflictDetectionService {
    store: Arc<dyn AppointmentStore>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// Check for appointment conflicts for a practitioner at a specific time
    pub async fn check_conflicts(
        &self,
        practitioner_id: Uuid,
        proposed_start: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, DatabaseError> {
        debug!("Checking conflicts for practitioner {} at {}", practitioner_id, proposed_start);

        let (window_start, window_end) = candidate_window(proposed_start);
        let existing = self.store
            .find_by_practitioner_and_timerange(practitioner_id, window_start, window_end, auth_token)
            .await?;

        let conflicts: Vec<ConflictingSlot> =
            find_conflicts(&existing, practitioner_id, proposed_start, exclude_appointment_id)
                .into_iter()
                .map(ConflictingSlot::from)
                .collect();

        if !conflicts.is_empty() {
            warn!("Conflict detected for practitioner {} - {} conflicting appointments",
                  practitioner_id, conflicts.len());
        }

        Ok(ConflictCheckResponse {
            has_conflict: !conflicts.is_empty(),
            practitioner_id,
            proposed_start,
            proposed_end: proposed_start + appointment_duration(),
            conflicts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use crate::models::AppointmentStatus;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, minute, 0).unwrap()
    }

    fn booked(practitioner_id: Uuid, start: DateTime<Utc>, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            practitioner_id,
            location_id: None,
            start_time: start,
            status,
            reason: None,
            notes: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn back_to_back_blocks_do_not_conflict() {
        let doc = Uuid::new_v4();
        let existing = vec![booked(doc, at(9, 0), AppointmentStatus::Scheduled)];
        assert!(find_conflicts(&existing, doc, at(10, 0), None).is_empty());
        assert!(find_conflicts(&existing, doc, at(8, 0), None).is_empty());
    }

    #[test]
    fn partial_overlap_conflicts() {
        let doc = Uuid::new_v4();
        let existing = vec![booked(doc, at(9, 0), AppointmentStatus::Scheduled)];
        assert_eq!(find_conflicts(&existing, doc, at(9, 30), None).len(), 1);
        assert_eq!(find_conflicts(&existing, doc, at(8, 1), None).len(), 1);
    }

    #[test]
    fn containment_conflicts() {
        assert!(appointments_overlap(at(9, 0), at(11, 0), at(9, 30), at(10, 0)));
        assert!(appointments_overlap(at(9, 30), at(10, 0), at(9, 0), at(11, 0)));
    }

    #[test]
    fn overlap_is_symmetric_over_a_grid() {
        let base = at(8, 0);
        for a in 0..24 {
            for b in 0..24 {
                let s1 = base + Duration::minutes(a * 15);
                let s2 = base + Duration::minutes(b * 15);
                let expected = (a - b).abs() < 4;
                assert_eq!(
                    appointments_overlap(s1, s1 + appointment_duration(), s2, s2 + appointment_duration()),
                    expected,
                    "{} vs {}", s1, s2
                );
            }
        }
    }

    #[test]
    fn terminal_and_excluded_appointments_are_ignored() {
        let doc = Uuid::new_v4();
        let cancelled = booked(doc, at(9, 0), AppointmentStatus::Cancelled);
        let completed = booked(doc, at(9, 0), AppointmentStatus::Completed);
        let rescheduled = booked(doc, at(9, 0), AppointmentStatus::Rescheduled);
        let existing = vec![cancelled, completed, rescheduled.clone()];

        assert_eq!(find_conflicts(&existing, doc, at(9, 15), None).len(), 1);
        assert!(find_conflicts(&existing, doc, at(9, 15), Some(rescheduled.id)).is_empty());
    }

    #[test]
    fn other_practitioners_do_not_conflict() {
        let existing = vec![booked(Uuid::new_v4(), at(9, 0), AppointmentStatus::Scheduled)];
        assert!(find_conflicts(&existing, Uuid::new_v4(), at(9, 0), None).is_empty());
    }

    #[test]
    fn sub_second_starts_still_overlap() {
        let doc = Uuid::new_v4();
        let proposed = at(10, 0) + Duration::milliseconds(500);
        let existing = vec![booked(doc, at(11, 0) + Duration::milliseconds(200), AppointmentStatus::Scheduled)];

        let (_, window_end) = candidate_window(proposed);
        assert!(existing[0].start_time < window_end);
        assert_eq!(find_conflicts(&existing, doc, proposed, None).len(), 1);
    }

    #[test]
    fn window_covers_every_possible_overlap() {
        let (from, to) = candidate_window(at(10, 0));
        assert_eq!(from, at(9, 0));
        assert_eq!(to, at(11, 0));
    }
}
