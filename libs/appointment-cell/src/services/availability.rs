use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::models::{Appointment, AvailabilitySlot};

pub const OPENING_HOUR: i64 = 8;
pub const CLOSING_HOUR: i64 = 18;

/// Hourly slots of one calendar day (UTC) between opening and closing.
///
/// Cloning yields an independent iterator from the current position, so the
/// same day can be walked more than once.
#[derive(Debug, Clone)]
pub struct DaySlots {
    midnight: DateTime<Utc>,
    next_hour: i64,
}

impl DaySlots {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            midnight: date.and_time(NaiveTime::MIN).and_utc(),
            next_hour: OPENING_HOUR,
        }
    }

    /// Start of the working day, usable as a store query bound.
    pub fn opening(&self) -> DateTime<Utc> {
        self.midnight + Duration::hours(OPENING_HOUR)
    }

    pub fn closing(&self) -> DateTime<Utc> {
        self.midnight + Duration::hours(CLOSING_HOUR)
    }
}

impl Iterator for DaySlots {
    type Item = (DateTime<Utc>, DateTime<Utc>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_hour >= CLOSING_HOUR {
            return None;
        }
        let start = self.midnight + Duration::hours(self.next_hour);
        self.next_hour += 1;
        Some((start, start + Duration::hours(1)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (CLOSING_HOUR - self.next_hour).max(0) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DaySlots {}

/// Mark each slot unavailable if an active appointment starts inside it.
///
/// This is a "starts within" view, not occupancy. An off-grid booking at
/// 09:30 takes only the 09:00 slot, yet it runs until 10:30, so booking the
/// 10:00 slot that is still reported open is rejected by the overlap check.
/// An open slot is a hint; the conflict check at booking time is authoritative.
pub fn mark_slots(date: NaiveDate, appointments: &[Appointment]) -> Vec<AvailabilitySlot> {
    DaySlots::new(date)
        .map(|(start, end)| AvailabilitySlot {
            start_time: start,
            end_time: end,
            available: !appointments
                .iter()
                .any(|a| a.is_active() && a.start_time >= start && a.start_time < end),
        })
        .collect()
}
