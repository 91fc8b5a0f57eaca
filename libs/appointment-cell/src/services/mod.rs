pub mod access;
pub mod availability;
pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod store;

pub use booking::AppointmentBookingService;
pub use store::{AppointmentStore, SupabaseAppointmentStore};
