pub mod directory;
pub mod doctor;

pub use directory::PractitionerDirectory;
pub use doctor::DoctorService;
