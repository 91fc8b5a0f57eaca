pub mod directory;
pub mod patient;

pub use directory::PatientDirectory;
pub use patient::PatientService;
