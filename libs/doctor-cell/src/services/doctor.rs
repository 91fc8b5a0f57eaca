use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Doctor, DoctorError, Location};
use crate::services::directory::PractitionerDirectory;

pub struct DoctorService {
    supabase: Arc<SupabaseClient>,
}

impl DoctorService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Get doctor by ID
    pub async fn get_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Doctor, DoctorError> {
        self.find(doctor_id, auth_token).await?
            .ok_or(DoctorError::NotFound)
    }

    /// Doctors ordered by last name, optionally filtered by a case-insensitive
    /// specialty substring.
    pub async fn list_doctors(
        &self,
        specialty: Option<&str>,
        auth_token: &str,
    ) -> Result<Vec<Doctor>, DoctorError> {
        debug!("Listing doctors with specialty filter: {:?}", specialty);

        let mut path = "/rest/v1/doctors?order=last_name.asc".to_string();
        if let Some(specialty) = specialty.map(str::trim).filter(|s| !s.is_empty()) {
            path.push_str(&format!("&specialty=ilike.*{}*", urlencoding::encode(specialty)));
        }

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Doctor>, _>>()
            .map_err(|e| DoctorError::DatabaseError(format!("Failed to parse doctor: {}", e)))
    }

    async fn fetch_first<T>(&self, path: &str, auth_token: &str) -> Result<Option<T>, DoctorError>
    where T: DeserializeOwned {
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            Some(auth_token),
            None,
        ).await?;

        result.into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| DoctorError::DatabaseError(format!("Failed to parse row: {}", e)))
    }
}

#[async_trait]
impl PractitionerDirectory for DoctorService {
    async fn find(&self, doctor_id: Uuid, auth_token: &str) -> Result<Option<Doctor>, DoctorError> {
        debug!("Fetching doctor profile: {}", doctor_id);
        self.fetch_first(&format!("/rest/v1/doctors?id=eq.{}", doctor_id), auth_token).await
    }

    async fn find_by_user(&self, user_id: Uuid, auth_token: &str) -> Result<Option<Doctor>, DoctorError> {
        debug!("Fetching doctor profile for user: {}", user_id);
        self.fetch_first(&format!("/rest/v1/doctors?user_id=eq.{}", user_id), auth_token).await
    }

    async fn find_location(&self, location_id: Uuid, auth_token: &str) -> Result<Option<Location>, DoctorError> {
        debug!("Fetching location: {}", location_id);
        self.fetch_first(&format!("/rest/v1/locations?id=eq.{}", location_id), auth_token).await
    }
}
