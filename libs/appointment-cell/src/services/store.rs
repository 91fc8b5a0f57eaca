use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use shared_database::{DatabaseError, SupabaseClient};

use crate::models::{Appointment, AppointmentStatus, NewAppointment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Row predicate for list queries. `None` fields are unconstrained.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppointmentFilter {
    pub patient_ids: Option<Vec<Uuid>>,
    pub practitioner_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub statuses: Option<Vec<AppointmentStatus>>,
    pub start_from: Option<DateTime<Utc>>,
    pub start_before: Option<DateTime<Utc>>,
    pub order: SortOrder,
    pub offset: u32,
    pub limit: u32,
}

impl AppointmentFilter {
    /// Whether a row satisfies every constraint except paging and order.
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.patient_ids.as_ref().is_none_or(|ids| ids.contains(&appointment.patient_id))
            && self.practitioner_id.is_none_or(|id| id == appointment.practitioner_id)
            && self.location_id.is_none_or(|id| appointment.location_id == Some(id))
            && self.statuses.as_ref().is_none_or(|s| s.contains(&appointment.status))
            && self.start_from.is_none_or(|from| appointment.start_time >= from)
            && self.start_before.is_none_or(|before| appointment.start_time < before)
    }
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn find(&self, appointment_id: Uuid, auth_token: &str) -> Result<Option<Appointment>, DatabaseError>;

    /// Appointments of a practitioner starting in `[start, end)`, in any status.
    async fn find_by_practitioner_and_timerange(
        &self,
        practitioner_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, DatabaseError>;

    /// One page of matching rows plus the total number of matches.
    async fn find_by_filter(
        &self,
        filter: &AppointmentFilter,
        auth_token: &str,
    ) -> Result<(Vec<Appointment>, u64), DatabaseError>;

    async fn insert(&self, appointment: NewAppointment, auth_token: &str) -> Result<Appointment, DatabaseError>;

    async fn update(&self, appointment: &Appointment, auth_token: &str) -> Result<Appointment, DatabaseError>;
}

pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn representation_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn find(&self, appointment_id: Uuid, auth_token: &str) -> Result<Option<Appointment>, DatabaseError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows: Vec<Appointment> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(rows.into_iter().next())
    }

    async fn find_by_practitioner_and_timerange(
        &self,
        practitioner_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, DatabaseError> {
        debug!("Fetching appointments for practitioner {} in [{}, {})", practitioner_id, start, end);

        let path = format!(
            "/rest/v1/appointments?practitioner_id=eq.{}&start_time=gte.{}&start_time=lt.{}&order=start_time.asc",
            practitioner_id,
            encode_timestamp(start),
            encode_upper_bound(end),
        );

        self.supabase.request(Method::GET, &path, Some(auth_token), None).await
    }

    async fn find_by_filter(
        &self,
        filter: &AppointmentFilter,
        auth_token: &str,
    ) -> Result<(Vec<Appointment>, u64), DatabaseError> {
        let path = format!("/rest/v1/appointments?{}", filter_query(filter));
        debug!("Listing appointments: {}", path);

        let (rows, total): (Vec<Appointment>, Option<u64>) = self.supabase
            .request_with_count(&path, Some(auth_token))
            .await?;

        let total = total.unwrap_or(rows.len() as u64);
        Ok((rows, total))
    }

    async fn insert(&self, appointment: NewAppointment, auth_token: &str) -> Result<Appointment, DatabaseError> {
        let body = serde_json::to_value(&appointment)
            .map_err(|e| DatabaseError::Decode(e.to_string()))?;

        let rows: Vec<Appointment> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/appointments",
            Some(auth_token),
            Some(body),
            Some(Self::representation_headers()),
        ).await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| DatabaseError::Decode("Insert returned no rows".to_string()))
    }

    async fn update(&self, appointment: &Appointment, auth_token: &str) -> Result<Appointment, DatabaseError> {
        let body = json!({
            "location_id": appointment.location_id,
            "start_time": appointment.start_time.to_rfc3339(),
            "status": appointment.status,
            "reason": appointment.reason,
            "notes": appointment.notes,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment.id);
        let rows: Vec<Appointment> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
            Some(Self::representation_headers()),
        ).await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| DatabaseError::NotFound(format!("appointment {}", appointment.id)))
    }
}

/// Postgres keeps microseconds, so both bounds are sent at that precision.
fn encode_timestamp(at: DateTime<Utc>) -> String {
    urlencoding::encode(&at.to_rfc3339_opts(SecondsFormat::Micros, true)).into_owned()
}

/// Exclusive upper bounds round up so no stored row below `at` is cut off.
fn encode_upper_bound(at: DateTime<Utc>) -> String {
    let truncated = at.trunc_subsecs(6);
    if truncated < at {
        encode_timestamp(truncated + Duration::microseconds(1))
    } else {
        encode_timestamp(truncated)
    }
}

/// PostgREST query string for a filter, including order and paging.
pub fn filter_query(filter: &AppointmentFilter) -> String {
    let mut params = Vec::new();

    if let Some(ids) = &filter.patient_ids {
        let joined = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
        params.push(format!("patient_id=in.({})", joined));
    }
    if let Some(id) = filter.practitioner_id {
        params.push(format!("practitioner_id=eq.{}", id));
    }
    if let Some(id) = filter.location_id {
        params.push(format!("location_id=eq.{}", id));
    }
    if let Some(statuses) = &filter.statuses {
        let joined = statuses.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        params.push(format!("status=in.({})", joined));
    }
    if let Some(from) = filter.start_from {
        params.push(format!("start_time=gte.{}", encode_timestamp(from)));
    }
    if let Some(before) = filter.start_before {
        params.push(format!("start_time=lt.{}", encode_upper_bound(before)));
    }

    let direction = match filter.order {
        SortOrder::Ascending => "asc",
        SortOrder::Descending => "desc",
    };
    params.push(format!("order=start_time.{}", direction));
    params.push(format!("offset={}", filter.offset));
    params.push(format!("limit={}", filter.limit));

    params.join("&")
}
