// libs/appointment-cell/src/services/booking.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::PractitionerDirectory;
use patient_cell::models::Patient;
use patient_cell::PatientDirectory;
use shared_database::DatabaseError;
use shared_models::auth::{Actor, Role};

use crate::models::{
    Appointment, AppointmentError, AppointmentListQuery, AppointmentPage, AppointmentStatus,
    AppointmentValidationRules, CancelAppointmentRequest, ChangeStatusRequest,
    ConflictCheckResponse, CreateAppointmentRequest, DayAvailability, ForbiddenReason,
    NewAppointment, RescheduleAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::access::{resolve_status_change, resolve_write, AccessScope};
use crate::services::availability::{mark_slots, DaySlots};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::store::{AppointmentFilter, AppointmentStore, SortOrder};

pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    patients: Arc<dyn PatientDirectory>,
    practitioners: Arc<dyn PractitionerDirectory>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
    validation_rules: AppointmentValidationRules,
}

impl AppointmentBookingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        patients: Arc<dyn PatientDirectory>,
        practitioners: Arc<dyn PractitionerDirectory>,
        validation_rules: AppointmentValidationRules,
    ) -> Self {
        Self {
            conflict_service: ConflictDetectionService::new(Arc::clone(&store)),
            lifecycle_service: AppointmentLifecycleService::new(),
            store,
            patients,
            practitioners,
            validation_rules,
        }
    }

    /// Create a new appointment for a patient the actor may act for.
    pub async fn create_appointment(
        &self,
        actor: &Actor,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("{} {} booking for patient {} with practitioner {} at {}",
               actor.role, actor.user_id, request.patient_id, request.practitioner_id, request.start_time);

        self.lifecycle_service.validate_start_time(request.start_time, Utc::now())?;
        self.validate_reason(request.reason.as_deref())?;
        self.validate_notes(request.notes.as_deref())?;

        let patient = self.load_patient(request.patient_id, auth_token).await?;
        resolve_write(actor, &patient).map_err(AppointmentError::Forbidden)?;

        self.ensure_practitioner(request.practitioner_id, auth_token).await?;
        if let Some(location_id) = request.location_id {
            self.ensure_location(location_id, auth_token).await?;
        }

        self.ensure_slot_free(request.practitioner_id, request.start_time, None, auth_token).await?;

        let new_appointment = NewAppointment {
            patient_id: request.patient_id,
            practitioner_id: request.practitioner_id,
            location_id: request.location_id,
            start_time: request.start_time,
            status: AppointmentStatus::Scheduled,
            reason: request.reason,
            notes: request.notes,
        };

        let created = self
            .retry_write(|| self.store.insert(new_appointment.clone(), auth_token))
            .await
            .map_err(|e| write_error(e, request.practitioner_id, request.start_time))?;

        info!("Appointment {} booked for patient {} at {}", created.id, created.patient_id, created.start_time);
        Ok(created)
    }

    pub async fn get_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.load_visible(actor, appointment_id, auth_token).await
    }

    /// One page of the appointments visible to the actor, newest first.
    pub async fn list_appointments(
        &self,
        actor: &Actor,
        query: AppointmentListQuery,
        auth_token: &str,
    ) -> Result<AppointmentPage, AppointmentError> {
        let page = query.page.unwrap_or(1);
        if page == 0 {
            return Err(AppointmentError::ValidationError("Page must be at least 1".to_string()));
        }
        let limit = query.limit.unwrap_or(self.validation_rules.default_page_size);
        if limit == 0 || limit > self.validation_rules.max_page_size {
            return Err(AppointmentError::ValidationError(format!(
                "Limit must be between 1 and {}", self.validation_rules.max_page_size
            )));
        }

        let (start_from, start_before) = date_window(query.from, query.to)?;
        let mut filter = AppointmentFilter {
            patient_ids: query.patient_id.map(|id| vec![id]),
            practitioner_id: query.practitioner_id,
            location_id: query.location_id,
            statuses: query.status.map(|status| vec![status]),
            start_from,
            start_before,
            order: SortOrder::Descending,
            offset: (page - 1).saturating_mul(limit),
            limit,
        };

        let scope = self.read_scope(actor, auth_token).await?;
        if !scope.restrict(&mut filter) {
            debug!("Read scope of {} {} excludes the requested filter", actor.role, actor.user_id);
            return Ok(AppointmentPage::empty(page, limit));
        }

        let (appointments, total) = self.store.find_by_filter(&filter, auth_token).await?;
        Ok(AppointmentPage::new(appointments, total, page, limit))
    }

    pub async fn list_patient_appointments(
        &self,
        actor: &Actor,
        patient_id: Uuid,
        query: AppointmentListQuery,
        auth_token: &str,
    ) -> Result<AppointmentPage, AppointmentError> {
        self.load_patient(patient_id, auth_token).await?;
        let query = AppointmentListQuery { patient_id: Some(patient_id), ..query };
        self.list_appointments(actor, query, auth_token).await
    }

    pub async fn list_practitioner_appointments(
        &self,
        actor: &Actor,
        practitioner_id: Uuid,
        query: AppointmentListQuery,
        auth_token: &str,
    ) -> Result<AppointmentPage, AppointmentError> {
        self.ensure_practitioner(practitioner_id, auth_token).await?;
        let query = AppointmentListQuery { practitioner_id: Some(practitioner_id), ..query };
        self.list_appointments(actor, query, auth_token).await
    }

    /// Scheduled appointments in the next `days` days, soonest first.
    pub async fn upcoming_appointments(
        &self,
        actor: &Actor,
        days: Option<i64>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let days = days.unwrap_or(self.validation_rules.default_upcoming_days);
        if !(1..=self.validation_rules.max_upcoming_days).contains(&days) {
            return Err(AppointmentError::ValidationError(format!(
                "Days must be between 1 and {}", self.validation_rules.max_upcoming_days
            )));
        }

        let now = Utc::now();
        let mut filter = AppointmentFilter {
            statuses: Some(vec![AppointmentStatus::Scheduled]),
            start_from: Some(now),
            start_before: Some(now + chrono::Duration::days(days)),
            order: SortOrder::Ascending,
            offset: 0,
            limit: self.validation_rules.max_upcoming_results,
            ..Default::default()
        };

        let scope = self.read_scope(actor, auth_token).await?;
        if !scope.restrict(&mut filter) {
            return Ok(Vec::new());
        }

        let (appointments, _) = self.store.find_by_filter(&filter, auth_token).await?;
        Ok(appointments)
    }

    /// Edit time, location, reason or notes of an open appointment.
    pub async fn update_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.load_visible(actor, appointment_id, auth_token).await?;
        self.lifecycle_service.ensure_modifiable(&appointment.status)?;

        let patient = self.load_patient(appointment.patient_id, auth_token).await?;
        resolve_write(actor, &patient).map_err(AppointmentError::Forbidden)?;

        if request.is_empty() {
            return Err(AppointmentError::ValidationError("No fields to update".to_string()));
        }
        self.validate_reason(request.reason.as_deref())?;
        self.validate_notes(request.notes.as_deref())?;

        if let Some(location_id) = request.location_id {
            self.ensure_location(location_id, auth_token).await?;
            appointment.location_id = Some(location_id);
        }

        if let Some(start_time) = request.start_time.filter(|t| *t != appointment.start_time) {
            self.lifecycle_service.validate_start_time(start_time, Utc::now())?;
            self.ensure_slot_free(appointment.practitioner_id, start_time, Some(appointment.id), auth_token).await?;
            appointment.start_time = start_time;
        }

        if request.reason.is_some() {
            appointment.reason = request.reason;
        }
        if request.notes.is_some() {
            appointment.notes = request.notes;
        }

        let updated = self.persist(&appointment, auth_token).await?;
        info!("Appointment {} updated by {} {}", updated.id, actor.role, actor.user_id);
        Ok(updated)
    }

    pub async fn change_status(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: ChangeStatusRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        match request.reason.as_deref() {
            Some(reason) => self.validate_status_reason(reason)?,
            None if request.status == AppointmentStatus::Cancelled => {
                return Err(AppointmentError::ValidationError(
                    "A reason is required to cancel an appointment".to_string(),
                ));
            }
            None => {}
        }

        let mut appointment = self.load_visible(actor, appointment_id, auth_token).await?;
        let patient = self.load_patient(appointment.patient_id, auth_token).await?;
        let own_practitioner = self.own_practitioner(actor, auth_token).await?;
        resolve_status_change(actor, &patient, &appointment, own_practitioner)
            .map_err(AppointmentError::Forbidden)?;

        self.lifecycle_service.validate_status_transition(&appointment.status, &request.status)?;

        if let Some(reason) = request.reason.as_deref() {
            appointment.notes = Some(self.lifecycle_service.status_change_note(
                appointment.notes.as_deref(),
                Utc::now(),
                &request.status,
                reason.trim(),
            ));
        }
        let previous = appointment.status;
        appointment.status = request.status;

        let updated = self.persist(&appointment, auth_token).await?;
        info!("Appointment {} moved from {} to {} by {} {}",
              updated.id, previous, updated.status, actor.role, actor.user_id);
        Ok(updated)
    }

    /// Cancellation keeps the row and records the reason in the notes.
    pub async fn cancel_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let change = ChangeStatusRequest {
            status: AppointmentStatus::Cancelled,
            reason: Some(request.reason),
        };
        self.change_status(actor, appointment_id, change, auth_token).await
    }

    /// Move an open appointment to a new start time and mark it rescheduled.
    pub async fn reschedule_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if let Some(reason) = request.reason.as_deref() {
            self.validate_status_reason(reason)?;
        }

        let mut appointment = self.load_visible(actor, appointment_id, auth_token).await?;
        self.lifecycle_service.ensure_modifiable(&appointment.status)?;

        let patient = self.load_patient(appointment.patient_id, auth_token).await?;
        resolve_write(actor, &patient).map_err(AppointmentError::Forbidden)?;

        self.lifecycle_service
            .validate_status_transition(&appointment.status, &AppointmentStatus::Rescheduled)?;
        self.lifecycle_service.validate_start_time(request.new_start_time, Utc::now())?;
        self.ensure_slot_free(appointment.practitioner_id, request.new_start_time, Some(appointment.id), auth_token)
            .await?;

        let mut note = format!(
            "Rescheduled from {} to {}",
            appointment.start_time.format("%Y-%m-%d %H:%M"),
            request.new_start_time.format("%Y-%m-%d %H:%M"),
        );
        if let Some(reason) = request.reason.as_deref() {
            note = format!("{}: {}", note, reason.trim());
        }
        appointment.notes = Some(self.lifecycle_service.append_note(
            appointment.notes.as_deref(),
            Utc::now(),
            &note,
        ));
        appointment.start_time = request.new_start_time;
        appointment.status = AppointmentStatus::Rescheduled;

        let updated = self.persist(&appointment, auth_token).await?;
        info!("Appointment {} rescheduled to {}", updated.id, updated.start_time);
        Ok(updated)
    }

    /// Hourly slots of a practitioner for one day.
    pub async fn practitioner_availability(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<DayAvailability, AppointmentError> {
        self.ensure_practitioner(practitioner_id, auth_token).await?;

        let day = DaySlots::new(date);
        let booked = self.store
            .find_by_practitioner_and_timerange(practitioner_id, day.opening(), day.closing(), auth_token)
            .await?;

        Ok(DayAvailability {
            practitioner_id,
            date,
            slots: mark_slots(date, &booked),
        })
    }

    pub async fn check_conflicts(
        &self,
        practitioner_id: Uuid,
        proposed_start: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        self.ensure_practitioner(practitioner_id, auth_token).await?;
        Ok(self.conflict_service
            .check_conflicts(practitioner_id, proposed_start, exclude_appointment_id, auth_token)
            .await?)
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    async fn load_patient(&self, patient_id: Uuid, auth_token: &str) -> Result<Patient, AppointmentError> {
        self.patients.find(patient_id, auth_token).await?
            .ok_or(AppointmentError::PatientNotFound)
    }

    async fn ensure_practitioner(&self, practitioner_id: Uuid, auth_token: &str) -> Result<(), AppointmentError> {
        self.practitioners.find(practitioner_id, auth_token).await?
            .map(|_| ())
            .ok_or(AppointmentError::PractitionerNotFound)
    }

    async fn ensure_location(&self, location_id: Uuid, auth_token: &str) -> Result<(), AppointmentError> {
        self.practitioners.find_location(location_id, auth_token).await?
            .map(|_| ())
            .ok_or(AppointmentError::LocationNotFound)
    }

    async fn own_practitioner(&self, actor: &Actor, auth_token: &str) -> Result<Option<Uuid>, AppointmentError> {
        if actor.role != Role::Doctor {
            return Ok(None);
        }
        Ok(self.practitioners.find_by_user(actor.user_id, auth_token).await?.map(|d| d.id))
    }

    async fn read_scope(&self, actor: &Actor, auth_token: &str) -> Result<AccessScope, AppointmentError> {
        let scope = match actor.role {
            Role::Admin => AccessScope::All,
            Role::Patient => {
                let own = self.patients.find_by_user(actor.user_id, auth_token).await?.map(|p| p.id);
                AccessScope::for_actor(actor, own, Vec::new(), None)
            }
            Role::Caregiver => {
                let assigned = self.patients.ids_for_caregiver(actor.user_id, auth_token).await?;
                AccessScope::for_actor(actor, None, assigned, None)
            }
            Role::Doctor => {
                let own = self.own_practitioner(actor, auth_token).await?;
                AccessScope::for_actor(actor, None, Vec::new(), own)
            }
        };
        Ok(scope)
    }

    async fn load_visible(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.store.find(appointment_id, auth_token).await?
            .ok_or(AppointmentError::NotFound)?;

        if !self.read_scope(actor, auth_token).await?.permits(&appointment) {
            warn!("{} {} denied access to appointment {}", actor.role, actor.user_id, appointment_id);
            let reason = match actor.role {
                Role::Doctor => ForbiddenReason::WrongPractitioner,
                _ => ForbiddenReason::NotOwner,
            };
            return Err(AppointmentError::Forbidden(reason));
        }

        Ok(appointment)
    }

    async fn ensure_slot_free(
        &self,
        practitioner_id: Uuid,
        start_time: DateTime<Utc>,
        exclude: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let check = self.conflict_service
            .check_conflicts(practitioner_id, start_time, exclude, auth_token)
            .await?;

        if check.has_conflict {
            return Err(AppointmentError::ScheduleConflict { practitioner_id, start_time });
        }
        Ok(())
    }

    async fn persist(&self, appointment: &Appointment, auth_token: &str) -> Result<Appointment, AppointmentError> {
        self.retry_write(|| self.store.update(appointment, auth_token))
            .await
            .map_err(|e| write_error(e, appointment.practitioner_id, appointment.start_time))
    }

    /// Re-run a store write while it fails with a serialization conflict.
    async fn retry_write<T, F, Fut>(&self, mut write: F) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        let max_attempts = self.validation_rules.max_write_attempts.max(1);
        let mut attempt = 1;

        loop {
            match write().await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!("Write failed with {}, retrying attempt {}/{}", e, attempt + 1, max_attempts);
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn validate_reason(&self, reason: Option<&str>) -> Result<(), AppointmentError> {
        let Some(reason) = reason else { return Ok(()) };
        let len = reason.trim().chars().count();
        let rules = &self.validation_rules;
        if len < rules.min_reason_length || len > rules.max_reason_length {
            return Err(AppointmentError::ValidationError(format!(
                "Reason must be between {} and {} characters",
                rules.min_reason_length, rules.max_reason_length
            )));
        }
        Ok(())
    }

    fn validate_notes(&self, notes: Option<&str>) -> Result<(), AppointmentError> {
        match notes {
            Some(notes) if notes.chars().count() > self.validation_rules.max_notes_length => {
                Err(AppointmentError::ValidationError(format!(
                    "Notes cannot exceed {} characters", self.validation_rules.max_notes_length
                )))
            }
            _ => Ok(()),
        }
    }

    fn validate_status_reason(&self, reason: &str) -> Result<(), AppointmentError> {
        let len = reason.trim().chars().count();
        let rules = &self.validation_rules;
        if len < rules.min_status_reason_length || len > rules.max_status_reason_length {
            return Err(AppointmentError::ValidationError(format!(
                "Reason must be between {} and {} characters",
                rules.min_status_reason_length, rules.max_status_reason_length
            )));
        }
        Ok(())
    }
}

/// An exclusion-constraint rejection means another booking won the race.
fn write_error(e: DatabaseError, practitioner_id: Uuid, start_time: DateTime<Utc>) -> AppointmentError {
    match e {
        DatabaseError::ExclusionViolation(_) => {
            warn!("Store rejected overlapping booking for practitioner {} at {}", practitioner_id, start_time);
            AppointmentError::ScheduleConflict { practitioner_id, start_time }
        }
        other => other.into(),
    }
}

/// `from` and `to` are inclusive calendar days.
fn date_window(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), AppointmentError> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(AppointmentError::ValidationError("'from' must not be after 'to'".to_string()));
        }
    }

    let start = from.map(|d| d.and_time(NaiveTime::MIN).and_utc());
    let end = match to {
        Some(d) => Some(
            d.checked_add_days(Days::new(1))
                .ok_or_else(|| AppointmentError::ValidationError("'to' is out of range".to_string()))?
                .and_time(NaiveTime::MIN)
                .and_utc(),
        ),
        None => None,
    };
    Ok((start, end))
}
