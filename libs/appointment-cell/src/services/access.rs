// libs/appointment-cell/src/services/access.rs
//
// Single place where role-based access to appointments is decided. Handlers
// never compare roles themselves.

use tracing::debug;
use uuid::Uuid;

use patient_cell::models::Patient;
use shared_models::auth::{Actor, Role};

use crate::models::{Appointment, ForbiddenReason};
use crate::services::store::AppointmentFilter;

/// Which appointments an actor may read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    All,
    Patients(Vec<Uuid>),
    Practitioner(Uuid),
    Nothing,
}

impl AccessScope {
    /// Build the read scope from the records linked to the actor.
    ///
    /// `own_patient` is the patient record of a patient actor, `assigned` the
    /// patients of a caregiver and `own_practitioner` the doctor record id of a
    /// doctor. Values irrelevant to the actor's role are ignored.
    pub fn for_actor(
        actor: &Actor,
        own_patient: Option<Uuid>,
        assigned: Vec<Uuid>,
        own_practitioner: Option<Uuid>,
    ) -> Self {
        match actor.role {
            Role::Admin => AccessScope::All,
            Role::Patient => own_patient
                .map(|id| AccessScope::Patients(vec![id]))
                .unwrap_or(AccessScope::Nothing),
            Role::Caregiver if assigned.is_empty() => AccessScope::Nothing,
            Role::Caregiver => AccessScope::Patients(assigned),
            Role::Doctor => own_practitioner
                .map(AccessScope::Practitioner)
                .unwrap_or(AccessScope::Nothing),
        }
    }

    pub fn permits(&self, appointment: &Appointment) -> bool {
        match self {
            AccessScope::All => true,
            AccessScope::Patients(ids) => ids.contains(&appointment.patient_id),
            AccessScope::Practitioner(id) => appointment.practitioner_id == *id,
            AccessScope::Nothing => false,
        }
    }

    /// Intersect the scope with a caller-supplied filter. Returns `false` when
    /// the intersection is empty and the query need not run.
    pub fn restrict(&self, filter: &mut AppointmentFilter) -> bool {
        match self {
            AccessScope::All => true,
            AccessScope::Nothing => false,
            AccessScope::Practitioner(id) => match filter.practitioner_id {
                Some(requested) if requested != *id => false,
                _ => {
                    filter.practitioner_id = Some(*id);
                    true
                }
            },
            AccessScope::Patients(ids) => {
                let visible: Vec<Uuid> = match &filter.patient_ids {
                    Some(requested) => requested.iter().copied().filter(|id| ids.contains(id)).collect(),
                    None => ids.clone(),
                };
                if visible.is_empty() {
                    return false;
                }
                filter.patient_ids = Some(visible);
                true
            }
        }
    }
}

/// May the actor create or edit appointments of this patient? First match wins.
pub fn resolve_write(actor: &Actor, patient: &Patient) -> Result<(), ForbiddenReason> {
    let verdict = match actor.role {
        Role::Admin => Ok(()),
        Role::Patient if patient.is_owned_by(actor.user_id) => {
            if patient.has_caregiver() {
                Err(ForbiddenReason::DelegationRequired)
            } else {
                Ok(())
            }
        }
        Role::Caregiver if patient.is_assigned_to(actor.user_id) => Ok(()),
        Role::Caregiver | Role::Patient => Err(ForbiddenReason::NotOwner),
        Role::Doctor => Err(ForbiddenReason::RoleNotPermitted),
    };

    if let Err(reason) = verdict {
        debug!("{} {} denied write on patient {}: {:?}", actor.role, actor.user_id, patient.id, reason);
    }
    verdict
}

/// Status changes follow the write rules, except that a doctor may act on
/// appointments where they are the assigned practitioner.
pub fn resolve_status_change(
    actor: &Actor,
    patient: &Patient,
    appointment: &Appointment,
    own_practitioner: Option<Uuid>,
) -> Result<(), ForbiddenReason> {
    match actor.role {
        Role::Doctor if own_practitioner == Some(appointment.practitioner_id) => Ok(()),
        Role::Doctor => Err(ForbiddenReason::WrongPractitioner),
        _ => resolve_write(actor, patient),
    }
}
