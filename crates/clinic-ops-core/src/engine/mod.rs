//! Command handlers of the clinic operations engine.
//!
//! Every command follows the same unit of work: load one aggregate, let it
//! enforce its invariants, save it, flush its buffered events, and only then
//! perform any cross-aggregate coordination. Once the save has succeeded the
//! command succeeds; an event publish failure is logged and the events stay
//! buffered on the returned aggregate.

mod consultation;
mod coordination;
mod eligibility;
mod scheduler;
mod triage;

pub use consultation::*;
pub use coordination::*;
pub use eligibility::*;
pub use scheduler::*;
pub use triage::*;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, warn};

use crate::models::{Aggregate, ClinicRole, DomainError, EventEnvelope};
use crate::ports::{
    CoordinationError, EventPublisher, MembershipEligibilityChecker, PortError,
};

/// Errors reported at the command-handler boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpsError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid transition: cannot {action} {aggregate} while {state}")]
    InvalidTransition {
        aggregate: &'static str,
        action: &'static str,
        state: String,
    },

    #[error("Practitioner {practitioner_user_id} already has a booking overlapping {start}..{end}")]
    ConflictDetected {
        practitioner_user_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Appointment {appointment_id} already has an active waiting-room entry")]
    DuplicateActiveEntry { appointment_id: String },

    #[error("Referenced {kind} does not exist: {id}")]
    ReferencedEntityNotFound { kind: &'static str, id: String },

    #[error(transparent)]
    CoordinationFailure(#[from] CoordinationFailure),

    #[error("User {user_id} is not an eligible member of clinic {clinic_id}")]
    NotEligible { user_id: String, clinic_id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} {id} was modified concurrently; reload and retry")]
    ConcurrentModification { kind: &'static str, id: String },

    #[error("Port failure: {0}")]
    Port(PortError),
}

pub type OpsResult<T> = Result<T, OpsError>;

impl From<DomainError> for OpsError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::InvalidTransition {
                aggregate,
                action,
                state,
            } => OpsError::InvalidTransition {
                aggregate,
                action,
                state,
            },
            DomainError::InvalidInput(message) => OpsError::InvalidInput(message),
        }
    }
}

impl From<PortError> for OpsError {
    fn from(e: PortError) -> Self {
        match e {
            PortError::StaleVersion { kind, id } => OpsError::ConcurrentModification { kind, id },
            other => OpsError::Port(other),
        }
    }
}

/// A consultation closed durably but its linked appointment was not completed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Consultation {consultation_id} closed but appointment {appointment_id} was not completed: {reason}")]
pub struct CoordinationFailure {
    pub consultation_id: String,
    pub appointment_id: String,
    pub reason: CoordinationError,
    /// Id of the record queued for reconciliation, if it could be written
    pub failure_id: Option<String>,
}

/// Fail with [`OpsError::NotEligible`] unless `user_id` holds an allowed role in the clinic at `at`.
pub fn require_eligible(
    checker: &dyn MembershipEligibilityChecker,
    user_id: &str,
    clinic_id: &str,
    at: DateTime<Utc>,
    allowed_roles: &[ClinicRole],
) -> OpsResult<()> {
    if checker.is_user_eligible_for_clinic_at(user_id, clinic_id, at, allowed_roles)? {
        Ok(())
    } else {
        warn!(user_id, clinic_id, at = %at, "user not eligible for clinic");
        Err(OpsError::NotEligible {
            user_id: user_id.to_string(),
            clinic_id: clinic_id.to_string(),
        })
    }
}

/// Publish the events buffered on an aggregate whose change is already committed.
///
/// A publish failure never undoes the commit. The events go back into the
/// aggregate's buffer and the error is returned, so the caller can report it
/// and flush again later; republished envelopes keep their fingerprints.
pub fn flush_events<A: Aggregate>(
    publisher: &dyn EventPublisher,
    aggregate: &mut A,
) -> Result<(), PortError> {
    let events = aggregate.take_events();
    if events.is_empty() {
        return Ok(());
    }
    let envelopes = EventEnvelope::wrap(aggregate, events);
    match publisher.publish(&envelopes) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(
                aggregate = A::KIND,
                aggregate_id = aggregate.id(),
                events = envelopes.len(),
                error = %e,
                "committed change but failed to publish its events"
            );
            aggregate.restore_events(envelopes.into_iter().map(|envelope| envelope.event).collect());
            Err(e)
        }
    }
}

/// Map a storage constraint to a domain-specific error, leaving other failures as they are.
pub(crate) fn on_constraint(e: PortError, conflict: impl FnOnce() -> OpsError) -> OpsError {
    match e {
        PortError::Constraint(_) => conflict(),
        other => other.into(),
    }
}
