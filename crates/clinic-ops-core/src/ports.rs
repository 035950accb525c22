//! Ports: the interfaces the engine depends on but does not implement.
//!
//! The SQLite adapter in [`crate::db`] implements all of them; tests substitute
//! in-memory fakes where a port has to misbehave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{
    Appointment, ClinicMembership, ClinicRole, Consultation, EventEnvelope, TimeSlot,
    WaitingRoomEntry, WaitingRoomStatus,
};

/// Failures reported by storage and query ports.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortError {
    /// A storage-level guard (unique index, exclusion trigger) rejected the write.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The row changed since it was loaded.
    #[error("Stale {kind} {id}: modified concurrently")]
    StaleVersion { kind: &'static str, id: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type PortResult<T> = Result<T, PortError>;

/// Failures of the cross-context scheduling call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinationError {
    #[error("Scheduling rejected the request: {0}")]
    Rejected(String),

    #[error("Scheduling did not answer within {after_ms} ms")]
    TimedOut { after_ms: u64 },

    #[error("Scheduling unavailable: {0}")]
    Unavailable(String),
}

// =========================================================================
// Eligibility
// =========================================================================

/// Answers "is this user an authorized member of this clinic right now?".
pub trait MembershipEligibilityChecker {
    fn is_user_eligible_for_clinic_at(
        &self,
        user_id: &str,
        clinic_id: &str,
        at: DateTime<Utc>,
        allowed_roles: &[ClinicRole],
    ) -> PortResult<bool>;

    fn list_eligible_practitioner_users_for_clinic(
        &self,
        clinic_id: &str,
        at: DateTime<Utc>,
        allowed_roles: &[ClinicRole],
    ) -> PortResult<Vec<String>>;
}

/// Read projection over stored memberships.
pub trait MembershipDirectory {
    fn find_membership(&self, clinic_id: &str, user_id: &str)
        -> PortResult<Option<ClinicMembership>>;

    fn memberships_for_clinic(&self, clinic_id: &str) -> PortResult<Vec<ClinicMembership>>;
}

pub trait MembershipStore {
    fn get_membership(&self, membership_id: &str) -> PortResult<Option<ClinicMembership>>;

    /// Fails with [`PortError::Constraint`] when `(clinic_id, user_id)` already exists.
    fn insert_membership(&self, membership: &ClinicMembership) -> PortResult<()>;

    /// Compare-and-swap on `version`.
    fn update_membership(&self, membership: &ClinicMembership) -> PortResult<()>;
}

// =========================================================================
// Scheduling
// =========================================================================

pub trait AppointmentConflictChecker {
    /// Whether a non-cancelled appointment for the clinic and practitioner overlaps `slot`.
    fn has_overlap(
        &self,
        clinic_id: &str,
        practitioner_user_id: &str,
        slot: &TimeSlot,
        exclude_appointment_id: Option<&str>,
    ) -> PortResult<bool>;
}

pub trait AppointmentStore {
    fn get_appointment(&self, appointment_id: &str) -> PortResult<Option<Appointment>>;

    /// Fails with [`PortError::Constraint`] when the slot collides at storage level.
    fn insert_appointment(&self, appointment: &Appointment) -> PortResult<()>;

    fn update_appointment(&self, appointment: &Appointment) -> PortResult<()>;
}

/// Cross-context call made after a consultation linked to an appointment closes.
pub trait SchedulingServiceCoordinator {
    fn complete_appointment(
        &self,
        appointment_id: &str,
        by_user_id: &str,
    ) -> Result<(), CoordinationError>;
}

// =========================================================================
// Waiting room
// =========================================================================

pub trait WaitingRoomReadRepository {
    fn has_active_entry_for_appointment(
        &self,
        clinic_id: &str,
        appointment_id: &str,
    ) -> PortResult<bool>;

    /// Statuses that make an entry count as active.
    fn active_statuses(&self) -> Vec<WaitingRoomStatus> {
        WaitingRoomStatus::ACTIVE.to_vec()
    }

    /// Active entries of a clinic, in no particular order.
    fn list_active(&self, clinic_id: &str) -> PortResult<Vec<WaitingRoomEntry>>;
}

pub trait WaitingRoomStore {
    fn get_entry(&self, entry_id: &str) -> PortResult<Option<WaitingRoomEntry>>;

    /// Fails with [`PortError::Constraint`] when the appointment already has an active entry.
    fn insert_entry(&self, entry: &WaitingRoomEntry) -> PortResult<()>;

    fn update_entry(&self, entry: &WaitingRoomEntry) -> PortResult<()>;
}

// =========================================================================
// Consultations
// =========================================================================

pub trait OwnerExistenceChecker {
    fn exists(&self, owner_id: &str) -> PortResult<bool>;
}

pub trait AnimalExistenceChecker {
    fn exists(&self, animal_id: &str) -> PortResult<bool>;
}

pub trait ConsultationStore {
    fn get_consultation(&self, consultation_id: &str) -> PortResult<Option<Consultation>>;

    fn insert_consultation(&self, consultation: &Consultation) -> PortResult<()>;

    fn update_consultation(&self, consultation: &Consultation) -> PortResult<()>;
}

// =========================================================================
// Events and coordination bookkeeping
// =========================================================================

/// Receives events drained from aggregates after they were persisted.
pub trait EventPublisher {
    fn publish(&self, envelopes: &[EventEnvelope]) -> PortResult<()>;
}

/// Lifecycle of a recorded coordination failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationFailureStatus {
    Pending,
    Resolved,
    Abandoned,
}

impl CoordinationFailureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinationFailureStatus::Pending => "pending",
            CoordinationFailureStatus::Resolved => "resolved",
            CoordinationFailureStatus::Abandoned => "abandoned",
        }
    }
}

/// A post-close `complete_appointment` call that has not gone through yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinationFailureRecord {
    pub failure_id: String,
    pub consultation_id: String,
    pub appointment_id: String,
    pub closed_by_user_id: String,
    pub last_error: String,
    pub attempts: u32,
    pub status: CoordinationFailureStatus,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}

/// Durable queue of coordination failures, drained by the reconciler.
pub trait CoordinationFailureLog {
    fn record_coordination_failure(&self, record: &CoordinationFailureRecord) -> PortResult<()>;

    /// Oldest pending records first.
    fn pending_coordination_failures(&self, limit: u32)
        -> PortResult<Vec<CoordinationFailureRecord>>;

    fn update_coordination_failure(&self, record: &CoordinationFailureRecord) -> PortResult<()>;
}
