//! Domain events buffered on aggregates and published after persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{ArrivalMode, ClinicRole, EngagementKind, NoteType, TimeSlot};

/// Something that happened to an aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    MembershipGranted {
        membership_id: String,
        clinic_id: String,
        user_id: String,
        role: ClinicRole,
        engagement: EngagementKind,
        occurred_at: DateTime<Utc>,
    },
    MembershipRoleChanged {
        membership_id: String,
        clinic_id: String,
        role: ClinicRole,
        occurred_at: DateTime<Utc>,
    },
    MembershipEngagementChanged {
        membership_id: String,
        clinic_id: String,
        engagement: EngagementKind,
        occurred_at: DateTime<Utc>,
    },
    MembershipValidityChanged {
        membership_id: String,
        clinic_id: String,
        valid_from: DateTime<Utc>,
        valid_until: Option<DateTime<Utc>>,
        occurred_at: DateTime<Utc>,
    },
    MembershipDisabled {
        membership_id: String,
        clinic_id: String,
        occurred_at: DateTime<Utc>,
    },
    MembershipEnabled {
        membership_id: String,
        clinic_id: String,
        occurred_at: DateTime<Utc>,
    },
    AppointmentScheduled {
        appointment_id: String,
        clinic_id: String,
        practitioner_user_id: String,
        slot: TimeSlot,
        occurred_at: DateTime<Utc>,
    },
    AppointmentRescheduled {
        appointment_id: String,
        clinic_id: String,
        previous_slot: TimeSlot,
        slot: TimeSlot,
        occurred_at: DateTime<Utc>,
    },
    AppointmentServiceStarted {
        appointment_id: String,
        clinic_id: String,
        occurred_at: DateTime<Utc>,
    },
    AppointmentCompleted {
        appointment_id: String,
        clinic_id: String,
        by_user_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    AppointmentCancelled {
        appointment_id: String,
        clinic_id: String,
        occurred_at: DateTime<Utc>,
    },
    PatientArrived {
        entry_id: String,
        clinic_id: String,
        arrival_mode: ArrivalMode,
        priority: i32,
        linked_appointment_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    TriageUpdated {
        entry_id: String,
        clinic_id: String,
        arrival_mode: ArrivalMode,
        priority: i32,
        occurred_at: DateTime<Utc>,
    },
    PatientCalled {
        entry_id: String,
        clinic_id: String,
        by_user_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    WaitingRoomServiceStarted {
        entry_id: String,
        clinic_id: String,
        by_user_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    WaitingRoomEntryClosed {
        entry_id: String,
        clinic_id: String,
        by_user_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    ConsultationOpened {
        consultation_id: String,
        clinic_id: String,
        practitioner_user_id: String,
        appointment_id: Option<String>,
        waiting_room_entry_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    PatientIdentityAttached {
        consultation_id: String,
        clinic_id: String,
        owner_id: Option<String>,
        animal_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    ChiefComplaintRecorded {
        consultation_id: String,
        clinic_id: String,
        occurred_at: DateTime<Utc>,
    },
    VitalsRecorded {
        consultation_id: String,
        clinic_id: String,
        weight_kg: Option<f64>,
        temperature_c: Option<f64>,
        occurred_at: DateTime<Utc>,
    },
    ClinicalNoteAdded {
        consultation_id: String,
        clinic_id: String,
        note_type: NoteType,
        author_id: String,
        occurred_at: DateTime<Utc>,
    },
    PerformedActAdded {
        consultation_id: String,
        clinic_id: String,
        label: String,
        quantity: f64,
        occurred_at: DateTime<Utc>,
    },
    ConsultationClosed {
        consultation_id: String,
        clinic_id: String,
        closed_by_user_id: String,
        appointment_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Snake-case event name, matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::MembershipGranted { .. } => "membership_granted",
            DomainEvent::MembershipRoleChanged { .. } => "membership_role_changed",
            DomainEvent::MembershipEngagementChanged { .. } => "membership_engagement_changed",
            DomainEvent::MembershipValidityChanged { .. } => "membership_validity_changed",
            DomainEvent::MembershipDisabled { .. } => "membership_disabled",
            DomainEvent::MembershipEnabled { .. } => "membership_enabled",
            DomainEvent::AppointmentScheduled { .. } => "appointment_scheduled",
            DomainEvent::AppointmentRescheduled { .. } => "appointment_rescheduled",
            DomainEvent::AppointmentServiceStarted { .. } => "appointment_service_started",
            DomainEvent::AppointmentCompleted { .. } => "appointment_completed",
            DomainEvent::AppointmentCancelled { .. } => "appointment_cancelled",
            DomainEvent::PatientArrived { .. } => "patient_arrived",
            DomainEvent::TriageUpdated { .. } => "triage_updated",
            DomainEvent::PatientCalled { .. } => "patient_called",
            DomainEvent::WaitingRoomServiceStarted { .. } => "waiting_room_service_started",
            DomainEvent::WaitingRoomEntryClosed { .. } => "waiting_room_entry_closed",
            DomainEvent::ConsultationOpened { .. } => "consultation_opened",
            DomainEvent::PatientIdentityAttached { .. } => "patient_identity_attached",
            DomainEvent::ChiefComplaintRecorded { .. } => "chief_complaint_recorded",
            DomainEvent::VitalsRecorded { .. } => "vitals_recorded",
            DomainEvent::ClinicalNoteAdded { .. } => "clinical_note_added",
            DomainEvent::PerformedActAdded { .. } => "performed_act_added",
            DomainEvent::ConsultationClosed { .. } => "consultation_closed",
        }
    }

    /// Clinic the event belongs to.
    pub fn clinic_id(&self) -> &str {
        match self {
            DomainEvent::MembershipGranted { clinic_id, .. }
            | DomainEvent::MembershipRoleChanged { clinic_id, .. }
            | DomainEvent::MembershipEngagementChanged { clinic_id, .. }
            | DomainEvent::MembershipValidityChanged { clinic_id, .. }
            | DomainEvent::MembershipDisabled { clinic_id, .. }
            | DomainEvent::MembershipEnabled { clinic_id, .. }
            | DomainEvent::AppointmentScheduled { clinic_id, .. }
            | DomainEvent::AppointmentRescheduled { clinic_id, .. }
            | DomainEvent::AppointmentServiceStarted { clinic_id, .. }
            | DomainEvent::AppointmentCompleted { clinic_id, .. }
            | DomainEvent::AppointmentCancelled { clinic_id, .. }
            | DomainEvent::PatientArrived { clinic_id, .. }
            | DomainEvent::TriageUpdated { clinic_id, .. }
            | DomainEvent::PatientCalled { clinic_id, .. }
            | DomainEvent::WaitingRoomServiceStarted { clinic_id, .. }
            | DomainEvent::WaitingRoomEntryClosed { clinic_id, .. }
            | DomainEvent::ConsultationOpened { clinic_id, .. }
            | DomainEvent::PatientIdentityAttached { clinic_id, .. }
            | DomainEvent::ChiefComplaintRecorded { clinic_id, .. }
            | DomainEvent::VitalsRecorded { clinic_id, .. }
            | DomainEvent::ClinicalNoteAdded { clinic_id, .. }
            | DomainEvent::PerformedActAdded { clinic_id, .. }
            | DomainEvent::ConsultationClosed { clinic_id, .. } => clinic_id,
        }
    }

    /// When the event happened, as seen by the clock of the command that raised it.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::MembershipGranted { occurred_at, .. }
            | DomainEvent::MembershipRoleChanged { occurred_at, .. }
            | DomainEvent::MembershipEngagementChanged { occurred_at, .. }
            | DomainEvent::MembershipValidityChanged { occurred_at, .. }
            | DomainEvent::MembershipDisabled { occurred_at, .. }
            | DomainEvent::MembershipEnabled { occurred_at, .. }
            | DomainEvent::AppointmentScheduled { occurred_at, .. }
            | DomainEvent::AppointmentRescheduled { occurred_at, .. }
            | DomainEvent::AppointmentServiceStarted { occurred_at, .. }
            | DomainEvent::AppointmentCompleted { occurred_at, .. }
            | DomainEvent::AppointmentCancelled { occurred_at, .. }
            | DomainEvent::PatientArrived { occurred_at, .. }
            | DomainEvent::TriageUpdated { occurred_at, .. }
            | DomainEvent::PatientCalled { occurred_at, .. }
            | DomainEvent::WaitingRoomServiceStarted { occurred_at, .. }
            | DomainEvent::WaitingRoomEntryClosed { occurred_at, .. }
            | DomainEvent::ConsultationOpened { occurred_at, .. }
            | DomainEvent::PatientIdentityAttached { occurred_at, .. }
            | DomainEvent::ChiefComplaintRecorded { occurred_at, .. }
            | DomainEvent::VitalsRecorded { occurred_at, .. }
            | DomainEvent::ClinicalNoteAdded { occurred_at, .. }
            | DomainEvent::PerformedActAdded { occurred_at, .. }
            | DomainEvent::ConsultationClosed { occurred_at, .. } => *occurred_at,
        }
    }
}

/// Common surface of the aggregates, used by handlers to persist and flush events.
pub trait Aggregate {
    /// Aggregate type name used in event envelopes and error messages.
    const KIND: &'static str;

    fn id(&self) -> &str;

    /// Persisted version; bumped by the store on every successful update.
    fn version(&self) -> i64;

    /// Events raised but not yet published.
    fn pending_events(&self) -> &[DomainEvent];

    /// Drain events buffered since the last flush.
    fn take_events(&mut self) -> Vec<DomainEvent>;

    /// Put drained events back ahead of anything raised since.
    fn restore_events(&mut self, events: Vec<DomainEvent>);
}

/// A domain event addressed to its aggregate and position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub aggregate_type: String,
    pub aggregate_id: String,
    /// Aggregate version the event was persisted with
    pub aggregate_version: i64,
    /// Position of the event within the command that produced it
    pub sequence: u32,
    pub event: DomainEvent,
}

impl EventEnvelope {
    /// Wrap a batch of events drained from an aggregate after it was saved.
    pub fn wrap<A: Aggregate>(aggregate: &A, events: Vec<DomainEvent>) -> Vec<Self> {
        events
            .into_iter()
            .enumerate()
            .map(|(sequence, event)| Self {
                aggregate_type: A::KIND.to_string(),
                aggregate_id: aggregate.id().to_string(),
                aggregate_version: aggregate.version(),
                sequence: sequence as u32,
                event,
            })
            .collect()
    }

    /// Serialize to canonical JSON.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// SHA-256 over the canonical JSON, hex encoded.
    ///
    /// Republishing the same persisted mutation yields the same fingerprint,
    /// which lets the outbox ignore duplicates.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let json = self.to_canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cancelled(at_minute: u32) -> DomainEvent {
        DomainEvent::AppointmentCancelled {
            appointment_id: "appt-1".into(),
            clinic_id: "clinic-1".into(),
            occurred_at: Utc.with_ymd_and_hms(2024, 3, 15, 10, at_minute, 0).unwrap(),
        }
    }

    fn envelope(event: DomainEvent, version: i64) -> EventEnvelope {
        EventEnvelope {
            aggregate_type: "appointment".into(),
            aggregate_id: "appt-1".into(),
            aggregate_version: version,
            sequence: 0,
            event,
        }
    }

    #[test]
    fn test_event_name_matches_serde_tag() {
        let event = cancelled(0);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
        assert_eq!(event.clinic_id(), "clinic-1");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = envelope(cancelled(0), 1);
        let b = envelope(cancelled(0), 1);
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_version() {
        let a = envelope(cancelled(0), 1);
        let b = envelope(cancelled(0), 2);
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
