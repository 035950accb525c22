//! Appointment models and the half-open time slot.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, Aggregate, DomainError, DomainEvent, DomainResult};

/// Half-open interval `[start, start + duration)` occupied by an appointment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    start: DateTime<Utc>,
    duration_minutes: u32,
}

impl TimeSlot {
    /// Build a slot; the duration must be positive.
    ///
    /// The start must be a whole millisecond, the precision bookings are
    /// stored and guarded at.
    pub fn new(start: DateTime<Utc>, duration_minutes: u32) -> DomainResult<Self> {
        if duration_minutes == 0 {
            return Err(DomainError::InvalidInput(
                "time slot duration must be positive".into(),
            ));
        }
        if start.timestamp_subsec_nanos() % 1_000_000 != 0 {
            return Err(DomainError::InvalidInput(format!(
                "time slot start {} is finer than a millisecond",
                start.to_rfc3339()
            )));
        }
        Ok(Self {
            start,
            duration_minutes,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    /// Exclusive end of the slot.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// `s1 < e2 && s2 < e1`. Slots that only touch at a boundary do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Appointment status. Completed and cancelled are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Scheduled)
    }
}

impl FromStr for AppointmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            _ => Err(DomainError::InvalidInput(format!(
                "Unknown appointment status: {}",
                s
            ))),
        }
    }
}

/// A booked appointment between a practitioner and an animal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub appointment_id: String,
    pub clinic_id: String,
    pub practitioner_user_id: String,
    pub owner_id: String,
    pub animal_id: String,
    pub slot: TimeSlot,
    pub status: AppointmentStatus,
    /// Reason for the visit / free-text notes
    pub reason: String,
    pub service_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
    #[serde(skip)]
    pub(crate) pending_events: Vec<DomainEvent>,
}

impl Appointment {
    /// Create a scheduled appointment. Overlap checks belong to the scheduler.
    pub fn schedule(
        clinic_id: String,
        practitioner_user_id: String,
        owner_id: String,
        animal_id: String,
        slot: TimeSlot,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        let mut appointment = Self {
            appointment_id: new_id(),
            clinic_id,
            practitioner_user_id,
            owner_id,
            animal_id,
            slot,
            status: AppointmentStatus::Scheduled,
            reason,
            service_started_at: None,
            created_at: now,
            version: 0,
            pending_events: Vec::new(),
        };
        appointment
            .pending_events
            .push(DomainEvent::AppointmentScheduled {
                appointment_id: appointment.appointment_id.clone(),
                clinic_id: appointment.clinic_id.clone(),
                practitioner_user_id: appointment.practitioner_user_id.clone(),
                slot,
                occurred_at: now,
            });
        appointment
    }

    /// Whether this appointment still occupies its slot.
    pub fn blocks_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    pub fn reschedule(&mut self, slot: TimeSlot, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_scheduled("reschedule")?;
        let previous_slot = self.slot;
        self.slot = slot;
        self.pending_events.push(DomainEvent::AppointmentRescheduled {
            appointment_id: self.appointment_id.clone(),
            clinic_id: self.clinic_id.clone(),
            previous_slot,
            slot,
            occurred_at: now,
        });
        Ok(())
    }

    /// Record that the practitioner started seeing the patient.
    pub fn start_service(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_scheduled("start service on")?;
        if self.service_started_at.is_some() {
            return Err(DomainError::InvalidTransition {
                aggregate: Self::KIND,
                action: "start service on",
                state: "in service".into(),
            });
        }
        self.service_started_at = Some(at);
        self.pending_events
            .push(DomainEvent::AppointmentServiceStarted {
                appointment_id: self.appointment_id.clone(),
                clinic_id: self.clinic_id.clone(),
                occurred_at: at,
            });
        Ok(())
    }

    pub fn complete(&mut self, by_user_id: Option<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_scheduled("complete")?;
        self.status = AppointmentStatus::Completed;
        self.pending_events.push(DomainEvent::AppointmentCompleted {
            appointment_id: self.appointment_id.clone(),
            clinic_id: self.clinic_id.clone(),
            by_user_id,
            occurred_at: now,
        });
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_scheduled("cancel")?;
        self.status = AppointmentStatus::Cancelled;
        self.pending_events.push(DomainEvent::AppointmentCancelled {
            appointment_id: self.appointment_id.clone(),
            clinic_id: self.clinic_id.clone(),
            occurred_at: now,
        });
        Ok(())
    }

    /// Fail with `InvalidTransition` unless the appointment is still scheduled.
    pub fn ensure_scheduled(&self, action: &'static str) -> DomainResult<()> {
        if self.status == AppointmentStatus::Scheduled {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                aggregate: Self::KIND,
                action,
                state: self.status.as_str().to_string(),
            })
        }
    }
}

impl Aggregate for Appointment {
    const KIND: &'static str = "appointment";

    fn id(&self) -> &str {
        &self.appointment_id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn pending_events(&self) -> &[DomainEvent] {
        &self.pending_events
    }

    fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn restore_events(&mut self, mut events: Vec<DomainEvent>) {
        events.append(&mut self.pending_events);
        self.pending_events = events;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, hour, minute, 0).unwrap()
    }

    fn slot(hour: u32, minute: u32, minutes: u32) -> TimeSlot {
        TimeSlot::new(at(hour, minute), minutes).unwrap()
    }

    fn make_appointment() -> Appointment {
        Appointment::schedule(
            "clinic-1".into(),
            "vet-1".into(),
            "owner-1".into(),
            "animal-1".into(),
            slot(10, 0, 30),
            "Annual vaccination".into(),
            at(8, 0),
        )
    }

    #[test]
    fn test_zero_duration_rejected() {
        assert!(TimeSlot::new(at(10, 0), 0).is_err());
    }

    #[test]
    fn test_sub_millisecond_start_rejected() {
        let start = at(10, 0) + Duration::microseconds(1500);
        assert!(matches!(
            TimeSlot::new(start, 30),
            Err(DomainError::InvalidInput(_))
        ));
        assert!(TimeSlot::new(at(10, 0) + Duration::milliseconds(1), 30).is_ok());
    }

    #[test]
    fn test_slot_end() {
        assert_eq!(slot(10, 0, 30).end(), at(10, 30));
    }

    #[test]
    fn test_partial_overlap() {
        let a = slot(10, 0, 30);
        let b = slot(10, 15, 30);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn test_touching_slots_do_not_overlap() {
        let a = slot(10, 0, 30);
        let c = slot(10, 30, 30);
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn test_containment_overlaps() {
        let outer = slot(9, 0, 180);
        let inner = slot(10, 0, 15);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
        assert!(inner.overlaps(&inner));
    }

    #[test]
    fn test_complete_is_terminal() {
        let mut appointment = make_appointment();
        appointment.complete(Some("vet-1".into()), at(10, 30)).unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Completed);

        assert!(matches!(
            appointment.complete(None, at(10, 31)),
            Err(DomainError::InvalidTransition { .. })
        ));
        assert!(appointment.cancel(at(10, 31)).is_err());
        assert!(appointment.reschedule(slot(11, 0, 30), at(10, 31)).is_err());
    }

    #[test]
    fn test_cancel_frees_slot() {
        let mut appointment = make_appointment();
        assert!(appointment.blocks_slot());
        appointment.cancel(at(9, 0)).unwrap();
        assert!(!appointment.blocks_slot());
        assert!(appointment.cancel(at(9, 1)).is_err());
    }

    #[test]
    fn test_start_service_once() {
        let mut appointment = make_appointment();
        appointment.start_service(at(10, 2)).unwrap();
        assert_eq!(appointment.service_started_at, Some(at(10, 2)));
        assert!(appointment.start_service(at(10, 3)).is_err());
    }

    #[test]
    fn test_reschedule_emits_previous_slot() {
        let mut appointment = make_appointment();
        appointment.take_events();
        appointment.reschedule(slot(14, 0, 30), at(9, 0)).unwrap();

        let events = appointment.take_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            DomainEvent::AppointmentRescheduled {
                previous_slot,
                slot: new_slot,
                ..
            } => {
                assert_eq!(previous_slot.start(), at(10, 0));
                assert_eq!(new_slot.start(), at(14, 0));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
