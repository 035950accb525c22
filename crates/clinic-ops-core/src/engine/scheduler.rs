//! Appointment scheduling with practitioner double-booking protection.
//!
//! The overlap query is a fast reject only. Under concurrent writers the
//! storage-level exclusion guard is authoritative, and a violation it reports
//! surfaces as the same [`OpsError::ConflictDetected`].

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{flush_events, on_constraint, OpsError, OpsResult};
use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::models::{Appointment, TimeSlot};
use crate::ports::{AppointmentConflictChecker, AppointmentStore, EventPublisher};

/// Booking request.
#[derive(Debug, Clone)]
pub struct ScheduleAppointment {
    pub clinic_id: String,
    pub practitioner_user_id: String,
    pub owner_id: String,
    pub animal_id: String,
    pub slot: TimeSlot,
    pub reason: String,
}

/// Owns appointment creation, rescheduling and completion.
pub struct AppointmentScheduler<'a> {
    appointments: &'a dyn AppointmentStore,
    conflicts: &'a dyn AppointmentConflictChecker,
    events: &'a dyn EventPublisher,
    clock: &'a dyn Clock,
    config: &'a SchedulingConfig,
}

impl<'a> AppointmentScheduler<'a> {
    pub fn new(
        appointments: &'a dyn AppointmentStore,
        conflicts: &'a dyn AppointmentConflictChecker,
        events: &'a dyn EventPublisher,
        clock: &'a dyn Clock,
        config: &'a SchedulingConfig,
    ) -> Self {
        Self {
            appointments,
            conflicts,
            events,
            clock,
            config,
        }
    }

    /// Load an appointment.
    pub fn get(&self, appointment_id: &str) -> OpsResult<Appointment> {
        self.appointments
            .get_appointment(appointment_id)?
            .ok_or_else(|| OpsError::NotFound {
                kind: "appointment",
                id: appointment_id.to_string(),
            })
    }

    /// Book a new appointment unless it overlaps the practitioner's agenda.
    pub fn schedule(&self, request: ScheduleAppointment) -> OpsResult<Appointment> {
        self.check_slot_bounds(&request.slot)?;

        if self.conflicts.has_overlap(
            &request.clinic_id,
            &request.practitioner_user_id,
            &request.slot,
            None,
        )? {
            return Err(self.conflict(&request.practitioner_user_id, &request.slot));
        }

        let mut appointment = Appointment::schedule(
            request.clinic_id,
            request.practitioner_user_id,
            request.owner_id,
            request.animal_id,
            request.slot,
            request.reason,
            self.clock.now(),
        );

        self.appointments
            .insert_appointment(&appointment)
            .map_err(|e| {
                on_constraint(e, || {
                    self.conflict(&appointment.practitioner_user_id, &appointment.slot)
                })
            })?;
        let _ = flush_events(self.events, &mut appointment);

        info!(
            appointment_id = %appointment.appointment_id,
            clinic_id = %appointment.clinic_id,
            practitioner_user_id = %appointment.practitioner_user_id,
            start = %appointment.slot.start(),
            duration_minutes = appointment.slot.duration_minutes(),
            "appointment scheduled"
        );
        Ok(appointment)
    }

    /// Move an appointment. The appointment itself is excluded from the overlap check.
    pub fn reschedule(&self, appointment_id: &str, slot: TimeSlot) -> OpsResult<Appointment> {
        self.check_slot_bounds(&slot)?;

        let mut appointment = self.get(appointment_id)?;
        appointment.ensure_scheduled("reschedule")?;

        if self.conflicts.has_overlap(
            &appointment.clinic_id,
            &appointment.practitioner_user_id,
            &slot,
            Some(appointment_id),
        )? {
            return Err(self.conflict(&appointment.practitioner_user_id, &slot));
        }

        appointment.reschedule(slot, self.clock.now())?;
        self.save(&mut appointment)?;

        info!(appointment_id, start = %slot.start(), "appointment rescheduled");
        Ok(appointment)
    }

    /// `scheduled -> completed`.
    pub fn complete(&self, appointment_id: &str, by_user_id: Option<&str>) -> OpsResult<Appointment> {
        let mut appointment = self.get(appointment_id)?;
        appointment.complete(by_user_id.map(str::to_string), self.clock.now())?;
        self.save(&mut appointment)?;

        info!(appointment_id, by_user_id, "appointment completed");
        Ok(appointment)
    }

    /// `scheduled -> cancelled`; frees the slot.
    pub fn cancel(&self, appointment_id: &str) -> OpsResult<Appointment> {
        let mut appointment = self.get(appointment_id)?;
        appointment.cancel(self.clock.now())?;
        self.save(&mut appointment)?;

        info!(appointment_id, "appointment cancelled");
        Ok(appointment)
    }

    /// Record when the practitioner started seeing the patient.
    pub fn start_service(&self, appointment_id: &str, at: DateTime<Utc>) -> OpsResult<Appointment> {
        let mut appointment = self.get(appointment_id)?;
        appointment.start_service(at)?;
        self.save(&mut appointment)?;

        info!(appointment_id, at = %at, "appointment service started");
        Ok(appointment)
    }

    fn save(&self, appointment: &mut Appointment) -> OpsResult<()> {
        self.appointments
            .update_appointment(appointment)
            .map_err(|e| {
                on_constraint(e, || {
                    self.conflict(&appointment.practitioner_user_id, &appointment.slot)
                })
            })?;
        appointment.version += 1;
        let _ = flush_events(self.events, appointment);
        Ok(())
    }

    fn check_slot_bounds(&self, slot: &TimeSlot) -> OpsResult<()> {
        let minutes = slot.duration_minutes();
        if minutes < self.config.min_slot_minutes || minutes > self.config.max_slot_minutes {
            return Err(OpsError::InvalidInput(format!(
                "slot duration {} min outside allowed range {}..={} min",
                minutes, self.config.min_slot_minutes, self.config.max_slot_minutes
            )));
        }
        Ok(())
    }

    fn conflict(&self, practitioner_user_id: &str, slot: &TimeSlot) -> OpsError {
        warn!(
            practitioner_user_id,
            start = %slot.start(),
            end = %slot.end(),
            "appointment conflict detected"
        );
        OpsError::ConflictDetected {
            practitioner_user_id: practitioner_user_id.to_string(),
            start: slot.start(),
            end: slot.end(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::Database;
    use crate::models::AppointmentStatus;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, hour, minute, 0).unwrap()
    }

    fn request(practitioner: &str, hour: u32, minute: u32, minutes: u32) -> ScheduleAppointment {
        ScheduleAppointment {
            clinic_id: "clinic-1".into(),
            practitioner_user_id: practitioner.into(),
            owner_id: "owner-1".into(),
            animal_id: "animal-1".into(),
            slot: TimeSlot::new(at(hour, minute), minutes).unwrap(),
            reason: "Checkup".into(),
        }
    }

    #[test]
    fn test_schedule_then_conflict_then_touching() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(at(8, 0));
        let config = SchedulingConfig::default();
        let scheduler = AppointmentScheduler::new(&db, &db, &db, &clock, &config);

        let a = scheduler.schedule(request("vet-1", 10, 0, 30)).unwrap();
        assert_eq!(a.status, AppointmentStatus::Scheduled);

        let b = scheduler.schedule(request("vet-1", 10, 15, 30));
        assert!(matches!(b, Err(OpsError::ConflictDetected { .. })));

        let c = scheduler.schedule(request("vet-1", 10, 30, 30));
        assert!(c.is_ok());
    }

    #[test]
    fn test_slot_bounds_enforced() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(at(8, 0));
        let config = SchedulingConfig {
            min_slot_minutes: 10,
            max_slot_minutes: 60,
        };
        let scheduler = AppointmentScheduler::new(&db, &db, &db, &clock, &config);

        assert!(matches!(
            scheduler.schedule(request("vet-1", 10, 0, 5)),
            Err(OpsError::InvalidInput(_))
        ));
        assert!(matches!(
            scheduler.schedule(request("vet-1", 10, 0, 90)),
            Err(OpsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_missing_appointment() {
        let db = Database::open_in_memory().unwrap();
        let clock = FixedClock::new(at(8, 0));
        let config = SchedulingConfig::default();
        let scheduler = AppointmentScheduler::new(&db, &db, &db, &clock, &config);

        assert!(matches!(
            scheduler.complete("nope", None),
            Err(OpsError::NotFound { kind: "appointment", .. })
        ));
    }
}
