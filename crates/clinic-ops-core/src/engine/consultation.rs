//! Consultation lifecycle and post-close appointment coordination.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::{flush_events, CoordinationFailure, OpsError, OpsResult};
use crate::clock::Clock;
use crate::models::{new_id, Consultation, ConsultationLinks, DomainResult, NoteType};
use crate::ports::{
    AnimalExistenceChecker, ConsultationStore, CoordinationFailureLog, CoordinationFailureRecord,
    CoordinationFailureStatus, EventPublisher, OwnerExistenceChecker, PortError,
    SchedulingServiceCoordinator,
};

/// Request to open a consultation.
#[derive(Debug, Clone)]
pub struct OpenConsultation {
    pub clinic_id: String,
    pub practitioner_user_id: String,
    pub links: ConsultationLinks,
    /// Defaults to the clock's current time
    pub started_at: Option<DateTime<Utc>>,
}

/// What happened to the linked appointment after a close.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinationOutcome {
    /// The consultation had no linked appointment.
    NotRequired,
    AppointmentCompleted { appointment_id: String },
    /// The close stands; the appointment is still open and queued for retry.
    Failed(CoordinationFailure),
}

/// Result of [`ConsultationLifecycle::close`].
#[derive(Debug, Clone, PartialEq)]
pub struct CloseOutcome {
    /// The consultation as persisted, always closed.
    pub consultation: Consultation,
    pub coordination: CoordinationOutcome,
    /// Set when the close committed but its events could not be published.
    /// They remain buffered on `consultation`.
    pub publish_error: Option<PortError>,
}

impl CloseOutcome {
    /// Collapse into a result for callers that treat a coordination failure as an error.
    pub fn into_result(self) -> OpsResult<Consultation> {
        match self.coordination {
            CoordinationOutcome::Failed(failure) => Err(OpsError::CoordinationFailure(failure)),
            _ => Ok(self.consultation),
        }
    }
}

pub struct ConsultationLifecycle<'a> {
    consultations: &'a dyn ConsultationStore,
    owners: &'a dyn OwnerExistenceChecker,
    animals: &'a dyn AnimalExistenceChecker,
    coordinator: &'a dyn SchedulingServiceCoordinator,
    failures: &'a dyn CoordinationFailureLog,
    events: &'a dyn EventPublisher,
    clock: &'a dyn Clock,
}

impl<'a> ConsultationLifecycle<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consultations: &'a dyn ConsultationStore,
        owners: &'a dyn OwnerExistenceChecker,
        animals: &'a dyn AnimalExistenceChecker,
        coordinator: &'a dyn SchedulingServiceCoordinator,
        failures: &'a dyn CoordinationFailureLog,
        events: &'a dyn EventPublisher,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            consultations,
            owners,
            animals,
            coordinator,
            failures,
            events,
            clock,
        }
    }

    pub fn get(&self, consultation_id: &str) -> OpsResult<Consultation> {
        self.consultations
            .get_consultation(consultation_id)?
            .ok_or_else(|| OpsError::NotFound {
                kind: "consultation",
                id: consultation_id.to_string(),
            })
    }

    pub fn open(&self, request: OpenConsultation) -> OpsResult<Consultation> {
        let started_at = request.started_at.unwrap_or_else(|| self.clock.now());
        let mut consultation = Consultation::open(
            request.clinic_id,
            request.practitioner_user_id,
            request.links,
            started_at,
        );
        self.consultations.insert_consultation(&consultation)?;
        let _ = flush_events(self.events, &mut consultation);

        info!(
            consultation_id = %consultation.consultation_id,
            clinic_id = %consultation.clinic_id,
            practitioner_user_id = %consultation.practitioner_user_id,
            appointment_id = ?consultation.appointment_id,
            "consultation opened"
        );
        Ok(consultation)
    }

    /// Attach owner and/or animal after checking that they exist.
    pub fn attach_patient_identity(
        &self,
        consultation_id: &str,
        owner_id: Option<&str>,
        animal_id: Option<&str>,
    ) -> OpsResult<Consultation> {
        let mut consultation = self.get(consultation_id)?;
        consultation.ensure_open("attach patient identity to")?;

        if let Some(owner_id) = owner_id {
            if !self.owners.exists(owner_id)? {
                return Err(OpsError::ReferencedEntityNotFound {
                    kind: "owner",
                    id: owner_id.to_string(),
                });
            }
        }
        if let Some(animal_id) = animal_id {
            if !self.animals.exists(animal_id)? {
                return Err(OpsError::ReferencedEntityNotFound {
                    kind: "animal",
                    id: animal_id.to_string(),
                });
            }
        }

        consultation.attach_patient_identity(
            owner_id.map(str::to_string),
            animal_id.map(str::to_string),
            self.clock.now(),
        )?;
        self.save(&mut consultation, "patient identity attached")?;
        Ok(consultation)
    }

    pub fn record_chief_complaint(&self, consultation_id: &str, text: &str) -> OpsResult<Consultation> {
        let now = self.clock.now();
        self.mutate(consultation_id, "chief complaint recorded", |consultation| {
            consultation.record_chief_complaint(text.to_string(), now)
        })
    }

    pub fn record_vitals(
        &self,
        consultation_id: &str,
        weight_kg: Option<f64>,
        temperature_c: Option<f64>,
    ) -> OpsResult<Consultation> {
        let now = self.clock.now();
        self.mutate(consultation_id, "vitals recorded", |consultation| {
            consultation.record_vitals(weight_kg, temperature_c, now)
        })
    }

    pub fn add_clinical_note(
        &self,
        consultation_id: &str,
        note_type: NoteType,
        content: &str,
        author_id: &str,
    ) -> OpsResult<Consultation> {
        let now = self.clock.now();
        self.mutate(consultation_id, "clinical note added", |consultation| {
            consultation.add_clinical_note(note_type, content.to_string(), author_id.to_string(), now)
        })
    }

    pub fn add_performed_act(
        &self,
        consultation_id: &str,
        label: &str,
        quantity: f64,
        performed_at: DateTime<Utc>,
        author_id: &str,
    ) -> OpsResult<Consultation> {
        let now = self.clock.now();
        self.mutate(consultation_id, "performed act added", |consultation| {
            consultation.add_performed_act(
                label.to_string(),
                quantity,
                performed_at,
                author_id.to_string(),
                now,
            )
        })
    }

    /// Close the consultation, then complete its linked appointment.
    ///
    /// The close is durable before the appointment is touched. From then on
    /// the completion is always attempted, whatever happens to event
    /// publishing. A failed completion never reopens the consultation: it is
    /// reported in the outcome and written to the coordination failure log
    /// for retry.
    pub fn close(
        &self,
        consultation_id: &str,
        closed_by_user_id: &str,
        summary: Option<String>,
    ) -> OpsResult<CloseOutcome> {
        let now = self.clock.now();
        let mut consultation = self.get(consultation_id)?;
        consultation.close(closed_by_user_id.to_string(), summary, now)?;
        let publish_error = self.save(&mut consultation, "consultation closed")?;

        let Some(appointment_id) = consultation.appointment_id.clone() else {
            return Ok(CloseOutcome {
                consultation,
                coordination: CoordinationOutcome::NotRequired,
                publish_error,
            });
        };

        let coordination = match self
            .coordinator
            .complete_appointment(&appointment_id, closed_by_user_id)
        {
            Ok(()) => {
                info!(consultation_id, appointment_id = %appointment_id, "linked appointment completed");
                CoordinationOutcome::AppointmentCompleted { appointment_id }
            }
            Err(reason) => {
                let record = CoordinationFailureRecord {
                    failure_id: new_id(),
                    consultation_id: consultation_id.to_string(),
                    appointment_id: appointment_id.clone(),
                    closed_by_user_id: closed_by_user_id.to_string(),
                    last_error: reason.to_string(),
                    attempts: 1,
                    status: CoordinationFailureStatus::Pending,
                    created_at: now,
                    last_attempt_at: now,
                };
                let failure_id = match self.failures.record_coordination_failure(&record) {
                    Ok(()) => Some(record.failure_id),
                    Err(e) => {
                        error!(
                            consultation_id,
                            appointment_id = %appointment_id,
                            error = %e,
                            "could not queue coordination failure for retry"
                        );
                        None
                    }
                };
                error!(
                    consultation_id,
                    appointment_id = %appointment_id,
                    reason = %reason,
                    "consultation closed but appointment completion failed"
                );
                CoordinationOutcome::Failed(CoordinationFailure {
                    consultation_id: consultation_id.to_string(),
                    appointment_id,
                    reason,
                    failure_id,
                })
            }
        };

        Ok(CloseOutcome {
            consultation,
            coordination,
            publish_error,
        })
    }

    fn mutate<F>(&self, consultation_id: &str, what: &'static str, change: F) -> OpsResult<Consultation>
    where
        F: FnOnce(&mut Consultation) -> DomainResult<()>,
    {
        let mut consultation = self.get(consultation_id)?;
        change(&mut consultation)?;
        self.save(&mut consultation, what)?;
        Ok(consultation)
    }

    /// Persist, then publish. Only the persist can fail the command.
    fn save(
        &self,
        consultation: &mut Consultation,
        what: &'static str,
    ) -> OpsResult<Option<PortError>> {
        self.consultations.update_consultation(consultation)?;
        consultation.version += 1;
        info!(consultation_id = %consultation.consultation_id, "{}", what);
        Ok(flush_events(self.events, consultation).err())
    }
}
