//! Clinic Ops Core Library
//!
//! Operational core of a veterinary clinic: who may act in which clinic and
//! when, practitioner agendas, the waiting room, and consultations.
//!
//! # Architecture
//!
//! ```text
//!   ClinicMembership ──eligibility──▶ AppointmentScheduler ◀─complete─┐
//!                                          │                          │
//!                                     appointment id                  │
//!                                          ▼                          │
//!                                   WaitingRoomTriage                 │
//!                                          │                          │
//!                                     entry id                        │
//!                                          ▼                          │
//!                                 ConsultationLifecycle ──close───────┘
//!                                          │
//!                          (failed completion → coordination log → reconciler)
//! ```
//!
//! Each command loads one aggregate, lets it enforce its invariants, persists
//! it with an optimistic version check, and appends its events to the outbox.
//!
//! # Modules
//!
//! - [`models`]: Aggregates, value objects and domain events
//! - [`ports`]: Interfaces the engine depends on
//! - [`engine`]: Command handlers and the coordination reconciler
//! - [`db`]: SQLite adapter implementing every port
//! - [`config`]: TOML engine configuration
//! - [`clock`]: Injected time source

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod ports;

// Re-export commonly used types
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, CoordinationConfig, EngineConfig, SchedulingConfig};
pub use db::{Database, DbError};
pub use engine::{
    AppointmentScheduler, CloseOutcome, ConsultationLifecycle, CoordinationOutcome,
    CoordinationReconciler, EligibilityResolver, LocalSchedulingCoordinator, MembershipRegistry,
    OpsError, OpsResult, WaitingRoomTriage,
};
pub use models::{
    Appointment, AppointmentStatus, ClinicMembership, ClinicRole, Consultation, DomainEvent,
    EventEnvelope, TimeSlot, ValidityWindow, WaitingRoomEntry, WaitingRoomStatus,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use db::{AnimalReference, OwnerReference};
use engine::{GrantMembership, OpenConsultation, ReconcileReport, ScheduleAppointment};
use models::{
    Arrival, ClinicalNote, ConsultationLinks, DomainError, PerformedAct,
};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum ClinicOpsError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Scheduling conflict: {0}")]
    ConflictDetected(String),

    #[error("Duplicate active entry: {0}")]
    DuplicateActiveEntry(String),

    #[error("Referenced entity not found: {0}")]
    ReferencedEntityNotFound(String),

    #[error("Coordination failure: {0}")]
    CoordinationFailure(String),

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<OpsError> for ClinicOpsError {
    fn from(e: OpsError) -> Self {
        let message = e.to_string();
        match e {
            OpsError::NotFound { .. } => ClinicOpsError::NotFound(message),
            OpsError::InvalidTransition { .. } => ClinicOpsError::InvalidTransition(message),
            OpsError::ConflictDetected { .. } => ClinicOpsError::ConflictDetected(message),
            OpsError::DuplicateActiveEntry { .. } => ClinicOpsError::DuplicateActiveEntry(message),
            OpsError::ReferencedEntityNotFound { .. } => {
                ClinicOpsError::ReferencedEntityNotFound(message)
            }
            OpsError::CoordinationFailure(_) => ClinicOpsError::CoordinationFailure(message),
            OpsError::NotEligible { .. } => ClinicOpsError::NotEligible(message),
            OpsError::AlreadyExists { .. } => ClinicOpsError::AlreadyExists(message),
            OpsError::InvalidInput(_) => ClinicOpsError::InvalidInput(message),
            OpsError::ConcurrentModification { .. } => {
                ClinicOpsError::ConcurrentModification(message)
            }
            OpsError::Port(_) => ClinicOpsError::DatabaseError(message),
        }
    }
}

impl From<DomainError> for ClinicOpsError {
    fn from(e: DomainError) -> Self {
        OpsError::from(e).into()
    }
}

impl From<DbError> for ClinicOpsError {
    fn from(e: DbError) -> Self {
        ClinicOpsError::DatabaseError(e.to_string())
    }
}

impl From<ConfigError> for ClinicOpsError {
    fn from(e: ConfigError) -> Self {
        ClinicOpsError::ConfigError(e.to_string())
    }
}

impl From<serde_json::Error> for ClinicOpsError {
    fn from(e: serde_json::Error) -> Self {
        ClinicOpsError::DatabaseError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClinicOpsError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ClinicOpsError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
///
/// `config_toml` is an optional TOML document; missing keys take defaults.
#[uniffi::export]
pub fn open_database(
    path: String,
    config_toml: Option<String>,
) -> Result<Arc<ClinicOpsCore>, ClinicOpsError> {
    let config = match config_toml {
        Some(source) => EngineConfig::from_toml_str(&source)?,
        None => EngineConfig::default(),
    };
    let db = Database::open(&path)?;
    info!(path = %path, "clinic ops database opened");
    Ok(Arc::new(ClinicOpsCore::new(db, config, Arc::new(SystemClock))))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<ClinicOpsCore>, ClinicOpsError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(ClinicOpsCore::new(
        db,
        EngineConfig::default(),
        Arc::new(SystemClock),
    )))
}

/// Install a stderr `tracing` subscriber.
///
/// `filter` uses `RUST_LOG` syntax; when absent, `RUST_LOG` is read and
/// `info` is the fallback. Returns false if a subscriber was already installed.
#[uniffi::export]
pub fn init_logging(filter: Option<String>) -> bool {
    let filter = match filter {
        Some(directives) => tracing_subscriber::EnvFilter::new(directives),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine wrapper for FFI.
#[derive(uniffi::Object)]
pub struct ClinicOpsCore {
    db: Arc<Mutex<Database>>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl ClinicOpsCore {
    /// Build around an open database with an explicit configuration and clock.
    pub fn new(db: Database, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ensure_eligible(
        &self,
        db: &Database,
        user_id: &str,
        clinic_id: &str,
        at: DateTime<Utc>,
        roles: &[ClinicRole],
    ) -> Result<(), ClinicOpsError> {
        let resolver = EligibilityResolver::new(db);
        Ok(engine::require_eligible(&resolver, user_id, clinic_id, at, roles)?)
    }
}

#[uniffi::export]
impl ClinicOpsCore {
    // =========================================================================
    // Membership Operations
    // =========================================================================

    /// Grant a membership. `valid_until` absent means open-ended.
    pub fn grant_membership(
        &self,
        clinic_id: String,
        user_id: String,
        role: String,
        engagement: String,
        valid_from: String,
        valid_until: Option<String>,
    ) -> Result<FfiMembership, ClinicOpsError> {
        let validity = ValidityWindow::new(parse_ts(&valid_from)?, parse_ts_opt(valid_until)?)?;
        let request = GrantMembership {
            clinic_id,
            user_id,
            role: parse_enum(&role)?,
            engagement: parse_enum(&engagement)?,
            validity,
        };

        let db = self.db.lock()?;
        let registry = MembershipRegistry::new(&*db, &*db, self.clock.as_ref());
        Ok(registry.grant(request)?.into())
    }

    pub fn change_membership_role(
        &self,
        membership_id: String,
        role: String,
    ) -> Result<FfiMembership, ClinicOpsError> {
        let role = parse_enum(&role)?;
        let db = self.db.lock()?;
        let registry = MembershipRegistry::new(&*db, &*db, self.clock.as_ref());
        Ok(registry.change_role(&membership_id, role)?.into())
    }

    pub fn change_membership_engagement(
        &self,
        membership_id: String,
        engagement: String,
    ) -> Result<FfiMembership, ClinicOpsError> {
        let engagement = parse_enum(&engagement)?;
        let db = self.db.lock()?;
        let registry = MembershipRegistry::new(&*db, &*db, self.clock.as_ref());
        Ok(registry.change_engagement(&membership_id, engagement)?.into())
    }

    pub fn change_membership_validity(
        &self,
        membership_id: String,
        valid_from: String,
        valid_until: Option<String>,
    ) -> Result<FfiMembership, ClinicOpsError> {
        let validity = ValidityWindow::new(parse_ts(&valid_from)?, parse_ts_opt(valid_until)?)?;
        let db = self.db.lock()?;
        let registry = MembershipRegistry::new(&*db, &*db, self.clock.as_ref());
        Ok(registry.change_validity(&membership_id, validity)?.into())
    }

    pub fn disable_membership(&self, membership_id: String) -> Result<FfiMembership, ClinicOpsError> {
        let db = self.db.lock()?;
        let registry = MembershipRegistry::new(&*db, &*db, self.clock.as_ref());
        Ok(registry.disable(&membership_id)?.into())
    }

    pub fn enable_membership(&self, membership_id: String) -> Result<FfiMembership, ClinicOpsError> {
        let db = self.db.lock()?;
        let registry = MembershipRegistry::new(&*db, &*db, self.clock.as_ref());
        Ok(registry.enable(&membership_id)?.into())
    }

    /// Whether the user holds one of `roles` in the clinic at `at`.
    ///
    /// An empty `roles` list means the configured practitioner roles.
    pub fn is_user_eligible(
        &self,
        user_id: String,
        clinic_id: String,
        at: String,
        roles: Vec<String>,
    ) -> Result<bool, ClinicOpsError> {
        let at = parse_ts(&at)?;
        let roles = if roles.is_empty() {
            self.config.practitioner_roles.clone()
        } else {
            roles
                .iter()
                .map(|role| parse_enum(role))
                .collect::<Result<Vec<ClinicRole>, _>>()?
        };

        let db = self.db.lock()?;
        let resolver = EligibilityResolver::new(&*db);
        Ok(resolver.is_eligible(&user_id, &clinic_id, at, &roles)?)
    }

    /// Users holding a practitioner role in the clinic at `at`, sorted.
    pub fn list_eligible_practitioners(
        &self,
        clinic_id: String,
        at: String,
    ) -> Result<Vec<String>, ClinicOpsError> {
        let at = parse_ts(&at)?;
        let db = self.db.lock()?;
        let resolver = EligibilityResolver::new(&*db);
        Ok(resolver.list_eligible_practitioners(&clinic_id, at, &self.config.practitioner_roles)?)
    }

    // =========================================================================
    // Scheduling Operations
    // =========================================================================

    /// Book an appointment. The practitioner must be eligible at the slot start.
    pub fn schedule_appointment(
        &self,
        request: FfiScheduleRequest,
    ) -> Result<FfiAppointment, ClinicOpsError> {
        let slot = TimeSlot::new(parse_ts(&request.start)?, request.duration_minutes)?;
        let db = self.db.lock()?;
        self.ensure_eligible(
            &db,
            &request.practitioner_user_id,
            &request.clinic_id,
            slot.start(),
            &self.config.practitioner_roles,
        )?;

        let scheduler = self.scheduler(&db);
        let appointment = scheduler.schedule(ScheduleAppointment {
            clinic_id: request.clinic_id,
            practitioner_user_id: request.practitioner_user_id,
            owner_id: request.owner_id,
            animal_id: request.animal_id,
            slot,
            reason: request.reason,
        })?;
        Ok(appointment.into())
    }

    pub fn reschedule_appointment(
        &self,
        appointment_id: String,
        start: String,
        duration_minutes: u32,
    ) -> Result<FfiAppointment, ClinicOpsError> {
        let slot = TimeSlot::new(parse_ts(&start)?, duration_minutes)?;
        let db = self.db.lock()?;
        let scheduler = self.scheduler(&db);

        let current = scheduler.get(&appointment_id)?;
        self.ensure_eligible(
            &db,
            &current.practitioner_user_id,
            &current.clinic_id,
            slot.start(),
            &self.config.practitioner_roles,
        )?;
        Ok(scheduler.reschedule(&appointment_id, slot)?.into())
    }

    pub fn cancel_appointment(&self, appointment_id: String) -> Result<FfiAppointment, ClinicOpsError> {
        let db = self.db.lock()?;
        Ok(self.scheduler(&db).cancel(&appointment_id)?.into())
    }

    pub fn complete_appointment(
        &self,
        appointment_id: String,
        by_user_id: Option<String>,
    ) -> Result<FfiAppointment, ClinicOpsError> {
        let db = self.db.lock()?;
        Ok(self
            .scheduler(&db)
            .complete(&appointment_id, by_user_id.as_deref())?
            .into())
    }

    /// Record the start of service; `at` defaults to now.
    pub fn start_appointment_service(
        &self,
        appointment_id: String,
        at: Option<String>,
    ) -> Result<FfiAppointment, ClinicOpsError> {
        let at = parse_ts_opt(at)?.unwrap_or_else(|| self.clock.now());
        let db = self.db.lock()?;
        Ok(self.scheduler(&db).start_service(&appointment_id, at)?.into())
    }

    pub fn get_appointment(
        &self,
        appointment_id: String,
    ) -> Result<Option<FfiAppointment>, ClinicOpsError> {
        let db = self.db.lock()?;
        Ok(db.get_appointment_row(&appointment_id)?.map(|a| a.into()))
    }

    /// Non-cancelled appointments of a practitioner starting in `[from, to)`.
    pub fn list_practitioner_agenda(
        &self,
        clinic_id: String,
        practitioner_user_id: String,
        from: String,
        to: String,
    ) -> Result<Vec<FfiAppointment>, ClinicOpsError> {
        let (from, to) = (parse_ts(&from)?, parse_ts(&to)?);
        let db = self.db.lock()?;
        let agenda = db.list_practitioner_agenda(&clinic_id, &practitioner_user_id, from, to)?;
        Ok(agenda.into_iter().map(|a| a.into()).collect())
    }

    // =========================================================================
    // Waiting Room Operations
    // =========================================================================

    pub fn register_arrival(
        &self,
        arrival: FfiArrival,
    ) -> Result<FfiWaitingRoomEntry, ClinicOpsError> {
        let arrival = Arrival {
            clinic_id: arrival.clinic_id,
            origin: parse_enum(&arrival.origin)?,
            arrival_mode: parse_enum(&arrival.arrival_mode)?,
            priority: arrival.priority,
            triage_notes: arrival.triage_notes,
            owner_id: arrival.owner_id,
            animal_id: arrival.animal_id,
            linked_appointment_id: arrival.linked_appointment_id,
        };
        let db = self.db.lock()?;
        Ok(self.triage(&db).arrive(arrival)?.into())
    }

    pub fn update_triage(
        &self,
        entry_id: String,
        priority: i32,
        triage_notes: Option<String>,
        arrival_mode: String,
    ) -> Result<FfiWaitingRoomEntry, ClinicOpsError> {
        let arrival_mode = parse_enum(&arrival_mode)?;
        let db = self.db.lock()?;
        Ok(self
            .triage(&db)
            .update_triage(&entry_id, priority, triage_notes, arrival_mode)?
            .into())
    }

    /// Call a waiting patient. The caller must hold a triage role.
    pub fn call_patient(
        &self,
        entry_id: String,
        by_user_id: String,
    ) -> Result<FfiWaitingRoomEntry, ClinicOpsError> {
        let now = self.clock.now();
        let db = self.db.lock()?;
        let triage = self.triage(&db);
        let entry = triage.get(&entry_id)?;
        self.ensure_eligible(&db, &by_user_id, &entry.clinic_id, now, &self.config.triage_roles)?;
        Ok(triage.call(&entry_id, now, Some(&by_user_id))?.into())
    }

    /// Start service for a waiting or called patient. The user must hold a triage role.
    pub fn start_waiting_room_service(
        &self,
        entry_id: String,
        by_user_id: String,
    ) -> Result<FfiWaitingRoomEntry, ClinicOpsError> {
        let now = self.clock.now();
        let db = self.db.lock()?;
        let triage = self.triage(&db);
        let entry = triage.get(&entry_id)?;
        self.ensure_eligible(&db, &by_user_id, &entry.clinic_id, now, &self.config.triage_roles)?;
        Ok(triage.start_service(&entry_id, now, Some(&by_user_id))?.into())
    }

    pub fn close_waiting_room_entry(
        &self,
        entry_id: String,
        by_user_id: Option<String>,
    ) -> Result<FfiWaitingRoomEntry, ClinicOpsError> {
        let now = self.clock.now();
        let db = self.db.lock()?;
        Ok(self
            .triage(&db)
            .close(&entry_id, now, by_user_id.as_deref())?
            .into())
    }

    /// Active entries in presentation order.
    pub fn get_waiting_room_queue(
        &self,
        clinic_id: String,
    ) -> Result<Vec<FfiWaitingRoomEntry>, ClinicOpsError> {
        let db = self.db.lock()?;
        let queue = self.triage(&db).active_queue(&clinic_id)?;
        Ok(queue.into_iter().map(|e| e.into()).collect())
    }

    // =========================================================================
    // Consultation Operations
    // =========================================================================

    /// Open a consultation. The practitioner must be eligible now.
    pub fn open_consultation(
        &self,
        clinic_id: String,
        practitioner_user_id: String,
        appointment_id: Option<String>,
        waiting_room_entry_id: Option<String>,
    ) -> Result<FfiConsultation, ClinicOpsError> {
        let now = self.clock.now();
        let db = self.db.lock()?;
        self.ensure_eligible(
            &db,
            &practitioner_user_id,
            &clinic_id,
            now,
            &self.config.practitioner_roles,
        )?;

        let scheduler = self.scheduler(&db);
        let coordinator = LocalSchedulingCoordinator::new(&scheduler);
        let consultation = self.lifecycle(&db, &coordinator).open(OpenConsultation {
            clinic_id,
            practitioner_user_id,
            links: ConsultationLinks {
                appointment_id,
                waiting_room_entry_id,
            },
            started_at: Some(now),
        })?;
        Ok(consultation.into())
    }

    pub fn attach_patient_identity(
        &self,
        consultation_id: String,
        owner_id: Option<String>,
        animal_id: Option<String>,
    ) -> Result<FfiConsultation, ClinicOpsError> {
        let db = self.db.lock()?;
        let scheduler = self.scheduler(&db);
        let coordinator = LocalSchedulingCoordinator::new(&scheduler);
        let consultation = self.lifecycle(&db, &coordinator).attach_patient_identity(
            &consultation_id,
            owner_id.as_deref(),
            animal_id.as_deref(),
        )?;
        Ok(consultation.into())
    }

    pub fn record_chief_complaint(
        &self,
        consultation_id: String,
        text: String,
    ) -> Result<FfiConsultation, ClinicOpsError> {
        let db = self.db.lock()?;
        let scheduler = self.scheduler(&db);
        let coordinator = LocalSchedulingCoordinator::new(&scheduler);
        Ok(self
            .lifecycle(&db, &coordinator)
            .record_chief_complaint(&consultation_id, &text)?
            .into())
    }

    pub fn record_vitals(
        &self,
        consultation_id: String,
        weight_kg: Option<f64>,
        temperature_c: Option<f64>,
    ) -> Result<FfiConsultation, ClinicOpsError> {
        let db = self.db.lock()?;
        let scheduler = self.scheduler(&db);
        let coordinator = LocalSchedulingCoordinator::new(&scheduler);
        Ok(self
            .lifecycle(&db, &coordinator)
            .record_vitals(&consultation_id, weight_kg, temperature_c)?
            .into())
    }

    pub fn add_clinical_note(
        &self,
        consultation_id: String,
        note_type: String,
        content: String,
        author_id: String,
    ) -> Result<FfiConsultation, ClinicOpsError> {
        let note_type = parse_enum(&note_type)?;
        let db = self.db.lock()?;
        let scheduler = self.scheduler(&db);
        let coordinator = LocalSchedulingCoordinator::new(&scheduler);
        Ok(self
            .lifecycle(&db, &coordinator)
            .add_clinical_note(&consultation_id, note_type, &content, &author_id)?
            .into())
    }

    /// Record an act; `performed_at` defaults to now.
    pub fn add_performed_act(
        &self,
        consultation_id: String,
        label: String,
        quantity: f64,
        performed_at: Option<String>,
        author_id: String,
    ) -> Result<FfiConsultation, ClinicOpsError> {
        let performed_at = parse_ts_opt(performed_at)?.unwrap_or_else(|| self.clock.now());
        let db = self.db.lock()?;
        let scheduler = self.scheduler(&db);
        let coordinator = LocalSchedulingCoordinator::new(&scheduler);
        Ok(self
            .lifecycle(&db, &coordinator)
            .add_performed_act(&consultation_id, &label, quantity, performed_at, &author_id)?
            .into())
    }

    /// Close a consultation and complete its linked appointment.
    ///
    /// A failed completion does not fail the call: the outcome reports it and
    /// the failure is queued for [`ClinicOpsCore::retry_coordination_failures`].
    pub fn close_consultation(
        &self,
        consultation_id: String,
        closed_by_user_id: String,
        summary: Option<String>,
    ) -> Result<FfiCloseOutcome, ClinicOpsError> {
        let db = self.db.lock()?;
        let scheduler = self.scheduler(&db);
        let coordinator = LocalSchedulingCoordinator::new(&scheduler);
        let lifecycle = self.lifecycle(&db, &coordinator);

        let current = lifecycle.get(&consultation_id)?;
        self.ensure_eligible(
            &db,
            &closed_by_user_id,
            &current.clinic_id,
            self.clock.now(),
            &self.config.practitioner_roles,
        )?;
        Ok(lifecycle
            .close(&consultation_id, &closed_by_user_id, summary)?
            .into())
    }

    pub fn get_consultation(
        &self,
        consultation_id: String,
    ) -> Result<Option<FfiConsultation>, ClinicOpsError> {
        let db = self.db.lock()?;
        Ok(db.get_consultation_row(&consultation_id)?.map(|c| c.into()))
    }

    // =========================================================================
    // Coordination Operations
    // =========================================================================

    /// Retry one batch of failed post-close appointment completions.
    pub fn retry_coordination_failures(&self) -> Result<FfiReconcileReport, ClinicOpsError> {
        let db = self.db.lock()?;
        let scheduler = self.scheduler(&db);
        let coordinator = LocalSchedulingCoordinator::new(&scheduler);
        let reconciler = CoordinationReconciler::new(
            &coordinator,
            &*db,
            self.clock.as_ref(),
            &self.config.coordination,
        );
        Ok(reconciler.retry_pending()?.into())
    }

    // =========================================================================
    // Reference Data Operations
    // =========================================================================

    pub fn upsert_owner(&self, owner_id: String, display_name: String) -> Result<(), ClinicOpsError> {
        let db = self.db.lock()?;
        db.upsert_owner_reference(&OwnerReference {
            owner_id,
            display_name,
            created_at: self.clock.now(),
        })?;
        Ok(())
    }

    pub fn upsert_animal(
        &self,
        animal_id: String,
        owner_id: Option<String>,
        name: String,
        species: String,
    ) -> Result<(), ClinicOpsError> {
        let db = self.db.lock()?;
        db.upsert_animal_reference(&AnimalReference {
            animal_id,
            owner_id,
            name,
            species,
            created_at: self.clock.now(),
        })?;
        Ok(())
    }

    // =========================================================================
    // Outbox Operations
    // =========================================================================

    /// Unpublished domain events, oldest first.
    pub fn pending_events(&self, limit: u32) -> Result<Vec<FfiOutboxEvent>, ClinicOpsError> {
        let db = self.db.lock()?;
        let records = db.pending_outbox(limit)?;
        records
            .into_iter()
            .map(|record| -> Result<FfiOutboxEvent, ClinicOpsError> {
                Ok(FfiOutboxEvent {
                    fingerprint: record.fingerprint,
                    aggregate_type: record.envelope.aggregate_type.clone(),
                    aggregate_id: record.envelope.aggregate_id.clone(),
                    aggregate_version: record.envelope.aggregate_version,
                    event_type: record.envelope.event.name().to_string(),
                    payload_json: record.envelope.to_canonical_json()?,
                    occurred_at: ts(record.occurred_at),
                })
            })
            .collect()
    }

    /// Mark events as delivered; returns how many were newly marked.
    pub fn mark_events_published(&self, fingerprints: Vec<String>) -> Result<u32, ClinicOpsError> {
        let db = self.db.lock()?;
        let updated = db.mark_outbox_published(&fingerprints, self.clock.now())?;
        Ok(updated as u32)
    }
}

impl ClinicOpsCore {
    fn scheduler<'a>(&'a self, db: &'a Database) -> AppointmentScheduler<'a> {
        AppointmentScheduler::new(db, db, db, self.clock.as_ref(), &self.config.scheduling)
    }

    fn triage<'a>(&'a self, db: &'a Database) -> WaitingRoomTriage<'a> {
        WaitingRoomTriage::new(db, db, db, self.clock.as_ref())
    }

    fn lifecycle<'a>(
        &'a self,
        db: &'a Database,
        coordinator: &'a LocalSchedulingCoordinator<'a>,
    ) -> ConsultationLifecycle<'a> {
        ConsultationLifecycle::new(db, db, db, coordinator, db, db, self.clock.as_ref())
    }
}

// =========================================================================
// Conversions
// =========================================================================

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, ClinicOpsError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| ClinicOpsError::InvalidInput(format!("bad timestamp {:?}: {}", value, e)))
}

fn parse_ts_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>, ClinicOpsError> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_enum<T: FromStr<Err = DomainError>>(value: &str) -> Result<T, ClinicOpsError> {
    Ok(value.parse::<T>()?)
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe membership.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMembership {
    pub membership_id: String,
    pub clinic_id: String,
    pub user_id: String,
    pub role: String,
    pub engagement: String,
    pub status: String,
    pub valid_from: String,
    pub valid_until: Option<String>,
    pub version: i64,
}

impl From<ClinicMembership> for FfiMembership {
    fn from(membership: ClinicMembership) -> Self {
        Self {
            membership_id: membership.membership_id,
            clinic_id: membership.clinic_id,
            user_id: membership.user_id,
            role: membership.role.as_str().to_string(),
            engagement: membership.engagement.as_str().to_string(),
            status: membership.status.as_str().to_string(),
            valid_from: ts(membership.validity.valid_from()),
            valid_until: membership.validity.valid_until().map(ts),
            version: membership.version,
        }
    }
}

/// FFI-safe booking request.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiScheduleRequest {
    pub clinic_id: String,
    pub practitioner_user_id: String,
    pub owner_id: String,
    pub animal_id: String,
    pub start: String,
    pub duration_minutes: u32,
    pub reason: String,
}

/// FFI-safe appointment.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAppointment {
    pub appointment_id: String,
    pub clinic_id: String,
    pub practitioner_user_id: String,
    pub owner_id: String,
    pub animal_id: String,
    pub start: String,
    pub end: String,
    pub duration_minutes: u32,
    pub status: String,
    pub reason: String,
    pub service_started_at: Option<String>,
    pub version: i64,
}

impl From<Appointment> for FfiAppointment {
    fn from(appointment: Appointment) -> Self {
        Self {
            appointment_id: appointment.appointment_id,
            clinic_id: appointment.clinic_id,
            practitioner_user_id: appointment.practitioner_user_id,
            owner_id: appointment.owner_id,
            animal_id: appointment.animal_id,
            start: ts(appointment.slot.start()),
            end: ts(appointment.slot.end()),
            duration_minutes: appointment.slot.duration_minutes(),
            status: appointment.status.as_str().to_string(),
            reason: appointment.reason,
            service_started_at: appointment.service_started_at.map(ts),
            version: appointment.version,
        }
    }
}

/// FFI-safe arrival.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiArrival {
    pub clinic_id: String,
    /// `walk_in` or `appointment`
    pub origin: String,
    /// `standard` or `emergency`
    pub arrival_mode: String,
    pub priority: i32,
    pub triage_notes: Option<String>,
    pub owner_id: Option<String>,
    pub animal_id: Option<String>,
    pub linked_appointment_id: Option<String>,
}

/// FFI-safe waiting-room entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiWaitingRoomEntry {
    pub entry_id: String,
    pub clinic_id: String,
    pub status: String,
    pub origin: String,
    pub arrival_mode: String,
    pub priority: i32,
    pub linked_appointment_id: Option<String>,
    pub owner_id: Option<String>,
    pub animal_id: Option<String>,
    pub triage_notes: Option<String>,
    pub arrived_at: String,
    pub called_at: Option<String>,
    pub service_started_at: Option<String>,
    pub closed_at: Option<String>,
    pub version: i64,
}

impl From<WaitingRoomEntry> for FfiWaitingRoomEntry {
    fn from(entry: WaitingRoomEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            clinic_id: entry.clinic_id,
            status: entry.status.as_str().to_string(),
            origin: entry.origin.as_str().to_string(),
            arrival_mode: entry.arrival_mode.as_str().to_string(),
            priority: entry.priority,
            linked_appointment_id: entry.linked_appointment_id,
            owner_id: entry.owner_id,
            animal_id: entry.animal_id,
            triage_notes: entry.triage_notes,
            arrived_at: ts(entry.arrived_at),
            called_at: entry.called_at.map(ts),
            service_started_at: entry.service_started_at.map(ts),
            closed_at: entry.closed_at.map(ts),
            version: entry.version,
        }
    }
}

/// FFI-safe clinical note.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiClinicalNote {
    pub note_type: String,
    pub content: String,
    pub author_id: String,
    pub recorded_at: String,
}

impl From<ClinicalNote> for FfiClinicalNote {
    fn from(note: ClinicalNote) -> Self {
        Self {
            note_type: note.note_type.as_str().to_string(),
            content: note.content,
            author_id: note.author_id,
            recorded_at: ts(note.recorded_at),
        }
    }
}

/// FFI-safe performed act.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPerformedAct {
    pub label: String,
    pub quantity: f64,
    pub performed_at: String,
    pub author_id: String,
}

impl From<PerformedAct> for FfiPerformedAct {
    fn from(act: PerformedAct) -> Self {
        Self {
            label: act.label,
            quantity: act.quantity,
            performed_at: ts(act.performed_at),
            author_id: act.author_id,
        }
    }
}

/// FFI-safe consultation.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiConsultation {
    pub consultation_id: String,
    pub clinic_id: String,
    pub practitioner_user_id: String,
    pub status: String,
    pub appointment_id: Option<String>,
    pub waiting_room_entry_id: Option<String>,
    pub owner_id: Option<String>,
    pub animal_id: Option<String>,
    pub chief_complaint: Option<String>,
    pub weight_kg: Option<f64>,
    pub temperature_c: Option<f64>,
    pub notes: Vec<FfiClinicalNote>,
    pub acts: Vec<FfiPerformedAct>,
    pub summary: Option<String>,
    pub started_at: String,
    pub closed_at: Option<String>,
    pub version: i64,
}

impl From<Consultation> for FfiConsultation {
    fn from(consultation: Consultation) -> Self {
        let vitals = consultation.vitals.unwrap_or_default();
        Self {
            consultation_id: consultation.consultation_id,
            clinic_id: consultation.clinic_id,
            practitioner_user_id: consultation.practitioner_user_id,
            status: consultation.status.as_str().to_string(),
            appointment_id: consultation.appointment_id,
            waiting_room_entry_id: consultation.waiting_room_entry_id,
            owner_id: consultation.owner_id,
            animal_id: consultation.animal_id,
            chief_complaint: consultation.chief_complaint,
            weight_kg: vitals.weight_kg,
            temperature_c: vitals.temperature_c,
            notes: consultation.notes.into_iter().map(|n| n.into()).collect(),
            acts: consultation.acts.into_iter().map(|a| a.into()).collect(),
            summary: consultation.summary,
            started_at: ts(consultation.started_at),
            closed_at: consultation.closed_at.map(ts),
            version: consultation.version,
        }
    }
}

/// FFI-safe close result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCloseOutcome {
    pub consultation: FfiConsultation,
    /// True when a linked appointment was completed
    pub appointment_completed: bool,
    /// Set when the linked appointment could not be completed
    pub coordination_error: Option<String>,
    /// Id of the queued retry record, if any
    pub failure_id: Option<String>,
    /// Set when the close committed but its events were not published
    pub event_publish_error: Option<String>,
}

impl From<CloseOutcome> for FfiCloseOutcome {
    fn from(outcome: CloseOutcome) -> Self {
        let (appointment_completed, coordination_error, failure_id) = match outcome.coordination {
            CoordinationOutcome::NotRequired => (false, None, None),
            CoordinationOutcome::AppointmentCompleted { .. } => (true, None, None),
            CoordinationOutcome::Failed(failure) => {
                (false, Some(failure.to_string()), failure.failure_id)
            }
        };
        Self {
            consultation: outcome.consultation.into(),
            appointment_completed,
            coordination_error,
            failure_id,
            event_publish_error: outcome.publish_error.map(|e| e.to_string()),
        }
    }
}

/// FFI-safe reconciliation counters.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReconcileReport {
    pub attempted: u32,
    pub resolved: u32,
    pub abandoned: u32,
    pub still_pending: u32,
}

impl From<ReconcileReport> for FfiReconcileReport {
    fn from(report: ReconcileReport) -> Self {
        Self {
            attempted: report.attempted,
            resolved: report.resolved,
            abandoned: report.abandoned,
            still_pending: report.still_pending,
        }
    }
}

/// FFI-safe outbox event.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiOutboxEvent {
    pub fingerprint: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub aggregate_version: i64,
    pub event_type: String,
    pub payload_json: String,
    pub occurred_at: String,
}
