//! Consultation models: the clinical encounter between a practitioner and an animal.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, Aggregate, DomainError, DomainEvent, DomainResult};

/// Consultation status. Closed is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Open,
    Closed,
}

impl ConsultationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationStatus::Open => "open",
            ConsultationStatus::Closed => "closed",
        }
    }
}

impl FromStr for ConsultationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ConsultationStatus::Open),
            "closed" => Ok(ConsultationStatus::Closed),
            _ => Err(DomainError::InvalidInput(format!(
                "Unknown consultation status: {}",
                s
            ))),
        }
    }
}

/// Clinical note category (SOAP plus free-form).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    Subjective,
    Objective,
    Assessment,
    Plan,
    General,
}

impl NoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteType::Subjective => "subjective",
            NoteType::Objective => "objective",
            NoteType::Assessment => "assessment",
            NoteType::Plan => "plan",
            NoteType::General => "general",
        }
    }
}

impl FromStr for NoteType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subjective" => Ok(NoteType::Subjective),
            "objective" => Ok(NoteType::Objective),
            "assessment" => Ok(NoteType::Assessment),
            "plan" => Ok(NoteType::Plan),
            "general" => Ok(NoteType::General),
            _ => Err(DomainError::InvalidInput(format!("Unknown note type: {}", s))),
        }
    }
}

/// Vital signs. Each measurement is optional on its own.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vitals {
    pub weight_kg: Option<f64>,
    pub temperature_c: Option<f64>,
}

/// Append-only clinical note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicalNote {
    pub note_type: NoteType,
    pub content: String,
    pub author_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only record of an act performed during the consultation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformedAct {
    pub label: String,
    pub quantity: f64,
    pub performed_at: DateTime<Utc>,
    pub author_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Links captured when the consultation is opened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsultationLinks {
    pub appointment_id: Option<String>,
    pub waiting_room_entry_id: Option<String>,
}

/// A clinical encounter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consultation {
    pub consultation_id: String,
    pub clinic_id: String,
    pub practitioner_user_id: String,
    pub status: ConsultationStatus,
    pub appointment_id: Option<String>,
    pub waiting_room_entry_id: Option<String>,
    pub owner_id: Option<String>,
    pub animal_id: Option<String>,
    pub chief_complaint: Option<String>,
    pub vitals: Option<Vitals>,
    pub notes: Vec<ClinicalNote>,
    pub acts: Vec<PerformedAct>,
    pub summary: Option<String>,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub version: i64,
    #[serde(skip)]
    pub(crate) pending_events: Vec<DomainEvent>,
}

impl Consultation {
    /// Open a consultation for a practitioner.
    pub fn open(
        clinic_id: String,
        practitioner_user_id: String,
        links: ConsultationLinks,
        at: DateTime<Utc>,
    ) -> Self {
        let mut consultation = Self {
            consultation_id: new_id(),
            clinic_id,
            practitioner_user_id,
            status: ConsultationStatus::Open,
            appointment_id: links.appointment_id,
            waiting_room_entry_id: links.waiting_room_entry_id,
            owner_id: None,
            animal_id: None,
            chief_complaint: None,
            vitals: None,
            notes: Vec::new(),
            acts: Vec::new(),
            summary: None,
            started_at: at,
            closed_at: None,
            closed_by: None,
            version: 0,
            pending_events: Vec::new(),
        };
        consultation
            .pending_events
            .push(DomainEvent::ConsultationOpened {
                consultation_id: consultation.consultation_id.clone(),
                clinic_id: consultation.clinic_id.clone(),
                practitioner_user_id: consultation.practitioner_user_id.clone(),
                appointment_id: consultation.appointment_id.clone(),
                waiting_room_entry_id: consultation.waiting_room_entry_id.clone(),
                occurred_at: at,
            });
        consultation
    }

    pub fn is_open(&self) -> bool {
        self.status == ConsultationStatus::Open
    }

    /// Fail with `InvalidTransition` unless the consultation is open.
    pub fn ensure_open(&self, action: &'static str) -> DomainResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                aggregate: Self::KIND,
                action,
                state: self.status.as_str().to_string(),
            })
        }
    }

    /// Attach owner and/or animal. Ids that are absent leave the current value.
    ///
    /// Existence of the referenced records is checked by the handler beforehand.
    pub fn attach_patient_identity(
        &mut self,
        owner_id: Option<String>,
        animal_id: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_open("attach patient identity to")?;
        if owner_id.is_none() && animal_id.is_none() {
            return Err(DomainError::InvalidInput(
                "attach requires an owner id or an animal id".into(),
            ));
        }
        if owner_id.is_some() {
            self.owner_id = owner_id.clone();
        }
        if animal_id.is_some() {
            self.animal_id = animal_id.clone();
        }
        self.pending_events
            .push(DomainEvent::PatientIdentityAttached {
                consultation_id: self.consultation_id.clone(),
                clinic_id: self.clinic_id.clone(),
                owner_id,
                animal_id,
                occurred_at: now,
            });
        Ok(())
    }

    pub fn record_chief_complaint(&mut self, text: String, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open("record chief complaint on")?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(DomainError::InvalidInput(
                "chief complaint cannot be empty".into(),
            ));
        }
        self.chief_complaint = Some(text);
        self.pending_events.push(DomainEvent::ChiefComplaintRecorded {
            consultation_id: self.consultation_id.clone(),
            clinic_id: self.clinic_id.clone(),
            occurred_at: now,
        });
        Ok(())
    }

    /// Record vitals. Provided measurements replace earlier ones; absent ones are kept.
    pub fn record_vitals(
        &mut self,
        weight_kg: Option<f64>,
        temperature_c: Option<f64>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_open("record vitals on")?;
        if weight_kg.is_none() && temperature_c.is_none() {
            return Err(DomainError::InvalidInput(
                "vitals require a weight or a temperature".into(),
            ));
        }
        if let Some(weight) = weight_kg {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(DomainError::InvalidInput(format!(
                    "weight must be a positive number of kg, got {}",
                    weight
                )));
            }
        }
        if let Some(temperature) = temperature_c {
            if !temperature.is_finite() {
                return Err(DomainError::InvalidInput(
                    "temperature must be a finite number".into(),
                ));
            }
        }

        let mut vitals = self.vitals.unwrap_or_default();
        if weight_kg.is_some() {
            vitals.weight_kg = weight_kg;
        }
        if temperature_c.is_some() {
            vitals.temperature_c = temperature_c;
        }
        self.vitals = Some(vitals);
        self.pending_events.push(DomainEvent::VitalsRecorded {
            consultation_id: self.consultation_id.clone(),
            clinic_id: self.clinic_id.clone(),
            weight_kg,
            temperature_c,
            occurred_at: now,
        });
        Ok(())
    }

    pub fn add_clinical_note(
        &mut self,
        note_type: NoteType,
        content: String,
        author_id: String,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_open("add a note to")?;
        if content.trim().is_empty() {
            return Err(DomainError::InvalidInput("note content cannot be empty".into()));
        }
        self.pending_events.push(DomainEvent::ClinicalNoteAdded {
            consultation_id: self.consultation_id.clone(),
            clinic_id: self.clinic_id.clone(),
            note_type,
            author_id: author_id.clone(),
            occurred_at: at,
        });
        self.notes.push(ClinicalNote {
            note_type,
            content,
            author_id,
            recorded_at: at,
        });
        Ok(())
    }

    pub fn add_performed_act(
        &mut self,
        label: String,
        quantity: f64,
        performed_at: DateTime<Utc>,
        author_id: String,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_open("add an act to")?;
        let label = label.trim().to_string();
        if label.is_empty() {
            return Err(DomainError::InvalidInput("act label cannot be empty".into()));
        }
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(DomainError::InvalidInput(format!(
                "act quantity must be positive, got {}",
                quantity
            )));
        }
        self.pending_events.push(DomainEvent::PerformedActAdded {
            consultation_id: self.consultation_id.clone(),
            clinic_id: self.clinic_id.clone(),
            label: label.clone(),
            quantity,
            occurred_at: at,
        });
        self.acts.push(PerformedAct {
            label,
            quantity,
            performed_at,
            author_id,
            recorded_at: at,
        });
        Ok(())
    }

    /// Close the consultation. Happens exactly once.
    pub fn close(
        &mut self,
        closed_by_user_id: String,
        summary: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_open("close")?;
        self.status = ConsultationStatus::Closed;
        self.closed_at = Some(at);
        self.closed_by = Some(closed_by_user_id.clone());
        self.summary = summary;
        self.pending_events.push(DomainEvent::ConsultationClosed {
            consultation_id: self.consultation_id.clone(),
            clinic_id: self.clinic_id.clone(),
            closed_by_user_id,
            appointment_id: self.appointment_id.clone(),
            occurred_at: at,
        });
        Ok(())
    }
}

impl Aggregate for Consultation {
    const KIND: &'static str = "consultation";

    fn id(&self) -> &str {
        &self.consultation_id
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
