//! Consultation database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{check_cas, from_sql_ts, from_sql_ts_opt, parse_column, to_sql_ts, Database, DbError, DbResult};
use crate::models::{ClinicalNote, Consultation, PerformedAct, Vitals};
use crate::ports::{ConsultationStore, PortResult};

const SELECT_CONSULTATION: &str = r#"
    SELECT consultation_id, clinic_id, practitioner_user_id, status, appointment_id,
           waiting_room_entry_id, owner_id, animal_id, chief_complaint, weight_kg,
           temperature_c, notes, acts, summary, started_at, closed_at, closed_by, version
    FROM consultations
"#;

impl Database {
    pub fn insert_consultation_row(&self, consultation: &Consultation) -> DbResult<()> {
        let notes_json = serde_json::to_string(&consultation.notes)?;
        let acts_json = serde_json::to_string(&consultation.acts)?;
        let vitals = consultation.vitals.unwrap_or_default();

        self.conn.execute(
            r#"
            INSERT INTO consultations (
                consultation_id, clinic_id, practitioner_user_id, status, appointment_id,
                waiting_room_entry_id, owner_id, animal_id, chief_complaint, weight_kg,
                temperature_c, notes, acts, summary, started_at, closed_at, closed_by, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
            params![
                consultation.consultation_id,
                consultation.clinic_id,
                consultation.practitioner_user_id,
                consultation.status.as_str(),
                consultation.appointment_id,
                consultation.waiting_room_entry_id,
                consultation.owner_id,
                consultation.animal_id,
                consultation.chief_complaint,
                vitals.weight_kg,
                vitals.temperature_c,
                notes_json,
                acts_json,
                consultation.summary,
                to_sql_ts(consultation.started_at),
                consultation.closed_at.map(to_sql_ts),
                consultation.closed_by,
                consultation.version,
            ],
        )?;
        Ok(())
    }

    /// Compare-and-swap update; returns the number of rows changed.
    pub fn update_consultation_row(&self, consultation: &Consultation) -> DbResult<usize> {
        let notes_json = serde_json::to_string(&consultation.notes)?;
        let acts_json = serde_json::to_string(&consultation.acts)?;
        let vitals = consultation.vitals.unwrap_or_default();

        Ok(self.conn.execute(
            r#"
            UPDATE consultations SET
                status = ?3,
                owner_id = ?4,
                animal_id = ?5,
                chief_complaint = ?6,
                weight_kg = ?7,
                temperature_c = ?8,
                notes = ?9,
                acts = ?10,
                summary = ?11,
                closed_at = ?12,
                closed_by = ?13,
                version = version + 1
            WHERE consultation_id = ?1 AND version = ?2
            "#,
            params![
                consultation.consultation_id,
                consultation.version,
                consultation.status.as_str(),
                consultation.owner_id,
                consultation.animal_id,
                consultation.chief_complaint,
                vitals.weight_kg,
                vitals.temperature_c,
                notes_json,
                acts_json,
                consultation.summary,
                consultation.closed_at.map(to_sql_ts),
                consultation.closed_by,
            ],
        )?)
    }

    pub fn get_consultation_row(&self, consultation_id: &str) -> DbResult<Option<Consultation>> {
        self.conn
            .query_row(
                &format!("{} WHERE consultation_id = ?", SELECT_CONSULTATION),
                [consultation_id],
                ConsultationRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Consultations linked to an appointment, oldest first.
    pub fn list_consultations_for_appointment(
        &self,
        appointment_id: &str,
    ) -> DbResult<Vec<Consultation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE appointment_id = ? ORDER BY started_at",
            SELECT_CONSULTATION
        ))?;
        let rows = stmt.query_map([appointment_id], ConsultationRow::from_row)?;

        let mut consultations = Vec::new();
        for row in rows {
            consultations.push(row?.try_into()?);
        }
        Ok(consultations)
    }
}

impl ConsultationStore for Database {
    fn get_consultation(&self, consultation_id: &str) -> PortResult<Option<Consultation>> {
        Ok(self.get_consultation_row(consultation_id)?)
    }

    fn insert_consultation(&self, consultation: &Consultation) -> PortResult<()> {
        Ok(self.insert_consultation_row(consultation)?)
    }

    fn update_consultation(&self, consultation: &Consultation) -> PortResult<()> {
        let rows = self.update_consultation_row(consultation)?;
        check_cas(rows, "consultation", &consultation.consultation_id)
    }
}

/// Intermediate row struct for database mapping.
struct ConsultationRow {
    consultation_id: String,
    clinic_id: String,
    practitioner_user_id: String,
    status: String,
    appointment_id: Option<String>,
    waiting_room_entry_id: Option<String>,
    owner_id: Option<String>,
    animal_id: Option<String>,
    chief_complaint: Option<String>,
    weight_kg: Option<f64>,
    temperature_c: Option<f64>,
    notes: String,
    acts: String,
    summary: Option<String>,
    started_at: String,
    closed_at: Option<String>,
    closed_by: Option<String>,
    version: i64,
}

impl ConsultationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            consultation_id: row.get(0)?,
            clinic_id: row.get(1)?,
            practitioner_user_id: row.get(2)?,
            status: row.get(3)?,
            appointment_id: row.get(4)?,
            waiting_room_entry_id: row.get(5)?,
            owner_id: row.get(6)?,
            animal_id: row.get(7)?,
            chief_complaint: row.get(8)?,
            weight_kg: row.get(9)?,
            temperature_c: row.get(10)?,
            notes: row.get(11)?,
            acts: row.get(12)?,
            summary: row.get(13)?,
            started_at: row.get(14)?,
            closed_at: row.get(15)?,
            closed_by: row.get(16)?,
            version: row.get(17)?,
        })
    }
}

impl TryFrom<ConsultationRow> for Consultation {
    type Error = DbError;

    fn try_from(row: ConsultationRow) -> Result<Self, Self::Error> {
        let notes: Vec<ClinicalNote> = serde_json::from_str(&row.notes)?;
        let acts: Vec<PerformedAct> = serde_json::from_str(&row.acts)?;
        let vitals = match (row.weight_kg, row.temperature_c) {
            (None, None) => None,
            (weight_kg, temperature_c) => Some(Vitals {
                weight_kg,
                temperature_c,
            }),
        };

        Ok(Consultation {
            consultation_id: row.consultation_id,
            clinic_id: row.clinic_id,
            practitioner_user_id: row.practitioner_user_id,
            status: parse_column(&row.status)?,
            appointment_id: row.appointment_id,
            waiting_room_entry_id: row.waiting_room_entry_id,
            owner_id: row.owner_id,
            animal_id: row.animal_id,
            chief_complaint: row.chief_complaint,
            vitals,
            notes,
            acts,
            summary: row.summary,
            started_at: from_sql_ts(&row.started_at)?,
            closed_at: from_sql_ts_opt(row.closed_at)?,
            closed_by: row.closed_by,
            version: row.version,
            pending_events: Vec::new(),
        })
    }
}
