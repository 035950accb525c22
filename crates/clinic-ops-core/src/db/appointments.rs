//! Appointment database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{check_cas, from_sql_ts, from_sql_ts_opt, parse_column, to_sql_ts, Database, DbError, DbResult};
use crate::models::{Appointment, TimeSlot};
use crate::ports::{AppointmentConflictChecker, AppointmentStore, PortResult};

const SELECT_APPOINTMENT: &str = r#"
    SELECT appointment_id, clinic_id, practitioner_user_id, owner_id, animal_id,
           starts_at, duration_minutes, status, reason, service_started_at,
           created_at, version
    FROM appointments
"#;

impl Database {
    pub fn insert_appointment_row(&self, appointment: &Appointment) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO appointments (
                appointment_id, clinic_id, practitioner_user_id, owner_id, animal_id,
                starts_at, duration_minutes, ends_at, status, reason,
                service_started_at, created_at, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                appointment.appointment_id,
                appointment.clinic_id,
                appointment.practitioner_user_id,
                appointment.owner_id,
                appointment.animal_id,
                to_sql_ts(appointment.slot.start()),
                appointment.slot.duration_minutes(),
                to_sql_ts(appointment.slot.end()),
                appointment.status.as_str(),
                appointment.reason,
                appointment.service_started_at.map(to_sql_ts),
                to_sql_ts(appointment.created_at),
                appointment.version,
            ],
        )?;
        Ok(())
    }

    /// Compare-and-swap update; returns the number of rows changed.
    pub fn update_appointment_row(&self, appointment: &Appointment) -> DbResult<usize> {
        Ok(self.conn.execute(
            r#"
            UPDATE appointments SET
                starts_at = ?3,
                duration_minutes = ?4,
                ends_at = ?5,
                status = ?6,
                service_started_at = ?7,
                version = version + 1
            WHERE appointment_id = ?1 AND version = ?2
            "#,
            params![
                appointment.appointment_id,
                appointment.version,
                to_sql_ts(appointment.slot.start()),
                appointment.slot.duration_minutes(),
                to_sql_ts(appointment.slot.end()),
                appointment.status.as_str(),
                appointment.service_started_at.map(to_sql_ts),
            ],
        )?)
    }

    pub fn get_appointment_row(&self, appointment_id: &str) -> DbResult<Option<Appointment>> {
        self.conn
            .query_row(
                &format!("{} WHERE appointment_id = ?", SELECT_APPOINTMENT),
                [appointment_id],
                AppointmentRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// A practitioner's non-cancelled appointments starting in `[from, to)`, in start order.
    pub fn list_practitioner_agenda(
        &self,
        clinic_id: &str,
        practitioner_user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<Appointment>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"{}
            WHERE clinic_id = ?1 AND practitioner_user_id = ?2
              AND status != 'cancelled'
              AND starts_at >= ?3 AND starts_at < ?4
            ORDER BY starts_at"#,
            SELECT_APPOINTMENT
        ))?;
        let rows = stmt.query_map(
            params![clinic_id, practitioner_user_id, to_sql_ts(from), to_sql_ts(to)],
            AppointmentRow::from_row,
        )?;

        let mut appointments = Vec::new();
        for row in rows {
            appointments.push(row?.try_into()?);
        }
        Ok(appointments)
    }

    fn overlapping_appointment_exists(
        &self,
        clinic_id: &str,
        practitioner_user_id: &str,
        slot: &TimeSlot,
        exclude_appointment_id: Option<&str>,
    ) -> DbResult<bool> {
        Ok(self.conn.query_row(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM appointments
                WHERE clinic_id = ?1
                  AND practitioner_user_id = ?2
                  AND status != 'cancelled'
                  AND starts_at < ?4
                  AND ?3 < ends_at
                  AND (?5 IS NULL OR appointment_id != ?5)
            )
            "#,
            params![
                clinic_id,
                practitioner_user_id,
                to_sql_ts(slot.start()),
                to_sql_ts(slot.end()),
                exclude_appointment_id,
            ],
            |row| row.get(0),
        )?)
    }
}

impl AppointmentStore for Database {
    fn get_appointment(&self, appointment_id: &str) -> PortResult<Option<Appointment>> {
        Ok(self.get_appointment_row(appointment_id)?)
    }

    fn insert_appointment(&self, appointment: &Appointment) -> PortResult<()> {
        Ok(self.insert_appointment_row(appointment)?)
    }

    fn update_appointment(&self, appointment: &Appointment) -> PortResult<()> {
        let rows = self.update_appointment_row(appointment)?;
        check_cas(rows, "appointment", &appointment.appointment_id)
    }
}

impl AppointmentConflictChecker for Database {
    fn has_overlap(
        &self,
        clinic_id: &str,
        practitioner_user_id: &str,
        slot: &TimeSlot,
        exclude_appointment_id: Option<&str>,
    ) -> PortResult<bool> {
        Ok(self.overlapping_appointment_exists(
            clinic_id,
            practitioner_user_id,
            slot,
            exclude_appointment_id,
        )?)
    }
}

/// Intermediate row struct for database mapping.
struct AppointmentRow {
    appointment_id: String,
    clinic_id: String,
    practitioner_user_id: String,
    owner_id: String,
    animal_id: String,
    starts_at: String,
    duration_minutes: u32,
    status: String,
    reason: String,
    service_started_at: Option<String>,
    created_at: String,
    version: i64,
}

impl AppointmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            appointment_id: row.get(0)?,
            clinic_id: row.get(1)?,
            practitioner_user_id: row.get(2)?,
            owner_id: row.get(3)?,
            animal_id: row.get(4)?,
            starts_at: row.get(5)?,
            duration_minutes: row.get(6)?,
            status: row.get(7)?,
            reason: row.get(8)?,
            service_started_at: row.get(9)?,
            created_at: row.get(10)?,
            version: row.get(11)?,
        })
    }
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DbError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let slot = TimeSlot::new(from_sql_ts(&row.starts_at)?, row.duration_minutes)
            .map_err(|e| DbError::Constraint(e.to_string()))?;

        Ok(Appointment {
            appointment_id: row.appointment_id,
            clinic_id: row.clinic_id,
            practitioner_user_id: row.practitioner_user_id,
            owner_id: row.owner_id,
            animal_id: row.animal_id,
            slot,
            status: parse_column(&row.status)?,
            reason: row.reason,
            service_started_at: from_sql_ts_opt(row.service_started_at)?,
            created_at: from_sql_ts(&row.created_at)?,
            version: row.version,
            pending_events: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus;
    use crate::ports::PortError;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, hour, minute, 0).unwrap()
    }

    fn make_appointment(practitioner: &str, hour: u32, minute: u32, minutes: u32) -> Appointment {
        Appointment::schedule(
            "clinic-1".into(),
            practitioner.into(),
            "owner-1".into(),
            "animal-1".into(),
            TimeSlot::new(at(hour, minute), minutes).unwrap(),
            "Vaccination".into(),
            at(8, 0),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let appointment = make_appointment("vet-1", 10, 0, 30);
        db.insert_appointment(&appointment).unwrap();

        let stored = db.get_appointment(&appointment.appointment_id).unwrap().unwrap();
        assert_eq!(stored.slot, appointment.slot);
        assert_eq!(stored.status, AppointmentStatus::Scheduled);
        assert_eq!(stored.reason, "Vaccination");
    }

    #[test]
    fn test_has_overlap_half_open() {
        let db = Database::open_in_memory().unwrap();
        let appointment = make_appointment("vet-1", 10, 0, 30);
        db.insert_appointment(&appointment).unwrap();

        let inside = TimeSlot::new(at(10, 15), 30).unwrap();
        let touching = TimeSlot::new(at(10, 30), 30).unwrap();
        assert!(db.has_overlap("clinic-1", "vet-1", &inside, None).unwrap());
        assert!(!db.has_overlap("clinic-1", "vet-1", &touching, None).unwrap());
        assert!(!db.has_overlap("clinic-1", "vet-2", &inside, None).unwrap());
        assert!(!db
            .has_overlap("clinic-1", "vet-1", &inside, Some(&appointment.appointment_id))
            .unwrap());
    }

    #[test]
    fn test_trigger_rejects_overlap_on_insert() {
        let db = Database::open_in_memory().unwrap();
        db.insert_appointment(&make_appointment("vet-1", 10, 0, 30)).unwrap();
        let result = db.insert_appointment(&make_appointment("vet-1", 10, 15, 30));
        assert!(matches!(result, Err(PortError::Constraint(_))));
    }

    #[test]
    fn test_cancelled_frees_slot() {
        let db = Database::open_in_memory().unwrap();
        let mut first = make_appointment("vet-1", 10, 0, 30);
        db.insert_appointment(&first).unwrap();

        first.cancel(at(9, 0)).unwrap();
        db.update_appointment(&first).unwrap();

        let slot = TimeSlot::new(at(10, 0), 30).unwrap();
        assert!(!db.has_overlap("clinic-1", "vet-1", &slot, None).unwrap());
        db.insert_appointment(&make_appointment("vet-1", 10, 0, 30)).unwrap();
    }

    #[test]
    fn test_agenda_in_start_order() {
        let db = Database::open_in_memory().unwrap();
        let late = make_appointment("vet-1", 14, 0, 30);
        let early = make_appointment("vet-1", 9, 0, 30);
        db.insert_appointment(&late).unwrap();
        db.insert_appointment(&early).unwrap();

        let agenda = db
            .list_practitioner_agenda("clinic-1", "vet-1", at(0, 0), at(23, 0))
            .unwrap();
        assert_eq!(agenda.len(), 2);
        assert_eq!(agenda[0].appointment_id, early.appointment_id);
    }
}
