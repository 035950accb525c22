//! Waiting-room database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{check_cas, from_sql_ts, from_sql_ts_opt, parse_column, to_sql_ts, Database, DbError, DbResult};
use crate::models::WaitingRoomEntry;
use crate::ports::{PortResult, WaitingRoomReadRepository, WaitingRoomStore};

const SELECT_ENTRY: &str = r#"
    SELECT entry_id, clinic_id, status, origin, arrival_mode, priority,
           linked_appointment_id, owner_id, animal_id, triage_notes, arrived_at,
           called_at, called_by, service_started_at, service_started_by,
           closed_at, closed_by, version
    FROM waiting_room_entries
"#;

impl Database {
    pub fn insert_entry_row(&self, entry: &WaitingRoomEntry) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO waiting_room_entries (
                entry_id, clinic_id, status, origin, arrival_mode, priority,
                linked_appointment_id, owner_id, animal_id, triage_notes, arrived_at,
                called_at, called_by, service_started_at, service_started_by,
                closed_at, closed_by, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
            params![
                entry.entry_id,
                entry.clinic_id,
                entry.status.as_str(),
                entry.origin.as_str(),
                entry.arrival_mode.as_str(),
                entry.priority,
                entry.linked_appointment_id,
                entry.owner_id,
                entry.animal_id,
                entry.triage_notes,
                to_sql_ts(entry.arrived_at),
                entry.called_at.map(to_sql_ts),
                entry.called_by,
                entry.service_started_at.map(to_sql_ts),
                entry.service_started_by,
                entry.closed_at.map(to_sql_ts),
                entry.closed_by,
                entry.version,
            ],
        )?;
        Ok(())
    }

    /// Compare-and-swap update; returns the number of rows changed.
    pub fn update_entry_row(&self, entry: &WaitingRoomEntry) -> DbResult<usize> {
        Ok(self.conn.execute(
            r#"
            UPDATE waiting_room_entries SET
                status = ?3,
                arrival_mode = ?4,
                priority = ?5,
                triage_notes = ?6,
                called_at = ?7,
                called_by = ?8,
                service_started_at = ?9,
                service_started_by = ?10,
                closed_at = ?11,
                closed_by = ?12,
                version = version + 1
            WHERE entry_id = ?1 AND version = ?2
            "#,
            params![
                entry.entry_id,
                entry.version,
                entry.status.as_str(),
                entry.arrival_mode.as_str(),
                entry.priority,
                entry.triage_notes,
                entry.called_at.map(to_sql_ts),
                entry.called_by,
                entry.service_started_at.map(to_sql_ts),
                entry.service_started_by,
                entry.closed_at.map(to_sql_ts),
                entry.closed_by,
            ],
        )?)
    }

    pub fn get_entry_row(&self, entry_id: &str) -> DbResult<Option<WaitingRoomEntry>> {
        self.conn
            .query_row(
                &format!("{} WHERE entry_id = ?", SELECT_ENTRY),
                [entry_id],
                EntryRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Non-closed entries of a clinic, in arrival order.
    pub fn list_active_entries(&self, clinic_id: &str) -> DbResult<Vec<WaitingRoomEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE clinic_id = ? AND status != 'closed' ORDER BY arrived_at",
            SELECT_ENTRY
        ))?;
        let rows = stmt.query_map([clinic_id], EntryRow::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.try_into()?);
        }
        Ok(entries)
    }

    fn active_entry_exists(&self, clinic_id: &str, appointment_id: &str) -> DbResult<bool> {
        Ok(self.conn.query_row(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM waiting_room_entries
                WHERE clinic_id = ?1
                  AND linked_appointment_id = ?2
                  AND status != 'closed'
            )
            "#,
            [clinic_id, appointment_id],
            |row| row.get(0),
        )?)
    }
}

impl WaitingRoomStore for Database {
    fn get_entry(&self, entry_id: &str) -> PortResult<Option<WaitingRoomEntry>> {
        Ok(self.get_entry_row(entry_id)?)
    }

    fn insert_entry(&self, entry: &WaitingRoomEntry) -> PortResult<()> {
        Ok(self.insert_entry_row(entry)?)
    }

    fn update_entry(&self, entry: &WaitingRoomEntry) -> PortResult<()> {
        let rows = self.update_entry_row(entry)?;
        check_cas(rows, "waiting_room_entry", &entry.entry_id)
    }
}

impl WaitingRoomReadRepository for Database {
    fn has_active_entry_for_appointment(
        &self,
        clinic_id: &str,
        appointment_id: &str,
    ) -> PortResult<bool> {
        Ok(self.active_entry_exists(clinic_id, appointment_id)?)
    }

    fn list_active(&self, clinic_id: &str) -> PortResult<Vec<WaitingRoomEntry>> {
        Ok(self.list_active_entries(clinic_id)?)
    }
}

/// Intermediate row struct for database mapping.
struct EntryRow {
    entry_id: String,
    clinic_id: String,
    status: String,
    origin: String,
    arrival_mode: String,
    priority: i32,
    linked_appointment_id: Option<String>,
    owner_id: Option<String>,
    animal_id: Option<String>,
    triage_notes: Option<String>,
    arrived_at: String,
    called_at: Option<String>,
    called_by: Option<String>,
    service_started_at: Option<String>,
    service_started_by: Option<String>,
    closed_at: Option<String>,
    closed_by: Option<String>,
    version: i64,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entry_id: row.get(0)?,
            clinic_id: row.get(1)?,
            status: row.get(2)?,
            origin: row.get(3)?,
            arrival_mode: row.get(4)?,
            priority: row.get(5)?,
            linked_appointment_id: row.get(6)?,
            owner_id: row.get(7)?,
            animal_id: row.get(8)?,
            triage_notes: row.get(9)?,
            arrived_at: row.get(10)?,
            called_at: row.get(11)?,
            called_by: row.get(12)?,
            service_started_at: row.get(13)?,
            service_started_by: row.get(14)?,
            closed_at: row.get(15)?,
            closed_by: row.get(16)?,
            version: row.get(17)?,
        })
    }
}

impl TryFrom<EntryRow> for WaitingRoomEntry {
    type Error = DbError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(WaitingRoomEntry {
            entry_id: row.entry_id,
            clinic_id: row.clinic_id,
            status: parse_column(&row.status)?,
            origin: parse_column(&row.origin)?,
            arrival_mode: parse_column(&row.arrival_mode)?,
            priority: row.priority,
            linked_appointment_id: row.linked_appointment_id,
            owner_id: row.owner_id,
            animal_id: row.animal_id,
            triage_notes: row.triage_notes,
            arrived_at: from_sql_ts(&row.arrived_at)?,
            called_at: from_sql_ts_opt(row.called_at)?,
            called_by: row.called_by,
            service_started_at: from_sql_ts_opt(row.service_started_at)?,
            service_started_by: row.service_started_by,
            closed_at: from_sql_ts_opt(row.closed_at)?,
            closed_by: row.closed_by,
            version: row.version,
            pending_events: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Arrival, ArrivalMode, EntryOrigin, WaitingRoomStatus};
    use crate::ports::PortError;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, hour, minute, 0).unwrap()
    }

    fn make_entry(appointment_id: Option<&str>, arrived: DateTime<Utc>) -> WaitingRoomEntry {
        let origin = if appointment_id.is_some() {
            EntryOrigin::Appointment
        } else {
            EntryOrigin::WalkIn
        };
        WaitingRoomEntry::arrive(
            Arrival {
                clinic_id: "clinic-1".into(),
                origin,
                arrival_mode: ArrivalMode::Standard,
                priority: 3,
                triage_notes: Some("limping".into()),
                owner_id: None,
                animal_id: None,
                linked_appointment_id: appointment_id.map(str::to_string),
            },
            arrived,
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let entry = make_entry(None, at(9, 0));
        db.insert_entry(&entry).unwrap();

        let stored = db.get_entry(&entry.entry_id).unwrap().unwrap();
        assert_eq!(stored.origin, EntryOrigin::WalkIn);
        assert_eq!(stored.triage_notes.as_deref(), Some("limping"));
        assert_eq!(stored.arrived_at, at(9, 0));
    }

    #[test]
    fn test_unique_active_entry_per_appointment() {
        let db = Database::open_in_memory().unwrap();
        db.insert_entry(&make_entry(Some("appt-1"), at(9, 0))).unwrap();
        assert!(db.has_active_entry_for_appointment("clinic-1", "appt-1").unwrap());

        let result = db.insert_entry(&make_entry(Some("appt-1"), at(9, 1)));
        assert!(matches!(result, Err(PortError::Constraint(_))));
    }

    #[test]
    fn test_closed_entries_not_active() {
        let db = Database::open_in_memory().unwrap();
        let mut entry = make_entry(Some("appt-1"), at(9, 0));
        db.insert_entry(&entry).unwrap();
        db.insert_entry(&make_entry(None, at(9, 5))).unwrap();

        entry.close(at(9, 30), None).unwrap();
        db.update_entry(&entry).unwrap();

        assert!(!db.has_active_entry_for_appointment("clinic-1", "appt-1").unwrap());
        let active = db.list_active("clinic-1").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, WaitingRoomStatus::Waiting);

        db.insert_entry(&make_entry(Some("appt-1"), at(10, 0))).unwrap();
    }
}
