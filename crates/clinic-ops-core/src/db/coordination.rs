//! Coordination failure log.

use rusqlite::{params, Row};

use super::{check_cas, from_sql_ts, to_sql_ts, Database, DbError, DbResult};
use crate::ports::{
    CoordinationFailureLog, CoordinationFailureRecord, CoordinationFailureStatus, PortResult,
};

const SELECT_FAILURE: &str = r#"
    SELECT failure_id, consultation_id, appointment_id, closed_by_user_id,
           last_error, attempts, status, created_at, last_attempt_at
    FROM coordination_failures
"#;

impl Database {
    pub fn insert_coordination_failure(&self, record: &CoordinationFailureRecord) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO coordination_failures (
                failure_id, consultation_id, appointment_id, closed_by_user_id,
                last_error, attempts, status, created_at, last_attempt_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.failure_id,
                record.consultation_id,
                record.appointment_id,
                record.closed_by_user_id,
                record.last_error,
                record.attempts,
                record.status.as_str(),
                to_sql_ts(record.created_at),
                to_sql_ts(record.last_attempt_at),
            ],
        )?;
        Ok(())
    }

    pub fn update_coordination_failure_row(
        &self,
        record: &CoordinationFailureRecord,
    ) -> DbResult<usize> {
        Ok(self.conn.execute(
            r#"
            UPDATE coordination_failures SET
                last_error = ?2,
                attempts = ?3,
                status = ?4,
                last_attempt_at = ?5
            WHERE failure_id = ?1
            "#,
            params![
                record.failure_id,
                record.last_error,
                record.attempts,
                record.status.as_str(),
                to_sql_ts(record.last_attempt_at),
            ],
        )?)
    }

    pub fn list_coordination_failures(
        &self,
        status: CoordinationFailureStatus,
        limit: u32,
    ) -> DbResult<Vec<CoordinationFailureRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE status = ?1 ORDER BY created_at, failure_id LIMIT ?2",
            SELECT_FAILURE
        ))?;
        let rows = stmt.query_map(params![status.as_str(), limit], FailureRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }
}

impl CoordinationFailureLog for Database {
    fn record_coordination_failure(&self, record: &CoordinationFailureRecord) -> PortResult<()> {
        Ok(self.insert_coordination_failure(record)?)
    }

    fn pending_coordination_failures(
        &self,
        limit: u32,
    ) -> PortResult<Vec<CoordinationFailureRecord>> {
        Ok(self.list_coordination_failures(CoordinationFailureStatus::Pending, limit)?)
    }

    fn update_coordination_failure(&self, record: &CoordinationFailureRecord) -> PortResult<()> {
        let rows = self.update_coordination_failure_row(record)?;
        check_cas(rows, "coordination_failure", &record.failure_id)
    }
}

/// Intermediate row struct for database mapping.
struct FailureRow {
    failure_id: String,
    consultation_id: String,
    appointment_id: String,
    closed_by_user_id: String,
    last_error: String,
    attempts: u32,
    status: String,
    created_at: String,
    last_attempt_at: String,
}

impl FailureRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            failure_id: row.get(0)?,
            consultation_id: row.get(1)?,
            appointment_id: row.get(2)?,
            closed_by_user_id: row.get(3)?,
            last_error: row.get(4)?,
            attempts: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            last_attempt_at: row.get(8)?,
        })
    }
}

impl TryFrom<FailureRow> for CoordinationFailureRecord {
    type Error = DbError;

    fn try_from(row: FailureRow) -> Result<Self, Self::Error> {
        Ok(CoordinationFailureRecord {
            failure_id: row.failure_id,
            consultation_id: row.consultation_id,
            appointment_id: row.appointment_id,
            closed_by_user_id: row.closed_by_user_id,
            last_error: row.last_error,
            attempts: row.attempts,
            status: string_to_status(&row.status)?,
            created_at: from_sql_ts(&row.created_at)?,
            last_attempt_at: from_sql_ts(&row.last_attempt_at)?,
        })
    }
}

fn string_to_status(s: &str) -> Result<CoordinationFailureStatus, DbError> {
    match s {
        "pending" => Ok(CoordinationFailureStatus::Pending),
        "resolved" => Ok(CoordinationFailureStatus::Resolved),
        "abandoned" => Ok(CoordinationFailureStatus::Abandoned),
        _ => Err(DbError::Constraint(format!(
            "Unknown coordination failure status: {}",
            s
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 11, minute, 0).unwrap()
    }

    fn make_record(id: &str, minute: u32) -> CoordinationFailureRecord {
        CoordinationFailureRecord {
            failure_id: id.into(),
            consultation_id: "consult-1".into(),
            appointment_id: "appt-1".into(),
            closed_by_user_id: "vet-1".into(),
            last_error: "Scheduling unavailable: down".into(),
            attempts: 1,
            status: CoordinationFailureStatus::Pending,
            created_at: at(minute),
            last_attempt_at: at(minute),
        }
    }

    #[test]
    fn test_pending_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        db.record_coordination_failure(&make_record("f-2", 5)).unwrap();
        db.record_coordination_failure(&make_record("f-1", 1)).unwrap();

        let pending = db.pending_coordination_failures(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].failure_id, "f-1");

        assert_eq!(db.pending_coordination_failures(1).unwrap().len(), 1);
    }

    #[test]
    fn test_resolved_leaves_pending_queue() {
        let db = Database::open_in_memory().unwrap();
        let mut record = make_record("f-1", 1);
        db.record_coordination_failure(&record).unwrap();

        record.status = CoordinationFailureStatus::Resolved;
        record.attempts = 2;
        db.update_coordination_failure(&record).unwrap();

        assert!(db.pending_coordination_failures(10).unwrap().is_empty());
        let resolved = db
            .list_coordination_failures(CoordinationFailureStatus::Resolved, 10)
            .unwrap();
        assert_eq!(resolved[0].attempts, 2);
    }
}
