//! Append-only domain event outbox.
//!
//! Envelopes are keyed by their SHA-256 fingerprint, so republishing the same
//! persisted mutation is a no-op. Rows are read back in append order.

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::debug;

use super::{from_sql_ts, from_sql_ts_opt, to_sql_ts, Database, DbResult};
use crate::models::EventEnvelope;
use crate::ports::{EventPublisher, PortResult};

/// A stored envelope with its delivery state.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub fingerprint: String,
    pub envelope: EventEnvelope,
    pub occurred_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Database {
    /// Append envelopes; returns how many were new.
    pub fn append_to_outbox(&self, envelopes: &[EventEnvelope]) -> DbResult<usize> {
        let mut inserted = 0;
        for envelope in envelopes {
            let payload = envelope.to_canonical_json()?;
            let fingerprint = envelope.fingerprint()?;
            inserted += self.conn.execute(
                r#"
                INSERT OR IGNORE INTO domain_event_outbox (
                    fingerprint, aggregate_type, aggregate_id, aggregate_version,
                    sequence, event_type, clinic_id, payload, occurred_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    fingerprint,
                    envelope.aggregate_type,
                    envelope.aggregate_id,
                    envelope.aggregate_version,
                    envelope.sequence,
                    envelope.event.name(),
                    envelope.event.clinic_id(),
                    payload,
                    to_sql_ts(envelope.event.occurred_at()),
                ],
            )?;
        }
        Ok(inserted)
    }

    /// Unpublished envelopes, oldest first.
    pub fn pending_outbox(&self, limit: u32) -> DbResult<Vec<OutboxRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT fingerprint, payload, occurred_at, published_at
            FROM domain_event_outbox
            WHERE published_at IS NULL
            ORDER BY rowid
            LIMIT ?
            "#,
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (fingerprint, payload, occurred_at, published_at) = row?;
            records.push(OutboxRecord {
                fingerprint,
                envelope: serde_json::from_str(&payload)?,
                occurred_at: from_sql_ts(&occurred_at)?,
                published_at: from_sql_ts_opt(published_at)?,
            });
        }
        Ok(records)
    }

    /// Mark envelopes as delivered downstream; returns how many changed.
    pub fn mark_outbox_published(
        &self,
        fingerprints: &[String],
        published_at: DateTime<Utc>,
    ) -> DbResult<usize> {
        let published_at = to_sql_ts(published_at);
        let mut updated = 0;
        for fingerprint in fingerprints {
            updated += self.conn.execute(
                "UPDATE domain_event_outbox SET published_at = ?2 WHERE fingerprint = ?1 AND published_at IS NULL",
                params![fingerprint, published_at],
            )?;
        }
        Ok(updated)
    }
}

impl EventPublisher for Database {
    fn publish(&self, envelopes: &[EventEnvelope]) -> PortResult<()> {
        let inserted = self.append_to_outbox(envelopes)?;
        debug!(offered = envelopes.len(), inserted, "events appended to outbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DomainEvent;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 10, minute, 0).unwrap()
    }

    fn envelope(version: i64) -> EventEnvelope {
        envelope_at(version, 0)
    }

    fn envelope_at(version: i64, minute: u32) -> EventEnvelope {
        EventEnvelope {
            aggregate_type: "appointment".into(),
            aggregate_id: "appt-1".into(),
            aggregate_version: version,
            sequence: 0,
            event: DomainEvent::AppointmentCancelled {
                appointment_id: "appt-1".into(),
                clinic_id: "clinic-1".into(),
                occurred_at: at(minute),
            },
        }
    }

    #[test]
    fn test_duplicate_envelopes_ignored() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.append_to_outbox(&[envelope(1)]).unwrap(), 1);
        assert_eq!(db.append_to_outbox(&[envelope(1)]).unwrap(), 0);
        assert_eq!(db.append_to_outbox(&[envelope(2)]).unwrap(), 1);

        let pending = db.pending_outbox(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].envelope, envelope(1));
    }

    #[test]
    fn test_mark_published() {
        let db = Database::open_in_memory().unwrap();
        db.append_to_outbox(&[envelope(1), envelope(2)]).unwrap();
        let pending = db.pending_outbox(10).unwrap();

        let updated = db
            .mark_outbox_published(&[pending[0].fingerprint.clone()], at(5))
            .unwrap();
        assert_eq!(updated, 1);

        let remaining = db.pending_outbox(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].envelope.aggregate_version, 2);
    }

    #[test]
    fn test_outbox_rows_cannot_be_deleted() {
        let db = Database::open_in_memory().unwrap();
        db.append_to_outbox(&[envelope(1)]).unwrap();
        assert!(db.conn().execute("DELETE FROM domain_event_outbox", []).is_err());
    }

    #[test]
    fn test_rows_keep_append_order_and_event_time() {
        let db = Database::open_in_memory().unwrap();
        // A backdated event appended later still comes out after earlier rows.
        db.append_to_outbox(&[envelope_at(1, 30)]).unwrap();
        db.append_to_outbox(&[envelope_at(2, 5)]).unwrap();

        let pending = db.pending_outbox(10).unwrap();
        let versions: Vec<_> = pending.iter().map(|r| r.envelope.aggregate_version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(pending[0].occurred_at, at(30));
        assert_eq!(pending[1].occurred_at, at(5));
    }
}
