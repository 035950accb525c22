//! SQLite schema definition.

/// Complete database schema for the clinic operations engine.
///
/// All timestamps are RFC 3339 UTC text with millisecond precision
/// (`2024-03-15T10:00:00.000Z`), so text comparison is time comparison.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Clinic Memberships
-- ============================================================================

CREATE TABLE IF NOT EXISTS memberships (
    membership_id TEXT PRIMARY KEY,
    clinic_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    engagement TEXT NOT NULL CHECK (engagement IN ('employee', 'contractor')),
    status TEXT NOT NULL CHECK (status IN ('active', 'disabled')),
    valid_from TEXT NOT NULL,
    valid_until TEXT,                            -- NULL = open-ended
    created_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    UNIQUE (clinic_id, user_id),
    CHECK (valid_until IS NULL OR valid_until >= valid_from)
);

CREATE INDEX IF NOT EXISTS idx_memberships_clinic ON memberships(clinic_id);

-- ============================================================================
-- Appointments
-- ============================================================================

CREATE TABLE IF NOT EXISTS appointments (
    appointment_id TEXT PRIMARY KEY,
    clinic_id TEXT NOT NULL,
    practitioner_user_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    animal_id TEXT NOT NULL,
    starts_at TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL CHECK (duration_minutes > 0),
    ends_at TEXT NOT NULL,                       -- derived, exclusive
    status TEXT NOT NULL CHECK (status IN ('scheduled', 'completed', 'cancelled')),
    reason TEXT NOT NULL DEFAULT '',
    service_started_at TEXT,
    created_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_appointments_agenda
    ON appointments(clinic_id, practitioner_user_id, starts_at);

-- Practitioner double-booking guard. Half-open: touching slots are allowed.
CREATE TRIGGER IF NOT EXISTS appointments_no_overlap_insert BEFORE INSERT ON appointments
WHEN new.status != 'cancelled'
BEGIN
    SELECT RAISE(ABORT, 'appointment overlaps an existing booking')
    WHERE EXISTS (
        SELECT 1 FROM appointments
        WHERE clinic_id = new.clinic_id
          AND practitioner_user_id = new.practitioner_user_id
          AND status != 'cancelled'
          AND starts_at < new.ends_at
          AND new.starts_at < ends_at
    );
END;

CREATE TRIGGER IF NOT EXISTS appointments_no_overlap_update
BEFORE UPDATE OF starts_at, ends_at, status, practitioner_user_id ON appointments
WHEN new.status != 'cancelled'
BEGIN
    SELECT RAISE(ABORT, 'appointment overlaps an existing booking')
    WHERE EXISTS (
        SELECT 1 FROM appointments
        WHERE clinic_id = new.clinic_id
          AND practitioner_user_id = new.practitioner_user_id
          AND appointment_id != new.appointment_id
          AND status != 'cancelled'
          AND starts_at < new.ends_at
          AND new.starts_at < ends_at
    );
END;

-- ============================================================================
-- Waiting Room
-- ============================================================================

CREATE TABLE IF NOT EXISTS waiting_room_entries (
    entry_id TEXT PRIMARY KEY,
    clinic_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('waiting', 'called', 'in_service', 'closed')),
    origin TEXT NOT NULL CHECK (origin IN ('walk_in', 'appointment')),
    arrival_mode TEXT NOT NULL CHECK (arrival_mode IN ('standard', 'emergency')),
    priority INTEGER NOT NULL,
    linked_appointment_id TEXT,
    owner_id TEXT,
    animal_id TEXT,
    triage_notes TEXT,
    arrived_at TEXT NOT NULL,
    called_at TEXT,
    called_by TEXT,
    service_started_at TEXT,
    service_started_by TEXT,
    closed_at TEXT,
    closed_by TEXT,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_waiting_room_clinic_status
    ON waiting_room_entries(clinic_id, status);

-- At most one active entry per linked appointment.
CREATE UNIQUE INDEX IF NOT EXISTS idx_waiting_room_active_appointment
    ON waiting_room_entries(clinic_id, linked_appointment_id)
    WHERE status != 'closed' AND linked_appointment_id IS NOT NULL;

-- ============================================================================
-- Consultations
-- ============================================================================

CREATE TABLE IF NOT EXISTS consultations (
    consultation_id TEXT PRIMARY KEY,
    clinic_id TEXT NOT NULL,
    practitioner_user_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('open', 'closed')),
    appointment_id TEXT,
    waiting_room_entry_id TEXT,
    owner_id TEXT,
    animal_id TEXT,
    chief_complaint TEXT,
    weight_kg REAL,
    temperature_c REAL,
    notes TEXT NOT NULL DEFAULT '[]',            -- JSON array of ClinicalNote
    acts TEXT NOT NULL DEFAULT '[]',             -- JSON array of PerformedAct
    summary TEXT,
    started_at TEXT NOT NULL,
    closed_at TEXT,
    closed_by TEXT,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_consultations_clinic ON consultations(clinic_id, status);
CREATE INDEX IF NOT EXISTS idx_consultations_appointment ON consultations(appointment_id);

-- A closed consultation never reopens.
CREATE TRIGGER IF NOT EXISTS consultations_closed_is_terminal BEFORE UPDATE ON consultations
WHEN old.status = 'closed'
BEGIN
    SELECT RAISE(ABORT, 'Closed consultations are immutable');
END;

-- ============================================================================
-- Reference Data (owners and animals, managed elsewhere)
-- ============================================================================

CREATE TABLE IF NOT EXISTS owners (
    owner_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS animals (
    animal_id TEXT PRIMARY KEY,
    owner_id TEXT REFERENCES owners(owner_id),
    name TEXT NOT NULL,
    species TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- ============================================================================
-- Event Outbox (Append-Only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS domain_event_outbox (
    fingerprint TEXT PRIMARY KEY,                -- SHA-256 of the canonical envelope
    aggregate_type TEXT NOT NULL,
    aggregate_id TEXT NOT NULL,
    aggregate_version INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    clinic_id TEXT NOT NULL,
    payload TEXT NOT NULL,                       -- JSON EventEnvelope
    occurred_at TEXT NOT NULL,
    published_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_unpublished
    ON domain_event_outbox(published_at);

CREATE TRIGGER IF NOT EXISTS domain_event_outbox_no_delete BEFORE DELETE ON domain_event_outbox
BEGIN
    SELECT RAISE(ABORT, 'Outbox rows cannot be deleted');
END;

-- ============================================================================
-- Coordination Failures
-- ============================================================================

CREATE TABLE IF NOT EXISTS coordination_failures (
    failure_id TEXT PRIMARY KEY,
    consultation_id TEXT NOT NULL,
    appointment_id TEXT NOT NULL,
    closed_by_user_id TEXT NOT NULL,
    last_error TEXT NOT NULL,
    attempts INTEGER NOT NULL CHECK (attempts > 0),
    status TEXT NOT NULL CHECK (status IN ('pending', 'resolved', 'abandoned')),
    created_at TEXT NOT NULL,
    last_attempt_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_coordination_failures_pending
    ON coordination_failures(status, created_at);
"#;

#[cfg(test)]
mod tests {
    use super::super::Database;

    fn names(db: &Database, kind: &str) -> Vec<String> {
        db.conn()
            .prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();
        let tables = names(&db, "table");

        for table in [
            "memberships",
            "appointments",
            "waiting_room_entries",
            "consultations",
            "owners",
            "animals",
            "domain_event_outbox",
            "coordination_failures",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_guards_installed() {
        let db = Database::open_in_memory().unwrap();
        let triggers = names(&db, "trigger");
        assert!(triggers.contains(&"appointments_no_overlap_insert".to_string()));
        assert!(triggers.contains(&"appointments_no_overlap_update".to_string()));

        let indexes = names(&db, "index");
        assert!(indexes.contains(&"idx_waiting_room_active_appointment".to_string()));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.conn().execute_batch(super::SCHEMA).unwrap();
    }
}
