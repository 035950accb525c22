//! Waiting-room intake, triage and queue presentation.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{flush_events, on_constraint, OpsError, OpsResult};
use crate::clock::Clock;
use crate::models::{order_queue, Arrival, ArrivalMode, WaitingRoomEntry};
use crate::ports::{EventPublisher, WaitingRoomReadRepository, WaitingRoomStore};

pub struct WaitingRoomTriage<'a> {
    entries: &'a dyn WaitingRoomStore,
    reads: &'a dyn WaitingRoomReadRepository,
    events: &'a dyn EventPublisher,
    clock: &'a dyn Clock,
}

impl<'a> WaitingRoomTriage<'a> {
    pub fn new(
        entries: &'a dyn WaitingRoomStore,
        reads: &'a dyn WaitingRoomReadRepository,
        events: &'a dyn EventPublisher,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            entries,
            reads,
            events,
            clock,
        }
    }

    pub fn get(&self, entry_id: &str) -> OpsResult<WaitingRoomEntry> {
        self.entries
            .get_entry(entry_id)?
            .ok_or_else(|| OpsError::NotFound {
                kind: "waiting_room_entry",
                id: entry_id.to_string(),
            })
    }

    /// Register an arrival.
    ///
    /// An appointment can have at most one active entry per clinic. The read
    /// check rejects early; the storage unique index settles races.
    pub fn arrive(&self, arrival: Arrival) -> OpsResult<WaitingRoomEntry> {
        if let Some(appointment_id) = &arrival.linked_appointment_id {
            if self
                .reads
                .has_active_entry_for_appointment(&arrival.clinic_id, appointment_id)?
            {
                return Err(duplicate(&arrival.clinic_id, appointment_id));
            }
        }

        let mut entry = WaitingRoomEntry::arrive(arrival, self.clock.now())?;
        self.entries.insert_entry(&entry).map_err(|e| {
            on_constraint(e, || {
                duplicate(
                    &entry.clinic_id,
                    entry.linked_appointment_id.as_deref().unwrap_or_default(),
                )
            })
        })?;
        let _ = flush_events(self.events, &mut entry);

        info!(
            entry_id = %entry.entry_id,
            clinic_id = %entry.clinic_id,
            origin = entry.origin.as_str(),
            arrival_mode = entry.arrival_mode.as_str(),
            priority = entry.priority,
            "patient arrived"
        );
        Ok(entry)
    }

    pub fn update_triage(
        &self,
        entry_id: &str,
        priority: i32,
        triage_notes: Option<String>,
        arrival_mode: ArrivalMode,
    ) -> OpsResult<WaitingRoomEntry> {
        let now = self.clock.now();
        self.mutate(entry_id, "triage updated", |entry| {
            entry.update_triage(priority, triage_notes, arrival_mode, now)
        })
    }

    /// `waiting -> called`.
    pub fn call(
        &self,
        entry_id: &str,
        at: DateTime<Utc>,
        by_user_id: Option<&str>,
    ) -> OpsResult<WaitingRoomEntry> {
        self.mutate(entry_id, "patient called", |entry| {
            entry.call(at, by_user_id.map(str::to_string))
        })
    }

    /// `waiting | called -> in_service`.
    pub fn start_service(
        &self,
        entry_id: &str,
        at: DateTime<Utc>,
        by_user_id: Option<&str>,
    ) -> OpsResult<WaitingRoomEntry> {
        self.mutate(entry_id, "service started", |entry| {
            entry.start_service(at, by_user_id.map(str::to_string))
        })
    }

    /// Any active status `-> closed`.
    pub fn close(
        &self,
        entry_id: &str,
        at: DateTime<Utc>,
        by_user_id: Option<&str>,
    ) -> OpsResult<WaitingRoomEntry> {
        self.mutate(entry_id, "waiting-room entry closed", |entry| {
            entry.close(at, by_user_id.map(str::to_string))
        })
    }

    /// Active entries of a clinic in presentation order.
    pub fn active_queue(&self, clinic_id: &str) -> OpsResult<Vec<WaitingRoomEntry>> {
        let mut entries = self.reads.list_active(clinic_id)?;
        order_queue(&mut entries);
        Ok(entries)
    }

    fn mutate<F>(&self, entry_id: &str, what: &'static str, change: F) -> OpsResult<WaitingRoomEntry>
    where
        F: FnOnce(&mut WaitingRoomEntry) -> crate::models::DomainResult<()>,
    {
        let mut entry = self.get(entry_id)?;
        change(&mut entry)?;
        self.entries.update_entry(&entry)?;
        entry.version += 1;
        let _ = flush_events(self.events, &mut entry);

        info!(entry_id, status = entry.status.as_str(), "{}", what);
        Ok(entry)
    }
}

fn duplicate(clinic_id: &str, appointment_id: &str) -> OpsError {
    warn!(clinic_id, appointment_id, "appointment already has an active waiting-room entry");
    OpsError::DuplicateActiveEntry {
        appointment_id: appointment_id.to_string(),
    }
}
