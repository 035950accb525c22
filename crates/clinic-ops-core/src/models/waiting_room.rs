//! Waiting-room entry models and queue ordering.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, Aggregate, DomainError, DomainEvent, DomainResult};

/// Entry status. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WaitingRoomStatus {
    Waiting,
    Called,
    InService,
    Closed,
}

impl WaitingRoomStatus {
    /// Statuses that count as "still in the waiting room".
    pub const ACTIVE: [WaitingRoomStatus; 3] = [
        WaitingRoomStatus::Waiting,
        WaitingRoomStatus::Called,
        WaitingRoomStatus::InService,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WaitingRoomStatus::Waiting => "waiting",
            WaitingRoomStatus::Called => "called",
            WaitingRoomStatus::InService => "in_service",
            WaitingRoomStatus::Closed => "closed",
        }
    }

    pub fn is_active(&self) -> bool {
        *self != WaitingRoomStatus::Closed
    }
}

impl FromStr for WaitingRoomStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(WaitingRoomStatus::Waiting),
            "called" => Ok(WaitingRoomStatus::Called),
            "in_service" => Ok(WaitingRoomStatus::InService),
            "closed" => Ok(WaitingRoomStatus::Closed),
            _ => Err(DomainError::InvalidInput(format!(
                "Unknown waiting-room status: {}",
                s
            ))),
        }
    }
}

/// How the entry came to be in the waiting room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    WalkIn,
    Appointment,
}

impl EntryOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryOrigin::WalkIn => "walk_in",
            EntryOrigin::Appointment => "appointment",
        }
    }
}

impl FromStr for EntryOrigin {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "walk_in" => Ok(EntryOrigin::WalkIn),
            "appointment" => Ok(EntryOrigin::Appointment),
            _ => Err(DomainError::InvalidInput(format!("Unknown entry origin: {}", s))),
        }
    }
}

/// Primary queue sort key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalMode {
    Standard,
    Emergency,
}

impl ArrivalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrivalMode::Standard => "standard",
            ArrivalMode::Emergency => "emergency",
        }
    }
}

impl FromStr for ArrivalMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(ArrivalMode::Standard),
            "emergency" => Ok(ArrivalMode::Emergency),
            _ => Err(DomainError::InvalidInput(format!("Unknown arrival mode: {}", s))),
        }
    }
}

/// Triage input captured on arrival.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub clinic_id: String,
    pub origin: EntryOrigin,
    pub arrival_mode: ArrivalMode,
    /// Lower is more urgent
    pub priority: i32,
    pub triage_notes: Option<String>,
    pub owner_id: Option<String>,
    pub animal_id: Option<String>,
    pub linked_appointment_id: Option<String>,
}

/// A patient waiting to be seen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingRoomEntry {
    pub entry_id: String,
    pub clinic_id: String,
    pub status: WaitingRoomStatus,
    pub origin: EntryOrigin,
    pub arrival_mode: ArrivalMode,
    pub priority: i32,
    pub linked_appointment_id: Option<String>,
    pub owner_id: Option<String>,
    pub animal_id: Option<String>,
    pub triage_notes: Option<String>,
    pub arrived_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub called_by: Option<String>,
    pub service_started_at: Option<DateTime<Utc>>,
    pub service_started_by: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub version: i64,
    #[serde(skip)]
    pub(crate) pending_events: Vec<DomainEvent>,
}

impl WaitingRoomEntry {
    /// Register an arrival. Appointment-origin entries must carry the appointment id.
    pub fn arrive(arrival: Arrival, now: DateTime<Utc>) -> DomainResult<Self> {
        match (arrival.origin, &arrival.linked_appointment_id) {
            (EntryOrigin::Appointment, None) => {
                return Err(DomainError::InvalidInput(
                    "appointment-origin arrival requires a linked appointment".into(),
                ))
            }
            (EntryOrigin::WalkIn, Some(_)) => {
                return Err(DomainError::InvalidInput(
                    "walk-in arrival cannot be linked to an appointment".into(),
                ))
            }
            _ => {}
        }

        let mut entry = Self {
            entry_id: new_id(),
            clinic_id: arrival.clinic_id,
            status: WaitingRoomStatus::Waiting,
            origin: arrival.origin,
            arrival_mode: arrival.arrival_mode,
            priority: arrival.priority,
            linked_appointment_id: arrival.linked_appointment_id,
            owner_id: arrival.owner_id,
            animal_id: arrival.animal_id,
            triage_notes: arrival.triage_notes,
            arrived_at: now,
            called_at: None,
            called_by: None,
            service_started_at: None,
            service_started_by: None,
            closed_at: None,
            closed_by: None,
            version: 0,
            pending_events: Vec::new(),
        };
        entry.pending_events.push(DomainEvent::PatientArrived {
            entry_id: entry.entry_id.clone(),
            clinic_id: entry.clinic_id.clone(),
            arrival_mode: entry.arrival_mode,
            priority: entry.priority,
            linked_appointment_id: entry.linked_appointment_id.clone(),
            occurred_at: now,
        });
        Ok(entry)
    }

    /// Re-triage; only while still waiting.
    pub fn update_triage(
        &mut self,
        priority: i32,
        triage_notes: Option<String>,
        arrival_mode: ArrivalMode,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.status != WaitingRoomStatus::Waiting {
            return Err(self.invalid("update triage of"));
        }
        self.priority = priority;
        self.triage_notes = triage_notes;
        self.arrival_mode = arrival_mode;
        self.pending_events.push(DomainEvent::TriageUpdated {
            entry_id: self.entry_id.clone(),
            clinic_id: self.clinic_id.clone(),
            arrival_mode,
            priority,
            occurred_at: now,
        });
        Ok(())
    }

    pub fn call(&mut self, at: DateTime<Utc>, by_user_id: Option<String>) -> DomainResult<()> {
        if self.status != WaitingRoomStatus::Waiting {
            return Err(self.invalid("call"));
        }
        self.status = WaitingRoomStatus::Called;
        self.called_at = Some(at);
        self.called_by = by_user_id.clone();
        self.pending_events.push(DomainEvent::PatientCalled {
            entry_id: self.entry_id.clone(),
            clinic_id: self.clinic_id.clone(),
            by_user_id,
            occurred_at: at,
        });
        Ok(())
    }

    pub fn start_service(
        &mut self,
        at: DateTime<Utc>,
        by_user_id: Option<String>,
    ) -> DomainResult<()> {
        if !matches!(
            self.status,
            WaitingRoomStatus::Waiting | WaitingRoomStatus::Called
        ) {
            return Err(self.invalid("start service for"));
        }
        self.status = WaitingRoomStatus::InService;
        self.service_started_at = Some(at);
        self.service_started_by = by_user_id.clone();
        self.pending_events
            .push(DomainEvent::WaitingRoomServiceStarted {
                entry_id: self.entry_id.clone(),
                clinic_id: self.clinic_id.clone(),
                by_user_id,
                occurred_at: at,
            });
        Ok(())
    }

    pub fn close(&mut self, at: DateTime<Utc>, by_user_id: Option<String>) -> DomainResult<()> {
        if self.status == WaitingRoomStatus::Closed {
            return Err(self.invalid("close"));
        }
        self.status = WaitingRoomStatus::Closed;
        self.closed_at = Some(at);
        self.closed_by = by_user_id.clone();
        self.pending_events.push(DomainEvent::WaitingRoomEntryClosed {
            entry_id: self.entry_id.clone(),
            clinic_id: self.clinic_id.clone(),
            by_user_id,
            occurred_at: at,
        });
        Ok(())
    }

    /// Queue comparison: emergencies first, then lower priority, then earlier arrival.
    pub fn queue_cmp(&self, other: &Self) -> Ordering {
        let emergency_rank = |entry: &Self| entry.arrival_mode != ArrivalMode::Emergency;
        emergency_rank(self)
            .cmp(&emergency_rank(other))
            .then(self.priority.cmp(&other.priority))
            .then(self.arrived_at.cmp(&other.arrived_at))
    }

    fn invalid(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            aggregate: Self::KIND,
            action,
            state: self.status.as_str().to_string(),
        }
    }
}

/// Sort entries into presentation order (stable for identical keys).
pub fn order_queue(entries: &mut [WaitingRoomEntry]) {
    entries.sort_by(|a, b| a.queue_cmp(b));
}

impl Aggregate for WaitingRoomEntry {
    const KIND: &'static str = "waiting_room_entry";

    fn id(&self) -> &str {
        &self.entry_id
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, hour, minute, 0).unwrap()
    }

    fn walk_in(mode: ArrivalMode, priority: i32, arrived: DateTime<Utc>) -> WaitingRoomEntry {
        WaitingRoomEntry::arrive(
            Arrival {
                clinic_id: "clinic-1".into(),
                origin: EntryOrigin::WalkIn,
                arrival_mode: mode,
                priority,
                triage_notes: None,
                owner_id: None,
                animal_id: None,
                linked_appointment_id: None,
            },
            arrived,
        )
        .unwrap()
    }

    #[test]
    fn test_arrival_starts_waiting() {
        let entry = walk_in(ArrivalMode::Standard, 3, at(9, 0));
        assert_eq!(entry.status, WaitingRoomStatus::Waiting);
        assert_eq!(entry.arrived_at, at(9, 0));
        assert_eq!(entry.entry_id.len(), 36);
    }

    #[test]
    fn test_origin_must_match_link() {
        let result = WaitingRoomEntry::arrive(
            Arrival {
                clinic_id: "clinic-1".into(),
                origin: EntryOrigin::Appointment,
                arrival_mode: ArrivalMode::Standard,
                priority: 1,
                triage_notes: None,
                owner_id: None,
                animal_id: None,
                linked_appointment_id: None,
            },
            at(9, 0),
        );
        assert!(matches!(result, Err(DomainError::InvalidInput(_))));
    }

    #[test]
    fn test_forward_only_transitions() {
        let mut entry = walk_in(ArrivalMode::Standard, 3, at(9, 0));
        entry.call(at(9, 10), Some("vet-1".into())).unwrap();
        assert!(entry.call(at(9, 11), None).is_err());
        assert!(entry.update_triage(1, None, ArrivalMode::Emergency, at(9, 11)).is_err());

        entry.start_service(at(9, 12), Some("vet-1".into())).unwrap();
        assert_eq!(entry.status, WaitingRoomStatus::InService);
        assert!(entry.start_service(at(9, 13), None).is_err());

        entry.close(at(9, 40), None).unwrap();
        assert!(entry.close(at(9, 41), None).is_err());
        assert!(entry.start_service(at(9, 41), None).is_err());
        assert_eq!(entry.closed_at, Some(at(9, 40)));
    }

    #[test]
    fn test_direct_close_from_waiting() {
        let mut entry = walk_in(ArrivalMode::Standard, 3, at(9, 0));
        entry.close(at(9, 5), None).unwrap();
        assert_eq!(entry.status, WaitingRoomStatus::Closed);
    }

    #[test]
    fn test_update_triage_while_waiting() {
        let mut entry = walk_in(ArrivalMode::Standard, 3, at(9, 0));
        entry
            .update_triage(0, Some("bleeding".into()), ArrivalMode::Emergency, at(9, 2))
            .unwrap();
        assert_eq!(entry.priority, 0);
        assert_eq!(entry.arrival_mode, ArrivalMode::Emergency);
        assert_eq!(entry.triage_notes.as_deref(), Some("bleeding"));
    }

    #[test]
    fn test_emergency_before_standard() {
        let first = walk_in(ArrivalMode::Standard, 1, at(9, 0));
        let second = walk_in(ArrivalMode::Emergency, 5, at(9, 5));
        let mut queue = vec![first.clone(), second.clone()];
        order_queue(&mut queue);
        assert_eq!(queue[0].entry_id, second.entry_id);
        assert_eq!(queue[1].entry_id, first.entry_id);
    }

    #[test]
    fn test_priority_then_fifo() {
        let late_urgent = walk_in(ArrivalMode::Standard, 1, at(9, 30));
        let early = walk_in(ArrivalMode::Standard, 2, at(9, 0));
        let later = walk_in(ArrivalMode::Standard, 2, at(9, 10));
        let mut queue = vec![later.clone(), early.clone(), late_urgent.clone()];
        order_queue(&mut queue);
        let ids: Vec<_> = queue.iter().map(|e| e.entry_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                late_urgent.entry_id.as_str(),
                early.entry_id.as_str(),
                later.entry_id.as_str()
            ]
        );
    }

    #[test]
    fn test_active_statuses() {
        assert_eq!(WaitingRoomStatus::ACTIVE.len(), 3);
        assert!(!WaitingRoomStatus::ACTIVE.contains(&WaitingRoomStatus::Closed));
        assert_eq!(
            "in_service".parse::<WaitingRoomStatus>().unwrap(),
            WaitingRoomStatus::InService
        );
    }
}
