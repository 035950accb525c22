//! Waiting-room triage integration tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use clinic_ops_core::clock::FixedClock;
use clinic_ops_core::db::Database;
use clinic_ops_core::engine::{OpsError, WaitingRoomTriage};
use clinic_ops_core::models::{
    order_queue, Arrival, ArrivalMode, EntryOrigin, WaitingRoomEntry, WaitingRoomStatus,
};
use clinic_ops_core::ports::{PortResult, WaitingRoomReadRepository};

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, hour, minute, 0).unwrap()
}

/// Sees no active entries, leaving the unique index as the only guard.
struct BlindReads;

impl WaitingRoomReadRepository for BlindReads {
    fn has_active_entry_for_appointment(
        &self,
        _clinic_id: &str,
        _appointment_id: &str,
    ) -> PortResult<bool> {
        Ok(false)
    }

    fn list_active(&self, _clinic_id: &str) -> PortResult<Vec<WaitingRoomEntry>> {
        Ok(Vec::new())
    }
}

fn walk_in(mode: ArrivalMode, priority: i32) -> Arrival {
    Arrival {
        clinic_id: "clinic-1".into(),
        origin: EntryOrigin::WalkIn,
        arrival_mode: mode,
        priority,
        triage_notes: None,
        owner_id: None,
        animal_id: None,
        linked_appointment_id: None,
    }
}

fn for_appointment(appointment_id: &str) -> Arrival {
    Arrival {
        origin: EntryOrigin::Appointment,
        linked_appointment_id: Some(appointment_id.into()),
        ..walk_in(ArrivalMode::Standard, 3)
    }
}

#[test]
fn test_start_service_only_once() {
    let db = Database::open_in_memory().unwrap();
    let clock = FixedClock::new(at(9, 0));
    let triage = WaitingRoomTriage::new(&db, &db, &db, &clock);

    let entry = triage.arrive(walk_in(ArrivalMode::Standard, 3)).unwrap();
    assert_eq!(entry.status, WaitingRoomStatus::Waiting);

    let serving = triage
        .start_service(&entry.entry_id, at(9, 10), Some("vet-1"))
        .unwrap();
    assert_eq!(serving.status, WaitingRoomStatus::InService);
    assert_eq!(serving.service_started_by.as_deref(), Some("vet-1"));

    assert!(matches!(
        triage.start_service(&entry.entry_id, at(9, 11), Some("vet-1")),
        Err(OpsError::InvalidTransition { .. })
    ));
}

#[test]
fn test_emergency_jumps_the_queue() {
    let db = Database::open_in_memory().unwrap();
    let clock = FixedClock::new(at(9, 0));
    let triage = WaitingRoomTriage::new(&db, &db, &db, &clock);

    let first = triage.arrive(walk_in(ArrivalMode::Standard, 1)).unwrap();
    clock.set(at(9, 5));
    let second = triage.arrive(walk_in(ArrivalMode::Emergency, 5)).unwrap();

    let queue = triage.active_queue("clinic-1").unwrap();
    let ids: Vec<_> = queue.iter().map(|e| e.entry_id.as_str()).collect();
    assert_eq!(ids, vec![second.entry_id.as_str(), first.entry_id.as_str()]);
}

#[test]
fn test_queue_orders_by_priority_then_arrival() {
    let db = Database::open_in_memory().unwrap();
    let clock = FixedClock::new(at(9, 0));
    let triage = WaitingRoomTriage::new(&db, &db, &db, &clock);

    let early_low = triage.arrive(walk_in(ArrivalMode::Standard, 4)).unwrap();
    clock.advance(Duration::minutes(5));
    let urgent = triage.arrive(walk_in(ArrivalMode::Standard, 1)).unwrap();
    clock.advance(Duration::minutes(5));
    let late_low = triage.arrive(walk_in(ArrivalMode::Standard, 4)).unwrap();

    let queue = triage.active_queue("clinic-1").unwrap();
    let ids: Vec<_> = queue.iter().map(|e| e.entry_id.clone()).collect();
    assert_eq!(ids, vec![urgent.entry_id, early_low.entry_id, late_low.entry_id]);
}

#[test]
fn test_closed_entries_leave_the_queue() {
    let db = Database::open_in_memory().unwrap();
    let clock = FixedClock::new(at(9, 0));
    let triage = WaitingRoomTriage::new(&db, &db, &db, &clock);

    let served = triage.arrive(walk_in(ArrivalMode::Standard, 2)).unwrap();
    let waiting = triage.arrive(walk_in(ArrivalMode::Standard, 3)).unwrap();
    triage.close(&served.entry_id, at(9, 30), Some("desk-1")).unwrap();

    let queue = triage.active_queue("clinic-1").unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].entry_id, waiting.entry_id);
    assert!(triage.active_queue("clinic-2").unwrap().is_empty());
}

#[test]
fn test_one_active_entry_per_appointment() {
    let db = Database::open_in_memory().unwrap();
    let clock = FixedClock::new(at(9, 0));
    let triage = WaitingRoomTriage::new(&db, &db, &db, &clock);

    let entry = triage.arrive(for_appointment("appt-1")).unwrap();
    assert!(matches!(
        triage.arrive(for_appointment("appt-1")),
        Err(OpsError::DuplicateActiveEntry { .. })
    ));

    triage.close(&entry.entry_id, at(9, 45), None).unwrap();
    assert!(triage.arrive(for_appointment("appt-1")).is_ok());
}

#[test]
fn test_storage_guard_rejects_duplicate_missed_by_reads() {
    let db = Database::open_in_memory().unwrap();
    let clock = FixedClock::new(at(9, 0));
    let blind = BlindReads;
    let triage = WaitingRoomTriage::new(&db, &blind, &db, &clock);

    let entry = triage.arrive(for_appointment("x")).unwrap();
    match triage.arrive(for_appointment("x")) {
        Err(OpsError::DuplicateActiveEntry { appointment_id }) => assert_eq!(appointment_id, "x"),
        other => panic!("expected duplicate entry, got {:?}", other),
    }

    triage.close(&entry.entry_id, at(9, 30), None).unwrap();
    assert!(triage.arrive(for_appointment("x")).is_ok());
}

#[test]
fn test_statuses_never_regress() {
    let db = Database::open_in_memory().unwrap();
    let clock = FixedClock::new(at(9, 0));
    let triage = WaitingRoomTriage::new(&db, &db, &db, &clock);

    let entry = triage.arrive(walk_in(ArrivalMode::Standard, 3)).unwrap();
    triage.call(&entry.entry_id, at(9, 5), Some("tech-1")).unwrap();
    assert!(matches!(
        triage.call(&entry.entry_id, at(9, 6), Some("tech-1")),
        Err(OpsError::InvalidTransition { .. })
    ));
    assert!(matches!(
        triage.update_triage(&entry.entry_id, 1, None, ArrivalMode::Emergency),
        Err(OpsError::InvalidTransition { .. })
    ));

    triage.start_service(&entry.entry_id, at(9, 7), Some("vet-1")).unwrap();
    triage.close(&entry.entry_id, at(9, 40), None).unwrap();
    assert!(matches!(
        triage.close(&entry.entry_id, at(9, 41), None),
        Err(OpsError::InvalidTransition { .. })
    ));

    let stored = triage.get(&entry.entry_id).unwrap();
    assert_eq!(stored.status, WaitingRoomStatus::Closed);
    assert_eq!(stored.called_by.as_deref(), Some("tech-1"));
    assert_eq!(stored.version, 3);
}

#[test]
fn test_retriage_while_waiting() {
    let db = Database::open_in_memory().unwrap();
    let clock = FixedClock::new(at(9, 0));
    let triage = WaitingRoomTriage::new(&db, &db, &db, &clock);

    let entry = triage.arrive(walk_in(ArrivalMode::Standard, 4)).unwrap();
    let updated = triage
        .update_triage(
            &entry.entry_id,
            1,
            Some("laboured breathing".into()),
            ArrivalMode::Emergency,
        )
        .unwrap();

    assert_eq!(updated.arrival_mode, ArrivalMode::Emergency);
    assert_eq!(updated.priority, 1);
    assert_eq!(
        triage.get(&entry.entry_id).unwrap().triage_notes.as_deref(),
        Some("laboured breathing")
    );
}

#[test]
fn test_origin_must_match_link() {
    let db = Database::open_in_memory().unwrap();
    let clock = FixedClock::new(at(9, 0));
    let triage = WaitingRoomTriage::new(&db, &db, &db, &clock);

    let unlinked = Arrival {
        origin: EntryOrigin::Appointment,
        ..walk_in(ArrivalMode::Standard, 3)
    };
    assert!(matches!(triage.arrive(unlinked), Err(OpsError::InvalidInput(_))));
}

fn arb_entry() -> impl Strategy<Value = WaitingRoomEntry> {
    (any::<bool>(), 0i32..6, 0i64..120).prop_map(|(emergency, priority, minute)| {
        let mode = if emergency {
            ArrivalMode::Emergency
        } else {
            ArrivalMode::Standard
        };
        let arrival = Arrival {
            clinic_id: "clinic-1".into(),
            origin: EntryOrigin::WalkIn,
            arrival_mode: mode,
            priority,
            triage_notes: None,
            owner_id: None,
            animal_id: None,
            linked_appointment_id: None,
        };
        WaitingRoomEntry::arrive(arrival, at(8, 0) + Duration::minutes(minute)).unwrap()
    })
}

proptest! {
    #[test]
    fn prop_queue_sorted_by_mode_priority_arrival(
        mut entries in proptest::collection::vec(arb_entry(), 0..30),
    ) {
        order_queue(&mut entries);

        for pair in entries.windows(2) {
            let key = |e: &WaitingRoomEntry| {
                (e.arrival_mode != ArrivalMode::Emergency, e.priority, e.arrived_at)
            };
            prop_assert!(key(&pair[0]) <= key(&pair[1]));
        }
    }
}
