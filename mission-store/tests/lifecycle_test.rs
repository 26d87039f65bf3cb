//! Mission lifecycle integration tests: relocation, expiry, purge, broadcast

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Duration;
use mission_store::keys;
use mission_store::{
    ManualClock, MemorySubstrate, MissionPhase, MissionStore, SegmentStatus, StoreConfig, Substrate,
};
use serde_json::{json, Value};

fn setup() -> (Arc<MemorySubstrate>, Arc<ManualClock>, MissionStore) {
    let substrate = Arc::new(MemorySubstrate::new());
    let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
    let store = MissionStore::new(substrate.clone(), clock.clone(), StoreConfig::default());
    (substrate, clock, store)
}

// ============================================================================
// Relocation
// ============================================================================

#[test]
fn test_relocation_resets_location_bound_fields_only() {
    let (_substrate, _clock, store) = setup();
    let mission = store.missions().create("Pipeline");
    let first = mission.segments[0].id;

    store.write_field(mission.id, "crew:pilot", "Kim");
    store.write_field(mission.id, "drone:model", "M300");
    store.write_field(mission.id, "sora:sail", "III");
    store.write_field(mission.id, "env:weather", &json!({"wind": 6}));

    let second = store
        .missions()
        .relocate(mission.id, "Pump station", Some("Pump station 4".to_string()))
        .unwrap();

    assert_eq!(store.read_field(mission.id, "sora:sail", String::new()), "");
    assert_eq!(store.read_field(mission.id, "env:weather", Value::Null), Value::Null);
    assert_eq!(store.read_field(mission.id, "crew:pilot", String::new()), "Kim");
    assert_eq!(store.read_field(mission.id, "drone:model", String::new()), "M300");

    // The first location keeps its data for the report
    assert_eq!(
        store.read_in_segment(mission.id, first, "sora:sail", String::new()),
        "III"
    );

    let reloaded = store.missions().get(mission.id).unwrap();
    assert_eq!(reloaded.active_segment_id, Some(second.id));
    assert_eq!(reloaded.segments[0].status, SegmentStatus::Completed);
    assert!(reloaded.is_consistent());
}

#[test]
fn test_relocation_of_migrated_mission_hides_legacy_data_from_new_segment() {
    let (_substrate, _clock, store) = setup();
    let mission = store.missions().create_unsegmented("Legacy");
    store.write_field(mission.id, "grc:areaType", "rural");
    assert_eq!(store.read_field(mission.id, "grc:areaType", String::new()), "rural");

    store.missions().relocate(mission.id, "Second site", None).unwrap();

    assert_eq!(store.read_field(mission.id, "grc:areaType", String::new()), "");
    let first = store.missions().first_segment(mission.id).unwrap();
    assert_eq!(
        store.read_in_segment(mission.id, first.id, "grc:areaType", String::new()),
        "rural"
    );
}

#[test]
fn test_phase_is_persisted() {
    let (substrate, clock, store) = setup();
    let mission = store.missions().create("Phases");
    store.missions().advance_phase(mission.id);
    store.missions().advance_phase(mission.id);
    drop(store);

    let reopened = MissionStore::new(substrate, clock, StoreConfig::default());
    assert_eq!(
        reopened.missions().get(mission.id).unwrap().phase,
        MissionPhase::Fluege
    );
}

// ============================================================================
// Expiry and purge
// ============================================================================

#[test]
fn test_purge_is_idempotent() {
    let (substrate, _clock, store) = setup();
    let mission = store.missions().create("Purge");
    store.write_field(mission.id, "crew:pilot", "Kim");
    store.write_field(mission.id, "env:weather", &json!({"wind": 2}));

    assert!(store.missions().purge(mission.id));
    let after_first = substrate.list_keys("").unwrap();
    assert!(!store.missions().purge(mission.id));

    assert_eq!(substrate.list_keys("").unwrap(), after_first);
    assert!(substrate
        .list_keys(&keys::mission_prefix(&mission.id))
        .unwrap()
        .is_empty());
    assert!(store.missions().get(mission.id).is_none());
    assert!(!store.cells().is_open(mission.id));
}

#[test]
fn test_purge_leaves_other_missions_intact() {
    let (_substrate, _clock, store) = setup();
    let a = store.missions().create("A");
    let b = store.missions().create("B");
    store.write_field(a.id, "crew:pilot", "Kim");
    store.write_field(b.id, "crew:pilot", "Alex");
    store.write_field(b.id, "grc:areaType", "urban");

    store.missions().purge(a.id);

    assert_eq!(store.read_field(b.id, "crew:pilot", String::new()), "Alex");
    assert_eq!(store.read_field(b.id, "grc:areaType", String::new()), "urban");
}

#[test]
fn test_stale_cell_handle_cannot_resurrect_purged_keys() {
    let (substrate, _clock, store) = setup();
    let mission = store.missions().create("Stale");
    let handle = store.cells().get_or_create(mission.id);

    store.missions().purge(mission.id);

    assert!(!handle.set("crew:pilot", json!("Kim")));
    assert!(handle.is_retired());
    assert_eq!(
        substrate
            .get(&keys::physical_key(&mission.id, "crew:pilot"))
            .unwrap(),
        None
    );
}

#[test]
fn test_catalog_expiry_windows() {
    let (substrate, clock, store) = setup();
    let open = store.missions().create("Open");
    let done = store.missions().create("Done");
    store.write_field(done.id, "crew:pilot", "Kim");

    clock.advance(Duration::hours(10));
    store.missions().complete(done.id);

    // Completed: 24h from completion
    clock.advance(Duration::hours(24));
    assert!(store.missions().purge_expired().is_empty());
    clock.advance(Duration::milliseconds(1));
    assert_eq!(store.missions().purge_expired(), vec![done.id]);
    assert!(substrate
        .list_keys(&keys::mission_prefix(&done.id))
        .unwrap()
        .is_empty());

    // Open: 56h from creation
    clock.advance(Duration::hours(22) - Duration::milliseconds(1));
    assert!(store.missions().get(open.id).is_some());
    clock.advance(Duration::milliseconds(1));
    assert!(store.missions().get(open.id).is_none());
    assert_eq!(store.missions().purge_expired(), vec![open.id]);
}

#[test]
fn test_open_purges_expired_missions() {
    let (substrate, clock, store) = setup();
    let mission = store.missions().create("Old");
    store.write_field(mission.id, "crew:pilot", "Kim");
    drop(store);

    clock.advance(Duration::hours(57));
    let (store, report) = MissionStore::open(substrate.clone(), clock, StoreConfig::default());

    assert_eq!(report.purged, vec![mission.id]);
    assert!(store.missions().list().is_empty());
    assert!(substrate.list_keys(keys::FORM_PREFIX).unwrap().is_empty());
}

// ============================================================================
// Broadcast
// ============================================================================

#[test]
fn test_catalog_listeners_see_current_list() {
    let (_substrate, _clock, store) = setup();
    let store = Arc::new(store);
    let weak: Weak<MissionStore> = Arc::downgrade(&store);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let _sub = store.missions().subscribe_catalog(move || {
        if let Some(store) = weak.upgrade() {
            sink.lock().unwrap().push(store.missions().list().len());
        }
    });

    let a = store.missions().create("A");
    store.missions().create("B");
    store.missions().purge(a.id);

    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 1]);
}

#[test]
fn test_segment_listeners_follow_relocation() {
    let (_substrate, _clock, store) = setup();
    let store = Arc::new(store);
    let mission = store.missions().create("Segments");
    let weak: Weak<MissionStore> = Arc::downgrade(&store);
    let counts = Arc::new(Mutex::new(Vec::new()));

    let sink = counts.clone();
    let mission_id = mission.id;
    let _sub = store.missions().subscribe_segments(mission.id, move || {
        if let Some(store) = weak.upgrade() {
            sink.lock().unwrap().push(store.missions().segments(mission_id).len());
        }
    });

    store.missions().relocate(mission.id, "Second", None);
    store.missions().relocate(mission.id, "Third", None);

    assert_eq!(*counts.lock().unwrap(), vec![2, 3]);
}

#[test]
fn test_unsubscribed_catalog_listener_is_silent() {
    let (_substrate, _clock, store) = setup();
    let hits = Arc::new(AtomicUsize::new(0));

    let h = hits.clone();
    let sub = store.missions().subscribe_catalog(move || {
        h.fetch_add(1, Ordering::SeqCst);
    });
    store.missions().create("One");
    sub.unsubscribe();
    store.missions().create("Two");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
