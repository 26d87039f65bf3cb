//! Mission reactive cells.
//!
//! One [`MissionCell`] per mission holds the decoded field entries in memory.
//! It is hydrated from the substrate the first time the mission is touched
//! (the only full prefix scan the store performs) and is kept until the
//! mission is purged, regardless of how many subscribers it has.
//!
//! Every write goes substrate first, memory second, listeners last, so no
//! listener ever reacts to a value that was not at least attempted on disk.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Duration;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::broadcast::{ListenerList, Subscription};
use crate::clock::Clock;
use crate::codec::{self, Decoded, Entry};
use crate::keys;
use crate::substrate::Substrate;

/// Change notification delivered to cell subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum CellEvent {
    /// A key was written
    Set { key: String, value: Value },
    /// Keys were removed (prefix invalidation or expiry)
    Removed { keys: Vec<String> },
}

struct CellState {
    entries: BTreeMap<String, Entry>,
    retired: bool,
}

/// In-memory, observable view of one mission's fields.
pub struct MissionCell {
    mission_id: Uuid,
    state: Mutex<CellState>,
    listeners: ListenerList<CellEvent>,
    substrate: Arc<dyn Substrate>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl MissionCell {
    /// Build a cell by scanning every physical key under the mission prefix.
    ///
    /// Expired entries are deleted from the substrate; corrupt ones are
    /// skipped and left as they are.
    pub fn hydrate(
        mission_id: Uuid,
        substrate: Arc<dyn Substrate>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        let prefix = keys::mission_prefix(&mission_id);
        let now = clock.now();
        let mut entries = BTreeMap::new();
        let mut expired = 0usize;
        let mut corrupt = 0usize;

        let physical_keys = substrate.list_keys(&prefix).unwrap_or_else(|e| {
            warn!(mission_id = %mission_id, error = %e, "Hydration scan failed, starting empty");
            Vec::new()
        });

        for physical in physical_keys {
            let Some(logical) = physical.strip_prefix(&prefix) else {
                continue;
            };
            let raw = match substrate.get(&physical) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %physical, error = %e, "Failed to read entry during hydration");
                    continue;
                }
            };

            match codec::decode(&raw, now, ttl) {
                Decoded::Fresh(entry) => {
                    entries.insert(logical.to_string(), entry);
                }
                Decoded::Expired => {
                    expired += 1;
                    if let Err(e) = substrate.remove(&physical) {
                        warn!(key = %physical, error = %e, "Failed to delete expired entry");
                    }
                }
                Decoded::Corrupt => {
                    corrupt += 1;
                    debug!(key = %physical, "Skipping corrupt entry");
                }
            }
        }

        debug!(
            mission_id = %mission_id,
            fields = entries.len(),
            expired,
            corrupt,
            "Hydrated mission cell"
        );

        Self {
            mission_id,
            state: Mutex::new(CellState {
                entries,
                retired: false,
            }),
            listeners: ListenerList::new(),
            substrate,
            clock,
            ttl,
        }
    }

    pub fn mission_id(&self) -> Uuid {
        self.mission_id
    }

    fn state(&self) -> MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a value. Entries that outlived the TTL during this session are
    /// dropped from memory and substrate and read as absent.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut state = self.state();

        let expired = state.entries.get(key)?.is_expired(now, self.ttl);
        if expired {
            state.entries.remove(key);
            self.remove_physical(key);
            return None;
        }
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// All readable entries, keyed by logical key.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let now = self.clock.now();
        let mut state = self.state();

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, self.ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.remove(key);
            self.remove_physical(key);
        }

        state
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Logical keys currently held that start with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state()
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Write a value through to the substrate, then notify subscribers.
    ///
    /// A substrate failure (quota) is logged and the in-memory value still
    /// updates, so the session keeps working; the value is just not durable.
    /// Returns `false` only when the cell has been retired.
    pub fn set(&self, key: &str, value: Value) -> bool {
        {
            let mut state = self.state();
            if state.retired {
                warn!(mission_id = %self.mission_id, key = %key, "Dropping write to purged mission");
                return false;
            }

            let entry = Entry::new(value.clone(), self.clock.now());
            let physical = keys::physical_key(&self.mission_id, key);
            let persisted = codec::encode(&entry).and_then(|raw| self.substrate.set(&physical, &raw));
            if let Err(e) = persisted {
                warn!(
                    mission_id = %self.mission_id,
                    key = %key,
                    error = %e,
                    "Write not durable, keeping in-memory value"
                );
            }

            state.entries.insert(key.to_string(), entry);
        }

        trace!(mission_id = %self.mission_id, key = %key, "Field set");
        self.listeners.emit(&CellEvent::Set {
            key: key.to_string(),
            value,
        });
        true
    }

    /// Remove every key starting with `prefix`, physically and in memory,
    /// under one lock. Returns the removed logical keys.
    pub fn remove_prefix(&self, prefix: &str) -> Vec<String> {
        let removed: Vec<String> = {
            let mut state = self.state();

            let physical_prefix = keys::physical_key(&self.mission_id, prefix);
            if let Err(e) = self.substrate.delete_by_prefix(&physical_prefix) {
                warn!(
                    mission_id = %self.mission_id,
                    prefix = %prefix,
                    error = %e,
                    "Physical prefix delete failed"
                );
            }

            let removed: Vec<String> = state
                .entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();
            for key in &removed {
                state.entries.remove(key);
            }
            removed
        };

        if !removed.is_empty() {
            debug!(mission_id = %self.mission_id, prefix = %prefix, count = removed.len(), "Cleared prefix");
            self.listeners.emit(&CellEvent::Removed {
                keys: removed.clone(),
            });
        }
        removed
    }

    /// Observe writes and removals on this cell.
    pub fn subscribe(
        &self,
        listener: impl Fn(&CellEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe(listener)
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Mark the cell dead after its mission was purged. Later writes through
    /// stale handles are dropped instead of resurrecting purged keys.
    pub fn retire(&self) {
        {
            let mut state = self.state();
            state.retired = true;
            state.entries.clear();
        }
        self.listeners.clear();
    }

    pub fn is_retired(&self) -> bool {
        self.state().retired
    }

    fn remove_physical(&self, key: &str) {
        let physical = keys::physical_key(&self.mission_id, key);
        if let Err(e) = self.substrate.remove(&physical) {
            warn!(key = %physical, error = %e, "Failed to delete expired entry");
        }
    }
}

/// Owner of every mission cell in the process.
pub struct CellManager {
    cells: DashMap<Uuid, Arc<MissionCell>>,
    substrate: Arc<dyn Substrate>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl CellManager {
    pub fn new(substrate: Arc<dyn Substrate>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            cells: DashMap::new(),
            substrate,
            clock,
            ttl,
        }
    }

    /// The mission's cell, hydrating it on first access.
    pub fn get_or_create(&self, mission_id: Uuid) -> Arc<MissionCell> {
        if let Some(cell) = self.cells.get(&mission_id) {
            return Arc::clone(cell.value());
        }

        let cell = self.cells.entry(mission_id).or_insert_with(|| {
            Arc::new(MissionCell::hydrate(
                mission_id,
                Arc::clone(&self.substrate),
                Arc::clone(&self.clock),
                self.ttl,
            ))
        });
        Arc::clone(cell.value())
    }

    /// The mission's cell if it has already been hydrated.
    pub fn get_existing(&self, mission_id: Uuid) -> Option<Arc<MissionCell>> {
        self.cells.get(&mission_id).map(|cell| Arc::clone(cell.value()))
    }

    /// Snapshot of a mission's fields.
    pub fn get(&self, mission_id: Uuid) -> BTreeMap<String, Value> {
        self.get_or_create(mission_id).snapshot()
    }

    pub fn set(&self, mission_id: Uuid, key: &str, value: Value) -> bool {
        self.get_or_create(mission_id).set(key, value)
    }

    pub fn subscribe(
        &self,
        mission_id: Uuid,
        listener: impl Fn(&CellEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.get_or_create(mission_id).subscribe(listener)
    }

    /// Retire and forget a mission's cell.
    pub fn discard(&self, mission_id: Uuid) {
        if let Some((_, cell)) = self.cells.remove(&mission_id) {
            cell.retire();
            debug!(mission_id = %mission_id, "Discarded mission cell");
        }
    }

    /// Whether a cell is currently held for the mission.
    pub fn is_open(&self, mission_id: Uuid) -> bool {
        self.cells.contains_key(&mission_id)
    }

    pub fn open_count(&self) -> usize {
        self.cells.len()
    }

    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.substrate
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::substrate::MemorySubstrate;
    use serde_json::json;

    fn setup() -> (Arc<MemorySubstrate>, Arc<ManualClock>, CellManager) {
        let substrate = Arc::new(MemorySubstrate::new());
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let manager = CellManager::new(substrate.clone(), clock.clone(), Duration::hours(56));
        (substrate, clock, manager)
    }

    #[test]
    fn test_set_persists_before_notify() {
        let (substrate, _clock, manager) = setup();
        let mission = Uuid::new_v4();
        let physical = keys::physical_key(&mission, "crew:pilot");

        let observed = Arc::new(Mutex::new(None));
        let _sub = {
            let observed = observed.clone();
            let substrate = substrate.clone();
            let physical = physical.clone();
            manager.subscribe(mission, move |_event| {
                *observed.lock().unwrap() = substrate.get(&physical).unwrap();
            })
        };

        manager.set(mission, "crew:pilot", json!("Kim"));

        let raw = observed.lock().unwrap().clone().expect("persisted before notify");
        let entry: Entry = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.value, json!("Kim"));
    }

    #[test]
    fn test_hydration_drops_expired_and_skips_corrupt() {
        let (substrate, clock, _) = setup();
        let mission = Uuid::new_v4();
        let old = Entry {
            value: json!("old"),
            written_at: clock.now_millis() - Duration::hours(57).num_milliseconds(),
        };
        let fresh = Entry::new(json!("fresh"), clock.now());

        substrate
            .set(&keys::physical_key(&mission, "a"), &codec::encode(&old).unwrap())
            .unwrap();
        substrate
            .set(&keys::physical_key(&mission, "b"), &codec::encode(&fresh).unwrap())
            .unwrap();
        substrate
            .set(&keys::physical_key(&mission, "c"), "{broken")
            .unwrap();

        let cell = MissionCell::hydrate(mission, substrate.clone(), clock.clone(), Duration::hours(56));

        assert_eq!(cell.snapshot(), BTreeMap::from([("b".to_string(), json!("fresh"))]));
        // Expired entry deleted, corrupt entry left in place
        assert_eq!(substrate.get(&keys::physical_key(&mission, "a")).unwrap(), None);
        assert_eq!(
            substrate.get(&keys::physical_key(&mission, "c")).unwrap().as_deref(),
            Some("{broken")
        );
    }

    #[test]
    fn test_in_session_expiry() {
        let (substrate, clock, manager) = setup();
        let mission = Uuid::new_v4();
        manager.set(mission, "env:weather", json!({"wind": 4}));

        clock.advance(Duration::hours(56));
        assert!(manager.get_or_create(mission).get("env:weather").is_some());

        clock.advance(Duration::milliseconds(1));
        assert_eq!(manager.get_or_create(mission).get("env:weather"), None);
        assert!(substrate.list_keys(&keys::mission_prefix(&mission)).unwrap().is_empty());
    }

    #[test]
    fn test_quota_failure_keeps_memory_value() {
        let substrate = Arc::new(MemorySubstrate::with_quota(16));
        let clock = Arc::new(ManualClock::default());
        let manager = CellManager::new(substrate.clone(), clock, Duration::hours(56));
        let mission = Uuid::new_v4();

        assert!(manager.set(mission, "notes", json!("a long note that will not fit")));
        assert_eq!(
            manager.get_or_create(mission).get("notes"),
            Some(json!("a long note that will not fit"))
        );
        assert!(substrate.is_empty());
    }

    #[test]
    fn test_remove_prefix_keeps_memory_and_substrate_aligned() {
        let (substrate, _clock, manager) = setup();
        let mission = Uuid::new_v4();
        manager.set(mission, "grc:a", json!(1));
        manager.set(mission, "grc:b", json!(2));
        manager.set(mission, "other", json!(3));

        let events = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let events = events.clone();
            manager.subscribe(mission, move |e| events.lock().unwrap().push(e.clone()))
        };

        let removed = manager.get_or_create(mission).remove_prefix("grc:");
        assert_eq!(removed, vec!["grc:a".to_string(), "grc:b".to_string()]);
        assert_eq!(
            substrate.list_keys(&keys::mission_prefix(&mission)).unwrap(),
            vec![keys::physical_key(&mission, "other")]
        );
        assert_eq!(
            *events.lock().unwrap(),
            vec![CellEvent::Removed {
                keys: vec!["grc:a".to_string(), "grc:b".to_string()]
            }]
        );
    }

    #[test]
    fn test_retired_cell_drops_writes() {
        let (substrate, _clock, manager) = setup();
        let mission = Uuid::new_v4();
        let stale = manager.get_or_create(mission);

        manager.discard(mission);
        assert!(!stale.set("crew:pilot", json!("late")));
        assert!(stale.is_retired());
        assert!(substrate.is_empty());
        assert!(!manager.is_open(mission));
    }

    #[test]
    fn test_same_cell_returned() {
        let (_substrate, _clock, manager) = setup();
        let mission = Uuid::new_v4();
        let a = manager.get_or_create(mission);
        let b = manager.get_or_create(mission);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.open_count(), 1);
    }
}
