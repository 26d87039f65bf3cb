//! Mission and segment lifecycle.
//!
//! The [`MissionManager`] owns the mission catalog: one substrate key holding
//! the JSON array of every [`Mission`]. It is the only component that
//! decides which segment is active and which phase a mission is in.
//!
//! ```text
//! phase:    einsatzdaten -> vorflugkontrolle -> fluege -> nachbereitung
//! segment:  active -> completed            (never back)
//! ```
//!
//! Every mutation persists the catalog first and then notifies the catalog
//! broadcast (and the mission's segment broadcast where segments changed).
//! Operations addressed to a missing or expired mission are no-ops that
//! return `None`/`false`.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accessor::SegmentScope;
use crate::broadcast::{BroadcastRegistry, Subscription};
use crate::cell::CellManager;
use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::invalidate::PrefixInvalidator;
use crate::keys::{self, FormKey};
use crate::location::ManualLocationStore;
use crate::mission::{first_segment_label, Mission, MissionPhase, Segment, SegmentStatus};
use crate::substrate::Substrate;

/// Catalog lifetime windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionTtl {
    /// From creation, while the mission is open
    pub active: Duration,
    /// From completion
    pub completed: Duration,
}

impl MissionTtl {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            active: config.active_mission_ttl(),
            completed: config.completed_mission_ttl(),
        }
    }

    pub fn expires_at(&self, mission: &Mission) -> Option<DateTime<Utc>> {
        mission.expires_at(self.active, self.completed)
    }

    pub fn is_expired(&self, mission: &Mission, now: DateTime<Utc>) -> bool {
        mission.is_expired(now, self.active, self.completed)
    }
}

/// Owner of the mission catalog and the segment state machine.
pub struct MissionManager {
    substrate: Arc<dyn Substrate>,
    clock: Arc<dyn Clock>,
    cells: Arc<CellManager>,
    invalidator: PrefixInvalidator,
    locations: ManualLocationStore,
    broadcasts: Arc<BroadcastRegistry>,
    ttl: MissionTtl,
    location_namespaces: Vec<String>,
    /// Lazily loaded catalog; `None` until first access
    catalog: Mutex<Option<Vec<Mission>>>,
}

impl MissionManager {
    pub fn new(
        cells: Arc<CellManager>,
        locations: ManualLocationStore,
        broadcasts: Arc<BroadcastRegistry>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            substrate: Arc::clone(cells.substrate()),
            clock: Arc::clone(cells.clock()),
            invalidator: PrefixInvalidator::new(Arc::clone(&cells)),
            cells,
            locations,
            broadcasts,
            ttl: MissionTtl::from_config(config),
            location_namespaces: config.location_namespaces.clone(),
            catalog: Mutex::new(None),
        }
    }

    // =========================================================================
    // Catalog persistence
    // =========================================================================

    /// Parse the persisted catalog, skipping records that no longer parse.
    fn load_catalog(&self) -> Vec<Mission> {
        let raw = match self.substrate.get(keys::CATALOG_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Mission catalog unreadable, starting empty");
                return Vec::new();
            }
        };

        let records: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Mission catalog corrupt, starting empty");
                return Vec::new();
            }
        };

        records
            .into_iter()
            .filter_map(|record| match serde_json::from_value::<Mission>(record) {
                Ok(mission) if self.ttl.expires_at(&mission).is_none() => {
                    warn!(mission_id = %mission.id, "Skipping mission record with out-of-range dates");
                    None
                }
                Ok(mission) => Some(mission),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable mission record");
                    None
                }
            })
            .collect()
    }

    fn persist_catalog(&self, catalog: &[Mission]) {
        let result = serde_json::to_string(catalog)
            .map_err(Into::into)
            .and_then(|raw| self.substrate.set(keys::CATALOG_KEY, &raw));
        if let Err(e) = result {
            warn!(error = %e, "Mission catalog write not durable");
        }
    }

    fn read<R>(&self, f: impl FnOnce(&[Mission]) -> R) -> R {
        let mut guard = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        let catalog = guard.get_or_insert_with(|| self.load_catalog());
        f(catalog)
    }

    /// Run a read-modify-write on the catalog under the lock. The catalog is
    /// persisted when `f` returns `Some`.
    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Mission>) -> Option<R>) -> Option<R> {
        let mut guard = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        let catalog = guard.get_or_insert_with(|| self.load_catalog());
        let result = f(catalog);
        if result.is_some() {
            self.persist_catalog(catalog);
        }
        result
    }

    fn live(&self) -> impl Fn(&Mission) -> bool {
        let now = self.clock.now();
        let ttl = self.ttl;
        move |mission| !ttl.is_expired(mission, now)
    }

    // =========================================================================
    // Missions
    // =========================================================================

    /// Create a mission with its first segment active.
    pub fn create(&self, label: impl Into<String>) -> Mission {
        self.insert(Mission::new(label, self.clock.now()))
    }

    /// Create a mission without segments (used when adopting legacy data).
    pub fn create_unsegmented(&self, label: impl Into<String>) -> Mission {
        self.insert(Mission::unsegmented(label, self.clock.now()))
    }

    fn insert(&self, mission: Mission) -> Mission {
        let created = mission.clone();
        self.mutate(move |catalog| {
            catalog.push(mission);
            Some(())
        });

        info!(mission_id = %created.id, label = %created.label, "Created mission");
        self.broadcasts.notify_catalog();
        created
    }

    /// A live (non-expired) mission.
    pub fn get(&self, mission_id: Uuid) -> Option<Mission> {
        let live = self.live();
        self.read(|catalog| {
            catalog
                .iter()
                .find(|m| m.id == mission_id && live(m))
                .cloned()
        })
    }

    pub fn contains(&self, mission_id: Uuid) -> bool {
        self.get(mission_id).is_some()
    }

    /// Live missions, newest first.
    pub fn list(&self) -> Vec<Mission> {
        let live = self.live();
        let mut missions: Vec<Mission> =
            self.read(|catalog| catalog.iter().filter(|m| live(m)).cloned().collect());
        missions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        missions
    }

    /// Apply `f` to a live mission and broadcast the catalog change.
    fn update(&self, mission_id: Uuid, f: impl FnOnce(&mut Mission)) -> Option<Mission> {
        let live = self.live();
        let updated = self.mutate(|catalog| {
            let mission = catalog
                .iter_mut()
                .find(|m| m.id == mission_id && live(m))?;
            f(mission);
            Some(mission.clone())
        })?;

        self.broadcasts.notify_catalog();
        Some(updated)
    }

    pub fn rename(&self, mission_id: Uuid, label: impl Into<String>) -> Option<Mission> {
        let label = label.into();
        self.update(mission_id, |mission| mission.label = label)
    }

    /// Set the phase directly (the UI may navigate back).
    pub fn set_phase(&self, mission_id: Uuid, phase: MissionPhase) -> Option<Mission> {
        let updated = self.update(mission_id, |mission| mission.phase = phase)?;
        debug!(mission_id = %mission_id, phase = %phase, "Mission phase set");
        Some(updated)
    }

    /// Move to the next phase; stays put on the last one.
    pub fn advance_phase(&self, mission_id: Uuid) -> Option<Mission> {
        self.update(mission_id, |mission| {
            if let Some(next) = mission.phase.next() {
                mission.phase = next;
            }
        })
    }

    /// Complete a mission: stamps `completedAt` (starting the shorter expiry
    /// window) and closes the active segment. Completing twice keeps the
    /// first timestamp.
    pub fn complete(&self, mission_id: Uuid) -> Option<Mission> {
        let now = self.clock.now();
        let live = self.live();
        let (mission, changed) = self.mutate(|catalog| {
            let mission = catalog
                .iter_mut()
                .find(|m| m.id == mission_id && live(m))?;
            if mission.is_completed() {
                return Some((mission.clone(), false));
            }

            mission.completed_at = Some(now);
            for segment in mission.segments.iter_mut().filter(|s| s.is_active()) {
                segment.status = SegmentStatus::Completed;
            }
            mission.active_segment_id = None;
            Some((mission.clone(), true))
        })?;

        if changed {
            info!(mission_id = %mission_id, "Mission completed");
            self.broadcasts.notify_segments(mission_id);
            self.broadcasts.notify_catalog();
        }
        Some(mission)
    }

    // =========================================================================
    // Segments
    // =========================================================================

    /// Start a new segment at a new location.
    ///
    /// The active segment is completed, a fresh one is appended and made
    /// active, and the location-bound namespaces are reset for it. Crew,
    /// drone and equipment fields are mission-wide and carry over untouched.
    pub fn relocate(
        &self,
        mission_id: Uuid,
        label: impl Into<String>,
        location_name: Option<String>,
    ) -> Option<Segment> {
        let now = self.clock.now();
        let live = self.live();
        let label = label.into();

        let segment = self.mutate(|catalog| {
            let mission = catalog
                .iter_mut()
                .find(|m| m.id == mission_id && live(m))?;
            if mission.is_completed() {
                warn!(mission_id = %mission_id, "Cannot relocate a completed mission");
                return None;
            }

            if mission.segments.is_empty() {
                // Mission predates segments: its unscoped data becomes the
                // first segment's legacy fallback
                let mut legacy = Segment::new(first_segment_label(), mission.created_at);
                legacy.status = SegmentStatus::Completed;
                mission.segments.push(legacy);
            }

            for previous in mission.segments.iter_mut().filter(|s| s.is_active()) {
                previous.status = SegmentStatus::Completed;
            }

            let segment = Segment::new(label, now).with_location(location_name);
            mission.active_segment_id = Some(segment.id);
            mission.segments.push(segment.clone());
            Some(segment)
        })?;

        let prefixes: Vec<String> = self
            .location_namespaces
            .iter()
            .map(|ns| keys::segment_key(&segment.id, ns))
            .collect();
        for prefix in &prefixes {
            self.invalidator.clear_by_prefix(mission_id, prefix);
        }

        info!(
            mission_id = %mission_id,
            segment_id = %segment.id,
            label = %segment.label,
            "Mission relocated"
        );
        self.broadcasts.notify_segments(mission_id);
        self.broadcasts.notify_catalog();
        Some(segment)
    }

    /// Rename the place of an active segment. Completed segments are frozen.
    pub fn set_segment_location(
        &self,
        mission_id: Uuid,
        segment_id: Uuid,
        location_name: Option<String>,
    ) -> Option<Segment> {
        let live = self.live();
        let segment = self.mutate(|catalog| {
            let mission = catalog
                .iter_mut()
                .find(|m| m.id == mission_id && live(m))?;
            let segment = mission
                .segments
                .iter_mut()
                .find(|s| s.id == segment_id && s.is_active())?;
            segment.location_name = location_name;
            Some(segment.clone())
        })?;

        self.broadcasts.notify_segments(mission_id);
        self.broadcasts.notify_catalog();
        Some(segment)
    }

    pub fn segments(&self, mission_id: Uuid) -> Vec<Segment> {
        self.get(mission_id)
            .map(|mission| mission.segments)
            .unwrap_or_default()
    }

    pub fn active_segment(&self, mission_id: Uuid) -> Option<Segment> {
        self.get(mission_id)?.active_segment().cloned()
    }

    pub fn first_segment(&self, mission_id: Uuid) -> Option<Segment> {
        self.get(mission_id)?.first_segment().cloned()
    }

    /// Resolution scope for reading a particular segment.
    pub fn segment_scope(&self, mission_id: Uuid, segment_id: Uuid) -> Option<SegmentScope> {
        let mission = self.get(mission_id)?;
        let segment = mission.segment(segment_id)?;
        Some(scope_for(&mission, segment))
    }

    /// Scope form reads use: the active segment, else the last one, else
    /// unscoped for missions without segments.
    pub fn readable_scope(&self, mission_id: Uuid) -> Option<SegmentScope> {
        let mission = self.get(mission_id)?;
        let segment = match mission.active_segment().or(mission.segments.last()) {
            Some(segment) => segment,
            None => return Some(SegmentScope::Unscoped),
        };
        Some(scope_for(&mission, segment))
    }

    /// Scope form writes use. `None` once the mission is completed.
    pub fn writable_scope(&self, mission_id: Uuid) -> Option<SegmentScope> {
        let mission = self.get(mission_id)?;
        if mission.is_completed() {
            return None;
        }
        if mission.segments.is_empty() {
            return Some(SegmentScope::Unscoped);
        }
        let segment = mission.active_segment()?;
        Some(scope_for(&mission, segment))
    }

    /// Whether writes into `segment_id` are accepted.
    pub fn is_segment_writable(&self, mission_id: Uuid, segment_id: Uuid) -> bool {
        self.get(mission_id)
            .map(|mission| {
                !mission.is_completed()
                    && mission.segment(segment_id).map(Segment::is_active).unwrap_or(false)
            })
            .unwrap_or(false)
    }

    // =========================================================================
    // Expiry and purge
    // =========================================================================

    /// Remove a mission completely: catalog entry, every field, manual
    /// locations, the in-memory cell and its segment broadcast.
    ///
    /// Safe to call repeatedly; returns whether a catalog entry was removed.
    pub fn purge(&self, mission_id: Uuid) -> bool {
        let removed = self
            .mutate(|catalog| {
                let idx = catalog.iter().position(|m| m.id == mission_id)?;
                Some(catalog.remove(idx))
            })
            .is_some();

        // Retire the cell first so a stale handle cannot write keys back
        self.cells.discard(mission_id);

        let fields = self
            .substrate
            .delete_by_prefix(&keys::mission_prefix(&mission_id))
            .unwrap_or_else(|e| {
                warn!(mission_id = %mission_id, error = %e, "Failed to delete mission fields");
                0
            });
        self.locations.purge_mission(mission_id);

        self.broadcasts.notify_segments(mission_id);
        self.broadcasts.remove_segments(mission_id);

        if removed {
            info!(mission_id = %mission_id, fields, "Purged mission");
            self.broadcasts.notify_catalog();
        } else {
            debug!(mission_id = %mission_id, fields, "Purge of unknown mission");
        }
        removed
    }

    /// Purge every mission whose lifetime has ended. Returns the purged ids.
    pub fn purge_expired(&self) -> Vec<Uuid> {
        let now = self.clock.now();
        let ttl = self.ttl;
        let expired: Vec<Uuid> = self.read(|catalog| {
            catalog
                .iter()
                .filter(|m| ttl.is_expired(m, now))
                .map(|m| m.id)
                .collect()
        });

        for mission_id in &expired {
            self.purge(*mission_id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Purged expired missions");
        }
        expired
    }

    /// Delete field keys of missions that are not in the catalog (left
    /// behind when a catalog write was not durable). Missions with an open
    /// cell are never touched. Returns the number of missions swept.
    pub fn purge_orphaned_fields(&self) -> usize {
        let known: Vec<Uuid> = self.read(|catalog| catalog.iter().map(|m| m.id).collect());

        let physical_keys = match self.substrate.list_keys(keys::FORM_PREFIX) {
            Ok(physical_keys) => physical_keys,
            Err(e) => {
                warn!(error = %e, "Orphan scan failed");
                return 0;
            }
        };

        let mut orphans: Vec<Uuid> = physical_keys
            .iter()
            .filter_map(|key| match keys::parse_form_key(key) {
                Some(FormKey::Mission { mission_id, .. }) => Some(mission_id),
                _ => None,
            })
            .filter(|id| !known.contains(id) && !self.cells.is_open(*id))
            .collect();
        orphans.sort();
        orphans.dedup();

        for mission_id in &orphans {
            if let Err(e) = self
                .substrate
                .delete_by_prefix(&keys::mission_prefix(mission_id))
            {
                warn!(mission_id = %mission_id, error = %e, "Failed to delete orphaned fields");
            }
        }
        if !orphans.is_empty() {
            info!(count = orphans.len(), "Removed orphaned mission fields");
        }
        orphans.len()
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn subscribe_catalog(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.broadcasts.catalog().subscribe(listener)
    }

    pub fn subscribe_segments(
        &self,
        mission_id: Uuid,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.broadcasts.segments(mission_id).subscribe(listener)
    }

    pub fn ttl(&self) -> MissionTtl {
        self.ttl
    }
}

fn scope_for(mission: &Mission, segment: &Segment) -> SegmentScope {
    SegmentScope::Segment {
        id: segment.id,
        legacy_fallback: mission.is_first_segment(segment.id),
    }
}
