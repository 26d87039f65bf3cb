//! The [`MissionStore`] facade.
//!
//! Wires substrate, cells, accessor, invalidator, lifecycle manager and
//! broadcast registry together behind one handle, and adds the operations
//! that need more than one of them (namespace-class routing, segment write
//! guards, location-driven invalidation).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accessor::{FieldAccessor, SegmentScope};
use crate::broadcast::{BroadcastRegistry, Subscription};
use crate::cell::{CellEvent, CellManager};
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::invalidate::{PrefixInvalidator, ENVIRONMENT_PREFIX, RISK_CLASSIFICATION_PREFIXES};
use crate::lifecycle::MissionManager;
use crate::location::{ManualLocation, ManualLocationStore};
use crate::migration::{LegacyMigration, MigrationOutcome};
use crate::report::{self, MissionReport};
use crate::substrate::{MemorySubstrate, SqliteSubstrate, Substrate};

/// Housekeeping done by [`MissionStore::open`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenReport {
    pub migration: Option<MigrationOutcome>,
    pub purged: Vec<Uuid>,
}

/// Mission state store.
pub struct MissionStore {
    config: StoreConfig,
    substrate: Arc<dyn Substrate>,
    clock: Arc<dyn Clock>,
    cells: Arc<CellManager>,
    fields: FieldAccessor,
    invalidator: PrefixInvalidator,
    locations: ManualLocationStore,
    broadcasts: Arc<BroadcastRegistry>,
    missions: MissionManager,
}

impl MissionStore {
    /// Build a store without any startup housekeeping.
    pub fn new(substrate: Arc<dyn Substrate>, clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Using default TTL in place of invalid setting");
        }
        let ttl = config.field_ttl();
        let cells = Arc::new(CellManager::new(
            Arc::clone(&substrate),
            Arc::clone(&clock),
            ttl,
        ));
        let locations = ManualLocationStore::new(Arc::clone(&substrate), Arc::clone(&clock), ttl);
        let broadcasts = Arc::new(BroadcastRegistry::new());
        let missions = MissionManager::new(
            Arc::clone(&cells),
            locations.clone(),
            Arc::clone(&broadcasts),
            &config,
        );

        Self {
            fields: FieldAccessor::new(Arc::clone(&cells)),
            invalidator: PrefixInvalidator::new(Arc::clone(&cells)),
            config,
            substrate,
            clock,
            cells,
            locations,
            broadcasts,
            missions,
        }
    }

    /// Build a store and run the startup steps the config asks for:
    /// legacy migration, then expired-mission purge.
    pub fn open(
        substrate: Arc<dyn Substrate>,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
    ) -> (Self, OpenReport) {
        let store = Self::new(substrate, clock, config);
        let mut report = OpenReport::default();

        if store.config.migrate_on_open {
            report.migration = Some(store.migrate_legacy());
        }
        if store.config.purge_expired_on_open {
            report.purged = store.missions.purge_expired();
        }

        info!(
            missions = store.missions.list().len(),
            purged = report.purged.len(),
            "Mission store opened"
        );
        (store, report)
    }

    /// In-memory store on the system clock, honouring `quota_bytes`.
    pub fn in_memory(config: StoreConfig) -> Self {
        let substrate = match config.quota_bytes {
            Some(quota) => MemorySubstrate::with_quota(quota),
            None => MemorySubstrate::new(),
        };
        Self::open(Arc::new(substrate), Arc::new(SystemClock), config).0
    }

    /// SQLite-backed store at `config.database_path`.
    pub fn open_sqlite(config: StoreConfig) -> StoreResult<(Self, OpenReport)> {
        let path = config
            .database_path
            .clone()
            .ok_or_else(|| StoreError::Config("database_path is not set".to_string()))?;
        let substrate = SqliteSubstrate::open(&path)?;
        Ok(Self::open(Arc::new(substrate), Arc::new(SystemClock), config))
    }

    // =========================================================================
    // Components
    // =========================================================================

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.substrate
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn cells(&self) -> &Arc<CellManager> {
        &self.cells
    }

    pub fn fields(&self) -> &FieldAccessor {
        &self.fields
    }

    pub fn missions(&self) -> &MissionManager {
        &self.missions
    }

    pub fn locations(&self) -> &ManualLocationStore {
        &self.locations
    }

    pub fn broadcasts(&self) -> &Arc<BroadcastRegistry> {
        &self.broadcasts
    }

    // =========================================================================
    // Fields
    // =========================================================================

    /// Read a logical key as-is. `fallback` if the mission is gone, the key
    /// is absent, or the stored value is not a `T`.
    pub fn read<T: DeserializeOwned>(&self, mission_id: Uuid, key: &str, fallback: T) -> T {
        if !self.missions.contains(mission_id) {
            return fallback;
        }
        self.fields.read(mission_id, key, fallback)
    }

    pub fn read_value(&self, mission_id: Uuid, key: &str) -> Option<Value> {
        if !self.missions.contains(mission_id) {
            return None;
        }
        self.fields.read_value(mission_id, key)
    }

    /// Write a logical key as-is. `false` if the mission is gone.
    pub fn write<T: Serialize + ?Sized>(&self, mission_id: Uuid, key: &str, value: &T) -> bool {
        if !self.missions.contains(mission_id) {
            debug!(mission_id = %mission_id, key = %key, "Write to unknown mission dropped");
            return false;
        }
        self.fields.write(mission_id, key, value)
    }

    /// Read a form field, routed by namespace class. Location-bound keys
    /// resolve in the current segment.
    pub fn read_field<T: DeserializeOwned>(&self, mission_id: Uuid, key: &str, fallback: T) -> T {
        if !self.config.is_location_bound(key) {
            return self.read(mission_id, key, fallback);
        }
        match self.missions.readable_scope(mission_id) {
            Some(scope) => self.fields.read_scoped(mission_id, scope, key, fallback),
            None => fallback,
        }
    }

    /// Write a form field, routed by namespace class. Location-bound keys
    /// land in the active segment; they are refused once the mission is
    /// completed.
    pub fn write_field<T: Serialize + ?Sized>(&self, mission_id: Uuid, key: &str, value: &T) -> bool {
        if !self.config.is_location_bound(key) {
            return self.write(mission_id, key, value);
        }
        match self.missions.writable_scope(mission_id) {
            Some(scope) => self.fields.write_scoped(mission_id, scope, key, value),
            None => {
                debug!(mission_id = %mission_id, key = %key, "No writable segment");
                false
            }
        }
    }

    /// Read a key as seen from a specific segment, with first-segment
    /// legacy fallback.
    pub fn read_in_segment<T: DeserializeOwned>(
        &self,
        mission_id: Uuid,
        segment_id: Uuid,
        key: &str,
        fallback: T,
    ) -> T {
        match self.missions.segment_scope(mission_id, segment_id) {
            Some(scope) => self.fields.read_scoped(mission_id, scope, key, fallback),
            None => fallback,
        }
    }

    /// Write into a specific segment. Completed segments are read-only.
    pub fn write_in_segment<T: Serialize + ?Sized>(
        &self,
        mission_id: Uuid,
        segment_id: Uuid,
        key: &str,
        value: &T,
    ) -> bool {
        if !self.missions.is_segment_writable(mission_id, segment_id) {
            debug!(
                mission_id = %mission_id,
                segment_id = %segment_id,
                key = %key,
                "Write to closed segment dropped"
            );
            return false;
        }
        let scope = SegmentScope::Segment {
            id: segment_id,
            legacy_fallback: false,
        };
        self.fields.write_scoped(mission_id, scope, key, value)
    }

    /// Current fields of a mission (logical keys). Empty for unknown missions.
    pub fn snapshot(&self, mission_id: Uuid) -> BTreeMap<String, Value> {
        if !self.missions.contains(mission_id) {
            return BTreeMap::new();
        }
        self.cells.get(mission_id)
    }

    /// Observe field changes of a mission. `None` for unknown missions.
    pub fn subscribe(
        &self,
        mission_id: Uuid,
        listener: impl Fn(&CellEvent) + Send + Sync + 'static,
    ) -> Option<Subscription> {
        if !self.missions.contains(mission_id) {
            return None;
        }
        Some(self.cells.subscribe(mission_id, listener))
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    pub fn clear_by_prefix(&self, mission_id: Uuid, logical_prefix: &str) -> usize {
        if !self.missions.contains(mission_id) {
            return 0;
        }
        self.invalidator.clear_by_prefix(mission_id, logical_prefix)
    }

    /// Clear `prefix` in the segment being edited, and in the unscoped
    /// namespace too when that segment falls back to it.
    fn clear_in_scope(&self, mission_id: Uuid, scope: SegmentScope, prefix: &str) -> usize {
        let mut cleared = self.invalidator.clear_by_prefix(mission_id, &scope.key(prefix));
        if let SegmentScope::Segment {
            legacy_fallback: true,
            ..
        } = scope
        {
            cleared += self.invalidator.clear_by_prefix(mission_id, prefix);
        }
        cleared
    }

    /// Reset the SORA ground and air risk inputs of the current segment.
    pub fn reset_risk_classification(&self, mission_id: Uuid) -> usize {
        let Some(scope) = self.missions.writable_scope(mission_id) else {
            return 0;
        };
        let cleared: usize = RISK_CLASSIFICATION_PREFIXES
            .iter()
            .map(|prefix| self.clear_in_scope(mission_id, scope, prefix))
            .sum();
        info!(mission_id = %mission_id, cleared, "Risk classification reset");
        cleared
    }

    /// Drop cached environment payloads (weather, POIs, geocode) of the
    /// current segment.
    pub fn invalidate_environment(&self, mission_id: Uuid) -> usize {
        match self.missions.writable_scope(mission_id) {
            Some(scope) => self.clear_in_scope(mission_id, scope, ENVIRONMENT_PREFIX),
            None => 0,
        }
    }

    // =========================================================================
    // Manual location
    // =========================================================================

    /// Pin the current segment's location by hand. The segment's
    /// environment cache no longer matches and is invalidated.
    pub fn set_manual_location(&self, mission_id: Uuid, location: &ManualLocation) -> bool {
        let Some(scope) = self.missions.writable_scope(mission_id) else {
            return false;
        };
        let stored = self.locations.set(mission_id, scope.segment_id(), location);
        self.clear_in_scope(mission_id, scope, ENVIRONMENT_PREFIX);
        stored
    }

    /// Manual location of the current segment.
    pub fn manual_location(&self, mission_id: Uuid) -> Option<ManualLocation> {
        let scope = self.missions.readable_scope(mission_id)?;
        self.locations.resolve(mission_id, scope)
    }

    pub fn manual_location_in(&self, mission_id: Uuid, segment_id: Uuid) -> Option<ManualLocation> {
        let scope = self.missions.segment_scope(mission_id, segment_id)?;
        self.locations.resolve(mission_id, scope)
    }

    /// Remove the current segment's pin (back to GPS).
    pub fn clear_manual_location(&self, mission_id: Uuid) -> bool {
        let Some(scope) = self.missions.writable_scope(mission_id) else {
            return false;
        };
        self.locations.clear(mission_id, scope.segment_id());
        self.clear_in_scope(mission_id, scope, ENVIRONMENT_PREFIX);
        true
    }

    // =========================================================================
    // Maintenance and reporting
    // =========================================================================

    pub fn migrate_legacy(&self) -> MigrationOutcome {
        LegacyMigration::new(Arc::clone(&self.substrate), &self.missions).run()
    }

    pub fn report(&self, mission_id: Uuid) -> Option<MissionReport> {
        report::collect(self, mission_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn store() -> MissionStore {
        MissionStore::new(
            Arc::new(MemorySubstrate::new()),
            Arc::new(ManualClock::default()),
            StoreConfig::default(),
        )
    }

    #[test]
    fn test_field_routing_by_namespace() {
        let store = store();
        let mission = store.missions().create("Routing");
        let first = mission.segments[0].id;

        store.write_field(mission.id, "crew:pilot", "Kim");
        store.write_field(mission.id, "sora:sail", "II");

        let snapshot = store.snapshot(mission.id);
        assert!(snapshot.contains_key("crew:pilot"));
        assert!(snapshot.contains_key(&format!("seg:{}:sora:sail", first)));
        assert_eq!(store.read_field(mission.id, "sora:sail", String::new()), "II");
    }

    #[test]
    fn test_unknown_mission_is_noop() {
        let store = store();
        let ghost = Uuid::new_v4();

        assert!(!store.write(ghost, "crew:pilot", "Kim"));
        assert_eq!(store.read(ghost, "crew:pilot", String::new()), "");
        assert!(store.subscribe(ghost, |_| {}).is_none());
        assert_eq!(store.clear_by_prefix(ghost, "crew:"), 0);
        assert!(store.report(ghost).is_none());
        assert_eq!(store.cells().open_count(), 0);
    }

    #[test]
    fn test_completed_segment_is_read_only() {
        let store = store();
        let mission = store.missions().create("Guard");
        let first = mission.segments[0].id;
        store.write_in_segment(mission.id, first, "env:weather", &json!({"wind": 3}));

        let second = store.missions().relocate(mission.id, "B", None).unwrap();

        assert!(!store.write_in_segment(mission.id, first, "env:weather", &json!({"wind": 9})));
        assert_eq!(
            store.read_in_segment(mission.id, first, "env:weather", Value::Null),
            json!({"wind": 3})
        );
        assert!(store.write_in_segment(mission.id, second.id, "env:weather", &json!({"wind": 5})));
    }

    #[test]
    fn test_risk_reset_covers_legacy_keys_of_first_segment() {
        let store = store();
        let mission = store.missions().create("Risk");
        store.write(mission.id, "grc:areaType", "rural");
        store.write_field(mission.id, "arc:airspace", "G");
        store.write_field(mission.id, "crew:pilot", "Kim");

        assert_eq!(store.reset_risk_classification(mission.id), 2);
        assert_eq!(store.read_field(mission.id, "grc:areaType", String::new()), "");
        assert_eq!(store.read_field(mission.id, "arc:airspace", String::new()), "");
        assert_eq!(store.read_field(mission.id, "crew:pilot", String::new()), "Kim");
    }

    #[test]
    fn test_manual_location_invalidates_environment() {
        let store = store();
        let mission = store.missions().create("Pin");
        store.write_field(mission.id, "env:weather", &json!({"wind": 3}));

        let pin = ManualLocation {
            latitude: 47.0,
            longitude: 8.0,
            name: None,
        };
        assert!(store.set_manual_location(mission.id, &pin));
        assert_eq!(store.manual_location(mission.id), Some(pin));
        assert_eq!(store.read_field(mission.id, "env:weather", Value::Null), Value::Null);

        assert!(store.clear_manual_location(mission.id));
        assert_eq!(store.manual_location(mission.id), None);
    }

    #[test]
    fn test_open_runs_housekeeping() {
        let substrate = Arc::new(MemorySubstrate::new());
        substrate.set("form:crew:pilot", r#"{"value":"Kim","timestamp":0}"#).unwrap();

        let (_store, report) = MissionStore::open(
            substrate.clone(),
            Arc::new(ManualClock::default()),
            StoreConfig::default(),
        );
        assert!(matches!(
            report.migration,
            Some(MigrationOutcome::Migrated { keys_moved: 1, .. })
        ));
    }

    #[test]
    fn test_open_sqlite_requires_path() {
        assert!(matches!(
            MissionStore::open_sqlite(StoreConfig::default()),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_out_of_range_ttl_uses_default() {
        let store = MissionStore::in_memory(StoreConfig {
            field_ttl_hours: i64::MAX,
            ..Default::default()
        });
        let mission = store.missions().create("Bad config");
        assert!(store.write_field(mission.id, "crew:pilot", "Kim"));
        assert_eq!(store.read_field(mission.id, "crew:pilot", String::new()), "Kim");
    }
}
