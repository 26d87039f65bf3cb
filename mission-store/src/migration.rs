//! One-time adoption of pre-mission data.
//!
//! Before missions existed every form wrote `form:<logicalKey>` directly.
//! On first start with this store those keys are moved under a freshly
//! created mission so they stay visible. The run is recorded under
//! [`keys::MIGRATION_FLAG_KEY`]; later runs return immediately.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::keys::{self, FormKey};
use crate::lifecycle::MissionManager;
use crate::substrate::Substrate;

/// Label given to the mission that adopts legacy data.
pub const MIGRATED_MISSION_LABEL: &str = "Migrated mission";

/// What a migration run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum MigrationOutcome {
    /// The flag was already set
    AlreadyMigrated,
    /// No legacy keys were found; the flag is now set
    NothingToMigrate,
    #[serde(rename_all = "camelCase")]
    Migrated { mission_id: Uuid, keys_moved: usize },
}

/// Moves legacy `form:` keys under a new mission.
pub struct LegacyMigration<'a> {
    substrate: Arc<dyn Substrate>,
    missions: &'a MissionManager,
}

impl<'a> LegacyMigration<'a> {
    pub fn new(substrate: Arc<dyn Substrate>, missions: &'a MissionManager) -> Self {
        Self {
            substrate,
            missions,
        }
    }

    pub fn is_migrated(&self) -> bool {
        matches!(self.substrate.get(keys::MIGRATION_FLAG_KEY), Ok(Some(_)))
    }

    pub fn run(&self) -> MigrationOutcome {
        if self.is_migrated() {
            return MigrationOutcome::AlreadyMigrated;
        }

        let legacy_fields = self.legacy_field_keys();
        let legacy_location = self
            .substrate
            .get(keys::MANUAL_LOCATION_KEY)
            .ok()
            .flatten();

        if legacy_fields.is_empty() && legacy_location.is_none() {
            self.mark_migrated();
            info!("No legacy data to migrate");
            return MigrationOutcome::NothingToMigrate;
        }

        let mission = self.missions.create_unsegmented(MIGRATED_MISSION_LABEL);
        let mut keys_moved = 0;

        for (physical, logical) in &legacy_fields {
            let target = keys::physical_key(&mission.id, logical);
            if self.move_raw(physical, &target) {
                keys_moved += 1;
            }
        }

        if legacy_location.is_some() {
            let target = keys::manual_location_key(&mission.id, None);
            if self.move_raw(keys::MANUAL_LOCATION_KEY, &target) {
                keys_moved += 1;
            }
        }

        self.mark_migrated();
        info!(mission_id = %mission.id, keys_moved, "Migrated legacy data");
        MigrationOutcome::Migrated {
            mission_id: mission.id,
            keys_moved,
        }
    }

    /// `(physical, logical)` pairs of legacy field keys.
    fn legacy_field_keys(&self) -> Vec<(String, String)> {
        let physical_keys = match self.substrate.list_keys(keys::FORM_PREFIX) {
            Ok(physical_keys) => physical_keys,
            Err(e) => {
                warn!(error = %e, "Legacy key scan failed");
                return Vec::new();
            }
        };

        physical_keys
            .iter()
            .filter_map(|physical| match keys::parse_form_key(physical)? {
                FormKey::Legacy { logical_key } => {
                    Some((physical.clone(), logical_key.to_string()))
                }
                FormKey::Mission { .. } => None,
            })
            .collect()
    }

    /// Copy the raw entry (keeping its original timestamp) and delete the
    /// source. The source stays if the copy fails.
    fn move_raw(&self, from: &str, to: &str) -> bool {
        let raw = match self.substrate.get(from) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                warn!(key = %from, error = %e, "Legacy key unreadable");
                return false;
            }
        };

        if let Err(e) = self.substrate.set(to, &raw) {
            warn!(from = %from, to = %to, error = %e, "Legacy key not moved");
            return false;
        }
        if let Err(e) = self.substrate.remove(from) {
            warn!(key = %from, error = %e, "Legacy key copied but not removed");
        }
        true
    }

    fn mark_migrated(&self) {
        if let Err(e) = self.substrate.set(keys::MIGRATION_FLAG_KEY, "true") {
            warn!(error = %e, "Migration flag not stored");
        }
    }
}
