//! Manual location overrides.
//!
//! When the operator pins the site by hand instead of using GPS, the pin is
//! kept outside the field namespace under
//! `manual-location:<missionId>[:seg:<segmentId>]`, encoded with the same
//! entry codec and TTL as fields.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::accessor::SegmentScope;
use crate::clock::Clock;
use crate::codec::{self, Decoded, Entry};
use crate::keys;
use crate::substrate::Substrate;

/// Operator-pinned site position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Reads and writes manual location entries.
#[derive(Clone)]
pub struct ManualLocationStore {
    substrate: Arc<dyn Substrate>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ManualLocationStore {
    pub fn new(substrate: Arc<dyn Substrate>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            substrate,
            clock,
            ttl,
        }
    }

    /// Location stored at exactly this mission/segment key.
    pub fn get(&self, mission_id: Uuid, segment_id: Option<Uuid>) -> Option<ManualLocation> {
        let key = keys::manual_location_key(&mission_id, segment_id.as_ref());
        let raw = self.substrate.get(&key).ok().flatten()?;

        match codec::decode(&raw, self.clock.now(), self.ttl) {
            Decoded::Fresh(entry) => serde_json::from_value(entry.value).ok(),
            Decoded::Expired => {
                if let Err(e) = self.substrate.remove(&key) {
                    warn!(key = %key, error = %e, "Failed to delete expired manual location");
                }
                None
            }
            Decoded::Corrupt => None,
        }
    }

    /// Location for a segment scope, with the same first-segment fallback
    /// to the mission-level key as field reads.
    pub fn resolve(&self, mission_id: Uuid, scope: SegmentScope) -> Option<ManualLocation> {
        match scope {
            SegmentScope::Unscoped => self.get(mission_id, None),
            SegmentScope::Segment {
                id,
                legacy_fallback,
            } => self.get(mission_id, Some(id)).or_else(|| {
                if legacy_fallback {
                    self.get(mission_id, None)
                } else {
                    None
                }
            }),
        }
    }

    /// Store a location. Returns `false` if it could not be persisted.
    pub fn set(&self, mission_id: Uuid, segment_id: Option<Uuid>, location: &ManualLocation) -> bool {
        let key = keys::manual_location_key(&mission_id, segment_id.as_ref());
        let persisted = serde_json::to_value(location)
            .map_err(Into::into)
            .and_then(|value| codec::encode(&Entry::new(value, self.clock.now())))
            .and_then(|raw| self.substrate.set(&key, &raw));

        match persisted {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Manual location not stored");
                false
            }
        }
    }

    pub fn clear(&self, mission_id: Uuid, segment_id: Option<Uuid>) {
        let key = keys::manual_location_key(&mission_id, segment_id.as_ref());
        if let Err(e) = self.substrate.remove(&key) {
            warn!(key = %key, error = %e, "Failed to clear manual location");
        }
    }

    /// Remove the mission-level and every segment-level location.
    pub fn purge_mission(&self, mission_id: Uuid) {
        let mission_key = keys::manual_location_key(&mission_id, None);
        let segment_prefix = format!("{}:", mission_key);

        let result = self
            .substrate
            .remove(&mission_key)
            .and_then(|_| self.substrate.delete_by_prefix(&segment_prefix));
        if let Err(e) = result {
            warn!(mission_id = %mission_id, error = %e, "Failed to purge manual locations");
        }
    }
}
