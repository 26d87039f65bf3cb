//! Namespaced field access.
//!
//! Maps `(mission, logical key)` onto the mission's cell and implements the
//! segment resolution order:
//!
//! 1. `seg:<segmentId>:<key>`
//! 2. `<key>` unscoped, but **only** when resolving the mission's first
//!    segment (or a mission that predates segments)
//!
//! Later segments never fall back. Unscoped data from before segmentation
//! belongs to the first location; letting a relocation inherit it would
//! carry stale weather, nearby and risk data to the new site.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::cell::CellManager;
use crate::keys;

/// Which namespace a segment-aware read or write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentScope {
    /// Mission without segments; keys are used as-is
    Unscoped,
    /// A concrete segment
    Segment {
        id: Uuid,
        /// Fall back to the unscoped key when the segment key is absent
        legacy_fallback: bool,
    },
}

impl SegmentScope {
    /// Logical key a write in this scope lands on.
    pub fn key(&self, key: &str) -> String {
        match self {
            SegmentScope::Unscoped => key.to_string(),
            SegmentScope::Segment { id, .. } => keys::segment_key(id, key),
        }
    }

    pub fn segment_id(&self) -> Option<Uuid> {
        match self {
            SegmentScope::Unscoped => None,
            SegmentScope::Segment { id, .. } => Some(*id),
        }
    }
}

/// Typed read/write access to mission fields.
#[derive(Clone)]
pub struct FieldAccessor {
    cells: Arc<CellManager>,
}

impl FieldAccessor {
    pub fn new(cells: Arc<CellManager>) -> Self {
        Self { cells }
    }

    /// Raw value of a logical key.
    pub fn read_value(&self, mission_id: Uuid, key: &str) -> Option<Value> {
        self.cells.get_or_create(mission_id).get(key)
    }

    /// Read a logical key, returning `fallback` when it is absent or does
    /// not deserialize as `T`.
    pub fn read<T: DeserializeOwned>(&self, mission_id: Uuid, key: &str, fallback: T) -> T {
        decode_or(self.read_value(mission_id, key), fallback)
    }

    /// Write a logical key. Returns `false` if the value could not be
    /// serialized or the mission's cell has been retired.
    pub fn write<T: Serialize + ?Sized>(&self, mission_id: Uuid, key: &str, value: &T) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.cells.get_or_create(mission_id).set(key, value),
            Err(e) => {
                warn!(mission_id = %mission_id, key = %key, error = %e, "Value not serializable");
                false
            }
        }
    }

    /// Resolve a key within a segment scope.
    pub fn resolve(&self, mission_id: Uuid, scope: SegmentScope, key: &str) -> Option<Value> {
        match scope {
            SegmentScope::Unscoped => self.read_value(mission_id, key),
            SegmentScope::Segment {
                id,
                legacy_fallback,
            } => {
                let cell = self.cells.get_or_create(mission_id);
                cell.get(&keys::segment_key(&id, key)).or_else(|| {
                    if legacy_fallback {
                        cell.get(key)
                    } else {
                        None
                    }
                })
            }
        }
    }

    pub fn read_scoped<T: DeserializeOwned>(
        &self,
        mission_id: Uuid,
        scope: SegmentScope,
        key: &str,
        fallback: T,
    ) -> T {
        decode_or(self.resolve(mission_id, scope, key), fallback)
    }

    pub fn write_scoped<T: Serialize + ?Sized>(
        &self,
        mission_id: Uuid,
        scope: SegmentScope,
        key: &str,
        value: &T,
    ) -> bool {
        self.write(mission_id, &scope.key(key), value)
    }
}

fn decode_or<T: DeserializeOwned>(value: Option<Value>, fallback: T) -> T {
    value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(fallback)
}
