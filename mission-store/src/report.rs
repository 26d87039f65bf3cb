//! Read-only cross-segment scan for report generation.
//!
//! Groups a mission's fields into mission-wide values and one block per
//! segment. Only the first segment picks up unscoped location-bound values
//! (data written before the mission had segments); later segments report
//! only what was written into them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::accessor::SegmentScope;
use crate::keys;
use crate::location::ManualLocation;
use crate::mission::{Mission, Segment};
use crate::store::MissionStore;

/// Everything recorded for one mission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionReport {
    pub mission: Mission,
    /// Crew, drone, equipment and other mission-wide fields
    pub mission_fields: BTreeMap<String, Value>,
    /// Per-location blocks in segment order
    pub segments: Vec<SegmentReport>,
    /// Mission-level pin of a mission without segments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_location: Option<ManualLocation>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentReport {
    pub segment: Segment,
    /// Location-bound fields, keyed without the segment prefix
    pub fields: BTreeMap<String, Value>,
    pub manual_location: Option<ManualLocation>,
}

impl MissionReport {
    /// Field of a segment, by position in the segment list.
    pub fn segment_field(&self, index: usize, key: &str) -> Option<&Value> {
        self.segments.get(index)?.fields.get(key)
    }
}

/// Build the report for a live mission. Missing keys are simply absent.
pub fn collect(store: &MissionStore, mission_id: Uuid) -> Option<MissionReport> {
    let mission = store.missions().get(mission_id)?;
    let snapshot = store.snapshot(mission_id);

    let mut unscoped = BTreeMap::new();
    let mut scoped: BTreeMap<Uuid, BTreeMap<String, Value>> = BTreeMap::new();
    for (key, value) in snapshot {
        match keys::split_segment_key(&key) {
            Some((segment_id, inner)) => {
                scoped
                    .entry(segment_id)
                    .or_default()
                    .insert(inner.to_string(), value);
            }
            None => {
                unscoped.insert(key, value);
            }
        }
    }

    let config = store.config();
    let (location_bound, mission_fields): (BTreeMap<_, _>, BTreeMap<_, _>) =
        if mission.segments.is_empty() {
            (BTreeMap::new(), unscoped)
        } else {
            unscoped
                .into_iter()
                .partition(|(key, _)| config.is_location_bound(key))
        };

    let segments = mission
        .segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let mut fields = scoped.remove(&segment.id).unwrap_or_default();
            if index == 0 {
                for (key, value) in &location_bound {
                    fields.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }

            let scope = SegmentScope::Segment {
                id: segment.id,
                legacy_fallback: index == 0,
            };
            SegmentReport {
                segment: segment.clone(),
                fields,
                manual_location: store.locations().resolve(mission_id, scope),
            }
        })
        .collect();

    let manual_location = if mission.segments.is_empty() {
        store.locations().get(mission_id, None)
    } else {
        None
    };

    Some(MissionReport {
        mission,
        mission_fields,
        segments,
        manual_location,
        generated_at: store.clock().now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::substrate::MemorySubstrate;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> MissionStore {
        MissionStore::new(
            Arc::new(MemorySubstrate::new()),
            Arc::new(ManualClock::default()),
            StoreConfig::default(),
        )
    }

    #[test]
    fn test_report_groups_by_segment() {
        let store = store();
        let mission = store.missions().create("Wind farm");
        store.write_field(mission.id, "crew:pilot", "Kim");
        store.write_field(mission.id, "grc:areaType", "rural");

        let second = store
            .missions()
            .relocate(mission.id, "Turbine 7", None)
            .unwrap();
        store.write_field(mission.id, "grc:areaType", "industrial");

        let report = collect(&store, mission.id).unwrap();
        assert_eq!(report.mission_fields.get("crew:pilot"), Some(&json!("Kim")));
        assert_eq!(report.segments.len(), 2);
        assert_eq!(report.segment_field(0, "grc:areaType"), Some(&json!("rural")));
        assert_eq!(
            report.segment_field(1, "grc:areaType"),
            Some(&json!("industrial"))
        );
        assert_eq!(report.segments[1].segment.id, second.id);
    }

    #[test]
    fn test_legacy_values_only_reach_first_segment() {
        let store = store();
        let mission = store.missions().create_unsegmented("Old");
        store.write(mission.id, "env:weather", &json!({"wind": 4}));
        store.write(mission.id, "drone:model", &"M30");

        let unsegmented = collect(&store, mission.id).unwrap();
        assert!(unsegmented.segments.is_empty());
        assert!(unsegmented.mission_fields.contains_key("env:weather"));

        store.missions().relocate(mission.id, "New site", None);
        let report = collect(&store, mission.id).unwrap();

        assert_eq!(
            report.segment_field(0, "env:weather"),
            Some(&json!({"wind": 4}))
        );
        assert_eq!(report.segment_field(1, "env:weather"), None);
        assert!(!report.mission_fields.contains_key("env:weather"));
        assert_eq!(report.mission_fields.get("drone:model"), Some(&json!("M30")));
    }

    #[test]
    fn test_missing_mission_has_no_report() {
        assert!(collect(&store(), Uuid::new_v4()).is_none());
    }
}
