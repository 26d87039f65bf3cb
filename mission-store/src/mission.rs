//! Mission and segment records.
//!
//! These are serialized as camelCase JSON with epoch-millisecond timestamps,
//! which is the shape the UI reads from the mission catalog.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Workflow phase a mission is in. Used only for UI routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub enum MissionPhase {
    /// Mission data entry
    #[default]
    Einsatzdaten,
    /// Pre-flight checks
    Vorflugkontrolle,
    /// Flights
    Fluege,
    /// Post-flight wrap-up
    Nachbereitung,
}

impl MissionPhase {
    pub const ALL: [MissionPhase; 4] = [
        MissionPhase::Einsatzdaten,
        MissionPhase::Vorflugkontrolle,
        MissionPhase::Fluege,
        MissionPhase::Nachbereitung,
    ];

    /// The following phase, or `None` from the last one.
    pub fn next(self) -> Option<Self> {
        match self {
            MissionPhase::Einsatzdaten => Some(MissionPhase::Vorflugkontrolle),
            MissionPhase::Vorflugkontrolle => Some(MissionPhase::Fluege),
            MissionPhase::Fluege => Some(MissionPhase::Nachbereitung),
            MissionPhase::Nachbereitung => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MissionPhase::Einsatzdaten => "einsatzdaten",
            MissionPhase::Vorflugkontrolle => "vorflugkontrolle",
            MissionPhase::Fluege => "fluege",
            MissionPhase::Nachbereitung => "nachbereitung",
        }
    }
}

impl std::fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for MissionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MissionPhase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| format!("unknown mission phase: {}", s))
    }
}

/// Segment state. Moves one way only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub enum SegmentStatus {
    Active,
    Completed,
}

/// A period of a mission spent at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Segment {
    pub id: Uuid,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "typescript", ts(type = "number"))]
    pub created_at: DateTime<Utc>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "typescript", ts(optional))]
    pub location_name: Option<String>,
    pub status: SegmentStatus,
}

impl Segment {
    pub fn new(label: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            label: label.into(),
            location_name: None,
            status: SegmentStatus::Active,
        }
    }

    pub fn with_location(mut self, location_name: Option<String>) -> Self {
        self.location_name = location_name;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == SegmentStatus::Active
    }
}

/// One operational case tracked end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Mission {
    pub id: Uuid,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "typescript", ts(type = "number"))]
    pub created_at: DateTime<Utc>,
    pub label: String,
    #[serde(default)]
    pub phase: MissionPhase,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub active_segment_id: Option<Uuid>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    #[cfg_attr(feature = "typescript", ts(type = "number", optional))]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Mission {
    /// A mission with no segments (as written before relocation existed).
    pub fn unsegmented(label: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            label: label.into(),
            phase: MissionPhase::default(),
            segments: Vec::new(),
            active_segment_id: None,
            completed_at: None,
        }
    }

    /// A new mission with its first segment active.
    pub fn new(label: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let mut mission = Self::unsegmented(label, created_at);
        let first = Segment::new(first_segment_label(), created_at);
        mission.active_segment_id = Some(first.id);
        mission.segments.push(first);
        mission
    }

    pub fn segment(&self, segment_id: Uuid) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == segment_id)
    }

    pub fn first_segment(&self) -> Option<&Segment> {
        self.segments.first()
    }

    pub fn active_segment(&self) -> Option<&Segment> {
        self.active_segment_id.and_then(|id| self.segment(id))
    }

    pub fn is_first_segment(&self, segment_id: Uuid) -> bool {
        self.first_segment().map(|s| s.id) == Some(segment_id)
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// End of the mission's lifetime: `completedAt + completed_ttl` once
    /// completed, otherwise `createdAt + active_ttl`.
    ///
    /// `None` when the end lies beyond the representable date range.
    pub fn expires_at(&self, active_ttl: Duration, completed_ttl: Duration) -> Option<DateTime<Utc>> {
        match self.completed_at {
            Some(completed_at) => completed_at.checked_add_signed(completed_ttl),
            None => self.created_at.checked_add_signed(active_ttl),
        }
    }

    /// A mission whose end cannot be represented never expires.
    pub fn is_expired(&self, now: DateTime<Utc>, active_ttl: Duration, completed_ttl: Duration) -> bool {
        self.expires_at(active_ttl, completed_ttl)
            .is_some_and(|expires_at| now > expires_at)
    }

    /// Check that `activeSegmentId` points into `segments` and that at most
    /// one segment is active.
    pub fn is_consistent(&self) -> bool {
        let active_count = self.segments.iter().filter(|s| s.is_active()).count();
        let pointer_ok = match self.active_segment_id {
            Some(id) => self.segment(id).map(Segment::is_active).unwrap_or(false),
            None => active_count == 0,
        };
        pointer_ok && active_count <= 1
    }
}

pub(crate) fn first_segment_label() -> String {
    "Location 1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap()
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(MissionPhase::default(), MissionPhase::Einsatzdaten);
        assert_eq!(MissionPhase::Fluege.next(), Some(MissionPhase::Nachbereitung));
        assert_eq!(MissionPhase::Nachbereitung.next(), None);
        assert_eq!(
            "vorflugkontrolle".parse::<MissionPhase>(),
            Ok(MissionPhase::Vorflugkontrolle)
        );
    }

    #[test]
    fn test_new_mission_has_active_first_segment() {
        let mission = Mission::new("Bridge inspection", t0());
        assert_eq!(mission.segments.len(), 1);
        assert_eq!(mission.active_segment_id, Some(mission.segments[0].id));
        assert!(mission.is_first_segment(mission.segments[0].id));
        assert!(mission.is_consistent());
    }

    #[test]
    fn test_expiry_windows() {
        let mut mission = Mission::new("Survey", t0());
        let active = Duration::hours(56);
        let completed = Duration::hours(24);

        assert!(!mission.is_expired(t0() + Duration::hours(56), active, completed));
        assert!(mission.is_expired(
            t0() + Duration::hours(56) + Duration::milliseconds(1),
            active,
            completed
        ));

        mission.completed_at = Some(t0() + Duration::hours(2));
        assert!(!mission.is_expired(t0() + Duration::hours(26), active, completed));
        assert!(mission.is_expired(t0() + Duration::hours(27), active, completed));
    }

    #[test]
    fn test_expiry_beyond_date_range() {
        let mission: Mission = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "createdAt": 8_210_266_876_799_999i64,
            "label": "Far future"
        }))
        .unwrap();
        let active = Duration::hours(56);
        let completed = Duration::hours(24);

        assert_eq!(mission.expires_at(active, completed), None);
        assert!(!mission.is_expired(t0(), active, completed));
    }

    #[test]
    fn test_catalog_wire_shape() {
        let mission = Mission::new("Survey", t0());
        let value = serde_json::to_value(&mission).unwrap();

        assert_eq!(value["createdAt"], json!(1_700_000_000_000i64));
        assert_eq!(value["phase"], json!("einsatzdaten"));
        assert_eq!(value["segments"][0]["status"], json!("active"));
        assert!(value.get("completedAt").is_none());

        let parsed: Mission = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, mission);
    }

    #[test]
    fn test_minimal_record_parses() {
        let id = Uuid::new_v4();
        let parsed: Mission = serde_json::from_value(json!({
            "id": id,
            "createdAt": 1_700_000_000_000i64,
            "label": "Old mission"
        }))
        .unwrap();

        assert_eq!(parsed.phase, MissionPhase::Einsatzdaten);
        assert!(parsed.segments.is_empty());
        assert_eq!(parsed.active_segment_id, None);
        assert_eq!(parsed.completed_at, None);
    }
}
