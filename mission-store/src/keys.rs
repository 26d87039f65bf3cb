//! Physical key layout.
//!
//! Logical keys are what callers use (`grc:areaType`, `seg:<id>:env:weather`).
//! Physical keys are what the substrate sees:
//!
//! - fields: `form:<missionId>:<logicalKey>`
//! - mission catalog: `mission-catalog`
//! - manual location: `manual-location:<missionId>[:seg:<segmentId>]`
//! - migration flag: `store-meta:legacy-migrated`
//!
//! Every field key is mission-qualified and the mission prefix ends in `:`,
//! so a prefix operation on one mission can never reach another.

use uuid::Uuid;

pub const FORM_PREFIX: &str = "form:";
pub const SEGMENT_PREFIX: &str = "seg:";
pub const CATALOG_KEY: &str = "mission-catalog";
pub const MANUAL_LOCATION_KEY: &str = "manual-location";
pub const MIGRATION_FLAG_KEY: &str = "store-meta:legacy-migrated";

/// `form:<missionId>:`
pub fn mission_prefix(mission_id: &Uuid) -> String {
    format!("{}{}:", FORM_PREFIX, mission_id)
}

/// `form:<missionId>:<logicalKey>`
pub fn physical_key(mission_id: &Uuid, logical_key: &str) -> String {
    format!("{}{}:{}", FORM_PREFIX, mission_id, logical_key)
}

/// `seg:<segmentId>:`
pub fn segment_prefix(segment_id: &Uuid) -> String {
    format!("{}{}:", SEGMENT_PREFIX, segment_id)
}

/// `seg:<segmentId>:<key>`
pub fn segment_key(segment_id: &Uuid, key: &str) -> String {
    format!("{}{}:{}", SEGMENT_PREFIX, segment_id, key)
}

/// `manual-location:<missionId>` or `manual-location:<missionId>:seg:<segmentId>`
pub fn manual_location_key(mission_id: &Uuid, segment_id: Option<&Uuid>) -> String {
    match segment_id {
        Some(segment_id) => format!(
            "{}:{}:{}{}",
            MANUAL_LOCATION_KEY, mission_id, SEGMENT_PREFIX, segment_id
        ),
        None => format!("{}:{}", MANUAL_LOCATION_KEY, mission_id),
    }
}

/// Namespace of a logical key: everything up to and including the first `:`.
///
/// A key without a colon is its own namespace.
pub fn namespace(logical_key: &str) -> &str {
    match logical_key.find(':') {
        Some(idx) => &logical_key[..=idx],
        None => logical_key,
    }
}

/// Split a segment-scoped logical key into its segment id and inner key.
pub fn split_segment_key(logical_key: &str) -> Option<(Uuid, &str)> {
    let rest = logical_key.strip_prefix(SEGMENT_PREFIX)?;
    let (id, key) = rest.split_once(':')?;
    Some((Uuid::parse_str(id).ok()?, key))
}

/// How a physical `form:` key is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormKey<'a> {
    /// `form:<missionId>:<logicalKey>`
    Mission { mission_id: Uuid, logical_key: &'a str },
    /// `form:<logicalKey>` written before missions existed
    Legacy { logical_key: &'a str },
}

/// Classify a physical key. Returns `None` for keys outside `form:`.
pub fn parse_form_key(physical: &str) -> Option<FormKey<'_>> {
    let rest = physical.strip_prefix(FORM_PREFIX)?;
    if let Some((head, tail)) = rest.split_once(':') {
        if let Ok(mission_id) = Uuid::parse_str(head) {
            return Some(FormKey::Mission {
                mission_id,
                logical_key: tail,
            });
        }
    }
    Some(FormKey::Legacy { logical_key: rest })
}
