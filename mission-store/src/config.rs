//! Store configuration.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::FIELD_TTL_HOURS;
use crate::error::{StoreError, StoreResult};
use crate::keys;

const ACTIVE_MISSION_TTL_HOURS: i64 = 56;
const COMPLETED_MISSION_TTL_HOURS: i64 = 24;

/// Configuration for a [`crate::MissionStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Field entry TTL (hours)
    pub field_ttl_hours: i64,
    /// Catalog TTL for missions that are still open, from creation (hours)
    pub active_mission_ttl_hours: i64,
    /// Catalog TTL for completed missions, from completion (hours)
    pub completed_mission_ttl_hours: i64,
    /// Byte quota for the in-memory substrate (None = unbounded)
    pub quota_bytes: Option<usize>,
    /// SQLite file for the persistent substrate
    pub database_path: Option<PathBuf>,
    /// Namespaces that describe the location rather than the team.
    ///
    /// Keys in these namespaces are written per segment and reset on
    /// relocation; all other namespaces are mission-wide.
    pub location_namespaces: Vec<String>,
    /// Run the legacy key migration when the store is opened
    pub migrate_on_open: bool,
    /// Purge expired missions when the store is opened
    pub purge_expired_on_open: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            field_ttl_hours: FIELD_TTL_HOURS,
            active_mission_ttl_hours: ACTIVE_MISSION_TTL_HOURS,
            completed_mission_ttl_hours: COMPLETED_MISSION_TTL_HOURS,
            quota_bytes: None,
            database_path: None,
            location_namespaces: vec![
                "grc:".to_string(),       // SORA ground risk
                "arc:".to_string(),       // SORA air risk
                "sora:".to_string(),      // SORA summary / SAIL
                "env:".to_string(),       // weather, nearby POIs, geocode
                "tech-site:".to_string(), // site-bound technical checks
            ],
            migrate_on_open: true,
            purge_expired_on_open: true,
        }
    }
}

impl StoreConfig {
    /// Load config from YAML. TTLs are validated.
    pub fn from_yaml(yaml: &str) -> StoreResult<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Load config from a YAML file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml).map_err(|e| match e {
            StoreError::Config(msg) => StoreError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Every TTL must be a positive number of hours chrono can represent.
    pub fn validate(&self) -> StoreResult<()> {
        let ttls = [
            ("field_ttl_hours", self.field_ttl_hours),
            ("active_mission_ttl_hours", self.active_mission_ttl_hours),
            ("completed_mission_ttl_hours", self.completed_mission_ttl_hours),
        ];
        for (name, hours) in ttls {
            if ttl_from_hours(hours).is_none() {
                return Err(StoreError::Config(format!(
                    "{} must be a positive number of hours, got {}",
                    name, hours
                )));
            }
        }
        Ok(())
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `MISSION_STORE_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("MISSION_STORE_DB") {
            self.database_path = Some(PathBuf::from(path));
        }

        if let Ok(val) = std::env::var("MISSION_STORE_QUOTA_BYTES") {
            if let Ok(bytes) = val.parse::<usize>() {
                self.quota_bytes = Some(bytes);
            }
        }

        if let Ok(val) = std::env::var("MISSION_STORE_FIELD_TTL_HOURS") {
            match val.parse::<i64>().ok().filter(|h| ttl_from_hours(*h).is_some()) {
                Some(hours) => self.field_ttl_hours = hours,
                None => warn!(value = %val, "Ignoring invalid MISSION_STORE_FIELD_TTL_HOURS"),
            }
        }

        self
    }

    // Invalid hours fall back to the defaults; see `validate`.

    pub fn field_ttl(&self) -> Duration {
        ttl_from_hours(self.field_ttl_hours).unwrap_or_else(|| Duration::hours(FIELD_TTL_HOURS))
    }

    pub fn active_mission_ttl(&self) -> Duration {
        ttl_from_hours(self.active_mission_ttl_hours)
            .unwrap_or_else(|| Duration::hours(ACTIVE_MISSION_TTL_HOURS))
    }

    pub fn completed_mission_ttl(&self) -> Duration {
        ttl_from_hours(self.completed_mission_ttl_hours)
            .unwrap_or_else(|| Duration::hours(COMPLETED_MISSION_TTL_HOURS))
    }

    /// Whether a logical key belongs to a location-bound namespace.
    pub fn is_location_bound(&self, logical_key: &str) -> bool {
        let ns = keys::namespace(logical_key);
        self.location_namespaces.iter().any(|n| n == ns)
    }
}

fn ttl_from_hours(hours: i64) -> Option<Duration> {
    Duration::try_hours(hours).filter(|ttl| *ttl > Duration::zero())
}
