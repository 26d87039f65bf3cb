//! missionctl subcommands
//!
//! Each command runs against an opened [`MissionStore`] and returns the text
//! to print, so the same code paths are exercised by the tests.

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use tracing::info;
use uuid::Uuid;

use mission_store::{Mission, MissionPhase, MissionStore, SegmentStatus, Substrate};

/// Store commands
#[derive(Debug, Subcommand)]
pub enum MissionCommands {
    /// List live missions, newest first
    List,

    /// Print the consolidated report of a mission as JSON
    Show {
        /// Mission ID
        id: Uuid,
    },

    /// Dump physical substrate keys
    Keys {
        /// Only keys starting with this prefix
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Create a mission
    Create {
        /// Mission label
        label: String,
    },

    /// Start a new segment at another location
    Relocate {
        /// Mission ID
        id: Uuid,
        /// Segment label
        #[arg(short, long)]
        label: String,
        /// Place name
        #[arg(long)]
        location: Option<String>,
    },

    /// Advance a mission to the next phase, or set one explicitly
    Phase {
        /// Mission ID
        id: Uuid,
        /// einsatzdaten, vorflugkontrolle, fluege or nachbereitung
        #[arg(long)]
        set: Option<MissionPhase>,
    },

    /// Mark a mission completed
    Complete {
        /// Mission ID
        id: Uuid,
    },

    /// Delete a mission and all of its data
    Purge {
        /// Mission ID
        id: Uuid,
    },

    /// Delete every expired mission
    PurgeExpired,

    /// Delete field keys of missions missing from the catalog
    PurgeOrphans,

    /// Clear every field of a mission under a logical prefix
    Clear {
        /// Mission ID
        id: Uuid,
        /// Logical key prefix, e.g. "grc:"
        #[arg(short, long)]
        prefix: String,
    },

    /// Move pre-mission data under a new mission (runs once)
    Migrate,

    /// Print the effective store configuration as YAML
    Config,
}

/// Execute a store command
pub fn execute(store: &MissionStore, command: MissionCommands) -> Result<String> {
    match command {
        MissionCommands::List => Ok(format_missions(&store.missions().list())),

        MissionCommands::Show { id } => {
            let report = store
                .report(id)
                .ok_or_else(|| anyhow!("mission {} not found", id))?;
            Ok(serde_json::to_string_pretty(&report)?)
        }

        MissionCommands::Keys { prefix } => {
            let keys = store
                .substrate()
                .list_keys(&prefix)
                .context("listing substrate keys")?;
            Ok(keys.join("\n"))
        }

        MissionCommands::Create { label } => {
            let mission = store.missions().create(label);
            Ok(format!("Created mission {}", mission.id))
        }

        MissionCommands::Relocate {
            id,
            label,
            location,
        } => {
            let segment = store
                .missions()
                .relocate(id, label, location)
                .ok_or_else(|| anyhow!("mission {} not found or already completed", id))?;
            Ok(format!("Now at segment {} ({})", segment.id, segment.label))
        }

        MissionCommands::Phase { id, set } => {
            let mission = match set {
                Some(phase) => store.missions().set_phase(id, phase),
                None => store.missions().advance_phase(id),
            }
            .ok_or_else(|| anyhow!("mission {} not found", id))?;
            Ok(format!("Mission {} is in phase {}", mission.id, mission.phase))
        }

        MissionCommands::Complete { id } => {
            store
                .missions()
                .complete(id)
                .ok_or_else(|| anyhow!("mission {} not found", id))?;
            Ok(format!("Completed mission {}", id))
        }

        MissionCommands::Purge { id } => {
            if store.missions().purge(id) {
                info!(mission_id = %id, "Purged from CLI");
                Ok(format!("Purged mission {}", id))
            } else {
                Ok(format!("Mission {} was not in the catalog; leftover keys removed", id))
            }
        }

        MissionCommands::PurgeExpired => {
            let purged = store.missions().purge_expired();
            Ok(format!("Purged {} expired mission(s)", purged.len()))
        }

        MissionCommands::PurgeOrphans => {
            let swept = store.missions().purge_orphaned_fields();
            Ok(format!("Removed fields of {} orphaned mission(s)", swept))
        }

        MissionCommands::Clear { id, prefix } => {
            if !store.missions().contains(id) {
                return Err(anyhow!("mission {} not found", id));
            }
            let cleared = store.clear_by_prefix(id, &prefix);
            Ok(format!("Cleared {} key(s) under {}", cleared, prefix))
        }

        MissionCommands::Migrate => {
            let outcome = store.migrate_legacy();
            Ok(serde_json::to_string(&outcome)?)
        }

        MissionCommands::Config => Ok(store.config().to_yaml()?),
    }
}

fn format_missions(missions: &[Mission]) -> String {
    if missions.is_empty() {
        return "No missions".to_string();
    }

    let mut output = String::new();
    for mission in missions {
        let state = if mission.is_completed() {
            "completed"
        } else {
            "open"
        };
        output.push_str(&format!(
            "{}  {:<17} {:<9} {}\n",
            mission.id, mission.phase, state, mission.label
        ));
        for segment in &mission.segments {
            let marker = match segment.status {
                SegmentStatus::Active => "*",
                SegmentStatus::Completed => " ",
            };
            output.push_str(&format!(
                "    {} {}  {}{}\n",
                marker,
                segment.id,
                segment.label,
                segment
                    .location_name
                    .as_deref()
                    .map(|name| format!(" ({})", name))
                    .unwrap_or_default()
            ));
        }
    }
    output
}
