//! Prefix invalidation.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::cell::CellManager;
use crate::keys;

/// SORA ground and air risk inputs.
pub const RISK_CLASSIFICATION_PREFIXES: [&str; 2] = ["grc:", "arc:"];

/// Cached weather, nearby-POI and geocode payloads.
pub const ENVIRONMENT_PREFIX: &str = "env:";

/// Bulk deletion of every field sharing a logical prefix.
#[derive(Clone)]
pub struct PrefixInvalidator {
    cells: Arc<CellManager>,
}

impl PrefixInvalidator {
    pub fn new(cells: Arc<CellManager>) -> Self {
        Self { cells }
    }

    /// Delete every field of `mission_id` whose logical key starts with
    /// `logical_prefix`, from the substrate and from the in-memory cell.
    ///
    /// A mission whose cell was never opened is cleared physically only;
    /// the cell will hydrate from the already-cleared substrate later.
    /// Returns the number of keys removed.
    pub fn clear_by_prefix(&self, mission_id: Uuid, logical_prefix: &str) -> usize {
        if let Some(cell) = self.cells.get_existing(mission_id) {
            return cell.remove_prefix(logical_prefix).len();
        }

        let physical_prefix = keys::physical_key(&mission_id, logical_prefix);
        match self.cells.substrate().delete_by_prefix(&physical_prefix) {
            Ok(count) => {
                debug!(mission_id = %mission_id, prefix = %logical_prefix, count, "Cleared prefix (cold)");
                count
            }
            Err(e) => {
                warn!(mission_id = %mission_id, prefix = %logical_prefix, error = %e, "Prefix delete failed");
                0
            }
        }
    }

    /// Clear several prefixes; returns the total removed.
    pub fn clear_all(&self, mission_id: Uuid, logical_prefixes: &[&str]) -> usize {
        logical_prefixes
            .iter()
            .map(|prefix| self.clear_by_prefix(mission_id, prefix))
            .sum()
    }
}
