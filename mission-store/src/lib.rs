//! Mission State Store for drone-mission checklists
//!
//! A reactive, TTL-bounded, namespaced key/value layer that every checklist
//! phase reads and writes through. Each mission, and each relocation segment
//! within a mission, gets an isolated namespace inside one flat substrate.
//!
//! ```text
//!            MissionStore (facade)
//!   ┌──────────────┼─────────────────────┐
//!   │              │                     │
//! MissionManager  FieldAccessor   PrefixInvalidator
//!   │  catalog     │  seg:<id>:<key>     │
//!   │              └──────┬──────────────┘
//!   │                  CellManager ── MissionCell (one per mission)
//!   │                     │
//!   └──────── Substrate (memory | SQLite) ── Entry codec (56h TTL)
//! ```
//!
//! # Key Components
//!
//! - [`MissionStore`]: Handle wiring everything together
//! - [`MissionManager`]: Mission catalog, phases, segments, expiry and purge
//! - [`CellManager`]: Lazily hydrated in-memory cells with write-through
//! - [`FieldAccessor`]: Logical key mapping and first-segment legacy fallback
//! - [`Substrate`]: Storage backend trait ([`MemorySubstrate`], [`SqliteSubstrate`])
//!
//! # Physical layout
//!
//! | Key | Content |
//! |-----|---------|
//! | `form:<missionId>:<logicalKey>` | field entry |
//! | `form:<missionId>:seg:<segmentId>:<logicalKey>` | segment-scoped field entry |
//! | `mission-catalog` | JSON array of missions |
//! | `manual-location:<missionId>[:seg:<segmentId>]` | manual location entry |
//! | `store-meta:legacy-migrated` | migration flag |
//!
//! # Example
//!
//! ```ignore
//! use mission_store::{MissionStore, StoreConfig};
//!
//! let store = MissionStore::in_memory(StoreConfig::default());
//! let mission = store.missions().create("Bridge inspection");
//!
//! store.write_field(mission.id, "crew:pilot", "Kim");
//! store.write_field(mission.id, "grc:areaType", "rural");
//!
//! let segment = store.missions().relocate(mission.id, "North pier", None);
//! // grc:areaType is empty again for the new location; the crew carries over
//! ```

pub mod accessor;
pub mod broadcast;
pub mod cell;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod invalidate;
pub mod keys;
pub mod lifecycle;
pub mod location;
pub mod migration;
pub mod mission;
pub mod report;
pub mod store;
pub mod substrate;

// Re-export main types
pub use accessor::{FieldAccessor, SegmentScope};
pub use broadcast::{Broadcast, BroadcastRegistry, Subscription};
pub use cell::{CellEvent, CellManager, MissionCell};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use invalidate::PrefixInvalidator;
pub use lifecycle::{MissionManager, MissionTtl};
pub use location::{ManualLocation, ManualLocationStore};
pub use migration::MigrationOutcome;
pub use mission::{Mission, MissionPhase, Segment, SegmentStatus};
pub use report::{MissionReport, SegmentReport};
pub use store::{MissionStore, OpenReport};
pub use substrate::{MemorySubstrate, SqliteSubstrate, Substrate};
