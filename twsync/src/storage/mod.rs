//! Storage module
//!
//! Durable sync state (identity map, its lock and schema) and the
//! read-only location shortcut table.

pub mod identity_map;
pub mod locations;
pub mod lock;
pub mod schema;

pub use identity_map::{IdentityMap, IdentityMapStore};
pub use locations::LocationTable;
pub use lock::StateLock;
