//! Sync core: data model, change detection, translation and reconciliation

pub mod classifier;
pub mod fingerprint;
pub mod models;
pub mod plan;
pub mod reconciler;
pub mod summary;
pub mod translator;

pub use reconciler::{Reconciler, ReconcilerOptions, Trigger};
pub use summary::{ItemError, LinkedPair, SyncSummary};
