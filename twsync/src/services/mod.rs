//! Services module
//!
//! Entry points that sit between the CLI and the reconciler.

pub mod hooks;
pub mod listener;
pub mod settings;

pub use hooks::{HookOutput, HookService};
pub use listener::{Listener, ListenerOptions, ListenerStats};
pub use settings::{SettingsService, SyncSettings};
