//! twsync library
//!
//! Two-way sync between Taskwarrior and a cloud reminders service. Exposed
//! as a library for the binary and for integration tests.

pub mod app;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod services;
pub mod storage;
pub mod sync;
