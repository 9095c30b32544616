//! Pass result summary

use serde::Serialize;
use std::fmt;

/// One item that could not be synced in this pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub item: String,
    pub operation: String,
    pub message: String,
}

/// A link recorded during the pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedPair {
    pub local_id: String,
    pub remote_id: String,
}

/// What a pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub completed: usize,
    pub deleted: usize,
    pub errors: Vec<ItemError>,
    pub warnings: Vec<String>,
    /// Items left for the next full pass
    pub deferred: Vec<String>,
    /// Links created by this pass
    pub linked: Vec<LinkedPair>,
}

impl SyncSummary {
    /// Pairs changed on either side
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.completed + self.deleted
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// 0 on full success (including no-ops), 1 when any item failed
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub(crate) fn error(&mut self, item: &str, operation: &str, message: impl ToString) {
        let message = message.to_string();
        tracing::error!("{} failed for {}: {}", operation, item, message);
        self.errors.push(ItemError {
            item: item.to_string(),
            operation: operation.to_string(),
            message,
        });
    }

    pub(crate) fn warn(&mut self, item: &str, message: impl fmt::Display) {
        tracing::warn!("{}: {}", item, message);
        self.warnings.push(format!("{}: {}", item, message));
    }

    pub(crate) fn defer(&mut self, item: &str, reason: &str) {
        tracing::info!("Deferring {} to the next full pass: {}", item, reason);
        self.deferred.push(format!("{}: {}", item, reason));
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created {}, updated {}, completed {}, deleted {}, {} error(s)",
            self.created,
            self.updated,
            self.completed,
            self.deleted,
            self.errors.len()
        )?;
        if !self.deferred.is_empty() {
            write!(f, ", {} deferred", self.deferred.len())?;
        }
        Ok(())
    }
}
