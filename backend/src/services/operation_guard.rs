//! In-process mutual exclusion for long-running data operations.
//!
//! Backup, restore, and import-execute must never overlap. Each acquires a
//! permit before starting; a second caller gets `AppError::Conflict` naming
//! the operation already in progress. The permit releases on drop, so early
//! returns and panics both free the slot.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use utoipa::ToSchema;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Backup,
    Restore,
    Import,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Backup => write!(f, "backup"),
            OperationKind::Restore => write!(f, "restore"),
            OperationKind::Import => write!(f, "import"),
        }
    }
}

#[derive(Clone, Default)]
pub struct OperationGuard {
    active: Arc<Mutex<Option<OperationKind>>>,
}

impl OperationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(active: &Mutex<Option<OperationKind>>) -> MutexGuard<'_, Option<OperationKind>> {
        // The slot only holds a Copy value, so a poisoned lock is still consistent.
        active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the slot for `kind`, or fail if any operation is running.
    pub fn try_acquire(&self, kind: OperationKind) -> Result<OperationPermit> {
        let mut slot = Self::slot(&self.active);
        if let Some(running) = *slot {
            return Err(AppError::Conflict(format!(
                "A {} is already in progress",
                running
            )));
        }
        *slot = Some(kind);
        tracing::debug!(operation = %kind, "Operation slot acquired");
        Ok(OperationPermit {
            active: self.active.clone(),
            kind,
        })
    }

    /// The operation currently running, if any.
    pub fn current(&self) -> Option<OperationKind> {
        *Self::slot(&self.active)
    }
}

/// Held for the duration of one operation.
pub struct OperationPermit {
    active: Arc<Mutex<Option<OperationKind>>>,
    kind: OperationKind,
}

impl Drop for OperationPermit {
    fn drop(&mut self) {
        *OperationGuard::slot(&self.active) = None;
        tracing::debug!(operation = %self.kind, "Operation slot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_operation_conflicts() {
        let guard = OperationGuard::new();
        let permit = guard.try_acquire(OperationKind::Backup).unwrap();
        let err = guard.try_acquire(OperationKind::Restore).err().unwrap();
        assert!(matches!(err, AppError::Conflict(ref msg) if msg.contains("backup")));
        assert_eq!(guard.current(), Some(OperationKind::Backup));

        drop(permit);
        assert_eq!(guard.current(), None);
        assert!(guard.try_acquire(OperationKind::Import).is_ok());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let guard = OperationGuard::new();
        let other = guard.clone();
        let _permit = guard.try_acquire(OperationKind::Import).unwrap();
        assert!(other.try_acquire(OperationKind::Backup).is_err());
    }
}
