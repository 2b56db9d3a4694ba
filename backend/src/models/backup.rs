//! Backup history and settings models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// How a backup was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "backup_kind", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupKind {
    Manual,
    Scheduled,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Manual => "manual",
            BackupKind::Scheduled => "scheduled",
        }
    }
}

/// Backup lifecycle: `InProgress -> Uploading -> Completed`, or `-> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "backup_state", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupState {
    InProgress,
    Uploading,
    Completed,
    Failed,
}

impl BackupState {
    const ALL: [BackupState; 4] = [
        BackupState::InProgress,
        BackupState::Uploading,
        BackupState::Completed,
        BackupState::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, BackupState::Completed | BackupState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: BackupState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            BackupState::InProgress => false,
            BackupState::Uploading => *self == BackupState::InProgress,
            BackupState::Completed => *self == BackupState::Uploading,
            BackupState::Failed => true,
        }
    }

    /// States a row may be in for a move to `next` to be legal.
    pub fn sources_of(next: BackupState) -> Vec<BackupState> {
        Self::ALL
            .into_iter()
            .filter(|state| state.can_transition_to(next))
            .collect()
    }
}

impl std::fmt::Display for BackupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupState::InProgress => write!(f, "in_progress"),
            BackupState::Uploading => write!(f, "uploading"),
            BackupState::Completed => write!(f, "completed"),
            BackupState::Failed => write!(f, "failed"),
        }
    }
}

/// Persisted backup history row.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: Uuid,
    pub filename: String,
    pub remote_file_id: Option<String>,
    pub file_size_bytes: i64,
    pub total_records: i64,
    #[schema(value_type = Object)]
    pub entity_counts: serde_json::Value,
    pub format_version: String,
    pub kind: BackupKind,
    pub state: BackupState,
    pub error_message: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupRecord {
    pub fn entity_counts(&self) -> BTreeMap<String, i64> {
        serde_json::from_value(self.entity_counts.clone()).unwrap_or_default()
    }

    pub fn is_restorable(&self) -> bool {
        self.state == BackupState::Completed && self.remote_file_id.is_some()
    }
}

/// Fields for a fresh history row.
#[derive(Debug, Clone)]
pub struct NewBackupRecord {
    pub id: Uuid,
    pub filename: String,
    pub format_version: String,
    pub kind: BackupKind,
    pub created_by: Option<Uuid>,
}

/// Partial update applied to a history row alongside a state transition.
#[derive(Debug, Clone, Default)]
pub struct BackupProgress {
    pub remote_file_id: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub total_records: Option<i64>,
    pub entity_counts: Option<BTreeMap<String, i64>>,
    pub error_message: Option<String>,
}

/// Schedule preset for automatic backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "backup_schedule_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Daily,
    Weekly,
    Disabled,
}

impl ScheduleKind {
    /// Cron expression used when the schedule preset changes without one.
    pub fn default_cron(&self) -> &'static str {
        match self {
            ScheduleKind::Daily | ScheduleKind::Disabled => "0 2 * * *",
            ScheduleKind::Weekly => "0 2 * * 0",
        }
    }
}

/// Singleton backup configuration row.
#[derive(Clone, FromRow, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupSettings {
    pub auto_backup_enabled: bool,
    pub schedule_kind: ScheduleKind,
    pub cron_expression: String,
    pub retention_days: i32,
    pub max_backups: i32,
    pub drive_service_account_email: Option<String>,
    #[serde(skip_serializing)]
    pub drive_private_key: Option<String>,
    pub drive_folder_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

redacted_debug!(BackupSettings {
    show auto_backup_enabled,
    show schedule_kind,
    show cron_expression,
    show retention_days,
    show max_backups,
    show drive_service_account_email,
    redact_option drive_private_key,
    show drive_folder_id,
});

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            auto_backup_enabled: false,
            schedule_kind: ScheduleKind::Daily,
            cron_expression: ScheduleKind::Daily.default_cron().to_string(),
            retention_days: 30,
            max_backups: 10,
            drive_service_account_email: None,
            drive_private_key: None,
            drive_folder_id: None,
            updated_at: Utc::now(),
        }
    }
}

impl BackupSettings {
    /// Scheduling is active only when enabled and not on the `Disabled` preset.
    pub fn schedule_active(&self) -> bool {
        self.auto_backup_enabled && self.schedule_kind != ScheduleKind::Disabled
    }

    pub fn has_drive_credentials(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        set(&self.drive_service_account_email)
            && set(&self.drive_private_key)
            && set(&self.drive_folder_id)
    }

    /// Merge a partial update; a preset change without an explicit cron
    /// expression adopts the preset's default.
    pub fn apply(&mut self, update: UpdateSettingsRequest) {
        if let Some(enabled) = update.auto_backup_enabled {
            self.auto_backup_enabled = enabled;
        }
        if let Some(kind) = update.schedule_kind {
            if kind != self.schedule_kind && update.cron_expression.is_none() {
                self.cron_expression = kind.default_cron().to_string();
            }
            self.schedule_kind = kind;
        }
        if let Some(cron) = update.cron_expression {
            self.cron_expression = cron.trim().to_string();
        }
        if let Some(days) = update.retention_days {
            self.retention_days = days;
        }
        if let Some(max) = update.max_backups {
            self.max_backups = max;
        }
        if let Some(email) = update.drive_service_account_email {
            self.drive_service_account_email = Some(email).filter(|v| !v.trim().is_empty());
        }
        if let Some(key) = update.drive_private_key {
            self.drive_private_key = Some(key).filter(|v| !v.trim().is_empty());
        }
        if let Some(folder) = update.drive_folder_id {
            self.drive_folder_id = Some(folder).filter(|v| !v.trim().is_empty());
        }
        self.updated_at = Utc::now();
    }
}

/// Partial settings update. An empty string clears a credential.
#[derive(Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub auto_backup_enabled: Option<bool>,
    pub schedule_kind: Option<ScheduleKind>,
    pub cron_expression: Option<String>,
    pub retention_days: Option<i32>,
    pub max_backups: Option<i32>,
    pub drive_service_account_email: Option<String>,
    pub drive_private_key: Option<String>,
    pub drive_folder_id: Option<String>,
}

redacted_debug!(UpdateSettingsRequest {
    show auto_backup_enabled,
    show schedule_kind,
    show cron_expression,
    show retention_days,
    show max_backups,
    show drive_service_account_email,
    redact_option drive_private_key,
    show drive_folder_id,
});
