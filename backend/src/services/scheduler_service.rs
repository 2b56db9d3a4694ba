//! Automatic backups and retention.
//!
//! One cron job runs scheduled backups from the stored settings. Updating the
//! settings always cancels the current job and registers a fresh one, so
//! schedule changes apply without a restart. After every scheduled backup,
//! completed backups are pruned by age and by count.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use serde::Serialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::backup::{BackupKind, BackupRecord, BackupSettings, UpdateSettingsRequest};
use crate::services::backup_service::BackupService;
use crate::storage::RemoteStoreHandle;
use crate::store::BackupHistory;

const JOB_NAME: &str = "auto-backup";

const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Parse a cron expression, accepting the common five-field form.
///
/// The cron crate expects seconds first (six or seven fields) and numbers
/// weekdays from 1, so a five-field expression gets `0` prepended and its
/// numeric weekdays (0 or 7 = Sunday) rewritten as names.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = if fields.len() == 5 {
        format!("0 {} {}", fields[..4].join(" "), weekday_names(fields[4]))
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|e| AppError::Validation(format!("Invalid cron expression '{}': {}", expr, e)))
}

fn weekday_names(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (base, step) = match part.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (part, None),
            };
            if let Some(days) = range_through_sunday(base, step) {
                return days;
            }
            let base = base
                .split('-')
                .map(|token| {
                    token
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| WEEKDAYS.get(n).copied())
                        .unwrap_or(token)
                })
                .collect::<Vec<_>>()
                .join("-");
            match step {
                Some(step) => format!("{}/{}", base, step),
                None => base,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Spell out a numeric range ending on 7 (Sunday) day by day, since its
/// named form (`Fri-Sun`) would read as reversed.
fn range_through_sunday(base: &str, step: Option<&str>) -> Option<String> {
    let (start, end) = base.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    if end != 7 || start > end {
        return None;
    }
    let step = match step {
        Some(step) => step.parse::<usize>().ok().filter(|s| *s > 0)?,
        None => 1,
    };
    let mut days: Vec<&str> = Vec::new();
    for n in (start..=end).step_by(step) {
        let day = WEEKDAYS[n];
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Some(days.join(","))
}

/// Backups removed by one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct CleanupReport {
    pub removed_by_age: Vec<Uuid>,
    pub removed_by_count: Vec<Uuid>,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.removed_by_age.len() + self.removed_by_count.len()
    }
}

/// Decide which completed backups the retention policy removes.
///
/// Age and count apply independently: anything older than `retention_days`
/// goes, and so does everything past the newest `max_backups`. A backup
/// caught by both is reported once, under age. Non-positive limits disable
/// that rule.
pub fn select_for_removal(
    completed: &[BackupRecord],
    retention_days: i32,
    max_backups: i32,
    now: DateTime<Utc>,
) -> CleanupReport {
    let mut newest_first: Vec<&BackupRecord> = completed.iter().collect();
    newest_first.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut report = CleanupReport::default();
    if retention_days > 0 {
        let cutoff = now - ChronoDuration::days(i64::from(retention_days));
        report.removed_by_age = newest_first
            .iter()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.id)
            .collect();
    }

    if max_backups > 0 {
        let by_age: HashSet<Uuid> = report.removed_by_age.iter().copied().collect();
        report.removed_by_count = newest_first
            .iter()
            .skip(max_backups as usize)
            .map(|r| r.id)
            .filter(|id| !by_age.contains(id))
            .collect();
    }
    report
}

/// Cron-driven backup trigger with retention cleanup
pub struct RetentionScheduler {
    history: Arc<dyn BackupHistory>,
    backups: Arc<BackupService>,
    remote: RemoteStoreHandle,
    archive_dir: Option<String>,
    job: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl RetentionScheduler {
    pub fn new(
        history: Arc<dyn BackupHistory>,
        backups: Arc<BackupService>,
        remote: RemoteStoreHandle,
        archive_dir: Option<String>,
    ) -> Self {
        Self {
            history,
            backups,
            remote,
            archive_dir,
            job: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Load settings, creating and persisting defaults on first access.
    pub async fn settings(&self) -> Result<BackupSettings> {
        if let Some(settings) = self.history.load_settings().await? {
            return Ok(settings);
        }
        let settings = BackupSettings::default();
        self.history.save_settings(&settings).await?;
        tracing::info!("Created default backup settings");
        Ok(settings)
    }

    /// Resolve the remote store and register the job from stored settings.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let settings = self.settings().await?;
        self.remote
            .reconfigure(&settings, self.archive_dir.as_deref())
            .await;
        if let Err(e) = self.register(&settings).await {
            tracing::warn!(error = %e, "Stored backup schedule is invalid, automatic backups not started");
        }
        Ok(())
    }

    /// Merge, validate, and persist a settings change, then re-register.
    pub async fn update_settings(self: &Arc<Self>, update: UpdateSettingsRequest) -> Result<BackupSettings> {
        tracing::debug!(?update, "Updating backup settings");
        let mut settings = self.settings().await?;
        settings.apply(update);

        if settings.retention_days < 1 {
            return Err(AppError::Validation("retentionDays must be at least 1".to_string()));
        }
        if settings.max_backups < 1 {
            return Err(AppError::Validation("maxBackups must be at least 1".to_string()));
        }
        parse_cron(&settings.cron_expression)?;

        self.history.save_settings(&settings).await?;
        self.remote
            .reconfigure(&settings, self.archive_dir.as_deref())
            .await;
        self.register(&settings).await?;
        Ok(settings)
    }

    /// Replace the cron job. Any previous job is cancelled first; a new one
    /// is only spawned when scheduling is active.
    async fn register(self: &Arc<Self>, settings: &BackupSettings) -> Result<()> {
        let mut job = self.job.lock().await;
        if let Some(previous) = job.take() {
            previous.abort();
            tracing::debug!(job = JOB_NAME, "Cancelled previous backup job");
        }

        if !settings.schedule_active() {
            tracing::info!(job = JOB_NAME, "Automatic backups disabled");
            return Ok(());
        }

        let schedule = parse_cron(&settings.cron_expression)?;
        let scheduler = Arc::clone(self);
        let token = self.shutdown.child_token();
        *job = Some(tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    tracing::warn!(job = JOB_NAME, "Cron schedule has no upcoming run");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                // Run in its own task so even a panic leaves the job alive
                let run = Arc::clone(&scheduler);
                if let Err(e) = tokio::spawn(async move { run.run_scheduled().await }).await {
                    tracing::error!(job = JOB_NAME, error = %e, "Scheduled backup task aborted");
                }
            }
        }));

        tracing::info!(
            job = JOB_NAME,
            cron = %settings.cron_expression,
            schedule = ?settings.schedule_kind,
            "Automatic backups scheduled"
        );
        Ok(())
    }

    /// One scheduled run: back up, then prune. Failures are logged only.
    pub async fn run_scheduled(&self) {
        match self.backups.create_backup(None, BackupKind::Scheduled).await {
            Ok(record) => tracing::info!(backup_id = %record.id, "Scheduled backup completed"),
            Err(e) => tracing::error!(error = %e, "Scheduled backup failed"),
        }

        match self.cleanup(Utc::now()).await {
            Ok(report) if report.total() > 0 => tracing::info!(
                removed_by_age = report.removed_by_age.len(),
                removed_by_count = report.removed_by_count.len(),
                "Retention cleanup removed old backups"
            ),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Retention cleanup failed"),
        }
    }

    /// Apply the retention policy as of `now`.
    ///
    /// Remote copies are deleted before history rows. A remote failure is
    /// logged and the row is removed anyway.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let settings = self.settings().await?;
        let completed = self.history.list_completed().await?;
        let report = select_for_removal(&completed, settings.retention_days, settings.max_backups, now);

        let remote = self.remote.current().await;
        for id in report.removed_by_age.iter().chain(&report.removed_by_count) {
            let Some(record) = completed.iter().find(|r| r.id == *id) else {
                continue;
            };
            if let (Some(file_id), Some(remote)) = (&record.remote_file_id, &remote) {
                if let Err(e) = remote.delete(file_id).await {
                    tracing::warn!(backup_id = %id, file_id = %file_id, error = %e, "Failed to delete remote copy");
                }
            }
            self.history.delete(*id).await?;
            tracing::debug!(backup_id = %id, filename = %record.filename, "Pruned backup");
        }
        Ok(report)
    }

    /// Whether a cron job is currently registered.
    pub async fn is_scheduled(&self) -> bool {
        self.job
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the cron job for graceful shutdown.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.job.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backup::BackupState;

    fn completed(id: u128, age_days: i64, now: DateTime<Utc>) -> BackupRecord {
        let created = now - ChronoDuration::days(age_days);
        BackupRecord {
            id: Uuid::from_u128(id),
            filename: format!("backup-{}.ccbak", id),
            remote_file_id: None,
            file_size_bytes: 10,
            total_records: 1,
            entity_counts: serde_json::json!({}),
            format_version: "1.0.0".into(),
            kind: BackupKind::Scheduled,
            state: BackupState::Completed,
            error_message: None,
            created_by: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_parse_cron_accepts_five_fields() {
        assert!(parse_cron("0 2 * * *").is_ok());
        assert!(parse_cron("0 2 * * 0").is_ok());
        assert!(parse_cron("30 4 * * 1-5").is_ok());
        assert!(parse_cron("0 2 * * 5-7").is_ok());
        assert!(parse_cron("0 2 * * 0-7").is_ok());
        assert!(parse_cron("0 0 2 * * * *").is_ok());
        assert!(matches!(parse_cron("every night"), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_weekday_names() {
        assert_eq!(weekday_names("0"), "Sun");
        assert_eq!(weekday_names("7"), "Sun");
        assert_eq!(weekday_names("1-5"), "Mon-Fri");
        assert_eq!(weekday_names("5-7"), "Fri,Sat,Sun");
        assert_eq!(weekday_names("6-7"), "Sat,Sun");
        assert_eq!(weekday_names("0-7"), "Sun,Mon,Tue,Wed,Thu,Fri,Sat");
        assert_eq!(weekday_names("1-7/2"), "Mon,Wed,Fri,Sun");
        assert_eq!(weekday_names("1,5-7"), "Mon,Fri,Sat,Sun");
        assert_eq!(weekday_names("1,3,5"), "Mon,Wed,Fri");
        assert_eq!(weekday_names("*"), "*");
        assert_eq!(weekday_names("*/2"), "*/2");
    }

    #[test]
    fn test_retention_by_age() {
        let now = Utc::now();
        let records = vec![completed(1, 1, now), completed(2, 8, now), completed(3, 20, now)];
        let report = select_for_removal(&records, 7, 10, now);
        assert_eq!(report.removed_by_age, vec![Uuid::from_u128(2), Uuid::from_u128(3)]);
        assert!(report.removed_by_count.is_empty());
    }

    #[test]
    fn test_retention_by_count() {
        let now = Utc::now();
        let records = vec![completed(1, 3, now), completed(2, 1, now), completed(3, 2, now)];
        let report = select_for_removal(&records, 30, 2, now);
        assert!(report.removed_by_age.is_empty());
        assert_eq!(report.removed_by_count, vec![Uuid::from_u128(1)]);
    }

    #[test]
    fn test_both_rules_report_once() {
        let now = Utc::now();
        let records = vec![completed(1, 1, now), completed(2, 40, now), completed(3, 50, now)];
        let report = select_for_removal(&records, 30, 1, now);
        assert_eq!(report.removed_by_age.len(), 2);
        assert!(report.removed_by_count.is_empty());
        assert_eq!(report.total(), 2);
    }
}
