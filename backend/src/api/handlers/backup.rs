//! Backup, restore, and backup settings handlers.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, OpenApi};
use uuid::Uuid;

use crate::api::{Actor, SharedState};
use crate::error::Result;
use crate::models::backup::{BackupKind, BackupRecord, BackupSettings, UpdateSettingsRequest};
use crate::services::backup_service::{BackupHistoryPage, DriveStatus};
use crate::services::restore_service::{RestorePreview, RestoreSummary};

/// Create backup routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/create", post(create_backup))
        .route("/history", get(list_history))
        .route("/history/:id", get(get_backup).delete(delete_backup))
        .route("/restore/:id", post(restore_backup))
        .route("/restore/:id/preview", get(preview_restore))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/drive-status", get(drive_status))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// 1-based page number
    pub page: Option<i64>,
    /// Page size, at most 100
    pub limit: Option<i64>,
}

/// Run a manual backup
#[utoipa::path(
    post,
    path = "/create",
    context_path = "/api/v1/backup",
    tag = "backup",
    responses(
        (status = 201, description = "Backup completed", body = BackupRecord),
        (status = 409, description = "Another backup, restore, or import is running"),
        (status = 500, description = "Backup failed; the history row is marked failed")
    )
)]
pub async fn create_backup(
    State(state): State<SharedState>,
    actor: Option<Extension<Actor>>,
) -> Result<(StatusCode, Json<BackupRecord>)> {
    let created_by = actor.map(|Extension(a)| a.user_id);
    let record = state
        .backups
        .create_backup(created_by, BackupKind::Manual)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// List backup history, newest first
#[utoipa::path(
    get,
    path = "/history",
    context_path = "/api/v1/backup",
    tag = "backup",
    params(HistoryQuery),
    responses(
        (status = 200, description = "History page", body = BackupHistoryPage)
    )
)]
pub async fn list_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<BackupHistoryPage>> {
    let page = state
        .backups
        .list(query.page.unwrap_or(1), query.limit.unwrap_or(20))
        .await?;
    Ok(Json(page))
}

/// Get one history row
#[utoipa::path(
    get,
    path = "/history/{id}",
    context_path = "/api/v1/backup",
    tag = "backup",
    params(("id" = Uuid, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "Backup record", body = BackupRecord),
        (status = 404, description = "Backup not found")
    )
)]
pub async fn get_backup(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackupRecord>> {
    Ok(Json(state.backups.get(id).await?))
}

/// Delete a backup and its remote copy
#[utoipa::path(
    delete,
    path = "/history/{id}",
    context_path = "/api/v1/backup",
    tag = "backup",
    params(("id" = Uuid, Path, description = "Backup ID")),
    responses(
        (status = 204, description = "Backup deleted"),
        (status = 404, description = "Backup not found")
    )
)]
pub async fn delete_backup(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.backups.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replace all data with the contents of a backup
#[utoipa::path(
    post,
    path = "/restore/{id}",
    context_path = "/api/v1/backup",
    tag = "backup",
    params(("id" = Uuid, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "Restore committed", body = RestoreSummary),
        (status = 400, description = "Backup is not restorable"),
        (status = 404, description = "Backup not found"),
        (status = 409, description = "Another backup, restore, or import is running"),
        (status = 422, description = "Archive failed its integrity check")
    )
)]
pub async fn restore_backup(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RestoreSummary>> {
    Ok(Json(state.restores.restore(id).await?))
}

/// Download and verify an archive without restoring it
#[utoipa::path(
    get,
    path = "/restore/{id}/preview",
    context_path = "/api/v1/backup",
    tag = "backup",
    params(("id" = Uuid, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "Archive metadata", body = RestorePreview),
        (status = 400, description = "Backup is not restorable"),
        (status = 404, description = "Backup not found"),
        (status = 422, description = "Archive failed its integrity check")
    )
)]
pub async fn preview_restore(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RestorePreview>> {
    Ok(Json(state.restores.preview(id).await?))
}

/// Current backup settings
#[utoipa::path(
    get,
    path = "/settings",
    context_path = "/api/v1/backup",
    tag = "backup",
    responses(
        (status = 200, description = "Backup settings", body = BackupSettings)
    )
)]
pub async fn get_settings(State(state): State<SharedState>) -> Result<Json<BackupSettings>> {
    Ok(Json(state.scheduler.settings().await?))
}

/// Update backup settings and reschedule
#[utoipa::path(
    put,
    path = "/settings",
    context_path = "/api/v1/backup",
    tag = "backup",
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Updated settings", body = BackupSettings),
        (status = 400, description = "Invalid settings")
    )
)]
pub async fn update_settings(
    State(state): State<SharedState>,
    Json(payload): Json<UpdateSettingsRequest>,
) -> Result<Json<BackupSettings>> {
    Ok(Json(state.scheduler.update_settings(payload).await?))
}

/// Remote archive store status
#[utoipa::path(
    get,
    path = "/drive-status",
    context_path = "/api/v1/backup",
    tag = "backup",
    responses(
        (status = 200, description = "Remote store status", body = DriveStatus)
    )
)]
pub async fn drive_status(State(state): State<SharedState>) -> Json<DriveStatus> {
    Json(state.backups.drive_status().await)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        create_backup,
        list_history,
        get_backup,
        delete_backup,
        restore_backup,
        preview_restore,
        get_settings,
        update_settings,
        drive_status,
    ),
    components(schemas(
        BackupRecord,
        BackupHistoryPage,
        BackupSettings,
        UpdateSettingsRequest,
        RestorePreview,
        RestoreSummary,
        DriveStatus,
    ))
)]
pub struct BackupApiDoc;
