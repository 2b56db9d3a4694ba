//! Spreadsheet import handlers.

use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use utoipa::{OpenApi, ToSchema};

use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::interchange::{
    ImportDiagnostic, ImportMode, ImportOptions, ImportPreview, ImportResult, RowOutcome,
    SheetPreview, SheetResult,
};
use crate::schema::parse_boolean;

/// Create import routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/preview", post(preview_import))
        .route("/execute", post(execute_import))
}

/// Multipart body accepted by both import endpoints
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ImportUpload {
    /// `.xlsx` workbook
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    /// `insert` (default) or `upsert`; execute only
    mode: Option<String>,
    /// Continue past failing rows; execute only
    skip_errors: Option<bool>,
}

#[derive(Debug)]
pub(crate) struct ImportForm {
    pub file: Bytes,
    pub options: ImportOptions,
}

/// Collect the `file`, `mode`, and `skip_errors` fields.
pub(crate) async fn read_form(mut multipart: Multipart) -> Result<ImportForm> {
    let mut file: Option<Bytes> = None;
    let mut options = ImportOptions {
        mode: ImportMode::Insert,
        skip_errors: false,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                file = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::Validation(format!("Failed to read file: {}", e)))?,
                );
            }
            "mode" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read mode: {}", e)))?;
                options.mode = ImportMode::parse(&raw).ok_or_else(|| {
                    AppError::Validation(format!("mode must be insert or upsert, got '{}'", raw))
                })?;
            }
            "skip_errors" => {
                let raw = field.text().await.map_err(|e| {
                    AppError::Validation(format!("Failed to read skip_errors: {}", e))
                })?;
                options.skip_errors = parse_boolean(raw.trim()).ok_or_else(|| {
                    AppError::Validation(format!("skip_errors must be a boolean, got '{}'", raw))
                })?;
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::Validation("Missing file field".to_string()))?;
    if file.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }
    Ok(ImportForm { file, options })
}

/// Validate a workbook without writing anything
#[utoipa::path(
    post,
    path = "/preview",
    context_path = "/api/v1/import",
    tag = "import",
    request_body(content = ImportUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Validation report", body = ImportPreview),
        (status = 400, description = "Missing or unreadable workbook")
    )
)]
pub async fn preview_import(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<ImportPreview>> {
    let form = read_form(multipart).await?;
    let imports = state.imports.clone();
    // Workbook parsing is CPU-bound.
    let preview = tokio::task::spawn_blocking(move || imports.parse_and_preview(&form.file))
        .await
        .map_err(|e| AppError::Internal(format!("Preview task failed: {}", e)))??;
    Ok(Json(preview))
}

/// Import a workbook in one transaction
#[utoipa::path(
    post,
    path = "/execute",
    context_path = "/api/v1/import",
    tag = "import",
    request_body(content = ImportUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Import committed", body = ImportResult),
        (status = 400, description = "Invalid rows or unreadable workbook; nothing committed"),
        (status = 409, description = "Another backup, restore, or import is running")
    )
)]
pub async fn execute_import(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<ImportResult>> {
    let form = read_form(multipart).await?;
    let cancel = state.shutdown.child_token();
    let result = state
        .imports
        .execute_import(&form.file, form.options, &cancel)
        .await?;
    Ok(Json(result))
}

#[derive(OpenApi)]
#[openapi(
    paths(preview_import, execute_import),
    components(schemas(
        ImportUpload,
        ImportMode,
        ImportPreview,
        SheetPreview,
        ImportDiagnostic,
        ImportResult,
        SheetResult,
        RowOutcome,
    ))
)]
pub struct ImportApiDoc;
