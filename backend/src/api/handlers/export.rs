//! Spreadsheet export and template handlers.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use utoipa::OpenApi;

use crate::api::SharedState;
use crate::error::Result;
use crate::models::interchange::GroupInfo;
use crate::services::export_service::ExportRequest;
use crate::services::spreadsheet::XLSX_CONTENT_TYPE;

/// Create export routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/groups", get(list_groups))
        .route("/excel", post(export_excel))
        .route("/template/:group", get(download_template))
}

/// Workbook download response.
pub(crate) fn workbook_response(filename: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}

/// Export groups with live record counts
#[utoipa::path(
    get,
    path = "/groups",
    context_path = "/api/v1/export",
    tag = "export",
    responses(
        (status = 200, description = "Export groups", body = Vec<GroupInfo>)
    )
)]
pub async fn list_groups(State(state): State<SharedState>) -> Result<Json<Vec<GroupInfo>>> {
    Ok(Json(state.exports.get_groups().await?))
}

/// Export the requested groups as one workbook
#[utoipa::path(
    post,
    path = "/excel",
    context_path = "/api/v1/export",
    tag = "export",
    request_body = ExportRequest,
    responses(
        (status = 200, description = "Workbook", content_type = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        (status = 400, description = "Unknown group or invalid date range")
    )
)]
pub async fn export_excel(
    State(state): State<SharedState>,
    Json(payload): Json<ExportRequest>,
) -> Result<Response> {
    let cancel = state.shutdown.child_token();
    let bytes = state.exports.export_to_excel(&payload, &cancel).await?;
    let filename = format!("export-{}.xlsx", Utc::now().format("%Y%m%d-%H%M%S"));
    Ok(workbook_response(&filename, bytes))
}

/// Header-only import template for one group
#[utoipa::path(
    get,
    path = "/template/{group}",
    context_path = "/api/v1/export",
    tag = "export",
    params(("group" = String, Path, description = "Export group name")),
    responses(
        (status = 200, description = "Template workbook", content_type = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        (status = 400, description = "Unknown group")
    )
)]
pub async fn download_template(
    State(state): State<SharedState>,
    Path(group): Path<String>,
) -> Result<Response> {
    let bytes = state.exports.generate_template(&group)?;
    let filename = format!("{}-template.xlsx", group.trim().to_ascii_lowercase());
    Ok(workbook_response(&filename, bytes))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_groups, export_excel, download_template),
    components(schemas(GroupInfo, ExportRequest))
)]
pub struct ExportApiDoc;
