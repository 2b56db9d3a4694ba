//! OpenAPI specification generated from handler annotations via utoipa.

use utoipa::OpenApi;

/// Top-level OpenAPI document for the POS Keeper data interchange API.
///
/// Each handler module contributes its own paths and schemas through a
/// per-module `#[derive(OpenApi)]` struct merged in [`build_openapi`].
#[derive(OpenApi)]
#[openapi(
    info(
        title = "POS Keeper Data API",
        description = "Backup, restore, spreadsheet export and import for POS Keeper.",
        version = "0.4.0",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Current server"),
    ),
    tags(
        (name = "backup", description = "Backups, restore, retention settings"),
        (name = "export", description = "Spreadsheet export and import templates"),
        (name = "import", description = "Spreadsheet validation and import"),
    ),
    components(schemas(ErrorResponse))
)]
pub struct ApiDoc;

/// Standard error response body returned by all endpoints on failure.
#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g. "NOT_FOUND", "VALIDATION_ERROR")
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// Build the merged OpenAPI document from all handler modules.
pub fn build_openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.merge(super::handlers::backup::BackupApiDoc::openapi());
    doc.merge(super::handlers::export::ExportApiDoc::openapi());
    doc.merge(super::handlers::import::ImportApiDoc::openapi());
    doc
}
