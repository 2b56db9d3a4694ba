//! API module - HTTP handlers and middleware.

pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::schema::SchemaRegistry;
use crate::services::backup_service::BackupService;
use crate::services::export_service::ExportService;
use crate::services::import_service::ImportService;
use crate::services::operation_guard::OperationGuard;
use crate::services::restore_service::RestoreService;
use crate::services::scheduler_service::RetentionScheduler;
use crate::storage::RemoteStoreHandle;
use crate::store::{BackupHistory, EntityStore};

pub use middleware::context::Actor;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<SchemaRegistry>,
    pub backups: Arc<BackupService>,
    pub restores: Arc<RestoreService>,
    pub scheduler: Arc<RetentionScheduler>,
    pub exports: Arc<ExportService>,
    pub imports: Arc<ImportService>,
    pub guard: OperationGuard,
    /// Cancelled on shutdown; long exports and imports observe it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire every service over one entity store and history store.
    pub fn new(
        config: Config,
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn EntityStore>,
        history: Arc<dyn BackupHistory>,
    ) -> Self {
        let remote = RemoteStoreHandle::default();
        let guard = OperationGuard::new();

        let backups = Arc::new(BackupService::new(
            registry.clone(),
            store.clone(),
            history.clone(),
            remote.clone(),
            guard.clone(),
            config.table_prefix.clone(),
        ));
        let restores = Arc::new(RestoreService::new(
            registry.clone(),
            store.clone(),
            history.clone(),
            remote.clone(),
            guard.clone(),
        ));
        let scheduler = Arc::new(RetentionScheduler::new(
            history,
            backups.clone(),
            remote,
            config.backup_archive_dir.clone(),
        ));
        let exports = Arc::new(ExportService::new(registry.clone(), store.clone()));
        let imports = Arc::new(ImportService::new(registry.clone(), store, guard.clone()));

        Self {
            config,
            registry,
            backups,
            restores,
            scheduler,
            exports,
            imports,
            guard,
            shutdown: CancellationToken::new(),
        }
    }
}

pub type SharedState = Arc<AppState>;
