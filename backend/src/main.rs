//! POS Keeper - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use pos_keeper_backend::{
    api,
    config::Config,
    db,
    error::{AppError, Result},
    schema::SchemaRegistry,
    store::{PgBackupHistory, PgEntityStore},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    telemetry::init_tracing(config.log_json);
    tracing::info!(config = ?config, "Starting POS Keeper data service");

    // Validates the relation graph before anything touches the database
    let registry = Arc::new(SchemaRegistry::builtin()?);
    tracing::info!(
        entities = registry.mappings().len(),
        junctions = registry.junction_tables().len(),
        "Schema registry loaded"
    );

    // Connect to database
    let db_pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;
    tracing::info!("Database migrations complete");

    let store = Arc::new(PgEntityStore::new(db_pool.clone(), config.table_prefix.clone()));
    let history = Arc::new(PgBackupHistory::new(db_pool));
    let state = Arc::new(api::AppState::new(config.clone(), registry, store, history));

    // Resolve the archive store and register the backup schedule
    state.scheduler.start().await?;

    let app = api::routes::create_router(state.clone())
        .layer({
            // The admin frontend runs on its own port in development.
            if std::env::var("ENVIRONMENT").unwrap_or_default() == "development" {
                let origins = std::env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000".into())
                    .split(',')
                    .map(|s| {
                        s.trim()
                            .parse()
                            .map_err(|_| AppError::Config(format!("invalid CORS origin '{}'", s)))
                    })
                    .collect::<Result<Vec<HeaderValue>>>()?;
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
                    .allow_credentials(true)
            } else {
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        })
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, then stop background work.
async fn shutdown_signal(state: api::SharedState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    state.shutdown.cancel();
    state.scheduler.shutdown().await;
}
