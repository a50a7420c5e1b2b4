//! Binary entry point: loads configuration and `.env` files, wires up the
//! SQLite-backed batch state store, and runs both the HTTP surface (§6)
//! and the batch scheduler's alarm loop (§4.J, §5) side by side.

use std::path::Path;
use std::sync::Arc;

use organizer_core::batch::{self, BatchRuntime};
use organizer_core::config::Config;
use organizer_core::db;
use organizer_core::entity_store::EntityStoreClient;
use organizer_core::http::{self, AppState};
use organizer_core::llm_client::LlmClient;
use tracing::{error, info};

fn load_env_files() {
    let cwd = std::env::current_dir().unwrap_or_default();
    let _ = dotenvy::from_path(cwd.join(".env"));
    let _ = dotenvy::from_path(cwd.join(".env.local"));
}

#[tokio::main]
async fn main() {
    load_env_files();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("organizer_core=info")),
        )
        .with_target(false)
        .init();

    let config = Arc::new(Config::from_env());

    let pool = db::connect_pool(Path::new(&config.database_path))
        .await
        .unwrap_or_else(|err| {
            error!(error = %err, "failed to connect to SQLite");
            std::process::exit(1);
        });
    db::run_migrations(&pool).await.unwrap_or_else(|err| {
        error!(error = %err, "failed to run migrations");
        std::process::exit(1);
    });

    let entity_store = Arc::new(
        EntityStoreClient::new(
            config.entity_store_base.clone(),
            config.entity_store_request_timeout,
        )
        .expect("entity store client"),
    );

    let llm = Arc::new(
        LlmClient::new(
            config.llm_api_base.clone(),
            config.llm_api_key.clone(),
            config.model_name.clone(),
            config.llm_input_price_per_1m,
            config.llm_output_price_per_1m,
            config.llm_request_timeout,
        )
        .expect("llm client"),
    );

    let callback_client = Arc::new(
        organizer_core::callback::CallbackClient::new(config.orchestrator_callback_base.clone())
            .expect("callback client"),
    );

    let runtime = BatchRuntime {
        pool,
        config: config.clone(),
        entity_store,
        llm,
        callback_client,
    };

    let scheduler_runtime = runtime.clone();
    let alarm_interval = config.alarm_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(alarm_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = batch::run_alarm_tick(&scheduler_runtime).await {
                error!(error = %err, "alarm tick failed");
            }
        }
    });

    let app = http::router(AppState { runtime });

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr)
        .await
        .unwrap_or_else(|err| {
            error!(addr = %config.http_bind_addr, error = %err, "failed to bind HTTP listener");
            std::process::exit(1);
        });

    info!(addr = %config.http_bind_addr, "organizer-service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}
