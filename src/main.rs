use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};

use procurest_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = api::config::load_config()?;
    api::logging::init_tracing(&config);

    let db_pool = api::db::establish_connection_from_app_config(&config).await?;
    if config.auto_migrate {
        api::db::ensure_schema(&db_pool).await.map_err(|e| {
            error!("Schema setup failed: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    let (event_sender, event_rx) = api::events::event_channel(config.event_channel_capacity);
    let state = api::AppState::new(db.clone(), config.clone(), event_sender.clone());

    let handlers: Vec<Box<dyn api::events::EventHandler>> = vec![Box::new(
        api::notifications::NotificationEventHandler::new(
            Arc::new(state.notification_dispatcher()),
            config.procurement_recipients(),
        ),
    )];
    let event_worker = tokio::spawn(api::events::process_events(event_rx, handlers));

    let scheduler = state.alert_scheduler();
    scheduler.start().await;
    info!(environment = %config.environment, "Procurest worker running");

    shutdown_signal().await;
    info!("Shutdown signal received");

    scheduler.shutdown().await;

    // The event worker exits once every sender handle is gone.
    drop(scheduler);
    drop(state);
    drop(event_sender);
    if let Err(e) = event_worker.await {
        error!("Event worker terminated abnormally: {}", e);
    }

    if let Ok(pool) = Arc::try_unwrap(db) {
        if let Err(e) = api::db::close_pool(pool).await {
            error!("Failed to close database pool: {}", e);
        }
    }
    info!("Procurest worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install terminate signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
