use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use shelterwalk::clock::{Clock, SystemClock};
use shelterwalk::config::AppConfig;
use shelterwalk::db;
use shelterwalk::handlers;
use shelterwalk::scheduler;
use shelterwalk::services::holidays::FeiertageApi;
use shelterwalk::services::notify::webhook::WebhookNotifier;
use shelterwalk::services::notify::{LogNotifier, Notifier};
use shelterwalk::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let store = db::connect(&config.database_url).await?;
    tracing::info!(backend = store.backend().as_str(), "storage ready");

    let notifier: Arc<dyn Notifier> = if config.notify_webhook_url.is_empty() {
        tracing::info!("no NOTIFY_WEBHOOK_URL set, logging booking events");
        Arc::new(LogNotifier)
    } else {
        tracing::info!(url = %config.notify_webhook_url, "posting booking events to webhook");
        Arc::new(WebhookNotifier::new(config.notify_webhook_url.clone()))
    };
    let calendar = Arc::new(FeiertageApi::new(config.holiday_api_url.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let state = Arc::new(AppState::new(
        store,
        clock.clone(),
        calendar,
        notifier,
        config.clone(),
    ));
    let scheduler = scheduler::start(state.engine.clone(), clock, &config).await;

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown signal received");
}
