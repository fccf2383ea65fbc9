mod config;
mod error;
mod services;
mod state;

use clap::Parser;
use config::ServerConfig;
use services::Limits;
use state::AppState;
use std::sync::Arc;
use supervisor::{preprocess::Preprocessor, store::DatasetStore, Supervisor, SupervisorConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "supervisor=info,server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();
    serve(config).await
}

async fn serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = DatasetStore::open(config.data_dir.clone()).await?;

    let mut supervisor_config =
        SupervisorConfig::new(config.inference_command.clone(), config.worker_dir.clone());
    supervisor_config.stop_grace = config.stop_grace();
    let supervisor = Supervisor::spawn(store.clone(), supervisor_config);

    let preprocessor = Preprocessor::new(
        config.preprocess_command.clone(),
        config.worker_dir.clone(),
        config.preprocess_timeout(),
    );

    let state = AppState {
        store,
        supervisor: supervisor.clone(),
        preprocessor: Arc::new(preprocessor),
    };
    let app = services::router(
        state,
        Limits {
            request_timeout: config.request_timeout(),
            max_body_bytes: config.max_body_bytes(),
        },
    );

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, data_dir = %config.data_dir.display(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if config.stop_workers_on_exit {
        for (dataset_id, outcome) in supervisor.stop_all().await? {
            match outcome {
                Ok(outcome) => tracing::info!(%dataset_id, ?outcome, "worker stopped on exit"),
                Err(err) => {
                    tracing::warn!(%dataset_id, error = %err, "could not stop worker on exit")
                }
            }
        }
    } else {
        tracing::info!("leaving inference workers running");
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
