use domain::Integrations;
use log::{error, info};
use migration::{Migrator, MigratorTrait};
use service::{config::Config, logging::Logger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    info!(
        "Starting accounting sync in {} mode",
        config.runtime_env()
    );

    let db = match service::init_database(&config).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to establish database connection: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = Migrator::up(&*db, None).await {
        error!("Failed to run database migrations: {e}");
        std::process::exit(1);
    }

    let integrations = match Integrations::from_config(&config, Arc::clone(&db)) {
        Ok(integrations) => integrations,
        Err(e) => {
            error!("Failed to configure integrations: {e}");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = integrations
        .sweeper()
        .spawn(Duration::from_secs(config.sweep_interval_secs), shutdown_rx);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutting down");
    // Receivers only disappear once the sweeper has already stopped.
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        error!("Token sweeper task failed: {e}");
    }
}
