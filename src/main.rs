use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use bookings::availability::Availability;
use bookings::config::Config;
use bookings::error::BookingError;
use bookings::notify::{Dispatcher, LogTransport, TemplateSet};
use bookings::reservation::Orchestrator;
use bookings::storage::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    bookings::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(Store::open(config.wal_path())?);

    for (id, name) in &config.rooms {
        match store.create_room(*id, name.clone()).await {
            Ok(_) | Err(BookingError::RoomExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let templates = match &config.mail.templates_dir {
        Some(dir) => TemplateSet::load_dir(dir)?,
        None => TemplateSet::builtin(),
    };
    let dispatcher = Arc::new(Dispatcher::start(
        Arc::new(LogTransport),
        templates,
        &config.mail,
    ));

    // Entry points for a presentation layer.
    let availability = Availability::new(store.clone());
    let orchestrator = Orchestrator::new(store.clone(), dispatcher.clone(), &config);

    let shutdown_token = CancellationToken::new();
    let compactor = tokio::spawn(bookings::compactor::run_compactor(
        store.clone(),
        config.compact_threshold,
        config.compact_interval,
        shutdown_token.clone(),
    ));

    info!("bookings engine ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {:?}", store.room_ids());
    info!("  reservations on file: {}", orchestrator.reservations().await.len());
    let today = chrono::Local::now().date_naive();
    if let Some(tomorrow) = today.succ_opt() {
        info!("  free tonight: {:?}", availability.search_available_rooms(today, tomorrow).await?);
    }
    info!("  storage_timeout: {:?}", config.storage_timeout);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown on SIGTERM/ctrl-c: stop background work, drain queued mail
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    shutdown_token.cancel();
    let _ = compactor.await;
    if !dispatcher.shutdown(config.shutdown_grace).await {
        tracing::warn!("some notifications were not delivered before shutdown");
    }

    info!("bookings stopped");
    Ok(())
}
