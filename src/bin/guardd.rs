//! guardd - Proximity Guard daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by GUARD_CONFIG, then GUARD_* overrides)
//! 2. Opens the alert database and the notification channel
//! 3. Starts the alert dispatch workers
//! 4. Serves the live video feed; every viewer gets its own pipeline session
//! 5. Drains pending alerts on Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::sync::Arc;

use proximity_guard::{
    notification_sink, open_source, AlertDispatcher, GuardConfig, Pipeline, ServerConfig,
    SessionFactory, SqliteAlertStore, StreamServer,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = GuardConfig::load()?;
    log::info!(
        "guardd {} starting: alerts at <= {:.2} m, cool-down {:?}, {} fps",
        env!("CARGO_PKG_VERSION"),
        config.pipeline.alerts.max_distance_m,
        config.pipeline.alerts.interval,
        config.pipeline.target_fps
    );

    let store = SqliteAlertStore::open(&config.db_path)?;
    let reader = SqliteAlertStore::open(&config.db_path)?;
    let sink = notification_sink(config.telegram.as_ref());
    let (dispatcher, workers) = AlertDispatcher::spawn(
        Box::new(store),
        sink,
        config.pipeline.alerts.queue_capacity,
    )?;

    let sessions: SessionFactory = {
        let dispatcher = dispatcher.clone();
        let source = config.source.clone();
        let pipeline = config.pipeline;
        Arc::new(move || -> Result<Pipeline> {
            let frames = open_source(&source)?;
            Ok(Pipeline::new(pipeline.clone(), frames, dispatcher.clone()))
        })
    };
    let server = StreamServer::new(
        ServerConfig {
            addr: config.http_addr.clone(),
        },
        sessions,
    )
    .with_alert_store(Box::new(reader));
    let handle = server.spawn()?;
    log::info!(
        "guardd running. video feed at http://{}/video-feed, alerts in {}",
        handle.addr,
        config.db_path
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("guardd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping front door...");
    handle.stop()?;

    drop(dispatcher);
    log::info!("draining pending alerts...");
    workers.join()?;
    Ok(())
}
