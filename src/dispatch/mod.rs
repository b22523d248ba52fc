//! Alert dispatch.
//!
//! An approved alert becomes an `AlertEvent` that is handed to two independent workers:
//! - the persistence worker saves it to the `AlertStore`
//! - the notification worker sends a text and then the photo to the `NotificationSink`
//!
//! Hand-off goes through bounded queues with `try_send`, so the frame loop never waits on
//! either worker. A full queue drops the event for that worker only. Worker failures are
//! logged and swallowed; nothing here can end a pipeline session.

pub mod telegram;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;

use crate::storage::AlertStore;

pub use telegram::TelegramSink;

pub const ALERT_PHOTO_FILENAME: &str = "image.jpg";
pub const ALERT_PHOTO_MIME: &str = "image/jpeg";

/// An approved alert. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertEvent {
    pub timestamp: SystemTime,
    pub distance_m: f64,
    /// JPEG of the frame that triggered the alert, without annotations.
    pub image: Vec<u8>,
}

/// External channel that receives alert notifications.
pub trait NotificationSink: Send {
    fn send_text(&mut self, message: &str) -> Result<()>;

    fn send_photo(&mut self, image: &[u8], filename: &str, mime: &str) -> Result<()>;
}

/// Sink used when no external channel is configured. Alerts only reach the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send_text(&mut self, message: &str) -> Result<()> {
        log::info!("alert notification: {}", message.replace('\n', " "));
        Ok(())
    }

    fn send_photo(&mut self, image: &[u8], filename: &str, _mime: &str) -> Result<()> {
        log::info!("alert photo {} ({} bytes) not forwarded", filename, image.len());
        Ok(())
    }
}

pub fn alert_message(event: &AlertEvent) -> String {
    let local: DateTime<Local> = event.timestamp.into();
    format!(
        "Alert! Unsafe condition detected.\nMotion detected at {}.\nDistance to object: {:.2} meters.",
        local.format("%Y-%m-%d %H:%M:%S"),
        event.distance_m
    )
}

/// Which workers accepted an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub store_queued: bool,
    pub notify_queued: bool,
}

/// Cloneable handle feeding the dispatch workers. Workers exit once every handle is dropped.
#[derive(Clone, Debug)]
pub struct AlertDispatcher {
    store_tx: SyncSender<Arc<AlertEvent>>,
    notify_tx: SyncSender<Arc<AlertEvent>>,
}

/// Join handles for the two dispatch workers.
#[derive(Debug)]
pub struct DispatchWorkers {
    store: Option<JoinHandle<()>>,
    notify: Option<JoinHandle<()>>,
}

impl AlertDispatcher {
    pub fn spawn(
        store: Box<dyn AlertStore>,
        sink: Box<dyn NotificationSink>,
        queue_capacity: usize,
    ) -> Result<(Self, DispatchWorkers)> {
        let capacity = queue_capacity.max(1);
        let (store_tx, store_rx) = sync_channel(capacity);
        let (notify_tx, notify_rx) = sync_channel(capacity);

        let store_handle = std::thread::Builder::new()
            .name("alert-store".to_string())
            .spawn(move || run_store_worker(store, store_rx))
            .context("spawn alert persistence worker")?;
        let notify_handle = std::thread::Builder::new()
            .name("alert-notify".to_string())
            .spawn(move || run_notify_worker(sink, notify_rx))
            .context("spawn alert notification worker")?;

        Ok((
            Self {
                store_tx,
                notify_tx,
            },
            DispatchWorkers {
                store: Some(store_handle),
                notify: Some(notify_handle),
            },
        ))
    }

    /// Queue an event for both workers without blocking.
    pub fn dispatch(&self, event: AlertEvent) -> DispatchOutcome {
        let event = Arc::new(event);
        DispatchOutcome {
            store_queued: offer(&self.store_tx, &event, "persistence"),
            notify_queued: offer(&self.notify_tx, &event, "notification"),
        }
    }
}

impl DispatchWorkers {
    /// Wait for both workers to drain their queues. Every `AlertDispatcher` handle must have
    /// been dropped first, otherwise this blocks.
    pub fn join(mut self) -> Result<()> {
        let mut failed = Vec::new();
        if let Some(handle) = self.store.take() {
            if handle.join().is_err() {
                failed.push("persistence");
            }
        }
        if let Some(handle) = self.notify.take() {
            if handle.join().is_err() {
                failed.push("notification");
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("dispatch worker panicked: {}", failed.join(", ")))
        }
    }
}

fn offer(tx: &SyncSender<Arc<AlertEvent>>, event: &Arc<AlertEvent>, worker: &str) -> bool {
    match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::warn!("{} queue full; alert dropped for that worker", worker);
            false
        }
        Err(TrySendError::Disconnected(_)) => {
            log::warn!("{} worker gone; alert dropped for that worker", worker);
            false
        }
    }
}

fn run_store_worker(mut store: Box<dyn AlertStore>, rx: Receiver<Arc<AlertEvent>>) {
    for event in rx {
        match store.save(event.timestamp, event.distance_m, &event.image) {
            Ok(id) => log::info!("alert #{} stored ({:.2} m)", id, event.distance_m),
            Err(e) => log::warn!("alert record not stored: {:#}", e),
        }
    }
}

fn run_notify_worker(mut sink: Box<dyn NotificationSink>, rx: Receiver<Arc<AlertEvent>>) {
    for event in rx {
        let message = alert_message(&event);
        // Text and photo are separate requests; one failing does not skip the other.
        if let Err(e) = sink.send_text(&message) {
            log::warn!("alert message not delivered: {:#}", e);
        }
        if let Err(e) = sink.send_photo(&event.image, ALERT_PHOTO_FILENAME, ALERT_PHOTO_MIME) {
            log::warn!("alert photo not delivered: {:#}", e);
        }
    }
}
