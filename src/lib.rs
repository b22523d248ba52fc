//! Proximity Guard
//!
//! This crate watches a live camera stream for moving objects that come too close, raises
//! rate-limited alerts for them, and re-serves the annotated stream to viewers.
//!
//! # Architecture
//!
//! Each viewer session is one sequential pipeline, pulled one frame at a time:
//!
//! 1. **Ingest**: a `FrameSource` yields decoded frames (MJPEG over HTTP, RTSP, or synthetic).
//! 2. **Pace**: frames arriving faster than the target rate are dropped.
//! 3. **Detect**: background differencing against the previous processed frame.
//! 4. **Locate**: the first large region inside the safety band becomes the alert candidate.
//! 5. **Throttle**: at most one alert per cool-down interval.
//! 6. **Dispatch**: persistence and notification run on their own workers, off the frame loop.
//! 7. **Publish**: every processed frame becomes one multipart JPEG chunk.
//!
//! # Module Structure
//!
//! - `frame`: immutable frames and JPEG codec helpers
//! - `ingest`: frame sources
//! - `pacer`, `detect`, `locate`, `throttle`: per-frame decisions
//! - `dispatch`, `storage`: alert side effects
//! - `stream`, `pipeline`, `api`: the published stream and the front door serving it

pub mod api;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod frame;
pub mod ingest;
pub mod locate;
pub mod pacer;
pub mod pipeline;
pub mod storage;
pub mod stream;
pub mod throttle;

pub use api::{ServerConfig, ServerHandle, SessionFactory, StreamServer};
pub use config::{
    AlertSettings, Calibration, DetectionSettings, GuardConfig, PipelineSettings, SourceSettings,
    TelegramSettings,
};
pub use detect::{BoundingRegion, DifferenceDetector, MotionBackend, MotionResult};
pub use dispatch::{
    AlertDispatcher, AlertEvent, DispatchOutcome, DispatchWorkers, LogSink, NotificationSink,
    TelegramSink,
};
pub use frame::{Frame, PixelLayout};
pub use ingest::{open_source, FrameSource, MjpegSource, SourceStats, SyntheticSource};
#[cfg(feature = "rtsp-gstreamer")]
pub use ingest::RtspSource;
pub use locate::{estimate_distance, focal_length_from_reference, Candidate, DistanceEstimate, Localizer};
pub use pacer::Pacer;
pub use pipeline::{Pipeline, PipelineState, PipelineStats};
pub use storage::{AlertStore, InMemoryAlertStore, SqliteAlertStore, StoredAlert};
pub use stream::{StreamChunk, StreamPublisher};
pub use throttle::{AlertThrottler, ThrottleState};

/// Build the notification sink for a configuration: Telegram when configured, the log otherwise.
pub fn notification_sink(telegram: Option<&TelegramSettings>) -> Box<dyn NotificationSink> {
    match telegram {
        Some(settings) => Box::new(TelegramSink::new(settings)),
        None => {
            log::warn!("telegram is not configured; alerts will only be logged");
            Box::new(LogSink)
        }
    }
}
