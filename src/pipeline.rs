//! Per-viewer processing session.
//!
//! A `Pipeline` pulls frames from its source and yields one `StreamChunk` per processed frame.
//! Per frame: pace, resize, detect against the reference frame, localise, throttle, dispatch
//! (side effect only), publish.
//!
//! The session ends when the source ends or fails. Nothing that happens downstream of the
//! source can end it.

use anyhow::Result;
use std::time::SystemTime;

use crate::config::PipelineSettings;
use crate::detect::{DifferenceDetector, MotionBackend};
use crate::dispatch::{AlertDispatcher, AlertEvent};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::locate::{Candidate, Localizer};
use crate::pacer::Pacer;
use crate::stream::{StreamChunk, StreamPublisher};
use crate::throttle::AlertThrottler;

/// Mutable state owned by one session.
#[derive(Debug)]
pub struct PipelineState {
    reference_frame: Option<Frame>,
    last_processed_at: Option<SystemTime>,
    throttler: AlertThrottler,
}

impl PipelineState {
    fn new(throttler: AlertThrottler) -> Self {
        Self {
            reference_frame: None,
            last_processed_at: None,
            throttler,
        }
    }

    pub fn reference_frame(&self) -> Option<&Frame> {
        self.reference_frame.as_ref()
    }

    pub fn last_processed_at(&self) -> Option<SystemTime> {
        self.last_processed_at
    }

    pub fn last_alert_at(&self) -> Option<SystemTime> {
        self.throttler.last_alert_at()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_read: u64,
    pub paced_out: u64,
    /// Processed frames that arrived at a different size and were resized.
    pub resized: u64,
    pub processed: u64,
    pub published: u64,
    pub alerts: u64,
}

pub struct Pipeline {
    settings: PipelineSettings,
    source: Box<dyn FrameSource>,
    detector: Box<dyn MotionBackend>,
    pacer: Pacer,
    localizer: Localizer,
    publisher: StreamPublisher,
    dispatcher: AlertDispatcher,
    state: PipelineState,
    stats: PipelineStats,
    finished: bool,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        source: Box<dyn FrameSource>,
        dispatcher: AlertDispatcher,
    ) -> Self {
        let detector = Box::new(DifferenceDetector::new(settings.detection));
        let pacer = Pacer::new(settings.target_fps);
        if !pacer.interval().is_zero() {
            log::debug!("session paced to one frame per {:?}", pacer.interval());
        }
        let localizer = Localizer::new(
            settings.calibration,
            &settings.detection,
            &settings.alerts,
        );
        let publisher = StreamPublisher::new(settings.jpeg_quality);
        let state = PipelineState::new(AlertThrottler::new(settings.alerts.interval));
        Self {
            settings,
            source,
            detector,
            pacer,
            localizer,
            publisher,
            dispatcher,
            state,
            stats: PipelineStats::default(),
            finished: false,
        }
    }

    /// Swap the motion detector, e.g. for a scripted one in tests.
    pub fn with_detector(mut self, detector: Box<dyn MotionBackend>) -> Self {
        log::debug!("session motion detector: {}", detector.name());
        self.detector = detector;
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn pull(&mut self) -> Option<Frame> {
        match self.source.next_frame() {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                log::info!(
                    "session ended: source {} exhausted after {} frames ({} processed, {} alerts)",
                    self.source.stats().source,
                    self.stats.frames_read,
                    self.stats.processed,
                    self.stats.alerts
                );
                None
            }
            Err(e) => {
                log::warn!(
                    "session ended: source {} failed (healthy: {}): {:#}",
                    self.source.stats().source,
                    self.source.is_healthy(),
                    e
                );
                None
            }
        }
    }

    fn normalize(&mut self, frame: Frame) -> Frame {
        let (w, h) = (self.settings.frame_width, self.settings.frame_height);
        if frame.width == w && frame.height == h {
            frame
        } else {
            self.stats.resized += 1;
            frame.resized(w, h)
        }
    }

    /// Run one frame through detection, alerting and publication.
    fn process(&mut self, frame: Frame) -> Option<StreamChunk> {
        let now = frame.captured_at;
        self.stats.processed += 1;
        self.state.last_processed_at = Some(now);

        let candidate = match self.state.reference_frame.as_ref() {
            Some(previous) => {
                let result = self.detector.detect(previous, &frame);
                if result.motion_detected {
                    self.localizer.locate(&result.regions)
                } else {
                    None
                }
            }
            None => None,
        };

        let alert = if self.state.throttler.try_fire(now, candidate.is_some()) {
            candidate
        } else {
            None
        };
        if let Some(candidate) = alert.as_ref() {
            self.raise(&frame, candidate);
        }

        let chunk = match self.publisher.render(&frame, alert.as_ref()) {
            Ok(chunk) => {
                self.stats.published += 1;
                Some(chunk)
            }
            Err(e) => {
                log::warn!("frame not published: {:#}", e);
                None
            }
        };
        self.state.reference_frame = Some(frame);
        chunk
    }

    fn raise(&mut self, frame: &Frame, candidate: &Candidate) {
        self.stats.alerts += 1;
        log::info!(
            "proximity alert: object at {:.2} m (region {}x{} at {},{})",
            candidate.distance_m,
            candidate.region.width,
            candidate.region.height,
            candidate.region.x,
            candidate.region.y
        );
        match self.alert_event(frame, candidate) {
            Ok(event) => {
                self.dispatcher.dispatch(event);
            }
            Err(e) => log::warn!("alert not dispatched: {:#}", e),
        }
    }

    fn alert_event(&self, frame: &Frame, candidate: &Candidate) -> Result<AlertEvent> {
        Ok(AlertEvent {
            timestamp: frame.captured_at,
            distance_m: candidate.distance_m,
            image: frame.encode_jpeg(self.settings.jpeg_quality)?,
        })
    }
}

impl Iterator for Pipeline {
    type Item = StreamChunk;

    fn next(&mut self) -> Option<StreamChunk> {
        while !self.finished {
            let Some(frame) = self.pull() else {
                self.finished = true;
                break;
            };
            self.stats.frames_read += 1;
            // Pace on the capture time so dropped frames never pay for a resize.
            if !self
                .pacer
                .should_process(self.state.last_processed_at, frame.captured_at)
            {
                self.stats.paced_out += 1;
                continue;
            }
            let frame = self.normalize(frame);
            if let Some(chunk) = self.process(frame) {
                return Some(chunk);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingRegion, MotionResult};
    use crate::dispatch::LogSink;
    use crate::frame::PixelLayout;
    use crate::ingest::SourceStats;
    use crate::storage::InMemoryAlertStore;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Script {
        frames: VecDeque<Result<Frame>>,
    }

    impl FrameSource for Script {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            self.frames.pop_front().transpose()
        }

        fn is_healthy(&self) -> bool {
            !self.frames.is_empty()
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: 0,
                source: "script".to_string(),
            }
        }
    }

    /// Reports one large region on every comparison.
    struct AlwaysClose;

    impl MotionBackend for AlwaysClose {
        fn name(&self) -> &'static str {
            "always-close"
        }

        fn detect(&mut self, _previous: &Frame, _current: &Frame) -> MotionResult {
            MotionResult {
                motion_detected: true,
                regions: vec![BoundingRegion {
                    x: 0,
                    y: 0,
                    width: 123,
                    height: 450,
                    area: 55_350,
                }],
            }
        }
    }

    fn frame_at(ms: u64) -> Frame {
        Frame::new(
            vec![0u8; 16 * 12],
            16,
            12,
            PixelLayout::Luma8,
            SystemTime::UNIX_EPOCH + Duration::from_millis(ms),
        )
        .unwrap()
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            frame_width: 16,
            frame_height: 12,
            ..PipelineSettings::default()
        }
    }

    fn pipeline(frames: Vec<Result<Frame>>) -> (Pipeline, InMemoryAlertStore, crate::dispatch::DispatchWorkers) {
        let store = InMemoryAlertStore::new();
        let (dispatcher, workers) =
            AlertDispatcher::spawn(Box::new(store.clone()), Box::new(LogSink), 8).unwrap();
        let source = Script {
            frames: frames.into(),
        };
        (
            Pipeline::new(settings(), Box::new(source), dispatcher),
            store,
            workers,
        )
    }

    #[test]
    fn paced_out_frames_produce_no_chunk() {
        // 30 fps: anything within 33.3 ms of the last processed frame is dropped.
        let (mut p, _store, _workers) =
            pipeline(vec![Ok(frame_at(0)), Ok(frame_at(10)), Ok(frame_at(40))]);
        let chunks: Vec<_> = p.by_ref().collect();
        assert_eq!(chunks.len(), 2);
        let stats = p.stats();
        assert_eq!(stats.frames_read, 3);
        assert_eq!(stats.paced_out, 1);
        assert_eq!(stats.processed, 2);
        assert_eq!(
            p.state().last_processed_at(),
            Some(SystemTime::UNIX_EPOCH + Duration::from_millis(40))
        );
    }

    #[test]
    fn first_frame_is_published_plain_and_kept_as_reference() {
        let (p, _store, _workers) = pipeline(vec![Ok(frame_at(0))]);
        let mut p = p.with_detector(Box::new(AlwaysClose));
        let chunk = p.next().unwrap();
        assert!(!chunk.annotated);
        assert!(p.state().reference_frame().is_some());
        assert_eq!(p.state().last_alert_at(), None);
    }

    #[test]
    fn source_error_ends_the_session() {
        let (mut p, _store, _workers) = pipeline(vec![
            Ok(frame_at(0)),
            Err(anyhow!("camera unplugged")),
            Ok(frame_at(100)),
        ]);
        assert!(p.next().is_some());
        assert!(p.next().is_none());
        assert!(p.is_finished());
        assert!(p.next().is_none());
    }

    #[test]
    fn alert_is_dispatched_and_annotated() {
        let (p, store, workers) = pipeline(vec![Ok(frame_at(0)), Ok(frame_at(100))]);
        let mut p = p.with_detector(Box::new(AlwaysClose));
        let chunks: Vec<_> = p.by_ref().collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].annotated);
        assert_eq!(p.stats().alerts, 1);
        drop(p);
        workers.join().unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn oversized_frames_are_resized() {
        let big = Frame::new(
            vec![0u8; 32 * 24],
            32,
            24,
            PixelLayout::Luma8,
            SystemTime::UNIX_EPOCH,
        )
        .unwrap();
        let (mut p, _store, _workers) = pipeline(vec![Ok(big)]);
        assert!(p.next().is_some());
        let reference = p.state().reference_frame().unwrap();
        assert_eq!((reference.width, reference.height), (16, 12));
        assert_eq!(p.stats().resized, 1);
    }

    #[test]
    fn paced_out_frames_are_not_resized() {
        let big_at = |ms: u64| {
            Frame::new(
                vec![0u8; 32 * 24],
                32,
                24,
                PixelLayout::Luma8,
                SystemTime::UNIX_EPOCH + Duration::from_millis(ms),
            )
        };
        let (mut p, _store, _workers) =
            pipeline(vec![big_at(0), big_at(5), big_at(10), big_at(20), big_at(40)]);
        assert_eq!(p.by_ref().count(), 2);
        let stats = p.stats();
        assert_eq!(stats.paced_out, 3);
        assert_eq!(stats.resized, 2);
    }
}
