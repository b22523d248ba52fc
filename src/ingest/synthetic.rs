//! Synthetic `stub://` frame source.
//!
//! URL form: `stub://<name>?frames=N&fps=F&width=W&height=H&period=P`. Every parameter is
//! optional. `frames` bounds the stream (unbounded when absent or 0), `fps` throttles delivery
//! like a live camera (no throttling at 0).
//!
//! The scene is a flat background. During the second half of every `period` frames a large
//! bright block sits left of centre, which is close and wide enough to raise a proximity alert
//! under the default calibration.

use anyhow::{anyhow, Context, Result};
use std::time::{Duration, Instant, SystemTime};

use super::{FrameSource, SourceStats};
use crate::frame::{Frame, PixelLayout};
use crate::pacer::frame_interval;

const BACKGROUND: u8 = 40;
const BLOCK: u8 = 220;

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub name: String,
    pub frames: Option<u64>,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub period: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub".to_string(),
            frames: None,
            fps: 30,
            width: 640,
            height: 480,
            period: 60,
        }
    }
}

impl SyntheticConfig {
    pub fn from_url(raw: &str) -> Result<Self> {
        let parsed = url::Url::parse(raw).with_context(|| format!("parse stub url {}", raw))?;
        if parsed.scheme() != "stub" {
            return Err(anyhow!("synthetic source needs a stub:// url"));
        }
        let mut config = Self {
            name: parsed.host_str().unwrap_or("stub").to_string(),
            ..Self::default()
        };
        for (key, value) in parsed.query_pairs() {
            let bad = || format!("invalid stub parameter {}={}", key, value);
            match key.as_ref() {
                "frames" => {
                    let n: u64 = value.parse().with_context(bad)?;
                    config.frames = (n > 0).then_some(n);
                }
                "fps" => config.fps = value.parse().with_context(bad)?,
                "width" => config.width = value.parse().with_context(bad)?,
                "height" => config.height = value.parse().with_context(bad)?,
                "period" => config.period = value.parse().with_context(bad)?,
                other => log::warn!("ignoring unknown stub parameter {}", other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub frame dimensions must be non-zero"));
        }
        if config.period < 2 {
            return Err(anyhow!("stub period must be at least 2 frames"));
        }
        Ok(config)
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    pub fn from_url(raw: &str) -> Result<Self> {
        Ok(Self::new(SyntheticConfig::from_url(raw)?))
    }

    /// Whether frame `index` (zero-based) shows the block.
    fn block_visible(&self, index: u64) -> bool {
        index % self.config.period >= self.config.period / 2
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let mut pixels = vec![BACKGROUND; (w * h) as usize * 3];
        if self.block_visible(index) {
            let (bx, by) = (w / 8, h / 8);
            let (bw, bh) = (w * 3 / 8, h * 5 / 8);
            for y in by..by + bh {
                let row = (y * w) as usize * 3;
                let start = row + bx as usize * 3;
                let end = row + (bx + bw) as usize * 3;
                pixels[start..end].fill(BLOCK);
            }
        }
        pixels
    }

    fn wait_for_slot(&self) {
        if self.config.fps == 0 {
            return;
        }
        let Some(last) = self.last_frame_at else {
            return;
        };
        let interval: Duration = frame_interval(self.config.fps);
        if let Some(remaining) = interval.checked_sub(last.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}

impl FrameSource for SyntheticSource {
    /// Synthetic sources are always connected.
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to stub://{}", self.config.name);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.config.frames {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.wait_for_slot();
        let pixels = self.render(self.frame_count);
        let frame = Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            PixelLayout::Rgb8,
            SystemTime::now(),
        )?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        self.config
            .frames
            .map_or(true, |limit| self.frame_count < limit)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: format!("stub://{}", self.config.name),
        }
    }
}
