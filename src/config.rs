use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::frame::DEFAULT_JPEG_QUALITY;

const DEFAULT_DB_PATH: &str = "proximity_guard.db";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8780";
const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_WARMUP_MS: u64 = 2_000;
const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_KNOWN_WIDTH_M: f64 = 0.2;
const DEFAULT_FOCAL_LENGTH_PX: f64 = 615.0;
const DEFAULT_BLUR_SIGMA: f32 = 3.5;
const DEFAULT_DIFF_THRESHOLD: u8 = 25;
const DEFAULT_DILATE_ITERATIONS: u32 = 2;
const DEFAULT_MOTION_MIN_AREA: u64 = 500;
const DEFAULT_ALERT_MIN_AREA: u64 = 50_000;
const DEFAULT_MIN_DISTANCE_M: f64 = 0.0;
const DEFAULT_MAX_DISTANCE_M: f64 = 3.0;
const DEFAULT_ALERT_INTERVAL_SECS: f64 = 10.0;
const DEFAULT_QUEUE_CAPACITY: usize = 8;
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_TELEGRAM_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
struct GuardConfigFile {
    db_path: Option<String>,
    http: Option<HttpConfigFile>,
    source: Option<SourceConfigFile>,
    calibration: Option<CalibrationConfigFile>,
    detection: Option<DetectionConfigFile>,
    alerts: Option<AlertConfigFile>,
    telegram: Option<TelegramConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    warmup_ms: Option<u64>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    known_width_m: Option<f64>,
    focal_length_px: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    blur_sigma: Option<f32>,
    diff_threshold: Option<u8>,
    dilate_iterations: Option<u32>,
    motion_min_area: Option<u64>,
    alert_min_area: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    min_distance_m: Option<f64>,
    max_distance_m: Option<f64>,
    interval_secs: Option<f64>,
    queue_capacity: Option<usize>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramConfigFile {
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: Option<String>,
    timeout_ms: Option<u64>,
}

/// Process configuration, loaded once at startup and then treated as immutable.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub db_path: String,
    pub http_addr: String,
    pub source: SourceSettings,
    pub pipeline: PipelineSettings,
    pub telegram: Option<TelegramSettings>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    /// Wait after connecting before the first read; skipped for `stub://` sources.
    pub warmup: Duration,
    /// Read timeout for network sources.
    pub timeout: Duration,
}

/// Everything a pipeline session needs. Passed by value into `Pipeline::new`.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub frame_width: u32,
    pub frame_height: u32,
    pub target_fps: u32,
    pub calibration: Calibration,
    pub detection: DetectionSettings,
    pub alerts: AlertSettings,
    pub jpeg_quality: u8,
}

/// Pinhole calibration for the deployed camera and reference object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub known_width_m: f64,
    pub focal_length_px: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSettings {
    pub blur_sigma: f32,
    pub diff_threshold: u8,
    pub dilate_iterations: u32,
    /// Noise gate: a boundary must exceed this area to count as motion.
    pub motion_min_area: u64,
    /// Alert gate: only boundaries above this area are considered for distance alerts.
    pub alert_min_area: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertSettings {
    pub min_distance_m: f64,
    pub max_distance_m: f64,
    /// Cool-down between two approved alerts.
    pub interval: Duration,
    /// Depth of each dispatch queue.
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            warmup: Duration::from_millis(DEFAULT_WARMUP_MS),
            timeout: Duration::from_millis(DEFAULT_SOURCE_TIMEOUT_MS),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
            calibration: Calibration::default(),
            detection: DetectionSettings::default(),
            alerts: AlertSettings::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            known_width_m: DEFAULT_KNOWN_WIDTH_M,
            focal_length_px: DEFAULT_FOCAL_LENGTH_PX,
        }
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            blur_sigma: DEFAULT_BLUR_SIGMA,
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            dilate_iterations: DEFAULT_DILATE_ITERATIONS,
            motion_min_area: DEFAULT_MOTION_MIN_AREA,
            alert_min_area: DEFAULT_ALERT_MIN_AREA,
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            min_distance_m: DEFAULT_MIN_DISTANCE_M,
            max_distance_m: DEFAULT_MAX_DISTANCE_M,
            interval: Duration::from_secs_f64(DEFAULT_ALERT_INTERVAL_SECS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl GuardConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GUARD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GuardConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let http_addr = file
            .http
            .and_then(|http| http.addr)
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());

        let src = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: src.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            warmup: Duration::from_millis(src.warmup_ms.unwrap_or(DEFAULT_WARMUP_MS)),
            timeout: Duration::from_millis(src.timeout_ms.unwrap_or(DEFAULT_SOURCE_TIMEOUT_MS)),
        };

        let cal = file.calibration.unwrap_or_default();
        let det = file.detection.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let interval_secs = alerts.interval_secs.unwrap_or(DEFAULT_ALERT_INTERVAL_SECS);
        let interval = Duration::try_from_secs_f64(interval_secs).map_err(|_| {
            anyhow!("alerts.interval_secs must be a non-negative number of seconds within range")
        })?;
        let pipeline = PipelineSettings {
            frame_width: src.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            frame_height: src.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            target_fps: src.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            calibration: Calibration {
                known_width_m: cal.known_width_m.unwrap_or(DEFAULT_KNOWN_WIDTH_M),
                focal_length_px: cal.focal_length_px.unwrap_or(DEFAULT_FOCAL_LENGTH_PX),
            },
            detection: DetectionSettings {
                blur_sigma: det.blur_sigma.unwrap_or(DEFAULT_BLUR_SIGMA),
                diff_threshold: det.diff_threshold.unwrap_or(DEFAULT_DIFF_THRESHOLD),
                dilate_iterations: det.dilate_iterations.unwrap_or(DEFAULT_DILATE_ITERATIONS),
                motion_min_area: det.motion_min_area.unwrap_or(DEFAULT_MOTION_MIN_AREA),
                alert_min_area: det.alert_min_area.unwrap_or(DEFAULT_ALERT_MIN_AREA),
            },
            alerts: AlertSettings {
                min_distance_m: alerts.min_distance_m.unwrap_or(DEFAULT_MIN_DISTANCE_M),
                max_distance_m: alerts.max_distance_m.unwrap_or(DEFAULT_MAX_DISTANCE_M),
                interval,
                queue_capacity: alerts.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            },
            jpeg_quality: alerts.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let telegram = match file.telegram {
            Some(tg) => Some(TelegramSettings {
                bot_token: tg.bot_token.unwrap_or_default(),
                chat_id: tg.chat_id.unwrap_or_default(),
                api_base: tg
                    .api_base
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
                timeout: Duration::from_millis(
                    tg.timeout_ms.unwrap_or(DEFAULT_TELEGRAM_TIMEOUT_MS),
                ),
            }),
            None => None,
        };

        Ok(Self {
            db_path,
            http_addr,
            source,
            pipeline,
            telegram,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("GUARD_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(addr) = std::env::var("GUARD_HTTP_ADDR") {
            if !addr.trim().is_empty() {
                self.http_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("GUARD_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(fps) = std::env::var("GUARD_TARGET_FPS") {
            self.pipeline.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("GUARD_TARGET_FPS must be an integer frame rate"))?;
        }
        if let Ok(distance) = std::env::var("GUARD_MAX_DISTANCE_M") {
            self.pipeline.alerts.max_distance_m = distance
                .trim()
                .parse()
                .map_err(|_| anyhow!("GUARD_MAX_DISTANCE_M must be a number of meters"))?;
        }
        if let Ok(interval) = std::env::var("GUARD_ALERT_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("GUARD_ALERT_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.pipeline.alerts.interval = Duration::from_secs(seconds);
        }
        let token = non_empty_env("GUARD_TELEGRAM_TOKEN");
        let chat_id = non_empty_env("GUARD_TELEGRAM_CHAT_ID");
        if token.is_some() || chat_id.is_some() {
            let telegram = self.telegram.get_or_insert_with(|| TelegramSettings {
                bot_token: String::new(),
                chat_id: String::new(),
                api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
                timeout: Duration::from_millis(DEFAULT_TELEGRAM_TIMEOUT_MS),
            });
            if let Some(token) = token {
                telegram.bot_token = token;
            }
            if let Some(chat_id) = chat_id {
                telegram.chat_id = chat_id;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let p = &self.pipeline;
        if p.frame_width == 0 || p.frame_height == 0 {
            return Err(anyhow!("frame size must be non-zero"));
        }
        if !(p.calibration.known_width_m > 0.0) || !(p.calibration.focal_length_px > 0.0) {
            return Err(anyhow!(
                "calibration known_width_m and focal_length_px must be positive"
            ));
        }
        if !(p.alerts.min_distance_m >= 0.0) || !(p.alerts.max_distance_m >= p.alerts.min_distance_m)
        {
            return Err(anyhow!(
                "safety band must satisfy 0 <= min_distance_m <= max_distance_m"
            ));
        }
        if p.detection.alert_min_area < p.detection.motion_min_area {
            return Err(anyhow!(
                "detection.alert_min_area must not be below detection.motion_min_area"
            ));
        }
        if !(p.detection.blur_sigma > 0.0) {
            return Err(anyhow!("detection.blur_sigma must be positive"));
        }
        if !(1..=100).contains(&p.jpeg_quality) {
            return Err(anyhow!("alerts.jpeg_quality must be between 1 and 100"));
        }
        if p.alerts.queue_capacity == 0 {
            return Err(anyhow!("alerts.queue_capacity must be at least 1"));
        }
        if let Some(tg) = &self.telegram {
            if tg.bot_token.trim().is_empty() || tg.chat_id.trim().is_empty() {
                return Err(anyhow!(
                    "telegram notifications need both bot_token and chat_id"
                ));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<GuardConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
