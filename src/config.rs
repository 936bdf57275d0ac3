use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::alert::policy::{
    AlertPolicy, DEFAULT_ALERT_CONFIDENCE, DEFAULT_CANDIDATE_CONFIDENCE,
    DEFAULT_HIGH_SEVERITY_CUTOFF,
};
use crate::alert::sink::DEFAULT_API_URL;
use crate::alert::snapshot::{DEFAULT_JPEG_QUALITY, DEFAULT_SNAPSHOT_DIR};
use crate::detect::backends::{DEFAULT_BACKEND, DEFAULT_INPUT_SIZE, DEFAULT_MODEL_PATH};
use crate::detect::DetectorSettings;
use crate::ingest::CaptureSettings;
use crate::monitor::{
    MonitorSettings, DEFAULT_FAILURE_BACKOFF, DEFAULT_FRAME_INTERVAL, DEFAULT_FRAME_STRIDE,
    DEFAULT_MAX_READ_FAILURES, DEFAULT_STATUS_INTERVAL,
};

pub const CONFIG_ENV: &str = "FIRE_CONFIG";

const DEFAULT_CAMERA_URL: &str = "0";
const DEFAULT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_REPORT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CAPTURE_WIDTH: u32 = 640;
const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
const DEFAULT_CAPTURE_FPS: u32 = 10;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    thresholds: Option<ThresholdConfigFile>,
    alerts: Option<AlertConfigFile>,
    report: Option<ReportConfigFile>,
    monitor: Option<LoopConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    read_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdConfigFile {
    confidence: Option<f32>,
    alert: Option<f32>,
    high_severity_cutoff: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
    snapshot_dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct ReportConfigFile {
    api_url: Option<String>,
    timeout_secs: Option<u64>,
    retry_queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct LoopConfigFile {
    frame_stride: Option<u32>,
    frame_interval_ms: Option<u64>,
    max_read_failures: Option<u32>,
    failure_backoff_ms: Option<u64>,
    status_interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub camera_url: String,
    pub capture: CaptureSettings,
    pub detector_backend: String,
    pub model_path: PathBuf,
    pub model_input_size: u32,
    pub policy: AlertPolicy,
    pub snapshot_dir: PathBuf,
    pub jpeg_quality: u8,
    pub api_url: String,
    pub report_timeout: Duration,
    pub retry_queue_capacity: usize,
    pub monitor: MonitorSettings,
}

impl MonitorConfig {
    /// File named by `FIRE_CONFIG` (if any), then environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like `load`, but an explicit `path` takes precedence over `FIRE_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let thresholds = file.thresholds.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let report = file.report.unwrap_or_default();
        let monitor = file.monitor.unwrap_or_default();

        Self {
            camera_url: camera
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            capture: CaptureSettings {
                width: camera.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAPTURE_FPS),
                read_timeout: Duration::from_secs(
                    camera
                        .read_timeout_secs
                        .unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
                ),
            },
            detector_backend: detector
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            model_path: detector
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            model_input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            policy: AlertPolicy {
                candidate_confidence: thresholds
                    .confidence
                    .unwrap_or(DEFAULT_CANDIDATE_CONFIDENCE),
                alert_confidence: thresholds.alert.unwrap_or(DEFAULT_ALERT_CONFIDENCE),
                cooldown: Duration::from_secs(
                    alerts.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
                ),
                high_severity_cutoff: thresholds
                    .high_severity_cutoff
                    .unwrap_or(DEFAULT_HIGH_SEVERITY_CUTOFF),
            },
            snapshot_dir: alerts
                .snapshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            jpeg_quality: alerts.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            api_url: report
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            report_timeout: Duration::from_secs(
                report.timeout_secs.unwrap_or(DEFAULT_REPORT_TIMEOUT_SECS),
            ),
            retry_queue_capacity: report.retry_queue_capacity.unwrap_or(0),
            monitor: MonitorSettings {
                frame_stride: monitor.frame_stride.unwrap_or(DEFAULT_FRAME_STRIDE),
                frame_interval: monitor
                    .frame_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_FRAME_INTERVAL),
                max_consecutive_failures: monitor
                    .max_read_failures
                    .unwrap_or(DEFAULT_MAX_READ_FAILURES),
                failure_backoff: monitor
                    .failure_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_FAILURE_BACKOFF),
                status_interval: monitor
                    .status_interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_STATUS_INTERVAL),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_string("CAMERA_URL") {
            self.camera_url = url;
        }
        if let Some(url) = env_string("API_URL") {
            self.api_url = url;
        }
        if let Some(path) = env_string("MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(backend) = env_string("DETECTOR_BACKEND") {
            self.detector_backend = backend;
        }
        if let Some(dir) = env_string("SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(value) = env_parse::<f32>("CONFIDENCE_THRESHOLD")? {
            self.policy.candidate_confidence = value;
        }
        if let Some(value) = env_parse::<f32>("ALERT_THRESHOLD")? {
            self.policy.alert_confidence = value;
        }
        if let Some(value) = env_parse::<f32>("HIGH_SEVERITY_CUTOFF")? {
            self.policy.high_severity_cutoff = value;
        }
        if let Some(secs) = env_parse::<u64>("COOLDOWN_SECS")? {
            self.policy.cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("REPORT_TIMEOUT_SECS")? {
            self.report_timeout = Duration::from_secs(secs);
        }
        if let Some(count) = env_parse::<u32>("MAX_READ_FAILURES")? {
            self.monitor.max_consecutive_failures = count;
        }
        if let Some(stride) = env_parse::<u32>("FRAME_STRIDE")? {
            self.monitor.frame_stride = stride;
        }
        if let Some(capacity) = env_parse::<usize>("RETRY_QUEUE_CAPACITY")? {
            self.retry_queue_capacity = capacity;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        if self.camera_url.trim().is_empty() {
            return Err(anyhow!("camera url must not be empty"));
        }
        let api = Url::parse(&self.api_url)
            .with_context(|| format!("invalid api url '{}'", self.api_url))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(anyhow!("api url must use http or https, got '{}'", api.scheme()));
        }
        if self.monitor.frame_stride == 0 {
            return Err(anyhow!("frame_stride must be at least 1"));
        }
        if self.report_timeout.is_zero() {
            return Err(anyhow!("report timeout must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.model_input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        Ok(())
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            backend: self.detector_backend.clone(),
            model_path: self.model_path.clone(),
            min_confidence: self.policy.candidate_confidence,
            input_size: self.model_input_size,
        }
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: MonitorConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = MonitorConfig::from_file(MonitorConfigFile::default());
        assert_eq!(cfg.camera_url, "0");
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.model_path, PathBuf::from("best.onnx"));
        assert_eq!(cfg.policy.candidate_confidence, 0.5);
        assert_eq!(cfg.policy.alert_confidence, 0.8);
        assert_eq!(cfg.policy.high_severity_cutoff, 0.9);
        assert_eq!(cfg.policy.cooldown, Duration::from_secs(10));
        assert_eq!(cfg.report_timeout, Duration::from_secs(10));
        assert_eq!(cfg.monitor.max_consecutive_failures, 10);
        assert_eq!(cfg.retry_queue_capacity, 0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validation_rejects_zero_stride_and_bad_api_url() {
        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default());
        cfg.monitor.frame_stride = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default());
        cfg.api_url = "ftp://example.com/incidents".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_files_are_detected_by_extension() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fire.toml");
        std::fs::write(&path, "[thresholds]\nalert = 0.75\n[monitor]\nframe_stride = 5\n")?;
        let file = read_config_file(&path)?;
        let cfg = MonitorConfig::from_file(file);
        assert_eq!(cfg.policy.alert_confidence, 0.75);
        assert_eq!(cfg.monitor.frame_stride, 5);
        Ok(())
    }

    #[test]
    fn unknown_sections_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fire.json");
        std::fs::write(&path, r#"{"kernel": {}}"#)?;
        assert!(read_config_file(&path).is_err());
        Ok(())
    }
}
