use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{BackendSelection, DetectionThresholds, ModelSettings, NpuCoreMask};
use crate::fall::FallJudgeConfig;
use crate::ingest::CaptureSettings;

const DEFAULT_SOURCE: &str = "0";
const DEFAULT_CAPTURE_WIDTH: u32 = 1280;
const DEFAULT_CAPTURE_HEIGHT: u32 = 720;
const DEFAULT_CAPTURE_FPS: u32 = 30;
const DEFAULT_RECONNECT_AFTER: u32 = 5;
const DEFAULT_MODEL_PATH: &str = "models/yolov8n-pose.onnx";
const DEFAULT_MODEL_INPUT: u32 = crate::detect::DEFAULT_INPUT_SIZE;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FallwatchConfigFile {
    capture: Option<CaptureConfigFile>,
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    fall: Option<FallConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    reconnect_after: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    backend: Option<String>,
    core_mask: Option<String>,
    npu_cores: Option<u32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    conf_threshold: Option<f32>,
    nms_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FallConfigFile {
    window: Option<usize>,
    angle_threshold: Option<f32>,
    confirm_ratio: Option<f32>,
    min_keypoint_confidence: Option<f32>,
}

/// Runtime configuration for `fallwatchd`.
#[derive(Debug, Clone, PartialEq)]
pub struct FallwatchConfig {
    pub capture: CaptureSettings,
    pub model: ModelSettings,
    pub thresholds: DetectionThresholds,
    pub fall: FallJudgeConfig,
}

impl FallwatchConfig {
    /// Defaults, then the file named by `FALLWATCH_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FALLWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like [`FallwatchConfig::load`] with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FallwatchConfigFile) -> Result<Self> {
        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            source: capture_file
                .source
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            width: capture_file.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
            height: capture_file.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
            target_fps: capture_file.fps.unwrap_or(DEFAULT_CAPTURE_FPS),
            reconnect_after: capture_file
                .reconnect_after
                .unwrap_or(DEFAULT_RECONNECT_AFTER),
        };

        let model_file = file.model.unwrap_or_default();
        let model = ModelSettings {
            path: model_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            backend: model_file
                .backend
                .as_deref()
                .map(str::parse::<BackendSelection>)
                .transpose()
                .context("invalid model.backend")?,
            core_mask: model_file
                .core_mask
                .as_deref()
                .map(str::parse::<NpuCoreMask>)
                .transpose()
                .context("invalid model.core_mask")?,
            npu_cores: model_file.npu_cores,
            input_width: model_file.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
            input_height: model_file.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
        };

        let detection_file = file.detection.unwrap_or_default();
        let defaults = DetectionThresholds::default();
        let thresholds = DetectionThresholds {
            confidence: detection_file
                .conf_threshold
                .unwrap_or(defaults.confidence),
            overlap: detection_file.nms_threshold.unwrap_or(defaults.overlap),
        };

        let fall_file = file.fall.unwrap_or_default();
        let fall_defaults = FallJudgeConfig::default();
        let fall = FallJudgeConfig {
            window: fall_file.window.unwrap_or(fall_defaults.window),
            angle_threshold_deg: fall_file
                .angle_threshold
                .unwrap_or(fall_defaults.angle_threshold_deg),
            confirm_ratio: fall_file
                .confirm_ratio
                .unwrap_or(fall_defaults.confirm_ratio),
            min_keypoint_confidence: fall_file
                .min_keypoint_confidence
                .unwrap_or(fall_defaults.min_keypoint_confidence),
        };

        Ok(Self {
            capture,
            model,
            thresholds,
            fall,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_value("FALLWATCH_SOURCE") {
            self.capture.source = source;
        }
        if let Some(path) = env_value("FALLWATCH_MODEL") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(backend) = env_value("FALLWATCH_BACKEND") {
            self.model.backend = Some(backend.parse::<BackendSelection>().context("invalid FALLWATCH_BACKEND")?);
        }
        if let Some(mask) = env_value("FALLWATCH_CORE_MASK") {
            self.model.core_mask = Some(mask.parse::<NpuCoreMask>().context("invalid FALLWATCH_CORE_MASK")?);
        }
        if let Some(conf) = env_value("FALLWATCH_CONF_THRESHOLD") {
            self.thresholds.confidence = conf
                .parse()
                .map_err(|_| anyhow!("FALLWATCH_CONF_THRESHOLD must be a number"))?;
        }
        if let Some(nms) = env_value("FALLWATCH_NMS_THRESHOLD") {
            self.thresholds.overlap = nms
                .parse()
                .map_err(|_| anyhow!("FALLWATCH_NMS_THRESHOLD must be a number"))?;
        }
        if let Some(window) = env_value("FALLWATCH_FALL_WINDOW") {
            self.fall.window = window
                .parse()
                .map_err(|_| anyhow!("FALLWATCH_FALL_WINDOW must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.capture.source.trim().is_empty() {
            return Err(anyhow!("capture source must not be empty"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        for (name, value) in [
            ("confidence threshold", self.thresholds.confidence),
            ("NMS threshold", self.thresholds.overlap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be in [0, 1], got {}", name, value));
            }
        }
        self.fall.validate()
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<FallwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
