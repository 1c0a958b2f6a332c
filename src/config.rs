use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::pipeline::Thresholds;

const DEFAULT_API_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    thresholds: Option<ThresholdsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdsConfigFile {
    confidence: Option<f64>,
    iou: Option<f64>,
    max_area: Option<f64>,
}

/// Startup configuration. Read once; the pipeline keeps its own immutable copy of the
/// thresholds for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub max_upload_bytes: usize,
    pub detector: DetectorSettings,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Backend name: `stub` or `tract`.
    pub backend: String,
    pub model_path: Option<PathBuf>,
    /// Square model input side in pixels.
    pub input_size: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

impl ServiceConfig {
    /// Load from the file named by `BARCODE_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BARCODE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Replace the detector backend and/or model path (e.g. from command-line flags) and
    /// re-validate.
    pub fn with_detector_overrides(
        mut self,
        backend: Option<String>,
        model_path: Option<PathBuf>,
    ) -> Result<Self> {
        if let Some(backend) = backend {
            self.detector.backend = backend;
        }
        if model_path.is_some() {
            self.detector.model_path = model_path;
        }
        self.validate()?;
        Ok(self)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let thresholds = file.thresholds.unwrap_or_default();
        let defaults = Thresholds::default();
        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            thresholds: Thresholds {
                confidence: thresholds.confidence.unwrap_or(defaults.confidence),
                iou: thresholds.iou.unwrap_or(defaults.iou),
                max_area: thresholds.max_area.unwrap_or(defaults.max_area),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("BARCODE_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(bytes) = non_empty_env("BARCODE_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = bytes
                .parse()
                .map_err(|_| anyhow!("BARCODE_MAX_UPLOAD_BYTES must be an integer byte count"))?;
        }
        if let Some(backend) = non_empty_env("BARCODE_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_empty_env("BARCODE_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(value) = non_empty_env("BARCODE_CONF_THRESHOLD") {
            self.thresholds.confidence = parse_fraction("BARCODE_CONF_THRESHOLD", &value)?;
        }
        if let Some(value) = non_empty_env("BARCODE_IOU_THRESHOLD") {
            self.thresholds.iou = parse_fraction("BARCODE_IOU_THRESHOLD", &value)?;
        }
        if let Some(value) = non_empty_env("BARCODE_MAX_AREA") {
            self.thresholds.max_area = parse_fraction("BARCODE_MAX_AREA", &value)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        self.thresholds.validate()?;
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        match self.detector.backend.as_str() {
            "stub" => {}
            "tract" => {
                if self.detector.model_path.is_none() {
                    return Err(anyhow!("tract backend requires a model_path"));
                }
            }
            other => return Err(anyhow!("unknown detector backend '{}'", other)),
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_fraction(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| anyhow!("{} must be a decimal fraction, got '{}'", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = ServiceConfig::from_file(ServiceConfigFile::default());
        assert_eq!(cfg.api_addr, DEFAULT_API_ADDR);
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(cfg.detector.backend, "stub");
        assert_eq!(cfg.detector.input_size, 640);
        assert_eq!(cfg.thresholds, Thresholds::default());
    }

    #[test]
    fn tract_without_model_is_rejected() {
        let mut cfg = ServiceConfig::from_file(ServiceConfigFile::default());
        cfg.detector.backend = "Tract".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("model_path"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut cfg = ServiceConfig::from_file(ServiceConfigFile::default());
        cfg.detector.backend = "cuda".to_string();
        assert!(cfg.validate().is_err());
    }
}
