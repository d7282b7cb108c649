//! config — pipeline tuning that can be persisted as JSON
//!
//! Defaults reproduce the fixed constants of the detector app: a 500 ms gate,
//! four tracked detections, at most 100 rendered boxes, a 4096-character log
//! and identity normalization.

use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Per-channel normalization applied while staging: `(v - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// Mean 0, std 1: values pass through in `[0, 1]`.
    pub const IDENTITY: Self = Self {
        mean: [0.0; 3],
        std: [1.0; 3],
    };
}

impl Default for Normalization {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Where the detector model comes from and how its input is named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Asset identifier (file path) of the exported detector.
    pub asset: PathBuf,
    /// Name of the graph input receiving the `[3, 96, 96]` tensor.
    pub input_name: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            asset: PathBuf::from("frcnn.onnx"),
            input_name: "images".to_string(),
        }
    }
}

/// Settings shared by the worker and render sides of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    /// Minimum spacing between accepted frames.
    pub gate_interval_ms: u64,
    /// Detections kept in the analyzer's bookkeeping list.
    pub tracked_detections: usize,
    /// Maximum boxes drawn per overlay.
    pub render_cap: usize,
    /// Character budget of the scrolling text log.
    pub text_log_budget: usize,
    pub normalization: Normalization,
    /// RGBA outline and label color.
    pub overlay_color: [u8; 4],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            gate_interval_ms: 500,
            tracked_detections: 4,
            render_cap: 100,
            text_log_budget: 4096,
            normalization: Normalization::IDENTITY,
            overlay_color: [0, 255, 0, 255],
        }
    }
}

impl PipelineConfig {
    /// Load settings from a JSON file; missing fields fall back to defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config JSON at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write settings as pretty-printed JSON, overwriting any existing file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize config JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if let Some(c) = self.normalization.std.iter().position(|s| *s == 0.0) {
            return Err(PipelineError::Config(format!(
                "normalization std for channel {c} must be non-zero"
            )));
        }
        if self.tracked_detections == 0 {
            return Err(PipelineError::Config(
                "tracked_detections must be at least 1".into(),
            ));
        }
        if self.render_cap == 0 {
            return Err(PipelineError::Config("render_cap must be at least 1".into()));
        }
        if self.text_log_budget == 0 {
            return Err(PipelineError::Config(
                "text_log_budget must be at least 1".into(),
            ));
        }
        if self.model.input_name.is_empty() {
            return Err(PipelineError::Config("model input_name is empty".into()));
        }
        Ok(())
    }
}
