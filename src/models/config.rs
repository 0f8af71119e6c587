//! Slot profiles, chains and model steps.
//!
//! Loaded once per run (JSON or the flat `.conf` format) and validated before use.
//! The `0` / `100` "disabled" sentinels are part of the file contract and kept as-is.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Rational;
use crate::error::ConfigError;

/// Inference backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Backend {
    #[default]
    TensorRT,
    DirectML,
    #[serde(rename = "NCNN")]
    Ncnn,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::TensorRT => "TensorRT",
            Backend::DirectML => "DirectML",
            Backend::Ncnn => "NCNN",
        }
    }

    /// Case-insensitive parse, as written by the GUI.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "tensorrt" | "trt" => Some(Backend::TensorRT),
            "directml" | "dml" => Some(Backend::DirectML),
            "ncnn" => Some(Backend::Ncnn),
            _ => None,
        }
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub global: GlobalSettings,

    /// Profiles keyed by slot number.
    #[serde(default)]
    pub slots: BTreeMap<u32, Profile>,
}

/// Settings shared by every slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Append worker logs to the rotating log file.
    #[serde(default)]
    pub logging: bool,

    #[serde(default)]
    pub backend: Backend,

    /// Root of the bundled backend (VapourSynth, plugins, models).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_path: Option<PathBuf>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            logging: false,
            backend: Backend::default(),
            backend_path: None,
        }
    }
}

/// A named slot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub profile_name: String,

    /// Overrides the global backend for this slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,

    #[serde(default)]
    pub chains: Vec<Chain>,
}

/// Applicability rule plus processing recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    /// Label used in the trace ("1", "2", ...).
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub min_px: u64,

    #[serde(default = "default_max_px")]
    pub max_px: u64,

    #[serde(default = "default_min_fps")]
    pub min_fps: Rational,

    #[serde(default = "default_max_fps")]
    pub max_fps: Rational,

    #[serde(default)]
    pub models: Vec<ModelStep>,

    /// Target height after all models; 0 disables.
    #[serde(default)]
    pub final_resize_height: u32,

    /// Uniform percentage resize after all models; 100 is a no-op.
    #[serde(default = "default_factor")]
    pub final_resize_factor: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpolation: Option<InterpolationSpec>,

    /// Chain-wide TensorRT settings; `None` or empty selects automatic settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensorrt_engine_settings: Option<String>,
}

fn default_max_px() -> u64 {
    u64::MAX
}

fn default_min_fps() -> Rational {
    Rational::integer(0)
}

fn default_max_fps() -> Rational {
    Rational::integer(u32::MAX as u64)
}

fn default_factor() -> f64 {
    100.0
}

fn default_scale() -> u32 {
    2
}

impl Chain {
    /// An empty chain accepting every video.
    pub fn accept_all(name: &str) -> Self {
        Self {
            name: name.to_string(),
            min_px: 0,
            max_px: default_max_px(),
            min_fps: default_min_fps(),
            max_fps: default_max_fps(),
            models: Vec::new(),
            final_resize_height: 0,
            final_resize_factor: default_factor(),
            interpolation: None,
            tensorrt_engine_settings: None,
        }
    }

    pub fn matches(&self, pixel_count: u64, fps: Rational) -> bool {
        self.min_px <= pixel_count
            && pixel_count <= self.max_px
            && self.min_fps <= fps
            && fps <= self.max_fps
    }

    /// Chain-level TensorRT override, treating blank strings as unset.
    pub fn engine_settings_override(&self) -> Option<&str> {
        self.tensorrt_engine_settings
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn validate(&self, slot: u32) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidChain {
            slot,
            chain: self.name.clone(),
            reason,
        };

        if self.min_px > self.max_px {
            return Err(invalid(format!(
                "min_px {} exceeds max_px {}",
                self.min_px, self.max_px
            )));
        }
        if self.min_fps > self.max_fps {
            return Err(invalid(format!(
                "min_fps {} exceeds max_fps {}",
                self.min_fps, self.max_fps
            )));
        }
        if !(self.final_resize_factor > 0.0) {
            return Err(invalid(format!(
                "final_resize_factor must be positive, got {}",
                self.final_resize_factor
            )));
        }
        for (index, model) in self.models.iter().enumerate() {
            model.validate().map_err(|reason| {
                invalid(format!("model {}: {}", index + 1, reason))
            })?;
        }
        if let Some(interp) = &self.interpolation {
            interp.validate().map_err(invalid)?;
        }
        Ok(())
    }
}

/// One upscale application within a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStep {
    /// Model file stem inside the models directory.
    pub name: String,

    /// Percentage resize before the model; 100 is a no-op.
    #[serde(default = "default_factor")]
    pub resize_factor_before_upscale: f64,

    /// Target height before the model; 0 disables. Overrides the factor.
    #[serde(default)]
    pub resize_height_before_upscale: u32,

    /// Upscale factor of the model.
    #[serde(default = "default_scale")]
    pub scale: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensorrt_settings_override: Option<String>,
}

impl ModelStep {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            resize_factor_before_upscale: default_factor(),
            resize_height_before_upscale: 0,
            scale: default_scale(),
            tensorrt_settings_override: None,
        }
    }

    /// Resize factor actually applied: forced to 100 when a target height is set.
    pub fn effective_resize_factor(&self) -> f64 {
        if self.resize_height_before_upscale != 0 {
            100.0
        } else {
            self.resize_factor_before_upscale
        }
    }

    pub fn settings_override(&self) -> Option<&str> {
        self.tensorrt_settings_override
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("model name is empty".to_string());
        }
        if !(self.resize_factor_before_upscale > 0.0) {
            return Err(format!(
                "resize_factor_before_upscale must be positive, got {}",
                self.resize_factor_before_upscale
            ));
        }
        if self.scale == 0 {
            return Err("scale must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Frame interpolation appended after the upscale models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpolationSpec {
    /// RIFE model identifier, e.g. `"422"`.
    pub model: String,

    #[serde(default = "default_factor_numerator")]
    pub factor_numerator: u32,

    #[serde(default = "default_factor_denominator")]
    pub factor_denominator: u32,

    #[serde(default)]
    pub ensemble: bool,

    #[serde(default = "default_scene_detect_threshold")]
    pub scene_detect_threshold: f64,
}

fn default_factor_numerator() -> u32 {
    2
}

fn default_factor_denominator() -> u32 {
    1
}

fn default_scene_detect_threshold() -> f64 {
    0.150
}

impl InterpolationSpec {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            factor_numerator: default_factor_numerator(),
            factor_denominator: default_factor_denominator(),
            ensemble: false,
            scene_detect_threshold: default_scene_detect_threshold(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("interpolation model is empty".to_string());
        }
        if self.factor_numerator == 0 || self.factor_denominator == 0 {
            return Err(format!(
                "interpolation factor {}/{} is invalid",
                self.factor_numerator, self.factor_denominator
            ));
        }
        if !(0.0..=1.0).contains(&self.scene_detect_threshold) {
            return Err(format!(
                "scene_detect_threshold must be within 0..=1, got {}",
                self.scene_detect_threshold
            ));
        }
        Ok(())
    }
}

impl Profile {
    /// Display name: slots below 10 are prefixed with their number.
    pub fn display_name(&self, slot: u32) -> String {
        if slot < 10 {
            format!("{}. {}", slot, self.profile_name)
        } else {
            self.profile_name.clone()
        }
    }
}

impl AppConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (slot, profile) in &self.slots {
            for chain in &profile.chains {
                chain.validate(*slot)?;
            }
        }
        Ok(())
    }

    pub fn profile(&self, slot: u32) -> Result<&Profile, ConfigError> {
        self.slots.get(&slot).ok_or(ConfigError::MissingSlot(slot))
    }

    /// Backend for a slot: the profile's own, else the global one.
    pub fn backend_for(&self, profile: &Profile) -> Backend {
        profile.backend.unwrap_or(self.global.backend)
    }
}
