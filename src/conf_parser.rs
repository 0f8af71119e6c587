//! Loader for the flat `.conf` configuration written by the GUI.
//!
//! ```text
//! [global]
//! logging=yes
//! backend=TensorRT
//! [slot_1]
//! profile_name=encode
//! chain_1_min_resolution=0x0
//! chain_1_max_resolution=1920x1080
//! chain_1_model_1_name=2x_AnimeJaNai_HD_V3_Compact
//! chain_1_rife=no
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::error::ConfigError;
use crate::models::{AppConfig, Backend, Chain, InterpolationSpec, ModelStep, Profile};

/// Load an application config, choosing the format by extension (`.json` or `.conf`).
pub fn load(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let config = if is_json {
        AppConfig::from_json(&content)
    } else {
        parse_conf(&content)
    };
    config.with_context(|| format!("Invalid config file: {:?}", path))
}

#[derive(Default)]
struct ChainDraft {
    chain: Option<Chain>,
    models: BTreeMap<u32, ModelStep>,
    rife: bool,
    interpolation: Option<InterpolationSpec>,
}

#[derive(Default)]
struct SlotDraft {
    profile_name: String,
    backend: Option<Backend>,
    chains: BTreeMap<u32, ChainDraft>,
}

enum Section {
    Global,
    Slot(u32),
}

/// Parse and validate the flat key/value format.
pub fn parse_conf(content: &str) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::default();
    let mut slots: BTreeMap<u32, SlotDraft> = BTreeMap::new();
    let mut section: Option<Section> = None;

    for (index, raw) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim();
            section = Some(if name.eq_ignore_ascii_case("global") {
                Section::Global
            } else if let Some(slot) = name.strip_prefix("slot_").and_then(|n| n.parse().ok()) {
                slots.entry(slot).or_default();
                Section::Slot(slot)
            } else {
                return Err(ConfigError::Syntax {
                    line: line_no,
                    message: format!("unknown section [{}]", name),
                });
            });
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Syntax {
            line: line_no,
            message: format!("expected key=value, got {:?}", line),
        })?;
        let (key, value) = (key.trim(), value.trim());

        match &section {
            None => {
                return Err(ConfigError::Syntax {
                    line: line_no,
                    message: format!("key `{}` outside of a section", key),
                })
            }
            Some(Section::Global) => apply_global(&mut config, key, value)?,
            Some(Section::Slot(slot)) => {
                let draft = slots.entry(*slot).or_default();
                apply_slot(draft, key, value)?;
            }
        }
    }

    for (slot, draft) in slots {
        let chains = draft
            .chains
            .into_iter()
            .map(|(number, chain)| chain.finish(number))
            .collect();
        config.slots.insert(
            slot,
            Profile {
                profile_name: draft.profile_name,
                backend: draft.backend,
                chains,
            },
        );
    }

    config.validate()?;
    Ok(config)
}

fn apply_global(config: &mut AppConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "logging" => config.global.logging = parse_bool(key, value)?,
        "backend" => config.global.backend = parse_backend(key, value)?,
        "backend_path" if !value.is_empty() => {
            config.global.backend_path = Some(PathBuf::from(value))
        }
        _ => {}
    }
    Ok(())
}

fn apply_slot(draft: &mut SlotDraft, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "profile_name" => draft.profile_name = value.to_string(),
        "backend" => draft.backend = Some(parse_backend(key, value)?),
        _ => {
            if let Some((number, field)) = key.strip_prefix("chain_").and_then(split_index) {
                let chain = draft.chains.entry(number).or_default();
                chain.apply(number, key, field, value)?;
            }
        }
    }
    Ok(())
}

impl ChainDraft {
    fn chain(&mut self, number: u32) -> &mut Chain {
        self.chain
            .get_or_insert_with(|| Chain::accept_all(&number.to_string()))
    }

    fn interpolation(&mut self) -> &mut InterpolationSpec {
        self.interpolation
            .get_or_insert_with(|| InterpolationSpec::new(""))
    }

    fn apply(&mut self, number: u32, key: &str, field: &str, value: &str) -> Result<(), ConfigError> {
        if let Some((model, model_field)) = field.strip_prefix("model_").and_then(split_index) {
            let step = self
                .models
                .entry(model)
                .or_insert_with(|| ModelStep::new(""));
            return apply_model(step, key, model_field, value);
        }

        match field {
            "min_resolution" => self.chain(number).min_px = parse_resolution(key, value)?,
            "max_resolution" => self.chain(number).max_px = parse_resolution(key, value)?,
            "min_fps" => self.chain(number).min_fps = parse(key, value)?,
            "max_fps" => self.chain(number).max_fps = parse(key, value)?,
            "final_resize_height" => self.chain(number).final_resize_height = parse(key, value)?,
            "final_resize_factor" => self.chain(number).final_resize_factor = parse(key, value)?,
            "tensorrt_engine_settings" => {
                self.chain(number).tensorrt_engine_settings =
                    Some(value.to_string()).filter(|s| !s.is_empty())
            }
            "rife" => self.rife = parse_bool(key, value)?,
            "rife_model" => self.interpolation().model = value.to_string(),
            "rife_factor_numerator" => self.interpolation().factor_numerator = parse(key, value)?,
            "rife_factor_denominator" => {
                self.interpolation().factor_denominator = parse(key, value)?
            }
            "rife_ensemble" => self.interpolation().ensemble = parse_bool(key, value)?,
            "rife_scene_detect_threshold" => {
                self.interpolation().scene_detect_threshold = parse(key, value)?
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(mut self, number: u32) -> Chain {
        let mut chain = self
            .chain
            .take()
            .unwrap_or_else(|| Chain::accept_all(&number.to_string()));
        chain.models = self.models.into_values().collect();
        chain.interpolation = if self.rife {
            Some(self.interpolation.unwrap_or_else(|| InterpolationSpec::new("")))
        } else {
            None
        };
        chain
    }
}

fn apply_model(step: &mut ModelStep, key: &str, field: &str, value: &str) -> Result<(), ConfigError> {
    match field {
        "name" => step.name = value.to_string(),
        "resize_height_before_upscale" => step.resize_height_before_upscale = parse(key, value)?,
        "resize_factor_before_upscale" => step.resize_factor_before_upscale = parse(key, value)?,
        "scale" => step.scale = parse(key, value)?,
        "tensorrt_engine_settings" => {
            step.tensorrt_settings_override = Some(value.to_string()).filter(|s| !s.is_empty())
        }
        _ => {}
    }
    Ok(())
}

/// `"3_name"` -> `(3, "name")`.
fn split_index(key: &str) -> Option<(u32, &str)> {
    let (number, rest) = key.split_once('_')?;
    Some((number.parse().ok()?, rest))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_backend(key: &str, value: &str) -> Result<Backend, ConfigError> {
    Backend::parse(value).ok_or_else(|| invalid(key, value))
}

/// `"1920x1080"` -> pixel count.
fn parse_resolution(key: &str, value: &str) -> Result<u64, ConfigError> {
    let (w, h) = value
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(|| invalid(key, value))?;
    let w: u64 = parse(key, w.trim())?;
    let h: u64 = parse(key, h.trim())?;
    w.checked_mul(h).ok_or_else(|| invalid(key, value))
}
