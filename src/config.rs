use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::frame::{CANONICAL_HEIGHT, CANONICAL_WIDTH};
use crate::ingest::{CaptureMode, CaptureParams, DEFAULT_REPLAY_FPS};
use crate::scene::{
    SceneSettings, DEFAULT_CHATTER_MS, DEFAULT_STABLE_MAX_PIXELS, DEFAULT_SUPPRESS_MS,
};
use crate::TimestampMs;

const DEFAULT_DEVICE: &str = "stub://result_screen";
const DEFAULT_WIN_THRESHOLD: f32 = 0.95;
const DEFAULT_EXCLUSIVE_SCENE: &str = "GameTimerIcon";

#[derive(Debug, Deserialize, Default)]
struct ScenewatchConfigFile {
    capture: Option<CaptureConfigFile>,
    scene: Option<SceneConfigFile>,
    recognizers: Option<RecognizerConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<SourceKind>,
    device: Option<String>,
    file: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    deinterlace: Option<bool>,
    offset: Option<(i32, i32)>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SceneConfigFile {
    suppress_ms: Option<TimestampMs>,
    chatter_ms: Option<TimestampMs>,
    stable_max_pixels: Option<u32>,
    auto_offset: Option<bool>,
    exclusive_with: Option<Vec<String>>,
    layout: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognizerConfigFile {
    win_mask: Option<PathBuf>,
    win_threshold: Option<f32>,
    digits_model: Option<ModelConfigFile>,
    weapon_model: Option<ModelConfigFile>,
    rank_model: Option<ModelConfigFile>,
    fes_gender_model: Option<ModelConfigFile>,
    fes_level_model: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Clone)]
struct ModelConfigFile {
    path: PathBuf,
    labels: PathBuf,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    results_jsonl: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    File,
    Passthrough,
}

impl std::str::FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" => Ok(SourceKind::Camera),
            "file" => Ok(SourceKind::File),
            "passthrough" => Ok(SourceKind::Passthrough),
            other => Err(anyhow!(
                "unknown capture source '{}' (expected camera, file or passthrough)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenewatchConfig {
    pub capture: CaptureSettings,
    pub scene: SceneSettings,
    pub layout_path: Option<PathBuf>,
    pub recognizers: RecognizerSettings,
    pub results_jsonl: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub source: SourceKind,
    pub device: String,
    pub file: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub deinterlace: bool,
    pub offset: (i32, i32),
    pub fps: u32,
}

impl CaptureSettings {
    pub fn mode(&self) -> Result<CaptureMode> {
        match self.source {
            SourceKind::Camera => Ok(CaptureMode::camera(self.device.clone())),
            SourceKind::Passthrough => Ok(CaptureMode::passthrough(self.device.clone())),
            SourceKind::File => self
                .file
                .clone()
                .map(CaptureMode::file)
                .ok_or_else(|| anyhow!("capture.file is required for a file source")),
        }
    }

    pub fn params(&self) -> CaptureParams {
        CaptureParams {
            width: self.width,
            height: self.height,
            offset: self.offset,
            deinterlace: self.deinterlace,
        }
    }
}

/// An ONNX classifier and its label table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub labels: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl From<ModelConfigFile> for ModelSettings {
    fn from(file: ModelConfigFile) -> Self {
        Self {
            path: file.path,
            labels: file.labels,
            width: file.width,
            height: file.height,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecognizerSettings {
    pub win_mask: Option<PathBuf>,
    pub win_threshold: f32,
    pub digits_model: Option<ModelSettings>,
    pub weapon_model: Option<ModelSettings>,
    pub rank_model: Option<ModelSettings>,
    pub fes_gender_model: Option<ModelSettings>,
    pub fes_level_model: Option<ModelSettings>,
}

impl ScenewatchConfig {
    /// Load from the file named by `SCENEWATCH_CONFIG`, if set.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SCENEWATCH_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (or defaults), then apply environment
    /// overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ScenewatchConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        let scene = file.scene.unwrap_or_default();
        let recognizers = file.recognizers.unwrap_or_default();

        let source = capture.source.unwrap_or(if capture.file.is_some() {
            SourceKind::File
        } else {
            SourceKind::Camera
        });

        Self {
            capture: CaptureSettings {
                source,
                device: capture
                    .device
                    .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
                file: capture.file,
                width: capture.width.unwrap_or(CANONICAL_WIDTH),
                height: capture.height.unwrap_or(CANONICAL_HEIGHT),
                deinterlace: capture.deinterlace.unwrap_or(false),
                offset: capture.offset.unwrap_or((0, 0)),
                fps: capture.fps.unwrap_or(DEFAULT_REPLAY_FPS),
            },
            scene: SceneSettings {
                suppress_ms: scene.suppress_ms.unwrap_or(DEFAULT_SUPPRESS_MS),
                chatter_ms: scene.chatter_ms.unwrap_or(DEFAULT_CHATTER_MS),
                stable_max_pixels: scene
                    .stable_max_pixels
                    .unwrap_or(DEFAULT_STABLE_MAX_PIXELS),
                auto_offset: scene.auto_offset.unwrap_or(true),
                exclusive_with: scene
                    .exclusive_with
                    .unwrap_or_else(|| vec![DEFAULT_EXCLUSIVE_SCENE.to_string()]),
            },
            layout_path: scene.layout,
            recognizers: RecognizerSettings {
                win_mask: recognizers.win_mask,
                win_threshold: recognizers.win_threshold.unwrap_or(DEFAULT_WIN_THRESHOLD),
                digits_model: recognizers.digits_model.map(Into::into),
                weapon_model: recognizers.weapon_model.map(Into::into),
                rank_model: recognizers.rank_model.map(Into::into),
                fes_gender_model: recognizers.fes_gender_model.map(Into::into),
                fes_level_model: recognizers.fes_level_model.map(Into::into),
            },
            results_jsonl: file.output.and_then(|output| output.results_jsonl),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("SCENEWATCH_SOURCE") {
            if !source.trim().is_empty() {
                self.capture.source = source.parse()?;
            }
        }
        if let Ok(device) = std::env::var("SCENEWATCH_DEVICE") {
            if !device.trim().is_empty() {
                self.capture.device = device;
            }
        }
        if let Ok(file) = std::env::var("SCENEWATCH_FILE") {
            if !file.trim().is_empty() {
                self.capture.file = Some(PathBuf::from(file));
            }
        }
        if let Ok(flag) = std::env::var("SCENEWATCH_DEINTERLACE") {
            self.capture.deinterlace = parse_bool(&flag)
                .ok_or_else(|| anyhow!("SCENEWATCH_DEINTERLACE must be true or false"))?;
        }
        if let Ok(offset) = std::env::var("SCENEWATCH_OFFSET") {
            self.capture.offset = parse_offset(&offset)?;
        }
        if let Ok(suppress) = std::env::var("SCENEWATCH_SUPPRESS_MS") {
            self.scene.suppress_ms = suppress.trim().parse().map_err(|_| {
                anyhow!("SCENEWATCH_SUPPRESS_MS must be an integer number of milliseconds")
            })?;
        }
        if let Ok(path) = std::env::var("SCENEWATCH_RESULTS") {
            if !path.trim().is_empty() {
                self.results_jsonl = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.fps == 0 {
            return Err(anyhow!("capture fps must be greater than zero"));
        }
        if self.capture.source == SourceKind::File && self.capture.file.is_none() {
            return Err(anyhow!("capture.file is required for a file source"));
        }
        if self.scene.suppress_ms < 0 || self.scene.chatter_ms < 0 {
            return Err(anyhow!("scene windows must not be negative"));
        }
        if self.scene.chatter_ms > self.scene.suppress_ms {
            return Err(anyhow!(
                "scene.chatter_ms ({}) must not exceed scene.suppress_ms ({})",
                self.scene.chatter_ms,
                self.scene.suppress_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.recognizers.win_threshold) {
            return Err(anyhow!("recognizers.win_threshold must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ScenewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `"dx,dy"`.
pub fn parse_offset(value: &str) -> Result<(i32, i32)> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [dx, dy] => {
            let dx = dx.parse().map_err(|_| anyhow!("invalid offset dx '{}'", dx))?;
            let dy = dy.parse().map_err(|_| anyhow!("invalid offset dy '{}'", dy))?;
            Ok((dx, dy))
        }
        _ => Err(anyhow!("offset must look like 'dx,dy', got '{}'", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = ScenewatchConfig::from_file(ScenewatchConfigFile::default());
        assert_eq!(cfg.capture.source, SourceKind::Camera);
        assert_eq!(cfg.capture.device, DEFAULT_DEVICE);
        assert_eq!((cfg.capture.width, cfg.capture.height), (1280, 720));
        assert_eq!(cfg.scene, SceneSettings::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn offsets_parse_with_whitespace() {
        assert_eq!(parse_offset("3, -2").unwrap(), (3, -2));
        assert!(parse_offset("3").is_err());
        assert!(parse_offset("a,1").is_err());
    }
}
