// THEORY:
// Everything an operator may want to retune without recompiling lives here: the
// station table, the fixed poses, the choreography timing, the detector cadence and
// threshold, and the camera setup. Every field has a default equal to the kiosk's
// factory constants, so the station runs with no file at all.
//
// Loading is layered:
// 1. TOML file (explicit path, else `DOFMARKET_CONFIG`, else `./dofmarket.toml`).
// 2. Environment overrides for the few values that differ per machine.
// 3. Validation, so a bad table fails fast before the display loop starts.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core_modules::actuator::{ArmSettings, MotionTiming};
use crate::core_modules::perception::PerceptionSettings;
use crate::core_modules::pose::FixedPoses;
use crate::core_modules::station::{Station, StationTable};
use crate::error::ConfigError;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "DOFMARKET_CONFIG";
/// File looked up in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "dofmarket.toml";

/// Camera device and capture properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub index: i32,
    pub width: u32,
    pub height: u32,
    pub brightness: f64,
    pub exposure: f64,
    pub contrast: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            brightness: 30.0,
            exposure: -5.0,
            contrast: 30.0,
        }
    }
}

/// Object detector model and its class names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// ONNX export of the detector. `None` runs without detection.
    pub model_path: Option<PathBuf>,
    /// Square network input size in pixels.
    pub input_size: u32,
    /// IoU threshold of non-maximum suppression.
    pub nms_threshold: f32,
    /// Class index to label.
    pub class_names: Vec<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_path: Some(PathBuf::from("models/best.onnx")),
            input_size: 640,
            nms_threshold: 0.45,
            class_names: StationTable::market_defaults()
                .into_iter()
                .map(|s| s.name)
                .collect(),
        }
    }
}

/// The complete configuration surface of the station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub arm: ArmSettings,
    pub timing: MotionTiming,
    pub poses: FixedPoses,
    pub stations: Vec<Station>,
    pub perception: PerceptionSettings,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            arm: ArmSettings::default(),
            timing: MotionTiming::default(),
            poses: FixedPoses::default(),
            stations: StationTable::market_defaults(),
            perception: PerceptionSettings::default(),
            camera: CameraSettings::default(),
            detector: DetectorSettings::default(),
        }
    }
}

impl MarketConfig {
    /// Loads, overrides from the environment, and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match resolve_path(path) {
            Some(file) => {
                info!(path = %file.display(), "loading configuration");
                Self::from_file(&file)?
            }
            None => {
                info!("no configuration file, using factory defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies per-machine overrides looked up through `var`.
    ///
    /// - `DOFMARKET_SIMULATE` -> `arm.simulate` (`1`/`true`/`yes`)
    /// - `DOFMARKET_CAMERA_INDEX` -> `camera.index`
    /// - `DOFMARKET_MODEL_PATH` -> `detector.model_path` (empty disables detection)
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(value) = var("DOFMARKET_SIMULATE") {
            self.arm.simulate = matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
            debug!(simulate = self.arm.simulate, "override from environment");
        }
        if let Some(index) = var("DOFMARKET_CAMERA_INDEX").and_then(|v| v.trim().parse().ok()) {
            self.camera.index = index;
            debug!(index, "camera override from environment");
        }
        if let Some(value) = var("DOFMARKET_MODEL_PATH") {
            self.detector.model_path = (!value.is_empty()).then(|| PathBuf::from(value));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stations.is_empty() {
            return Err(ConfigError::InvalidValue("station table is empty".into()));
        }
        let mut seen = HashSet::new();
        for station in &self.stations {
            if station.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue("station with an empty name".into()));
            }
            if !seen.insert(station.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "station '{}' is listed twice",
                    station.name
                )));
            }
        }
        if self.perception.skip_interval == 0 {
            return Err(ConfigError::InvalidValue("perception.skip_interval must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.perception.confidence) {
            return Err(ConfigError::InvalidValue(format!(
                "perception.confidence {} is outside [0, 1]",
                self.perception.confidence
            )));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::InvalidValue("camera resolution must be non-zero".into()));
        }
        if self.timing.move_ms == 0 {
            return Err(ConfigError::InvalidValue("timing.move_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn station_table(&self) -> StationTable {
        StationTable::new(self.stations.iter().cloned())
    }
}

fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    local.exists().then_some(local)
}
