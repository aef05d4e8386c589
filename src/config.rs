//! Layered configuration using Figment.
//!
//! Settings are merged in this order (later wins):
//! 1. Built-in defaults
//! 2. A TOML file (`rust_scan.toml` unless another path is given; a missing file is
//!    silently skipped)
//! 3. Environment variables prefixed with `RUST_SCAN_`, nested keys split on `__`
//!
//! ```text
//! RUST_SCAN_LOG_LEVEL=debug
//! RUST_SCAN_OUTPUT_DIR=/data/run42
//! RUST_SCAN_HARDWARE__STAGE_SPEED=250
//! ```
//!
//! The experiment itself is not described here: that is the job of the `.con`
//! sequence file handed to the parser.

use crate::error::{ScanError, ScanResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default settings file looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "rust_scan.toml";

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Logging level (trace, debug, info, warn, error), used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory that receives action output files.
    pub output_dir: PathBuf,
    /// Simulated hardware backend.
    pub hardware: HardwareSettings,
}

/// Settings of the simulated hardware backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HardwareSettings {
    /// Stage travel speed in position units per second.
    pub stage_speed: f64,
    /// Settling time after each move, in milliseconds.
    pub settle_ms: u64,
    /// Serial numbers reported by piezo controller discovery.
    pub piezo_serials: Vec<String>,
    /// Whether tone playback takes its nominal duration.
    pub real_time_audio: bool,
    /// Number of input channels on each digitizer board.
    pub digitizer_channels: usize,
    /// Camera sensor size as `[width, height]`.
    pub camera_resolution: [u32; 2],
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            output_dir: PathBuf::from("."),
            hardware: HardwareSettings::default(),
        }
    }
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            stage_speed: 100.0,
            settle_ms: 10,
            piezo_serials: vec!["29500001".to_string()],
            real_time_audio: true,
            digitizer_channels: 8,
            camera_resolution: [64, 64],
        }
    }
}

impl Settings {
    /// Load settings from the default file and the environment.
    pub fn load() -> ScanResult<Self> {
        Self::load_from(DEFAULT_SETTINGS_FILE)
    }

    /// Load settings from `path` and the environment, then validate them.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        let settings: Self = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The provider stack behind [`load_from`](Self::load_from).
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUST_SCAN_").split("__"))
    }

    /// Reject settings that would make the run meaningless.
    pub fn validate(&self) -> ScanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ScanError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        let hw = &self.hardware;
        if hw.stage_speed.is_nan() || hw.stage_speed <= 0.0 {
            return Err(ScanError::Validation(format!(
                "hardware.stage_speed must be positive, got {}",
                hw.stage_speed
            )));
        }
        if hw.digitizer_channels == 0 {
            return Err(ScanError::Validation(
                "hardware.digitizer_channels must be at least 1".to_string(),
            ));
        }
        if hw.camera_resolution.contains(&0) {
            return Err(ScanError::Validation(format!(
                "hardware.camera_resolution must be non-zero, got {:?}",
                hw.camera_resolution
            )));
        }
        Ok(())
    }
}
