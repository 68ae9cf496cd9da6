use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::geometry::OpticalGeometry;
use crate::pid::{IntegralLimits, PidGains};

const ENV_PREFIX: &str = "TILTSHEAR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration: {source}")]
    ReadError { source: config::ConfigError },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub host: String,
    pub port: u16,
    pub retries: u32,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4001,
            retries: 3,
            connect_timeout_ms: 1000,
            read_timeout_ms: 500,
            write_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5001,
            connect_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub step_amplitude: u8,
    pub step_interval_secs: f64,
    pub poll_interval_ms: u64,
    pub error_checking: bool,
    pub alternate_mirrors: bool,
    pub recalibrate_after_recovery: bool,
    pub gains: PidGains,
    pub integral_limits: IntegralLimits,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            step_amplitude: 50,
            step_interval_secs: 0.150,
            poll_interval_ms: 500,
            error_checking: false,
            alternate_mirrors: false,
            recalibrate_after_recovery: true,
            gains: PidGains::default(),
            integral_limits: IntegralLimits::default(),
        }
    }
}

impl ControlConfig {
    pub fn step_interval(&self) -> Duration {
        Duration::from_secs_f64(self.step_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub test_steps: i32,
    pub step_amplitude: u8,
    pub settle_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            test_steps: 100,
            step_amplitude: 50,
            settle_ms: 500,
            poll_interval_ms: 1000,
        }
    }
}

impl CalibrationConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoaddConfig {
    pub frames: u32,
    pub interval_secs: f64,
}

impl Default for CoaddConfig {
    fn default() -> Self {
        Self {
            frames: 10,
            interval_secs: 1.0,
        }
    }
}

impl CoaddConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiltShearConfig {
    pub geometry: OpticalGeometry,
    pub actuator: ActuatorConfig,
    pub tilt_detector: DetectorConfig,
    pub shear_detector: DetectorConfig,
    pub control: ControlConfig,
    pub calibration: CalibrationConfig,
    pub coadd: CoaddConfig,
    pub logging: LoggingConfig,
}

impl TiltShearConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.geometry
            .validate()
            .map_err(|e| ConfigError::ValidationError {
                message: e.to_string(),
            })?;

        for (name, amplitude) in [
            ("control.step_amplitude", self.control.step_amplitude),
            ("calibration.step_amplitude", self.calibration.step_amplitude),
        ] {
            if !(1..=agilis::MAX_STEP_AMPLITUDE).contains(&amplitude) {
                return Err(ConfigError::ValidationError {
                    message: format!(
                        "{name} must be within 1..={}, got {amplitude}",
                        agilis::MAX_STEP_AMPLITUDE
                    ),
                });
            }
        }

        let intervals = [
            ("control.step_interval_secs", self.control.step_interval_secs),
            ("coadd.interval_secs", self.coadd.interval_secs),
        ];
        for (name, seconds) in intervals {
            if !(seconds.is_finite() && seconds >= 0.0) {
                return Err(ConfigError::ValidationError {
                    message: format!("{name} must be a non-negative number of seconds"),
                });
            }
        }

        let limits = self.control.integral_limits;
        if !(limits.min.is_finite() && limits.max.is_finite()) {
            return Err(ConfigError::ValidationError {
                message: "control.integral_limits must be finite".into(),
            });
        }
        if limits.min > limits.max {
            return Err(ConfigError::ValidationError {
                message: "control.integral_limits.min exceeds max".into(),
            });
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: true,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("tiltshear.toml"))
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            options: ConfigOptions::default(),
        }
    }

    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn path(&self) -> &Path {
        &self.options.config_path
    }

    /// Loads the TOML file and applies `TILTSHEAR__SECTION__KEY` overrides.
    pub fn load(&self) -> anyhow::Result<TiltShearConfig> {
        let config_path = &self.options.config_path;

        if !config_path.exists() {
            if self.options.create_if_missing {
                self.save(&TiltShearConfig::default())
                    .context("Failed to save default config")?;
            } else {
                return Err(ConfigError::FileNotFound {
                    path: config_path.clone(),
                }
                .into());
            }
        }

        let config: TiltShearConfig = config::Config::builder()
            .add_source(
                config::File::from(config_path.as_path()).format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|layered| layered.try_deserialize())
            .map_err(|e| ConfigError::ReadError { source: e })?;

        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, config: &TiltShearConfig) -> anyhow::Result<()> {
        let config_path = &self.options.config_path;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

pub fn init_config() -> anyhow::Result<(ConfigManager, TiltShearConfig)> {
    let manager = ConfigManager::new();
    let config = manager.load()?;
    Ok((manager, config))
}

pub fn create_default_config<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<()> {
    let config_path = path
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(ConfigOptions::default_config_path);

    ConfigManager::with_options(ConfigOptions {
        config_path,
        create_if_missing: true,
    })
    .save(&TiltShearConfig::default())
}
