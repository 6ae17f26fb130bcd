//! Process configuration, loaded once from YAML and passed around by value.

use crate::error::ConfigError;
use cuex_catalog::{BayAssignment, CatalogResult, CatalogSettings, StimulusCatalog};
use cuex_core::TestCondition;
use cuex_devices::{ForceSensorConfig, MotorSettings, SampleSource, TouchConfig, TurntableConfig};
use cuex_experiment::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: PathsConfig,
    pub network: NetworkConfig,
    pub hardware: HardwareConfig,
    pub experiment: ExperimentSection,
    pub platform: PlatformConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub base_directory: PathBuf,
    pub alcohol_images: PathBuf,
    pub neutral_images: PathBuf,
    pub personalized_images: Option<PathBuf>,
    /// TTF used for instruction text.
    pub font: Option<PathBuf>,
    pub ticcmd: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from("./data"),
            alcohol_images: PathBuf::from("./stimuli/alcohol"),
            neutral_images: PathBuf::from("./stimuli/neutral"),
            personalized_images: None,
            font: None,
            ticcmd: "ticcmd".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub host_address: String,
    pub control_port: u16,
    /// Port the host's marker bus serves subscribers on.
    pub marker_port: u16,
    pub force_sensor_port: u16,
    pub recorder_address: String,
    pub latency_threshold_ms: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_address: "127.0.0.1".to_string(),
            control_port: 5005,
            marker_port: 5007,
            force_sensor_port: 5006,
            recorder_address: "127.0.0.1:22345".to_string(),
            latency_threshold_ms: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HardwareConfig {
    /// `user@host` running the sensor program; the stream is read from
    /// the same host.
    pub force_sensor_host: Option<String>,
    pub force_sensor_command: String,
    pub carousel_serial: Option<String>,
    pub door_serial: Option<String>,
    pub turntable_ssh_host: Option<String>,
    pub steps_per_rev: i64,
    pub door_open_steps: i64,
    pub dwell_ms: u64,
    pub motor_poll_ms: u64,
    pub motor_timeout_ms: u64,
    pub touch_threshold: i64,
    pub rezero_threshold: i64,
    pub rezero_window_ms: u64,
    pub bay_overrides: BTreeMap<String, u8>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            force_sensor_host: None,
            force_sensor_command: "python3 ~/touchbox/stream.py".to_string(),
            carousel_serial: None,
            door_serial: None,
            turntable_ssh_host: None,
            steps_per_rev: 3200,
            door_open_steps: 400,
            dwell_ms: 5000,
            motor_poll_ms: 20,
            motor_timeout_ms: 15_000,
            touch_threshold: 500,
            rezero_threshold: 50,
            rezero_window_ms: 2000,
            bay_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentSection {
    pub randomize_cues: bool,
    pub seed: Option<u64>,
    pub repetitions: BTreeMap<String, u32>,
    /// Test name to image basenames.
    pub manual_orders: BTreeMap<String, Vec<String>>,
    /// Test name to a CSV, TSV or spreadsheet order file. Applied after
    /// `manual_orders`, so a file wins for the same test.
    pub order_files: BTreeMap<String, PathBuf>,
    pub passive_dwell_ms: u64,
    pub stroop_dwell_ms: u64,
    pub crosshair_min_ms: u64,
    pub crosshair_max_ms: u64,
    pub pre_instructions_ms: u64,
    pub baseline_ms: u64,
    pub countdown_ms: u64,
    pub post_instructions_ms: u64,
}

impl Default for ExperimentSection {
    fn default() -> Self {
        Self {
            randomize_cues: false,
            seed: None,
            repetitions: BTreeMap::new(),
            manual_orders: BTreeMap::new(),
            order_files: BTreeMap::new(),
            passive_dwell_ms: 5000,
            stroop_dwell_ms: 2000,
            crosshair_min_ms: 2000,
            crosshair_max_ms: 5000,
            pre_instructions_ms: 5000,
            baseline_ms: 60_000,
            countdown_ms: 3000,
            post_instructions_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    #[default]
    Client,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    pub role: Role,
    pub fullscreen: bool,
    pub mirror: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            fullscreen: true,
            mirror: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// An empty document yields the defaults.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let exp = &self.experiment;
        if exp.crosshair_min_ms > exp.crosshair_max_ms {
            return Err(ConfigError::Invalid(format!(
                "crosshair_min_ms {} exceeds crosshair_max_ms {}",
                exp.crosshair_min_ms, exp.crosshair_max_ms
            )));
        }
        if exp.passive_dwell_ms == 0 || exp.stroop_dwell_ms == 0 {
            return Err(ConfigError::Invalid("image dwell must be positive".into()));
        }
        if self.hardware.steps_per_rev <= 0 {
            return Err(ConfigError::Invalid("steps_per_rev must be positive".into()));
        }
        if let Some((name, bay)) = self.hardware.bay_overrides.iter().find(|(_, b)| **b >= cuex_catalog::BAY_COUNT) {
            return Err(ConfigError::Invalid(format!("bay {bay} for {name:?} is out of range")));
        }
        for name in exp.manual_orders.keys() {
            name.parse::<TestCondition>()
                .map_err(|e| ConfigError::Invalid(format!("manual_orders: {e}")))?;
        }
        for name in exp.order_files.keys() {
            name.parse::<TestCondition>()
                .map_err(|e| ConfigError::Invalid(format!("order_files: {e}")))?;
        }
        if self.network.latency_threshold_ms <= 0.0 {
            return Err(ConfigError::Invalid("latency_threshold_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn engine_config(&self, test: TestCondition) -> EngineConfig {
        let exp = &self.experiment;
        let mut config = EngineConfig::for_test(test);
        config.image_dwell = Duration::from_millis(if config.is_stroop() {
            exp.stroop_dwell_ms
        } else {
            exp.passive_dwell_ms
        });
        config.crosshair_range_ms = (exp.crosshair_min_ms, exp.crosshair_max_ms);
        config.pre_instructions = Duration::from_millis(exp.pre_instructions_ms);
        config.baseline = Duration::from_millis(exp.baseline_ms);
        config.countdown = Duration::from_millis(exp.countdown_ms);
        config.post_instructions = Duration::from_millis(exp.post_instructions_ms);
        config
    }

    pub fn catalog_settings(&self) -> CatalogSettings {
        CatalogSettings {
            randomize_cues: self.experiment.randomize_cues,
            seed: self.experiment.seed,
            ..Default::default()
        }
        .with_repetitions(self.experiment.repetitions.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    /// Scans the image folders and applies the configured manual orders.
    pub fn build_catalog(&self) -> Result<StimulusCatalog, crate::SessionError> {
        let mut catalog = StimulusCatalog::from_folders(
            &self.paths.alcohol_images,
            &self.paths.neutral_images,
            self.paths.personalized_images.as_deref(),
            self.catalog_settings(),
        )?;
        for (name, order) in &self.experiment.manual_orders {
            let test = name
                .parse::<TestCondition>()
                .map_err(|e| ConfigError::Invalid(format!("manual_orders: {e}")))?;
            catalog.set_manual_order(test, order.as_slice())?;
        }
        for (name, path) in &self.experiment.order_files {
            let test = name
                .parse::<TestCondition>()
                .map_err(|e| ConfigError::Invalid(format!("order_files: {e}")))?;
            let count = catalog.import_order(test, path)?;
            tracing::info!(%test, path = %path.display(), images = count, "manual order imported");
        }
        Ok(catalog)
    }

    pub fn bay_assignment(&self) -> CatalogResult<BayAssignment> {
        BayAssignment::with_overrides(self.hardware.bay_overrides.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    pub fn turntable_config(&self) -> TurntableConfig {
        let hw = &self.hardware;
        TurntableConfig {
            steps_per_rev: hw.steps_per_rev,
            door_open_steps: hw.door_open_steps,
            poll: Duration::from_millis(hw.motor_poll_ms),
            timeout: Duration::from_millis(hw.motor_timeout_ms),
            carousel: MotorSettings::default(),
            door: MotorSettings::default(),
        }
    }

    pub fn turntable_dwell(&self) -> Duration {
        Duration::from_millis(self.hardware.dwell_ms)
    }

    pub fn touch_config(&self) -> TouchConfig {
        TouchConfig {
            threshold: self.hardware.touch_threshold,
            rezero_threshold: self.hardware.rezero_threshold,
            rezero_window: Duration::from_millis(self.hardware.rezero_window_ms),
        }
    }

    pub fn force_sensor_config(&self, simulate: bool) -> ForceSensorConfig {
        let hw = &self.hardware;
        let source = if simulate {
            SampleSource::Simulated {
                touch_delay: Duration::from_millis(1500),
            }
        } else {
            SampleSource::Remote
        };
        let host = hw
            .force_sensor_host
            .as_deref()
            .map(|target| target.rsplit('@').next().unwrap_or(target).to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        ForceSensorConfig {
            source,
            host,
            port: self.network.force_sensor_port,
            ssh_host: hw.force_sensor_host.clone(),
            command: hw.force_sensor_host.as_ref().map(|_| hw.force_sensor_command.clone()),
            touch: self.touch_config(),
            ..Default::default()
        }
    }

    pub fn control_address(&self) -> String {
        format!("{}:{}", self.network.host_address, self.network.control_port)
    }

    pub fn marker_address(&self) -> String {
        format!("{}:{}", self.network.host_address, self.network.marker_port)
    }

    pub fn latency_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.network.latency_threshold_ms / 1000.0)
    }
}
