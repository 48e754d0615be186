//! # Mount Configuration
//!
//! One TOML file describes the pins, sensors and control gains of the mount.
//! Every section and field is optional; omitted values take the defaults below.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [mount]
//! backend = "raspberry_pi"
//! pulse_delay_us = 2500
//!
//! [axes.horizon]
//! dir_pin = 20
//! step_pin = 21
//! clockwise_level = "high"
//!
//! [tracking.rotation]
//! kp = 0.05
//! ki = 0.005
//! max_step = 50
//! polarity = "inverted"
//! ```
//!
//! - An `[axes.*]` table must name both pins when present.
//! - Leaving out `clockwise_level` works but logs a warning at startup.

// src/config.rs - Single configuration file
use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::{PiGains, Polarity};
use crate::hardware::PinLevel;
use crate::motion::AxisId;
use crate::sensing::AlignSettings;
use crate::tracking::{LightSettings, SessionSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub mount: MountConfig,
    #[serde(default)]
    pub axes: AxesConfig,
    #[serde(default)]
    pub imu: ImuConfig,
    #[serde(default)]
    pub compass: CompassConfig,
    #[serde(default)]
    pub photo_sensor: PhotoSensorConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Simulated,
    RaspberryPi,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MountConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Hold time of each half of a step pulse.
    #[serde(default = "default_pulse_delay_us")]
    pub pulse_delay_us: u64,
    #[serde(default = "default_steps_per_revolution")]
    pub steps_per_revolution: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            pulse_delay_us: default_pulse_delay_us(),
            steps_per_revolution: default_steps_per_revolution(),
        }
    }
}

/// BCM pin numbers of one stepper driver.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxisConfig {
    pub dir_pin: u8,
    pub step_pin: u8,
    /// Direction-pin level that turns the axis clockwise.
    #[serde(default)]
    pub clockwise_level: Option<PinLevel>,
}

impl AxisConfig {
    pub fn clockwise_level(&self) -> PinLevel {
        self.clockwise_level.unwrap_or(PinLevel::High)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxesConfig {
    #[serde(default = "default_horizon_axis")]
    pub horizon: AxisConfig,
    #[serde(default = "default_rotation_axis")]
    pub rotation: AxisConfig,
}

impl AxesConfig {
    pub fn get(&self, axis: AxisId) -> &AxisConfig {
        match axis {
            AxisId::Horizon => &self.horizon,
            AxisId::Rotation => &self.rotation,
        }
    }
}

impl Default for AxesConfig {
    fn default() -> Self {
        Self {
            horizon: default_horizon_axis(),
            rotation: default_rotation_axis(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImuConfig {
    #[serde(default = "default_i2c_bus")]
    pub bus: u8,
    #[serde(default = "default_imu_address")]
    pub address: u16,
    #[serde(default = "default_filter_window")]
    pub filter_window: usize,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            bus: default_i2c_bus(),
            address: default_imu_address(),
            filter_window: default_filter_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompassConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_i2c_bus")]
    pub bus: u8,
    #[serde(default = "default_compass_address")]
    pub address: u16,
    #[serde(default = "default_filter_window")]
    pub filter_window: usize,
    #[serde(default = "default_tolerance_deg")]
    pub tolerance_deg: f64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_align_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_compass_axis")]
    pub axis: AxisId,
}

impl CompassConfig {
    pub fn align_settings(&self) -> AlignSettings {
        AlignSettings {
            axis: self.axis,
            tolerance_deg: self.tolerance_deg,
            settle: Duration::from_millis(self.settle_ms),
            max_steps: self.max_steps,
        }
    }
}

impl Default for CompassConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bus: default_i2c_bus(),
            address: default_compass_address(),
            filter_window: default_filter_window(),
            tolerance_deg: default_tolerance_deg(),
            settle_ms: default_settle_ms(),
            max_steps: default_align_max_steps(),
            axis: default_compass_axis(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhotoSensorConfig {
    #[serde(default = "default_photo_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_filter_window")]
    pub filter_window: usize,
    /// Give up waiting for a single frame after this long; unbounded when unset.
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
}

impl PhotoSensorConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for PhotoSensorConfig {
    fn default() -> Self {
        Self {
            port: default_photo_port(),
            baud: default_baud(),
            filter_window: default_filter_window(),
            read_timeout_ms: None,
        }
    }
}

/// PI loop of one axis.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PiAxisConfig {
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default = "default_max_step")]
    pub max_step: f64,
    #[serde(default)]
    pub polarity: Polarity,
}

impl PiAxisConfig {
    pub fn gains(&self) -> PiGains {
        PiGains {
            kp: self.kp,
            ki: self.ki,
            max_step: self.max_step,
        }
    }
}

impl Default for PiAxisConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: 0.0,
            max_step: default_max_step(),
            polarity: Polarity::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackingConfig {
    #[serde(default = "default_sample_period_ms")]
    pub sample_period_ms: u64,
    #[serde(default)]
    pub horizon: PiAxisConfig,
    #[serde(default)]
    pub rotation: PiAxisConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: default_sample_period_ms(),
            horizon: PiAxisConfig::default(),
            rotation: PiAxisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Orientation reported by the simulated backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_sim_horizon_deg")]
    pub horizon_deg: f64,
    #[serde(default)]
    pub rotation_deg: f64,
    #[serde(default = "default_sim_noise_deg")]
    pub noise_deg: f64,
    #[serde(default = "default_sim_heading_deg")]
    pub heading_deg: f64,
    #[serde(default = "default_sim_heading_deg_per_step")]
    pub heading_deg_per_step: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            horizon_deg: default_sim_horizon_deg(),
            rotation_deg: 0.0,
            noise_deg: default_sim_noise_deg(),
            heading_deg: default_sim_heading_deg(),
            heading_deg_per_step: default_sim_heading_deg_per_step(),
        }
    }
}

impl Config {
    pub fn pulse_delay(&self) -> Duration {
        Duration::from_micros(self.mount.pulse_delay_us)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            sample_period: Duration::from_millis(self.tracking.sample_period_ms),
            light: LightSettings {
                window: self.photo_sensor.filter_window,
                gains: [self.tracking.horizon.gains(), self.tracking.rotation.gains()],
                polarity: [self.tracking.horizon.polarity, self.tracking.rotation.polarity],
            },
        }
    }

    /// Reject values the mount cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.mount.pulse_delay_us == 0 {
            return invalid("mount.pulse_delay_us must be > 0".to_string());
        }
        if self.mount.steps_per_revolution == 0 {
            return invalid("mount.steps_per_revolution must be > 0".to_string());
        }
        if self.tracking.sample_period_ms == 0 {
            return invalid("tracking.sample_period_ms must be > 0".to_string());
        }
        for (name, window) in [
            ("imu", self.imu.filter_window),
            ("compass", self.compass.filter_window),
            ("photo_sensor", self.photo_sensor.filter_window),
        ] {
            if window == 0 {
                return invalid(format!("{}.filter_window must be > 0", name));
            }
        }
        for (name, pi) in [("horizon", &self.tracking.horizon), ("rotation", &self.tracking.rotation)] {
            for (field, value) in [("kp", pi.kp), ("ki", pi.ki), ("max_step", pi.max_step)] {
                if !value.is_finite() || value < 0.0 {
                    return invalid(format!(
                        "tracking.{}.{} must be a finite, non-negative number (got {})",
                        name, field, value
                    ));
                }
            }
        }
        if !self.compass.tolerance_deg.is_finite() || self.compass.tolerance_deg < 0.0 {
            return invalid("compass.tolerance_deg must be >= 0".to_string());
        }

        let mut pins = HashSet::new();
        for axis in AxisId::ALL {
            let cfg = self.axes.get(axis);
            for pin in [cfg.dir_pin, cfg.step_pin] {
                if !pins.insert(pin) {
                    return invalid(format!("GPIO {} is assigned more than once", pin));
                }
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_pulse_delay_us() -> u64 { 2500 }
fn default_steps_per_revolution() -> u32 { 60 }
fn default_horizon_axis() -> AxisConfig { AxisConfig { dir_pin: 20, step_pin: 21, clockwise_level: None } }
fn default_rotation_axis() -> AxisConfig { AxisConfig { dir_pin: 8, step_pin: 7, clockwise_level: None } }
fn default_i2c_bus() -> u8 { 1 }
fn default_imu_address() -> u16 { 0x69 }
fn default_compass_address() -> u16 { 0x0D }
fn default_filter_window() -> usize { 10 }
fn default_tolerance_deg() -> f64 { 2.0 }
fn default_settle_ms() -> u64 { 100 }
fn default_align_max_steps() -> u32 { 720 }
fn default_compass_axis() -> AxisId { AxisId::Rotation }
fn default_photo_port() -> String { "/dev/serial0".to_string() }
fn default_baud() -> u32 { 115200 }
fn default_kp() -> f64 { 1.0 }
fn default_max_step() -> f64 { 100.0 }
fn default_sample_period_ms() -> u64 { 500 }
fn default_bind() -> String { "0.0.0.0:3000".to_string() }
fn default_event_buffer() -> usize { 64 }
fn default_sim_horizon_deg() -> f64 { 35.0 }
fn default_sim_noise_deg() -> f64 { 0.2 }
fn default_sim_heading_deg() -> f64 { 45.0 }
fn default_sim_heading_deg_per_step() -> f64 { 1.0 }

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("Rejected config '{}': {}", path, e);
        return Err(e);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.mount.backend, Backend::Simulated);
        assert_eq!(config.pulse_delay(), Duration::from_micros(2500));
        assert_eq!(config.mount.steps_per_revolution, 60);
        assert_eq!((config.axes.horizon.dir_pin, config.axes.horizon.step_pin), (20, 21));
        assert_eq!((config.axes.rotation.dir_pin, config.axes.rotation.step_pin), (8, 7));
        assert_eq!(config.imu.address, 0x69);
        assert_eq!(config.compass.address, 0x0D);
        assert_eq!(config.photo_sensor.port, "/dev/serial0");
        assert_eq!(config.photo_sensor.baud, 115200);
        assert_eq!(config.tracking.horizon.gains(), PiGains::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("mount.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            "[mount]\nbackend = 'raspberry_pi'\n\n[axes.rotation]\ndir_pin = 5\nstep_pin = 6\nclockwise_level = 'low'\n\n[tracking.horizon]\nkp = 0.05\nki = 0.005\nmax_step = 50\npolarity = 'inverted'"
        )
        .unwrap();
        file.flush().unwrap();

        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.mount.backend, Backend::RaspberryPi);
        assert_eq!(config.axes.rotation.dir_pin, 5);
        assert_eq!(config.axes.rotation.clockwise_level(), PinLevel::Low);
        // Defaults for missing fields
        assert_eq!(config.axes.horizon.dir_pin, 20);
        assert_eq!(config.axes.horizon.clockwise_level, None);
        assert_eq!(config.mount.pulse_delay_us, 2500);

        let settings = config.session_settings();
        assert_eq!(settings.light.gains[0].max_step, 50.0);
        assert_eq!(settings.light.polarity, [Polarity::Inverted, Polarity::Normal]);
        assert_eq!(settings.sample_period, Duration::from_millis(500));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.imu.filter_window = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.tracking.rotation.ki = -0.1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.tracking.horizon.max_step = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mount.pulse_delay_us = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.axes.rotation.step_pin = 21;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("GPIO 21"));
    }
}
