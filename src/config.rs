//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and every field is optional; missing values take the
//! defaults below, so an empty file is a valid configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::correlator::ParamClientConfig;
use crate::error::{MavLinkError, Result};
use crate::link::LinkConfig;
use crate::mavlink::protocol::MAVLINK_MAX_FRAME_LEN;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub link: LinkSection,
    pub params: ParamsConfig,
    pub commands: CommandsConfig,
    pub ftp: FtpConfig,
    pub calibration: CalibrationConfig,
    pub log: LogConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Device path; empty means probe the usual autopilot device paths
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Link engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkSection {
    #[serde(default = "default_system_id")]
    pub system_id: u8,

    #[serde(default = "default_component_id")]
    pub component_id: u8,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_reassembly_capacity")]
    pub reassembly_capacity: usize,

    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    #[serde(default = "default_idle_read_backoff_ms")]
    pub idle_read_backoff_ms: u64,

    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

/// Parameter protocol configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ParamsConfig {
    #[serde(default = "default_param_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_param_retries")]
    pub retries: u32,
}

/// Command protocol configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

/// FTP configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FtpConfig {
    #[serde(default = "default_ftp_timeout_ms")]
    pub timeout_ms: u64,
}

/// Calibration configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    /// Delay after which gyro, baro and level calibrations count as done
    #[serde(default = "default_simple_completion_delay_ms")]
    pub simple_completion_delay_ms: u64,

    /// Share of 1 g the expected axis must show before a position is sampled
    #[serde(default = "default_imu_min_gravity_fraction")]
    pub imu_min_gravity_fraction: f32,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    /// Directory for daily rolling log files; stderr only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// JSONL file receiving every decoded message in monitor mode
    #[serde(default)]
    pub journal: Option<PathBuf>,
}

// Default value functions
fn default_baud_rate() -> u32 { 115200 }

fn default_system_id() -> u8 { 255 }
fn default_component_id() -> u8 { 190 }
fn default_heartbeat_interval_ms() -> u64 { 1000 }
fn default_reassembly_capacity() -> usize { 4096 }
fn default_read_chunk_size() -> usize { 1024 }
fn default_idle_read_backoff_ms() -> u64 { 10 }
fn default_close_grace_ms() -> u64 { 2000 }

fn default_param_timeout_ms() -> u64 { 1500 }
fn default_param_retries() -> u32 { 3 }

fn default_ack_timeout_ms() -> u64 { 3000 }

fn default_ftp_timeout_ms() -> u64 { 5000 }

fn default_simple_completion_delay_ms() -> u64 { 2000 }
fn default_imu_min_gravity_fraction() -> f32 { 0.7 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            system_id: default_system_id(),
            component_id: default_component_id(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reassembly_capacity: default_reassembly_capacity(),
            read_chunk_size: default_read_chunk_size(),
            idle_read_backoff_ms: default_idle_read_backoff_ms(),
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_param_timeout_ms(),
            retries: default_param_retries(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_ftp_timeout_ms(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            simple_completion_delay_ms: default_simple_completion_delay_ms(),
            imu_min_gravity_fraction: default_imu_min_gravity_fraction(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> MavLinkError {
    MavLinkError::Config(toml::de::Error::custom(message))
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(format!("{} must be between {} and {}", name, min, max)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mav_link_core::config::Config;
    ///
    /// let config = Config::load("mav-link.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            return Err(invalid("baud_rate must be greater than 0"));
        }

        // 0 is the broadcast id and cannot identify a sender
        if self.link.system_id == 0 {
            return Err(invalid("system_id must be between 1 and 255"));
        }

        check_range("heartbeat_interval_ms", self.link.heartbeat_interval_ms, 100, 60000)?;
        check_range("idle_read_backoff_ms", self.link.idle_read_backoff_ms, 1, 1000)?;
        check_range("close_grace_ms", self.link.close_grace_ms, 1, 60000)?;

        if self.link.reassembly_capacity < MAVLINK_MAX_FRAME_LEN {
            return Err(invalid(format!(
                "reassembly_capacity must be at least {} (one maximum frame)",
                MAVLINK_MAX_FRAME_LEN
            )));
        }

        if self.link.read_chunk_size == 0 || self.link.read_chunk_size > self.link.reassembly_capacity {
            return Err(invalid("read_chunk_size must be between 1 and reassembly_capacity"));
        }

        check_range("params.timeout_ms", self.params.timeout_ms, 1, 60000)?;
        if self.params.retries > 10 {
            return Err(invalid("params.retries must be at most 10"));
        }

        check_range("commands.ack_timeout_ms", self.commands.ack_timeout_ms, 1, 60000)?;
        check_range("ftp.timeout_ms", self.ftp.timeout_ms, 1, 60000)?;
        check_range(
            "simple_completion_delay_ms",
            self.calibration.simple_completion_delay_ms,
            0,
            60000,
        )?;

        let fraction = self.calibration.imu_min_gravity_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(invalid("imu_min_gravity_fraction must be between 0.0 and 1.0"));
        }

        Ok(())
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            system_id: self.link.system_id,
            component_id: self.link.component_id,
            heartbeat_interval: Duration::from_millis(self.link.heartbeat_interval_ms),
            reassembly_capacity: self.link.reassembly_capacity,
            read_chunk_size: self.link.read_chunk_size,
            idle_read_backoff: Duration::from_millis(self.link.idle_read_backoff_ms),
            close_grace: Duration::from_millis(self.link.close_grace_ms),
        }
    }

    pub fn param_client_config(&self) -> ParamClientConfig {
        ParamClientConfig {
            timeout: Duration::from_millis(self.params.timeout_ms),
            retries: self.params.retries,
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.commands.ack_timeout_ms)
    }

    pub fn ftp_timeout(&self) -> Duration {
        Duration::from_millis(self.ftp.timeout_ms)
    }

    pub fn simple_completion_delay(&self) -> Duration {
        Duration::from_millis(self.calibration.simple_completion_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let link = config.link_config();
        assert_eq!(link.system_id, 255);
        assert_eq!(link.component_id, 190);
        assert_eq!(link.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.param_client_config().retries, 3);
        assert_eq!(config.ack_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.link.reassembly_capacity, 4096);
        assert_eq!(config.ftp_timeout(), Duration::from_secs(5));
        assert!(config.log.dir.is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
port = "/dev/ttyUSB0"
baud_rate = 57600

[link]
system_id = 254
heartbeat_interval_ms = 500

[params]
retries = 1

[calibration]
simple_completion_delay_ms = 0

[log]
journal = "/tmp/mav.jsonl"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.link_config().system_id, 254);
        assert_eq!(config.link_config().component_id, 190);
        assert_eq!(config.link_config().heartbeat_interval, Duration::from_millis(500));
        assert_eq!(config.param_client_config().retries, 1);
        assert_eq!(config.simple_completion_delay(), Duration::ZERO);
        assert_eq!(config.log.journal, Some(PathBuf::from("/tmp/mav.jsonl")));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load("/nonexistent/mav-link.toml");
        assert!(matches!(result, Err(MavLinkError::Io(_))));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(Config::parse("[link"), Err(MavLinkError::Config(_))));
        assert!(matches!(
            Config::parse("[link]\nsystem_id = 300"),
            Err(MavLinkError::Config(_))
        ));
    }

    #[test]
    fn test_system_id_zero() {
        let mut config = Config::default();
        config.link.system_id = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_interval_bounds() {
        let mut config = Config::default();
        config.link.heartbeat_interval_ms = 50;
        assert!(config.validate().is_err());

        config.link.heartbeat_interval_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reassembly_capacity_below_one_frame() {
        let mut config = Config::default();
        config.link.reassembly_capacity = MAVLINK_MAX_FRAME_LEN - 1;
        assert!(config.validate().is_err());

        config.link.reassembly_capacity = MAVLINK_MAX_FRAME_LEN;
        config.link.read_chunk_size = 256;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_read_chunk_larger_than_buffer() {
        let mut config = Config::default();
        config.link.read_chunk_size = config.link.reassembly_capacity + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeouts() {
        let mut config = Config::default();
        config.params.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.commands.ack_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ftp.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_too_many_retries() {
        let mut config = Config::default();
        config.params.retries = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gravity_fraction_out_of_range() {
        let mut config = Config::default();
        config.calibration.imu_min_gravity_fraction = 1.5;
        assert!(config.validate().is_err());

        config.calibration.imu_min_gravity_fraction = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_baud_rate() {
        let mut config = Config::default();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());
    }
}
