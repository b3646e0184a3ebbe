//! Pulser server configuration using Figment
//!
//! Configuration is loaded from:
//! 1. config/tellie.toml (base configuration)
//! 2. Environment variables (prefixed with TELLIE_, `__` between sections)
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! configuration that talks to `/dev/ttyUSB0` at 9600 baud.

use crate::protocol::opcodes::ChipVariant;
use crate::protocol::session::SessionOptions;
use crate::device::ReadoutTiming;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TellieConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial link to the control box
    #[serde(default)]
    pub serial: SerialConfig,
    /// Firmware dialect and echo handling
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Pauses and timeouts
    #[serde(default)]
    pub timing: TimingConfig,
    /// RPC server settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path (e.g., "/dev/ttyUSB0", "/dev/tty.usbserial-FTE3C0PG")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Drive the built-in simulated pulser instead of hardware
    #[serde(default)]
    pub simulate: bool,
    /// Toggle RTS to reset the box when the server starts
    #[serde(default = "default_reset_on_start")]
    pub reset_on_start: bool,
}

/// Protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Firmware opcode table
    #[serde(default)]
    pub chip: ChipVariant,
    /// Number of reads allowed while collecting a command echo
    #[serde(default = "default_echo_read_attempts")]
    pub echo_read_attempts: u32,
    /// Maximum bytes taken from the link per read
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

/// Pauses and timeouts, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause after each written chunk
    #[serde(default = "default_inter_chunk_pause")]
    pub inter_chunk_pause_ms: u64,
    /// Link read timeout
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Pause between the steps of desync recovery
    #[serde(default = "default_recovery_pause")]
    pub recovery_pause_ms: u64,
    /// RTS high and RTS low hold time during reset
    #[serde(default = "default_reset_settle")]
    pub reset_settle_ms: u64,
    /// Interval between readout polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Deadline for a PIN readout to appear
    #[serde(default = "default_pin_timeout")]
    pub pin_timeout_ms: u64,
    /// Deadline for a temperature readout to appear
    #[serde(default = "default_temp_timeout")]
    pub temp_timeout_ms: u64,
}

/// RPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the gRPC server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Pending commands the device worker queues before callers wait
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "tellie".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_reset_on_start() -> bool {
    true
}

fn default_echo_read_attempts() -> u32 {
    3
}

fn default_read_chunk() -> usize {
    100
}

fn default_inter_chunk_pause() -> u64 {
    100
}

fn default_read_timeout() -> u64 {
    300
}

fn default_recovery_pause() -> u64 {
    100
}

fn default_reset_settle() -> u64 {
    3000
}

fn default_poll_interval() -> u64 {
    100
}

fn default_pin_timeout() -> u64 {
    2000
}

fn default_temp_timeout() -> u64 {
    1000
}

fn default_listen_addr() -> String {
    "127.0.0.1:5030".to_string()
}

fn default_queue_capacity() -> usize {
    32
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            simulate: false,
            reset_on_start: default_reset_on_start(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            chip: ChipVariant::default(),
            echo_read_attempts: default_echo_read_attempts(),
            read_chunk: default_read_chunk(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            inter_chunk_pause_ms: default_inter_chunk_pause(),
            read_timeout_ms: default_read_timeout(),
            recovery_pause_ms: default_recovery_pause(),
            reset_settle_ms: default_reset_settle(),
            poll_interval_ms: default_poll_interval(),
            pin_timeout_ms: default_pin_timeout(),
            temp_timeout_ms: default_temp_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl TellieConfig {
    /// Load configuration from config/tellie.toml and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/tellie.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply. After loading, configuration is validated.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TELLIE_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !self.serial.simulate && self.serial.port.is_empty() {
            return Err(ConfigError::ValidationError(
                "serial.port cannot be empty unless serial.simulate is set".to_string(),
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "serial.baud_rate must be > 0".to_string(),
            ));
        }

        if self.protocol.echo_read_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "protocol.echo_read_attempts must be > 0".to_string(),
            ));
        }

        if self.protocol.read_chunk == 0 {
            return Err(ConfigError::ValidationError(
                "protocol.read_chunk must be > 0".to_string(),
            ));
        }

        if self.timing.read_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing.read_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.timing.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing.poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.server.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "server.queue_capacity must be > 0".to_string(),
            ));
        }

        self.listen_addr()?;
        Ok(())
    }

    /// Parsed RPC listen address
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen_addr.parse().map_err(|e| {
            ConfigError::ValidationError(format!(
                "Invalid server.listen_addr '{}': {}",
                self.server.listen_addr, e
            ))
        })
    }

    /// Transport session options derived from the protocol and timing sections
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            inter_chunk_pause: Duration::from_millis(self.timing.inter_chunk_pause_ms),
            read_timeout: Duration::from_millis(self.timing.read_timeout_ms),
            recovery_pause: Duration::from_millis(self.timing.recovery_pause_ms),
            reset_settle: Duration::from_millis(self.timing.reset_settle_ms),
            echo_read_attempts: self.protocol.echo_read_attempts,
            read_chunk: self.protocol.read_chunk,
        }
    }

    /// Readout polling deadlines
    pub fn readout_timing(&self) -> ReadoutTiming {
        ReadoutTiming {
            poll_interval: Duration::from_millis(self.timing.poll_interval_ms),
            pin_timeout: Duration::from_millis(self.timing.pin_timeout_ms),
            temp_timeout: Duration::from_millis(self.timing.temp_timeout_ms),
        }
    }
}
