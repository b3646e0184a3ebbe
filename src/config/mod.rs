//! Process configuration
//!
//! Configuration is loaded with Figment from (in order of precedence):
//! 1. Environment variables prefixed with `TELLIE_`
//! 2. TOML configuration file (default: `config/tellie.toml`)
//!
//! # Example
//!
//! ```no_run
//! use tellie_control::config::TellieConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TellieConfig::load_from("config/tellie.toml")?;
//!     println!("Serial port: {}", config.serial.port);
//!     println!("Listening on: {}", config.server.listen_addr);
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! Nested keys are separated by a double underscore so that key names may keep
//! their own underscores:
//!
//! ```text
//! TELLIE_SERIAL__PORT=/dev/ttyUSB1
//! TELLIE_APPLICATION__LOG_LEVEL=debug
//! TELLIE_TIMING__RESET_SETTLE_MS=1000
//! ```

pub mod tellie_config;

pub use tellie_config::{
    ApplicationConfig, ConfigError, ProtocolConfig, SerialConfig, ServerConfig, TellieConfig,
    TimingConfig,
};
