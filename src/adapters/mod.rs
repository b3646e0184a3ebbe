//! Byte-stream links to the control box
//!
//! This module contains the `Link` trait and its implementations. A link is
//! the lowest layer of the driver: it moves raw bytes and toggles the RTS
//! line, and knows nothing about opcodes or echoes.

pub mod mock_adapter;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use mock_adapter::MockAdapter;
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialAdapter;

use crate::config::SerialConfig;
use crate::error::TellieResult;
use async_trait::async_trait;
use std::time::Duration;

/// Asynchronous byte-level link to the pulser control box.
#[async_trait]
pub trait Link: Send {
    /// Short identifier for logging (port path, "mock").
    fn name(&self) -> &str;

    /// Write all bytes to the link.
    async fn write(&mut self, bytes: &[u8]) -> TellieResult<()>;

    /// Read up to `max` bytes, waiting at most `timeout`.
    ///
    /// Returns whatever arrived before the deadline, which may be nothing.
    /// A timeout is not an error at this layer.
    async fn read(&mut self, max: usize, timeout: Duration) -> TellieResult<Vec<u8>>;

    /// Drive the RTS line, used to reset the box.
    async fn set_rts(&mut self, level: bool) -> TellieResult<()>;

    /// Close the link. Later reads and writes fail with `NotConnected`.
    async fn close(&mut self) -> TellieResult<()>;

    fn is_connected(&self) -> bool;
}

/// Open the link described by the serial configuration.
///
/// With `simulate` set this returns a `MockAdapter` driving the built-in
/// simulated pulser; otherwise the serial port is opened.
pub fn open_link(config: &SerialConfig) -> TellieResult<Box<dyn Link>> {
    if config.simulate {
        tracing::info!("Using simulated pulser link");
        return Ok(Box::new(MockAdapter::new()));
    }

    #[cfg(feature = "instrument_serial")]
    {
        let adapter = SerialAdapter::open(&config.port, config.baud_rate)?;
        Ok(Box::new(adapter))
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        Err(crate::error::TellieError::SerialFeatureDisabled)
    }
}
