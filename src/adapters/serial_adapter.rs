//! Serial link over tokio-serial
//!
//! The control box enumerates as a USB virtual COM port running 8N1 without
//! flow control. RTS is wired to the box reset line.

use super::Link;
use crate::error::{TellieError, TellieResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

/// Serial link to the control box
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,
    /// The open stream, `None` after close
    port: Option<SerialStream>,
}

impl SerialAdapter {
    /// Open `port_name` at `baud_rate`, 8 data bits, no parity, one stop bit
    pub fn open(port_name: &str, baud_rate: u32) -> TellieResult<Self> {
        let port = tokio_serial::new(port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;

        tracing::info!(port = %port_name, baud_rate, "Serial port opened");

        Ok(Self {
            port_name: port_name.to_string(),
            port: Some(port),
        })
    }

    fn port(&mut self) -> TellieResult<&mut SerialStream> {
        self.port.as_mut().ok_or(TellieError::NotConnected)
    }
}

#[async_trait]
impl Link for SerialAdapter {
    fn name(&self) -> &str {
        &self.port_name
    }

    async fn write(&mut self, bytes: &[u8]) -> TellieResult<()> {
        let port = self.port()?;
        port.write_all(bytes).await?;
        port.flush().await?;
        tracing::trace!(bytes = ?bytes, "Serial write");
        Ok(())
    }

    async fn read(&mut self, max: usize, timeout: Duration) -> TellieResult<Vec<u8>> {
        let port = self.port()?;
        let mut collected = Vec::with_capacity(max);
        let mut buf = vec![0u8; max];
        let deadline = Instant::now() + timeout;

        // Keep reading until `max` bytes arrived or the deadline passed
        while collected.len() < max {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let want = max - collected.len();
            match tokio::time::timeout(remaining, port.read(&mut buf[..want])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }

        tracing::trace!(bytes = ?collected, "Serial read");
        Ok(collected)
    }

    async fn set_rts(&mut self, level: bool) -> TellieResult<()> {
        self.port()?.write_request_to_send(level)?;
        Ok(())
    }

    async fn close(&mut self) -> TellieResult<()> {
        if self.port.take().is_some() {
            tracing::debug!(port = %self.port_name, "Serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}
