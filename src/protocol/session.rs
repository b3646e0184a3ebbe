//! Transport session: echo-verified command exchange.
//!
//! The box echoes every setting command. The session writes a
//! [`CommandDescriptor`], collects the echo and compares it byte for byte.
//! A mismatch leaves the box in an unknown state, so before the error is
//! returned the session drains the buffer, sends stop and clear, and drains
//! again. That recovery runs exactly once per failed command.

use super::codec::{Codec, CommandDescriptor};
use crate::adapters::Link;
use crate::error::{TellieError, TellieResult};
use std::time::Duration;
use tokio::time::sleep;

/// Pauses, timeouts and read sizes used by the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Pause after each written chunk.
    pub inter_chunk_pause: Duration,
    /// Link read timeout.
    pub read_timeout: Duration,
    /// Pause between recovery steps.
    pub recovery_pause: Duration,
    /// RTS hold time, high and low, during reset.
    pub reset_settle: Duration,
    /// Reads allowed while collecting an echo.
    pub echo_read_attempts: u32,
    /// Bytes requested per buffer read.
    pub read_chunk: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            inter_chunk_pause: Duration::from_millis(100),
            read_timeout: Duration::from_millis(300),
            recovery_pause: Duration::from_millis(100),
            reset_settle: Duration::from_secs(3),
            echo_read_attempts: 3,
            read_chunk: 100,
        }
    }
}

impl SessionOptions {
    /// Options with every pause set to zero, for simulated links.
    pub fn immediate() -> Self {
        Self {
            inter_chunk_pause: Duration::ZERO,
            read_timeout: Duration::from_millis(1),
            recovery_pause: Duration::ZERO,
            reset_settle: Duration::ZERO,
            ..Self::default()
        }
    }
}

pub(crate) fn printable(bytes: &[u8]) -> String {
    bytes.escape_ascii().to_string()
}

/// Owns the link and serializes command exchanges on it.
pub struct TransportSession {
    link: Box<dyn Link>,
    codec: Codec,
    options: SessionOptions,
}

impl TransportSession {
    pub fn new(link: Box<dyn Link>, codec: Codec, options: SessionOptions) -> Self {
        Self {
            link,
            codec,
            options,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn link_name(&self) -> &str {
        self.link.name()
    }

    /// Write a command and verify its echo.
    ///
    /// A lone null byte instead of the echo means the box lost power and
    /// dropped the command; it is resent once. Any other mismatch runs the
    /// stop/clear recovery and returns [`TellieError::ProtocolDesync`].
    pub async fn send(&mut self, command: &CommandDescriptor) -> TellieResult<()> {
        tracing::debug!(command = %printable(&command.wire_bytes()), "Sending command");
        self.write_chunks(command).await?;

        let Some(expected) = command.echo.as_deref() else {
            return Ok(());
        };

        let mut observed = self.read_echo(expected).await?;
        if observed == [0] {
            tracing::warn!(
                command = %printable(&command.wire_bytes()),
                "Device power lost, resending command"
            );
            self.write_chunks(command).await?;
            observed = self.read_echo(expected).await?;
        }

        if observed == expected {
            tracing::trace!(echo = %printable(&observed), "Echo verified");
            Ok(())
        } else {
            Err(self.recover(observed, expected.to_vec()).await)
        }
    }

    async fn write_chunks(&mut self, command: &CommandDescriptor) -> TellieResult<()> {
        for chunk in &command.chunks {
            self.link.write(chunk).await?;
            if !self.options.inter_chunk_pause.is_zero() {
                sleep(self.options.inter_chunk_pause).await;
            }
        }
        Ok(())
    }

    /// Collect bytes until the echo is complete, diverges, or the attempts
    /// run out.
    async fn read_echo(&mut self, expected: &[u8]) -> TellieResult<Vec<u8>> {
        let mut observed = Vec::with_capacity(expected.len());
        for _ in 0..self.options.echo_read_attempts {
            let want = expected.len().saturating_sub(observed.len()).max(1);
            let chunk = self.link.read(want, self.options.read_timeout).await?;
            observed.extend_from_slice(&chunk);
            if observed.len() >= expected.len() || !expected.starts_with(&observed) {
                break;
            }
        }
        Ok(observed)
    }

    /// Bring the box back to a known state after an unexpected buffer.
    async fn recover(&mut self, observed: Vec<u8>, expected: Vec<u8>) -> TellieError {
        tracing::warn!(
            observed = %printable(&observed),
            expected = %printable(&expected),
            "Unexpected buffer output, sending stop and clear"
        );
        match self.stop_and_clear().await {
            Ok(remainder) => TellieError::ProtocolDesync {
                observed,
                remainder,
                expected,
            },
            Err(e) => {
                tracing::error!(error = %e, "Recovery after protocol desync failed");
                e
            }
        }
    }

    async fn stop_and_clear(&mut self) -> TellieResult<Vec<u8>> {
        let stop = self.codec.stop().wire_bytes();
        let clear = self.codec.clear_channel().wire_bytes();

        sleep(self.options.recovery_pause).await;
        let remainder = self.drain().await?;
        self.link.write(&stop).await?;
        sleep(self.options.recovery_pause).await;
        self.link.write(&clear).await?;
        sleep(self.options.recovery_pause).await;
        self.drain().await?;
        Ok(remainder)
    }

    /// Setting commands expect an empty buffer. Stale bytes are treated like
    /// a bad echo: recover, then fail.
    pub async fn ensure_clear(&mut self) -> TellieResult<()> {
        let stale = self.drain().await?;
        if stale.is_empty() {
            Ok(())
        } else {
            tracing::warn!(stale = %printable(&stale), "Buffer not clear");
            Err(self.recover(stale, Vec::new()).await)
        }
    }

    /// Read whatever is buffered, up to one read chunk.
    pub async fn drain(&mut self) -> TellieResult<Vec<u8>> {
        self.link
            .read(self.options.read_chunk, self.options.read_timeout)
            .await
    }

    /// Hold RTS high, then low, to reset the box.
    pub async fn reset(&mut self) -> TellieResult<()> {
        tracing::info!(link = %self.link.name(), "Resetting control box");
        self.link.set_rts(true).await?;
        sleep(self.options.reset_settle).await;
        self.link.set_rts(false).await?;
        sleep(self.options.reset_settle).await;
        Ok(())
    }

    pub async fn close(&mut self) -> TellieResult<()> {
        self.link.close().await
    }
}
