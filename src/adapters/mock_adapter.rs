//! Mock link for testing
//!
//! This adapter connects the driver to a `SimulatedPulser` instead of a
//! serial port. It provides:
//! - Byte-exact firmware echoes and readouts
//! - Controllable failure injection
//! - Write logging for test verification
//!
//! Clones share the same simulated box, so a test can keep one handle while
//! the transport session owns another.

use super::Link;
use crate::error::{TellieError, TellieResult};
use crate::hardware::mock::SimulatedPulser;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Mock link backed by a simulated pulser
///
/// # Example
///
/// ```
/// use tellie_control::adapters::MockAdapter;
///
/// let adapter = MockAdapter::new();
/// assert!(adapter.write_log().is_empty());
/// ```
#[derive(Clone)]
pub struct MockAdapter {
    pulser: Arc<Mutex<SimulatedPulser>>,
    connected: Arc<AtomicBool>,
    should_fail_next: Arc<AtomicBool>,
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    rts_log: Arc<Mutex<Vec<bool>>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockAdapter {
    /// Create a connected mock link with a fresh simulated box
    pub fn new() -> Self {
        Self {
            pulser: Arc::new(Mutex::new(SimulatedPulser::new())),
            connected: Arc::new(AtomicBool::new(true)),
            should_fail_next: Arc::new(AtomicBool::new(false)),
            write_log: Arc::new(Mutex::new(Vec::new())),
            rts_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run `f` against the simulated box
    pub fn with_pulser<R>(&self, f: impl FnOnce(&mut SimulatedPulser) -> R) -> R {
        f(&mut lock(&self.pulser))
    }

    /// Make the next write fail with an I/O error
    pub fn inject_next_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> bool {
        self.should_fail_next.swap(false, Ordering::SeqCst)
    }

    /// Every write, in order
    pub fn write_log(&self) -> Vec<Vec<u8>> {
        lock(&self.write_log).clone()
    }

    /// Every write concatenated
    pub fn written_bytes(&self) -> Vec<u8> {
        lock(&self.write_log).concat()
    }

    /// Number of writes so far
    pub fn write_count(&self) -> usize {
        lock(&self.write_log).len()
    }

    /// Clear the write log
    pub fn clear_log(&self) {
        lock(&self.write_log).clear();
    }

    /// RTS levels set so far
    pub fn rts_log(&self) -> Vec<bool> {
        lock(&self.rts_log).clone()
    }
}

#[async_trait]
impl Link for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn write(&mut self, bytes: &[u8]) -> TellieResult<()> {
        if !self.is_connected() {
            return Err(TellieError::NotConnected);
        }
        if self.check_failure() {
            return Err(TellieError::Link(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "Injected failure",
            )));
        }
        lock(&self.write_log).push(bytes.to_vec());
        lock(&self.pulser).receive(bytes);
        Ok(())
    }

    async fn read(&mut self, max: usize, _timeout: Duration) -> TellieResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(TellieError::NotConnected);
        }
        Ok(lock(&self.pulser).take_output(max))
    }

    async fn set_rts(&mut self, level: bool) -> TellieResult<()> {
        lock(&self.rts_log).push(level);
        Ok(())
    }

    async fn close(&mut self) -> TellieResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_reaches_simulator() {
        let mut adapter = MockAdapter::new();
        adapter.write(b"C").await.unwrap();
        let echo = adapter.read(100, Duration::from_millis(10)).await.unwrap();
        assert_eq!(echo, b"C".to_vec());
        assert_eq!(adapter.write_log(), vec![b"C".to_vec()]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mut adapter = MockAdapter::new();
        adapter.inject_next_failure();
        assert!(adapter.write(b"C").await.is_err());
        assert!(adapter.write(b"C").await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_link_rejects_io() {
        let mut adapter = MockAdapter::new();
        adapter.close().await.unwrap();
        assert!(matches!(
            adapter.write(b"C").await,
            Err(TellieError::NotConnected)
        ));
    }
}
