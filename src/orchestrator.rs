//! Load-fire-read runs.
//!
//! A run programs one channel, fires an averaged sequence, waits for it to
//! finish and collects the PIN reading. [`LoadFireRunner`] allows one run at
//! a time and hands back a [`RunHandle`] that can cancel it. A cancelled or
//! failed run sends a best-effort stop before it ends.
//!
//! The runner talks to the box through [`PulserControl`], implemented both
//! for the in-process worker handle and for the remote client.

use crate::app_actor::DeviceHandle;
use crate::device::ChannelInit;
use crate::error::{TellieError, TellieResult};
use crate::protocol::readout::PinReading;
use crate::rpc::RemoteTellie;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// The operations a run needs.
#[async_trait]
pub trait PulserControl: Send + Sync {
    async fn init_channel(&self, init: ChannelInit) -> TellieResult<()>;
    async fn fire_sequence(&self) -> TellieResult<()>;
    async fn read_pin_sequence(&self) -> TellieResult<Option<PinReading>>;
    async fn stop(&self) -> TellieResult<()>;
}

#[async_trait]
impl PulserControl for DeviceHandle {
    async fn init_channel(&self, init: ChannelInit) -> TellieResult<()> {
        DeviceHandle::init_channel(self, init).await.map(|_| ())
    }

    async fn fire_sequence(&self) -> TellieResult<()> {
        DeviceHandle::fire_sequence(self).await
    }

    async fn read_pin_sequence(&self) -> TellieResult<Option<PinReading>> {
        DeviceHandle::read_pin_sequence(self).await
    }

    async fn stop(&self) -> TellieResult<()> {
        DeviceHandle::stop(self).await.map(|_| ())
    }
}

#[async_trait]
impl PulserControl for RemoteTellie {
    async fn init_channel(&self, init: ChannelInit) -> TellieResult<()> {
        RemoteTellie::init_channel(self, init).await.map(|_| ())
    }

    async fn fire_sequence(&self) -> TellieResult<()> {
        RemoteTellie::fire_sequence(self).await
    }

    async fn read_pin_sequence(&self) -> TellieResult<Option<PinReading>> {
        RemoteTellie::read_pin_sequence(self).await
    }

    async fn stop(&self) -> TellieResult<()> {
        RemoteTellie::stop(self).await.map(|_| ())
    }
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunOutcome {
    Completed(PinReading),
    Cancelled,
}

/// Polling cadence of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunTiming {
    /// Sleep slice while waiting, and PIN poll interval.
    pub poll_interval: Duration,
    /// Time allowed for the reading once the sequence should be over.
    pub readout_timeout: Duration,
}

impl Default for RunTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            readout_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to an active run.
#[derive(Debug)]
pub struct RunHandle {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<TellieResult<RunOutcome>>,
}

impl RunHandle {
    /// Ask the run to stop at its next check.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// A flag that cancels the run when set, for signal handlers.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end.
    pub async fn join(self) -> TellieResult<RunOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(TellieError::Link(std::io::Error::other(e))),
        }
    }
}

/// Clears the runner's busy flag when the run task ends, however it ends.
struct ActiveRun(Arc<AtomicBool>);

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Starts load-fire-read runs, one at a time.
#[derive(Clone)]
pub struct LoadFireRunner {
    device: Arc<dyn PulserControl>,
    timing: RunTiming,
    active: Arc<AtomicBool>,
}

impl LoadFireRunner {
    pub fn new(device: Arc<dyn PulserControl>, timing: RunTiming) -> Self {
        Self {
            device,
            timing,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a run. Fails with a state error while another run is active.
    pub fn start(&self, init: ChannelInit) -> TellieResult<RunHandle> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TellieError::state("A load-fire run is already in progress"));
        }
        let guard = ActiveRun(Arc::clone(&self.active));
        let cancel = Arc::new(AtomicBool::new(false));
        let run = Run {
            device: Arc::clone(&self.device),
            timing: self.timing,
            cancel: Arc::clone(&cancel),
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            run.execute(init).await
        });
        Ok(RunHandle { cancel, task })
    }
}

struct Run {
    device: Arc<dyn PulserControl>,
    timing: RunTiming,
    cancel: Arc<AtomicBool>,
}

impl Run {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn execute(&self, init: ChannelInit) -> TellieResult<RunOutcome> {
        if self.cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        tracing::info!(channel = %init.channel, pulses = init.pulse_number, "Run started");

        let outcome = self.load_fire_read(&init).await;
        match &outcome {
            Ok(RunOutcome::Completed(reading)) => {
                tracing::info!(
                    channel = reading.channel,
                    mean = reading.mean,
                    rms = reading.rms,
                    "Run complete"
                );
            }
            Ok(RunOutcome::Cancelled) => {
                tracing::info!("Run cancelled, stopping the box");
                self.best_effort_stop().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Run failed, stopping the box");
                self.best_effort_stop().await;
            }
        }
        outcome
    }

    async fn load_fire_read(&self, init: &ChannelInit) -> TellieResult<RunOutcome> {
        self.device.init_channel(*init).await?;
        if self.cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        self.device.fire_sequence().await?;

        let sequence = Duration::from_secs_f64(
            (f64::from(init.pulse_number) * init.pulse_delay_ms / 1000.0).max(0.0),
        );
        let finished_at = Instant::now() + sequence;
        while Instant::now() < finished_at {
            if self.cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            let left = finished_at.saturating_duration_since(Instant::now());
            sleep(self.timing.poll_interval.min(left)).await;
        }

        let deadline = Instant::now() + self.timing.readout_timeout;
        loop {
            if self.cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            if let Some(reading) = self.device.read_pin_sequence().await? {
                return Ok(RunOutcome::Completed(reading));
            }
            if Instant::now() >= deadline {
                return Err(TellieError::Timeout(format!(
                    "No PIN reading for channel {} within {:?} of the sequence end",
                    init.channel, self.timing.readout_timeout
                )));
            }
            sleep(self.timing.poll_interval).await;
        }
    }

    async fn best_effort_stop(&self) {
        if let Err(e) = self.device.stop().await {
            tracing::warn!(error = %e, "Stop after run failed");
        }
    }
}
