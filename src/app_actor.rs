//! Device worker
//!
//! The worker is the single owner of the [`DeviceSession`]. All operations
//! reach it as [`DeviceCommand`]s and run strictly one after another, so
//! exchanges from concurrent callers never interleave on the serial line.
//!
//! Failed operations never take the worker down. After a failure the worker
//! puts the box in a known state before answering the next command:
//! - rejected calls (bad argument, illegal state) touched nothing and need
//!   nothing;
//! - a protocol desync has already been recovered by the transport, so only
//!   the cached state is dropped;
//! - anything else (bad readout, timeout, link error) gets a best-effort
//!   stop.

use crate::device::{ChannelInit, DeviceSession, SettingsSnapshot};
use crate::error::{TellieError, TellieResult};
use crate::messages::{DeviceCommand, Responder};
use crate::protocol::channel::Channel;
use crate::protocol::readout::PinReading;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Actor that owns the device session
pub struct DeviceActor {
    session: DeviceSession,
}

impl DeviceActor {
    pub fn new(session: DeviceSession) -> Self {
        Self { session }
    }

    /// Runs the actor event loop, processing commands until shutdown or
    /// until every handle is dropped.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<DeviceCommand>) {
        tracing::info!("Device worker started");

        while let Some(command) = command_rx.recv().await {
            tracing::trace!(command = command.name(), "Device command");
            match command {
                DeviceCommand::SelectChannel { channel, response } => {
                    let result = self.session.select_channel(channel).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::SelectChannels { channels, response } => {
                    let result = self.session.select_channels(&channels).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::ClearChannel { response } => {
                    let result = self.session.clear_channel().await;
                    self.reply(response, result).await;
                }

                DeviceCommand::InitChannel { init, response } => {
                    let result = self.session.init_channel(&init).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::SetPulseHeight { height, response } => {
                    let result = self.session.set_pulse_height(height).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::SetPulseWidth {
                    width,
                    while_fire,
                    response,
                } => {
                    let result = self.session.set_pulse_width(width, while_fire).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::SetPulseNumber { number, response } => {
                    let result = self.session.set_pulse_number(number).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::SetPulseDelay { delay_ms, response } => {
                    let result = self.session.set_pulse_delay(delay_ms).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::SetTriggerDelay { delay_ns, response } => {
                    let result = self.session.set_trigger_delay(delay_ns).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::SetFibreDelay { delay_ns, response } => {
                    let result = self.session.set_fibre_delay(delay_ns).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::Fire {
                    while_fire,
                    response,
                } => {
                    let result = self.session.fire(while_fire).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::FireSequence { response } => {
                    let result = self.session.fire_sequence().await;
                    self.reply(response, result).await;
                }

                DeviceCommand::FireSingle { response } => {
                    let result = self.session.fire_single().await;
                    self.reply(response, result).await;
                }

                DeviceCommand::FireContinuous { response } => {
                    let result = self.session.fire_continuous().await;
                    self.reply(response, result).await;
                }

                DeviceCommand::TriggerAveraged { response } => {
                    let result = self.session.trigger_averaged().await;
                    self.reply(response, result).await;
                }

                DeviceCommand::Stop { response } => {
                    let result = self.session.stop().await;
                    if let Err(e) = &result {
                        tracing::warn!(error = %e, "Stop failed, dropping cached state");
                        self.session.forget_device_state();
                    }
                    let _ = response.send(result);
                }

                DeviceCommand::ReadPin { channel, response } => {
                    let result = self.session.read_pin(channel).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::ReadPins { response } => {
                    let result = self.session.read_pins().await;
                    self.reply(response, result).await;
                }

                DeviceCommand::ReadPinSequence { response } => {
                    let result = self.session.read_pin_sequence().await;
                    self.reply(response, result).await;
                }

                DeviceCommand::SelectTempProbe { probe, response } => {
                    let result = self.session.select_temp_probe(probe).await;
                    self.reply(response, result).await;
                }

                DeviceCommand::ReadTemp { response } => {
                    let result = self.session.read_temp().await;
                    self.reply(response, result).await;
                }

                DeviceCommand::EnableExternalTrigger { response } => {
                    let result = self.session.enable_external_trigger().await;
                    self.reply(response, result).await;
                }

                DeviceCommand::DisableExternalTrigger { response } => {
                    let result = self.session.disable_external_trigger().await;
                    self.reply(response, result).await;
                }

                DeviceCommand::GetSettings { response } => {
                    let _ = response.send(self.session.settings());
                }

                DeviceCommand::Shutdown { response } => {
                    tracing::info!("Shutdown command received");
                    self.shutdown().await;
                    let _ = response.send(());
                    break; // Exit event loop
                }
            }
        }

        tracing::info!("Device worker shutting down");
    }

    /// Restore a known device state after a failure, then answer.
    async fn reply<T>(&mut self, response: Responder<T>, result: TellieResult<T>) {
        if let Err(e) = &result {
            self.recover_from(e).await;
        }
        let _ = response.send(result);
    }

    async fn recover_from(&mut self, error: &TellieError) {
        if error.is_rejection() {
            tracing::debug!(error = %error, "Command rejected");
            return;
        }
        if matches!(error, TellieError::ProtocolDesync { .. }) {
            tracing::warn!(error = %error, "Protocol desync, dropping cached state");
            self.session.forget_device_state();
            return;
        }
        tracing::warn!(error = %error, "Command failed, stopping the box");
        if let Err(stop_error) = self.session.stop().await {
            tracing::error!(error = %stop_error, "Stop after failure also failed");
            self.session.forget_device_state();
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.session.stop().await {
            tracing::warn!(error = %e, "Stop during shutdown failed");
        }
        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Closing the link failed");
        }
    }
}

/// Spawn the worker on the current runtime.
pub fn spawn(session: DeviceSession, capacity: usize) -> (DeviceHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(DeviceActor::new(session).run(command_rx));
    (DeviceHandle { command_tx }, task)
}

/// Cloneable handle to the device worker.
#[derive(Clone, Debug)]
pub struct DeviceHandle {
    command_tx: mpsc::Sender<DeviceCommand>,
}

impl DeviceHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Responder<T>) -> DeviceCommand,
    ) -> TellieResult<T> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| TellieError::WorkerGone)?;
        rx.await.map_err(|_| TellieError::WorkerGone)?
    }

    pub async fn select_channel(&self, channel: Channel) -> TellieResult<()> {
        self.request(|response| DeviceCommand::SelectChannel { channel, response })
            .await
    }

    pub async fn select_channels(&self, channels: Vec<Channel>) -> TellieResult<()> {
        self.request(|response| DeviceCommand::SelectChannels { channels, response })
            .await
    }

    pub async fn clear_channel(&self) -> TellieResult<()> {
        self.request(|response| DeviceCommand::ClearChannel { response })
            .await
    }

    pub async fn init_channel(&self, init: ChannelInit) -> TellieResult<SettingsSnapshot> {
        self.request(|response| DeviceCommand::InitChannel { init, response })
            .await
    }

    pub async fn set_pulse_height(&self, height: u16) -> TellieResult<()> {
        self.request(|response| DeviceCommand::SetPulseHeight { height, response })
            .await
    }

    pub async fn set_pulse_width(&self, width: u16, while_fire: bool) -> TellieResult<()> {
        self.request(|response| DeviceCommand::SetPulseWidth {
            width,
            while_fire,
            response,
        })
        .await
    }

    pub async fn set_pulse_number(&self, number: u32) -> TellieResult<()> {
        self.request(|response| DeviceCommand::SetPulseNumber { number, response })
            .await
    }

    pub async fn set_pulse_delay(&self, delay_ms: f64) -> TellieResult<()> {
        self.request(|response| DeviceCommand::SetPulseDelay { delay_ms, response })
            .await
    }

    pub async fn set_trigger_delay(&self, delay_ns: f64) -> TellieResult<()> {
        self.request(|response| DeviceCommand::SetTriggerDelay { delay_ns, response })
            .await
    }

    pub async fn set_fibre_delay(&self, delay_ns: f64) -> TellieResult<()> {
        self.request(|response| DeviceCommand::SetFibreDelay { delay_ns, response })
            .await
    }

    pub async fn fire(&self, while_fire: bool) -> TellieResult<()> {
        self.request(|response| DeviceCommand::Fire {
            while_fire,
            response,
        })
        .await
    }

    pub async fn fire_sequence(&self) -> TellieResult<()> {
        self.request(|response| DeviceCommand::FireSequence { response })
            .await
    }

    pub async fn fire_single(&self) -> TellieResult<PinReading> {
        self.request(|response| DeviceCommand::FireSingle { response })
            .await
    }

    pub async fn fire_continuous(&self) -> TellieResult<()> {
        self.request(|response| DeviceCommand::FireContinuous { response })
            .await
    }

    pub async fn trigger_averaged(&self) -> TellieResult<()> {
        self.request(|response| DeviceCommand::TriggerAveraged { response })
            .await
    }

    pub async fn stop(&self) -> TellieResult<String> {
        self.request(|response| DeviceCommand::Stop { response })
            .await
    }

    pub async fn read_pin(&self, channel: Channel) -> TellieResult<Option<PinReading>> {
        self.request(|response| DeviceCommand::ReadPin { channel, response })
            .await
    }

    pub async fn read_pins(&self) -> TellieResult<Option<Vec<PinReading>>> {
        self.request(|response| DeviceCommand::ReadPins { response })
            .await
    }

    pub async fn read_pin_sequence(&self) -> TellieResult<Option<PinReading>> {
        self.request(|response| DeviceCommand::ReadPinSequence { response })
            .await
    }

    pub async fn select_temp_probe(&self, probe: u8) -> TellieResult<()> {
        self.request(|response| DeviceCommand::SelectTempProbe { probe, response })
            .await
    }

    pub async fn read_temp(&self) -> TellieResult<f64> {
        self.request(|response| DeviceCommand::ReadTemp { response })
            .await
    }

    pub async fn enable_external_trigger(&self) -> TellieResult<()> {
        self.request(|response| DeviceCommand::EnableExternalTrigger { response })
            .await
    }

    pub async fn disable_external_trigger(&self) -> TellieResult<()> {
        self.request(|response| DeviceCommand::DisableExternalTrigger { response })
            .await
    }

    pub async fn settings(&self) -> TellieResult<SettingsSnapshot> {
        let (command, rx) = DeviceCommand::get_settings();
        self.command_tx
            .send(command)
            .await
            .map_err(|_| TellieError::WorkerGone)?;
        rx.await.map_err(|_| TellieError::WorkerGone)
    }

    /// Stop the box, close the link and wait for the worker to exit.
    pub async fn shutdown(&self) -> TellieResult<()> {
        let (command, rx) = DeviceCommand::shutdown();
        self.command_tx
            .send(command)
            .await
            .map_err(|_| TellieError::WorkerGone)?;
        rx.await.map_err(|_| TellieError::WorkerGone)
    }
}
