//! Message types for the device worker
//!
//! Every operation on the control box travels as a [`DeviceCommand`] over an
//! mpsc channel to the single task that owns the [`DeviceSession`]. Each
//! command carries a oneshot sender for its result, so callers on any task
//! (RPC handlers, the run orchestrator) await a reply without sharing the
//! session.
//!
//! [`DeviceSession`]: crate::device::DeviceSession

use crate::device::{ChannelInit, SettingsSnapshot};
use crate::error::TellieResult;
use crate::protocol::channel::Channel;
use crate::protocol::readout::PinReading;
use tokio::sync::oneshot;

/// Oneshot sender for an operation result.
pub type Responder<T> = oneshot::Sender<TellieResult<T>>;

/// Commands that can be sent to the device worker
#[derive(Debug)]
pub enum DeviceCommand {
    /// Select one channel
    SelectChannel {
        channel: Channel,
        response: Responder<()>,
    },

    /// Select several channels to fire together
    SelectChannels {
        channels: Vec<Channel>,
        response: Responder<()>,
    },

    /// Deselect every channel
    ClearChannel { response: Responder<()> },

    /// Select a channel and program all of its settings
    InitChannel {
        init: ChannelInit,
        response: Responder<SettingsSnapshot>,
    },

    SetPulseHeight {
        height: u16,
        response: Responder<()>,
    },

    SetPulseWidth {
        width: u16,
        while_fire: bool,
        response: Responder<()>,
    },

    SetPulseNumber {
        number: u32,
        response: Responder<()>,
    },

    SetPulseDelay {
        delay_ms: f64,
        response: Responder<()>,
    },

    SetTriggerDelay {
        delay_ns: f64,
        response: Responder<()>,
    },

    SetFibreDelay {
        delay_ns: f64,
        response: Responder<()>,
    },

    /// Series fire of the selection
    Fire {
        while_fire: bool,
        response: Responder<()>,
    },

    /// Averaged sequence on one channel
    FireSequence { response: Responder<()> },

    /// One pulse, answered with its PIN reading
    FireSingle { response: Responder<PinReading> },

    /// Free-running fire until stopped
    FireContinuous { response: Responder<()> },

    /// Averaged sequence paced by the external trigger
    TriggerAveraged { response: Responder<()> },

    /// Stop firing and clear the box
    Stop { response: Responder<String> },

    /// PIN reading of one channel after a series fire
    ReadPin {
        channel: Channel,
        response: Responder<Option<PinReading>>,
    },

    /// PIN readings of every selected channel after a series fire
    ReadPins {
        response: Responder<Option<Vec<PinReading>>>,
    },

    /// PIN reading at the end of an averaged sequence
    ReadPinSequence {
        response: Responder<Option<PinReading>>,
    },

    SelectTempProbe {
        probe: u8,
        response: Responder<()>,
    },

    ReadTemp { response: Responder<f64> },

    EnableExternalTrigger { response: Responder<()> },

    DisableExternalTrigger { response: Responder<()> },

    /// Snapshot of the selection and cached settings
    GetSettings {
        response: oneshot::Sender<SettingsSnapshot>,
    },

    /// Stop the box, close the link and end the worker
    Shutdown { response: oneshot::Sender<()> },
}

impl DeviceCommand {
    /// Helper to create a GetSettings command
    pub fn get_settings() -> (Self, oneshot::Receiver<SettingsSnapshot>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetSettings { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectChannel { .. } => "select_channel",
            Self::SelectChannels { .. } => "select_channels",
            Self::ClearChannel { .. } => "clear_channel",
            Self::InitChannel { .. } => "init_channel",
            Self::SetPulseHeight { .. } => "set_pulse_height",
            Self::SetPulseWidth { .. } => "set_pulse_width",
            Self::SetPulseNumber { .. } => "set_pulse_number",
            Self::SetPulseDelay { .. } => "set_pulse_delay",
            Self::SetTriggerDelay { .. } => "set_trigger_delay",
            Self::SetFibreDelay { .. } => "set_fibre_delay",
            Self::Fire { .. } => "fire",
            Self::FireSequence { .. } => "fire_sequence",
            Self::FireSingle { .. } => "fire_single",
            Self::FireContinuous { .. } => "fire_continuous",
            Self::TriggerAveraged { .. } => "trigger_averaged",
            Self::Stop { .. } => "stop",
            Self::ReadPin { .. } => "read_pin",
            Self::ReadPins { .. } => "read_pins",
            Self::ReadPinSequence { .. } => "read_pin_sequence",
            Self::SelectTempProbe { .. } => "select_temp_probe",
            Self::ReadTemp { .. } => "read_temp",
            Self::EnableExternalTrigger { .. } => "enable_external_trigger",
            Self::DisableExternalTrigger { .. } => "disable_external_trigger",
            Self::GetSettings { .. } => "get_settings",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}
