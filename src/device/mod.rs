//! Device state and the firing/readout state machine
//!
//! [`DeviceSession`] is the single owner of the transport session and of
//! everything the driver knows about the box: which channels are selected,
//! which settings were programmed, and whether a sequence is running.
//! Setting and selection operations live in `session.rs`, firing and readout
//! in `firing.rs`.

mod firing;
mod session;
pub mod settings;

pub use session::DeviceSession;
pub use settings::{
    ChannelInit, ChannelSettings, ChannelSnapshot, ForcedSettings, GlobalSettings,
    SettingsSnapshot,
};

use std::time::Duration;

/// Deadlines for readout polling.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutTiming {
    pub poll_interval: Duration,
    pub pin_timeout: Duration,
    pub temp_timeout: Duration,
}

impl Default for ReadoutTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            pin_timeout: Duration::from_secs(2),
            temp_timeout: Duration::from_secs(1),
        }
    }
}

/// How the box was told to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireMode {
    /// Series fire of the selected channel(s), end marker when done.
    Series,
    /// Averaged sequence on one channel, PIN printed when done.
    Sequence,
    /// One pulse, PIN printed straight away.
    Single,
    /// Free-running until stopped.
    Continuous,
    /// Averaged sequence paced by the external trigger input.
    TriggerAveraged,
}

/// Firing state of the box as tracked by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FiringState {
    #[default]
    Idle,
    /// Pulses are going out.
    Firing(FireMode),
    /// The sequence finished; a PIN readout is due.
    Reading(FireMode),
}

impl FiringState {
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn mode(self) -> Option<FireMode> {
        match self {
            Self::Idle => None,
            Self::Firing(mode) | Self::Reading(mode) => Some(mode),
        }
    }
}

/// Externally visible phase of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ChannelLoaded,
    Firing,
    Reading,
    ExternalTriggerArmed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ChannelLoaded => "channel_loaded",
            Self::Firing => "firing",
            Self::Reading => "reading",
            Self::ExternalTriggerArmed => "external_trigger_armed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
