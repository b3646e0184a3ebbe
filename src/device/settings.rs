//! Settings cache.
//!
//! Every value is `None` until the box has confirmed it. A cleared value is
//! always resent on the next setter call.

use super::Phase;
use crate::protocol::channel::{Channel, CHANNEL_COUNT};

/// Per-channel settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelSettings {
    pub pulse_width: Option<u16>,
    pub pulse_height: Option<u16>,
    /// Nanoseconds.
    pub fibre_delay: Option<f64>,
}

impl ChannelSettings {
    /// Names of the settings still unknown.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.pulse_width.is_none() {
            missing.push("Pulse width");
        }
        if self.pulse_height.is_none() {
            missing.push("Pulse height");
        }
        if self.fibre_delay.is_none() {
            missing.push("Fibre delay");
        }
        missing
    }
}

/// Settings shared by all channels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalSettings {
    pub pulse_number: Option<u32>,
    /// Milliseconds.
    pub pulse_delay: Option<f64>,
    /// Nanoseconds.
    pub trigger_delay: Option<f64>,
}

impl GlobalSettings {
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.pulse_number.is_none() {
            missing.push("Pulse number");
        }
        if self.pulse_delay.is_none() {
            missing.push("Pulse delay");
        }
        if self.trigger_delay.is_none() {
            missing.push("Trigger delay");
        }
        missing
    }

    /// Length of the programmed sequence in milliseconds.
    pub fn sequence_ms(&self) -> Option<f64> {
        Some(f64::from(self.pulse_number?) * self.pulse_delay?)
    }
}

/// Settings that must go to the box on their next setter call, cached or not.
///
/// A selection change marks all of them; each flag drops once its write has
/// been confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForcedSettings {
    pub pulse_width: bool,
    pub pulse_height: bool,
    pub fibre_delay: bool,
    pub pulse_number: bool,
    pub pulse_delay: bool,
    pub trigger_delay: bool,
}

impl ForcedSettings {
    pub fn all() -> Self {
        Self {
            pulse_width: true,
            pulse_height: true,
            fibre_delay: true,
            pulse_number: true,
            pulse_delay: true,
            trigger_delay: true,
        }
    }

    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

/// Fixed-size settings table indexed by channel.
#[derive(Debug, Clone)]
pub struct ChannelSettingsMap {
    slots: [ChannelSettings; CHANNEL_COUNT],
}

impl Default for ChannelSettingsMap {
    fn default() -> Self {
        Self {
            slots: [ChannelSettings::default(); CHANNEL_COUNT],
        }
    }
}

impl ChannelSettingsMap {
    pub fn get(&self, channel: Channel) -> &ChannelSettings {
        &self.slots[channel.index()]
    }

    pub fn get_mut(&mut self, channel: Channel) -> &mut ChannelSettings {
        &mut self.slots[channel.index()]
    }

    pub fn clear(&mut self, channel: Channel) {
        self.slots[channel.index()] = ChannelSettings::default();
    }

    pub fn clear_all(&mut self) {
        self.slots = [ChannelSettings::default(); CHANNEL_COUNT];
    }
}

/// Everything needed to make one channel ready to fire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelInit {
    pub channel: Channel,
    pub pulse_number: u32,
    pub pulse_delay_ms: f64,
    pub trigger_delay_ns: f64,
    pub pulse_width: u16,
    pub pulse_height: u16,
    pub fibre_delay_ns: f64,
}

/// Settings of one selected channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub channel: u8,
    pub settings: ChannelSettings,
}

/// Point-in-time view of the device state.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsSnapshot {
    pub channels: Vec<u8>,
    pub globals: GlobalSettings,
    pub channel_settings: Vec<ChannelSnapshot>,
    pub phase: Phase,
    pub temp_probe: Option<u8>,
    pub external_trigger: Option<bool>,
}
