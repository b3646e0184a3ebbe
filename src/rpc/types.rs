//! Wire messages of the `tellie.Tellie` service.
//!
//! Numeric settings that are not known yet travel as [`UNSET`].

use crate::device::{ChannelSnapshot, SettingsSnapshot};
use crate::protocol::readout::PinReading;

/// Sentinel for a setting the box has not confirmed.
pub const UNSET: f64 = -999.0;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

/// Reply of operations with nothing to return.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            message: "ok".to_string(),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelRequest {
    #[prost(uint32, tag = "1")]
    pub channel: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelsRequest {
    #[prost(uint32, repeated, tag = "1")]
    pub channels: ::prost::alloc::vec::Vec<u32>,
}

/// Integer argument: pulse height, pulse number or temperature probe.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueRequest {
    #[prost(uint32, tag = "1")]
    pub value: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PulseWidthRequest {
    #[prost(uint32, tag = "1")]
    pub width: u32,
    #[prost(bool, tag = "2")]
    pub while_fire: bool,
}

/// Delay argument, in ms for the pulse delay and ns otherwise.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DelayRequest {
    #[prost(double, tag = "1")]
    pub delay: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FireRequest {
    #[prost(bool, tag = "1")]
    pub while_fire: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitChannelRequest {
    #[prost(uint32, tag = "1")]
    pub channel: u32,
    #[prost(uint32, tag = "2")]
    pub pulse_number: u32,
    #[prost(double, tag = "3")]
    pub pulse_delay_ms: f64,
    #[prost(double, tag = "4")]
    pub trigger_delay_ns: f64,
    #[prost(uint32, tag = "5")]
    pub pulse_width: u32,
    #[prost(uint32, tag = "6")]
    pub pulse_height: u32,
    #[prost(double, tag = "7")]
    pub fibre_delay_ns: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelSettingsReply {
    #[prost(uint32, tag = "1")]
    pub channel: u32,
    #[prost(double, tag = "2")]
    pub pulse_width: f64,
    #[prost(double, tag = "3")]
    pub pulse_height: f64,
    #[prost(double, tag = "4")]
    pub fibre_delay_ns: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SettingsReply {
    #[prost(uint32, repeated, tag = "1")]
    pub channels: ::prost::alloc::vec::Vec<u32>,
    #[prost(double, tag = "2")]
    pub pulse_number: f64,
    #[prost(double, tag = "3")]
    pub pulse_delay_ms: f64,
    #[prost(double, tag = "4")]
    pub trigger_delay_ns: f64,
    #[prost(message, repeated, tag = "5")]
    pub channel_settings: ::prost::alloc::vec::Vec<ChannelSettingsReply>,
    #[prost(string, tag = "6")]
    pub phase: ::prost::alloc::string::String,
    /// Selected temperature probe, 0 when none.
    #[prost(uint32, tag = "7")]
    pub temp_probe: u32,
    /// "enabled", "disabled" or "unknown".
    #[prost(string, tag = "8")]
    pub external_trigger: ::prost::alloc::string::String,
}

/// PIN readout. `ready` is false while the sequence is still running.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PinReply {
    #[prost(bool, tag = "1")]
    pub ready: bool,
    #[prost(uint32, tag = "2")]
    pub channel: u32,
    #[prost(uint32, tag = "3")]
    pub mean: u32,
    #[prost(double, tag = "4")]
    pub rms: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PinsReply {
    #[prost(bool, tag = "1")]
    pub ready: bool,
    #[prost(message, repeated, tag = "2")]
    pub readings: ::prost::alloc::vec::Vec<PinReply>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopReply {
    /// Buffer contents drained after the stop.
    #[prost(string, tag = "1")]
    pub buffer: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemperatureReply {
    #[prost(double, tag = "1")]
    pub celsius: f64,
}

fn or_unset<T: Into<f64>>(value: Option<T>) -> f64 {
    value.map_or(UNSET, Into::into)
}

/// Inverse of the `UNSET` sentinel.
pub fn from_wire(value: f64) -> Option<f64> {
    (value != UNSET).then_some(value)
}

impl From<PinReading> for PinReply {
    fn from(reading: PinReading) -> Self {
        Self {
            ready: true,
            channel: u32::from(reading.channel),
            mean: reading.mean,
            rms: reading.rms,
        }
    }
}

impl From<Option<PinReading>> for PinReply {
    fn from(reading: Option<PinReading>) -> Self {
        reading.map(Self::from).unwrap_or_default()
    }
}

impl PinReply {
    /// The reading, if one was ready.
    pub fn reading(&self) -> Option<PinReading> {
        self.ready.then(|| PinReading {
            channel: u8::try_from(self.channel).unwrap_or_default(),
            mean: self.mean,
            rms: self.rms,
        })
    }
}

impl From<Option<Vec<PinReading>>> for PinsReply {
    fn from(readings: Option<Vec<PinReading>>) -> Self {
        match readings {
            Some(readings) => Self {
                ready: true,
                readings: readings.into_iter().map(PinReply::from).collect(),
            },
            None => Self::default(),
        }
    }
}

impl From<&ChannelSnapshot> for ChannelSettingsReply {
    fn from(snapshot: &ChannelSnapshot) -> Self {
        Self {
            channel: u32::from(snapshot.channel),
            pulse_width: or_unset(snapshot.settings.pulse_width),
            pulse_height: or_unset(snapshot.settings.pulse_height),
            fibre_delay_ns: or_unset(snapshot.settings.fibre_delay),
        }
    }
}

impl From<SettingsSnapshot> for SettingsReply {
    fn from(snapshot: SettingsSnapshot) -> Self {
        let external_trigger = match snapshot.external_trigger {
            Some(true) => "enabled",
            Some(false) => "disabled",
            None => "unknown",
        };
        Self {
            channels: snapshot.channels.iter().map(|c| u32::from(*c)).collect(),
            pulse_number: or_unset(snapshot.globals.pulse_number),
            pulse_delay_ms: or_unset(snapshot.globals.pulse_delay),
            trigger_delay_ns: or_unset(snapshot.globals.trigger_delay),
            channel_settings: snapshot
                .channel_settings
                .iter()
                .map(ChannelSettingsReply::from)
                .collect(),
            phase: snapshot.phase.to_string(),
            temp_probe: snapshot.temp_probe.map_or(0, u32::from),
            external_trigger: external_trigger.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ChannelSettings, GlobalSettings, Phase};

    #[test]
    fn test_unset_settings_use_sentinel() {
        let snapshot = SettingsSnapshot {
            channels: vec![9],
            globals: GlobalSettings {
                pulse_number: Some(1000),
                ..GlobalSettings::default()
            },
            channel_settings: vec![ChannelSnapshot {
                channel: 9,
                settings: ChannelSettings {
                    pulse_height: Some(300),
                    ..ChannelSettings::default()
                },
            }],
            phase: Phase::ChannelLoaded,
            temp_probe: None,
            external_trigger: Some(false),
        };
        let reply = SettingsReply::from(snapshot);
        assert_eq!(reply.pulse_number, 1000.0);
        assert_eq!(reply.pulse_delay_ms, UNSET);
        assert_eq!(reply.channel_settings[0].pulse_height, 300.0);
        assert_eq!(reply.channel_settings[0].pulse_width, UNSET);
        assert_eq!(reply.phase, "channel_loaded");
        assert_eq!(reply.external_trigger, "disabled");
        assert_eq!(from_wire(reply.trigger_delay_ns), None);
    }

    #[test]
    fn test_pending_pin_reply() {
        let reply = PinReply::from(None);
        assert!(!reply.ready);
        assert_eq!(reply.reading(), None);

        let reading = PinReading {
            channel: 3,
            mean: 812,
            rms: 2.5,
        };
        assert_eq!(PinReply::from(Some(reading)).reading(), Some(reading));
    }
}
