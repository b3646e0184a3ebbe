//! Firing, readout and the stop path.

use super::session::DeviceSession;
use super::settings::ForcedSettings;
use super::{FireMode, FiringState};
use crate::error::{ErrorKind, TellieError, TellieResult};
use crate::error_recovery::{PollBudget, PollOutcome};
use crate::protocol::channel::Channel;
use crate::protocol::readout::{self, PinReading};
use crate::protocol::session::printable;
use std::time::Duration;

/// Sequences shorter than this finish before the fire echo is read.
const SHORT_SEQUENCE_MS: f64 = 500.0;

/// Temperature reads thrown away after switching probes.
const JUNK_TEMP_READS: usize = 2;

impl DeviceSession {
    /// Make sure internal firing is not gated by the external trigger input.
    async fn ensure_internal_trigger(&mut self) -> TellieResult<()> {
        if self.external_trigger == Some(false) {
            return Ok(());
        }
        self.transport.ensure_clear().await?;
        let disable = self.codec().disable_external_trigger();
        self.transport.send(&disable).await?;
        self.external_trigger = Some(false);
        Ok(())
    }

    /// Fire the selected channel(s) in series mode.
    ///
    /// With `while_fire` a new fire may be issued on top of a running one.
    pub async fn fire(&mut self, while_fire: bool) -> TellieResult<()> {
        if !self.state.is_idle() && !while_fire {
            return Err(TellieError::state("Cannot fire, already in firing mode"));
        }
        self.check_ready()?;
        if self.state.is_idle() {
            self.ensure_internal_trigger().await?;
        }

        let short = self
            .globals
            .sequence_ms()
            .is_some_and(|ms| ms < SHORT_SEQUENCE_MS);
        let codec = self.codec();
        let mut command = codec.fire_series(short);
        if !self.state.is_idle() {
            // Buffer holds output of the running fire
            command = command.without_echo();
            self.reading_channel = None;
        }
        tracing::debug!(short, channels = ?self.selection, "Fire series");
        self.transport.send(&command).await?;

        self.state = if !codec.opcodes().series_echo {
            FiringState::Firing(FireMode::Sequence)
        } else if short {
            FiringState::Reading(FireMode::Series)
        } else {
            FiringState::Firing(FireMode::Series)
        };
        self.forced = ForcedSettings::default();
        Ok(())
    }

    /// Fire an averaged sequence on the single selected channel.
    pub async fn fire_sequence(&mut self) -> TellieResult<()> {
        self.ensure_idle("fire")?;
        let channel = self.single_channel("fire sequence")?;
        self.check_ready()?;
        self.ensure_internal_trigger().await?;

        tracing::debug!(channel = %channel, "Fire sequence");
        let command = self.codec().fire_average(channel);
        self.transport.send(&command).await?;
        self.state = FiringState::Firing(FireMode::Sequence);
        self.forced = ForcedSettings::default();
        Ok(())
    }

    /// Fire one pulse on the single selected channel and return its PIN value.
    pub async fn fire_single(&mut self) -> TellieResult<PinReading> {
        self.ensure_idle("fire")?;
        let channel = self.single_channel("fire single")?;
        let missing = self.channels.get(channel).missing();
        if !missing.is_empty() {
            return Err(TellieError::state(format!(
                "Undefined options: {}",
                missing.join(", ")
            )));
        }
        self.ensure_internal_trigger().await?;

        tracing::debug!(channel = %channel, "Fire single");
        let command = self.codec().read_single(channel);
        self.transport.send(&command).await?;
        self.state = FiringState::Reading(FireMode::Single);
        self.forced = ForcedSettings::default();

        let timeout = self.timing.pin_timeout;
        let outcome = self.poll_pin(channel, timeout).await;
        self.state = FiringState::Idle;
        match outcome? {
            PollOutcome::Ready(reading) => Ok(reading),
            PollOutcome::Pending => Err(TellieError::Timeout(format!(
                "No PIN readout for channel {channel} within {timeout:?}"
            ))),
        }
    }

    /// Fire continuously until stopped.
    pub async fn fire_continuous(&mut self) -> TellieResult<()> {
        self.ensure_idle("fire")?;
        if self.selection.is_empty() {
            return Err(TellieError::state("Cannot fire, no channel selected"));
        }
        self.ensure_internal_trigger().await?;

        tracing::debug!(channels = ?self.selection, "Fire continuous");
        let command = self.codec().fire_continuous();
        self.transport.send(&command).await?;
        self.state = FiringState::Firing(FireMode::Continuous);
        self.forced = ForcedSettings::default();
        Ok(())
    }

    /// Gate firing on the external trigger input.
    pub async fn enable_external_trigger(&mut self) -> TellieResult<()> {
        self.ensure_idle("enable the external trigger")?;
        self.transport.ensure_clear().await?;
        let enable = self.codec().enable_external_trigger();
        self.transport.send(&enable).await?;
        self.external_trigger = Some(true);
        Ok(())
    }

    /// Return to internal triggering. Legal in any state; while firing the
    /// echo is not read.
    pub async fn disable_external_trigger(&mut self) -> TellieResult<()> {
        let disable = self.codec().disable_external_trigger();
        if self.state.is_idle() {
            self.transport.ensure_clear().await?;
            self.transport.send(&disable).await?;
        } else {
            self.transport.send(&disable.without_echo()).await?;
        }
        self.external_trigger = Some(false);
        Ok(())
    }

    /// Start an averaged sequence paced by the external trigger.
    pub async fn trigger_averaged(&mut self) -> TellieResult<()> {
        self.ensure_idle("fire")?;
        if self.external_trigger != Some(true) {
            return Err(TellieError::state(
                "Cannot fire on external trigger, external trigger not enabled",
            ));
        }
        let channel = self.single_channel("fire on external trigger")?;
        let mut missing = self.channels.get(channel).missing();
        if self.globals.pulse_number.is_none() {
            missing.push("Pulse number");
        }
        if self.globals.trigger_delay.is_none() {
            missing.push("Trigger delay");
        }
        if !missing.is_empty() {
            return Err(TellieError::state(format!(
                "Undefined options: {}",
                missing.join(", ")
            )));
        }

        tracing::debug!(channel = %channel, "Fire averaged on external trigger");
        let command = self.codec().trigger_average(channel);
        self.transport.send(&command).await?;
        self.state = FiringState::Firing(FireMode::TriggerAveraged);
        self.forced = ForcedSettings::default();
        Ok(())
    }

    /// Read the PIN value printed at the end of a sequence.
    ///
    /// `Ok(None)` means the sequence has not finished yet.
    pub async fn read_pin_sequence(&mut self) -> TellieResult<Option<PinReading>> {
        if self.state.is_idle() {
            return Err(TellieError::state("Cannot read pin, not in firing mode"));
        }
        let channel = self
            .selection
            .first()
            .copied()
            .ok_or_else(|| TellieError::state("Cannot read pin, no channel selected"))?;

        let raw = self.transport.drain().await?;
        tracing::debug!(buffer = %printable(&raw), "Read PIN sequence");
        match readout::parse_pin(&raw) {
            Ok(None) => Ok(None),
            Ok(Some((mean, rms))) => {
                self.state = FiringState::Idle;
                self.reading_channel = None;
                Ok(Some(PinReading {
                    channel: channel.number(),
                    mean,
                    rms,
                }))
            }
            Err(e) => {
                self.state = FiringState::Idle;
                Err(e)
            }
        }
    }

    /// Read the PIN value of `channel` after a fire.
    ///
    /// After a long series this first checks for the end-of-sequence marker
    /// and returns `Ok(None)` while the series is still running.
    pub async fn read_pin(&mut self, channel: Channel) -> TellieResult<Option<PinReading>> {
        self.read_pin_for(channel, true).await
    }

    /// Read the PIN value of every selected channel after a multi-channel
    /// fire. `Ok(None)` while the series is still running.
    pub async fn read_pins(&mut self) -> TellieResult<Option<Vec<PinReading>>> {
        if self.state.is_idle() {
            return Err(TellieError::state("Cannot read pin, no fire in progress"));
        }
        let channels = self.selection.clone();
        let mut readings = Vec::with_capacity(channels.len());
        for (i, channel) in channels.iter().enumerate() {
            let last = i + 1 == channels.len();
            match self.read_pin_for(*channel, last).await? {
                Some(reading) => readings.push(reading),
                None if i == 0 => return Ok(None),
                None => {
                    return Err(TellieError::Timeout(format!(
                        "No PIN readout for channel {channel}"
                    )))
                }
            }
        }
        Ok(Some(readings))
    }

    async fn read_pin_for(
        &mut self,
        channel: Channel,
        final_read: bool,
    ) -> TellieResult<Option<PinReading>> {
        if self.state.is_idle() {
            return Err(TellieError::state("Cannot read pin, no fire in progress"));
        }

        if self.state == FiringState::Firing(FireMode::Series) {
            let marker = self.codec().opcodes().end_of_sequence;
            let raw = self.transport.drain().await?;
            if raw.contains(&marker) {
                tracing::debug!("End of sequence seen");
                self.state = FiringState::Reading(FireMode::Series);
            } else {
                return Ok(None);
            }
        }

        match self.reading_channel {
            Some(reading) if reading != channel => {
                return Err(TellieError::state(format!(
                    "Cannot read pin for channel {channel}, already trying to read channel {reading}"
                )));
            }
            Some(_) => {}
            None => {
                self.select_channel_unchecked(channel).await?;
                let command = self.codec().read_single(channel);
                self.transport.send(&command).await?;
                self.reading_channel = Some(channel);
            }
        }

        let outcome = self.poll_pin(channel, self.timing.pin_timeout).await;
        match outcome {
            Ok(PollOutcome::Ready(reading)) => {
                self.reading_channel = None;
                if final_read {
                    self.state = FiringState::Idle;
                }
                Ok(Some(reading))
            }
            Ok(PollOutcome::Pending) => Ok(None),
            Err(e) => {
                self.reading_channel = None;
                self.state = FiringState::Idle;
                Err(e)
            }
        }
    }

    /// Poll the buffer until a PIN readout parses or `timeout` passes.
    async fn poll_pin(
        &mut self,
        channel: Channel,
        timeout: Duration,
    ) -> TellieResult<PollOutcome<PinReading>> {
        let budget = PollBudget::start(self.timing.poll_interval, timeout);
        loop {
            let raw = self.transport.drain().await?;
            if let Some((mean, rms)) = readout::parse_pin(&raw)? {
                tracing::debug!(channel = %channel, mean, rms, "PIN readout");
                return Ok(PollOutcome::Ready(PinReading {
                    channel: channel.number(),
                    mean,
                    rms,
                }));
            }
            if !budget.next().await {
                return Ok(PollOutcome::Pending);
            }
        }
    }

    /// Stop firing and return the box to a blank state.
    ///
    /// Always legal. Disables the external trigger, sends stop and clear
    /// without reading echoes, and forgets every cached setting. Returns the
    /// text that was in the buffer after the stop.
    pub async fn stop(&mut self) -> TellieResult<String> {
        tracing::info!(state = ?self.state, "Stop firing");
        let codec = self.codec();

        self.transport
            .send(&codec.disable_external_trigger().without_echo())
            .await?;
        self.transport.drain().await?;
        self.transport.send(&codec.stop()).await?;
        let buffer = self.transport.drain().await?;
        self.transport
            .send(&codec.clear_channel().without_echo())
            .await?;
        self.transport.drain().await?;

        self.forget_device_state();
        self.external_trigger = Some(false);
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Select a temperature probe (1-64). The first two readings after a
    /// switch are junk and are read and dropped here.
    pub async fn select_temp_probe(&mut self, probe: u8) -> TellieResult<()> {
        let command = self.codec().select_temp_probe(probe)?;
        self.ensure_idle("select a temperature probe")?;
        if self.temp_probe == Some(probe) {
            return Ok(());
        }
        tracing::debug!(probe, "Select temperature probe");
        self.transport.send(&command).await?;
        self.temp_probe = Some(probe);

        for _ in 0..JUNK_TEMP_READS {
            match self.read_temp().await {
                Ok(value) => tracing::trace!(value, "Discarded temperature reading"),
                Err(e) if e.kind() == ErrorKind::Protocol => {
                    tracing::debug!(error = %e, "Discarded temperature reading")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Read the selected temperature probe in degrees Celsius.
    pub async fn read_temp(&mut self) -> TellieResult<f64> {
        let probe = self
            .temp_probe
            .ok_or_else(|| TellieError::state("Cannot read temp: no probe selected"))?;
        self.ensure_idle("read the temperature")?;

        let command = self.codec().read_temp(probe)?;
        self.transport.send(&command).await?;

        let timeout = self.timing.temp_timeout;
        let budget = PollBudget::start(self.timing.poll_interval, timeout);
        loop {
            let raw = self.transport.drain().await?;
            if let Some(value) = readout::parse_temperature(&raw)? {
                tracing::debug!(probe, value, "Temperature readout");
                return Ok(value);
            }
            if !budget.next().await {
                return Err(TellieError::Timeout(format!(
                    "Temperature read timeout on probe {probe}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ChannelInit, Phase, ReadoutTiming};
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::hardware::mock::simulated_pin_mean;
    use crate::protocol::codec::Codec;
    use crate::protocol::session::{SessionOptions, TransportSession};

    fn ch(n: u32) -> Channel {
        Channel::new(n).unwrap()
    }

    fn device(adapter: &MockAdapter) -> DeviceSession {
        let transport = TransportSession::new(
            Box::new(adapter.clone()),
            Codec::default(),
            SessionOptions::immediate(),
        );
        DeviceSession::new(
            transport,
            ReadoutTiming {
                poll_interval: Duration::from_millis(1),
                pin_timeout: Duration::from_millis(20),
                temp_timeout: Duration::from_millis(20),
            },
        )
    }

    /// Program `channel` with a sequence of `pulses` at 1 ms spacing.
    async fn loaded(adapter: &MockAdapter, channel: u32, pulses: u32) -> DeviceSession {
        let mut device = device(adapter);
        device
            .init_channel(&ChannelInit {
                channel: ch(channel),
                pulse_number: pulses,
                pulse_delay_ms: 1.0,
                trigger_delay_ns: 0.0,
                pulse_width: 0,
                pulse_height: 2000,
                fibre_delay_ns: 0.0,
            })
            .await
            .unwrap();
        device
    }

    #[tokio::test]
    async fn test_fire_without_settings_is_rejected() {
        let adapter = MockAdapter::new();
        let mut device = device(&adapter);
        device.select_channel(ch(5)).await.unwrap();
        adapter.clear_log();

        let err = device.fire(false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(err.to_string().contains("Pulse width"));
        assert_eq!(adapter.write_count(), 0);
    }

    #[tokio::test]
    async fn test_short_series_then_read_pin() {
        let adapter = MockAdapter::new();
        let mut device = loaded(&adapter, 5, 100).await;

        device.fire(false).await.unwrap();
        assert_eq!(device.firing_state(), FiringState::Reading(FireMode::Series));
        assert!(!device.force_setting());

        let reading = device.read_pin(ch(5)).await.unwrap().unwrap();
        assert_eq!(reading.channel, 5);
        assert_eq!(reading.mean, simulated_pin_mean(2000));
        assert!((reading.rms - 1.25).abs() < 1e-9);
        assert_eq!(device.phase(), Phase::ChannelLoaded);
    }

    #[tokio::test]
    async fn test_long_series_waits_for_end_marker() {
        let adapter = MockAdapter::new();
        let mut device = loaded(&adapter, 12, 1000).await;
        adapter.with_pulser(|p| p.hold_readouts(true));

        device.fire(false).await.unwrap();
        assert_eq!(device.firing_state(), FiringState::Firing(FireMode::Series));
        assert_eq!(device.read_pin(ch(12)).await.unwrap(), None);

        adapter.with_pulser(|p| p.hold_readouts(false));
        let reading = device.read_pin(ch(12)).await.unwrap().unwrap();
        assert_eq!(reading.mean, simulated_pin_mean(2000));
        assert!(device.firing_state().is_idle());
    }

    #[tokio::test]
    async fn test_read_pin_for_other_channel_rejected() {
        let adapter = MockAdapter::new();
        let mut device = loaded(&adapter, 3, 100).await;
        adapter.with_pulser(|p| p.hold_readouts(true));
        device.fire(false).await.unwrap();

        assert_eq!(device.read_pin(ch(3)).await.unwrap(), None);
        let err = device.read_pin(ch(4)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[tokio::test]
    async fn test_settings_rejected_while_firing() {
        let adapter = MockAdapter::new();
        let mut device = loaded(&adapter, 5, 1000).await;
        adapter.with_pulser(|p| p.hold_readouts(true));
        device.fire(false).await.unwrap();
        adapter.clear_log();

        let err = device.set_pulse_height(100).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        let err = device.set_pulse_width(100, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        let err = device.fire(false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(adapter.write_count(), 0);

        device.set_pulse_width(100, true).await.unwrap();
        assert_eq!(adapter.with_pulser(|p| p.pulse_width(5)), Some(100));
    }

    #[tokio::test]
    async fn test_fire_sequence_and_read_back() {
        let adapter = MockAdapter::new();
        let mut device = loaded(&adapter, 60, 200).await;

        device.fire_sequence().await.unwrap();
        assert_eq!(adapter.written_bytes().last(), Some(&b'U'));
        let reading = device.read_pin_sequence().await.unwrap().unwrap();
        assert_eq!(reading.channel, 60);
        assert!(device.firing_state().is_idle());
    }

    #[tokio::test]
    async fn test_read_pin_sequence_requires_fire() {
        let adapter = MockAdapter::new();
        let mut device = loaded(&adapter, 1, 200).await;
        let err = device.read_pin_sequence().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[tokio::test]
    async fn test_fire_single() {
        let adapter = MockAdapter::new();
        let mut device = loaded(&adapter, 2, 10).await;
        let reading = device.fire_single().await.unwrap();
        assert_eq!(reading.mean, simulated_pin_mean(2000));
        assert!(device.firing_state().is_idle());

        adapter.with_pulser(|p| p.hold_readouts(true));
        let err = device.fire_single().await.unwrap_err();
        assert!(matches!(err, TellieError::Timeout(_)));
        assert!(device.firing_state().is_idle());
    }

    #[tokio::test]
    async fn test_stop_forgets_everything() {
        let adapter = MockAdapter::new();
        let mut device = loaded(&adapter, 5, 1000).await;
        device.fire_continuous().await.unwrap();
        assert!(adapter.with_pulser(|p| p.is_firing()));
        adapter.clear_log();

        device.stop().await.unwrap();
        assert_eq!(
            adapter.write_log(),
            vec![b"B".to_vec(), b"X".to_vec(), b"C".to_vec()]
        );
        assert!(!adapter.with_pulser(|p| p.is_firing()));
        assert!(device.selection().is_empty());
        assert_eq!(device.phase(), Phase::Idle);
        assert_eq!(device.settings().globals.pulse_number, None);
    }

    #[tokio::test]
    async fn test_external_trigger_averaged() {
        let adapter = MockAdapter::new();
        let mut device = loaded(&adapter, 7, 100).await;

        let err = device.trigger_averaged().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);

        device.enable_external_trigger().await.unwrap();
        assert_eq!(device.phase(), Phase::ExternalTriggerArmed);
        assert!(adapter.with_pulser(|p| p.external_trigger_enabled()));

        device.trigger_averaged().await.unwrap();
        assert_eq!(
            device.firing_state(),
            FiringState::Firing(FireMode::TriggerAveraged)
        );
        assert!(device.read_pin_sequence().await.unwrap().is_some());

        device.disable_external_trigger().await.unwrap();
        assert!(!adapter.with_pulser(|p| p.external_trigger_enabled()));
    }

    #[tokio::test]
    async fn test_fire_disables_external_trigger_first() {
        let adapter = MockAdapter::new();
        let mut device = loaded(&adapter, 7, 100).await;
        device.enable_external_trigger().await.unwrap();
        device.fire(false).await.unwrap();
        assert!(!adapter.with_pulser(|p| p.external_trigger_enabled()));
    }

    #[tokio::test]
    async fn test_temperature_probe() {
        let adapter = MockAdapter::new();
        let mut device = device(&adapter);

        let err = device.read_temp().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);

        device.select_temp_probe(4).await.unwrap();
        let seen = adapter.with_pulser(|p| p.commands_seen().to_vec());
        assert_eq!(seen, b"nTT".to_vec(), "two junk reads after selection");

        let value = device.read_temp().await.unwrap();
        assert!((value - 21.0).abs() < 1e-9);

        adapter.clear_log();
        device.select_temp_probe(4).await.unwrap();
        assert_eq!(adapter.write_count(), 0, "same probe is not reselected");
    }
}
