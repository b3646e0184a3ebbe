//! Channel selection and setting commands.

use super::settings::{
    ChannelInit, ChannelSettingsMap, ChannelSnapshot, ForcedSettings, GlobalSettings,
    SettingsSnapshot,
};
use super::{FiringState, Phase, ReadoutTiming};
use crate::error::{TellieError, TellieResult};
use crate::protocol::channel::Channel;
use crate::protocol::codec::{Codec, CommandDescriptor};
use crate::protocol::session::TransportSession;

/// Driver-side model of one control box.
///
/// The session is the only writer on its link. It checks every call against
/// the selection and firing state before anything goes on the wire, and skips
/// setting commands whose value the box already holds.
pub struct DeviceSession {
    pub(super) transport: TransportSession,
    pub(super) timing: ReadoutTiming,
    pub(super) selection: Vec<Channel>,
    pub(super) channels: ChannelSettingsMap,
    pub(super) globals: GlobalSettings,
    pub(super) state: FiringState,
    /// Marked on every selection change; resend those settings even if cached.
    pub(super) forced: ForcedSettings,
    pub(super) temp_probe: Option<u8>,
    pub(super) external_trigger: Option<bool>,
    /// Channel whose read-single request is outstanding.
    pub(super) reading_channel: Option<Channel>,
}

impl DeviceSession {
    pub fn new(transport: TransportSession, timing: ReadoutTiming) -> Self {
        Self {
            transport,
            timing,
            selection: Vec::new(),
            channels: ChannelSettingsMap::default(),
            globals: GlobalSettings::default(),
            state: FiringState::Idle,
            forced: ForcedSettings::default(),
            temp_probe: None,
            external_trigger: None,
            reading_channel: None,
        }
    }

    pub(super) fn codec(&self) -> Codec {
        self.transport.codec()
    }

    pub fn firing_state(&self) -> FiringState {
        self.state
    }

    pub fn selection(&self) -> &[Channel] {
        &self.selection
    }

    /// True while a selection change still has settings to resend.
    pub fn force_setting(&self) -> bool {
        self.forced.any()
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            FiringState::Firing(_) => Phase::Firing,
            FiringState::Reading(_) => Phase::Reading,
            FiringState::Idle if self.external_trigger == Some(true) => {
                Phase::ExternalTriggerArmed
            }
            FiringState::Idle if !self.selection.is_empty() => Phase::ChannelLoaded,
            FiringState::Idle => Phase::Idle,
        }
    }

    /// Snapshot of the selection and of every cached setting.
    pub fn settings(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            channels: self.selection.iter().map(|c| c.number()).collect(),
            globals: self.globals,
            channel_settings: self
                .selection
                .iter()
                .map(|c| ChannelSnapshot {
                    channel: c.number(),
                    settings: *self.channels.get(*c),
                })
                .collect(),
            phase: self.phase(),
            temp_probe: self.temp_probe,
            external_trigger: self.external_trigger,
        }
    }

    /// Reset the box over RTS (optional), then clear the channel selection
    /// and force the external trigger off.
    pub async fn initialise(&mut self, reset: bool) -> TellieResult<()> {
        if reset {
            self.transport.reset().await?;
        }
        // Anything printed during power-up is junk
        let junk = self.transport.drain().await?;
        if !junk.is_empty() {
            tracing::debug!(bytes = junk.len(), "Discarded start-up output");
        }
        let clear = self.codec().clear_channel();
        self.transport.send(&clear).await?;
        let disable = self.codec().disable_external_trigger();
        self.transport.send(&disable).await?;
        self.forget_device_state();
        self.external_trigger = Some(false);
        tracing::info!(link = %self.transport.link_name(), "Control box initialised");
        Ok(())
    }

    /// Drop everything cached about the box without touching the wire.
    ///
    /// Used after the transport has already resynchronized the box, when the
    /// cached values can no longer be trusted.
    pub fn forget_device_state(&mut self) {
        self.selection.clear();
        self.channels.clear_all();
        self.globals = GlobalSettings::default();
        self.state = FiringState::Idle;
        self.forced = ForcedSettings::default();
        self.reading_channel = None;
        self.external_trigger = None;
    }

    pub(super) fn ensure_idle(&self, action: &str) -> TellieResult<()> {
        if self.state.is_idle() {
            Ok(())
        } else {
            Err(TellieError::state(format!(
                "Cannot {action}, in firing mode"
            )))
        }
    }

    pub(super) fn single_channel(&self, action: &str) -> TellieResult<Channel> {
        match self.selection.as_slice() {
            [channel] => Ok(*channel),
            [] => Err(TellieError::state(format!(
                "Cannot {action}, no channel selected"
            ))),
            many => Err(TellieError::state(format!(
                "Cannot {action}, must have single channel selected: {:?}",
                many.iter().map(|c| c.number()).collect::<Vec<_>>()
            ))),
        }
    }

    /// Setting commands need an empty buffer and an echo. While firing only
    /// `while_fire` commands are allowed, and their echo is not read because
    /// the buffer holds PIN output.
    async fn send_setting(
        &mut self,
        command: CommandDescriptor,
        while_fire: bool,
    ) -> TellieResult<()> {
        if self.state.is_idle() {
            self.transport.ensure_clear().await?;
            self.transport.send(&command).await
        } else if while_fire {
            self.transport.send(&command.without_echo()).await
        } else {
            Err(TellieError::state("Cannot run command, in firing mode"))
        }
    }

    fn check_setting_allowed(&self, while_fire: bool) -> TellieResult<()> {
        if self.state.is_idle() || while_fire {
            Ok(())
        } else {
            Err(TellieError::state("Cannot run command, in firing mode"))
        }
    }

    /// Select one channel. A no-op if it is already the only selection.
    pub async fn select_channel(&mut self, channel: Channel) -> TellieResult<()> {
        self.ensure_idle("select a channel")?;
        self.select_channel_unchecked(channel).await
    }

    pub(super) async fn select_channel_unchecked(&mut self, channel: Channel) -> TellieResult<()> {
        if self.selection == [channel] {
            return Ok(());
        }
        if !self.selection.is_empty() {
            let clear = self.codec().clear_channel();
            self.transport.send(&clear).await?;
            self.selection.clear();
        }
        tracing::debug!(channel = %channel, "Select channel");
        self.forced = ForcedSettings::all();
        let select = self.codec().select_channel(channel);
        self.transport.send(&select).await?;
        self.selection = vec![channel];
        Ok(())
    }

    /// Select several channels to fire together.
    pub async fn select_channels(&mut self, channels: &[Channel]) -> TellieResult<()> {
        let select = self.codec().select_channels(channels)?;
        self.ensure_idle("select channels")?;
        let clear = self.codec().clear_channel();
        self.transport.send(&clear).await?;
        self.selection.clear();
        tracing::debug!(channels = ?channels, "Select channels");
        self.forced = ForcedSettings::all();
        self.transport.send(&select).await?;
        self.selection = channels.to_vec();
        Ok(())
    }

    /// Deselect every channel.
    pub async fn clear_channel(&mut self) -> TellieResult<()> {
        self.ensure_idle("clear the channel")?;
        let clear = self.codec().clear_channel();
        self.transport.send(&clear).await?;
        self.selection.clear();
        Ok(())
    }

    /// Forget the cached settings of `channel`.
    pub fn clear_channel_settings(&mut self, channel: Channel) {
        self.channels.clear(channel);
    }

    /// Forget the cached global settings.
    pub fn clear_global_settings(&mut self) {
        self.globals = GlobalSettings::default();
    }

    pub async fn set_pulse_height(&mut self, height: u16) -> TellieResult<()> {
        let command = self.codec().pulse_height(height)?;
        let channel = self.single_channel("set pulse height")?;
        self.check_setting_allowed(false)?;
        if !self.forced.pulse_height && self.channels.get(channel).pulse_height == Some(height) {
            return Ok(());
        }
        tracing::debug!(channel = %channel, height, "Set pulse height");
        self.send_setting(command, false).await?;
        self.channels.get_mut(channel).pulse_height = Some(height);
        self.forced.pulse_height = false;
        Ok(())
    }

    /// Set the pulse width. This is the only setting that may change while
    /// firing, with `while_fire` set.
    pub async fn set_pulse_width(&mut self, width: u16, while_fire: bool) -> TellieResult<()> {
        let command = self.codec().pulse_width(width)?;
        let channel = self.single_channel("set pulse width")?;
        self.check_setting_allowed(while_fire)?;
        if !self.forced.pulse_width && self.channels.get(channel).pulse_width == Some(width) {
            return Ok(());
        }
        tracing::debug!(channel = %channel, width, while_fire, "Set pulse width");
        self.send_setting(command, while_fire).await?;
        self.channels.get_mut(channel).pulse_width = Some(width);
        self.forced.pulse_width = false;
        Ok(())
    }

    pub async fn set_fibre_delay(&mut self, delay_ns: f64) -> TellieResult<()> {
        let command = self.codec().fibre_delay(delay_ns)?;
        let channel = self.single_channel("set fibre delay")?;
        self.check_setting_allowed(false)?;
        if !self.forced.fibre_delay && self.channels.get(channel).fibre_delay == Some(delay_ns) {
            return Ok(());
        }
        tracing::debug!(channel = %channel, delay_ns, "Set fibre delay");
        self.send_setting(command, false).await?;
        self.channels.get_mut(channel).fibre_delay = Some(delay_ns);
        self.forced.fibre_delay = false;
        Ok(())
    }

    pub async fn set_pulse_number(&mut self, number: u32) -> TellieResult<()> {
        let command = self.codec().pulse_number(number)?;
        self.check_setting_allowed(false)?;
        if !self.forced.pulse_number && self.globals.pulse_number == Some(number) {
            return Ok(());
        }
        tracing::debug!(number, "Set pulse number");
        self.send_setting(command, false).await?;
        self.globals.pulse_number = Some(number);
        self.forced.pulse_number = false;
        Ok(())
    }

    pub async fn set_pulse_delay(&mut self, delay_ms: f64) -> TellieResult<()> {
        let command = self.codec().pulse_delay(delay_ms)?;
        self.check_setting_allowed(false)?;
        if !self.forced.pulse_delay && self.globals.pulse_delay == Some(delay_ms) {
            return Ok(());
        }
        tracing::debug!(delay_ms, "Set pulse delay");
        self.send_setting(command, false).await?;
        self.globals.pulse_delay = Some(delay_ms);
        self.forced.pulse_delay = false;
        Ok(())
    }

    pub async fn set_trigger_delay(&mut self, delay_ns: f64) -> TellieResult<()> {
        let command = self.codec().trigger_delay(delay_ns)?;
        self.check_setting_allowed(false)?;
        if !self.forced.trigger_delay && self.globals.trigger_delay == Some(delay_ns) {
            return Ok(());
        }
        tracing::debug!(delay_ns, "Set trigger delay");
        self.send_setting(command, false).await?;
        self.globals.trigger_delay = Some(delay_ns);
        self.forced.trigger_delay = false;
        Ok(())
    }

    /// Fail with the list of undefined settings unless every selected channel
    /// and the global settings are programmed.
    pub fn check_ready(&self) -> TellieResult<()> {
        if self.selection.is_empty() {
            return Err(TellieError::state("No channel selected"));
        }
        let mut not_set: Vec<&str> = Vec::new();
        for channel in &self.selection {
            not_set.extend(self.channels.get(*channel).missing());
        }
        not_set.extend(self.globals.missing());
        if not_set.is_empty() {
            Ok(())
        } else {
            Err(TellieError::state(format!(
                "Undefined options: {}",
                not_set.join(", ")
            )))
        }
    }

    /// Select a channel and program every setting needed to fire it.
    pub async fn init_channel(&mut self, init: &ChannelInit) -> TellieResult<SettingsSnapshot> {
        self.select_channel(init.channel).await?;
        self.set_pulse_number(init.pulse_number).await?;
        self.set_pulse_delay(init.pulse_delay_ms).await?;
        self.set_trigger_delay(init.trigger_delay_ns).await?;
        self.set_pulse_width(init.pulse_width, false).await?;
        self.set_pulse_height(init.pulse_height).await?;
        self.set_fibre_delay(init.fibre_delay_ns).await?;
        Ok(self.settings())
    }

    pub async fn close(&mut self) -> TellieResult<()> {
        self.transport.close().await
    }
}
