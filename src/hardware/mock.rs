//! Simulated pulser firmware
//!
//! `SimulatedPulser` models the control box at the byte level: it decodes the
//! opcode stream the driver writes, answers with the same echoes the firmware
//! produces, and prints PIN and temperature readouts into its output buffer.
//! It backs the `MockAdapter` link used by tests and by the server's
//! `--simulate` mode.
//!
//! Fault injection hooks mirror the failure modes seen on real boxes: a
//! corrupted echo, a lone null byte after a power glitch, and stale bytes left
//! in the buffer.

use crate::protocol::channel::{Channel, CHANNEL_COUNT};
use std::collections::VecDeque;

/// Number of sequence milliseconds below which the firmware reports the end
/// marker together with the series-fire echo.
const SHORT_SEQUENCE_MS: u32 = 500;

#[derive(Debug, Clone, Copy, Default)]
struct SimChannel {
    pulse_height: u16,
    pulse_width: u16,
    fibre_delay: u8,
}

#[derive(Debug, Clone)]
struct PendingCommand {
    opcode: u8,
    params: Vec<u8>,
    needed: usize,
}

/// Byte-level model of the TELLIE control box firmware.
#[derive(Debug, Clone)]
pub struct SimulatedPulser {
    output: VecDeque<u8>,
    held: Vec<u8>,
    hold_readouts: bool,
    pending: Option<PendingCommand>,
    selected: Vec<u8>,
    channels: Vec<SimChannel>,
    height_hi: u8,
    width_hi: u8,
    pulse_number: (u8, u8),
    pulse_delay_ms: u8,
    trigger_delay_units: u8,
    temp_probe: Option<u8>,
    external_trigger: bool,
    firing: bool,
    corrupt_next_echo: Option<Vec<u8>>,
    power_lost: bool,
    null_sent: bool,
    commands_seen: Vec<u8>,
}

impl Default for SimulatedPulser {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPulser {
    /// Create a simulated box with nothing selected and all settings zero.
    pub fn new() -> Self {
        Self {
            output: VecDeque::new(),
            held: Vec::new(),
            hold_readouts: false,
            pending: None,
            selected: Vec::new(),
            channels: vec![SimChannel::default(); CHANNEL_COUNT],
            height_hi: 0,
            width_hi: 0,
            pulse_number: (1, 1),
            pulse_delay_ms: 0,
            trigger_delay_units: 0,
            temp_probe: None,
            external_trigger: false,
            firing: false,
            corrupt_next_echo: None,
            power_lost: false,
            null_sent: false,
            commands_seen: Vec::new(),
        }
    }

    /// Replace the echo of the next echoed command with `bytes`.
    pub fn inject_echo_fault(&mut self, bytes: &[u8]) {
        self.corrupt_next_echo = Some(bytes.to_vec());
    }

    /// Swallow the next command and answer with a single null byte, the way
    /// the box does after losing power. The box comes back once the host has
    /// read the null byte.
    pub fn inject_power_loss(&mut self) {
        self.power_lost = true;
        self.null_sent = false;
    }

    /// Put unsolicited bytes in the output buffer.
    pub fn inject_stale_bytes(&mut self, bytes: &[u8]) {
        self.output.extend(bytes);
    }

    /// Withhold readouts (PIN values, end-of-sequence markers) until released.
    pub fn hold_readouts(&mut self, hold: bool) {
        self.hold_readouts = hold;
        if !hold {
            self.release_readouts();
        }
    }

    /// Move withheld readouts into the output buffer.
    pub fn release_readouts(&mut self) {
        let held = std::mem::take(&mut self.held);
        self.output.extend(held);
    }

    /// Opcodes decoded so far, in order.
    pub fn commands_seen(&self) -> &[u8] {
        &self.commands_seen
    }

    pub fn is_firing(&self) -> bool {
        self.firing
    }

    pub fn external_trigger_enabled(&self) -> bool {
        self.external_trigger
    }

    pub fn selected_channels(&self) -> &[u8] {
        &self.selected
    }

    /// Pulse height last programmed for `channel`.
    pub fn pulse_height(&self, channel: u8) -> Option<u16> {
        self.channel(channel).map(|c| c.pulse_height)
    }

    /// Pulse width last programmed for `channel`.
    pub fn pulse_width(&self, channel: u8) -> Option<u16> {
        self.channel(channel).map(|c| c.pulse_width)
    }

    /// Fibre delay register last programmed for `channel`.
    pub fn fibre_delay_units(&self, channel: u8) -> Option<u8> {
        self.channel(channel).map(|c| c.fibre_delay)
    }

    pub fn pulse_number(&self) -> u32 {
        u32::from(self.pulse_number.0) * u32::from(self.pulse_number.1)
    }

    pub fn trigger_delay_units(&self) -> u8 {
        self.trigger_delay_units
    }

    /// Number of buffered output bytes.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    fn channel(&self, number: u8) -> Option<&SimChannel> {
        Channel::new(u32::from(number))
            .ok()
            .map(|c| &self.channels[c.index()])
    }

    /// Take up to `max` bytes from the output buffer.
    pub fn take_output(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.output.len());
        let taken: Vec<u8> = self.output.drain(..n).collect();
        if self.power_lost && self.null_sent && !taken.is_empty() {
            self.power_lost = false;
            self.null_sent = false;
        }
        taken
    }

    /// Feed one write from the host.
    pub fn receive(&mut self, bytes: &[u8]) {
        if self.power_lost {
            if !self.null_sent {
                self.null_sent = true;
                self.pending = None;
                self.output.push_back(0);
            }
            return;
        }
        let mut i = 0;
        while i < bytes.len() {
            if let Some(mut pending) = self.pending.take() {
                pending.params.push(bytes[i]);
                i += 1;
                if pending.params.len() == pending.needed {
                    self.execute(pending.opcode, &pending.params);
                } else {
                    self.pending = Some(pending);
                }
                continue;
            }

            let opcode = bytes[i];
            i += 1;
            if opcode == b'J' {
                // The multi-select list runs to the end of the write
                let params = bytes[i..].to_vec();
                i = bytes.len();
                self.execute(opcode, &params);
                continue;
            }

            let needed = param_count(opcode);
            if needed == 0 {
                self.execute(opcode, &[]);
            } else {
                self.pending = Some(PendingCommand {
                    opcode,
                    params: Vec::with_capacity(needed),
                    needed,
                });
            }
        }
    }

    fn execute(&mut self, opcode: u8, params: &[u8]) {
        self.commands_seen.push(opcode);

        match opcode {
            b'I' => {
                let channel = params.first().copied().unwrap_or(0);
                self.selected = vec![channel];
                self.echo(box_echo(channel, b'N'));
            }
            b'J' => {
                let channels: Vec<u8> = params
                    .iter()
                    .copied()
                    .take(params.len().saturating_sub(1))
                    .collect();
                let first = channels.first().copied().unwrap_or(0);
                self.selected = channels;
                self.echo(box_echo(first, b'E'));
            }
            b'C' => {
                self.selected.clear();
                self.echo(vec![b'C']);
            }
            b'L' => {
                self.height_hi = params[0];
                self.echo(vec![b'L']);
            }
            b'M' => {
                let value = u16::from(self.height_hi) << 8 | u16::from(params[0]);
                self.for_selected(|c| c.pulse_height = value);
                self.echo(vec![b'M']);
            }
            b'Q' => {
                self.width_hi = params[0];
                self.echo(vec![b'Q']);
            }
            b'R' => {
                let value = u16::from(self.width_hi) << 8 | u16::from(params[0]);
                self.for_selected(|c| c.pulse_width = value);
                self.echo(vec![b'R']);
            }
            b'e' => {
                let units = params[0];
                self.for_selected(|c| c.fibre_delay = units);
                self.echo(vec![b'e']);
            }
            b'H' => {
                self.pulse_number.0 = params[0];
                self.echo(vec![b'H']);
            }
            b'G' => {
                self.pulse_number.1 = params[0];
                self.echo(vec![b'G']);
            }
            b'u' => {
                self.pulse_delay_ms = params[0];
                self.echo(vec![b'u']);
            }
            b'd' => {
                self.trigger_delay_units = params[0];
                self.echo(vec![b'd']);
            }
            b'P' | b'S' => self.echo(vec![opcode]),
            b'B' => {
                self.external_trigger = false;
                self.echo(vec![b'B']);
            }
            b'F' => {
                self.external_trigger = true;
                self.echo(vec![b'F']);
            }
            b'g' => {
                let duration_ms = self.pulse_number() * u32::from(self.pulse_delay_ms);
                self.firing = duration_ms >= SHORT_SEQUENCE_MS;
                if self.firing {
                    self.echo(vec![b'g']);
                    self.readout(b"K".to_vec());
                } else {
                    self.echo(b"gK".to_vec());
                }
            }
            b's' | b'U' | b't' | b'c' => {
                self.firing = true;
                let reading = self.pin_text();
                self.readout(reading);
            }
            b'r' | b'm' => {
                let reading = self.pin_text();
                self.readout(reading);
            }
            b'a' => self.firing = true,
            b'X' => self.firing = false,
            b'n' => self.temp_probe = params.first().copied(),
            b'f' => self.temp_probe = params.first().map(|p| p.saturating_add(32)),
            b'T' | b'k' => {
                let probe = self.temp_probe.unwrap_or(0);
                let text = format!("{:.2}\r\n", 20.0 + f64::from(probe) * 0.25);
                self.output.extend(text.into_bytes());
            }
            _ => {
                tracing::debug!(opcode = %char::from(opcode), "Simulated pulser ignoring unknown opcode");
            }
        }
    }

    fn for_selected(&mut self, mut apply: impl FnMut(&mut SimChannel)) {
        for number in self.selected.clone() {
            if let Ok(channel) = Channel::new(u32::from(number)) {
                apply(&mut self.channels[channel.index()]);
            }
        }
    }

    fn echo(&mut self, bytes: Vec<u8>) {
        let bytes = self.corrupt_next_echo.take().unwrap_or(bytes);
        self.output.extend(bytes);
    }

    fn readout(&mut self, bytes: Vec<u8>) {
        if self.hold_readouts {
            self.held.extend(bytes);
        } else {
            self.output.extend(bytes);
        }
    }

    /// PIN text for the first selected channel: the mean tracks the pulse
    /// height, RMS is fixed.
    fn pin_text(&self) -> Vec<u8> {
        let height = self
            .selected
            .first()
            .and_then(|c| self.pulse_height(*c))
            .unwrap_or(0);
        format!("{}\r\n1.25\r\n", simulated_pin_mean(height)).into_bytes()
    }
}

/// Mean PIN value the simulator reports for a pulse height.
pub fn simulated_pin_mean(pulse_height: u16) -> u32 {
    500 + u32::from(pulse_height) / 4
}

fn param_count(opcode: u8) -> usize {
    match opcode {
        b'I' | b'u' => 2,
        b'L' | b'M' | b'Q' | b'R' | b'H' | b'G' | b'd' | b'e' | b'n' | b'f' => 1,
        _ => 0,
    }
}

fn box_echo(channel: u8, end: u8) -> Vec<u8> {
    let box_number = channel.saturating_sub(1) / 8 + 1;
    let mut echo = vec![b'B'];
    echo.extend(box_number.to_string().into_bytes());
    echo.push(end);
    echo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_echo() {
        let mut sim = SimulatedPulser::new();
        sim.receive(&[b'I', 17, b'N']);
        assert_eq!(sim.take_output(100), b"B3N".to_vec());
        assert_eq!(sim.selected_channels(), &[17]);
    }

    #[test]
    fn test_chunked_parameters() {
        let mut sim = SimulatedPulser::new();
        sim.receive(&[b'I', 1, b'N']);
        sim.take_output(100);
        sim.receive(&[b'L', 0x12]);
        sim.receive(&[b'M', 0x34]);
        sim.receive(b"P");
        assert_eq!(sim.take_output(100), b"LMP".to_vec());
        assert_eq!(sim.pulse_height(1), Some(0x1234));

        sim.receive(&[b'u', 10]);
        sim.receive(&[125]);
        assert_eq!(sim.take_output(100), b"u".to_vec());
    }

    #[test]
    fn test_short_series_reports_end_marker() {
        let mut sim = SimulatedPulser::new();
        sim.receive(&[b'H', 1, b'G', 100]);
        sim.receive(&[b'u', 1, 0]);
        sim.take_output(100);
        sim.receive(b"g");
        assert_eq!(sim.take_output(100), b"gK".to_vec());
        assert!(!sim.is_firing());
    }

    #[test]
    fn test_power_loss_swallows_command() {
        let mut sim = SimulatedPulser::new();
        sim.inject_power_loss();
        sim.receive(&[b'L', 1]);
        sim.receive(&[b'M', 2]);
        sim.receive(b"P");
        assert_eq!(sim.take_output(100), vec![0]);
        assert_eq!(sim.pulse_height(1), Some(0));
        sim.receive(b"C");
        assert_eq!(sim.take_output(100), b"C".to_vec());
    }

    #[test]
    fn test_held_readouts() {
        let mut sim = SimulatedPulser::new();
        sim.hold_readouts(true);
        sim.receive(b"r");
        assert_eq!(sim.pending_output(), 0);
        sim.release_readouts();
        assert_eq!(sim.take_output(100), b"500\r\n1.25\r\n".to_vec());
    }
}
