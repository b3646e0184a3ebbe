//! Command encoding.
//!
//! Every command sent to the box is a [`CommandDescriptor`]: the byte chunks
//! written one after another and the echo the firmware answers with. Parameter
//! bytes are never echoed, only opcodes (and the box number on selection).

use super::channel::Channel;
use super::opcodes::{ChipVariant, OpcodeTable};
use super::parameters::{self, MAX_PULSE_HEIGHT, MAX_PULSE_WIDTH};
use crate::error::{TellieError, TellieResult};

/// Bytes to write plus the echo that confirms them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub chunks: Vec<Vec<u8>>,
    pub echo: Option<Vec<u8>>,
}

impl CommandDescriptor {
    fn echoed(chunks: Vec<Vec<u8>>, echo: Vec<u8>) -> Self {
        Self {
            chunks,
            echo: Some(echo),
        }
    }

    fn silent(chunks: Vec<Vec<u8>>) -> Self {
        Self { chunks, echo: None }
    }

    /// Drop the echo check, for commands sent while the buffer holds readout.
    pub fn without_echo(mut self) -> Self {
        self.echo = None;
        self
    }

    /// All chunks concatenated as they appear on the wire.
    pub fn wire_bytes(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// Encoder for one firmware dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Codec {
    variant: ChipVariant,
}

impl Codec {
    pub fn new(variant: ChipVariant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> ChipVariant {
        self.variant
    }

    pub fn opcodes(&self) -> &'static OpcodeTable {
        self.variant.opcodes()
    }

    /// `L<hi> M<lo> P`, echo `LMP`.
    pub fn pulse_height(&self, height: u16) -> TellieResult<CommandDescriptor> {
        let op = self.opcodes();
        let (hi, lo) = parameters::split_14bit(height, MAX_PULSE_HEIGHT, "Pulse height")?;
        Ok(CommandDescriptor::echoed(
            vec![
                vec![op.pulse_height_hi, hi],
                vec![op.pulse_height_lo, lo],
                vec![op.pulse_height_end],
            ],
            vec![op.pulse_height_hi, op.pulse_height_lo, op.pulse_height_end],
        ))
    }

    /// `Q<hi> R<lo>S`, echo `QRS`.
    pub fn pulse_width(&self, width: u16) -> TellieResult<CommandDescriptor> {
        let op = self.opcodes();
        let (hi, lo) = parameters::split_14bit(width, MAX_PULSE_WIDTH, "Pulse width")?;
        Ok(CommandDescriptor::echoed(
            vec![
                vec![op.pulse_width_hi, hi],
                vec![op.pulse_width_lo, lo, op.pulse_width_end],
            ],
            vec![op.pulse_width_hi, op.pulse_width_lo, op.pulse_width_end],
        ))
    }

    /// `H<hi> G<lo>`, echo `HG`. Counts without an exact factorization are
    /// refused rather than fired as a neighbouring count.
    pub fn pulse_number(&self, number: u32) -> TellieResult<CommandDescriptor> {
        let factors = parameters::pulse_number_factors(number)?;
        if factors.adjusted {
            return Err(TellieError::configuration(format!(
                "Pulse number {number} has no exact hi*lo factorization (closest {})",
                factors.product()
            )));
        }
        let op = self.opcodes();
        Ok(CommandDescriptor::echoed(
            vec![
                vec![op.pulse_number_hi, factors.hi],
                vec![op.pulse_number_lo, factors.lo],
            ],
            vec![op.pulse_number_hi, op.pulse_number_lo],
        ))
    }

    /// `u<ms> <fraction>`, echo `u`.
    pub fn pulse_delay(&self, delay_ms: f64) -> TellieResult<CommandDescriptor> {
        let op = self.opcodes();
        let parts = parameters::pulse_delay_parts(delay_ms)?;
        Ok(CommandDescriptor::echoed(
            vec![vec![op.pulse_delay, parts.ms], vec![parts.fraction]],
            vec![op.pulse_delay],
        ))
    }

    /// `d<units>`, echo `d`. Off-grid delays are rounded to the nearest 5 ns.
    pub fn trigger_delay(&self, delay_ns: f64) -> TellieResult<CommandDescriptor> {
        let op = self.opcodes();
        let units = parameters::trigger_delay_units(delay_ns)?;
        if units.adjusted {
            tracing::warn!(
                requested = delay_ns,
                actual = units.actual,
                "Trigger delay rounded to hardware grid"
            );
        }
        Ok(CommandDescriptor::echoed(
            vec![vec![op.trigger_delay, units.units]],
            vec![op.trigger_delay],
        ))
    }

    /// `e<units>`, echo `e`. Off-grid delays are refused.
    pub fn fibre_delay(&self, delay_ns: f64) -> TellieResult<CommandDescriptor> {
        let op = self.opcodes();
        let units = parameters::fibre_delay_units(delay_ns)?;
        if units.adjusted {
            return Err(TellieError::configuration(format!(
                "Fibre delay {delay_ns} ns is not a multiple of 0.25 ns"
            )));
        }
        Ok(CommandDescriptor::echoed(
            vec![vec![op.fibre_delay, units.units]],
            vec![op.fibre_delay],
        ))
    }

    /// `I<ch>N`, echo `B<box>N`.
    pub fn select_channel(&self, channel: Channel) -> CommandDescriptor {
        let op = self.opcodes();
        CommandDescriptor::echoed(
            vec![vec![
                op.select_single_start,
                channel.number(),
                op.select_single_end,
            ]],
            self.box_echo(channel, op.select_single_end),
        )
    }

    /// `J<ch>...E`, echo `B<box of first>E`.
    pub fn select_channels(&self, channels: &[Channel]) -> TellieResult<CommandDescriptor> {
        let first = channels.first().ok_or_else(|| {
            TellieError::configuration("Cannot select an empty channel list")
        })?;
        let op = self.opcodes();
        let mut command = Vec::with_capacity(channels.len() + 2);
        command.push(op.select_many_start);
        command.extend(channels.iter().map(|c| c.number()));
        command.push(op.select_many_end);
        Ok(CommandDescriptor::echoed(
            vec![command],
            self.box_echo(*first, op.select_many_end),
        ))
    }

    fn box_echo(&self, channel: Channel, end: u8) -> Vec<u8> {
        let mut echo = vec![self.opcodes().select_echo_prefix];
        echo.extend(channel.box_number().to_string().into_bytes());
        echo.push(end);
        echo
    }

    pub fn clear_channel(&self) -> CommandDescriptor {
        let clear = self.opcodes().channel_clear;
        CommandDescriptor::echoed(vec![vec![clear]], vec![clear])
    }

    pub fn stop(&self) -> CommandDescriptor {
        CommandDescriptor::silent(vec![vec![self.opcodes().stop]])
    }

    /// Series fire. Short sequences finish before the echo is read, so the
    /// end-of-sequence marker is part of the expected echo.
    pub fn fire_series(&self, short_sequence: bool) -> CommandDescriptor {
        let op = self.opcodes();
        if !op.series_echo {
            return CommandDescriptor::silent(vec![vec![op.fire_series]]);
        }
        let mut echo = vec![op.fire_series];
        if short_sequence {
            echo.push(op.end_of_sequence);
        }
        CommandDescriptor::echoed(vec![vec![op.fire_series]], echo)
    }

    pub fn fire_average(&self, channel: Channel) -> CommandDescriptor {
        let op = self.opcodes();
        let code = if channel.is_upper() {
            op.fire_average_upper
        } else {
            op.fire_average_lower
        };
        CommandDescriptor::silent(vec![vec![code]])
    }

    pub fn read_single(&self, channel: Channel) -> CommandDescriptor {
        let op = self.opcodes();
        let code = if channel.is_upper() {
            op.read_single_upper
        } else {
            op.read_single_lower
        };
        CommandDescriptor::silent(vec![vec![code]])
    }

    pub fn fire_continuous(&self) -> CommandDescriptor {
        CommandDescriptor::silent(vec![vec![self.opcodes().fire_continuous]])
    }

    pub fn trigger_average(&self, channel: Channel) -> CommandDescriptor {
        let op = self.opcodes();
        let code = if channel.is_upper() {
            op.trigger_average_upper
        } else {
            op.trigger_average_lower
        };
        CommandDescriptor::silent(vec![vec![code]])
    }

    /// Probes 1-32 use `n<p>`, probes 33-64 use `f<p-32>`. No echo.
    pub fn select_temp_probe(&self, probe: u8) -> TellieResult<CommandDescriptor> {
        let op = self.opcodes();
        let (code, index) = match probe {
            1..=parameters::LOWER_TEMP_PROBES => (op.temp_select_lower, probe),
            p if p <= parameters::MAX_TEMP_PROBE => {
                (op.temp_select_upper, p - parameters::LOWER_TEMP_PROBES)
            }
            _ => {
                return Err(TellieError::configuration(format!(
                    "Temperature probe must be within 1-{}, got {probe}",
                    parameters::MAX_TEMP_PROBE
                )))
            }
        };
        Ok(CommandDescriptor::silent(vec![vec![code, index]]))
    }

    pub fn read_temp(&self, probe: u8) -> TellieResult<CommandDescriptor> {
        let op = self.opcodes();
        let code = match probe {
            1..=parameters::LOWER_TEMP_PROBES => op.temp_read_lower,
            p if p <= parameters::MAX_TEMP_PROBE => op.temp_read_upper,
            _ => {
                return Err(TellieError::configuration(format!(
                    "Temperature probe must be within 1-{}, got {probe}",
                    parameters::MAX_TEMP_PROBE
                )))
            }
        };
        Ok(CommandDescriptor::silent(vec![vec![code]]))
    }

    pub fn disable_external_trigger(&self) -> CommandDescriptor {
        let code = self.opcodes().disable_external_trigger;
        CommandDescriptor::echoed(vec![vec![code]], vec![code])
    }

    pub fn enable_external_trigger(&self) -> CommandDescriptor {
        let code = self.opcodes().enable_external_trigger;
        CommandDescriptor::echoed(vec![vec![code]], vec![code])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(n: u32) -> Channel {
        Channel::new(n).unwrap()
    }

    #[test]
    fn test_pulse_height_encoding() {
        let cmd = Codec::default().pulse_height(0x1234).unwrap();
        assert_eq!(
            cmd.chunks,
            vec![b"L\x12".to_vec(), b"M\x34".to_vec(), b"P".to_vec()]
        );
        assert_eq!(cmd.echo.as_deref(), Some(&b"LMP"[..]));
    }

    #[test]
    fn test_pulse_width_encoding() {
        let cmd = Codec::default().pulse_width(16383).unwrap();
        assert_eq!(cmd.chunks, vec![vec![b'Q', 0x3F], vec![b'R', 0xFF, b'S']]);
        assert_eq!(cmd.echo.as_deref(), Some(&b"QRS"[..]));
        assert!(Codec::default().pulse_width(16384).is_err());
    }

    #[test]
    fn test_pulse_number_encoding() {
        let cmd = Codec::default().pulse_number(1000).unwrap();
        assert_eq!(cmd.wire_bytes(), vec![b'H', 4, b'G', 250]);
        assert_eq!(cmd.echo.as_deref(), Some(&b"HG"[..]));
    }

    #[test]
    fn test_pulse_number_rejections() {
        let codec = Codec::default();
        assert!(codec.pulse_number(0).is_err());
        assert!(codec.pulse_number(257).is_err(), "adjusted count must be refused");
        assert!(codec.pulse_number(65026).is_err());
    }

    #[test]
    fn test_delay_encodings() {
        let codec = Codec::default();
        assert_eq!(codec.pulse_delay(10.5).unwrap().wire_bytes(), vec![b'u', 10, 125]);
        assert_eq!(codec.trigger_delay(100.0).unwrap().wire_bytes(), vec![b'd', 20]);
        assert_eq!(codec.fibre_delay(2.5).unwrap().wire_bytes(), vec![b'e', 10]);
        assert!(codec.fibre_delay(2.6).is_err());
    }

    #[test]
    fn test_channel_selection_echo() {
        let codec = Codec::default();
        let single = codec.select_channel(ch(9));
        assert_eq!(single.wire_bytes(), vec![b'I', 9, b'N']);
        assert_eq!(single.echo.as_deref(), Some(&b"B2N"[..]));

        let last = codec.select_channel(ch(96));
        assert_eq!(last.echo.as_deref(), Some(&b"B12N"[..]));

        let many = codec.select_channels(&[ch(3), ch(17)]).unwrap();
        assert_eq!(many.wire_bytes(), vec![b'J', 3, 17, b'E']);
        assert_eq!(many.echo.as_deref(), Some(&b"B1E"[..]));
        assert!(codec.select_channels(&[]).is_err());
    }

    #[test]
    fn test_register_bank_opcodes() {
        let codec = Codec::default();
        assert_eq!(codec.fire_average(ch(56)).wire_bytes(), b"s".to_vec());
        assert_eq!(codec.fire_average(ch(57)).wire_bytes(), b"U".to_vec());
        assert_eq!(codec.read_single(ch(57)).wire_bytes(), b"m".to_vec());

        let legacy = Codec::new(ChipVariant::Legacy);
        assert_eq!(legacy.fire_average(ch(57)).wire_bytes(), b"s".to_vec());
    }

    #[test]
    fn test_series_echo_includes_end_marker_for_short_sequences() {
        let codec = Codec::default();
        assert_eq!(codec.fire_series(true).echo.as_deref(), Some(&b"gK"[..]));
        assert_eq!(codec.fire_series(false).echo.as_deref(), Some(&b"g"[..]));
        assert_eq!(Codec::new(ChipVariant::Legacy).fire_series(true).echo, None);
    }

    #[test]
    fn test_temperature_probe_banks() {
        let codec = Codec::default();
        assert_eq!(codec.select_temp_probe(5).unwrap().wire_bytes(), vec![b'n', 5]);
        assert_eq!(codec.select_temp_probe(40).unwrap().wire_bytes(), vec![b'f', 8]);
        assert_eq!(codec.read_temp(40).unwrap().wire_bytes(), b"k".to_vec());
        assert!(codec.select_temp_probe(0).is_err());
        assert!(codec.select_temp_probe(65).is_err());
    }
}
