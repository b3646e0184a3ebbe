//! Firmware opcode tables.
//!
//! The control box firmware has shipped in two dialects. `Standard` firmware
//! splits the averaged/read-single commands by register bank (boxes 1-7 vs
//! 8-12) and echoes the series-fire opcode; `Legacy` firmware only knows the
//! lower bank and fires series without an echo.

use serde::{Deserialize, Serialize};

/// Opcodes understood by one firmware dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeTable {
    pub fire_series: u8,
    /// Whether the series-fire opcode is echoed back.
    pub series_echo: bool,
    /// Appended to the series echo when the whole sequence fits in 500 ms.
    pub end_of_sequence: u8,
    pub fire_average_lower: u8,
    pub fire_average_upper: u8,
    pub read_single_lower: u8,
    pub read_single_upper: u8,
    pub fire_continuous: u8,
    pub stop: u8,
    pub channel_clear: u8,
    pub select_single_start: u8,
    pub select_single_end: u8,
    pub select_many_start: u8,
    pub select_many_end: u8,
    /// Leading byte of the box-number echo on channel selection.
    pub select_echo_prefix: u8,
    pub pulse_height_hi: u8,
    pub pulse_height_lo: u8,
    pub pulse_height_end: u8,
    pub pulse_width_hi: u8,
    pub pulse_width_lo: u8,
    pub pulse_width_end: u8,
    pub pulse_number_hi: u8,
    pub pulse_number_lo: u8,
    pub pulse_delay: u8,
    pub trigger_delay: u8,
    pub fibre_delay: u8,
    pub temp_select_lower: u8,
    pub temp_select_upper: u8,
    pub temp_read_lower: u8,
    pub temp_read_upper: u8,
    pub disable_external_trigger: u8,
    pub enable_external_trigger: u8,
    pub trigger_average_lower: u8,
    pub trigger_average_upper: u8,
}

pub const STANDARD: OpcodeTable = OpcodeTable {
    fire_series: b'g',
    series_echo: true,
    end_of_sequence: b'K',
    fire_average_lower: b's',
    fire_average_upper: b'U',
    read_single_lower: b'r',
    read_single_upper: b'm',
    fire_continuous: b'a',
    stop: b'X',
    channel_clear: b'C',
    select_single_start: b'I',
    select_single_end: b'N',
    select_many_start: b'J',
    select_many_end: b'E',
    select_echo_prefix: b'B',
    pulse_height_hi: b'L',
    pulse_height_lo: b'M',
    pulse_height_end: b'P',
    pulse_width_hi: b'Q',
    pulse_width_lo: b'R',
    pulse_width_end: b'S',
    pulse_number_hi: b'H',
    pulse_number_lo: b'G',
    pulse_delay: b'u',
    trigger_delay: b'd',
    fibre_delay: b'e',
    temp_select_lower: b'n',
    temp_select_upper: b'f',
    temp_read_lower: b'T',
    temp_read_upper: b'k',
    disable_external_trigger: b'B',
    enable_external_trigger: b'F',
    trigger_average_lower: b't',
    trigger_average_upper: b'c',
};

pub const LEGACY: OpcodeTable = OpcodeTable {
    fire_series: b's',
    series_echo: false,
    fire_average_upper: b's',
    read_single_upper: b'r',
    temp_select_upper: b'n',
    temp_read_upper: b'T',
    trigger_average_upper: b't',
    ..STANDARD
};

/// Firmware dialect, chosen at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipVariant {
    #[default]
    Standard,
    Legacy,
}

impl ChipVariant {
    pub fn opcodes(self) -> &'static OpcodeTable {
        match self {
            Self::Standard => &STANDARD,
            Self::Legacy => &LEGACY,
        }
    }
}

impl std::str::FromStr for ChipVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown chip variant '{other}'")),
        }
    }
}
