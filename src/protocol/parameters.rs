//! Parameter limits and conversions from physical units to wire values.

use crate::error::{TellieError, TellieResult};

pub const MAX_PULSE_HEIGHT: u16 = 16383;
pub const MAX_PULSE_WIDTH: u16 = 16383;
pub const MAX_PULSE_NUMBER: u32 = 65025;
/// Largest value of either pulse-number factor.
pub const MAX_PULSE_NUMBER_FACTOR: u32 = 255;
pub const MIN_PULSE_DELAY_MS: f64 = 0.1;
pub const MAX_PULSE_DELAY_MS: f64 = 256.02;
pub const MAX_TRIGGER_DELAY_NS: f64 = 1275.0;
/// 255 steps of 0.25 ns, the most the one-byte register holds.
pub const MAX_FIBRE_DELAY_NS: f64 = 63.75;
pub const MAX_TEMP_PROBE: u8 = 64;
/// Probes above this number live on the upper register bank.
pub const LOWER_TEMP_PROBES: u8 = 32;

const TRIGGER_DELAY_STEP_NS: f64 = 5.0;
const FIBRE_DELAY_STEPS_PER_NS: f64 = 4.0;
const PULSE_DELAY_FRACTION_STEPS: f64 = 250.0;

/// Pulse number expressed as `hi * lo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseNumberFactors {
    pub hi: u8,
    pub lo: u8,
    /// True when `hi * lo` is not the requested count.
    pub adjusted: bool,
}

impl PulseNumberFactors {
    pub fn product(&self) -> u32 {
        u32::from(self.hi) * u32::from(self.lo)
    }
}

/// Factorize a pulse count into two byte-sized factors.
///
/// For each `hi` from 1 to 255 the nearest `lo` is either `n / hi` or one
/// more, both clamped into `1..=255`. The first pair with the smallest
/// distance to `n` wins and the scan stops at the first exact product. Zero
/// has no factorization and comes back as the adjusted pair `1 * 1`.
pub fn pulse_number_factors(number: u32) -> TellieResult<PulseNumberFactors> {
    if number > MAX_PULSE_NUMBER {
        return Err(TellieError::configuration(format!(
            "Pulse number must be <= {MAX_PULSE_NUMBER}, got {number}"
        )));
    }

    let mut best = (1u32, 1u32);
    let mut best_diff = number.abs_diff(1);
    'scan: for hi in 1..=MAX_PULSE_NUMBER_FACTOR {
        let floor = number / hi;
        for lo in [floor, floor + 1] {
            let lo = lo.clamp(1, MAX_PULSE_NUMBER_FACTOR);
            let diff = (hi * lo).abs_diff(number);
            if diff < best_diff {
                best_diff = diff;
                best = (hi, lo);
            }
            if diff == 0 {
                break 'scan;
            }
        }
    }

    let (hi, lo) = best;
    Ok(PulseNumberFactors {
        hi: hi as u8,
        lo: lo as u8,
        adjusted: hi * lo != number,
    })
}

/// Pulse delay split into whole milliseconds and 4 us fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseDelayParts {
    pub ms: u8,
    pub fraction: u8,
}

pub fn pulse_delay_parts(delay_ms: f64) -> TellieResult<PulseDelayParts> {
    if !delay_ms.is_finite() || !(MIN_PULSE_DELAY_MS..=MAX_PULSE_DELAY_MS).contains(&delay_ms) {
        return Err(TellieError::configuration(format!(
            "Pulse delay must be within {MIN_PULSE_DELAY_MS}-{MAX_PULSE_DELAY_MS} ms, got {delay_ms}"
        )));
    }
    let ms = delay_ms.floor().min(255.0);
    let fraction = ((delay_ms - ms) * PULSE_DELAY_FRACTION_STEPS).round();
    if fraction > 255.0 {
        return Err(TellieError::configuration(format!(
            "Pulse delay {delay_ms} ms is not representable"
        )));
    }
    Ok(PulseDelayParts {
        ms: ms as u8,
        fraction: fraction as u8,
    })
}

/// A delay rounded onto the hardware grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayUnits {
    pub units: u8,
    /// The delay the hardware will actually apply.
    pub actual: f64,
    pub adjusted: bool,
}

/// Trigger delay in 5 ns steps.
pub fn trigger_delay_units(delay_ns: f64) -> TellieResult<DelayUnits> {
    if !delay_ns.is_finite() || !(0.0..=MAX_TRIGGER_DELAY_NS).contains(&delay_ns) {
        return Err(TellieError::configuration(format!(
            "Trigger delay must be within 0-{MAX_TRIGGER_DELAY_NS} ns, got {delay_ns}"
        )));
    }
    let units = (delay_ns / TRIGGER_DELAY_STEP_NS).round();
    let actual = units * TRIGGER_DELAY_STEP_NS;
    Ok(DelayUnits {
        units: units as u8,
        actual,
        adjusted: actual != delay_ns,
    })
}

/// Fibre delay in 0.25 ns steps.
pub fn fibre_delay_units(delay_ns: f64) -> TellieResult<DelayUnits> {
    if !delay_ns.is_finite() || !(0.0..=MAX_FIBRE_DELAY_NS).contains(&delay_ns) {
        return Err(TellieError::configuration(format!(
            "Fibre delay must be within 0-{MAX_FIBRE_DELAY_NS} ns, got {delay_ns}"
        )));
    }
    let units = (delay_ns * FIBRE_DELAY_STEPS_PER_NS).round();
    let actual = units / FIBRE_DELAY_STEPS_PER_NS;
    Ok(DelayUnits {
        units: units as u8,
        actual,
        adjusted: actual != delay_ns,
    })
}

/// Split a 14-bit value into high and low bytes.
pub fn split_14bit(value: u16, max: u16, what: &str) -> TellieResult<(u8, u8)> {
    if value > max {
        return Err(TellieError::configuration(format!(
            "{what} must be <= {max}, got {value}"
        )));
    }
    Ok(((value >> 8) as u8, (value & 0xFF) as u8))
}
