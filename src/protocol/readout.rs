//! Parsing of PIN diode and temperature readouts.
//!
//! The firmware prints readouts as loose ASCII. PIN readouts carry either a
//! bare mean, or a mean followed by the RMS printed as `int.frac` (which the
//! digit scan sees as two more tokens). Any opcode echo mixed into the buffer
//! is ignored by the digit scan.

use crate::error::{TellieError, TellieResult};
use regex::Regex;
use std::sync::OnceLock;

/// PIN diode reading for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinReading {
    pub channel: u8,
    pub mean: u32,
    pub rms: f64,
}

#[allow(clippy::expect_used)]
fn pin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("static regex"))
}

#[allow(clippy::expect_used)]
fn temp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[-+]?\d*\.\d+|\d+").expect("static regex"))
}

/// Parse a PIN readout.
///
/// `Ok(None)` means nothing has arrived yet. One token is a mean with zero
/// RMS, three tokens are mean, RMS integer part and RMS fraction. Any other
/// count is a malformed readout.
pub fn parse_pin(raw: &[u8]) -> TellieResult<Option<(u32, f64)>> {
    let text = String::from_utf8_lossy(raw);
    let tokens: Vec<&str> = pin_pattern().find_iter(&text).map(|m| m.as_str()).collect();
    match tokens.as_slice() {
        [] => Ok(None),
        [mean] => Ok(Some((parse_mean(mean)?, 0.0))),
        [mean, int, frac] => {
            let rms = format!("{int}.{frac}")
                .parse::<f64>()
                .map_err(|e| TellieError::BadReadout(format!("PIN rms {int}.{frac}: {e}")))?;
            Ok(Some((parse_mean(mean)?, rms)))
        }
        other => Err(TellieError::BadReadout(format!(
            "Bad number of PIN readouts: {} {:?}",
            other.len(),
            other
        ))),
    }
}

fn parse_mean(token: &str) -> TellieResult<u32> {
    token
        .parse()
        .map_err(|e| TellieError::BadReadout(format!("PIN mean {token}: {e}")))
}

/// Parse a temperature readout. `Ok(None)` means nothing has arrived yet.
pub fn parse_temperature(raw: &[u8]) -> TellieResult<Option<f64>> {
    let text = String::from_utf8_lossy(raw);
    let tokens: Vec<&str> = temp_pattern().find_iter(&text).map(|m| m.as_str()).collect();
    match tokens.as_slice() {
        [] => Ok(None),
        [value] => value
            .parse()
            .map(Some)
            .map_err(|e| TellieError::BadReadout(format!("Temperature {value}: {e}"))),
        other => Err(TellieError::BadReadout(format!(
            "Bad number of temperature readouts: {} {:?}",
            other.len(),
            other
        ))),
    }
}
