//! Validated LED channel numbers.

use crate::error::{TellieError, TellieResult};
use std::fmt;

/// Number of LED channels across all boxes.
pub const CHANNEL_COUNT: usize = 96;
/// Channels per box.
pub const CHANNELS_PER_BOX: u8 = 8;
/// Highest channel driven through the lower register bank (boxes 1-7).
pub const LAST_LOWER_CHANNEL: u8 = 56;

/// An LED channel, 1 to 96.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(u8);

impl Channel {
    pub fn new(number: u32) -> TellieResult<Self> {
        if number == 0 || number > CHANNEL_COUNT as u32 {
            return Err(TellieError::configuration(format!(
                "Channel must be within 1-{CHANNEL_COUNT}, got {number}"
            )));
        }
        Ok(Self(number as u8))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Box housing this channel, counted from 1.
    pub fn box_number(self) -> u8 {
        (self.0 - 1) / CHANNELS_PER_BOX + 1
    }

    /// Whether the channel is addressed through the upper register bank.
    pub fn is_upper(self) -> bool {
        self.0 > LAST_LOWER_CHANNEL
    }

    pub(crate) fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for Channel {
    type Error = TellieError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_numbers() {
        assert_eq!(Channel::new(1).unwrap().box_number(), 1);
        assert_eq!(Channel::new(8).unwrap().box_number(), 1);
        assert_eq!(Channel::new(9).unwrap().box_number(), 2);
        assert_eq!(Channel::new(57).unwrap().box_number(), 8);
        assert_eq!(Channel::new(96).unwrap().box_number(), 12);
    }

    #[test]
    fn test_register_bank() {
        assert!(!Channel::new(56).unwrap().is_upper());
        assert!(Channel::new(57).unwrap().is_upper());
    }

    #[test]
    fn test_out_of_range() {
        assert!(Channel::new(0).is_err());
        assert!(Channel::new(97).is_err());
    }
}
