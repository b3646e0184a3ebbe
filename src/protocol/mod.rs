//! TELLIE serial protocol
//!
//! The control box speaks a half-duplex byte protocol: single-character
//! opcodes followed by raw parameter bytes, confirmed by a fixed echo.
//!
//! - [`opcodes`]: opcode tables per firmware dialect
//! - [`parameters`]: limits and unit conversions
//! - [`channel`]: validated channel numbers and box addressing
//! - [`codec`]: parameters to [`codec::CommandDescriptor`]s
//! - [`session`]: echo-verified exchange with resynchronization
//! - [`readout`]: PIN and temperature text parsing

pub mod channel;
pub mod codec;
pub mod opcodes;
pub mod parameters;
pub mod readout;
pub mod session;

pub use channel::Channel;
pub use codec::{Codec, CommandDescriptor};
pub use opcodes::ChipVariant;
pub use readout::PinReading;
pub use session::{SessionOptions, TransportSession};
