//! Driver and remote control server for the TELLIE LED pulser control box.
//!
//! The crate is layered from the wire up:
//!
//! - [`adapters`]: byte-stream links (serial port, simulated box).
//! - [`protocol`]: command encoding, echo-verified exchange and readout
//!   parsing.
//! - [`device`]: selection, settings cache and the firing/readout state
//!   machine.
//! - [`app_actor`] / [`messages`]: the worker task that owns the device and
//!   serializes every call to it.
//! - [`rpc`]: the gRPC service and client.
//! - [`orchestrator`]: cancellable load-fire-read runs.
//!
//! Used by the `tellie_server` and `tellie_fire` binaries.

pub mod adapters;
pub mod app_actor;
pub mod config;
pub mod device;
pub mod error;
pub mod error_recovery;
pub mod hardware;
pub mod messages;
pub mod orchestrator;
pub mod protocol;
pub mod rpc;

pub use app_actor::DeviceHandle;
pub use config::TellieConfig;
pub use device::DeviceSession;
pub use error::{ErrorKind, TellieError, TellieResult};
