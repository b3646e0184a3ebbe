//! Remote control surface.
//!
//! The `tellie.Tellie` gRPC service forwards every call to the device worker.
//! Message types are hand-written prost structs in [`types`]; the service
//! and client stubs are generated by `build.rs`.
//!
//! Faults map onto status codes by error kind:
//!
//! | Kind | Status |
//! |---|---|
//! | Configuration | `INVALID_ARGUMENT` |
//! | State | `FAILED_PRECONDITION` |
//! | Protocol | `ABORTED` |
//! | Link | `UNAVAILABLE` |

pub mod client;
pub mod service;
pub mod types;

/// Generated service and client stubs.
#[allow(missing_docs, clippy::all)]
pub mod generated {
    include!(concat!(env!("OUT_DIR"), "/tellie.Tellie.rs"));
}

pub use client::RemoteTellie;
pub use generated::tellie_server::TellieServer;
pub use service::{to_status, TellieService};
