//! # halo-core
//!
//! Shared vocabulary for the Halo relay crates.
//!
//! - **Branded IDs**: `ConnectionId`, `SessionId`, `UserId` as newtypes for type safety
//! - **Wire messages**: closed `type`-tagged enums per direction (glasses, TPA)
//! - **Layouts**: abstract display descriptions handed to a display sink
//! - **Errors**: `RelayError` via `thiserror`
//! - **Backoff**: reconnect policy and exponential delay math
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;

pub use errors::RelayError;
pub use ids::{ConnectionId, SessionId, UserId};
