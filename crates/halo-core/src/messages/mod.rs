//! Wire messages exchanged with glasses and TPAs.
//!
//! Every direction has its own closed `type`-tagged enum, so handlers
//! dispatch with an exhaustive `match` and a new message kind is a
//! compile-checked addition. Field names are camelCase on the wire.

pub mod dashboard;
pub mod glasses;
pub mod layout;
pub mod stream;
pub mod tpa;

pub use dashboard::{DashboardMode, SystemSection};
pub use glasses::{CloudToGlasses, GlassesToCloud};
pub use layout::{DisplayView, Layout};
pub use stream::{StreamEvent, StreamType};
pub use tpa::{CloudToTpa, StopReason, TpaToCloud};
