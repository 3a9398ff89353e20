//! # halo-settings
//!
//! Configuration for the Halo relay, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HaloSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `HALO_*` overrides (highest priority)
//!
//! Loaded settings are checked with [`HaloSettings::validate`]; a failure
//! there is a startup error.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path, settings_path};
pub use types::*;
