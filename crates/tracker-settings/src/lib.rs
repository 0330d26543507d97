//! # tracker-settings
//!
//! Layered configuration for the saint-tracker server.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults**: [`TrackerSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `SERVER_*`, `HUB_*`, `AUTH_*`, `DB_*`,
//!    `LOGGER_*` overrides (highest priority)
//!
//! The resolved value is built once at startup and handed to whoever needs
//! it; there is no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
