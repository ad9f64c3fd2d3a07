//! # pushwire-settings
//!
//! Layered settings for the push gateway client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PushwireSettings::default()`]
//! 2. **User file**: `~/.pushwire/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PUSHWIRE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
