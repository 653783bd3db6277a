//! # courier-settings
//!
//! Layered configuration for the courier hub and its reconnecting client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`CourierSettings::default()`]
//! 2. **Settings file**: `./courier.json` or `$COURIER_CONFIG` (deep-merged)
//! 3. **Environment variables**: `COURIER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, validate};
pub use types::*;
