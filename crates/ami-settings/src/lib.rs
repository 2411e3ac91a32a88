//! # ami-settings
//!
//! Layered configuration for the AMI bridge.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BridgeSettings::default()`]
//! 2. **Settings file**: `~/.ami-bridge/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `AMI_BRIDGE_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{AmiSettings, BridgeSettings, LoggingSettings, ReconnectSettings, ServerSettings};
