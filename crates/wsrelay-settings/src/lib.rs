//! # wsrelay-settings
//!
//! Configuration management with layered sources for the relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`RelaySettings::default()`])
//! 2. **Settings file** (`--config`, `WSRELAY_CONFIG` or `./wsrelay.json`, deep-merged over defaults)
//! 3. **Environment variables** (`PORT`, `HOST`, `RENDER*` and `WSRELAY_*`, highest priority)
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    load_settings_with, settings_path,
};
pub use types::{LoggingSettings, PlatformSettings, RelaySettings, ServerSettings};
