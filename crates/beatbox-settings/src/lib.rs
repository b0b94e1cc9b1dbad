//! # beatbox-settings
//!
//! Layered configuration for the beatbox server.
//!
//! Precedence, lowest to highest:
//! 1. Compiled defaults ([`BeatboxSettings::default()`])
//! 2. `~/.beatbox/settings.json`, deep-merged over the defaults
//! 3. `BEATBOX_*` environment variables
//!
//! Command-line flags are applied by the binary on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{BeatboxSettings, EndpointSettings, LoggingSettings, ServerSettings};
