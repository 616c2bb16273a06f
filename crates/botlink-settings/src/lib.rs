//! # botlink-settings
//!
//! Client settings loaded from three layers, lowest priority first:
//! 1. **Compiled defaults**: [`ClientSettings::default()`]
//! 2. **User file**: `~/.botlink/settings.json`, deep-merged over defaults
//! 3. **Environment**: `BOTLINK_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, load_with_env, settings_path};
pub use types::{AuthSettings, ClientSettings, LoggingSettings, MediaSettings, TransportSettings};
