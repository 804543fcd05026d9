//! # roomrelay-settings
//!
//! Layered configuration for the room relay.
//!
//! Settings are resolved in priority order:
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.roomrelay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ROOMRELAY_*` overrides
//!
//! Command-line flags are layered on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, validate};
pub use types::*;
