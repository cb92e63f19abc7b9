//! # taskhub-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`Settings::default()`]
//! 2. **Settings file**: the JSON file named by `TASKHUB_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables**: `PORT`, `HOST`, `ALLOWED_ORIGINS`, `JWT_SECRET`
//!    and `TASKHUB_*` overrides (highest priority)
//!
//! The merged result is validated before it is handed out: a missing
//! `JWT_SECRET` is fatal.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from,
    settings_path,
};
pub use types::*;
