//! # quorra-settings
//!
//! Configuration management with layered sources for Quorra.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`QuorraSettings::default()`]
//! 2. **User file**: `~/.quorra/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `QUORRA_*` overrides (highest priority)
//!
//! A process resolves its settings once at startup and passes them down by
//! reference; nothing here is global.
//!
//! # Usage
//!
//! ```no_run
//! use quorra_settings::resolve_settings;
//!
//! let (settings, error) = resolve_settings(None);
//! if let Some(e) = error {
//!     eprintln!("using defaults: {e}");
//! }
//! println!("launch timeout: {}ms", settings.orchestrator.launch_timeout_ms);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, resolve_settings,
    settings_path,
};
pub use types::*;
