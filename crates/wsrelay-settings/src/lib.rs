//! # wsrelay-settings
//!
//! Configuration for the relay, loaded from three layers (in priority order):
//! 1. **Compiled defaults** - [`RelaySettings::default()`]
//! 2. **Settings file** - `~/.wsrelay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** - `PORT` and `WSRELAY_*` overrides
//!
//! Settings are read once at startup and shared read-only afterwards.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = RelaySettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server.port, 3001);
        assert_eq!(settings.upstream.target_url, "wss://wlserver.whiteless.hu");
        assert_eq!(settings.upstream.auth.mode, AuthMode::Bearer);
        assert_eq!(settings.upstream.auth.token_param, "token");
        assert!(settings.validate().is_ok());
    }
}
