//! core::config::keys
//!
//! Well-known configuration keys.
//!
//! A [`Key`] is the internal lookup name used with the
//! [`ConfigStore`](super::ConfigStore). Deployers never type keys directly;
//! they set environment variables or flags that are bound to a key (see
//! [`EnvVar`](super::EnvVar)).

use std::fmt;

/// Internal configuration lookup name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(&'static str);

impl Key {
    /// Create a key from a static name.
    pub const fn new(name: &'static str) -> Self {
        Key(name)
    }

    /// The key as a string slice.
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        self.0
    }
}

/// Deployment environment name; selects which embedded defaults load.
pub const APP_ENV: Key = Key::new("APP_ENV");

/// Log encoding: `json` or `console`.
pub const LOG_FORMAT: Key = Key::new("LOG_FORMAT");

/// Minimum log level: `debug`, `info`, `warn` or `error`.
pub const LOG_LEVEL: Key = Key::new("LOG_LEVEL");

/// Development mode flag; set by the embedded dev defaults.
pub const DEV_MODE: Key = Key::new("DEV_MODE");

/// After the initial burst, write every Nth entry of a repeated message.
pub const LOG_SAMPLE_EVERY: Key = Key::new("LOG_SAMPLE_EVERY");

/// Reserved for per-request sampling of the initial burst.
pub const LOG_SAMPLE_INITIAL: Key = Key::new("LOG_SAMPLE_INITIAL");

/// Entries of a message written before sampling starts; 0 disables sampling.
pub const LOG_SAMPLING_RATE: Key = Key::new("LOG_SAMPLING_RATE");

/// Socket address the `serve` command's listener binds.
pub const LISTEN_ADDRESS: Key = Key::new("LISTEN_ADDRESS");
