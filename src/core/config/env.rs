//! core::config::env
//!
//! Environment variable descriptors.
//!
//! An [`EnvVar`] ties an externally visible variable name to an internal
//! configuration [`Key`]. Commands and components declare the variables they
//! read; the CLI binds them to the store before a command runs and lists
//! them in help output.
//!
//! Identity for deduplication is the external [`EnvVar::name`].

use super::keys::{self, Key};

/// Declared environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvVar {
    /// Configuration key the variable populates.
    pub key: Key,
    /// Variable name a deployer sets.
    pub name: &'static str,
    /// Human description shown in help.
    pub description: &'static str,
}

impl EnvVar {
    /// Create a descriptor.
    pub const fn new(key: Key, name: &'static str, description: &'static str) -> Self {
        Self {
            key,
            name,
            description,
        }
    }
}

pub const LOG_FORMAT: EnvVar = EnvVar::new(keys::LOG_FORMAT, "LOG_FORMAT", "Log format");

pub const LOG_LEVEL: EnvVar = EnvVar::new(keys::LOG_LEVEL, "LOG_LEVEL", "Log level");

pub const LOG_SAMPLING_RATE: EnvVar = EnvVar::new(
    keys::LOG_SAMPLING_RATE,
    "LOG_SAMPLING_RATE",
    "Sampling rate for logging",
);

pub const DEV_MODE: EnvVar = EnvVar::new(keys::DEV_MODE, "DEV_MODE", "Development mode boolean");

pub const LOG_SAMPLE_EVERY: EnvVar = EnvVar::new(
    keys::LOG_SAMPLE_EVERY,
    "LOG_SAMPLE_EVERY",
    "Log sampling every request",
);

pub const LOG_SAMPLE_INITIAL: EnvVar = EnvVar::new(
    keys::LOG_SAMPLE_INITIAL,
    "LOG_SAMPLE_INITIAL",
    "Log sampling initial request",
);

pub const LISTEN_ADDRESS: EnvVar = EnvVar::new(
    keys::LISTEN_ADDRESS,
    "LISTEN_ADDRESS",
    "The address the service listener binds, host:port",
);
