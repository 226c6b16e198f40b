//! Traversal engine configuration.
//!
//! Loaded via the `config` crate from `SKEIN__`-prefixed environment
//! variables or from a file. Every field has a default, so an empty source
//! yields [`EngineConfig::default`].

use crate::execution::SkipPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for [`Execution`](crate::traversal::Execution).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How a skipped upstream affects its downstream nodes.
    #[serde(default)]
    pub skip_policy: SkipPolicy,

    /// Parallelism for array nodes that do not set their own.
    /// Zero means unbounded.
    #[serde(default)]
    pub default_parallelism: u32,

    /// Largest fan-out an array node may expand to.
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,

    /// Whether accepted transitions are kept for replay and publishing.
    #[serde(default = "default_record_history")]
    pub record_history: bool,
}

fn default_max_fanout() -> usize {
    10_000
}

fn default_record_history() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            skip_policy: SkipPolicy::default(),
            default_parallelism: 0,
            max_fanout: default_max_fanout(),
            record_history: default_record_history(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `SKEIN__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::with_prefix("SKEIN"))
    }

    /// Loads configuration from a file; the format follows the extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
