//! Error types for conductor-core.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration and registration failures. Any of these is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.conductor/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// A target key that is not of the form `platform/data_type`.
    #[error("invalid target key '{value}'; expected platform/data_type")]
    InvalidTargetKey { value: String },

    /// A target definition with an unusable attribute.
    #[error("invalid target {key}: {reason}")]
    InvalidTarget { key: String, reason: String },

    /// A scheduler or conflict setting outside its allowed range.
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("duplicate target {key}")]
    DuplicateTarget { key: String },

    #[error("target {target} depends on unknown target {dependency}")]
    UnknownDependency { target: String, dependency: String },

    /// The prerequisite graph is not acyclic; `cycle` reads `a -> b -> a`.
    #[error("dependency cycle: {cycle}")]
    DependencyCycle { cycle: String },
}
