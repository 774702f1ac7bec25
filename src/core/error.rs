// src/core/error.rs

// Error types for configuration loading and scan preconditions.

// Transport failures never show up here: they are recorded inside the
// `CheckResult` they belong to.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating the configuration document.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML for the expected schema.
    #[error("Invalid config in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    /// A rule pattern failed to compile.
    #[error("Rule '{rule_id}' has an invalid pattern: {source}")]
    InvalidPattern {
        rule_id: String,
        #[source]
        source: regex::Error,
    },

    /// The HTTP client used by the probes could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The document parsed but violates a constraint.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Fatal preconditions of a scan. Everything else is recovered into the snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// There is nothing to probe.
    #[error("Check registry is empty; configure at least one check")]
    EmptyRegistry,

    /// The target host could not be determined.
    #[error("Target unresolved: {0}")]
    TargetUnresolved(String),
}
