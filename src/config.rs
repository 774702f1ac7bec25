// src/config.rs

// One TOML document describes the target strategy, the time budgets, the check registry and the
// rule table. It is read once at startup and never mutated afterwards.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::error::ConfigError;
use crate::core::models::CheckSpec;
use crate::core::rules::{RuleDefinition, RuleSet};
use crate::core::target::{Target, TargetStrategy};
use crate::logging::project_directory;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "GATEKEEPER_CONFIG";
/// Environment variable forcing an explicit target host.
pub const TARGET_ENV: &str = "GATEKEEPER_TARGET";

const CONFIG_FILE: &str = "gatekeeper.toml";

/// The configuration shipped with the binary.
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Time budgets and probe behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanSettings {
    pub per_check_timeout_ms: u64,
    pub total_budget_ms: u64,
    pub body_snippet_chars: usize,
    pub max_redirects: usize,
    pub user_agent: String,
    pub gateway_lookup_timeout_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            per_check_timeout_ms: 1500,
            total_budget_ms: 5000,
            body_snippet_chars: 512,
            max_redirects: 5,
            user_agent: concat!("GateKeeper/", env!("CARGO_PKG_VERSION")).to_string(),
            gateway_lookup_timeout_ms: 2000,
        }
    }
}

impl ScanSettings {
    pub fn per_check_timeout(&self) -> Duration {
        Duration::from_millis(self.per_check_timeout_ms)
    }

    pub fn total_budget(&self) -> Duration {
        Duration::from_millis(self.total_budget_ms)
    }

    pub fn gateway_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_lookup_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            allowed_origins: vec!["http://localhost:5173".to_string(), "http://127.0.0.1:5173".to_string()],
        }
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub target: TargetStrategy,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl AppConfig {
    /// Loads the configuration: `GATEKEEPER_CONFIG`, then the user config directory, then the
    /// built-in default. `GATEKEEPER_TARGET` overrides the target strategy.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path() {
            Some(path) => Self::from_path(&path)?,
            None => {
                info!("No config file found, using the built-in default.");
                Self::from_toml_str(DEFAULT_CONFIG, "built-in default")?
            }
        };

        if let Ok(host) = std::env::var(TARGET_ENV) {
            config.override_target(&host)?;
        }
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "Loading config file.");
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents, &path.display().to_string())
    }

    pub fn from_toml_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        config.validate()?;
        debug!(origin, checks = config.checks.len(), rules = config.rules.len(), "Config parsed.");
        Ok(config)
    }

    /// Replaces the target strategy with a fixed host.
    pub fn override_target(&mut self, host: &str) -> Result<(), ConfigError> {
        Target::parse(host).map_err(|e| ConfigError::Invalid(format!("{}: {}", TARGET_ENV, e)))?;
        info!(host, "Target overridden from environment.");
        self.target = TargetStrategy::Host { host: host.trim().to_string() };
        Ok(())
    }

    /// Compiles the rule table, exposure rules included.
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        RuleSet::compile(&self.rules, &self.checks)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.per_check_timeout_ms == 0 || self.scan.total_budget_ms == 0 {
            return Err(ConfigError::Invalid("scan timeouts must be greater than zero".to_string()));
        }
        if self.scan.body_snippet_chars == 0 {
            return Err(ConfigError::Invalid("body_snippet_chars must be greater than zero".to_string()));
        }
        if let TargetStrategy::Host { host } = &self.target {
            Target::parse(host).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }

        let mut names = HashSet::new();
        for check in &self.checks {
            if check.name.trim().is_empty() {
                return Err(ConfigError::Invalid("check names must not be empty".to_string()));
            }
            if !names.insert(check.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate check name '{}'", check.name)));
            }
            if check.port == 0 {
                return Err(ConfigError::Invalid(format!("check '{}' has port 0", check.name)));
            }
            if let Some(path) = &check.path {
                if !path.starts_with('/') || path.starts_with("//") {
                    return Err(ConfigError::Invalid(format!(
                        "check '{}' path '{}' must start with a single '/'",
                        check.name, path
                    )));
                }
            }
        }

        self.rule_set().map(|_| ())
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    project_directory()
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
        .filter(|path| path.is_file())
}
