// src/core/service.rs

// The scan service: resolve the target, probe it, grade the evidence.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{AppConfig, ScanSettings};
use crate::core::error::{ConfigError, ScanError};
use crate::core::models::{CheckSpec, ScanReport, Severity};
use crate::core::rules::RuleSet;
use crate::core::scanner::{run_scan, NetworkProbe, Probe};
use crate::core::target::{resolve_target, Target, TargetStrategy};

/// Façade over the orchestrator and the rule engine. Holds only read-only configuration, so one
/// instance serves any number of concurrent scans.
pub struct ScanService<P: Probe = NetworkProbe> {
    probe: Arc<P>,
    target: TargetStrategy,
    checks: Vec<CheckSpec>,
    rules: RuleSet,
    settings: ScanSettings,
}

impl ScanService<NetworkProbe> {
    /// Builds the service with the real network probe.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let probe = NetworkProbe::new(&config.scan)?;
        Ok(Self::new(Arc::new(probe), config, config.rule_set()?))
    }
}

impl<P: Probe + 'static> ScanService<P> {
    pub fn new(probe: Arc<P>, config: &AppConfig, rules: RuleSet) -> Self {
        Self {
            probe,
            target: config.target.clone(),
            checks: config.checks.clone(),
            rules,
            settings: config.scan.clone(),
        }
    }

    pub fn checks(&self) -> &[CheckSpec] {
        &self.checks
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Runs one complete scan.
    ///
    /// Fails only on configuration-level preconditions: an empty registry or a target that
    /// cannot be resolved. Transport failures are part of the returned snapshot. Target
    /// resolution counts against the total budget.
    pub async fn scan(&self) -> Result<ScanReport, ScanError> {
        if self.checks.is_empty() {
            warn!("Scan requested with an empty check registry.");
            return Err(ScanError::EmptyRegistry);
        }

        let started = Instant::now();
        let target = resolve_target(&self.target, self.settings.gateway_lookup_timeout()).await?;
        Ok(self.scan_target(&target, started).await)
    }

    async fn scan_target(&self, target: &Target, started: Instant) -> ScanReport {
        let budget = self.settings.total_budget().saturating_sub(started.elapsed());
        let snapshot = run_scan(
            Arc::clone(&self.probe),
            target,
            &self.checks,
            self.settings.per_check_timeout(),
            budget,
        )
        .await;

        let findings = self.rules.evaluate(&snapshot);
        let count = |severity: Severity| findings.iter().filter(|f| f.severity == severity).count();
        info!(
            target = %snapshot.target,
            issues = count(Severity::Issue),
            warnings = count(Severity::Warning),
            infos = count(Severity::Info),
            "Scan report ready."
        );

        ScanReport { snapshot, findings }
    }
}
