// src/core/scanner/mod.rs

// The scan orchestrator and the probe it drives.
pub mod http_probe;
pub mod probe;
pub mod tcp_probe;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{error, info, warn};

use crate::core::models::{CheckResult, CheckSpec, Snapshot, TcpConnect};
use crate::core::target::Target;

pub use self::probe::{NetworkProbe, Probe};

/// Extra time a probe gets past its own timeout before the orchestrator stops waiting for it.
/// Lets a probe that is finishing its HTTP phase report that outcome itself.
const PROBE_GRACE: Duration = Duration::from_millis(50);

/// Runs every check of `registry` concurrently against `target` and assembles the snapshot.
///
/// Each probe is bounded by `per_check_timeout`; the whole scan by `total_budget`. Probes that
/// are still running when the budget runs out are cancelled and reported as `timeout`, so the
/// snapshot always holds exactly one result per check, in registry order.
pub async fn run_scan<P: Probe + 'static>(
    probe: Arc<P>,
    target: &Target,
    registry: &[CheckSpec],
    per_check_timeout: Duration,
    total_budget: Duration,
) -> Snapshot {
    let started_at = Utc::now();
    let started = Instant::now();
    let budget_deadline = started + total_budget;
    info!(target = %target, checks = registry.len(), budget_ms = total_budget.as_millis() as u64, "Starting scan.");

    let mut tasks = JoinSet::new();
    let mut task_slots = HashMap::with_capacity(registry.len());
    for (index, spec) in registry.iter().enumerate() {
        let probe = Arc::clone(&probe);
        let target = target.clone();
        let spec = spec.clone();
        let handle = tasks.spawn(async move {
            let result = match timeout(per_check_timeout + PROBE_GRACE, probe.run(&target, &spec, per_check_timeout)).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    warn!(check = %spec.name, "Probe overran its timeout.");
                    CheckResult::tcp_only(
                        &spec,
                        TcpConnect::Timeout,
                        Some("probe exceeded its timeout".to_string()),
                        per_check_timeout.as_millis() as u64,
                    )
                }
            };
            (index, result)
        });
        task_slots.insert(handle.id(), index);
    }

    // One slot per check; completion order does not matter.
    let mut slots: Vec<Option<CheckResult>> = vec![None; registry.len()];
    loop {
        match timeout_at(budget_deadline, tasks.join_next()).await {
            Ok(Some(Ok((index, result)))) => slots[index] = Some(result),
            Ok(Some(Err(join_error))) => {
                if let Some(&index) = task_slots.get(&join_error.id()) {
                    error!(check = %registry[index].name, error = %join_error, "Probe task failed.");
                    slots[index] = Some(CheckResult::tcp_only(
                        &registry[index],
                        TcpConnect::Error,
                        Some(format!("probe failed: {}", join_error)),
                        started.elapsed().as_millis() as u64,
                    ));
                }
            }
            Ok(None) => break,
            Err(_elapsed) => {
                warn!(outstanding = tasks.len(), "Scan budget exhausted, cancelling outstanding probes.");
                tasks.abort_all();
                break;
            }
        }
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let checks: Vec<CheckResult> = slots
        .into_iter()
        .zip(registry)
        .map(|(slot, spec)| {
            slot.unwrap_or_else(|| {
                CheckResult::tcp_only(
                    spec,
                    TcpConnect::Timeout,
                    Some("scan budget exhausted".to_string()),
                    elapsed_ms,
                )
            })
        })
        .collect();

    let duration_ms = started.elapsed().as_millis() as u64;
    info!(target = %target, duration_ms, "Scan finished.");
    Snapshot {
        target: target.to_string(),
        started_at,
        duration_ms,
        checks,
    }
}
