// src/core/target.rs

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::core::error::ScanError;

// Flag bit in /proc/net/route marking a route that goes through a gateway.
const RTF_GATEWAY: u32 = 0x2;

static RE_IP_ROUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"default\s+via\s+(\d+\.\d+\.\d+\.\d+)").unwrap());
static RE_ROUTE_GET: Lazy<Regex> = Lazy::new(|| Regex::new(r"gateway:\s+(\d+\.\d+\.\d+\.\d+)").unwrap());
static RE_ROUTE_PRINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*0\.0\.0\.0\s+0\.0\.0\.0\s+(\d+\.\d+\.\d+\.\d+)\s").unwrap());

/// The host under scan. Either a literal address or a name resolved at probe time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Ip(IpAddr),
    Host(String),
}

impl Target {
    /// Parses an operator-supplied host. Accepts bare or bracketed IPv6 literals.
    pub fn parse(raw: &str) -> Result<Self, ScanError> {
        let trimmed = raw.trim();
        let unbracketed = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(trimmed);

        if let Ok(ip) = unbracketed.parse::<IpAddr>() {
            return Ok(Target::Ip(ip));
        }

        let valid_host = !trimmed.is_empty()
            && trimmed.len() <= 253
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_');
        if valid_host {
            Ok(Target::Host(trimmed.to_ascii_lowercase()))
        } else {
            Err(ScanError::TargetUnresolved(format!("'{}' is not an IP address or hostname", raw)))
        }
    }

    /// Host component for a URL, with IPv6 literals bracketed.
    pub fn url_host(&self) -> String {
        match self {
            Target::Ip(IpAddr::V6(v6)) => format!("[{}]", v6),
            Target::Ip(IpAddr::V4(v4)) => v4.to_string(),
            Target::Host(name) => name.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Ip(ip) => write!(f, "{}", ip),
            Target::Host(name) => write!(f, "{}", name),
        }
    }
}

/// How the scan service picks its target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TargetStrategy {
    /// The default IPv4 gateway of this machine.
    #[default]
    Gateway,
    /// A fixed host.
    Host { host: String },
}

/// Resolves the strategy into a concrete target, bounded by `lookup_timeout`.
pub async fn resolve_target(strategy: &TargetStrategy, lookup_timeout: Duration) -> Result<Target, ScanError> {
    match strategy {
        TargetStrategy::Host { host } => Target::parse(host),
        TargetStrategy::Gateway => {
            match tokio::time::timeout(lookup_timeout, discover_default_gateway()).await {
                Ok(Some(gateway)) => {
                    info!(gateway = %gateway, "Default gateway discovered.");
                    Ok(Target::Ip(IpAddr::V4(gateway)))
                }
                Ok(None) => {
                    warn!(os = std::env::consts::OS, "No default gateway found.");
                    Err(ScanError::TargetUnresolved(format!(
                        "could not determine the default gateway on {}",
                        std::env::consts::OS
                    )))
                }
                Err(_) => {
                    warn!(timeout_ms = lookup_timeout.as_millis() as u64, "Gateway lookup timed out.");
                    Err(ScanError::TargetUnresolved("default gateway lookup timed out".to_string()))
                }
            }
        }
    }
}

async fn discover_default_gateway() -> Option<Ipv4Addr> {
    if cfg!(target_os = "linux") {
        if let Ok(table) = tokio::fs::read_to_string("/proc/net/route").await {
            if let Some(gateway) = parse_proc_net_route(&table) {
                return Some(gateway);
            }
        }
        debug!("Falling back to `ip route` for gateway discovery.");
        return command_output("ip", &["route", "show", "default"])
            .await
            .and_then(|out| capture_ipv4(&RE_IP_ROUTE, &out));
    }
    if cfg!(target_os = "macos") {
        return command_output("route", &["-n", "get", "default"])
            .await
            .and_then(|out| capture_ipv4(&RE_ROUTE_GET, &out));
    }
    if cfg!(target_os = "windows") {
        return command_output("route", &["print", "-4"])
            .await
            .and_then(|out| capture_ipv4(&RE_ROUTE_PRINT, &out));
    }
    None
}

async fn command_output(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).kill_on_drop(true).output().await {
        Ok(output) if output.status.success() => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
        Ok(output) => {
            debug!(program, status = %output.status, "Route command exited unsuccessfully.");
            None
        }
        Err(e) => {
            debug!(program, error = %e, "Route command could not be started.");
            None
        }
    }
}

fn capture_ipv4(re: &Regex, text: &str) -> Option<Ipv4Addr> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Finds the default route's gateway in the kernel routing table.
/// Addresses in the table are the raw network-order words printed as native integers.
fn parse_proc_net_route(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[1] != "00000000" {
            return None;
        }
        let flags = u32::from_str_radix(fields[3], 16).ok()?;
        if flags & RTF_GATEWAY == 0 {
            return None;
        }
        let gateway = u32::from_str_radix(fields[2], 16).ok()?;
        (gateway != 0).then(|| Ipv4Addr::from(gateway.to_ne_bytes()))
    })
}
