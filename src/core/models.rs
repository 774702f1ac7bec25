// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// --- Shared Vocabulary ---

// The severity level of a finding. The variant order is the operator urgency order,
// so `Severity::Issue` compares greater than `Severity::Info`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Issue,
}

// The protocol a check speaks once the TCP connection is up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Http,
    Https,
}

impl Protocol {
    /// URL scheme for the HTTP phase, `None` for plain TCP checks.
    pub fn scheme(self) -> Option<&'static str> {
        match self {
            Protocol::Tcp => None,
            Protocol::Http => Some("http"),
            Protocol::Https => Some("https"),
        }
    }
}

// --- Check Registry ---

/// Severity and advice attached directly to a check. Fires whenever the port is open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exposure {
    pub severity: Severity,
    pub advice: String,
}

/// One configured probe against the target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckSpec {
    pub name: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<Exposure>,
}

impl CheckSpec {
    #[cfg(test)]
    pub fn new(name: &str, protocol: Protocol, port: u16) -> Self {
        Self { name: name.to_string(), protocol, port, path: None, exposure: None }
    }

    #[cfg(test)]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    /// The request path for the HTTP phase.
    pub fn http_path(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }
}

// --- Probe Results ---

// Outcome of the TCP leg of a probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TcpConnect {
    Open,
    Closed,
    Timeout,
    Error,
}

/// The HTTP leg of a probe: either a captured response or the reason there is none.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HttpOutcome {
    Response {
        status: u16,
        headers: String,
        body_snippet: String,
    },
    Failed {
        error: String,
    },
}

impl HttpOutcome {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpOutcome::Response { status, .. } => Some(*status),
            HttpOutcome::Failed { .. } => None,
        }
    }

    pub fn headers(&self) -> Option<&str> {
        match self {
            HttpOutcome::Response { headers, .. } => Some(headers),
            HttpOutcome::Failed { .. } => None,
        }
    }

    pub fn body_snippet(&self) -> Option<&str> {
        match self {
            HttpOutcome::Response { body_snippet, .. } => Some(body_snippet),
            HttpOutcome::Failed { .. } => None,
        }
    }
}

/// Everything one probe observed about one check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub protocol: Protocol,
    pub port: u16,
    pub tcp_connect: TcpConnect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpOutcome>,
    // Detail of a failed TCP leg, for operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CheckResult {
    /// A result for a TCP leg that ended with `outcome`, no HTTP phase.
    pub fn tcp_only(spec: &CheckSpec, outcome: TcpConnect, error: Option<String>, duration_ms: u64) -> Self {
        Self {
            name: spec.name.clone(),
            protocol: spec.protocol,
            port: spec.port,
            tcp_connect: outcome,
            http: None,
            error,
            duration_ms,
        }
    }
}

// --- Scan Output ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub checks: Vec<CheckResult>,
}

/// A graded observation produced by a rule matching a check result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub rule_id: String,
    pub check: String,
    pub severity: Severity,
    pub advice: String,
    pub evidence: String,
}

// The response of one scan. Findings are always present; an empty list means nothing matched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanReport {
    pub snapshot: Snapshot,
    pub findings: Vec<Finding>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Issue > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(Severity::from_str("issue").unwrap(), Severity::Issue);
        assert_eq!(Severity::Warning.to_string(), "warning");
    }

    #[test]
    fn tcp_only_result_omits_http_block() {
        let spec = CheckSpec::new("ssh", Protocol::Tcp, 22);
        let result = CheckResult::tcp_only(&spec, TcpConnect::Timeout, None, 1000);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"name": "ssh", "protocol": "tcp", "port": 22, "tcp_connect": "timeout", "duration_ms": 1000})
        );
    }

    #[test]
    fn http_outcome_serializes_either_response_or_error() {
        let ok = HttpOutcome::Response {
            status: 200,
            headers: "Server: TestAdmin/1.0".to_string(),
            body_snippet: "Login".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": 200, "headers": "Server: TestAdmin/1.0", "body_snippet": "Login"})
        );

        let failed = HttpOutcome::Failed { error: "timed out".to_string() };
        assert_eq!(serde_json::to_value(&failed).unwrap(), json!({"error": "timed out"}));
        assert_eq!(failed.status(), None);
        assert_eq!(failed.headers(), None);
    }

    #[test]
    fn check_spec_defaults_to_tcp_and_root_path() {
        let spec: CheckSpec = serde_json::from_value(json!({"name": "ssh", "port": 22})).unwrap();
        assert_eq!(spec.protocol, Protocol::Tcp);
        assert_eq!(spec.http_path(), "/");
        assert_eq!(Protocol::Https.scheme(), Some("https"));
    }
}
