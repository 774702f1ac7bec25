// src/core/rules.rs

// The rule engine.

// Rules are plain data: a subject to look at, a pattern to search for in it, an optional scope,
// and the severity and advice to report when the pattern matches. One evaluator runs every rule
// against every check result, so new exposures are added to the rule table, never to this code.

use std::borrow::Cow;
use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tracing::{debug, info};

use crate::core::error::ConfigError;
use crate::core::models::{CheckResult, CheckSpec, Exposure, Finding, Protocol, Severity, Snapshot};

/// Evidence excerpts are cut to this many characters.
pub const MAX_EVIDENCE_CHARS: usize = 160;

/// Evidence reported when a pattern matched an empty string.
pub const NO_EVIDENCE: &str = "(no evidence)";

static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

/// The part of a check result a rule inspects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleTarget {
    /// The TCP outcome word (`open`, `closed`, `timeout`, `error`).
    TcpConnect,
    /// The HTTP status code, in decimal.
    Status,
    /// The normalized response header block.
    Headers,
    /// The response body snippet.
    Body,
    /// The text of the HTML `<title>` element in the body snippet.
    Title,
}

/// A rule as written in the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub target: RuleTarget,
    pub pattern: String,
    pub severity: Severity,
    pub advice: String,
    /// Restrict the rule to these check names. Empty means every check.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<Protocol>,
}

/// Builds the rule a check's `exposure` block stands for: the port being open is the finding.
pub fn exposure_rule(spec: &CheckSpec, exposure: &Exposure) -> RuleDefinition {
    RuleDefinition {
        id: format!("exposure.{}", spec.name),
        description: format!("{} port {} accepts connections", spec.name, spec.port),
        target: RuleTarget::TcpConnect,
        pattern: "^open$".to_string(),
        severity: exposure.severity,
        advice: exposure.advice.clone(),
        checks: vec![spec.name.clone()],
        ports: Vec::new(),
        protocols: Vec::new(),
    }
}

/// A rule with its pattern compiled.
#[derive(Debug, Clone)]
pub struct Rule {
    definition: RuleDefinition,
    pattern: Regex,
}

impl Rule {
    pub fn compile(definition: RuleDefinition) -> Result<Self, ConfigError> {
        let pattern = Regex::new(&definition.pattern).map_err(|source| ConfigError::InvalidPattern {
            rule_id: definition.id.clone(),
            source,
        })?;
        Ok(Self { definition, pattern })
    }

    fn in_scope(&self, result: &CheckResult) -> bool {
        let def = &self.definition;
        (def.checks.is_empty() || def.checks.iter().any(|name| name == &result.name))
            && (def.ports.is_empty() || def.ports.contains(&result.port))
            && (def.protocols.is_empty() || def.protocols.contains(&result.protocol))
    }

    /// The text this rule searches. `None` when the result does not carry that field,
    /// which the evaluator treats as "no match".
    fn subject<'a>(&self, result: &'a CheckResult) -> Option<Cow<'a, str>> {
        match self.definition.target {
            RuleTarget::TcpConnect => Some(Cow::Borrowed(result.tcp_connect.as_ref())),
            RuleTarget::Status => result.http.as_ref()?.status().map(|s| Cow::Owned(s.to_string())),
            RuleTarget::Headers => result.http.as_ref()?.headers().map(Cow::Borrowed),
            RuleTarget::Body => result.http.as_ref()?.body_snippet().map(Cow::Borrowed),
            RuleTarget::Title => result
                .http
                .as_ref()?
                .body_snippet()
                .and_then(extract_title)
                .map(Cow::Owned),
        }
    }

    /// Runs the rule against one result. At most one finding per rule and result.
    pub fn evaluate(&self, result: &CheckResult) -> Option<Finding> {
        if !self.in_scope(result) {
            return None;
        }
        let subject = self.subject(result)?;
        let matched = self.pattern.find(&subject)?;
        let evidence = excerpt(matched.as_str());

        debug!(rule = %self.definition.id, check = %result.name, evidence = %evidence, "Rule matched.");
        Some(Finding {
            rule_id: self.definition.id.clone(),
            check: result.name.clone(),
            severity: self.definition.severity,
            advice: render_advice(&self.definition.advice, result, &evidence),
            evidence,
        })
    }
}

/// The process-wide, read-only rule table.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compiles the declared rules followed by the exposure rules of `checks`, in check order.
    pub fn compile(definitions: &[RuleDefinition], checks: &[CheckSpec]) -> Result<Self, ConfigError> {
        let exposures = checks
            .iter()
            .filter_map(|spec| spec.exposure.as_ref().map(|exposure| exposure_rule(spec, exposure)));

        let mut seen = HashSet::new();
        let mut rules = Vec::new();
        for definition in definitions.iter().cloned().chain(exposures) {
            if definition.id.trim().is_empty() {
                return Err(ConfigError::Invalid("rule ids must not be empty".to_string()));
            }
            if !seen.insert(definition.id.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate rule id '{}'", definition.id)));
            }
            if definition.advice.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("rule '{}' has no advice", definition.id)));
            }
            rules.push(Rule::compile(definition)?);
        }

        info!(rules = rules.len(), "Rule set compiled.");
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Findings for a snapshot, ordered by check, then by rule declaration.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Vec<Finding> {
        let findings: Vec<Finding> = snapshot
            .checks
            .iter()
            .flat_map(|result| self.rules.iter().filter_map(move |rule| rule.evaluate(result)))
            .collect();
        info!(findings = findings.len(), checks = snapshot.checks.len(), "Rule evaluation finished.");
        findings
    }
}

fn extract_title(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let title = document.select(&TITLE_SELECTOR).next()?;
    let text = title.text().collect::<Vec<_>>().join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn excerpt(matched: &str) -> String {
    let trimmed = matched.trim();
    if trimmed.is_empty() {
        return NO_EVIDENCE.to_string();
    }
    trimmed.chars().take(MAX_EVIDENCE_CHARS).collect()
}

fn render_advice(template: &str, result: &CheckResult, evidence: &str) -> String {
    template
        .replace("{check}", &result.name)
        .replace("{port}", &result.port.to_string())
        .replace("{protocol}", result.protocol.as_ref())
        .replace("{evidence}", evidence)
}
