//! Signature rule set and evaluation.
//!
//! Rules are held in a fixed order and evaluated deterministically; inside a
//! rule the first matching pattern wins. A record can fire several rules at
//! once (an admin-path probe answered with 403 is both scanning and
//! unauthorized access).

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::parser::LogRecord;
use crate::Severity;

pub mod patterns;

/// How a rule inspects a record.
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Ordered regex list over the requested resource.
    ResourcePattern(Vec<Regex>),
    /// Lowercased substring needles over the requested resource.
    ResourceContains(Vec<String>),
    /// Exact status-code set; the matched code lands in the finding detail.
    StatusIn(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct SignatureRule {
    pub name: String,
    pub severity: Severity,
    pub kind: RuleKind,
}

impl SignatureRule {
    /// First matching pattern wins; `None` means the rule did not fire.
    fn matches(&self, record: &LogRecord) -> Option<String> {
        match &self.kind {
            RuleKind::ResourcePattern(patterns) => patterns
                .iter()
                .find(|p| p.is_match(&record.resource))
                .map(|p| format!("resource matched `{}`", p.as_str())),
            RuleKind::ResourceContains(needles) => {
                let lower = record.resource.to_lowercase();
                needles
                    .iter()
                    .find(|n| lower.contains(n.as_str()))
                    .map(|n| format!("resource contains `{n}`"))
            }
            RuleKind::StatusIn(codes) => codes
                .iter()
                .find(|c| **c == record.status_code)
                .map(|c| format!("status {c}")),
        }
    }
}

/// One named finding produced by rule evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub category: String,
    pub severity: Severity,
    pub detail: String,
}

pub struct RuleSet {
    rules: Vec<SignatureRule>,
}

impl RuleSet {
    /// The built-in signature catalogue, in its fixed evaluation order.
    pub fn builtin() -> Self {
        Self {
            rules: patterns::builtin_rules(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Append custom rules from every `.yaml`/`.yml` file in `path`, in file
    /// order after the built-ins. A malformed file is logged and skipped.
    pub fn load_directory<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut entries: Vec<_> = fs::read_dir(path)
            .with_context(|| format!("reading rules directory {}", path.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|s| s.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        entries.sort();

        for file_path in entries {
            match Self::load_rule_file(&file_path) {
                Ok(rules) => {
                    info!("Loaded {} rules from {:?}", rules.len(), file_path);
                    self.rules.extend(rules);
                }
                Err(e) => {
                    warn!("Failed to load rules from {:?}: {}", file_path, e);
                }
            }
        }

        info!("Rule set now holds {} rules", self.rules.len());
        Ok(())
    }

    fn load_rule_file(path: &Path) -> Result<Vec<SignatureRule>> {
        let content = fs::read_to_string(path)?;
        let specs: Vec<RuleSpec> = serde_yaml::from_str(&content)?;
        specs.into_iter().map(SignatureRule::try_from).collect()
    }

    /// Evaluate a record against every rule, in order. Pure: no shared state,
    /// safe to call concurrently across records.
    pub fn evaluate(&self, record: &LogRecord) -> Vec<Finding> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.matches(record).map(|detail| Finding {
                    category: rule.name.clone(),
                    severity: rule.severity,
                    detail,
                })
            })
            .collect()
    }
}

/// On-disk shape of a custom rule.
#[derive(Debug, Deserialize)]
struct RuleSpec {
    name: String,
    severity: Severity,
    #[serde(default)]
    resource_patterns: Vec<String>,
    #[serde(default)]
    resource_contains: Vec<String>,
    #[serde(default)]
    status_codes: Vec<String>,
}

impl TryFrom<RuleSpec> for SignatureRule {
    type Error = anyhow::Error;

    fn try_from(spec: RuleSpec) -> Result<Self> {
        let kind = if !spec.resource_patterns.is_empty() {
            let compiled = spec
                .resource_patterns
                .iter()
                .map(|p| Regex::new(p).with_context(|| format!("pattern `{p}` in rule `{}`", spec.name)))
                .collect::<Result<Vec<_>>>()?;
            RuleKind::ResourcePattern(compiled)
        } else if !spec.resource_contains.is_empty() {
            RuleKind::ResourceContains(
                spec.resource_contains.iter().map(|n| n.to_lowercase()).collect(),
            )
        } else if !spec.status_codes.is_empty() {
            RuleKind::StatusIn(spec.status_codes)
        } else {
            anyhow::bail!("rule `{}` has no match criteria", spec.name);
        };

        Ok(SignatureRule {
            name: spec.name,
            severity: spec.severity,
            kind,
        })
    }
}
