//! Built-in signature catalogue.
//!
//! Pattern lists are ordered; evaluation stops at the first hit inside a
//! category. Spacing alternations (`\s`, `+`, `%20`) cover both raw and
//! URL-encoded request lines.

use regex::Regex;

use super::{RuleKind, SignatureRule};
use crate::Severity;

pub const SQL_INJECTION: &str = "SQL Injection attempt";
pub const XSS: &str = "XSS attempt";
pub const PATH_TRAVERSAL: &str = "Path traversal attempt";
pub const ADMIN_SCAN: &str = "Admin panel scanning";
pub const UNAUTHORIZED: &str = "Unauthorized access";
pub const SERVER_ERROR: &str = "Server error triggered";

const SQLI_PATTERNS: &[&str] = &[
    r"(?i)('|%27)(\s|\+|%20)*(or|and)\b",
    r"(?i)\bunion(\s|\+|%20)+(all(\s|\+|%20)+)?select\b",
    r"(?i)\b1(\s|\+|%20)*=(\s|\+|%20)*1\b",
    r"(?i)\bdrop(\s|\+|%20)+table\b",
    r"(?i)\binsert(\s|\+|%20)+into\b",
    r"(?i)\bsleep(\s|%20)*\(",
    r"(?i)\bbenchmark(\s|%20)*\(",
    r"(?i)information_schema",
    r"--",
];

const XSS_PATTERNS: &[&str] = &[
    r"(?i)<(\s|%20)*script",
    r"(?i)%3c(\s|%20)*script",
    r"(?i)javascript:",
    r"(?i)on(error|load|click|mouseover|focus)(\s|%20)*=",
];

const TRAVERSAL_NEEDLES: &[&str] = &[
    "../",
    r"..\",
    "%2e%2e",
    "/etc/passwd",
    "/etc/shadow",
    "/proc/self",
    r"\windows\",
    r"\system32\",
];

const ADMIN_NEEDLES: &[&str] = &[
    "/admin",
    "/wp-admin",
    "/wp-login",
    "/administrator",
    "/phpmyadmin",
    "/adminer",
    "/pma",
    "/manager/html",
    "/console",
    "/actuator",
    "/cpanel",
    "/.env",
    "/.git",
];

const UNAUTHORIZED_CODES: &[&str] = &["401", "403"];
const SERVER_ERROR_CODES: &[&str] = &["500", "502", "503"];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("built-in pattern"))
        .collect()
}

fn needles(list: &[&str]) -> Vec<String> {
    list.iter().map(|n| n.to_lowercase()).collect()
}

fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| c.to_string()).collect()
}

/// The built-in rules in their fixed evaluation order.
pub fn builtin_rules() -> Vec<SignatureRule> {
    vec![
        SignatureRule {
            name: SQL_INJECTION.to_string(),
            severity: Severity::Critical,
            kind: RuleKind::ResourcePattern(compile(SQLI_PATTERNS)),
        },
        SignatureRule {
            name: XSS.to_string(),
            severity: Severity::Critical,
            kind: RuleKind::ResourcePattern(compile(XSS_PATTERNS)),
        },
        SignatureRule {
            name: PATH_TRAVERSAL.to_string(),
            severity: Severity::Critical,
            kind: RuleKind::ResourceContains(needles(TRAVERSAL_NEEDLES)),
        },
        SignatureRule {
            name: ADMIN_SCAN.to_string(),
            severity: Severity::Warning,
            kind: RuleKind::ResourceContains(needles(ADMIN_NEEDLES)),
        },
        SignatureRule {
            name: UNAUTHORIZED.to_string(),
            severity: Severity::Warning,
            kind: RuleKind::StatusIn(codes(UNAUTHORIZED_CODES)),
        },
        SignatureRule {
            name: SERVER_ERROR.to_string(),
            severity: Severity::Warning,
            kind: RuleKind::StatusIn(codes(SERVER_ERROR_CODES)),
        },
    ]
}
