//! Policy evaluation over the resolved dependency graph.
//!
//! [`LicensePolicy`] is the default [`PolicyEvaluator`]: it evaluates every
//! package's processed declared license, and any scanned license findings,
//! against the configured classifications and verdicts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{PolicyAction, PolicyConfig};
use crate::license::classifier::LicenseClassifications;
use crate::license::processor::{unmapped_placeholder, UNMAPPED_PREFIX};
use crate::license::spdx::{SpdxExpression, SpdxOperator, NOASSERTION};
use crate::models::{AnalyzerResult, Identifier, Package};
use crate::scanner::ScanResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Hint,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Hint => write!(f, "HINT"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleViolation {
    pub rule: String,
    pub package: Option<Identifier>,
    pub license: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub how_to_fix: String,
}

pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, result: &AnalyzerResult, scan_results: &[ScanResult]) -> Vec<RuleViolation>;
}

pub const RULE_UNMAPPED_DECLARED_LICENSE: &str = "UNMAPPED_DECLARED_LICENSE";
pub const RULE_MISSING_DECLARED_LICENSE: &str = "MISSING_DECLARED_LICENSE";
pub const RULE_DECLARED_LICENSE: &str = "DECLARED_LICENSE";
pub const RULE_DETECTED_LICENSE: &str = "DETECTED_LICENSE";

/// License verdicts driven by classification sets and per-license overrides.
pub struct LicensePolicy {
    classifications: LicenseClassifications,
    policy: PolicyConfig,
}

impl LicensePolicy {
    pub fn new(classifications: LicenseClassifications, policy: PolicyConfig) -> Self {
        LicensePolicy {
            classifications,
            policy,
        }
    }

    /// Verdict for a single license identifier: explicit override, then the
    /// verdict of its category, then the default.
    pub fn verdict_for_id(&self, id: &str) -> PolicyAction {
        if let Some(action) = self.policy.licenses.get(id) {
            return *action;
        }
        match self.classifications.category_of(id) {
            Some(category) => self.policy.categories.get(category),
            None => self.policy.default,
        }
    }

    /// Verdict for an expression. `OR` picks the most permissive verdict of its
    /// terms, `AND` the most restrictive; `WITH` exceptions are evaluated by
    /// their base license.
    pub fn verdict(&self, expression: &SpdxExpression) -> PolicyAction {
        expression
            .evaluate(&mut |id| self.verdict_for_id(id), &combine_verdicts)
            .unwrap_or(self.policy.default)
    }

    fn check_declared(&self, package: &Package, violations: &mut Vec<RuleViolation>) {
        let processed = &package.declared_licenses_processed;

        for unmapped in &processed.unmapped {
            let raw = package
                .declared_licenses
                .iter()
                .map(String::as_str)
                .find(|declared| unmapped_placeholder(declared) == *unmapped)
                .unwrap_or_else(|| unmapped.strip_prefix(UNMAPPED_PREFIX).unwrap_or(unmapped));
            violations.push(RuleViolation {
                rule: RULE_UNMAPPED_DECLARED_LICENSE.to_string(),
                package: Some(package.id.clone()),
                license: Some(unmapped.clone()),
                severity: Severity::Warning,
                message: format!(
                    "The declared license '{}' of {} could not be mapped to an SPDX license.",
                    raw, package.id
                ),
                how_to_fix: "Check the package's license text and record the SPDX identifier it corresponds to.".to_string(),
            });
        }

        let Some(expression) = &processed.spdx_expression else {
            violations.push(RuleViolation {
                rule: RULE_MISSING_DECLARED_LICENSE.to_string(),
                package: Some(package.id.clone()),
                license: None,
                severity: Severity::Warning,
                message: format!("{} does not declare a license.", package.id),
                how_to_fix: "Find the package's license in its source code or repository.".to_string(),
            });
            return;
        };

        if let Some(severity) = severity_of(self.verdict(expression)) {
            let category = self
                .classifications
                .classify(expression)
                .map(|c| format!(" ({c})"))
                .unwrap_or_default();
            violations.push(RuleViolation {
                rule: RULE_DECLARED_LICENSE.to_string(),
                package: Some(package.id.clone()),
                license: Some(expression.to_string()),
                severity,
                message: format!(
                    "{} declares the license '{}'{}, which is not allowed without review.",
                    package.id, expression, category
                ),
                how_to_fix: how_to_fix(expression),
            });
        }
    }

    fn check_detected(&self, scan: &ScanResult, violations: &mut Vec<RuleViolation>) {
        for finding in scan.summary.all_license_findings() {
            if let Some(severity) = severity_of(self.verdict(&finding.license)) {
                violations.push(RuleViolation {
                    rule: RULE_DETECTED_LICENSE.to_string(),
                    package: Some(scan.id.clone()),
                    license: Some(finding.license.to_string()),
                    severity,
                    message: format!(
                        "The license '{}' was detected in {} at {}.",
                        finding.license, scan.id, finding.location
                    ),
                    how_to_fix: how_to_fix(&finding.license),
                });
            }
        }
    }
}

impl PolicyEvaluator for LicensePolicy {
    fn evaluate(&self, result: &AnalyzerResult, scan_results: &[ScanResult]) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for package in &result.packages {
            self.check_declared(package, &mut violations);
        }
        for scan in scan_results {
            self.check_detected(scan, &mut violations);
        }
        violations.sort();
        violations.dedup();
        tracing::debug!("Policy evaluation raised {} violations", violations.len());
        violations
    }
}

fn combine_verdicts(operator: SpdxOperator, a: PolicyAction, b: PolicyAction) -> PolicyAction {
    match operator {
        SpdxOperator::Or => verdict_or(a, b),
        SpdxOperator::And => verdict_and(a, b),
    }
}

/// Most permissive (least severe) of two verdicts, for `OR`.
fn verdict_or(a: PolicyAction, b: PolicyAction) -> PolicyAction {
    a.min(b)
}

/// Most restrictive (most severe) of two verdicts, for `AND`.
fn verdict_and(a: PolicyAction, b: PolicyAction) -> PolicyAction {
    a.max(b)
}

fn severity_of(action: PolicyAction) -> Option<Severity> {
    match action {
        PolicyAction::Pass => None,
        PolicyAction::Warn => Some(Severity::Warning),
        PolicyAction::Error => Some(Severity::Error),
    }
}

fn how_to_fix(expression: &SpdxExpression) -> String {
    if expression.license_ids().contains(NOASSERTION) {
        "The package ships a license file that could not be identified. Review it and record its SPDX identifier.".to_string()
    } else {
        "Replace the dependency, obtain a different license, or add an explicit override under [policy.licenses].".to_string()
    }
}
