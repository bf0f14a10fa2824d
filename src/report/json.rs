use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::AnalyzerResult;
use crate::policy::RuleViolation;
use crate::scanner::ScanResult;

/// Everything a run produced, as written by `--report json` and `--output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub analyzer_result: AnalyzerResult,
    #[serde(default)]
    pub scan_results: Vec<ScanResult>,
    #[serde(default)]
    pub violations: Vec<RuleViolation>,
}

pub fn render(report: &RunReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::models::Identifier;
    use crate::policy::Severity;

    #[test]
    fn test_report_shape() {
        let mut result = AnalyzerResult::default();
        result.add_issue(&PathBuf::from("web/package.json"), "NPM: boom");
        let report = RunReport {
            analyzer_result: result,
            scan_results: Vec::new(),
            violations: vec![RuleViolation {
                rule: "MISSING_DECLARED_LICENSE".to_string(),
                package: Some(Identifier::new("Crate", "", "foo", "1.2.3")),
                license: None,
                severity: Severity::Warning,
                message: "Crate::foo:1.2.3 does not declare a license.".to_string(),
                how_to_fix: String::new(),
            }],
        };

        let json: serde_json::Value = serde_json::from_str(&render(&report).unwrap()).unwrap();
        assert_eq!(json["analyzerResult"]["issues"]["web/package.json"], "NPM: boom");
        assert_eq!(json["violations"][0]["severity"], "WARNING");
        assert_eq!(json["violations"][0]["package"]["type"], "Crate");
        assert_eq!(json["violations"][0]["howToFix"], "");
    }
}
