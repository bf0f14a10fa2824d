use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Result;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::models::{AnalyzerResult, Identifier, Package};
use crate::policy::{RuleViolation, Severity};

/// Render a colored terminal report.
pub fn render(
    result: &AnalyzerResult,
    violations: &[RuleViolation],
    path: &Path,
    verbose: bool,
    quiet: bool,
) -> Result<()> {
    let error_count = count(violations, Severity::Error);
    let warn_count = count(violations, Severity::Warning);
    let issue_count = result.issues.len();

    if quiet {
        println!(
            "Projects: {}  Packages: {}  Failed: {}  Warnings: {}  Errors: {}",
            result.projects.len(),
            result.packages.len(),
            issue_count.to_string().red(),
            warn_count.to_string().yellow(),
            error_count.to_string().red(),
        );
        return Ok(());
    }

    println!(
        "\n {} v{}",
        "depgraph-checkr".bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!(" Analyzed: {}\n", path.display());

    let warn_licenses = summarize_licenses(violations, Severity::Warning);
    let error_licenses = summarize_licenses(violations, Severity::Error);

    println!(" ┌────────────────────────────────────────────────────┐");
    println!(" │  {:<48} │", "SUMMARY".bold());
    println!(" │  {:<48} │", format!("Projects           : {}", result.projects.len()));
    println!(" │  {:<48} │", format!("Packages           : {}", result.packages.len()));
    println!(
        " │  {:<48} │",
        format!("{}  Failed files    : {:>4}", "✗".red(), issue_count)
    );
    println!(
        " │  {:<48} │",
        format!("{}  Warnings        : {:>4}  {}", "⚠".yellow(), warn_count, warn_licenses)
    );
    println!(
        " │  {:<48} │",
        format!("{}  Errors          : {:>4}  {}", "✗".red(), error_count, error_licenses)
    );
    println!(" └────────────────────────────────────────────────────┘\n");

    if issue_count > 0 {
        println!(" {} Definition files that could not be resolved:\n", "[FAILED]".red().bold());
        render_issues(result);
        println!();
    }

    if error_count > 0 {
        println!(" {} Violations requiring attention:\n", "[ERROR]".red().bold());
        render_violations(violations, Severity::Error);
        println!();
    }

    if warn_count > 0 {
        println!(" {} Violations to review:\n", "[WARN]".yellow().bold());
        render_violations(violations, Severity::Warning);
        println!();
    }

    if verbose && !result.packages.is_empty() {
        println!(" {} All packages:\n", "[PACKAGES]".green().bold());
        render_packages(result, violations);
        println!();
    }

    Ok(())
}

fn count(violations: &[RuleViolation], severity: Severity) -> usize {
    violations.iter().filter(|v| v.severity == severity).count()
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn render_issues(result: &AnalyzerResult) {
    let mut table = new_table();
    table.set_header(header(&["Definition file", "Error"]));
    for (file, message) in &result.issues {
        table.add_row(vec![
            Cell::new(file.display()),
            Cell::new(message).fg(Color::Red),
        ]);
    }
    println!("{}", table);
}

fn render_violations(violations: &[RuleViolation], severity: Severity) {
    let mut table = new_table();
    table.set_header(header(&["Package", "License", "Rule", "Message"]));

    let color = severity_color(severity);
    for violation in violations.iter().filter(|v| v.severity == severity) {
        let package = violation
            .package
            .as_ref()
            .map(display_name)
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(package),
            Cell::new(violation.license.as_deref().unwrap_or("none")).fg(color),
            Cell::new(&violation.rule),
            Cell::new(&violation.message),
        ]);
    }

    println!("{}", table);
}

fn render_packages(result: &AnalyzerResult, violations: &[RuleViolation]) {
    let mut worst: HashMap<&Identifier, Severity> = HashMap::new();
    for violation in violations {
        if let Some(id) = &violation.package {
            let entry = worst.entry(id).or_insert(violation.severity);
            *entry = (*entry).max(violation.severity);
        }
    }

    let mut table = new_table();
    table.set_header(header(&["Name", "Version", "Type", "License", "Verdict"]));

    for package in &result.packages {
        let (verdict, color) = match worst.get(&package.id) {
            None | Some(Severity::Hint) => ("✓ pass", Color::Green),
            Some(Severity::Warning) => ("⚠ warn", Color::Yellow),
            Some(Severity::Error) => ("✗ error", Color::Red),
        };
        table.add_row(vec![
            Cell::new(display_name(&package.id)),
            Cell::new(&package.id.version),
            Cell::new(&package.id.kind),
            Cell::new(license_of(package)),
            Cell::new(verdict).fg(color).set_alignment(CellAlignment::Center),
        ]);
    }

    println!("{}", table);
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Hint => Color::DarkGrey,
        Severity::Warning => Color::Yellow,
        Severity::Error => Color::Red,
    }
}

/// `namespace/name`, or just the name when there is no namespace.
fn display_name(id: &Identifier) -> String {
    if id.namespace.is_empty() {
        id.name.clone()
    } else {
        format!("{}/{}", id.namespace, id.name)
    }
}

fn license_of(package: &Package) -> String {
    package
        .declared_licenses_processed
        .spdx_expression
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// The three most frequent licenses among violations of `severity`.
fn summarize_licenses(violations: &[RuleViolation], severity: Severity) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for violation in violations.iter().filter(|v| v.severity == severity) {
        let license = violation.license.as_deref().unwrap_or("none");
        *counts.entry(license).or_insert(0) += 1;
    }

    let mut pairs: Vec<(&str, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1));

    let summary: Vec<String> = pairs
        .iter()
        .take(3)
        .map(|(license, n)| format!("{} ({})", license, n))
        .collect();

    if summary.is_empty() {
        String::new()
    } else {
        format!("[{}]", summary.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(license: Option<&str>, severity: Severity) -> RuleViolation {
        RuleViolation {
            rule: "DECLARED_LICENSE".to_string(),
            package: Some(Identifier::new("NPM", "@babel", "core", "7.0.0")),
            license: license.map(str::to_string),
            severity,
            message: String::new(),
            how_to_fix: String::new(),
        }
    }

    #[test]
    fn test_summarize_licenses_by_frequency() {
        let violations = vec![
            violation(Some("GPL-3.0-only"), Severity::Error),
            violation(Some("AGPL-3.0-only"), Severity::Error),
            violation(Some("GPL-3.0-only"), Severity::Error),
            violation(Some("MPL-2.0"), Severity::Warning),
        ];
        assert_eq!(
            summarize_licenses(&violations, Severity::Error),
            "[GPL-3.0-only (2), AGPL-3.0-only (1)]"
        );
        assert_eq!(summarize_licenses(&violations, Severity::Hint), "");
    }

    #[test]
    fn test_display_name_includes_namespace() {
        assert_eq!(display_name(&Identifier::new("NPM", "@babel", "core", "7.0.0")), "@babel/core");
        assert_eq!(display_name(&Identifier::new("Crate", "", "serde", "1.0.0")), "serde");
    }
}
