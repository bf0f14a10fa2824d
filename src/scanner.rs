//! Scanning collaborator boundary.
//!
//! A [`Scanner`] looks at source files and reports what it finds as a
//! [`ScanSummary`]. The built-in [`SpdxTagScanner`] only understands
//! `SPDX-License-Identifier` tags and copyright lines; richer scanners plug in
//! through the same trait or are loaded from stored [`ScanResult`]s.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::license::spdx::SpdxExpression;
use crate::models::{AnalyzerResult, Identifier};

/// Location of a finding within a scanned tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextLocation {
    /// Path relative to the scanned root, `/`-separated.
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
}

impl TextLocation {
    /// Line number used when the scanner cannot tell where a finding is.
    pub const UNKNOWN_LINE: i64 = -1;

    pub fn new(path: impl Into<String>, start_line: i64, end_line: i64) -> Self {
        TextLocation {
            path: path.into(),
            start_line,
            end_line,
        }
    }

    pub fn without_lines(path: impl Into<String>) -> Self {
        Self::new(path, Self::UNKNOWN_LINE, Self::UNKNOWN_LINE)
    }

    pub fn has_lines(&self) -> bool {
        self.start_line != Self::UNKNOWN_LINE && self.end_line != Self::UNKNOWN_LINE
    }
}

impl fmt::Display for TextLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_lines() {
            write!(f, "{}", self.path)
        } else if self.start_line == self.end_line {
            write!(f, "{}:{}", self.path, self.start_line)
        } else {
            write!(f, "{}:{}-{}", self.path, self.start_line, self.end_line)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LicenseFinding {
    pub license: SpdxExpression,
    pub location: TextLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CopyrightFinding {
    pub statement: String,
    pub location: TextLocation,
}

/// Code that matches a snippet of some other, known component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    /// Package URL of the component the snippet comes from.
    pub purl: String,
    pub location: TextLocation,
    pub license: Option<SpdxExpression>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetFinding {
    pub source_location: TextLocation,
    pub snippets: BTreeSet<Snippet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub license_findings: BTreeSet<LicenseFinding>,
    #[serde(default)]
    pub copyright_findings: BTreeSet<CopyrightFinding>,
    #[serde(default)]
    pub snippet_findings: BTreeSet<SnippetFinding>,
}

impl ScanSummary {
    pub fn empty(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        ScanSummary {
            start_time,
            end_time,
            license_findings: BTreeSet::new(),
            copyright_findings: BTreeSet::new(),
            snippet_findings: BTreeSet::new(),
        }
    }

    /// Direct license findings plus the licenses of matched snippets.
    ///
    /// Snippet-origin findings carry the file of the matched code, but the
    /// snippet's own line range does not translate to that file, so their lines
    /// are unknown.
    pub fn all_license_findings(&self) -> BTreeSet<LicenseFinding> {
        let mut findings = self.license_findings.clone();
        for finding in &self.snippet_findings {
            for snippet in &finding.snippets {
                if let Some(license) = &snippet.license {
                    findings.insert(LicenseFinding {
                        license: license.clone(),
                        location: TextLocation::without_lines(&finding.source_location.path),
                    });
                }
            }
        }
        findings
    }
}

/// Scan output for one project or package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: Identifier,
    pub scanner: String,
    pub summary: ScanSummary,
}

pub trait Scanner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scan every file below `root`.
    fn scan_path(&self, root: &Path) -> Result<ScanSummary>;
}

/// Files larger than this are assumed not to be hand-written source.
const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Finds `SPDX-License-Identifier:` tags and copyright statements.
pub struct SpdxTagScanner {
    tag: Regex,
    copyright: Regex,
}

impl SpdxTagScanner {
    pub fn new() -> Result<Self> {
        Ok(SpdxTagScanner {
            tag: Regex::new(r"SPDX-License-Identifier:\s*(?P<expr>.+?)\s*(?:\*/|-->)?\s*$")?,
            copyright: Regex::new(r"(?i)\b(?P<stmt>copyright\s+(?:\(c\)|©)?\s*\S.*?)\s*(?:\*/|-->)?\s*$")?,
        })
    }

    fn scan_file(&self, path: &Path, relative: &str, summary: &mut ScanSummary) {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            // Binary or unreadable files carry no tags.
            Err(_) => return,
        };

        for (index, line) in content.lines().enumerate() {
            let line_number = index as i64 + 1;
            let location = || TextLocation::new(relative, line_number, line_number);

            if let Some(caps) = self.tag.captures(line) {
                match SpdxExpression::parse(&caps["expr"]) {
                    Ok(license) => {
                        summary.license_findings.insert(LicenseFinding {
                            license,
                            location: location(),
                        });
                    }
                    Err(e) => tracing::debug!("Ignoring invalid SPDX tag at {}: {}", location(), e),
                }
            } else if let Some(caps) = self.copyright.captures(line) {
                summary.copyright_findings.insert(CopyrightFinding {
                    statement: caps["stmt"].to_string(),
                    location: location(),
                });
            }
        }
    }
}

impl Scanner for SpdxTagScanner {
    fn name(&self) -> &'static str {
        "SpdxTagScanner"
    }

    fn scan_path(&self, root: &Path) -> Result<ScanSummary> {
        let mut summary = ScanSummary::empty(Utc::now(), Utc::now());

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || !(name.starts_with('.') || name == "node_modules" || name == "target")
            });

        for entry in walker {
            let entry = entry.with_context(|| format!("failed to scan {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE).unwrap_or(true) {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            self.scan_file(entry.path(), &relative, &mut summary);
        }

        summary.end_time = Utc::now();
        tracing::debug!(
            "{} found {} license and {} copyright findings in {}",
            self.name(),
            summary.license_findings.len(),
            summary.copyright_findings.len(),
            root.display()
        );
        Ok(summary)
    }
}

/// Scan the directory of every project's definition file below `root`.
/// A project whose scan fails is logged and left out.
pub fn scan_projects(scanner: &dyn Scanner, root: &Path, result: &AnalyzerResult) -> Vec<ScanResult> {
    let mut results = Vec::new();
    for project in &result.projects {
        let definition_file = root.join(&project.definition_file_path);
        let dir = definition_file.parent().unwrap_or(root);
        match scanner.scan_path(dir) {
            Ok(summary) => results.push(ScanResult {
                id: project.id.clone(),
                scanner: scanner.name().to_string(),
                summary,
            }),
            Err(e) => tracing::warn!("Could not scan {}: {:#}", project.id, e),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_finds_tags_and_copyrights() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "src/lib.rs",
            "// SPDX-License-Identifier: MIT OR Apache-2.0\n// Copyright (c) 2024 Example Corp\nfn main() {}\n",
        );
        write(
            dir.path(),
            "web/index.html",
            "<!-- SPDX-License-Identifier: BSD-3-Clause -->\n",
        );
        write(dir.path(), "node_modules/x/index.js", "// SPDX-License-Identifier: GPL-3.0-only\n");

        let summary = SpdxTagScanner::new().unwrap().scan_path(dir.path()).unwrap();

        let licenses: Vec<(String, String)> = summary
            .license_findings
            .iter()
            .map(|f| (f.license.to_string(), f.location.to_string()))
            .collect();
        assert_eq!(
            licenses,
            vec![
                ("BSD-3-Clause".to_string(), "web/index.html:1".to_string()),
                ("Apache-2.0 OR MIT".to_string(), "src/lib.rs:1".to_string()),
            ]
        );

        let copyright = summary.copyright_findings.iter().next().unwrap();
        assert_eq!(copyright.statement, "Copyright (c) 2024 Example Corp");
        assert_eq!(copyright.location, TextLocation::new("src/lib.rs", 2, 2));
        assert!(summary.start_time <= summary.end_time);
    }

    #[test]
    fn test_invalid_tag_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.c", "/* SPDX-License-Identifier: MIT AND */\n");
        let summary = SpdxTagScanner::new().unwrap().scan_path(dir.path()).unwrap();
        assert!(summary.license_findings.is_empty());
    }

    #[test]
    fn test_snippet_licenses_have_unknown_lines() {
        let now = Utc::now();
        let mut summary = ScanSummary::empty(now, now);
        summary.license_findings.insert(LicenseFinding {
            license: SpdxExpression::license("MIT"),
            location: TextLocation::new("LICENSE", 1, 21),
        });
        summary.snippet_findings.insert(SnippetFinding {
            source_location: TextLocation::new("src/vendored.c", 10, 40),
            snippets: BTreeSet::from([Snippet {
                purl: "pkg:github/example/lib@1.0".to_string(),
                location: TextLocation::new("lib/copy.c", 100, 130),
                license: Some(SpdxExpression::license("GPL-2.0-only")),
            }]),
        });

        let findings = summary.all_license_findings();
        assert_eq!(findings.len(), 2);
        let snippet = findings
            .iter()
            .find(|f| f.license.to_string() == "GPL-2.0-only")
            .unwrap();
        assert_eq!(snippet.location.path, "src/vendored.c");
        assert_eq!(snippet.location.start_line, TextLocation::UNKNOWN_LINE);
        assert!(!snippet.location.has_lines());
        assert_eq!(snippet.location.to_string(), "src/vendored.c");
    }

    #[test]
    fn test_summary_json_shape() {
        let now = Utc::now();
        let summary = ScanSummary::empty(now, now);
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("startTime").is_some());
        assert!(json.get("licenseFindings").unwrap().as_array().unwrap().is_empty());

        let back: ScanSummary = serde_json::from_value(json).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_scan_projects_uses_definition_file_dirs() {
        use crate::license::processor::ProcessedDeclaredLicense;
        use crate::models::{Project, VcsInfo};
        use std::path::PathBuf;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "web/index.js", "// SPDX-License-Identifier: ISC\n");
        write(dir.path(), "other/lib.rs", "// SPDX-License-Identifier: MIT\n");

        let mut result = AnalyzerResult::default();
        result.projects.insert(Project {
            id: Identifier::new("NPM", "", "web", "1.0.0"),
            definition_file_path: PathBuf::from("web/package.json"),
            authors: BTreeSet::new(),
            declared_licenses: BTreeSet::new(),
            declared_licenses_processed: ProcessedDeclaredLicense::default(),
            vcs: VcsInfo::EMPTY,
            vcs_processed: VcsInfo::EMPTY,
            homepage_url: String::new(),
            scopes: BTreeSet::new(),
        });

        let scanner = SpdxTagScanner::new().unwrap();
        let results = scan_projects(&scanner, dir.path(), &result);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].scanner, "SpdxTagScanner");
        let licenses: Vec<String> = results[0]
            .summary
            .license_findings
            .iter()
            .map(|f| f.license.to_string())
            .collect();
        assert_eq!(licenses, vec!["ISC"]);
    }
}
