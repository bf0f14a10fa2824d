//! Normalization of raw, ecosystem-declared license strings.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::license::spdx::{canonical_id, synonym, SpdxExpression, SpdxOperator};

/// Prefix of the placeholder that stands in for a declared license that could
/// not be mapped to SPDX.
pub const UNMAPPED_PREFIX: &str = "LicenseRef-declared-unmapped-";

/// Result of processing a set of declared license strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessedDeclaredLicense {
    /// All declared licenses combined into one expression.
    pub spdx_expression: Option<SpdxExpression>,
    /// Declared strings whose spelling was changed, mapped to the SPDX form used.
    pub mapped: BTreeMap<String, String>,
    /// `LicenseRef-declared-unmapped-*` placeholders standing in for declared
    /// strings that could not be mapped. Each also appears in the expression.
    pub unmapped: BTreeSet<String>,
}

impl ProcessedDeclaredLicense {
    /// Top-level terms of the expression as raw strings, split on `operator`.
    pub fn as_raw_strings(&self, operator: SpdxOperator) -> BTreeSet<String> {
        self.spdx_expression
            .as_ref()
            .map(|e| e.decompose(operator).into_iter().collect())
            .unwrap_or_default()
    }
}

/// Process declared licenses, combining them with `operator`.
pub fn process(raw: &BTreeSet<String>, operator: SpdxOperator) -> ProcessedDeclaredLicense {
    process_with_license_file(raw, operator, false)
}

/// Like [`process`], but a present license file adds `NOASSERTION` when no
/// declared string mapped to a real SPDX license.
pub fn process_with_license_file(
    raw: &BTreeSet<String>,
    operator: SpdxOperator,
    has_license_file: bool,
) -> ProcessedDeclaredLicense {
    let mut processed = ProcessedDeclaredLicense::default();
    let mut terms = Vec::new();
    let mut has_real_license = false;

    for declared in raw {
        let trimmed = declared.trim();
        if trimmed.is_empty() {
            continue;
        }

        match map_declared(trimmed) {
            Some(expression) => {
                let rendered = expression.to_string();
                if rendered != trimmed {
                    processed.mapped.insert(trimmed.to_string(), rendered);
                }
                for id in expression.license_ids() {
                    if id.starts_with(UNMAPPED_PREFIX) {
                        processed.unmapped.insert(id.to_string());
                    } else {
                        has_real_license = true;
                    }
                }
                terms.push(expression);
            }
            None => {
                let id = unmapped_placeholder(trimmed);
                processed.unmapped.insert(id.clone());
                terms.push(SpdxExpression::license(id));
            }
        }
    }

    if has_license_file && !has_real_license {
        terms.push(SpdxExpression::noassertion());
    }

    processed.spdx_expression = SpdxExpression::combine(operator, terms);
    processed
}

/// Map one declared string via the synonym table or as a parseable SPDX
/// expression over known identifiers.
fn map_declared(declared: &str) -> Option<SpdxExpression> {
    if let Some(mapped) = synonym(declared) {
        return SpdxExpression::parse(mapped).ok();
    }
    let parsed = SpdxExpression::parse(declared).ok()?;
    canonicalize(&parsed)
}

fn canonicalize(expression: &SpdxExpression) -> Option<SpdxExpression> {
    match expression {
        SpdxExpression::License { id, exception } => Some(SpdxExpression::License {
            id: canonical_id(id)?,
            exception: exception.clone(),
        }),
        SpdxExpression::Compound { operator, terms } => {
            let terms = terms
                .iter()
                .map(canonicalize)
                .collect::<Option<Vec<_>>>()?;
            SpdxExpression::combine(*operator, terms)
        }
    }
}

/// The placeholder id recorded for a declared string that has no SPDX mapping.
pub fn unmapped_placeholder(declared: &str) -> String {
    let declared = declared.trim();
    let sanitized: String = declared
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect();
    let sanitized = sanitized.trim_matches('-');
    if sanitized.is_empty() {
        format!("{UNMAPPED_PREFIX}unknown")
    } else {
        format!("{UNMAPPED_PREFIX}{sanitized}")
    }
}
