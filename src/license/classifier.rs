use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::license::spdx::{SpdxExpression, SpdxOperator};

/// Category a license is classified into for policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LicenseCategory {
    PublicDomain,
    Permissive,
    CopyleftLimited,
    Copyleft,
}

impl LicenseCategory {
    pub const ALL: [LicenseCategory; 4] = [
        LicenseCategory::PublicDomain,
        LicenseCategory::Permissive,
        LicenseCategory::CopyleftLimited,
        LicenseCategory::Copyleft,
    ];

    /// 0 is least restrictive.
    fn restrictiveness(self) -> u8 {
        match self {
            LicenseCategory::PublicDomain => 0,
            LicenseCategory::Permissive => 1,
            LicenseCategory::CopyleftLimited => 2,
            LicenseCategory::Copyleft => 3,
        }
    }
}

impl fmt::Display for LicenseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LicenseCategory::PublicDomain => write!(f, "public-domain"),
            LicenseCategory::Permissive => write!(f, "permissive"),
            LicenseCategory::CopyleftLimited => write!(f, "copyleft-limited"),
            LicenseCategory::Copyleft => write!(f, "copyleft"),
        }
    }
}

/// A license identifier was listed in more than one classification set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("license `{license}` is classified as both {first} and {second}")]
pub struct ClassificationConflict {
    pub license: String,
    pub first: LicenseCategory,
    pub second: LicenseCategory,
}

/// Pairwise-disjoint license classification sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseClassifications {
    categories: BTreeMap<String, LicenseCategory>,
}

impl LicenseClassifications {
    /// Build the classifications, failing if any license appears in two sets.
    pub fn new(
        sets: impl IntoIterator<Item = (LicenseCategory, BTreeSet<String>)>,
    ) -> Result<Self, ClassificationConflict> {
        let mut categories: BTreeMap<String, LicenseCategory> = BTreeMap::new();
        for (category, licenses) in sets {
            for license in licenses {
                let key = license.trim().to_string();
                match categories.get(&key) {
                    Some(&existing) if existing != category => {
                        return Err(ClassificationConflict {
                            license: key,
                            first: existing,
                            second: category,
                        });
                    }
                    _ => {
                        categories.insert(key, category);
                    }
                }
            }
        }
        Ok(LicenseClassifications { categories })
    }

    /// The built-in sets.
    pub fn builtin() -> Result<Self, ClassificationConflict> {
        Self::new(builtin_sets())
    }

    /// Category of a single license identifier. A trailing `+` is ignored when
    /// the exact identifier is not classified.
    pub fn category_of(&self, id: &str) -> Option<LicenseCategory> {
        let id = id.trim();
        self.categories
            .get(id)
            .or_else(|| self.categories.get(id.trim_end_matches('+')))
            .copied()
    }

    /// Classify an expression: `OR` picks the least restrictive known category,
    /// `AND` the most restrictive. An unclassified term makes an `AND` unknown;
    /// under `OR` it is skipped in favour of a classified alternative.
    pub fn classify(&self, expression: &SpdxExpression) -> Option<LicenseCategory> {
        expression
            .evaluate(&mut |id| self.category_of(id), &combine_categories)
            .flatten()
    }

    pub fn licenses_in(&self, category: LicenseCategory) -> BTreeSet<&str> {
        self.categories
            .iter()
            .filter(|(_, c)| **c == category)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

fn combine_categories(
    operator: SpdxOperator,
    a: Option<LicenseCategory>,
    b: Option<LicenseCategory>,
) -> Option<LicenseCategory> {
    match (operator, a, b) {
        (SpdxOperator::Or, Some(a), Some(b)) => {
            Some(std::cmp::min_by_key(a, b, |c| c.restrictiveness()))
        }
        (SpdxOperator::Or, a, None) => a,
        (SpdxOperator::Or, None, b) => b,
        (SpdxOperator::And, Some(a), Some(b)) => {
            Some(std::cmp::max_by_key(a, b, |c| c.restrictiveness()))
        }
        (SpdxOperator::And, _, _) => None,
    }
}

fn to_set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

pub fn builtin_sets() -> Vec<(LicenseCategory, BTreeSet<String>)> {
    vec![
        (
            LicenseCategory::PublicDomain,
            to_set(&["CC0-1.0", "Unlicense"]),
        ),
        (
            LicenseCategory::Permissive,
            to_set(&[
                "0BSD",
                "Apache-1.1",
                "Apache-2.0",
                "Artistic-2.0",
                "BlueOak-1.0.0",
                "BSD-1-Clause",
                "BSD-2-Clause",
                "BSD-3-Clause",
                "BSD-4-Clause",
                "BSL-1.0",
                "CC-BY-3.0",
                "CC-BY-4.0",
                "ISC",
                "MIT",
                "MIT-0",
                "NCSA",
                "PSF-2.0",
                "Python-2.0",
                "Unicode-3.0",
                "Unicode-DFS-2016",
                "WTFPL",
                "X11",
                "Zlib",
            ]),
        ),
        (
            LicenseCategory::CopyleftLimited,
            to_set(&[
                "APSL-2.0",
                "CDDL-1.0",
                "CDDL-1.1",
                "EPL-1.0",
                "EPL-2.0",
                "EUPL-1.2",
                "LGPL-2.0",
                "LGPL-2.0-only",
                "LGPL-2.0-or-later",
                "LGPL-2.1",
                "LGPL-2.1-only",
                "LGPL-2.1-or-later",
                "LGPL-3.0",
                "LGPL-3.0-only",
                "LGPL-3.0-or-later",
                "MPL-1.1",
                "MPL-2.0",
                "OSL-3.0",
            ]),
        ),
        (
            LicenseCategory::Copyleft,
            to_set(&[
                "AGPL-3.0",
                "AGPL-3.0-only",
                "AGPL-3.0-or-later",
                "CC-BY-SA-4.0",
                "EUPL-1.1",
                "GPL-2.0",
                "GPL-2.0-only",
                "GPL-2.0-or-later",
                "GPL-3.0",
                "GPL-3.0-only",
                "GPL-3.0-or-later",
            ]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> LicenseClassifications {
        LicenseClassifications::builtin().unwrap()
    }

    fn classify(expr: &str) -> Option<LicenseCategory> {
        builtin().classify(&SpdxExpression::parse(expr).unwrap())
    }

    #[test]
    fn test_builtin_sets_are_disjoint() {
        assert!(LicenseClassifications::builtin().is_ok());
    }

    #[test]
    fn test_overlap_names_both_sets() {
        let err = LicenseClassifications::new([
            (LicenseCategory::Permissive, to_set(&["MIT", "ISC"])),
            (LicenseCategory::Copyleft, to_set(&["GPL-3.0-only", "MIT"])),
        ])
        .unwrap_err();
        assert_eq!(err.license, "MIT");
        assert_eq!(err.first, LicenseCategory::Permissive);
        assert_eq!(err.second, LicenseCategory::Copyleft);
        assert_eq!(
            err.to_string(),
            "license `MIT` is classified as both permissive and copyleft"
        );
    }

    #[test]
    fn test_single_ids() {
        assert_eq!(classify("MIT"), Some(LicenseCategory::Permissive));
        assert_eq!(classify("LGPL-2.1"), Some(LicenseCategory::CopyleftLimited));
        assert_eq!(classify("GPL-3.0"), Some(LicenseCategory::Copyleft));
        assert_eq!(classify("CC0-1.0"), Some(LicenseCategory::PublicDomain));
        assert_eq!(classify("GPL-2.0+"), Some(LicenseCategory::Copyleft));
        assert_eq!(classify("CUSTOM-LICENSE-42"), None);
    }

    #[test]
    fn test_or_expression_is_most_permissive() {
        assert_eq!(classify("MIT OR GPL-3.0"), Some(LicenseCategory::Permissive));
        assert_eq!(
            classify("GPL-3.0 OR LGPL-3.0"),
            Some(LicenseCategory::CopyleftLimited)
        );
    }

    #[test]
    fn test_and_expression_is_most_restrictive() {
        assert_eq!(classify("MIT AND GPL-3.0"), Some(LicenseCategory::Copyleft));
        assert_eq!(classify("MIT AND CUSTOM-LICENSE"), None);
        assert_eq!(classify("GPL-3.0 AND CUSTOM-LICENSE"), None);
    }

    #[test]
    fn test_or_skips_unclassified_alternative() {
        assert_eq!(
            classify("CUSTOM-LICENSE OR MIT"),
            Some(LicenseCategory::Permissive)
        );
        assert_eq!(
            classify("(MIT AND CUSTOM-LICENSE) OR LGPL-2.1"),
            Some(LicenseCategory::CopyleftLimited)
        );
    }

    #[test]
    fn test_with_exception_uses_base_license() {
        assert_eq!(
            classify("GPL-2.0 WITH Classpath-exception-2.0"),
            Some(LicenseCategory::Copyleft)
        );
    }

    #[test]
    fn test_licenses_in() {
        let classifications = builtin();
        let public_domain = classifications.licenses_in(LicenseCategory::PublicDomain);
        assert_eq!(public_domain.into_iter().collect::<Vec<_>>(), vec!["CC0-1.0", "Unlicense"]);
    }
}
