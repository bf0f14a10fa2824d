//! SPDX license expressions: AST, parser, synonym table and known identifiers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// `NOASSERTION`: a license exists but its identity could not be determined.
pub const NOASSERTION: &str = "NOASSERTION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpdxOperator {
    And,
    Or,
}

impl fmt::Display for SpdxOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpdxOperator::And => write!(f, "AND"),
            SpdxOperator::Or => write!(f, "OR"),
        }
    }
}

/// A parsed SPDX license expression in canonical form.
///
/// Compound terms are flattened (an `OR` never directly contains another `OR`)
/// and deduplicated, so two expressions that differ only in term order or
/// repetition compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpdxExpression {
    License {
        id: String,
        exception: Option<String>,
    },
    Compound {
        operator: SpdxOperator,
        terms: BTreeSet<SpdxExpression>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpdxParseError {
    #[error("empty license expression")]
    Empty,
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("invalid license identifier `{0}`")]
    InvalidIdentifier(String),
}

impl SpdxExpression {
    pub fn license(id: impl Into<String>) -> Self {
        SpdxExpression::License {
            id: id.into(),
            exception: None,
        }
    }

    pub fn noassertion() -> Self {
        SpdxExpression::license(NOASSERTION)
    }

    /// Combine expressions with `operator`, flattening nested terms of the same
    /// operator. Returns `None` for an empty input.
    pub fn combine(
        operator: SpdxOperator,
        expressions: impl IntoIterator<Item = SpdxExpression>,
    ) -> Option<SpdxExpression> {
        let mut terms = BTreeSet::new();
        for expression in expressions {
            match expression {
                SpdxExpression::Compound {
                    operator: inner,
                    terms: inner_terms,
                } if inner == operator => terms.extend(inner_terms),
                other => {
                    terms.insert(other);
                }
            }
        }

        match terms.len() {
            0 => None,
            1 => terms.into_iter().next(),
            _ => Some(SpdxExpression::Compound { operator, terms }),
        }
    }

    /// Split into the top-level terms joined by `operator`, rendered as strings.
    pub fn decompose(&self, operator: SpdxOperator) -> Vec<String> {
        match self {
            SpdxExpression::Compound {
                operator: op,
                terms,
            } if *op == operator => terms.iter().map(ToString::to_string).collect(),
            other => vec![other.to_string()],
        }
    }

    /// All license identifiers referenced by the expression, exceptions excluded.
    pub fn license_ids(&self) -> BTreeSet<&str> {
        let mut ids = BTreeSet::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids<'a>(&'a self, ids: &mut BTreeSet<&'a str>) {
        match self {
            SpdxExpression::License { id, .. } => {
                ids.insert(id.as_str());
            }
            SpdxExpression::Compound { terms, .. } => {
                for term in terms {
                    term.collect_ids(ids);
                }
            }
        }
    }

    /// Fold the expression bottom-up. `leaf` maps a base license id (any `WITH`
    /// exception is ignored), `combine` merges two values under an operator.
    pub fn evaluate<T>(
        &self,
        leaf: &mut impl FnMut(&str) -> T,
        combine: &impl Fn(SpdxOperator, T, T) -> T,
    ) -> Option<T> {
        match self {
            SpdxExpression::License { id, .. } => Some(leaf(id)),
            SpdxExpression::Compound { operator, terms } => terms
                .iter()
                .filter_map(|t| t.evaluate(leaf, combine))
                .reduce(|acc, v| combine(*operator, acc, v)),
        }
    }

    /// Parse an SPDX expression. Identifiers are checked syntactically only;
    /// see [`is_known_id`] for vocabulary checks.
    pub fn parse(expr: &str) -> Result<SpdxExpression, SpdxParseError> {
        let tokens = tokenize(expr);
        if tokens.is_empty() {
            return Err(SpdxParseError::Empty);
        }
        let mut parser = ExprParser { tokens, pos: 0 };
        let expression = parser.parse_or()?;
        match parser.consume() {
            None => Ok(expression),
            Some(token) => Err(SpdxParseError::UnexpectedToken(token.to_string())),
        }
    }
}

impl fmt::Display for SpdxExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpdxExpression::License {
                id,
                exception: None,
            } => write!(f, "{id}"),
            SpdxExpression::License {
                id,
                exception: Some(exception),
            } => write!(f, "{id} WITH {exception}"),
            SpdxExpression::Compound { operator, terms } => {
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {operator} ")?;
                    }
                    match term {
                        SpdxExpression::Compound { .. } => write!(f, "({term})")?,
                        SpdxExpression::License { .. } => write!(f, "{term}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

impl FromStr for SpdxExpression {
    type Err = SpdxParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpdxExpression::parse(s)
    }
}

impl Serialize for SpdxExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SpdxExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SpdxExpression::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tokenizer and parser
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Clone)]
enum Token {
    Id(String),
    And,
    Or,
    With,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Id(s) => write!(f, "{s}"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::With => write!(f, "WITH"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

fn tokenize(expr: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '(' {
            tokens.push(Token::LParen);
            chars.next();
        } else if c == ')' {
            tokens.push(Token::RParen);
            chars.next();
        } else {
            let mut s = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '(' || c == ')' {
                    break;
                }
                s.push(c);
                chars.next();
            }
            let token = match s.as_str() {
                "AND" | "and" => Token::And,
                "OR" | "or" => Token::Or,
                "WITH" | "with" => Token::With,
                _ => Token::Id(s),
            };
            tokens.push(token);
        }
    }
    tokens
}

/// Recursive descent parser, AND binding tighter than OR:
///
/// ```text
/// or_expr  := and_expr ( "OR" and_expr )*
/// and_expr := atom ( "AND" atom )*
/// atom     := "(" or_expr ")" | id ( "WITH" id )?
/// ```
struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Result<SpdxExpression, SpdxParseError> {
        let mut terms = vec![self.parse_and()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.consume();
            terms.push(self.parse_and()?);
        }
        combine_parsed(SpdxOperator::Or, terms)
    }

    fn parse_and(&mut self) -> Result<SpdxExpression, SpdxParseError> {
        let mut terms = vec![self.parse_atom()?];
        while matches!(self.peek(), Some(Token::And)) {
            self.consume();
            terms.push(self.parse_atom()?);
        }
        combine_parsed(SpdxOperator::And, terms)
    }

    fn parse_atom(&mut self) -> Result<SpdxExpression, SpdxParseError> {
        match self.consume() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(SpdxParseError::UnexpectedToken(other.to_string())),
                    None => Err(SpdxParseError::UnexpectedEnd),
                }
            }
            Some(Token::Id(id)) => {
                check_identifier(&id)?;
                let exception = if matches!(self.peek(), Some(Token::With)) {
                    self.consume();
                    match self.consume() {
                        Some(Token::Id(exception)) => {
                            check_identifier(&exception)?;
                            Some(exception)
                        }
                        Some(other) => {
                            return Err(SpdxParseError::UnexpectedToken(other.to_string()))
                        }
                        None => return Err(SpdxParseError::UnexpectedEnd),
                    }
                } else {
                    None
                };
                Ok(SpdxExpression::License { id, exception })
            }
            Some(other) => Err(SpdxParseError::UnexpectedToken(other.to_string())),
            None => Err(SpdxParseError::UnexpectedEnd),
        }
    }
}

fn combine_parsed(
    operator: SpdxOperator,
    terms: Vec<SpdxExpression>,
) -> Result<SpdxExpression, SpdxParseError> {
    SpdxExpression::combine(operator, terms).ok_or(SpdxParseError::UnexpectedEnd)
}

fn check_identifier(id: &str) -> Result<(), SpdxParseError> {
    let valid = id
        .trim_end_matches('+')
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if valid && !id.is_empty() && id != "+" {
        Ok(())
    } else {
        Err(SpdxParseError::InvalidIdentifier(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

/// SPDX identifiers recognized as real licenses.
const KNOWN_IDS: &[&str] = &[
    "0BSD",
    "AFL-3.0",
    "AGPL-3.0",
    "AGPL-3.0-only",
    "AGPL-3.0-or-later",
    "Apache-1.1",
    "Apache-2.0",
    "APSL-2.0",
    "Artistic-2.0",
    "BlueOak-1.0.0",
    "BSD-1-Clause",
    "BSD-2-Clause",
    "BSD-3-Clause",
    "BSD-4-Clause",
    "BSL-1.0",
    "CC-BY-3.0",
    "CC-BY-4.0",
    "CC-BY-SA-4.0",
    "CC0-1.0",
    "CDDL-1.0",
    "CDDL-1.1",
    "EPL-1.0",
    "EPL-2.0",
    "EUPL-1.1",
    "EUPL-1.2",
    "GPL-2.0",
    "GPL-2.0-only",
    "GPL-2.0-or-later",
    "GPL-3.0",
    "GPL-3.0-only",
    "GPL-3.0-or-later",
    "ISC",
    "LGPL-2.0",
    "LGPL-2.0-only",
    "LGPL-2.0-or-later",
    "LGPL-2.1",
    "LGPL-2.1-only",
    "LGPL-2.1-or-later",
    "LGPL-3.0",
    "LGPL-3.0-only",
    "LGPL-3.0-or-later",
    "MIT",
    "MIT-0",
    "MPL-1.1",
    "MPL-2.0",
    "NCSA",
    "OpenSSL",
    "OSL-3.0",
    "PSF-2.0",
    "Python-2.0",
    "Unicode-3.0",
    "Unicode-DFS-2016",
    "Unlicense",
    "WTFPL",
    "X11",
    "Zlib",
];

/// Canonical spelling of a known SPDX identifier, matched case-insensitively.
/// A trailing `+` ("or later") is preserved.
pub fn canonical_id(id: &str) -> Option<String> {
    let (base, plus) = match id.strip_suffix('+') {
        Some(base) => (base, "+"),
        None => (id, ""),
    };
    if base.eq_ignore_ascii_case(NOASSERTION) || base.eq_ignore_ascii_case("NONE") {
        return Some(base.to_ascii_uppercase());
    }
    let prefix = "LicenseRef-";
    if base.len() > prefix.len()
        && base
            .get(..prefix.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(prefix))
    {
        return Some(format!("{prefix}{}{plus}", &base[prefix.len()..]));
    }
    KNOWN_IDS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(base))
        .map(|known| format!("{known}{plus}"))
}

pub fn is_known_id(id: &str) -> bool {
    canonical_id(id).is_some()
}

/// Map a common non-SPDX license name to its SPDX expression, if known.
pub fn synonym(raw: &str) -> Option<&'static str> {
    let lower = raw.trim().to_ascii_lowercase();
    let mapped = match lower.as_str() {
        "apache 2.0" | "apache2" | "apache-2" | "apache license 2.0"
        | "apache license, version 2.0" | "apache license version 2.0"
        | "the apache software license, version 2.0" => "Apache-2.0",
        "mit license" | "the mit license" | "mit/x11" | "expat" => "MIT",
        "bsd" | "bsd license" | "new bsd" | "modified bsd" | "bsd 3-clause"
        | "bsd-3" | "3-clause bsd" => "BSD-3-Clause",
        "bsd 2-clause" | "simplified bsd" | "freebsd" | "bsd-2" | "2-clause bsd" => {
            "BSD-2-Clause"
        }
        "gnu gpl v2" | "gnu general public license v2" | "gpl v2" | "gplv2" | "gpl-2" => {
            "GPL-2.0-only"
        }
        "gnu gpl v3" | "gnu general public license v3" | "gpl v3" | "gplv3" | "gpl-3" => {
            "GPL-3.0-only"
        }
        "gnu lgpl v2.1" | "lgpl v2.1" | "lgplv2.1" => "LGPL-2.1-only",
        "gnu lgpl v3" | "lgpl v3" | "lgplv3" => "LGPL-3.0-only",
        "mozilla public license 2.0" | "mpl 2.0" | "mplv2" | "mpl2" => "MPL-2.0",
        "isc license" => "ISC",
        "cc0" | "public domain" => "CC0-1.0",
        "agpl v3" | "agplv3" | "gnu agpl v3" => "AGPL-3.0-only",
        "boost" | "boost software license" => "BSL-1.0",
        "unlicensed" => "LicenseRef-unlicensed",
        _ => return None,
    };
    Some(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precedence() {
        let expr = SpdxExpression::parse("MIT OR GPL-3.0 AND BSD-3-Clause").unwrap();
        assert_eq!(expr.to_string(), "MIT OR (BSD-3-Clause AND GPL-3.0)");
    }

    #[test]
    fn test_parse_parentheses_and_with() {
        let expr =
            SpdxExpression::parse("(Apache-2.0 OR MIT) AND GPL-2.0 WITH Classpath-exception-2.0")
                .unwrap();
        assert_eq!(
            expr.to_string(),
            "GPL-2.0 WITH Classpath-exception-2.0 AND (Apache-2.0 OR MIT)"
        );
        assert_eq!(
            expr.license_ids().into_iter().collect::<Vec<_>>(),
            vec!["Apache-2.0", "GPL-2.0", "MIT"]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(SpdxExpression::parse("  "), Err(SpdxParseError::Empty));
        assert!(SpdxExpression::parse("MIT OR").is_err());
        assert!(SpdxExpression::parse("(MIT").is_err());
        assert!(SpdxExpression::parse("Apache License").is_err());
        assert!(SpdxExpression::parse("MIT, Apache").is_err());
    }

    #[test]
    fn test_combine_flattens_and_dedups() {
        let inner = SpdxExpression::parse("MIT OR Apache-2.0").unwrap();
        let combined = SpdxExpression::combine(
            SpdxOperator::Or,
            [inner, SpdxExpression::license("MIT"), SpdxExpression::license("ISC")],
        )
        .unwrap();
        assert_eq!(combined.to_string(), "Apache-2.0 OR ISC OR MIT");
        assert_eq!(combined.decompose(SpdxOperator::Or).len(), 3);
        assert_eq!(combined.decompose(SpdxOperator::And).len(), 1);
        assert!(SpdxExpression::combine(SpdxOperator::And, []).is_none());
    }

    #[test]
    fn test_roundtrip_through_display() {
        let expr = SpdxExpression::parse("(MIT AND ISC) OR Zlib").unwrap();
        let reparsed = SpdxExpression::parse(&expr.to_string()).unwrap();
        assert_eq!(expr, reparsed);
    }

    #[test]
    fn test_canonical_id() {
        assert_eq!(canonical_id("mit").as_deref(), Some("MIT"));
        assert_eq!(canonical_id("apache-2.0").as_deref(), Some("Apache-2.0"));
        assert_eq!(canonical_id("GPL-2.0+").as_deref(), Some("GPL-2.0+"));
        assert_eq!(
            canonical_id("licenseref-foo").as_deref(),
            Some("LicenseRef-foo")
        );
        assert_eq!(canonical_id("noassertion").as_deref(), Some(NOASSERTION));
        assert!(canonical_id("CUSTOM-LICENSE").is_none());
    }

    #[test]
    fn test_synonym() {
        assert_eq!(synonym("MIT License"), Some("MIT"));
        assert_eq!(synonym("Apache License 2.0"), Some("Apache-2.0"));
        assert_eq!(synonym("  public domain "), Some("CC0-1.0"));
        assert_eq!(synonym("Apache-2.0"), None);
    }
}
