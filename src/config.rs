use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::analyzer::ManagerKind;
use crate::license::classifier::{builtin_sets, LicenseCategory, LicenseClassifications};

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub analyzer: AnalyzerConfig,
    /// Pairwise-disjoint classification sets, checked when the file was loaded.
    pub classifications: LicenseClassifications,
    pub policy: PolicyConfig,
}

/// Configuration as written in `.depgraph-checkr/config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    /// Replaces the built-in classification sets when present.
    pub classifications: Option<ClassificationsConfig>,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// Maximum number of definition files resolved at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_managers")]
    pub enabled_managers: Vec<ManagerKind>,
}

fn default_concurrency() -> usize {
    4
}

fn default_managers() -> Vec<ManagerKind> {
    ManagerKind::ALL.to_vec()
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            concurrency: default_concurrency(),
            enabled_managers: default_managers(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClassificationsConfig {
    #[serde(default)]
    pub public_domain: BTreeSet<String>,
    #[serde(default)]
    pub permissive: BTreeSet<String>,
    #[serde(default)]
    pub copyleft_limited: BTreeSet<String>,
    #[serde(default)]
    pub copyleft: BTreeSet<String>,
}

impl ClassificationsConfig {
    fn into_sets(self) -> Vec<(LicenseCategory, BTreeSet<String>)> {
        vec![
            (LicenseCategory::PublicDomain, self.public_domain),
            (LicenseCategory::Permissive, self.permissive),
            (LicenseCategory::CopyleftLimited, self.copyleft_limited),
            (LicenseCategory::Copyleft, self.copyleft),
        ]
    }
}

/// Defines how licenses are evaluated.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PolicyConfig {
    /// Verdict for licenses that are neither listed in `licenses` nor classified.
    #[serde(default = "default_policy_action")]
    pub default: PolicyAction,
    #[serde(default)]
    pub categories: CategoryActions,
    /// Per-license overrides keyed by SPDX identifier (e.g. `"MIT"`, `"GPL-3.0-only"`).
    #[serde(default)]
    pub licenses: HashMap<String, PolicyAction>,
}

fn default_policy_action() -> PolicyAction {
    PolicyAction::Warn
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            default: default_policy_action(),
            categories: CategoryActions::default(),
            licenses: HashMap::new(),
        }
    }
}

/// Verdict per license category.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CategoryActions {
    #[serde(default = "pass")]
    pub public_domain: PolicyAction,
    #[serde(default = "pass")]
    pub permissive: PolicyAction,
    #[serde(default = "warn")]
    pub copyleft_limited: PolicyAction,
    #[serde(default = "error")]
    pub copyleft: PolicyAction,
}

fn pass() -> PolicyAction {
    PolicyAction::Pass
}

fn warn() -> PolicyAction {
    PolicyAction::Warn
}

fn error() -> PolicyAction {
    PolicyAction::Error
}

impl Default for CategoryActions {
    /// Permissive and public-domain licenses pass, weak copyleft warns and
    /// strong copyleft is an error.
    fn default() -> Self {
        CategoryActions {
            public_domain: pass(),
            permissive: pass(),
            copyleft_limited: warn(),
            copyleft: error(),
        }
    }
}

impl CategoryActions {
    pub fn get(&self, category: LicenseCategory) -> PolicyAction {
        match category {
            LicenseCategory::PublicDomain => self.public_domain,
            LicenseCategory::Permissive => self.permissive,
            LicenseCategory::CopyleftLimited => self.copyleft_limited,
            LicenseCategory::Copyleft => self.copyleft,
        }
    }
}

/// The action to take when a license matches a policy rule.
///
/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Compliant; no action needed.
    Pass,
    /// Warrants review but does not fail the run.
    Warn,
    /// Violates policy; the CLI exits with code 1.
    Error,
}

impl ConfigFile {
    /// Validate the classification sets.
    pub fn validate(self) -> Result<Config> {
        let sets = match self.classifications {
            Some(custom) => custom.into_sets(),
            None => builtin_sets(),
        };
        let classifications =
            LicenseClassifications::new(sets).context("invalid license classifications")?;

        if self.analyzer.concurrency == 0 {
            anyhow::bail!("analyzer.concurrency must be at least 1");
        }

        Ok(Config {
            analyzer: self.analyzer,
            classifications,
            policy: self.policy,
        })
    }
}

impl Config {
    /// Built-in defaults used when no config file is found.
    pub fn builtin() -> Result<Config> {
        ConfigFile::default().validate()
    }
}

fn read_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let file: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    tracing::debug!("Loaded configuration from {}", path.display());
    file.validate()
        .with_context(|| format!("invalid config {}", path.display()))
}

/// Load the configuration, searching in order:
///
/// 1. `config_override`, the path passed via `--config`
/// 2. `<project_path>/.depgraph-checkr/config.toml`
/// 3. `~/.config/depgraph-checkr/config.toml`
/// 4. Built-in [`Config::builtin`]
pub fn load_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return read_config_file(path);
    }

    let project_config = project_path.join(".depgraph-checkr").join("config.toml");
    if project_config.exists() {
        return read_config_file(&project_config);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home
            .join(".config")
            .join("depgraph-checkr")
            .join("config.toml");
        if home_config.exists() {
            return read_config_file(&home_config);
        }
    }

    Config::builtin()
}
