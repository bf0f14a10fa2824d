//! Canonical, ecosystem-agnostic dependency model.
//!
//! Every resolver in [`crate::analyzer`] translates its native tool output into
//! these types. Collections are ordered sets so that output is deterministic and
//! structurally comparable across runs.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::license::processor::ProcessedDeclaredLicense;

/// Stable cross-ecosystem key of a project or package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    /// Ecosystem name, e.g. `Crate`, `NPM`, `Cargo`.
    #[serde(rename = "type")]
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl Identifier {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Identifier {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.kind, self.namespace, self.name, self.version
        )
    }
}

/// How a dependency binds to its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageLinkage {
    Dynamic,
    Static,
    /// Path dependency inside the analyzed repository, treated as a sub-project.
    ProjectDynamic,
    /// Path dependency inside the analyzed repository, treated as a sub-project.
    ProjectStatic,
}

impl PackageLinkage {
    /// `true` for the `PROJECT_*` variants.
    pub fn is_project(self) -> bool {
        matches!(self, PackageLinkage::ProjectDynamic | PackageLinkage::ProjectStatic)
    }
}

impl fmt::Display for PackageLinkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageLinkage::Dynamic => write!(f, "dynamic"),
            PackageLinkage::Static => write!(f, "static"),
            PackageLinkage::ProjectDynamic => write!(f, "project-dynamic"),
            PackageLinkage::ProjectStatic => write!(f, "project-static"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Infer the algorithm from the length of a hex digest.
    pub fn from_hex_len(value: &str) -> Option<Self> {
        match value.len() {
            40 => Some(HashAlgorithm::Sha1),
            64 => Some(HashAlgorithm::Sha256),
            96 => Some(HashAlgorithm::Sha384),
            128 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Parse the algorithm prefix of a subresource-integrity string (`sha512-...`).
    pub fn from_sri_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "sha1" => Some(HashAlgorithm::Sha1),
            "sha256" => Some(HashAlgorithm::Sha256),
            "sha384" => Some(HashAlgorithm::Sha384),
            "sha512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha1 => write!(f, "SHA-1"),
            HashAlgorithm::Sha256 => write!(f, "SHA-256"),
            HashAlgorithm::Sha384 => write!(f, "SHA-384"),
            HashAlgorithm::Sha512 => write!(f, "SHA-512"),
        }
    }
}

/// Integrity hash of an artifact. Both parts are optional; [`Hash::NONE`] means unknown.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash {
    pub algorithm: Option<HashAlgorithm>,
    pub value: Option<String>,
}

impl Hash {
    pub const NONE: Hash = Hash {
        algorithm: None,
        value: None,
    };

    /// Build a hash from a hex digest, inferring the algorithm from its length.
    pub fn from_hex(value: &str) -> Self {
        let value = value.trim().to_ascii_lowercase();
        if value.is_empty() {
            return Hash::NONE;
        }
        Hash {
            algorithm: HashAlgorithm::from_hex_len(&value),
            value: Some(value),
        }
    }

    /// Convert an SRI integrity string such as `sha512-<base64>` to a hex hash.
    ///
    /// Only the first of several space-separated integrity values is used.
    pub fn from_sri(integrity: &str) -> Option<Self> {
        let first = integrity.split_whitespace().next()?;
        let (prefix, encoded) = first.split_once('-')?;
        let algorithm = HashAlgorithm::from_sri_prefix(prefix)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .ok()?;
        Some(Hash {
            algorithm: Some(algorithm),
            value: Some(hex::encode(bytes)),
        })
    }

    pub fn is_none(&self) -> bool {
        self.value.is_none()
    }
}

/// Location of a downloadable artifact. [`RemoteArtifact::EMPTY`] stands for "unknown".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteArtifact {
    pub url: String,
    pub hash: Hash,
}

impl RemoteArtifact {
    pub const EMPTY: RemoteArtifact = RemoteArtifact {
        url: String::new(),
        hash: Hash::NONE,
    };

    pub fn new(url: impl Into<String>, hash: Hash) -> Self {
        RemoteArtifact {
            url: url.into(),
            hash,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VcsType {
    Git,
    Unknown,
}

/// Version-control coordinates of a project or package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VcsInfo {
    #[serde(rename = "type")]
    pub vcs_type: VcsType,
    pub url: String,
    pub revision: String,
    pub path: String,
}

impl VcsInfo {
    pub const EMPTY: VcsInfo = VcsInfo {
        vcs_type: VcsType::Unknown,
        url: String::new(),
        revision: String::new(),
        path: String::new(),
    };

    /// VCS info for a repository URL as declared in a manifest.
    pub fn from_url(url: &str) -> Self {
        let url = url.trim();
        if url.is_empty() {
            return VcsInfo::EMPTY;
        }
        let vcs_type = if url.starts_with("git") || url.ends_with(".git") || url.contains("github.com") {
            VcsType::Git
        } else {
            VcsType::Unknown
        };
        VcsInfo {
            vcs_type,
            url: url.to_string(),
            revision: String::new(),
            path: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
    }

    /// Normalized copy: `git+` prefixes dropped, hosting shorthands expanded,
    /// trailing slashes removed.
    pub fn normalized(&self) -> Self {
        if self.is_empty() {
            return self.clone();
        }
        let mut url = self.url.trim().to_string();
        if let Some(rest) = url.strip_prefix("git+") {
            url = rest.to_string();
        }
        if let Some(rest) = url.strip_prefix("github:") {
            url = format!("https://github.com/{}.git", rest.trim_end_matches(".git"));
        } else if is_github_shorthand(&url) {
            url = format!("https://github.com/{url}.git");
        }
        while url.ends_with('/') {
            url.pop();
        }
        let vcs_type = if self.vcs_type == VcsType::Unknown && url.ends_with(".git") {
            VcsType::Git
        } else {
            self.vcs_type
        };
        VcsInfo {
            vcs_type,
            url,
            revision: self.revision.clone(),
            path: self.path.clone(),
        }
    }
}

/// `user/repo` with no scheme, host or further path segments.
fn is_github_shorthand(url: &str) -> bool {
    let mut parts = url.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(user), Some(repo), None)
            if !user.is_empty() && !repo.is_empty() && !user.contains(':') && !user.contains('.')
    )
}

/// One resolved, installable unit. Packages are identified by their [`Identifier`]:
/// equality and ordering consider `id` only, so a set never holds two packages
/// with the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: Identifier,
    pub authors: BTreeSet<String>,
    pub declared_licenses: BTreeSet<String>,
    pub declared_licenses_processed: ProcessedDeclaredLicense,
    pub description: String,
    pub homepage_url: String,
    pub vcs: VcsInfo,
    pub vcs_processed: VcsInfo,
    pub binary_artifact: RemoteArtifact,
    pub source_artifact: RemoteArtifact,
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Package {}

impl PartialOrd for Package {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Package {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

/// A node of a scope's dependency tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageReference {
    pub id: Identifier,
    pub linkage: PackageLinkage,
    pub dependencies: BTreeSet<PackageReference>,
}

impl PackageReference {
    pub fn new(id: Identifier, linkage: PackageLinkage) -> Self {
        PackageReference {
            id,
            linkage,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: BTreeSet<PackageReference>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Visit this reference and all of its transitive dependencies, depth first.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a PackageReference)) {
        f(self);
        for dep in &self.dependencies {
            dep.visit(f);
        }
    }
}

/// A named dependency root such as `dependencies` or `dev-dependencies`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub dependencies: BTreeSet<PackageReference>,
}

impl Scope {
    pub fn new(name: impl Into<String>, dependencies: BTreeSet<PackageReference>) -> Self {
        Scope {
            name: name.into(),
            dependencies,
        }
    }
}

/// The manager-local root of resolution, one per definition file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Project {
    pub id: Identifier,
    /// Path of the definition file relative to the analysis root.
    pub definition_file_path: PathBuf,
    pub authors: BTreeSet<String>,
    pub declared_licenses: BTreeSet<String>,
    pub declared_licenses_processed: ProcessedDeclaredLicense,
    pub vcs: VcsInfo,
    pub vcs_processed: VcsInfo,
    pub homepage_url: String,
    pub scopes: BTreeSet<Scope>,
}

impl Project {
    /// Every reference reachable from any scope, including repeated ones.
    pub fn references(&self) -> Vec<&PackageReference> {
        let mut refs = Vec::new();
        for scope in &self.scopes {
            for dep in &scope.dependencies {
                dep.visit(&mut |r| refs.push(r));
            }
        }
        refs
    }

    pub fn scope(&self, name: &str) -> Option<&Scope> {
        self.scopes.iter().find(|s| s.name == name)
    }
}

/// A resolver's complete output for one definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAnalyzerResult {
    pub project: Project,
    /// Non-project packages; path-local sub-projects are excluded.
    pub packages: BTreeSet<Package>,
}

impl ProjectAnalyzerResult {
    /// Check that every reachable reference is backed by a package, or is a
    /// path-local project that is absent from the package set.
    pub fn validate(&self) -> Result<(), String> {
        let ids: BTreeSet<&Identifier> = self.packages.iter().map(|p| &p.id).collect();

        for reference in self.project.references() {
            let known = ids.contains(&reference.id);
            match (reference.linkage.is_project(), known) {
                (false, false) => {
                    return Err(format!(
                        "reference to {} has no corresponding package",
                        reference.id
                    ));
                }
                (true, true) => {
                    return Err(format!(
                        "path-local project {} must not be listed as a package",
                        reference.id
                    ));
                }
                _ => {}
            }
        }

        if ids.contains(&self.project.id) {
            return Err(format!(
                "project {} is listed as its own package",
                self.project.id
            ));
        }

        Ok(())
    }
}

/// Repository-wide graph merged from all resolutions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerResult {
    pub projects: BTreeSet<Project>,
    pub packages: BTreeSet<Package>,
    /// Definition files whose resolution failed, with the rendered error.
    pub issues: BTreeMap<PathBuf, String>,
}

impl AnalyzerResult {
    /// Merge one resolution. Packages already known by identifier are kept as-is.
    pub fn add(&mut self, result: ProjectAnalyzerResult) {
        self.projects.insert(result.project);
        for package in result.packages {
            if !self.packages.contains(&package) {
                self.packages.insert(package);
            }
        }
    }

    pub fn add_issue(&mut self, definition_file: &Path, message: impl Into<String>) {
        self.issues
            .insert(definition_file.to_path_buf(), message.into());
    }

    pub fn package(&self, id: &Identifier) -> Option<&Package> {
        self.packages.iter().find(|p| &p.id == id)
    }
}
