//! Artifact provenance: maps a package's source descriptor (registry coordinate,
//! archive URL, git reference, local path) to a [`RemoteArtifact`].
//!
//! Failing to recognize a descriptor is never an error; it resolves to
//! [`RemoteArtifact::EMPTY`]. Integrity hashes are best-effort metadata looked
//! up in a [`ChecksumTable`] built from a lockfile.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::{Hash, RemoteArtifact, VcsInfo, VcsType};

/// Parsed form of a package source descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Coordinate in a package index, e.g. `registry+https://github.com/rust-lang/crates.io-index`.
    Registry { index: String },
    /// Direct download URL of a package archive.
    Archive { url: String },
    /// Git repository pinned to a resolved commit.
    Git { url: String, revision: String },
    /// Local filesystem path.
    Path { path: PathBuf },
    Unknown,
}

fn git_source_regex() -> Option<&'static Regex> {
    static GIT_SOURCE: OnceLock<Option<Regex>> = OnceLock::new();
    GIT_SOURCE
        .get_or_init(|| {
            // The ref name (rev/tag/branch) is dropped; only the resolved commit is kept.
            Regex::new(
                r"^(?:git\+)?(?P<url>(?:git|https?|ssh|file)://[^?#]+)(?:\?(?:rev|tag|branch)=[^#]*)?#(?P<rev>[0-9a-fA-F]{7,64})$",
            )
            .ok()
        })
        .as_ref()
}

impl SourceDescriptor {
    pub fn parse(descriptor: &str) -> Self {
        let descriptor = descriptor.trim();

        if let Some(index) = descriptor
            .strip_prefix("registry+")
            .or_else(|| descriptor.strip_prefix("sparse+"))
        {
            return SourceDescriptor::Registry {
                index: index.to_string(),
            };
        }

        if descriptor.starts_with("git+") || descriptor.starts_with("git://") {
            return git_source_regex()
                .and_then(|re| re.captures(descriptor))
                .map(|caps| SourceDescriptor::Git {
                    url: caps["url"].to_string(),
                    revision: caps["rev"].to_ascii_lowercase(),
                })
                .unwrap_or(SourceDescriptor::Unknown);
        }

        if let Some(path) = descriptor
            .strip_prefix("path+file://")
            .or_else(|| descriptor.strip_prefix("file:"))
        {
            return SourceDescriptor::Path {
                path: PathBuf::from(path),
            };
        }

        let is_http = descriptor.starts_with("https://") || descriptor.starts_with("http://");
        let is_archive = [".tgz", ".tar.gz", ".crate", ".zip"]
            .iter()
            .any(|ext| descriptor.ends_with(ext));
        if is_http && is_archive {
            return SourceDescriptor::Archive {
                url: descriptor.to_string(),
            };
        }

        SourceDescriptor::Unknown
    }

    /// VCS coordinates for git sources.
    pub fn vcs_info(&self) -> Option<VcsInfo> {
        match self {
            SourceDescriptor::Git { url, revision } => Some(VcsInfo {
                vcs_type: VcsType::Git,
                url: url.clone(),
                revision: revision.clone(),
                path: String::new(),
            }),
            _ => None,
        }
    }
}

/// Known download URL scheme of an ecosystem's default registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryScheme {
    CratesIo,
    Npm,
}

impl RegistryScheme {
    pub fn default_index(self) -> &'static str {
        match self {
            RegistryScheme::CratesIo => "https://github.com/rust-lang/crates.io-index",
            RegistryScheme::Npm => "https://registry.npmjs.org",
        }
    }

    pub fn is_default_index(self, index: &str) -> bool {
        let index = index.trim_end_matches('/');
        match self {
            RegistryScheme::CratesIo => {
                index == "https://github.com/rust-lang/crates.io-index"
                    || index == "https://index.crates.io"
            }
            RegistryScheme::Npm => {
                index == "https://registry.npmjs.org" || index == "https://registry.yarnpkg.com"
            }
        }
    }

    /// Deterministic download URL for `name` at `version`.
    pub fn download_url(self, name: &str, version: &str) -> String {
        match self {
            RegistryScheme::CratesIo => {
                format!("https://crates.io/api/v1/crates/{name}/{version}/download")
            }
            RegistryScheme::Npm => {
                let base = name.rsplit('/').next().unwrap_or(name);
                format!("https://registry.npmjs.org/{name}/-/{base}-{version}.tgz")
            }
        }
    }
}

/// Integrity hashes keyed by `"<name> <version> (<source-descriptor>)"`.
#[derive(Debug, Clone, Default)]
pub struct ChecksumTable {
    entries: HashMap<String, Hash>,
}

impl ChecksumTable {
    pub fn key(name: &str, version: &str, source: &str) -> String {
        format!("{name} {version} ({source})")
    }

    pub fn insert(&mut self, key: impl Into<String>, hash: Hash) {
        if !hash.is_none() {
            self.entries.insert(key.into(), hash);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Hash> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve the source artifact of `name`@`version` from its source descriptor.
pub fn resolve_source_artifact(
    name: &str,
    version: &str,
    descriptor: &str,
    scheme: RegistryScheme,
    checksums: &ChecksumTable,
) -> RemoteArtifact {
    let known_hash = || {
        checksums
            .get(&ChecksumTable::key(name, version, descriptor))
            .cloned()
            .unwrap_or(Hash::NONE)
    };

    match SourceDescriptor::parse(descriptor) {
        SourceDescriptor::Registry { index } if scheme.is_default_index(&index) => {
            RemoteArtifact::new(scheme.download_url(name, version), known_hash())
        }
        SourceDescriptor::Registry { index } => {
            tracing::debug!("No download URL scheme known for registry {}", index);
            RemoteArtifact::EMPTY
        }
        SourceDescriptor::Archive { url } => RemoteArtifact::new(url, known_hash()),
        SourceDescriptor::Git { url, revision } => {
            RemoteArtifact::new(url, Hash::from_hex(&revision))
        }
        SourceDescriptor::Path { .. } | SourceDescriptor::Unknown => RemoteArtifact::EMPTY,
    }
}
