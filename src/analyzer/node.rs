use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::scratch::ScratchDir;
use super::{
    parse_author, validated, working_dir, AnalyzerContext, ManagerKind, PackageManager,
    ResolutionError, MAX_DEPTH,
};
use crate::artifact::{resolve_source_artifact, ChecksumTable, RegistryScheme, SourceDescriptor};
use crate::license::processor::process;
use crate::license::spdx::SpdxOperator;
use crate::models::{
    Hash, Identifier, Package, PackageLinkage, PackageReference, Project, ProjectAnalyzerResult,
    RemoteArtifact, Scope, VcsInfo,
};
use crate::process::display_command;

const ID_TYPE: &str = "NPM";
const MODULES_DIR: &str = "node_modules";

/// One `npm ls` pass per scope.
///
/// npm 7 and later print only the top level unless `--all` is given, and
/// `--include=dev` lists production dependencies too, so the development pass
/// keeps only the top-level entries the manifest names in `devDependencies`.
struct ListingPass {
    scope: &'static str,
    args: [&'static str; 4],
    dev_only: bool,
}

const PASSES: [ListingPass; 2] = [
    ListingPass {
        scope: "dependencies",
        args: ["ls", "--json", "--all", "--omit=dev"],
        dev_only: false,
    },
    ListingPass {
        scope: "devDependencies",
        args: ["ls", "--json", "--all", "--include=dev"],
        dev_only: true,
    },
];

// ---------------------------------------------------------------------------
// package.json
// ---------------------------------------------------------------------------

/// The fields of a `package.json` we care about. Several of them come in more
/// than one shape, so they stay untyped until read.
#[derive(Debug, Default, Deserialize)]
struct Manifest {
    name: Option<String>,
    version: Option<String>,
    license: Option<Value>,
    licenses: Option<Value>,
    description: Option<String>,
    homepage: Option<String>,
    repository: Option<Value>,
    author: Option<Value>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, Value>,
    #[serde(rename = "_resolved")]
    resolved: Option<String>,
    #[serde(rename = "_integrity")]
    integrity: Option<String>,
}

impl Manifest {
    fn read(path: &Path) -> Result<Self, ResolutionError> {
        let unreadable = |message: String| ResolutionError::ManifestUnreadable {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))
    }

    /// `license` as a string or `{ "type": ... }`, plus the legacy `licenses` array.
    fn declared_licenses(&self) -> BTreeSet<String> {
        let mut licenses = BTreeSet::new();
        if let Some(license) = self.license.as_ref().and_then(license_name) {
            licenses.insert(license);
        }
        if let Some(Value::Array(entries)) = &self.licenses {
            licenses.extend(entries.iter().filter_map(license_name));
        }
        licenses
    }

    fn authors(&self) -> BTreeSet<String> {
        let raw = match &self.author {
            Some(Value::String(s)) => Some(s.as_str()),
            Some(Value::Object(o)) => o.get("name").and_then(Value::as_str),
            _ => None,
        };
        raw.and_then(parse_author).into_iter().collect()
    }

    /// `repository` as a string or `{ "url": ..., "directory": ... }`.
    fn vcs(&self) -> VcsInfo {
        match &self.repository {
            Some(Value::String(url)) => VcsInfo::from_url(url),
            Some(Value::Object(o)) => {
                let mut vcs = VcsInfo::from_url(o.get("url").and_then(Value::as_str).unwrap_or_default());
                if let Some(directory) = o.get("directory").and_then(Value::as_str) {
                    vcs.path = directory.to_string();
                }
                vcs
            }
            _ => VcsInfo::EMPTY,
        }
    }
}

fn license_name(value: &Value) -> Option<String> {
    let name = match value {
        Value::String(s) => s.as_str(),
        Value::Object(o) => o.get("type").and_then(Value::as_str)?,
        _ => return None,
    };
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Split `@scope/name` into namespace and name.
fn split_name(full_name: &str) -> (&str, &str) {
    match full_name.split_once('/') {
        Some((scope, name)) if scope.starts_with('@') => (scope, name),
        _ => ("", full_name),
    }
}

fn npm_identifier(full_name: &str, version: &str) -> Identifier {
    let (namespace, name) = split_name(full_name);
    Identifier::new(ID_TYPE, namespace, name, version)
}

// ---------------------------------------------------------------------------
// npm ls --json
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct Listing {
    #[serde(default)]
    dependencies: BTreeMap<String, ListedDependency>,
}

#[derive(Debug, Default, Deserialize)]
struct ListedDependency {
    version: Option<String>,
    resolved: Option<String>,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    dependencies: BTreeMap<String, ListedDependency>,
}

// ---------------------------------------------------------------------------
// package-lock.json
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PackageLock {
    #[serde(default)]
    packages: BTreeMap<String, LockedPackage>,
}

#[derive(Debug, Deserialize)]
struct LockedPackage {
    name: Option<String>,
    version: Option<String>,
    resolved: Option<String>,
    integrity: Option<String>,
}

/// Integrity hashes from the `packages` map of `package-lock.json`.
fn read_integrity(lockfile: &Path) -> ChecksumTable {
    let mut table = ChecksumTable::default();
    if !lockfile.is_file() {
        tracing::debug!("No {} found, relying on module manifests for integrity", lockfile.display());
        return table;
    }

    let lock: PackageLock = match std::fs::read_to_string(lockfile)
        .map_err(|e| e.to_string())
        .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
    {
        Ok(lock) => lock,
        Err(e) => {
            tracing::warn!("Ignoring unreadable {}: {}", lockfile.display(), e);
            return table;
        }
    };

    for (path, entry) in &lock.packages {
        let Some(module_name) = path.rsplit_once("node_modules/").map(|(_, name)| name) else {
            continue;
        };
        let name = entry.name.as_deref().unwrap_or(module_name);
        if let (Some(version), Some(resolved), Some(integrity)) =
            (&entry.version, &entry.resolved, &entry.integrity)
        {
            if let Some(hash) = Hash::from_sri(integrity) {
                table.insert(ChecksumTable::key(name, version, resolved), hash);
            }
        }
    }
    table
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolver for npm projects: installs into a scratch `node_modules`, lists the
/// installed tree per scope and reads every module's own manifest.
pub struct NpmResolver {
    ctx: AnalyzerContext,
}

impl NpmResolver {
    pub fn new(ctx: AnalyzerContext) -> Self {
        Self { ctx }
    }

    fn install(&self, project_dir: &Path) -> Result<(), ResolutionError> {
        if project_dir.join("yarn.lock").is_file() {
            tracing::debug!("Installing {} with yarn", project_dir.display());
            self.ctx.run_checked(
                project_dir,
                "yarn",
                &[
                    "install",
                    "--ignore-scripts",
                    "--frozen-lockfile",
                    "--non-interactive",
                ],
            )?;
        } else {
            tracing::debug!("Installing {} with npm", project_dir.display());
            self.ctx
                .run_checked(project_dir, "npm", &["install", "--ignore-scripts"])?;
        }
        Ok(())
    }

    /// `npm ls` exits non-zero for problems such as extraneous or missing
    /// optional modules while still printing the tree.
    fn list(&self, project_dir: &Path, args: &[&str]) -> Result<Listing, ResolutionError> {
        let output = self.ctx.run(project_dir, "npm", args)?;
        let command = display_command("npm", args);

        if output.stdout.trim().is_empty() {
            return Err(ResolutionError::ToolInvocationFailed {
                command,
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        if !output.success() {
            tracing::warn!(
                "`{}` exited with code {}, using its output anyway",
                command,
                output.exit_code
            );
        }

        serde_json::from_str(&output.stdout).map_err(|e| ResolutionError::MalformedOutput {
            command,
            message: e.to_string(),
        })
    }
}

impl PackageManager for NpmResolver {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Npm
    }

    fn definition_file_globs(&self) -> &'static [&'static str] {
        &["package.json"]
    }

    fn command(&self) -> &'static str {
        "npm"
    }

    fn context(&self) -> &AnalyzerContext {
        &self.ctx
    }

    fn resolve_dependencies(
        &self,
        definition_file: &Path,
    ) -> Result<ProjectAnalyzerResult, ResolutionError> {
        let manifest = Manifest::read(definition_file)?;
        let project_dir = working_dir(definition_file);
        let project_dir = std::fs::canonicalize(&project_dir).unwrap_or(project_dir);

        let full_name = manifest.name.clone().unwrap_or_else(|| {
            project_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let project_id = npm_identifier(&full_name, manifest.version.as_deref().unwrap_or_default());

        // Held until the end of this function; dropping it deletes the
        // installed modules on every exit path.
        let _modules = ScratchDir::acquire(project_dir.join(MODULES_DIR))?;
        self.install(&project_dir)?;

        let mut walker = TreeWalker {
            ctx: &self.ctx,
            project_dir: &project_dir,
            integrity: read_integrity(&project_dir.join("package-lock.json")),
            path: vec![project_id.clone()],
            max_depth: MAX_DEPTH,
            expanded: HashMap::new(),
            packages: BTreeMap::new(),
        };

        let mut scopes = BTreeSet::new();
        for pass in &PASSES {
            let listing = self.list(&project_dir, &pass.args)?;
            let mut references = BTreeSet::new();
            for (name, listed) in &listing.dependencies {
                if pass.dev_only && !manifest.dev_dependencies.contains_key(name) {
                    continue;
                }
                if let Some(reference) = walker.reference(name, listed, &project_dir, &project_dir)? {
                    references.insert(reference);
                }
            }
            scopes.insert(Scope::new(pass.scope, references));
        }

        let declared = manifest.declared_licenses();
        let vcs = manifest.vcs();
        let project = Project {
            id: project_id,
            definition_file_path: self.ctx.relative_path(definition_file),
            authors: manifest.authors(),
            declared_licenses_processed: process(&declared, SpdxOperator::And),
            declared_licenses: declared,
            vcs_processed: vcs.normalized(),
            vcs,
            homepage_url: manifest.homepage.clone().unwrap_or_default(),
            scopes,
        };

        let result = ProjectAnalyzerResult {
            project,
            packages: walker.packages.into_values().collect(),
        };
        validated(definition_file, result)
    }
}

/// Walks a listed tree, reading each installed module's manifest.
struct TreeWalker<'a> {
    ctx: &'a AnalyzerContext,
    project_dir: &'a Path,
    integrity: ChecksumTable,
    path: Vec<Identifier>,
    max_depth: usize,
    /// Fully expanded references, reused for deduplicated listing entries.
    expanded: HashMap<Identifier, PackageReference>,
    packages: BTreeMap<Identifier, Package>,
}

impl TreeWalker<'_> {
    /// Reference for one listed module, looked up from `requester_dir` without
    /// leaving `boundary`.
    fn reference(
        &mut self,
        name: &str,
        listed: &ListedDependency,
        requester_dir: &Path,
        boundary: &Path,
    ) -> Result<Option<PackageReference>, ResolutionError> {
        let version = match listed.version.as_deref() {
            Some(version) if !listed.missing => version,
            _ if listed.optional => {
                tracing::debug!("Skipping optional dependency {} which is not installed", name);
                return Ok(None);
            }
            _ => {
                return Err(ResolutionError::DependencyNotInstalled {
                    path: requester_dir.to_path_buf(),
                    name: name.to_string(),
                })
            }
        };
        let id = npm_identifier(name, version);

        if listed.dependencies.is_empty() {
            if let Some(done) = self.expanded.get(&id) {
                return Ok(Some(done.clone()));
            }
        }

        let module_dir = locate_module(requester_dir, boundary, name).ok_or_else(|| {
            ResolutionError::ManifestUnreadable {
                path: requester_dir.join(MODULES_DIR).join(name).join("package.json"),
                message: "module is listed but not installed".to_string(),
            }
        })?;
        // Node resolves from the real location of a linked module.
        let real_dir = std::fs::canonicalize(&module_dir).unwrap_or_else(|_| module_dir.clone());
        let linkage = self.linkage(listed.resolved.as_deref(), &real_dir);

        if self.path.contains(&id) {
            if linkage.is_project() {
                return Ok(Some(PackageReference::new(id, linkage)));
            }
            let mut cycle: Vec<String> = self
                .path
                .iter()
                .skip_while(|p| **p != id)
                .map(|p| p.to_string())
                .collect();
            cycle.push(id.to_string());
            return Err(ResolutionError::CyclicGraphDetected { cycle });
        }

        if self.path.len() >= self.max_depth {
            return Err(ResolutionError::UnsupportedTopology {
                path: module_dir,
                reason: format!("dependency tree deeper than {} levels", self.max_depth),
            });
        }

        if !linkage.is_project() && !self.packages.contains_key(&id) {
            let manifest = Manifest::read(&module_dir.join("package.json"))?;
            let package = self.build_package(&id, name, version, listed, &manifest);
            self.packages.insert(id.clone(), package);
        }

        // A module linked from outside the project only sees its own modules.
        let child_boundary = if real_dir.starts_with(self.project_dir) {
            self.project_dir.to_path_buf()
        } else {
            real_dir.clone()
        };

        self.path.push(id.clone());
        let mut dependencies = BTreeSet::new();
        for (child_name, child) in &listed.dependencies {
            if let Some(reference) = self.reference(child_name, child, &real_dir, &child_boundary)? {
                dependencies.insert(reference);
            }
        }
        self.path.pop();

        let reference = PackageReference::new(id.clone(), linkage).with_dependencies(dependencies);
        self.expanded.insert(id, reference.clone());
        Ok(Some(reference))
    }

    /// `file:` modules whose real location is inside the analysis root are
    /// sub-projects. npm reports `resolved` relative to `node_modules`, so the
    /// installed link target is what gets checked.
    fn linkage(&self, resolved: Option<&str>, real_dir: &Path) -> PackageLinkage {
        match resolved.map(SourceDescriptor::parse) {
            Some(SourceDescriptor::Path { .. }) if self.ctx.is_inside_root(real_dir) => {
                PackageLinkage::ProjectDynamic
            }
            _ => PackageLinkage::Dynamic,
        }
    }

    fn build_package(
        &self,
        id: &Identifier,
        name: &str,
        version: &str,
        listed: &ListedDependency,
        manifest: &Manifest,
    ) -> Package {
        let declared = manifest.declared_licenses();
        let descriptor = manifest
            .resolved
            .as_deref()
            .or(listed.resolved.as_deref())
            .unwrap_or_default();

        let mut source_artifact = resolve_source_artifact(
            name,
            version,
            descriptor,
            RegistryScheme::Npm,
            &self.integrity,
        );
        if !source_artifact.is_empty() && source_artifact.hash.is_none() {
            if let Some(hash) = manifest.integrity.as_deref().and_then(Hash::from_sri) {
                source_artifact.hash = hash;
            }
        }

        let vcs = SourceDescriptor::parse(descriptor)
            .vcs_info()
            .unwrap_or_else(|| manifest.vcs());

        Package {
            id: id.clone(),
            authors: manifest.authors(),
            declared_licenses_processed: process(&declared, SpdxOperator::And),
            declared_licenses: declared,
            description: manifest.description.clone().unwrap_or_default(),
            homepage_url: manifest.homepage.clone().unwrap_or_default(),
            vcs_processed: vcs.normalized(),
            vcs,
            binary_artifact: RemoteArtifact::EMPTY,
            source_artifact,
        }
    }
}

/// Node's module lookup: the nearest `node_modules/<name>` from `from_dir`
/// outward, never above `boundary`.
fn locate_module(from_dir: &Path, boundary: &Path, name: &str) -> Option<PathBuf> {
    from_dir
        .ancestors()
        .take_while(|dir| dir.starts_with(boundary))
        .filter(|dir| dir.file_name().is_some_and(|n| n != MODULES_DIR))
        .map(|dir| dir.join(MODULES_DIR).join(name))
        .find(|candidate| candidate.join("package.json").is_file())
}
