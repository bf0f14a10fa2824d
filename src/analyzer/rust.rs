use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{
    parse_author, validated, working_dir, AnalyzerContext, ManagerKind, PackageManager,
    ResolutionError, MAX_DEPTH,
};
use crate::artifact::{resolve_source_artifact, ChecksumTable, RegistryScheme, SourceDescriptor};
use crate::license::processor::process_with_license_file;
use crate::license::spdx::SpdxOperator;
use crate::models::{
    Hash, Identifier, Package, PackageLinkage, PackageReference, Project, ProjectAnalyzerResult,
    RemoteArtifact, Scope, VcsInfo,
};

const PROJECT_TYPE: &str = "Cargo";
const PACKAGE_TYPE: &str = "Crate";

#[derive(Debug, Deserialize)]
struct CargoMetadata {
    packages: Vec<MetadataPackage>,
    resolve: Option<MetadataResolve>,
    workspace_root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct MetadataPackage {
    id: String,
    name: String,
    version: String,
    #[serde(default)]
    authors: Vec<String>,
    license: Option<String>,
    license_file: Option<String>,
    description: Option<String>,
    homepage: Option<String>,
    repository: Option<String>,
    /// `None` for path dependencies.
    source: Option<String>,
    manifest_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct MetadataResolve {
    nodes: Vec<ResolveNode>,
    root: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResolveNode {
    id: String,
    #[serde(default)]
    deps: Vec<NodeDep>,
}

#[derive(Debug, Deserialize)]
struct NodeDep {
    pkg: String,
    /// Missing in output of cargo versions before 1.41.
    #[serde(default)]
    dep_kinds: Vec<DepKindInfo>,
}

#[derive(Debug, Deserialize)]
struct DepKindInfo {
    kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DependencyKind {
    Normal,
    Dev,
    Build,
}

impl DependencyKind {
    const ALL: [DependencyKind; 3] = [
        DependencyKind::Normal,
        DependencyKind::Dev,
        DependencyKind::Build,
    ];

    fn parse(kind: Option<&str>) -> Option<Self> {
        match kind {
            None | Some("normal") => Some(DependencyKind::Normal),
            Some("dev") => Some(DependencyKind::Dev),
            Some("build") => Some(DependencyKind::Build),
            Some(_) => None,
        }
    }

    fn scope_name(self) -> &'static str {
        match self {
            DependencyKind::Normal => "dependencies",
            DependencyKind::Dev => "dev-dependencies",
            DependencyKind::Build => "build-dependencies",
        }
    }
}

impl NodeDep {
    /// Kinds of this edge; an untagged edge is a normal one.
    fn kinds(&self) -> Vec<DependencyKind> {
        if self.dep_kinds.is_empty() {
            return vec![DependencyKind::Normal];
        }
        self.dep_kinds
            .iter()
            .filter_map(|k| DependencyKind::parse(k.kind.as_deref()))
            .collect()
    }
}

/// Resolver for Cargo projects: one `cargo metadata` query for the whole
/// resolution graph, joined with checksums from `Cargo.lock`.
pub struct CargoResolver {
    ctx: AnalyzerContext,
}

impl CargoResolver {
    pub fn new(ctx: AnalyzerContext) -> Self {
        Self { ctx }
    }

    fn query_metadata(&self, definition_file: &Path) -> Result<CargoMetadata, ResolutionError> {
        let manifest = definition_file.to_string_lossy();
        let args = [
            "metadata",
            "--format-version",
            "1",
            "--manifest-path",
            manifest.as_ref(),
        ];
        let output = self
            .ctx
            .run_checked(&working_dir(definition_file), "cargo", &args)?;

        serde_json::from_str(&output.stdout).map_err(|e| ResolutionError::MalformedOutput {
            command: "cargo metadata".to_string(),
            message: e.to_string(),
        })
    }

    fn linkage_of(&self, package: &MetadataPackage) -> PackageLinkage {
        let is_path = package
            .source
            .as_deref()
            .map_or(true, |s| s.starts_with("path+"));
        let inside_root = package
            .manifest_path
            .parent()
            .is_some_and(|dir| self.ctx.is_inside_root(dir));

        if is_path && inside_root {
            PackageLinkage::ProjectStatic
        } else {
            PackageLinkage::Static
        }
    }
}

impl PackageManager for CargoResolver {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Cargo
    }

    fn definition_file_globs(&self) -> &'static [&'static str] {
        &["Cargo.toml"]
    }

    fn command(&self) -> &'static str {
        "cargo"
    }

    fn context(&self) -> &AnalyzerContext {
        &self.ctx
    }

    fn resolve_dependencies(
        &self,
        definition_file: &Path,
    ) -> Result<ProjectAnalyzerResult, ResolutionError> {
        let metadata = self.query_metadata(definition_file)?;

        let resolve = metadata
            .resolve
            .as_ref()
            .ok_or_else(|| ResolutionError::MalformedOutput {
                command: "cargo metadata".to_string(),
                message: "missing `resolve` section".to_string(),
            })?;
        let root_id = resolve
            .root
            .as_deref()
            .ok_or_else(|| ResolutionError::UnsupportedTopology {
                path: definition_file.to_path_buf(),
                reason: "virtual workspace without a root package".to_string(),
            })?;

        let packages: HashMap<&str, &MetadataPackage> = metadata
            .packages
            .iter()
            .map(|p| (p.id.as_str(), p))
            .collect();
        let nodes: HashMap<&str, &ResolveNode> =
            resolve.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        // Linkage is decided up front: it determines how cycles back into
        // path-local projects are represented.
        let mut linkage: HashMap<&str, PackageLinkage> = metadata
            .packages
            .iter()
            .map(|p| (p.id.as_str(), self.linkage_of(p)))
            .collect();
        linkage.insert(root_id, PackageLinkage::ProjectStatic);

        let lockfile = metadata.workspace_root.join("Cargo.lock");
        let checksums = match read_checksums(&lockfile) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!("Continuing without checksums: {}", e);
                ChecksumTable::default()
            }
        };

        let graph = Graph {
            packages,
            nodes,
            linkage,
            checksums,
        };
        let root = graph.package(root_id)?;
        let root_node = graph.node(root_id)?;

        let mut direct: BTreeMap<DependencyKind, BTreeSet<&str>> = BTreeMap::new();
        for dep in &root_node.deps {
            for kind in dep.kinds() {
                direct.entry(kind).or_default().insert(dep.pkg.as_str());
            }
        }

        let mut walker = GraphWalker::new(&graph, root_id);
        let mut scopes = BTreeSet::new();
        for kind in DependencyKind::ALL {
            let mut references = BTreeSet::new();
            for id in direct.get(&kind).into_iter().flatten() {
                references.insert(walker.reference(*id)?);
            }
            scopes.insert(Scope::new(kind.scope_name(), references));
        }

        let declared = parse_declared_licenses(root.license.as_deref());
        let vcs = root
            .repository
            .as_deref()
            .map_or(VcsInfo::EMPTY, VcsInfo::from_url);

        let project = Project {
            id: Identifier::new(PROJECT_TYPE, "", &root.name, &root.version),
            definition_file_path: self.ctx.relative_path(definition_file),
            authors: root.authors.iter().filter_map(|a| parse_author(a)).collect(),
            declared_licenses_processed: process_with_license_file(
                &declared,
                SpdxOperator::Or,
                root.license_file.is_some(),
            ),
            declared_licenses: declared,
            vcs_processed: vcs.normalized(),
            vcs,
            homepage_url: root.homepage.clone().unwrap_or_default(),
            scopes,
        };

        let result = ProjectAnalyzerResult {
            project,
            packages: walker.packages.into_values().collect(),
        };
        validated(definition_file, result)
    }
}

struct Graph<'a> {
    packages: HashMap<&'a str, &'a MetadataPackage>,
    nodes: HashMap<&'a str, &'a ResolveNode>,
    linkage: HashMap<&'a str, PackageLinkage>,
    checksums: ChecksumTable,
}

impl<'a> Graph<'a> {
    fn package(&self, id: &str) -> Result<&'a MetadataPackage, ResolutionError> {
        self.packages
            .get(id)
            .copied()
            .ok_or_else(|| malformed_graph(format!("unknown package id `{id}`")))
    }

    fn node(&self, id: &str) -> Result<&'a ResolveNode, ResolutionError> {
        self.nodes
            .get(id)
            .copied()
            .ok_or_else(|| malformed_graph(format!("no resolve node for `{id}`")))
    }

    fn linkage(&self, id: &str) -> PackageLinkage {
        self.linkage
            .get(id)
            .copied()
            .unwrap_or(PackageLinkage::Static)
    }
}

fn malformed_graph(message: String) -> ResolutionError {
    ResolutionError::MalformedOutput {
        command: "cargo metadata".to_string(),
        message,
    }
}

/// Expands references along normal edges, memoizing subtrees and collecting
/// the non-project packages it passes.
struct GraphWalker<'g, 'a> {
    graph: &'g Graph<'a>,
    path: Vec<&'a str>,
    memo: HashMap<&'a str, PackageReference>,
    packages: BTreeMap<Identifier, Package>,
}

impl<'g, 'a> GraphWalker<'g, 'a> {
    fn new(graph: &'g Graph<'a>, root_id: &'a str) -> Self {
        GraphWalker {
            graph,
            path: vec![root_id],
            memo: HashMap::new(),
            packages: BTreeMap::new(),
        }
    }

    fn reference(&mut self, id: &'a str) -> Result<PackageReference, ResolutionError> {
        if let Some(done) = self.memo.get(id) {
            return Ok(done.clone());
        }

        let package = self.graph.package(id)?;
        let identifier = package_identifier(package);
        let linkage = self.graph.linkage(id);

        if self.path.contains(&id) {
            if linkage.is_project() {
                return Ok(PackageReference::new(identifier, linkage));
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

        if self.path.len() >= MAX_DEPTH {
            return Err(ResolutionError::UnsupportedTopology {
                path: package.manifest_path.clone(),
                reason: format!("dependency tree deeper than {MAX_DEPTH} levels"),
            });
        }

        if !linkage.is_project() && !self.packages.contains_key(&identifier) {
            self.packages.insert(
                identifier.clone(),
                build_package(package, &self.graph.checksums),
            );
        }

        self.path.push(id);
        let mut dependencies = BTreeSet::new();
        for dep in &self.graph.node(id)?.deps {
            if dep.kinds().contains(&DependencyKind::Normal) {
                dependencies.insert(self.reference(dep.pkg.as_str())?);
            }
        }
        self.path.pop();

        let reference = PackageReference::new(identifier, linkage).with_dependencies(dependencies);
        self.memo.insert(id, reference.clone());
        Ok(reference)
    }
}

fn package_identifier(package: &MetadataPackage) -> Identifier {
    Identifier::new(PACKAGE_TYPE, "", &package.name, &package.version)
}

/// Split the `license` field on the legacy `/` separator.
fn parse_declared_licenses(license: Option<&str>) -> BTreeSet<String> {
    license
        .unwrap_or_default()
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn build_package(package: &MetadataPackage, checksums: &ChecksumTable) -> Package {
    let declared = parse_declared_licenses(package.license.as_deref());
    let source = package.source.as_deref().unwrap_or_default();
    let source_artifact = resolve_source_artifact(
        &package.name,
        &package.version,
        source,
        RegistryScheme::CratesIo,
        checksums,
    );

    let vcs = SourceDescriptor::parse(source)
        .vcs_info()
        .or_else(|| package.repository.as_deref().map(VcsInfo::from_url))
        .unwrap_or(VcsInfo::EMPTY);

    Package {
        id: package_identifier(package),
        authors: package.authors.iter().filter_map(|a| parse_author(a)).collect(),
        declared_licenses_processed: process_with_license_file(
            &declared,
            SpdxOperator::Or,
            package.license_file.is_some(),
        ),
        declared_licenses: declared,
        description: package.description.clone().unwrap_or_default(),
        homepage_url: package.homepage.clone().unwrap_or_default(),
        vcs_processed: vcs.normalized(),
        vcs,
        binary_artifact: RemoteArtifact::EMPTY,
        source_artifact,
    }
}

// ---------------------------------------------------------------------------
// Cargo.lock
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CargoLock {
    version: Option<i64>,
    #[serde(default)]
    package: Vec<CargoLockPackage>,
    metadata: Option<BTreeMap<String, toml::Value>>,
}

#[derive(Debug, Deserialize)]
struct CargoLockPackage {
    name: String,
    version: String,
    source: Option<String>,
    checksum: Option<String>,
}

/// How a `Cargo.lock` stores its checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockfileFormat {
    /// Flat `[metadata]` table keyed by `"checksum <name> <version> (<source>)"`.
    MetadataTable,
    /// `checksum` field on each `[[package]]`.
    PerPackage,
}

impl LockfileFormat {
    /// Dispatch on the `version` key. Unversioned lockfiles are v1 when they
    /// carry a `[metadata]` table and v2 otherwise.
    fn detect(lock: &CargoLock) -> Result<Self, String> {
        match lock.version {
            None if lock.metadata.is_some() => Ok(LockfileFormat::MetadataTable),
            None => Ok(LockfileFormat::PerPackage),
            Some(3 | 4) => Ok(LockfileFormat::PerPackage),
            Some(other) => Err(format!("unsupported lockfile version {other}")),
        }
    }
}

const CHECKSUM_KEY_PREFIX: &str = "checksum ";

fn read_checksums(lockfile: &Path) -> Result<ChecksumTable, ResolutionError> {
    if !lockfile.is_file() {
        return Err(ResolutionError::LockfileMissing {
            path: lockfile.to_path_buf(),
        });
    }

    let unreadable = |message: String| ResolutionError::ManifestUnreadable {
        path: lockfile.to_path_buf(),
        message,
    };
    let content = std::fs::read_to_string(lockfile).map_err(|e| unreadable(e.to_string()))?;
    let lock: CargoLock = toml::from_str(&content).map_err(|e| unreadable(e.to_string()))?;

    let mut table = ChecksumTable::default();
    match LockfileFormat::detect(&lock).map_err(unreadable)? {
        LockfileFormat::PerPackage => {
            for package in &lock.package {
                if let (Some(source), Some(checksum)) = (&package.source, &package.checksum) {
                    table.insert(
                        ChecksumTable::key(&package.name, &package.version, source),
                        Hash::from_hex(checksum),
                    );
                }
            }
        }
        LockfileFormat::MetadataTable => {
            for (key, value) in lock.metadata.iter().flatten() {
                let (Some(key), Some(checksum)) = (key.strip_prefix(CHECKSUM_KEY_PREFIX), value.as_str())
                else {
                    continue;
                };
                if checksum != "<none>" {
                    table.insert(key, Hash::from_hex(checksum));
                }
            }
        }
    }

    tracing::debug!("Read {} checksums from {}", table.len(), lockfile.display());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::models::HashAlgorithm;
    use crate::process::testing::ScriptedRunner;

    const CRATES_IO: &str = "registry+https://github.com/rust-lang/crates.io-index";

    fn checksum(c: char) -> String {
        c.to_string().repeat(64)
    }

    fn registry_package(name: &str, version: &str, license: &str) -> serde_json::Value {
        json!({
            "id": format!("{name} {version} ({CRATES_IO})"),
            "name": name,
            "version": version,
            "authors": ["Jane Doe <jane@example.com>"],
            "license": license,
            "license_file": null,
            "description": format!("The {name} crate"),
            "homepage": null,
            "repository": format!("https://github.com/example/{name}"),
            "source": CRATES_IO,
            "manifest_path": format!("/home/user/.cargo/registry/src/{name}-{version}/Cargo.toml"),
        })
    }

    fn path_package(name: &str, dir: &Path) -> serde_json::Value {
        json!({
            "id": format!("{name} 0.1.0 (path+file://{})", dir.display()),
            "name": name,
            "version": "0.1.0",
            "authors": [],
            "license": null,
            "license_file": null,
            "description": null,
            "homepage": null,
            "repository": null,
            "source": null,
            "manifest_path": dir.join("Cargo.toml"),
        })
    }

    fn id_of(package: &serde_json::Value) -> String {
        package["id"].as_str().unwrap().to_string()
    }

    fn edge(pkg: &str, kind: Option<&str>) -> serde_json::Value {
        json!({ "pkg": pkg, "dep_kinds": [{ "kind": kind, "target": null }] })
    }

    fn resolver(root: &Path, metadata: &serde_json::Value) -> CargoResolver {
        let runner = ScriptedRunner::new().expect("cargo metadata", &metadata.to_string());
        CargoResolver::new(AnalyzerContext::new(root, Arc::new(runner)))
    }

    struct Workspace {
        _root: tempfile::TempDir,
        _outside: tempfile::TempDir,
        root: PathBuf,
        app: PathBuf,
        metadata: serde_json::Value,
    }

    /// app -> serde (normal), local-lib (path, inside), outside-lib (path, outside),
    /// dev-helper (dev), cc (build).
    /// dev-helper -> itoa (normal), pretty (dev); local-lib -> serde; serde -> serde_derive.
    fn workspace() -> Workspace {
        let root_dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(root_dir.path()).unwrap();
        let outside = std::fs::canonicalize(outside_dir.path()).unwrap();

        let app_dir = root.join("app");
        let local_dir = root.join("local-lib");
        let outside_lib_dir = outside.join("outside-lib");
        for dir in [&app_dir, &local_dir, &outside_lib_dir] {
            std::fs::create_dir_all(dir).unwrap();
        }

        let mut app = path_package("app", &app_dir);
        app["license"] = json!("MIT/Apache-2.0");
        app["repository"] = json!("https://github.com/example/app");
        let local = path_package("local-lib", &local_dir);
        let outside_lib = path_package("outside-lib", &outside_lib_dir);
        let serde = registry_package("serde", "1.0.150", "MIT OR Apache-2.0");
        let serde_derive = registry_package("serde_derive", "1.0.150", "MIT OR Apache-2.0");
        let dev_helper = registry_package("dev-helper", "0.3.0", "MIT");
        let itoa = registry_package("itoa", "1.0.0", "MIT");
        let pretty = registry_package("pretty", "0.2.0", "MIT");
        let cc = registry_package("cc", "1.0.0", "MIT/Apache-2.0");

        let metadata = json!({
            "packages": [&app, &local, &outside_lib, &serde, &serde_derive, &dev_helper, &itoa, &pretty, &cc],
            "workspace_members": [id_of(&app)],
            "workspace_root": app_dir,
            "resolve": {
                "root": id_of(&app),
                "nodes": [
                    { "id": id_of(&app), "deps": [
                        edge(&id_of(&serde), None),
                        edge(&id_of(&local), None),
                        edge(&id_of(&outside_lib), None),
                        edge(&id_of(&dev_helper), Some("dev")),
                        edge(&id_of(&cc), Some("build")),
                    ]},
                    { "id": id_of(&local), "deps": [edge(&id_of(&serde), None)] },
                    { "id": id_of(&outside_lib), "deps": [] },
                    { "id": id_of(&serde), "deps": [
                        { "pkg": id_of(&serde_derive), "dep_kinds": [] }
                    ]},
                    { "id": id_of(&serde_derive), "deps": [] },
                    { "id": id_of(&dev_helper), "deps": [
                        edge(&id_of(&itoa), None),
                        edge(&id_of(&pretty), Some("dev")),
                    ]},
                    { "id": id_of(&itoa), "deps": [] },
                    { "id": id_of(&pretty), "deps": [] },
                    { "id": id_of(&cc), "deps": [] },
                ],
            },
        });

        std::fs::write(
            app_dir.join("Cargo.lock"),
            format!(
                r#"version = 3

[[package]]
name = "app"
version = "0.1.0"

[[package]]
name = "serde"
version = "1.0.150"
source = "{CRATES_IO}"
checksum = "{}"
"#,
                checksum('a')
            ),
        )
        .unwrap();

        Workspace {
            _root: root_dir,
            _outside: outside_dir,
            app: app_dir.join("Cargo.toml"),
            root,
            metadata,
        }
    }

    fn names(refs: &BTreeSet<PackageReference>) -> Vec<&str> {
        refs.iter().map(|r| r.id.name.as_str()).collect()
    }

    #[test]
    fn test_resolves_scopes_and_linkage() {
        let ws = workspace();
        let result = resolver(&ws.root, &ws.metadata)
            .resolve_dependencies(&ws.app)
            .unwrap();

        let project = &result.project;
        assert_eq!(project.id, Identifier::new("Cargo", "", "app", "0.1.0"));
        assert_eq!(project.definition_file_path, PathBuf::from("app/Cargo.toml"));
        assert_eq!(
            project
                .declared_licenses_processed
                .spdx_expression
                .as_ref()
                .unwrap()
                .to_string(),
            "Apache-2.0 OR MIT"
        );

        let deps = &project.scope("dependencies").unwrap().dependencies;
        assert_eq!(names(deps), vec!["local-lib", "outside-lib", "serde"]);

        let local = deps.iter().find(|r| r.id.name == "local-lib").unwrap();
        assert_eq!(local.linkage, PackageLinkage::ProjectStatic);
        assert_eq!(names(&local.dependencies), vec!["serde"]);

        let outside = deps.iter().find(|r| r.id.name == "outside-lib").unwrap();
        assert_eq!(outside.linkage, PackageLinkage::Static);

        let serde = deps.iter().find(|r| r.id.name == "serde").unwrap();
        assert_eq!(names(&serde.dependencies), vec!["serde_derive"]);

        let build = &project.scope("build-dependencies").unwrap().dependencies;
        assert_eq!(names(build), vec!["cc"]);
    }

    #[test]
    fn test_only_external_packages_are_listed() {
        let ws = workspace();
        let result = resolver(&ws.root, &ws.metadata)
            .resolve_dependencies(&ws.app)
            .unwrap();

        let package_names: Vec<&str> = result.packages.iter().map(|p| p.id.name.as_str()).collect();
        assert!(package_names.contains(&"outside-lib"));
        assert!(!package_names.contains(&"local-lib"));
        assert!(!package_names.contains(&"app"));
        assert!(!package_names.contains(&"pretty"));
        assert!(result.validate().is_ok());
    }

    #[test]
    fn test_dev_dependencies_are_not_expanded_along_dev_edges() {
        let ws = workspace();
        let result = resolver(&ws.root, &ws.metadata)
            .resolve_dependencies(&ws.app)
            .unwrap();

        let dev = &result.project.scope("dev-dependencies").unwrap().dependencies;
        assert_eq!(names(dev), vec!["dev-helper"]);
        let helper = dev.iter().next().unwrap();
        assert_eq!(names(&helper.dependencies), vec!["itoa"]);
    }

    #[test]
    fn test_package_metadata_and_artifacts() {
        let ws = workspace();
        let result = resolver(&ws.root, &ws.metadata)
            .resolve_dependencies(&ws.app)
            .unwrap();

        let serde = result
            .packages
            .iter()
            .find(|p| p.id.name == "serde")
            .unwrap();
        assert_eq!(serde.id.kind, "Crate");
        assert_eq!(serde.authors, BTreeSet::from(["Jane Doe".to_string()]));
        assert_eq!(serde.description, "The serde crate");
        assert_eq!(serde.vcs.url, "https://github.com/example/serde");
        assert_eq!(
            serde.source_artifact.url,
            "https://crates.io/api/v1/crates/serde/1.0.150/download"
        );
        assert_eq!(serde.source_artifact.hash.algorithm, Some(HashAlgorithm::Sha256));
        assert_eq!(serde.source_artifact.hash.value, Some(checksum('a')));

        let itoa = result.packages.iter().find(|p| p.id.name == "itoa").unwrap();
        assert!(!itoa.source_artifact.is_empty());
        assert!(itoa.source_artifact.hash.is_none());

        let outside = result
            .packages
            .iter()
            .find(|p| p.id.name == "outside-lib")
            .unwrap();
        assert_eq!(outside.source_artifact, RemoteArtifact::EMPTY);
    }

    #[test]
    fn test_dev_dependency_cycle_back_to_root_is_a_leaf() {
        let ws = workspace();
        let mut metadata = ws.metadata.clone();
        let app_id = metadata["resolve"]["root"].as_str().unwrap().to_string();
        let nodes = metadata["resolve"]["nodes"].as_array_mut().unwrap();
        let helper = nodes
            .iter_mut()
            .find(|n| n["id"].as_str().unwrap().starts_with("dev-helper"))
            .unwrap();
        helper["deps"]
            .as_array_mut()
            .unwrap()
            .push(edge(&app_id, None));

        let result = resolver(&ws.root, &metadata)
            .resolve_dependencies(&ws.app)
            .unwrap();

        let helper = result
            .project
            .scope("dev-dependencies")
            .unwrap()
            .dependencies
            .iter()
            .next()
            .unwrap();
        let back = helper
            .dependencies
            .iter()
            .find(|r| r.id.name == "app")
            .unwrap();
        assert_eq!(back.linkage, PackageLinkage::ProjectStatic);
        assert!(back.dependencies.is_empty());
    }

    #[test]
    fn test_external_cycle_is_rejected() {
        let ws = workspace();
        let mut metadata = ws.metadata.clone();
        let serde_id = format!("serde 1.0.150 ({CRATES_IO})");
        let nodes = metadata["resolve"]["nodes"].as_array_mut().unwrap();
        let derive = nodes
            .iter_mut()
            .find(|n| n["id"].as_str().unwrap().starts_with("serde_derive"))
            .unwrap();
        derive["deps"] = json!([edge(&serde_id, None)]);

        let err = resolver(&ws.root, &metadata)
            .resolve_dependencies(&ws.app)
            .unwrap_err();
        match err {
            ResolutionError::CyclicGraphDetected { cycle } => {
                assert_eq!(cycle.first(), Some(&serde_id));
                assert_eq!(cycle.last(), Some(&serde_id));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Hangs a linear chain of `length` crates below `serde_derive`.
    fn with_chain(metadata: &serde_json::Value, length: usize) -> serde_json::Value {
        let mut metadata = metadata.clone();
        let chain: Vec<serde_json::Value> = (0..length)
            .map(|i| registry_package(&format!("chain-{i}"), "1.0.0", "MIT"))
            .collect();
        for (i, package) in chain.iter().enumerate() {
            let deps = chain.get(i + 1).map(|next| vec![edge(&id_of(next), None)]).unwrap_or_default();
            metadata["packages"].as_array_mut().unwrap().push(package.clone());
            metadata["resolve"]["nodes"]
                .as_array_mut()
                .unwrap()
                .push(json!({ "id": id_of(package), "deps": deps }));
        }
        let derive = metadata["resolve"]["nodes"]
            .as_array_mut()
            .unwrap()
            .iter_mut()
            .find(|n| n["id"].as_str().unwrap().starts_with("serde_derive"))
            .unwrap();
        derive["deps"] = json!([edge(&id_of(&chain[0]), None)]);
        metadata
    }

    #[test]
    fn test_depth_limit_is_unsupported_topology() {
        let ws = workspace();

        let shallow = with_chain(&ws.metadata, 200);
        let result = resolver(&ws.root, &shallow)
            .resolve_dependencies(&ws.app)
            .unwrap();
        assert!(result.packages.iter().any(|p| p.id.name == "chain-199"));

        // serde is first reached through local-lib, so app, local-lib, serde
        // and serde_derive already sit on the path.
        let deep = with_chain(&ws.metadata, MAX_DEPTH);
        let err = resolver(&ws.root, &deep)
            .resolve_dependencies(&ws.app)
            .unwrap_err();
        match err {
            ResolutionError::UnsupportedTopology { path, reason } => {
                let limit = MAX_DEPTH - 4;
                assert!(path.ends_with(format!("chain-{limit}-1.0.0/Cargo.toml")));
                assert!(reason.contains(&MAX_DEPTH.to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_virtual_workspace_is_unsupported() {
        let ws = workspace();
        let mut metadata = ws.metadata.clone();
        metadata["resolve"]["root"] = serde_json::Value::Null;

        let err = resolver(&ws.root, &metadata)
            .resolve_dependencies(&ws.app)
            .unwrap_err();
        assert!(matches!(err, ResolutionError::UnsupportedTopology { .. }));
    }

    #[test]
    fn test_missing_lockfile_degrades_to_no_hashes() {
        let ws = workspace();
        std::fs::remove_file(ws.app.with_file_name("Cargo.lock")).unwrap();

        let result = resolver(&ws.root, &ws.metadata)
            .resolve_dependencies(&ws.app)
            .unwrap();
        let serde = result.packages.iter().find(|p| p.id.name == "serde").unwrap();
        assert!(!serde.source_artifact.is_empty());
        assert!(serde.source_artifact.hash.is_none());
    }

    #[test]
    fn test_tool_failure_carries_stderr() {
        let ws = workspace();
        let runner = ScriptedRunner::new().expect_output(
            "cargo metadata",
            101,
            "",
            "error: failed to parse manifest",
        );
        let resolver = CargoResolver::new(AnalyzerContext::new(&ws.root, Arc::new(runner)));

        let err = resolver.resolve_dependencies(&ws.app).unwrap_err();
        match err {
            ResolutionError::ToolInvocationFailed {
                command,
                exit_code,
                stderr,
            } => {
                assert!(command.starts_with("cargo metadata --format-version 1 --manifest-path"));
                assert_eq!(exit_code, 101);
                assert!(stderr.contains("failed to parse manifest"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_metadata() {
        let ws = workspace();
        let runner = ScriptedRunner::new().expect("cargo metadata", "not json");
        let resolver = CargoResolver::new(AnalyzerContext::new(&ws.root, Arc::new(runner)));
        assert!(matches!(
            resolver.resolve_dependencies(&ws.app),
            Err(ResolutionError::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_v1_lockfile_metadata_table() {
        let dir = tempfile::tempdir().unwrap();
        let lockfile = dir.path().join("Cargo.lock");
        std::fs::write(
            &lockfile,
            format!(
                r#"[[package]]
name = "serde"
version = "1.0.0"
source = "{CRATES_IO}"

[metadata]
"checksum serde 1.0.0 ({CRATES_IO})" = "{}"
"checksum local 0.1.0 (git+https://example.com/local#abc)" = "<none>"
"#,
                checksum('c')
            ),
        )
        .unwrap();

        let table = read_checksums(&lockfile).unwrap();
        assert_eq!(table.len(), 1);
        let hash = table
            .get(&ChecksumTable::key("serde", "1.0.0", CRATES_IO))
            .unwrap();
        assert_eq!(hash.value, Some(checksum('c')));
    }

    #[test]
    fn test_v2_lockfile_without_version_key() {
        let dir = tempfile::tempdir().unwrap();
        let lockfile = dir.path().join("Cargo.lock");
        std::fs::write(
            &lockfile,
            format!(
                r#"[[package]]
name = "serde"
version = "1.0.0"
source = "{CRATES_IO}"
checksum = "{}"
"#,
                checksum('d')
            ),
        )
        .unwrap();

        let table = read_checksums(&lockfile).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unknown_lockfile_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let lockfile = dir.path().join("Cargo.lock");
        std::fs::write(&lockfile, "version = 99\n").unwrap();
        assert!(matches!(
            read_checksums(&lockfile),
            Err(ResolutionError::ManifestUnreadable { .. })
        ));

        assert!(matches!(
            read_checksums(&dir.path().join("missing.lock")),
            Err(ResolutionError::LockfileMissing { .. })
        ));
    }

    #[test]
    fn test_parse_declared_licenses() {
        assert_eq!(
            parse_declared_licenses(Some("MIT/ Apache-2.0 /")),
            BTreeSet::from(["MIT".to_string(), "Apache-2.0".to_string()])
        );
        assert!(parse_declared_licenses(None).is_empty());
    }
}
