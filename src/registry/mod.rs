//! Online enrichment of declared licenses from upstream package registries.
//!
//! Only packages that declare no license at all are looked up. Fetched licenses
//! go through the same declared-license processing as locally read ones.

pub mod crates_io;
pub mod npm;

use std::collections::BTreeSet;

use anyhow::Result;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;

use crate::license::processor::process;
use crate::license::spdx::SpdxOperator;
use crate::models::{AnalyzerResult, Package};

const USER_AGENT: &str = concat!(
    "depgraph-checkr/",
    env!("CARGO_PKG_VERSION"),
    " (dependency analysis tool)"
);

const BATCH_SIZE: usize = 75;

/// Registry lookup for a package, chosen by identifier type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registry {
    CratesIo,
    Npm,
}

impl Registry {
    fn for_package(package: &Package) -> Option<Self> {
        match package.id.kind.as_str() {
            "Crate" => Some(Registry::CratesIo),
            "NPM" => Some(Registry::Npm),
            _ => None,
        }
    }

    /// The licenses as declared, split the way the local manifests are.
    async fn fetch(self, client: &Client, package: &Package) -> Result<BTreeSet<String>> {
        let id = &package.id;
        match self {
            Registry::CratesIo => {
                let license = crates_io::fetch_license(client, &id.name, &id.version).await?;
                Ok(license
                    .iter()
                    .flat_map(|l| l.split('/'))
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect())
            }
            Registry::Npm => {
                let name = if id.namespace.is_empty() {
                    id.name.clone()
                } else {
                    format!("{}/{}", id.namespace, id.name)
                };
                let licenses = npm::fetch_licenses(client, &name, &id.version).await?;
                Ok(licenses.into_iter().collect())
            }
        }
    }

    fn operator(self) -> SpdxOperator {
        match self {
            Registry::CratesIo => SpdxOperator::Or,
            Registry::Npm => SpdxOperator::And,
        }
    }
}

/// Replace the declared licenses of `package` with ones fetched online.
fn apply_fetched(package: &mut Package, registry: Registry, licenses: BTreeSet<String>) {
    package.declared_licenses_processed = process(&licenses, registry.operator());
    package.declared_licenses = licenses;
}

/// Fill in declared licenses for packages that have none. Returns how many
/// packages were updated. Lookup failures are logged and skipped.
pub async fn enrich(result: &mut AnalyzerResult, quiet: bool) -> Result<usize> {
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let (mut candidates, rest): (Vec<Package>, Vec<Package>) = std::mem::take(&mut result.packages)
        .into_iter()
        .partition(|p| p.declared_licenses.is_empty() && Registry::for_package(p).is_some());
    result.packages.extend(rest);

    let pb = if !quiet && !candidates.is_empty() {
        let pb = ProgressBar::new(candidates.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut updated = 0;
    for batch in candidates.chunks_mut(BATCH_SIZE) {
        let futures: Vec<_> = batch
            .iter()
            .map(|package| {
                let client = client.clone();
                async move {
                    match Registry::for_package(package) {
                        Some(registry) => registry.fetch(&client, package).await,
                        None => Ok(BTreeSet::new()),
                    }
                }
            })
            .collect();

        let results = join_all(futures).await;

        for (package, fetched) in batch.iter_mut().zip(results) {
            match fetched {
                Ok(licenses) if !licenses.is_empty() => {
                    if let Some(registry) = Registry::for_package(package) {
                        tracing::debug!("Fetched licenses {:?} for {}", licenses, package.id);
                        apply_fetched(package, registry, licenses);
                        updated += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Could not fetch license of {}: {}", package.id, e),
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }
    }

    if let Some(pb) = pb {
        pb.finish_with_message("Done");
    }

    result.packages.extend(candidates);
    Ok(updated)
}
