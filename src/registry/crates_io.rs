use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;

use super::USER_AGENT;

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: VersionInfo,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    license: Option<String>,
}

fn version_url(name: &str, version: &str) -> String {
    format!("https://crates.io/api/v1/crates/{name}/{version}")
}

/// Fetch the declared license of a crate version from crates.io.
pub async fn fetch_license(client: &Client, name: &str, version: &str) -> Result<Option<String>> {
    let response = client
        .get(version_url(name, version))
        .header("User-Agent", USER_AGENT)
        .send()
        .await?;

    if !response.status().is_success() {
        tracing::debug!("crates.io returned {} for {} {}", response.status(), name, version);
        return Ok(None);
    }

    let data: VersionResponse = response.json().await?;
    Ok(data.version.license.filter(|l| !l.trim().is_empty()))
}
