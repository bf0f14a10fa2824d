use anyhow::Result;
use reqwest::Client;
use serde_json::Value;

use super::USER_AGENT;

/// Scoped names are escaped: `@scope/pkg` becomes `%40scope%2Fpkg`.
fn version_url(name: &str, version: &str) -> String {
    let encoded_name = name.replace('@', "%40").replace('/', "%2F");
    format!("https://registry.npmjs.org/{encoded_name}/{version}")
}

/// `license` as a string or `{ "type": ... }`, else the legacy `licenses` array.
fn licenses_of(document: &Value) -> Vec<String> {
    fn name(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(o) => o.get("type").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    if let Some(license) = document.get("license").and_then(name) {
        return vec![license];
    }
    document
        .get("licenses")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(name).collect())
        .unwrap_or_default()
}

/// Fetch the declared licenses of a package version from the npm registry.
pub async fn fetch_licenses(client: &Client, name: &str, version: &str) -> Result<Vec<String>> {
    let response = client
        .get(version_url(name, version))
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/json")
        .send()
        .await?;

    if !response.status().is_success() {
        tracing::debug!("npm registry returned {} for {}@{}", response.status(), name, version);
        return Ok(Vec::new());
    }

    let data: Value = response.json().await?;
    Ok(licenses_of(&data))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_scoped_name_is_escaped() {
        assert_eq!(
            version_url("@babel/core", "7.24.0"),
            "https://registry.npmjs.org/%40babel%2Fcore/7.24.0"
        );
        assert_eq!(
            version_url("lodash", "4.17.21"),
            "https://registry.npmjs.org/lodash/4.17.21"
        );
    }

    #[test]
    fn test_license_shapes() {
        assert_eq!(licenses_of(&json!({ "license": "ISC" })), vec!["ISC"]);
        assert_eq!(licenses_of(&json!({ "license": { "type": "MIT" } })), vec!["MIT"]);
        assert_eq!(
            licenses_of(&json!({ "licenses": [{ "type": "MIT" }, "Apache-2.0"] })),
            vec!["MIT", "Apache-2.0"]
        );
        assert!(licenses_of(&json!({ "name": "x" })).is_empty());
    }
}
