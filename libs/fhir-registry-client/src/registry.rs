//! HTTP access to an npm-style FHIR package registry.
//!
//! - `GET {base}/{name}` lists versions (`versions`, `time`, `dist-tags`)
//! - `GET {base}/{name}/{version}` returns the package tarball

use crate::error::{Error, Result};
use crate::version_resolver::VersionListing;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-request limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub retries: u32,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 0,
        }
    }
}

/// Client for one registry base URL.
#[derive(Debug, Clone)]
pub struct RegistryHttpClient {
    client: Client,
    base_url: String,
    policy: RequestPolicy,
}

impl RegistryHttpClient {
    pub fn new(base_url: impl Into<String>, policy: RequestPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Registry(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the version listing for a package.
    pub async fn list_versions(&self, name: &str) -> Result<VersionListing> {
        let url = format!("{}/{}", self.base_url, urlencoding::encode(name));
        let Some(bytes) = self.get_bytes(&url).await? else {
            return Err(Error::PackageNotFound {
                name: name.to_string(),
                version: "*".to_string(),
            });
        };
        let metadata: Value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Registry(format!("invalid metadata for {name}: {e}")))?;
        parse_listing(name, &metadata)
    }

    /// Download a package tarball.
    pub async fn download(&self, name: &str, version: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            urlencoding::encode(name),
            urlencoding::encode(version)
        );
        self.get_bytes(&url).await?.ok_or_else(|| Error::PackageNotFound {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// Download an arbitrary URL; a 404 is reported as unreachable.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.get_bytes(url)
            .await?
            .ok_or_else(|| Error::unreachable(url, "404 Not Found"))
    }

    /// GET with timeout and retries. `Ok(None)` for 404; transport errors
    /// and 5xx responses are retried, other statuses fail immediately.
    async fn get_bytes(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let attempts = self.policy.retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!(url = %url, attempt, "registry request");
            match self
                .client
                .get(url)
                .timeout(self.policy.timeout)
                .send()
                .await
            {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(response) if response.status().is_success() => {
                    return response
                        .bytes()
                        .await
                        .map(|b| Some(b.to_vec()))
                        .map_err(|e| Error::unreachable(url, e));
                }
                Ok(response) if response.status().is_server_error() => {
                    last_error = format!("status {}", response.status());
                }
                Ok(response) => {
                    return Err(Error::unreachable(url, format!("status {}", response.status())))
                }
                Err(err) => last_error = err.to_string(),
            }

            if attempt < attempts {
                warn!(url = %url, attempt, error = %last_error, "registry request failed, retrying");
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
        }

        Err(Error::unreachable(url, last_error))
    }
}

fn parse_listing(name: &str, metadata: &Value) -> Result<VersionListing> {
    let versions = metadata
        .get("versions")
        .and_then(Value::as_object)
        .map(|obj| obj.keys().cloned().collect::<Vec<String>>())
        .ok_or_else(|| {
            Error::Registry(format!(
                "Invalid package metadata for {name}: missing or invalid 'versions' field"
            ))
        })?;

    let published = metadata
        .get("time")
        .and_then(Value::as_object)
        .map(|times| {
            times
                .iter()
                .filter(|(version, _)| versions.contains(version))
                .filter_map(|(version, stamp)| {
                    let stamp = stamp.as_str()?;
                    let parsed = DateTime::parse_from_rfc3339(stamp).ok()?;
                    Some((version.clone(), parsed.with_timezone(&Utc)))
                })
                .collect()
        })
        .unwrap_or_default();

    let latest_tag = metadata
        .get("dist-tags")
        .and_then(|tags| tags.get("latest"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(VersionListing {
        name: name.to_string(),
        versions,
        published,
        latest_tag,
    })
}
