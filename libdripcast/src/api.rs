//! External post API client
//!
//! Accounts without device automation publish through an upstream posting
//! API, addressed per platform by opaque profile keys.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::config::PostApiConfig;
use crate::error::{ConfigError, DispatchError, DispatchResult, Result};
use crate::types::Platform;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// How much of an upstream error body to keep when reporting.
const ERROR_BODY_LIMIT: usize = 1024;

/// One platform leg of a multi-post request.
#[derive(Debug, Clone, Serialize)]
pub struct MultiPostEntry {
    pub platform: Platform,
    pub profile_key: String,
    pub caption: String,
}

/// Outcome of one platform leg of a multi-post.
#[derive(Debug, Clone)]
pub struct PlatformResult {
    pub platform: Platform,
    pub success: bool,
    pub post_id: Option<String>,
    pub error: Option<String>,
}

/// Client for the upstream posting API.
#[async_trait]
pub trait PostClient: Send + Sync {
    /// Publish one caption to a single platform profile. Returns the
    /// remote post ID.
    async fn post_single(
        &self,
        platform: Platform,
        profile_key: &str,
        caption: &str,
        media_url: Option<&str>,
    ) -> DispatchResult<String>;

    /// Publish to several platform profiles in one request. The upstream
    /// reports per-leg outcomes; the caller decides what a partial result
    /// means.
    async fn post_multi(
        &self,
        entries: &[MultiPostEntry],
        media_url: Option<&str>,
    ) -> DispatchResult<Vec<PlatformResult>>;
}

/// HTTP implementation of [`PostClient`].
pub struct HttpPostClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPostClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Build a client from configuration, reading the API key from the
    /// configured key file.
    pub fn from_config(config: &PostApiConfig) -> Result<Self> {
        let key_path = shellexpand::tilde(&config.api_key_file).to_string();
        let key_path = Path::new(&key_path);

        if !key_path.exists() {
            return Err(ConfigError::MissingField(format!(
                "post API key file not found: {}",
                key_path.display()
            ))
            .into());
        }

        let api_key = std::fs::read_to_string(key_path)
            .map_err(ConfigError::ReadError)?
            .trim()
            .to_string();

        Ok(Self::new(config.base_url.trim_end_matches('/'), api_key))
    }

    async fn send_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> DispatchResult<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(url.clone())
                } else {
                    DispatchError::Api(format!("request to {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_LIMIT)
                .collect::<String>();
            return Err(DispatchError::Api(format!("{} from {}: {}", status, url, body)));
        }

        response
            .json()
            .await
            .map_err(|e| DispatchError::Api(format!("invalid response from {}: {}", url, e)))
    }
}

#[async_trait]
impl PostClient for HttpPostClient {
    async fn post_single(
        &self,
        platform: Platform,
        profile_key: &str,
        caption: &str,
        media_url: Option<&str>,
    ) -> DispatchResult<String> {
        debug!(%platform, "Posting via single-platform endpoint");

        let body = json!({
            "platform": platform,
            "profile_key": profile_key,
            "caption": caption,
            "media_url": media_url,
        });

        let response = self.send_json("/v1/posts", &body).await?;
        let post_id = response
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(post_id)
    }

    async fn post_multi(
        &self,
        entries: &[MultiPostEntry],
        media_url: Option<&str>,
    ) -> DispatchResult<Vec<PlatformResult>> {
        debug!(legs = entries.len(), "Posting via multi-platform endpoint");

        let body = json!({
            "posts": entries,
            "media_url": media_url,
        });

        let response = self.send_json("/v1/posts/multi", &body).await?;

        // Pair upstream results with the platforms we asked for; anything
        // the upstream omits counts as a failed leg.
        let results: HashMap<String, &serde_json::Value> = response
            .get("results")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| {
                        r.get("platform")
                            .and_then(|p| p.as_str())
                            .map(|p| (p.to_string(), r))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(entries
            .iter()
            .map(|entry| match results.get(entry.platform.as_str()) {
                Some(r) => {
                    let success = r.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
                    PlatformResult {
                        platform: entry.platform,
                        success,
                        post_id: r.get("id").and_then(|v| v.as_str()).map(String::from),
                        error: r.get("error").and_then(|v| v.as_str()).map(String::from),
                    }
                }
                None => PlatformResult {
                    platform: entry.platform,
                    success: false,
                    post_id: None,
                    error: Some("no result reported".to_string()),
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_missing_key_file() {
        let config = PostApiConfig {
            base_url: "https://api.example.com".to_string(),
            api_key_file: "/nonexistent/api.key".to_string(),
        };

        let result = HttpPostClient::from_config(&config);
        assert!(result.is_err());

        match result {
            Err(crate::error::DripcastError::Config(ConfigError::MissingField(msg))) => {
                assert!(msg.contains("key file not found"));
            }
            _ => panic!("Expected config error for missing key file"),
        }
    }

    #[test]
    fn test_from_config_reads_and_trims_key() {
        let temp_dir = TempDir::new().unwrap();
        let key_file = temp_dir.path().join("api.key");
        std::fs::write(&key_file, "secret-key\n").unwrap();

        let config = PostApiConfig {
            base_url: "https://api.example.com/".to_string(),
            api_key_file: key_file.to_str().unwrap().to_string(),
        };

        let client = HttpPostClient::from_config(&config).unwrap();
        assert_eq!(client.api_key, "secret-key");
        // Trailing slash is normalized away so path joining stays simple
        assert_eq!(client.base_url, "https://api.example.com");
    }

    #[test]
    fn test_multi_post_entry_serializes_platform_lowercase() {
        let entry = MultiPostEntry {
            platform: Platform::Tiktok,
            profile_key: "key-1".to_string(),
            caption: "hello".to_string(),
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""platform":"tiktok""#));
    }
}
