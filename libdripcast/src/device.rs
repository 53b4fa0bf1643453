//! Device automation bridge
//!
//! Some accounts publish through a phone-farm automation bridge instead of
//! the post API. The bridge drives a real device session, so it is the only
//! path that can send DMs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::DeviceConfig;
use crate::error::{DispatchError, DispatchResult};

/// Driver for device-automated accounts.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Publish a post through the device session.
    async fn post(&self, device_id: &str, text: &str, media_url: Option<&str>)
        -> DispatchResult<()>;

    /// Send a direct message through the device session.
    async fn send_dm(&self, device_id: &str, recipient: &str, text: &str) -> DispatchResult<()>;
}

/// HTTP implementation of [`DeviceDriver`] against the automation bridge.
pub struct HttpDeviceDriver {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDeviceDriver {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    async fn send(&self, path: &str, body: &serde_json::Value) -> DispatchResult<()> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(url.clone())
                } else {
                    DispatchError::Device(format!("bridge request to {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Device(format!(
                "{} from {}: {}",
                status, url, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl DeviceDriver for HttpDeviceDriver {
    async fn post(
        &self,
        device_id: &str,
        text: &str,
        media_url: Option<&str>,
    ) -> DispatchResult<()> {
        debug!(device_id, "Posting through device bridge");

        let body = json!({ "text": text, "media_url": media_url });
        self.send(&format!("/devices/{}/post", device_id), &body).await
    }

    async fn send_dm(&self, device_id: &str, recipient: &str, text: &str) -> DispatchResult<()> {
        debug!(device_id, recipient, "Sending DM through device bridge");

        let body = json!({ "recipient": recipient, "text": text });
        self.send(&format!("/devices/{}/dm", device_id), &body).await
    }
}
