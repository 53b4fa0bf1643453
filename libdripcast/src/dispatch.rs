//! Dispatch execution for claimed queue items
//!
//! Routes a claimed item to the right backend: the device automation
//! bridge when the account is device-paired, otherwise the external post
//! API (multi-platform when the account links several profile keys,
//! single-platform otherwise). Captions are truncated to each platform's
//! limit, never rejected. The dispatcher itself never retries; retry
//! policy lives in the processor.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{MultiPostEntry, PlatformResult, PostClient};
use crate::device::DeviceDriver;
use crate::error::{DispatchError, DispatchResult};
use crate::types::{Account, Content, QueueItem};

/// What a successful dispatch did.
#[derive(Debug, Clone)]
pub enum Dispatched {
    /// One post created through the API.
    Single { post_id: String },
    /// A multi-platform post. Individual legs may have failed as long as
    /// at least one succeeded.
    Multi { results: Vec<PlatformResult> },
    /// Executed on the account's paired device.
    Device,
}

impl Dispatched {
    pub fn describe(&self) -> String {
        match self {
            Self::Single { post_id } => format!("posted as {}", post_id),
            Self::Multi { results } => {
                let ok = results.iter().filter(|r| r.success).count();
                format!("posted to {}/{} platforms", ok, results.len())
            }
            Self::Device => "executed on device".to_string(),
        }
    }
}

/// Routes queue items to the post API or the device bridge.
pub struct Dispatcher {
    post_client: Arc<dyn PostClient>,
    device: Arc<dyn DeviceDriver>,
}

impl Dispatcher {
    pub fn new(post_client: Arc<dyn PostClient>, device: Arc<dyn DeviceDriver>) -> Self {
        Self {
            post_client,
            device,
        }
    }

    /// Execute one item against its (already resolved, active) account.
    pub async fn execute(&self, item: &QueueItem, account: &Account) -> DispatchResult<Dispatched> {
        if let Some(device_id) = &account.device_id {
            return self.execute_on_device(device_id, item).await;
        }

        match &item.content {
            Content::Post {
                text, media_url, ..
            } => {
                let keys = account.linked_keys();
                if keys.len() >= 2 {
                    self.post_all_platforms(item, &keys, text, media_url.as_deref())
                        .await
                } else {
                    self.post_one_platform(item, account, text, media_url.as_deref())
                        .await
                }
            }
            Content::Dm { .. } => Err(DispatchError::Unsupported(
                "direct messages require a device-paired account".to_string(),
            )),
        }
    }

    async fn execute_on_device(
        &self,
        device_id: &str,
        item: &QueueItem,
    ) -> DispatchResult<Dispatched> {
        match &item.content {
            Content::Post {
                text, media_url, ..
            } => {
                debug!(item_id = %item.id, device_id, "Dispatching post to device");
                self.device
                    .post(device_id, text, media_url.as_deref())
                    .await?;
            }
            Content::Dm { recipient, text } => {
                debug!(item_id = %item.id, device_id, "Dispatching DM to device");
                self.device.send_dm(device_id, recipient, text).await?;
            }
        }
        Ok(Dispatched::Device)
    }

    async fn post_one_platform(
        &self,
        item: &QueueItem,
        account: &Account,
        text: &str,
        media_url: Option<&str>,
    ) -> DispatchResult<Dispatched> {
        let key = account.profile_keys.get(&account.platform).ok_or_else(|| {
            DispatchError::MissingProfileKey(format!(
                "account {} has no profile key for {}",
                account.id, account.platform
            ))
        })?;

        let caption = truncate_caption(text, account.platform.caption_limit());
        debug!(item_id = %item.id, platform = %account.platform, "Dispatching single-platform post");

        let post_id = self
            .post_client
            .post_single(account.platform, key, &caption, media_url)
            .await?;
        Ok(Dispatched::Single { post_id })
    }

    async fn post_all_platforms(
        &self,
        item: &QueueItem,
        keys: &[(crate::types::Platform, String)],
        text: &str,
        media_url: Option<&str>,
    ) -> DispatchResult<Dispatched> {
        let entries: Vec<MultiPostEntry> = keys
            .iter()
            .map(|(platform, key)| MultiPostEntry {
                platform: *platform,
                profile_key: key.clone(),
                caption: truncate_caption(text, platform.caption_limit()),
            })
            .collect();

        debug!(item_id = %item.id, platforms = entries.len(), "Dispatching multi-platform post");
        let results = self.post_client.post_multi(&entries, media_url).await?;

        let failed: Vec<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "{}: {}",
                    r.platform,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();

        if failed.len() == results.len() {
            return Err(DispatchError::Api(format!(
                "all platforms failed ({})",
                failed.join("; ")
            )));
        }
        if !failed.is_empty() {
            warn!(item_id = %item.id, "Partial multi-platform failure: {}", failed.join("; "));
        }

        Ok(Dispatched::Multi { results })
    }
}

/// Truncate to at most `limit` characters, never splitting a character.
fn truncate_caption(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
