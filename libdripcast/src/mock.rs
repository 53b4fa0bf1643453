//! Mock dispatch backends for testing
//!
//! Configurable stand-ins for the post API client and the device bridge.
//! Available for all builds so integration tests can drive the processor
//! without network access.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::api::{MultiPostEntry, PlatformResult, PostClient};
use crate::device::DeviceDriver;
use crate::error::{DispatchError, DispatchResult};
use crate::types::Platform;

/// A recorded single-platform post.
#[derive(Debug, Clone)]
pub struct RecordedSingle {
    pub platform: Platform,
    pub profile_key: String,
    pub caption: String,
    pub media_url: Option<String>,
}

/// Mock [`PostClient`]. Clones share call counts and recorded requests.
#[derive(Clone)]
pub struct MockPostClient {
    /// Fail this many calls before succeeding. `usize::MAX` never succeeds.
    fail_times: usize,
    error: String,
    delay: Duration,
    /// Platforms whose multi-post leg reports failure.
    failing_legs: Vec<Platform>,
    calls: Arc<Mutex<usize>>,
    singles: Arc<Mutex<Vec<RecordedSingle>>>,
    multis: Arc<Mutex<Vec<Vec<MultiPostEntry>>>>,
}

impl Default for MockPostClient {
    fn default() -> Self {
        Self {
            fail_times: 0,
            error: "Mock post API failure".to_string(),
            delay: Duration::from_millis(0),
            failing_legs: Vec::new(),
            calls: Arc::new(Mutex::new(0)),
            singles: Arc::new(Mutex::new(Vec::new())),
            multis: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockPostClient {
    /// A client that always succeeds.
    pub fn success() -> Self {
        Self::default()
    }

    /// A client that fails every call with `error`.
    pub fn failing(error: &str) -> Self {
        Self {
            fail_times: usize::MAX,
            error: error.to_string(),
            ..Self::default()
        }
    }

    /// A client that fails the first `n` calls, then succeeds.
    pub fn failing_times(n: usize, error: &str) -> Self {
        Self {
            fail_times: n,
            error: error.to_string(),
            ..Self::default()
        }
    }

    /// A client that sleeps before answering, to widen race windows.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// A client whose multi-post reports the given platforms as failed legs.
    pub fn with_failing_legs(failing_legs: Vec<Platform>) -> Self {
        Self {
            failing_legs,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn recorded_singles(&self) -> Vec<RecordedSingle> {
        self.singles.lock().unwrap().clone()
    }

    pub fn recorded_multis(&self) -> Vec<Vec<MultiPostEntry>> {
        self.multis.lock().unwrap().clone()
    }

    /// Returns whether this call should fail, and bumps the call count.
    fn register_call(&self) -> bool {
        let mut calls = self.calls.lock().unwrap();
        let failing = *calls < self.fail_times;
        *calls += 1;
        failing
    }
}

#[async_trait]
impl PostClient for MockPostClient {
    async fn post_single(
        &self,
        platform: Platform,
        profile_key: &str,
        caption: &str,
        media_url: Option<&str>,
    ) -> DispatchResult<String> {
        let failing = self.register_call();

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if failing {
            return Err(DispatchError::Api(self.error.clone()));
        }

        self.singles.lock().unwrap().push(RecordedSingle {
            platform,
            profile_key: profile_key.to_string(),
            caption: caption.to_string(),
            media_url: media_url.map(String::from),
        });

        Ok(format!("mock-{}", uuid::Uuid::new_v4()))
    }

    async fn post_multi(
        &self,
        entries: &[MultiPostEntry],
        _media_url: Option<&str>,
    ) -> DispatchResult<Vec<PlatformResult>> {
        let failing = self.register_call();

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if failing {
            return Err(DispatchError::Api(self.error.clone()));
        }

        self.multis.lock().unwrap().push(entries.to_vec());

        Ok(entries
            .iter()
            .map(|entry| {
                let failed = self.failing_legs.contains(&entry.platform);
                PlatformResult {
                    platform: entry.platform,
                    success: !failed,
                    post_id: (!failed).then(|| format!("mock-{}", uuid::Uuid::new_v4())),
                    error: failed.then(|| self.error.clone()),
                }
            })
            .collect())
    }
}

/// Mock [`DeviceDriver`]. Clones share call counts and recorded requests.
#[derive(Clone)]
pub struct MockDeviceDriver {
    fail_times: usize,
    error: String,
    delay: Duration,
    calls: Arc<Mutex<usize>>,
    posts: Arc<Mutex<Vec<(String, String)>>>,
    dms: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl Default for MockDeviceDriver {
    fn default() -> Self {
        Self {
            fail_times: 0,
            error: "Mock device failure".to_string(),
            delay: Duration::from_millis(0),
            calls: Arc::new(Mutex::new(0)),
            posts: Arc::new(Mutex::new(Vec::new())),
            dms: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockDeviceDriver {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failing(error: &str) -> Self {
        Self {
            fail_times: usize::MAX,
            error: error.to_string(),
            ..Self::default()
        }
    }

    pub fn failing_times(n: usize, error: &str) -> Self {
        Self {
            fail_times: n,
            error: error.to_string(),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    /// Recorded posts as `(device_id, text)` pairs.
    pub fn recorded_posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap().clone()
    }

    /// Recorded DMs as `(device_id, recipient, text)` tuples.
    pub fn recorded_dms(&self) -> Vec<(String, String, String)> {
        self.dms.lock().unwrap().clone()
    }

    fn register_call(&self) -> bool {
        let mut calls = self.calls.lock().unwrap();
        let failing = *calls < self.fail_times;
        *calls += 1;
        failing
    }
}

#[async_trait]
impl DeviceDriver for MockDeviceDriver {
    async fn post(
        &self,
        device_id: &str,
        text: &str,
        _media_url: Option<&str>,
    ) -> DispatchResult<()> {
        let failing = self.register_call();

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if failing {
            return Err(DispatchError::Device(self.error.clone()));
        }

        self.posts
            .lock()
            .unwrap()
            .push((device_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_dm(&self, device_id: &str, recipient: &str, text: &str) -> DispatchResult<()> {
        let failing = self.register_call();

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if failing {
            return Err(DispatchError::Device(self.error.clone()));
        }

        self.dms.lock().unwrap().push((
            device_id.to_string(),
            recipient.to_string(),
            text.to_string(),
        ));
        Ok(())
    }
}
