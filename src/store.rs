//! Result store shared between render sessions and the transport

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Concurrent map from request id to the hex-encoded image.
///
/// Cloning yields another handle to the same map. Writes for an id that is
/// already present overwrite it. Nothing is ever evicted by the store itself;
/// hosts that need bounded memory call `remove` or `clear`.
#[derive(Clone, Default)]
pub struct ResultStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` under `id`, replacing any earlier value
    pub fn set(&self, id: impl Into<String>, value: impl Into<String>) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(id.into(), value.into());
    }

    pub fn get(&self, id: &str) -> Option<String> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.contains_key(id)
    }

    /// Take a result out of the store
    pub fn remove(&self, id: &str) -> Option<String> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.remove(id)
    }

    pub fn clear(&self) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poll for `id` every `interval` until it appears or `timeout` elapses.
    ///
    /// Returns `None` on timeout. The store has no completion notification of
    /// its own; this is a convenience for transports that read results by id.
    pub async fn wait(&self, id: &str, interval: Duration, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(v) = self.get(id) {
                return Some(v);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(interval).await;
        }
    }
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore").field("len", &self.len()).finish()
    }
}
