//! ResultStore - Latest Published Result per Channel
//!
//! ## Responsibilities
//!
//! - Concurrency-safe channel -> ChannelResult map
//! - Atomic whole-value replace on publish
//! - Last-write-wins reconciliation across publish workers
//!
//! Publish workers may complete out of order; a result older than the
//! currently published one (by timestamp) is discarded rather than
//! rolling the channel back.

use crate::models::ChannelResult;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Latest-value store read by the query and streaming boundaries
pub struct ResultStore {
    results: RwLock<HashMap<u32, ChannelResult>>,
}

impl ResultStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            results: RwLock::new(HashMap::new()),
        }
    }

    /// Latest result for a channel, if any has been published
    pub async fn get(&self, channel_id: u32) -> Option<ChannelResult> {
        let results = self.results.read().await;
        results.get(&channel_id).cloned()
    }

    /// Atomically replace a channel's result.
    ///
    /// Returns `false` when the store already holds a newer result for the
    /// channel; the incoming result is dropped in that case.
    pub async fn publish(&self, result: ChannelResult) -> bool {
        let mut results = self.results.write().await;
        if let Some(current) = results.get(&result.channel_id) {
            if current.timestamp > result.timestamp {
                tracing::debug!(
                    channel_id = result.channel_id,
                    "Discarding stale result (newer one already published)"
                );
                return false;
            }
        }
        results.insert(result.channel_id, result);
        true
    }

    /// Channel ids that currently have a published result, sorted
    pub async fn keys(&self) -> Vec<u32> {
        let results = self.results.read().await;
        let mut keys: Vec<u32> = results.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// All published results, one snapshot per channel
    pub async fn snapshot(&self) -> Vec<ChannelResult> {
        let results = self.results.read().await;
        let mut all: Vec<ChannelResult> = results.values().cloned().collect();
        all.sort_unstable_by_key(|r| r.channel_id);
        all
    }

    /// Remove a channel's published result (on deregistration)
    pub async fn remove(&self, channel_id: u32) -> bool {
        let mut results = self.results.write().await;
        results.remove(&channel_id).is_some()
    }

    pub async fn len(&self) -> usize {
        let results = self.results.read().await;
        results.len()
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}
