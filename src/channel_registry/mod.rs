//! ChannelRegistry - Control-Plane Channel State
//!
//! ## Responsibilities
//!
//! - Hold the channel id -> stream URL mapping serviced by the orchestrator
//! - Validate registration requests entry by entry
//! - Apply the configured policy for channels missing from an update
//!
//! The registry is written by the control-plane boundary and read by the
//! orchestrator every cycle, so all state sits behind one RwLock.

use std::collections::HashMap;
use tokio::sync::RwLock;

/// Accepted stream URL schemes
const ALLOWED_SCHEMES: [&str; 3] = ["http", "https", "rtsp"];

/// What to do with channels that were registered before but are absent
/// from a new `update_channels` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingChannelPolicy {
    /// Keep servicing them until explicitly removed (default)
    Retain,
    /// Deregister them: stop analysis and release their capture
    Drop,
}

impl MissingChannelPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "retain" => Some(Self::Retain),
            "drop" => Some(Self::Drop),
            _ => None,
        }
    }
}

/// Outcome of one `update_channels` call
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Channel ids actively serviced after the update, sorted
    pub active: Vec<u32>,
    /// Channels deregistered by the missing-channel policy
    pub removed: Vec<u32>,
    /// Entries rejected with the reason, others in the request still applied
    pub rejected: Vec<(String, String)>,
}

/// Channel id -> source address registry
pub struct ChannelRegistry {
    channels: RwLock<HashMap<u32, String>>,
    policy: MissingChannelPolicy,
}

impl ChannelRegistry {
    pub fn new(policy: MissingChannelPolicy) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Register or update channels from an id -> URL mapping.
    ///
    /// Malformed entries are rejected individually; the rest of the
    /// request is still applied.
    pub async fn update_channels(&self, urls: &HashMap<String, String>) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();
        let mut incoming: HashMap<u32, String> = HashMap::new();

        for (raw_id, url) in urls {
            match validate_entry(raw_id, url) {
                Ok(channel_id) => {
                    incoming.insert(channel_id, url.clone());
                }
                Err(reason) => {
                    tracing::warn!(
                        channel = %raw_id,
                        reason = %reason,
                        "Rejected channel registration entry"
                    );
                    outcome.rejected.push((raw_id.clone(), reason));
                }
            }
        }

        let mut channels = self.channels.write().await;

        if self.policy == MissingChannelPolicy::Drop {
            let missing: Vec<u32> = channels
                .keys()
                .filter(|id| !incoming.contains_key(id))
                .copied()
                .collect();
            for id in missing {
                channels.remove(&id);
                outcome.removed.push(id);
                tracing::info!(channel_id = id, "Channel deregistered (absent from update)");
            }
        }

        for (channel_id, url) in incoming {
            let previous = channels.insert(channel_id, url);
            if previous.is_none() {
                tracing::info!(channel_id = channel_id, "Channel registered");
            } else if previous != channels.get(&channel_id).cloned() {
                tracing::info!(channel_id = channel_id, "Channel source updated");
            }
        }

        outcome.active = channels.keys().copied().collect();
        outcome.active.sort_unstable();
        outcome.removed.sort_unstable();
        outcome
    }

    /// Explicitly deregister one channel
    pub async fn remove(&self, channel_id: u32) -> bool {
        let mut channels = self.channels.write().await;
        let removed = channels.remove(&channel_id).is_some();
        if removed {
            tracing::info!(channel_id = channel_id, "Channel deregistered");
        }
        removed
    }

    /// Current (id, url) pairs, sorted by id. Taken once per cycle by the
    /// orchestrator.
    pub async fn snapshot(&self) -> Vec<(u32, String)> {
        let channels = self.channels.read().await;
        let mut pairs: Vec<(u32, String)> = channels
            .iter()
            .map(|(id, url)| (*id, url.clone()))
            .collect();
        pairs.sort_unstable_by_key(|(id, _)| *id);
        pairs
    }

    pub async fn contains(&self, channel_id: u32) -> bool {
        let channels = self.channels.read().await;
        channels.contains_key(&channel_id)
    }

    pub async fn len(&self) -> usize {
        let channels = self.channels.read().await;
        channels.len()
    }
}

/// Validate one registration entry, returning the parsed channel id
fn validate_entry(raw_id: &str, url: &str) -> std::result::Result<u32, String> {
    let channel_id: u32 = raw_id
        .trim()
        .parse()
        .map_err(|_| format!("invalid channel id '{}'", raw_id))?;

    let parsed = url::Url::parse(url).map_err(|e| format!("invalid url: {}", e))?;
    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(format!("unsupported scheme '{}'", parsed.scheme()));
    }

    Ok(channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_update_applies_valid_rejects_invalid() {
        let registry = ChannelRegistry::new(MissingChannelPolicy::Retain);
        let outcome = registry
            .update_channels(&request(&[
                ("1", "https://cctv.example/ch1.m3u8"),
                ("two", "https://cctv.example/ch2.m3u8"),
                ("3", "not a url"),
                ("4", "ftp://cctv.example/ch4"),
                ("5", "rtsp://cctv.example/ch5"),
            ]))
            .await;

        assert_eq!(outcome.active, vec![1, 5]);
        assert_eq!(outcome.rejected.len(), 3);
        assert!(registry.contains(1).await);
        assert!(!registry.contains(3).await);
    }

    #[tokio::test]
    async fn test_retain_policy_keeps_missing_channels() {
        let registry = ChannelRegistry::new(MissingChannelPolicy::Retain);
        registry
            .update_channels(&request(&[("1", "https://a/1"), ("2", "https://a/2")]))
            .await;

        let outcome = registry
            .update_channels(&request(&[("2", "https://a/2b")]))
            .await;

        assert_eq!(outcome.active, vec![1, 2]);
        assert!(outcome.removed.is_empty());
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[1], (2, "https://a/2b".to_string()));
    }

    #[tokio::test]
    async fn test_drop_policy_deregisters_missing_channels() {
        let registry = ChannelRegistry::new(MissingChannelPolicy::Drop);
        registry
            .update_channels(&request(&[("1", "https://a/1"), ("2", "https://a/2")]))
            .await;

        let outcome = registry
            .update_channels(&request(&[("2", "https://a/2")]))
            .await;

        assert_eq!(outcome.active, vec![2]);
        assert_eq!(outcome.removed, vec![1]);
        assert!(!registry.contains(1).await);
    }

    #[tokio::test]
    async fn test_explicit_remove() {
        let registry = ChannelRegistry::new(MissingChannelPolicy::Retain);
        registry
            .update_channels(&request(&[("7", "https://a/7")]))
            .await;

        assert!(registry.remove(7).await);
        assert!(!registry.remove(7).await);
        assert_eq!(registry.len().await, 0);
    }
}
