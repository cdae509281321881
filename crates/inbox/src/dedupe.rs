use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use unibox_core::error::StoreError;
use unibox_core::store::MessageStore;
use unibox_core::types::{dedupe_key, PlatformType};

#[derive(Debug, Default)]
struct RecentKeys {
    entries: HashMap<String, i64>,
    order: VecDeque<(String, i64)>,
}

impl RecentKeys {
    fn expire(&mut self, now: i64, ttl_secs: i64) {
        while let Some((old_key, old_ts)) = self.order.front() {
            if now - *old_ts <= ttl_secs {
                break;
            }
            let old_key = old_key.clone();
            let old_ts = *old_ts;
            self.order.pop_front();
            if self.entries.get(&old_key).is_some_and(|ts| *ts == old_ts) {
                self.entries.remove(&old_key);
            }
        }
    }

    fn evict_over(&mut self, max_entries: usize) {
        while self.entries.len() > max_entries {
            let Some((evict_key, evict_ts)) = self.order.pop_front() else {
                break;
            };
            if self.entries.get(&evict_key).is_some_and(|ts| *ts == evict_ts) {
                self.entries.remove(&evict_key);
            }
        }
    }
}

/// Deduplication gate in front of the store.
///
/// A bounded TTL cache answers repeat deliveries without a store round
/// trip; misses fall through to a lookup by natural key. Keys enter the
/// cache only once the store has confirmed them, so a failed insert never
/// suppresses the provider's redelivery. The store's conditional insert
/// remains the authority when two deliveries race past the gate.
pub struct DedupGate {
    store: Arc<dyn MessageStore>,
    recent: Mutex<RecentKeys>,
    ttl_secs: i64,
    max_entries: usize,
}

impl DedupGate {
    pub fn new(store: Arc<dyn MessageStore>, ttl_secs: i64, max_entries: usize) -> Self {
        Self {
            store,
            recent: Mutex::new(RecentKeys::default()),
            ttl_secs: ttl_secs.max(1),
            max_entries: max_entries.max(128),
        }
    }

    async fn seen_recently(&self, key: &str) -> bool {
        let now = Utc::now().timestamp();
        let mut recent = self.recent.lock().await;
        recent.expire(now, self.ttl_secs);
        recent.entries.contains_key(key)
    }

    /// Record a key the store now holds.
    pub async fn remember(&self, platform: PlatformType, platform_id: &str) {
        let now = Utc::now().timestamp();
        let key = dedupe_key(platform, platform_id);
        let mut recent = self.recent.lock().await;
        recent.entries.insert(key.clone(), now);
        recent.order.push_back((key, now));
        recent.evict_over(self.max_entries);
    }

    /// False when the event is already stored.
    pub async fn should_insert(&self, platform: PlatformType, platform_id: &str) -> Result<bool, StoreError> {
        if self.seen_recently(&dedupe_key(platform, platform_id)).await {
            return Ok(false);
        }
        match self.store.get_by_platform_id(platform, platform_id).await? {
            Some(_) => {
                self.remember(platform, platform_id).await;
                Ok(false)
            }
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibox_core::types::{InboxMessage, MessageType, NewMessage, Priority, Sender, Sentiment};
    use unibox_persistence::MemoryMessageStore;

    fn stored(platform_id: &str) -> InboxMessage {
        InboxMessage::from_new(
            NewMessage::new(PlatformType::Facebook, platform_id, "fb", MessageType::Comment, Sender::new("u1")),
            Priority::Medium,
            Sentiment::Neutral,
        )
    }

    #[tokio::test]
    async fn store_lookup_backs_the_cache() {
        let store = Arc::new(MemoryMessageStore::new());
        store.insert(stored("c1")).await.unwrap();
        let gate = DedupGate::new(store, 600, 1024);

        assert!(!gate.should_insert(PlatformType::Facebook, "c1").await.unwrap());
        assert!(gate.should_insert(PlatformType::Facebook, "c2").await.unwrap());
        // Same id on another platform is a different key.
        assert!(gate.should_insert(PlatformType::Instagram, "c1").await.unwrap());
    }

    #[tokio::test]
    async fn unconfirmed_keys_are_not_cached() {
        let gate = DedupGate::new(Arc::new(MemoryMessageStore::new()), 600, 1024);
        assert!(gate.should_insert(PlatformType::Twitter, "t1").await.unwrap());
        // Nothing was stored, so a redelivery still passes.
        assert!(gate.should_insert(PlatformType::Twitter, "t1").await.unwrap());

        gate.remember(PlatformType::Twitter, "t1").await;
        assert!(!gate.should_insert(PlatformType::Twitter, "t1").await.unwrap());
    }

    #[tokio::test]
    async fn cache_is_bounded() {
        let gate = DedupGate::new(Arc::new(MemoryMessageStore::new()), 600, 0);
        for i in 0..300 {
            gate.remember(PlatformType::Youtube, &i.to_string()).await;
        }
        assert!(gate.recent.lock().await.entries.len() <= 128);
        // The oldest keys were evicted and fall back to the (empty) store.
        assert!(gate.should_insert(PlatformType::Youtube, "0").await.unwrap());
    }
}
