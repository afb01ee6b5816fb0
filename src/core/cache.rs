//! Short-lived cache for derived aggregates (conversation lists, dashboards).
//! Expired entries are dropped when next touched.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct TtlCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, V)>>,
}

impl<V: Clone + Send + Sync> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((stored_at, value)) if stored_at.elapsed() < self.ttl => {
                    return Some(value.clone())
                }
                None => return None,
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if let Some((stored_at, _)) = entries.get(key) {
            if stored_at.elapsed() >= self.ttl {
                entries.remove(key);
            }
        }
        None
    }

    pub async fn insert(&self, key: impl Into<String>, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries
            .write()
            .await
            .insert(key.into(), (Instant::now(), value));
    }

    /// Drops every key starting with `prefix`. Returns how many were removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache").field("ttl", &self.ttl).finish()
    }
}

/// Cache key namespace for everything derived from one company's data.
pub fn company_prefix(company_id: i64) -> String {
    format!("company:{}:", company_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hit_then_expire() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("company:1:dashboard", 7).await;
        assert_eq!(cache.get("company:1:dashboard").await, Some(7));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("company:1:dashboard").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_prefix_is_per_company() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(format!("{}dashboard", company_prefix(1)), 1).await;
        cache
            .insert(format!("{}conversations", company_prefix(1)), 2)
            .await;
        cache.insert(format!("{}dashboard", company_prefix(11)), 3).await;

        assert_eq!(cache.invalidate_prefix(&company_prefix(1)).await, 2);
        assert_eq!(cache.len().await, 1);
    }
}
