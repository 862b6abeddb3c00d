// ============================================================================
// Response Cache - keyed memoization of idempotent upstream GETs
// ============================================================================
//
// Read-through, opt-in per route. Keys follow
// `<upstream>:<tenant>:<resource>[:<id>]`. Writes invalidate the item key,
// the list key, and any aggregate keys the route names. A failing KV is a
// transparent miss, never an error.
//
// ============================================================================

use portico_config::CacheConfig;
use portico_kv::KvStore;
use serde_json::Value;
use std::sync::Arc;

use crate::routes::table::CacheTier;

pub struct ResponseCache {
    kv: Arc<dyn KvStore>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(kv: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self { kv, config }
    }

    pub fn key(upstream: &str, tenant: &str, resource: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("cache:{}:{}:{}:{}", upstream, tenant, resource, id),
            None => format!("cache:{}:{}:{}", upstream, tenant, resource),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "discarding unparseable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    pub async fn put(&self, key: &str, value: &Value, tier: CacheTier) {
        let ttl = match tier {
            CacheTier::Item => self.config.ttl_secs,
            CacheTier::Reference => self.config.reference_ttl_secs,
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        if let Err(e) = self.kv.set_ex(key, &raw, ttl).await {
            tracing::debug!(key = %key, error = %e, "cache write failed");
        }
    }

    /// Remove the keys a write to `resource` makes stale: the item key when
    /// an id is known, the list key, and each named aggregate.
    pub async fn invalidate(
        &self,
        upstream: &str,
        tenant: &str,
        resource: &str,
        id: Option<&str>,
        aggregates: &[&str],
    ) {
        let mut keys = Vec::with_capacity(2 + aggregates.len());
        if let Some(id) = id {
            keys.push(Self::key(upstream, tenant, resource, Some(id)));
        }
        keys.push(Self::key(upstream, tenant, resource, None));
        for aggregate in aggregates {
            keys.push(Self::key(upstream, tenant, aggregate, None));
        }

        for key in keys {
            if let Err(e) = self.kv.del(&key).await {
                tracing::debug!(key = %key, error = %e, "cache invalidation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_kv::MemoryStore;
    use serde_json::json;

    fn cache() -> ResponseCache {
        ResponseCache::new(
            Arc::new(MemoryStore::new()),
            CacheConfig {
                ttl_secs: 300,
                reference_ttl_secs: 600,
            },
        )
    }

    #[test]
    fn key_format() {
        assert_eq!(
            ResponseCache::key("service-a", "t1", "item", None),
            "cache:service-a:t1:item"
        );
        assert_eq!(
            ResponseCache::key("service-a", "t1", "item", Some("42")),
            "cache:service-a:t1:item:42"
        );
    }

    #[tokio::test]
    async fn round_trip_and_invalidate() {
        let cache = cache();
        let key = ResponseCache::key("service-a", "t1", "item", None);
        let body = json!({"success": true, "data": [1, 2]});

        assert!(cache.get(&key).await.is_none());
        cache.put(&key, &body, CacheTier::Item).await;
        assert_eq!(cache.get(&key).await, Some(body));

        cache
            .invalidate("service-a", "t1", "item", None, &["statistics"])
            .await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_covers_item_list_and_aggregates() {
        let cache = cache();
        let item_key = ResponseCache::key("service-a", "t1", "item", Some("42"));
        let list_key = ResponseCache::key("service-a", "t1", "item", None);
        let agg_key = ResponseCache::key("service-a", "t1", "statistics", None);

        for key in [&item_key, &list_key, &agg_key] {
            cache.put(key, &json!({"data": 1}), CacheTier::Item).await;
        }

        cache
            .invalidate("service-a", "t1", "item", Some("42"), &["statistics"])
            .await;

        assert!(cache.get(&item_key).await.is_none());
        assert!(cache.get(&list_key).await.is_none());
        assert!(cache.get(&agg_key).await.is_none());
    }

    #[tokio::test]
    async fn tenants_do_not_share_entries() {
        let cache = cache();
        let t1 = ResponseCache::key("service-a", "t1", "item", None);
        let t2 = ResponseCache::key("service-a", "t2", "item", None);

        cache.put(&t1, &json!({"data": "one"}), CacheTier::Item).await;
        assert!(cache.get(&t2).await.is_none());
    }
}
