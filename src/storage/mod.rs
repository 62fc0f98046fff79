//! Cache and user-store backends.

pub mod memory;
pub mod noop;
pub mod redis;
pub mod sql;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use self::noop::NoOpCache;
use self::redis::RedisCache;
use self::traits::CacheStore;

/// Connectivity check budget for the cache at startup.
pub const CACHE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// `"<prefix>:<id>"`
pub fn cache_key(prefix: &str, id: i64) -> String {
    format!("{}:{}", prefix, id)
}

/// Pick the cache backend once, at startup.
///
/// Returns [`RedisCache`] when `url` is set and the server answers within
/// `ping_timeout`, otherwise [`NoOpCache`]. Never fails.
pub async fn connect_cache(url: Option<&str>, ping_timeout: Duration) -> Arc<dyn CacheStore> {
    let Some(url) = url.filter(|u| !u.is_empty()) else {
        info!("No cache configured, caching disabled");
        return Arc::new(NoOpCache);
    };

    match RedisCache::connect(url, None, ping_timeout).await {
        Ok(cache) => {
            info!("Connected to Redis cache");
            Arc::new(cache)
        }
        Err(e) => {
            warn!(error = %e, "Cache unavailable, continuing without cache");
            crate::metrics::record_cache_fallback();
            Arc::new(NoOpCache)
        }
    }
}
