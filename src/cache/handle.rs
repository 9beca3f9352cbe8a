//! The process-wide cache handle and the direct cache operations built on it.

use crate::cache::backend::{KvStore, RedisStore};
use crate::cache::key::producer_pattern;
use crate::config::CacheSettings;
use crate::error::CacheError;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

static GLOBAL: OnceCell<CacheHandle> = OnceCell::new();

/// Handle to the key-value store, or the "unavailable" sentinel.
///
/// Established once; a handle that failed to connect stays unavailable for
/// the rest of the process and is never retried. Every operation on an
/// unavailable handle is a miss or a no-op. Clones share the same store.
#[derive(Clone)]
pub struct CacheHandle {
    store: Option<Arc<dyn KvStore>>,
    default_ttl: Duration,
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("store", &self.store.as_ref().map(|s| s.describe()))
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl CacheHandle {
    /// Connects to Redis with `settings`. Never fails: on any error the
    /// returned handle is unavailable and caching is disabled.
    pub fn connect(settings: &CacheSettings) -> Self {
        let default_ttl = settings.default_ttl();
        if let Err(e) = settings.validate() {
            warn!("Invalid cache settings: {}. Caching will be disabled.", e);
            return Self::unavailable_with_ttl(default_ttl);
        }
        match RedisStore::connect(settings) {
            Ok(store) => {
                info!("Connected to {}", store.describe());
                Self {
                    store: Some(Arc::new(store)),
                    default_ttl,
                }
            }
            Err(e) => {
                warn!("Failed to connect to Redis: {}. Caching will be disabled.", e);
                Self::unavailable_with_ttl(default_ttl)
            }
        }
    }

    /// Wraps an already constructed store, running the same liveness check as `connect`.
    pub fn with_store(store: Arc<dyn KvStore>, default_ttl: Duration) -> Self {
        match store.ping() {
            Ok(()) => {
                debug!("Cache store ready: {}", store.describe());
                Self {
                    store: Some(store),
                    default_ttl,
                }
            }
            Err(e) => {
                warn!(
                    "Cache store {} failed liveness check: {}. Caching will be disabled.",
                    store.describe(),
                    e
                );
                Self::unavailable_with_ttl(default_ttl)
            }
        }
    }

    pub fn unavailable() -> Self {
        Self::unavailable_with_ttl(CacheSettings::default().default_ttl())
    }

    fn unavailable_with_ttl(default_ttl: Duration) -> Self {
        Self {
            store: None,
            default_ttl,
        }
    }

    /// The handle shared by the whole process, connected from the environment
    /// (and `.env`) on first use.
    pub fn global() -> &'static CacheHandle {
        GLOBAL.get_or_init(|| {
            dotenv::dotenv().ok();
            let settings = CacheSettings::from_env();
            settings.log_settings();
            CacheHandle::connect(&settings)
        })
    }

    /// Installs `handle` as the process-wide handle. Returns it back if one
    /// was already established.
    pub fn install_global(handle: CacheHandle) -> Result<(), CacheHandle> {
        GLOBAL.set(handle)
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn store(&self) -> Option<&Arc<dyn KvStore>> {
        self.store.as_ref()
    }

    /// Closes the underlying connection for every clone of this handle.
    /// Later operations behave as misses and no-ops.
    pub fn close(&self) {
        if let Some(store) = &self.store {
            store.close();
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store = self.store.as_ref()?;
        match store.get(key) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Unreadable cached value for key {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Error reading from cache for key {}: {}", key, e);
                None
            }
        }
    }

    /// Writes `value` with `ttl`, or the handle's default TTL when `None`.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let ttl = ttl.unwrap_or(self.default_ttl);
        let written = serde_json::to_vec(value)
            .map_err(CacheError::from)
            .and_then(|blob| store.set_ex(key, &blob, ttl));
        match written {
            Ok(()) => debug!("Cache SET for key {} with TTL {:?}", key, ttl),
            Err(e) => warn!("Error writing to cache for key {}: {}", key, e),
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        store.delete(key).unwrap_or_else(|e| {
            warn!("Cache delete error for key {}: {}", key, e);
            false
        })
    }

    /// Deletes all keys matching a glob pattern such as `portfolio:42:*`.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        match store.delete_matching(pattern) {
            Ok(count) => {
                debug!("Invalidated {} keys matching '{}'", count, pattern);
                count
            }
            Err(e) => {
                warn!("Cache invalidate pattern error for '{}': {}", pattern, e);
                0
            }
        }
    }

    /// Drops every memoized entry of one producer.
    pub fn invalidate_producer(&self, producer: &str) -> usize {
        self.invalidate_pattern(&producer_pattern(producer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingStore, MemoryStore};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn memory_handle() -> (Arc<MemoryStore>, CacheHandle) {
        let store = Arc::new(MemoryStore::new());
        let handle = CacheHandle::with_store(store.clone(), Duration::from_secs(30));
        (store, handle)
    }

    #[test]
    fn unavailable_handle_is_inert() {
        let handle = CacheHandle::unavailable();
        assert!(!handle.is_available());
        handle.set_json("k", &1u32, None);
        assert_eq!(handle.get_json::<u32>("k"), None);
        assert!(!handle.delete("k"));
        assert_eq!(handle.invalidate_pattern("*"), 0);
        handle.close();
    }

    #[test]
    fn failed_liveness_check_disables_caching() {
        let handle = CacheHandle::with_store(Arc::new(FailingStore::new()), Duration::from_secs(1));
        assert!(!handle.is_available());
    }

    #[test]
    fn invalid_settings_disable_caching_without_connecting() {
        let settings = CacheSettings {
            redis_port: 0,
            ..CacheSettings::default()
        };
        assert!(!CacheHandle::connect(&settings).is_available());
    }

    #[test]
    fn json_round_trip_and_delete() {
        let (_store, handle) = memory_handle();
        let mut prices = HashMap::new();
        prices.insert("HPG".to_string(), 27.5f64);

        handle.set_json("prices", &prices, None);
        assert_eq!(handle.get_json::<HashMap<String, f64>>("prices"), Some(prices));
        assert!(handle.delete("prices"));
        assert!(!handle.delete("prices"));
        assert_eq!(handle.get_json::<HashMap<String, f64>>("prices"), None);
    }

    #[test]
    fn unreadable_value_is_a_miss() {
        let (store, handle) = memory_handle();
        store.insert_raw("broken", b"\x00\x01not-json".to_vec(), Duration::from_secs(30));
        assert_eq!(handle.get_json::<u32>("broken"), None);
    }

    #[test]
    fn backend_errors_are_swallowed() {
        let handle = CacheHandle::with_store(Arc::new(FailingStore::reachable()), Duration::from_secs(1));
        assert!(handle.is_available());
        handle.set_json("k", &1u32, None);
        assert_eq!(handle.get_json::<u32>("k"), None);
        assert!(!handle.delete("k"));
        assert_eq!(handle.invalidate_producer("fetch"), 0);
    }

    #[test]
    fn invalidate_pattern_only_touches_matches() {
        let (store, handle) = memory_handle();
        handle.set_json("portfolio:u1:p1:summary", &1u32, None);
        handle.set_json("portfolio:u1:p1:holdings", &2u32, None);
        handle.set_json("portfolio:u2:p9:summary", &3u32, None);

        assert_eq!(handle.invalidate_pattern("portfolio:u1:p1:*"), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(handle.get_json::<u32>("portfolio:u2:p9:summary"), Some(3));
    }

    #[test]
    fn default_ttl_applies_when_none_given() {
        let store = Arc::new(MemoryStore::new());
        let handle = CacheHandle::with_store(store.clone(), Duration::from_millis(30));
        handle.set_json("short", &"lived", None);
        assert_eq!(handle.get_json::<String>("short").as_deref(), Some("lived"));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(handle.get_json::<String>("short"), None);
    }

    #[test]
    fn close_turns_operations_into_misses() {
        let (_store, handle) = memory_handle();
        let other = handle.clone();
        handle.set_json("k", &1u32, None);
        handle.close();
        assert_eq!(other.get_json::<u32>("k"), None);
    }

    // The only test in this binary that touches the process-wide handle.
    #[test]
    fn installed_handle_becomes_the_global_one() {
        let (store, handle) = memory_handle();
        assert!(CacheHandle::install_global(handle).is_ok());

        let global = CacheHandle::global();
        assert!(global.is_available());
        assert_eq!(global.default_ttl(), Duration::from_secs(30));
        global.set_json("global:k", &5u32, None);
        assert!(store.contains("global:k"));

        let rejected = CacheHandle::install_global(CacheHandle::unavailable());
        assert!(!rejected.expect_err("second install must be refused").is_available());
        assert!(CacheHandle::global().is_available());
    }
}
