//! Lookaside memoization of producer calls.
//!
//! A [`Memoized`] producer consults the cache before running. Cache-side
//! trouble (store down, read or write errors, unreadable blobs) only ever
//! costs a producer call; errors returned by the producer itself are passed
//! through untouched.
//!
//! Concurrent callers that miss on the same key all run the producer and all
//! write; the last write wins.

use crate::cache::backend::KvStore;
use crate::cache::handle::CacheHandle;
use crate::cache::key::{derive_key, Arguments, CacheKey};
use crate::cache::value::Cacheable;
use crate::error::CacheError;
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one memoized producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub skipped: u64,
    pub backend_errors: u64,
    pub bypassed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    skipped: AtomicU64,
    backend_errors: AtomicU64,
    bypassed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MemoStats {
        MemoStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
        }
    }
}

/// A producer wrapped with a cache lookaside.
///
/// ```ignore
/// let fetch = Memoized::new("fetch_company_news", cache.clone(), |args: &CallArgs| {
///     news_api.fetch(&args.named::<String>("ticker").unwrap_or_default())
/// })
/// .with_ttl(Duration::from_secs(900));
///
/// let frame = fetch.call(CallArgs::new().kwarg("ticker", "HPG"))?;
/// ```
pub struct Memoized<F> {
    name: String,
    ttl: Duration,
    cache: CacheHandle,
    producer: F,
    counters: Counters,
}

impl<F> fmt::Debug for Memoized<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("cache", &self.cache)
            .finish()
    }
}

impl<F> Memoized<F> {
    /// Wraps `producer` under the identity `name`, using the handle's default TTL.
    pub fn new<A, T, E>(name: impl Into<String>, cache: CacheHandle, producer: F) -> Self
    where
        F: Fn(&A) -> Result<T, E>,
    {
        Self {
            name: name.into(),
            ttl: cache.default_ttl(),
            cache,
            producer,
            counters: Counters::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> MemoStats {
        self.counters.snapshot()
    }

    pub fn key_for<A: Arguments>(&self, args: &A) -> CacheKey {
        derive_key(&self.name, &args.to_call_args())
    }

    pub fn call<A, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(&A) -> Result<T, E>,
        A: Arguments,
        T: Cacheable,
    {
        let Some(store) = self.cache.store() else {
            Counters::bump(&self.counters.bypassed);
            return (self.producer)(&args);
        };

        let key = self.key_for(&args);
        if let Some(cached) = self.lookup::<T>(store.as_ref(), &key) {
            return Ok(cached);
        }

        let result = (self.producer)(&args)?;

        if result.should_cache() {
            self.store_result(store.as_ref(), &key, &result);
        } else {
            Counters::bump(&self.counters.skipped);
            debug!("Not caching empty result for {}", self.name);
        }
        Ok(result)
    }

    /// Drops every cached result of this producer.
    pub fn invalidate(&self) -> usize {
        self.cache.invalidate_producer(&self.name)
    }

    fn lookup<T: Cacheable>(&self, store: &dyn KvStore, key: &CacheKey) -> Option<T> {
        match store.get(key.as_str()) {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    Counters::bump(&self.counters.hits);
                    info!("Cache HIT for {}", self.name);
                    Some(value)
                }
                Err(e) => {
                    Counters::bump(&self.counters.backend_errors);
                    warn!("Unreadable cached value for {} ({}): {}", self.name, key, e);
                    None
                }
            },
            Ok(None) => {
                Counters::bump(&self.counters.misses);
                debug!("Cache MISS for {} ({})", self.name, key);
                None
            }
            Err(e) => {
                Counters::bump(&self.counters.backend_errors);
                warn!("Error reading from cache for {}: {}", self.name, e);
                None
            }
        }
    }

    fn store_result<T: Cacheable>(&self, store: &dyn KvStore, key: &CacheKey, result: &T) {
        let written = serde_json::to_vec(result)
            .map_err(CacheError::from)
            .and_then(|blob| store.set_ex(key.as_str(), &blob, self.ttl));
        match written {
            Ok(()) => {
                Counters::bump(&self.counters.stores);
                debug!("Cache SET for {} (ttl {:?})", self.name, self.ttl);
            }
            Err(e) => {
                Counters::bump(&self.counters.backend_errors);
                warn!("Error writing to cache for {}: {}", self.name, e);
            }
        }
    }
}

/// Wraps `producer` and returns a plain callable with the lookaside behaviour.
pub fn memoize<A, T, E, F>(
    name: impl Into<String>,
    cache: CacheHandle,
    ttl: Duration,
    producer: F,
) -> impl Fn(A) -> Result<T, E>
where
    F: Fn(&A) -> Result<T, E>,
    A: Arguments,
    T: Cacheable,
{
    let memoized = Memoized::new(name, cache, producer).with_ttl(ttl);
    move |args| memoized.call(args)
}
