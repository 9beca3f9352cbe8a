//! In-process `KvStore` fakes for exercising the cache without a Redis server.

use crate::cache::backend::KvStore;
use crate::error::CacheError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// TTL-honouring in-memory store. Expired entries read as absent.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    closed: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, CacheError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| CacheError::Backend("memory store lock poisoned".to_string()))?;
        let now = Instant::now();
        guard.retain(|_, entry| entry.expires_at > now);
        Ok(guard)
    }

    /// Stores bytes as-is, bypassing serialization. Used to plant corrupt blobs.
    pub fn insert_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if let Ok(mut entries) = self.entries() {
            entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().map(|e| e.contains_key(key)).unwrap_or(false)
    }

    /// Time left before `key` expires.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let entries = self.entries().ok()?;
        entries
            .get(key)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `get` calls served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `set_ex` calls accepted.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KvStore for MemoryStore {
    fn ping(&self) -> Result<(), CacheError> {
        self.entries().map(|_| ())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::Backend("invalid expire time in 'setex' command".to_string()));
        }
        let mut entries = self.entries()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries()?.remove(key).is_some())
    }

    fn delete_matching(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|key, _| !glob_match(pattern, key));
        Ok(before - entries.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// A store whose reads, writes and deletes all fail. Built with [`FailingStore::new`]
/// the liveness check fails too; [`FailingStore::reachable`] answers `PING`.
#[derive(Debug, Default)]
pub struct FailingStore {
    answers_ping: bool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self { answers_ping: false }
    }

    pub fn reachable() -> Self {
        Self { answers_ping: true }
    }

    fn fail<T>(&self, op: &str) -> Result<T, CacheError> {
        Err(CacheError::Backend(format!("injected {} failure", op)))
    }
}

impl KvStore for FailingStore {
    fn ping(&self) -> Result<(), CacheError> {
        if self.answers_ping {
            Ok(())
        } else {
            Err(CacheError::Connection("connection refused".to_string()))
        }
    }

    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.fail("GET")
    }

    fn set_ex(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
        self.fail("SETEX")
    }

    fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        self.fail("DEL")
    }

    fn delete_matching(&self, _pattern: &str) -> Result<usize, CacheError> {
        self.fail("SCAN")
    }

    fn describe(&self) -> String {
        "failing".to_string()
    }
}

/// Redis-style glob: `*` matches any run, `?` one character, everything else literally.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
