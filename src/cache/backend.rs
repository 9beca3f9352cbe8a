//! Key-value store seam used by the cache, and its Redis implementation.

use crate::config::settings::mask_credentials;
use crate::config::CacheSettings;
use crate::error::CacheError;
use log::{debug, error, info, warn};
use redis::Commands;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Blocking key-value store holding opaque blobs with server-side expiry.
pub trait KvStore: Send + Sync {
    fn ping(&self) -> Result<(), CacheError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value` under `key`, expiring `ttl` after the write.
    fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Returns `true` if the key existed.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Deletes every key matching a glob pattern; returns how many were removed.
    fn delete_matching(&self, pattern: &str) -> Result<usize, CacheError>;

    /// Releases the underlying connection. Later calls fail with `CacheError::Closed`.
    fn close(&self) {}

    fn describe(&self) -> String;
}

/// Redis-backed store over a single blocking connection.
pub struct RedisStore {
    conn: Mutex<Option<redis::Connection>>,
    /// Connection URL with credentials masked, for logs.
    redis_url: String,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("redis_url", &self.redis_url)
            .field("conn", &"<redis::Connection>")
            .finish()
    }
}

impl RedisStore {
    /// Opens the connection and checks liveness with `PING`.
    pub fn connect(settings: &CacheSettings) -> Result<Self, CacheError> {
        let url = settings.connection_url();
        let redis_url = mask_credentials(&url);
        info!("Opening Redis connection to {}", redis_url);

        let client = redis::Client::open(url.as_str())
            .map_err(|e| CacheError::Config(format!("invalid Redis URL: {}", e)))?;
        let conn = client
            .get_connection_with_timeout(settings.connect_timeout())
            .map_err(|e| {
                error!("Failed to connect to Redis: {}", e);
                CacheError::Connection(e.to_string())
            })?;
        conn.set_read_timeout(settings.io_timeout())?;
        conn.set_write_timeout(settings.io_timeout())?;

        let store = Self {
            conn: Mutex::new(Some(conn)),
            redis_url,
        };
        store.ping()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<redis::Connection>>, CacheError> {
        self.conn
            .lock()
            .map_err(|_| CacheError::Backend("Redis connection lock poisoned".to_string()))
    }

    fn with_conn<T>(
        &self,
        op: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, CacheError> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(CacheError::Closed)?;
        op(conn).map_err(CacheError::from)
    }
}

impl KvStore for RedisStore {
    fn ping(&self) -> Result<(), CacheError> {
        let reply: String = self.with_conn(|conn| redis::cmd("PING").query(conn))?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Connection(format!("unexpected PING reply: {}", reply)))
        }
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.with_conn(|conn| conn.get::<_, Option<Vec<u8>>>(key))
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        if ttl.subsec_nanos() == 0 {
            self.with_conn(|conn| conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()))
        } else {
            // Sub-second TTLs go through PSETEX.
            let millis = psetex_millis(ttl);
            self.with_conn(|conn| {
                redis::cmd("PSETEX")
                    .arg(key)
                    .arg(millis)
                    .arg(value)
                    .query::<()>(conn)
            })
        }
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed: usize = self.with_conn(|conn| conn.del(key))?;
        Ok(removed > 0)
    }

    fn delete_matching(&self, pattern: &str) -> Result<usize, CacheError> {
        self.with_conn(|conn| {
            let keys: Vec<String> = conn.scan_match::<_, String>(pattern)?.collect();
            if keys.is_empty() {
                return Ok(0);
            }
            debug!("Deleting {} keys matching '{}'", keys.len(), pattern);
            conn.del::<_, usize>(keys)
        })
    }

    fn close(&self) {
        match self.lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    info!("Redis connection to {} closed", self.redis_url);
                }
            }
            Err(e) => warn!("Could not close Redis connection: {}", e),
        }
    }

    fn describe(&self) -> String {
        format!("redis ({})", self.redis_url)
    }
}

/// PSETEX argument for `ttl`: at least one millisecond, saturating at `u64::MAX`.
fn psetex_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psetex_millis_is_at_least_one_and_saturates() {
        assert_eq!(psetex_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(psetex_millis(Duration::from_nanos(1)), 1);
        assert_eq!(psetex_millis(Duration::MAX), u64::MAX);
    }
}
