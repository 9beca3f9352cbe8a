// src/cache.rs
//! Redis-backed lookaside cache for pipeline producers: key derivation, the
//! shared backend handle, and the memoizing wrapper.

pub mod backend;
pub mod handle;
pub mod key;
pub mod memoize;
pub mod value;

pub use backend::{KvStore, RedisStore};
pub use handle::CacheHandle;
pub use key::{derive_key, producer_pattern, Arguments, CacheKey, CallArgs, KEY_NAMESPACE};
pub use memoize::{memoize, MemoStats, Memoized};
pub use value::{Cacheable, Frame};
