//! Memoizing cache over Redis for pipeline producers.
//!
//! Cache failures never reach callers: a backend that is down, slow to answer
//! or returning garbage turns lookups into misses and writes into no-ops.
//!
//! The one exception is [`offload::call_blocking`]. If the tokio runtime shuts
//! down before its blocking task runs, there is no result to return and the
//! awaiting task panics. Callers that await offloaded calls during shutdown
//! should use [`Memoized::call`] directly instead.

pub mod cache;
pub mod config;
pub mod error;
pub mod offload;
pub mod testing; // In-memory stores for tests
pub mod utils;

pub use cache::{CacheHandle, CallArgs, Cacheable, Frame, Memoized};
pub use config::CacheSettings;
pub use error::CacheError;
