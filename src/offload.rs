//! Running memoized calls from async code.
//!
//! Cache round-trips and producers are blocking, so async callers hand the
//! whole call to tokio's blocking pool instead of stalling a runtime worker.

use crate::cache::key::Arguments;
use crate::cache::memoize::Memoized;
use crate::cache::value::Cacheable;
use std::sync::Arc;

/// Runs `memoized.call(args)` on a blocking worker and returns its result.
///
/// # Panics
///
/// A panic inside the producer is resumed on the awaiting task. Panics if the
/// runtime shuts down before the blocking task gets to run; see the crate docs.
pub async fn call_blocking<F, A, T, E>(memoized: Arc<Memoized<F>>, args: A) -> Result<T, E>
where
    F: Fn(&A) -> Result<T, E> + Send + Sync + 'static,
    A: Arguments + Send + 'static,
    T: Cacheable + Send + 'static,
    E: Send + 'static,
{
    match tokio::task::spawn_blocking(move || memoized.call(args)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        // Only reachable when the runtime is shutting down.
        Err(e) => panic!("blocking cache call did not run: {}", e),
    }
}
