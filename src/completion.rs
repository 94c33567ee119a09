//! Callback-style completion over the future-returning core.

use std::future::Future;

/// Await `fut` and hand its result to `done`. `done` runs exactly once.
pub async fn deliver<T, E, F>(fut: impl Future<Output = Result<T, E>>, done: F)
where
    F: FnOnce(Result<T, E>),
{
    done(fut.await);
}
