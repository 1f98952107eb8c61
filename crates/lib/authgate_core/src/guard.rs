//! Per-operation deadline and cooperative cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthError;

/// Run `fut` until it completes, `timeout` elapses, or `cancel` fires.
///
/// The losing future is dropped, so no store call or hashing step keeps
/// running on behalf of an abandoned request. Both deadline and
/// cancellation yield [`AuthError::Cancelled`].
pub async fn bounded<T, F>(
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        outcome = tokio::time::timeout(timeout, fut) => {
            outcome.unwrap_or(Err(AuthError::Cancelled))
        }
    }
}
