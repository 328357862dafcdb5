//! Bounded waits on actuation calls.
//!
//! Motion and speech calls resolve only when the body reports completion.
//! A body that never reports back would otherwise stall the tracking loop
//! forever, so every call is raced against an optional deadline.  `None`
//! keeps the unbounded wait.

use std::future::Future;
use std::time::Duration;

use permanence_types::PermanenceError;
use tracing::warn;

/// Await `call`, failing with [`PermanenceError::ActuationFailure`] if it has
/// not completed within `deadline`.
pub async fn with_deadline<T, F>(
    operation: &str,
    deadline: Option<Duration>,
    call: F,
) -> Result<T, PermanenceError>
where
    F: Future<Output = Result<T, PermanenceError>>,
{
    let Some(limit) = deadline else {
        return call.await;
    };
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = limit.as_millis() as u64, "actuation call timed out");
            Err(PermanenceError::actuation(
                operation,
                format!("no completion within {} ms", limit.as_millis()),
            ))
        }
    }
}
