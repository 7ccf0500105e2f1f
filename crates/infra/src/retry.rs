//! Bounded retry for optimistic-concurrency conflicts.

use tracing::debug;

use stockledger_core::DomainResult;

/// Run `op` up to `max_attempts` times while it fails with a retryable
/// error. Business-rule errors are returned on the first attempt.
pub fn retry_on_conflict<T, F>(max_attempts: u32, mut op: F) -> DomainResult<T>
where
    F: FnMut() -> DomainResult<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_retryable() && attempt < max_attempts.max(1) => {
                debug!(attempt, error = %err, "retrying after conflict");
                attempt += 1;
            }
            other => return other,
        }
    }
}
