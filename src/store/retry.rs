//! Bounded retry of transient storage contention.

use std::thread;

use log::warn;

use crate::config::RetryPolicy;
use crate::error::VcsResult;

/// run `f`, retrying retriable errors with a fixed pause
///
/// non-retriable errors and the last failure are returned as-is
pub(crate) fn with_retries<T, F>(policy: &RetryPolicy, op: &str, mut f: F) -> VcsResult<T>
where
    F: FnMut() -> VcsResult<T>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Err(e) if e.is_retriable() && attempt < attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying",
                    op, attempt, attempts, e
                );
                thread::sleep(policy.backoff());
                attempt += 1;
            }
            result => return result,
        }
    }
}
