//! Bounded exponential backoff for remote calls.
//!
//! Idempotent calls (reads, create-or-update by name) go through
//! [`RetryPolicy::run`]. Deletes go through [`delete_verified`], which
//! re-lists the kind before every retry and stops as soon as the object is
//! gone.

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use crate::remote::{LmsClient, RemoteError, RemoteId, RemoteKind};

/// How often and how patiently to retry transient remote errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(4)
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        RetryPolicy {
            attempts,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
        }
    }

    /// Same retry count, no waiting between attempts.
    pub fn immediate(attempts: u32) -> Self {
        RetryPolicy {
            attempts,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
        }
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `op`, retrying transient failures up to `attempts` times.
    ///
    /// A `Retry-After` hint from the server replaces the computed delay.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut tries = 0u32;
        let outcome = backoff::retry(self.schedule(), || {
            tries += 1;
            op().map_err(|err| classify(err, tries, self.attempts, what))
        });
        outcome.map_err(into_remote)
    }
}

fn classify(err: RemoteError, tries: u32, attempts: u32, what: &str) -> backoff::Error<RemoteError> {
    if !err.is_transient() || tries > attempts {
        return backoff::Error::permanent(err);
    }
    tracing::warn!("{what}: {err} (attempt {tries}/{}), retrying", attempts + 1);
    match err.retry_after() {
        Some(after) => backoff::Error::retry_after(err, after),
        None => backoff::Error::transient(err),
    }
}

fn into_remote(err: backoff::Error<RemoteError>) -> RemoteError {
    match err {
        backoff::Error::Permanent(e) => e,
        backoff::Error::Transient { err, .. } => err,
    }
}

/// Delete `id`, re-verifying remote state before any retry.
///
/// `NotFound` (on the first try or after re-listing) counts as success:
/// the object is already gone.
pub fn delete_verified(
    client: &dyn LmsClient,
    policy: &RetryPolicy,
    course: &str,
    kind: RemoteKind,
    id: &RemoteId,
) -> Result<(), RemoteError> {
    let what = format!("delete {kind} {id}");
    let mut first = true;
    policy.run(&what, || {
        if !first {
            let listed = client.list(course, kind)?;
            if !listed.iter().any(|o| &o.id == id) {
                tracing::info!("{what}: already gone after failed attempt");
                return Ok(());
            }
        }
        first = false;
        match client.delete(course, kind, id) {
            Err(e) if e.is_not_found() => {
                tracing::warn!("{what}: not found remotely, treating as deleted");
                Ok(())
            }
            other => other,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn transient_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let result = RetryPolicy::immediate(3).run("list", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(RemoteError::Server { status: 503, message: "busy".into() })
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(2).run("list", || {
            calls.set(calls.get() + 1);
            Err(RemoteError::Timeout("read".into()))
        });
        assert_eq!(result, Err(RemoteError::Timeout("read".into())));
        assert_eq!(calls.get(), 3, "first attempt plus two retries");
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(4).run("update", || {
            calls.set(calls.get() + 1);
            Err(RemoteError::NotFound("page 9".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
