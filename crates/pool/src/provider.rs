//! The backend capability consumed by both pool designs

use sluice_resilience::RetryPolicy;
use tracing::{debug, warn};

use crate::config::ConnectionInfo;
use crate::error::{Error, Result};

/// Opens, checks, closes and runs queries on backend sessions.
///
/// Implementations hold no pooling or retry logic; the pools decide when to
/// open, validate and replace. Failures are returned, never unwound.
pub trait ResourceProvider: Send + Sync + 'static {
    /// An open session
    type Resource: Send + 'static;
    /// Opaque query payload
    type Query: Send + 'static;
    /// Opaque query result
    type Output: Send + 'static;
    /// Provider failure
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish a new session.
    fn open(&self, info: &ConnectionInfo) -> std::result::Result<Self::Resource, Self::Error>;

    /// Cheap local check that the session can still be used.
    fn is_valid(&self, resource: &Self::Resource) -> bool;

    /// Whether the session has been closed.
    fn is_closed(&self, resource: &Self::Resource) -> bool;

    /// Close the session. Must not fail.
    fn close(&self, resource: Self::Resource);

    /// Run one query. A failure may leave the resource invalid for the next
    /// check, nothing worse.
    fn execute(
        &self,
        resource: &mut Self::Resource,
        query: Self::Query,
    ) -> std::result::Result<Self::Output, Self::Error>;

    /// Trivial query used by health checks, e.g. `SELECT 1`.
    fn probe_query(&self) -> Self::Query;
}

/// Valid and not closed
pub(crate) fn is_usable<P: ResourceProvider>(provider: &P, resource: &P::Resource) -> bool {
    provider.is_valid(resource) && !provider.is_closed(resource)
}

/// Open a resource through `policy`, mapping exhaustion to
/// [`Error::Connection`].
pub fn reconnect<P: ResourceProvider>(
    provider: &P,
    info: &ConnectionInfo,
    policy: &RetryPolicy,
) -> Result<P::Resource> {
    let resource = policy
        .run(|attempt| {
            debug!(host = %info.host, attempt, "opening resource");
            provider.open(info)
        })
        .map_err(|exhausted| {
            warn!(
                host = %info.host,
                attempts = exhausted.attempts,
                error = %exhausted.last,
                "giving up on connection"
            );
            Error::Connection {
                host: info.host.clone(),
                attempts: exhausted.attempts,
                source: Box::new(exhausted.into_last()),
            }
        })?;
    debug!(host = %info.host, "resource opened");
    Ok(resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use std::time::{Duration, Instant};

    fn info() -> ConnectionInfo {
        ConnectionInfo::new("db", "app", "pw", "orders")
    }

    #[test]
    fn reconnect_succeeds_after_transient_failures() {
        let provider = MockProvider::new();
        provider.fail_next_opens(2);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let resource = reconnect(&provider, &info(), &policy).unwrap();
        assert!(is_usable(&provider, &resource));
        assert_eq!(provider.open_attempts(), 3);
        assert_eq!(provider.opened(), 1);
    }

    #[test]
    fn reconnect_gives_up_after_max_attempts_with_fixed_delay() {
        let provider = MockProvider::new();
        provider.set_open_failing(true);
        let policy = RetryPolicy::new(3, Duration::from_millis(30));

        let started = Instant::now();
        let err = reconnect(&provider, &info(), &policy).unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::Connection { attempts: 3, ref host, .. } if host == "db"));
        assert_eq!(provider.open_attempts(), 3);
        // two sleeps between three attempts, none after the last
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(1_000));
    }
}
