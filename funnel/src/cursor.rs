use std::future::Future;

use funnel_common::{FunnelResult, NetworkId};

/// Read-only view of the durably persisted sync cursor. Consulted once per
/// sync session to pick a better resume point; never written by the funnel.
#[cfg_attr(test, mockall::automock)]
pub trait CursorStore {
    fn latest_processed_height(
        &self,
        network: &NetworkId,
    ) -> impl Future<Output = FunnelResult<Option<u64>>> + Send;
}

/// Cursor store for deployments without durable storage; always resumes from
/// the bootstrap point.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCursor;

impl CursorStore for NoopCursor {
    async fn latest_processed_height(&self, _network: &NetworkId) -> FunnelResult<Option<u64>> {
        Ok(None)
    }
}
