//! The public two-phase funnel: presync over the secondary chain's
//! historical backlog, then live sync with correlation onto primary blocks.

use std::collections::HashMap;
use std::future::Future;

use funnel_common::{ChainData, FunnelResult, NetworkId, PresyncChainData, PresyncData};
use tracing::{debug, error, info};

use crate::block_range::BlockRange;
use crate::config::FunnelConfig;
use crate::cursor::CursorStore;
use crate::engine;
use crate::provider::BlockProvider;
use crate::rpc::DaReader;
use crate::state::{confirmed_height, StateStore};

/// One per-network presync request. Block numbers are in the requested
/// network's own numbering.
#[derive(Clone, Debug)]
pub struct PresyncRequest {
    pub network: NetworkId,
    pub range: BlockRange,
}

/// A source of per-block application data, in primary-chain block order.
///
/// Implementations are polled by a single synchronization loop; concurrent
/// calls for the same network are the caller's bug and must be serialized.
pub trait ChainFunnel {
    /// Blocks ready for processing, up to `to_height`. Repeated calls with
    /// monotonically increasing heights never re-emit a block.
    fn read_data(
        &mut self,
        to_height: u64,
    ) -> impl Future<Output = FunnelResult<Vec<ChainData>>> + Send;

    /// Historical backlog for the requested ranges, keyed by network.
    fn read_presync_data(
        &mut self,
        requests: &[PresyncRequest],
    ) -> impl Future<Output = FunnelResult<HashMap<NetworkId, PresyncData>>> + Send;
}

/// Wraps a base primary-chain funnel and splices secondary-chain data onto
/// the blocks it produces. Construct via [`DaFunnel::recover_state`].
pub struct DaFunnel<B, R, C> {
    base: B,
    reader: R,
    cursor: C,
    config: FunnelConfig,
    store: StateStore,
}

impl<B, R, C> DaFunnel<B, R, C>
where
    B: ChainFunnel + Send,
    R: DaReader + Send + Sync,
    C: CursorStore + Send + Sync,
{
    /// Build a ready-to-poll funnel. Bootstraps correlation state unless the
    /// supplied store already carries it (a second recovery in the same
    /// process reuses the cached state instead of re-anchoring), then
    /// refreshes the secondary head once.
    pub async fn recover_state<P>(
        base: B,
        provider: &P,
        reader: R,
        cursor: C,
        config: FunnelConfig,
        mut store: StateStore,
    ) -> FunnelResult<Self>
    where
        P: BlockProvider,
    {
        let state = store.get_or_init(provider, &reader, &config).await?;

        let finalized = reader.finalized_height().await?;
        let confirmed = confirmed_height(finalized, config.confirmation_depth);
        if confirmed > state.latest_da_head.number {
            state.latest_da_head = reader.header_by_number(confirmed).await?;
        }
        info!(
            network = %config.network,
            da_head = state.latest_da_head.number,
            "funnel ready"
        );

        Ok(Self {
            base,
            reader,
            cursor,
            config,
            store,
        })
    }

    /// Hand back the state store, e.g. to construct a successor funnel
    /// without re-running bootstrap.
    pub fn into_state_store(self) -> StateStore {
        self.store
    }

    async fn own_presync(&mut self, range: BlockRange) -> FunnelResult<PresyncData> {
        let sync_start = {
            let state = self.store.get_mut(&self.config.network)?;
            if state.presync_finished()
                || state.da_sync_start == 0
                || range.from >= state.da_sync_start
            {
                state.mark_presync_finished();
                debug!(network = %self.config.network, "secondary presync finished");
                return Ok(PresyncData::Finished);
            }
            state.da_sync_start
        };

        let clamped = range.clamp_to(sync_start - 1);
        let records = self
            .reader
            .fetch_submitted_data(clamped.from, clamped.to)
            .await?;
        debug!(
            network = %self.config.network,
            range = %clamped,
            records = records.len(),
            "served secondary presync range"
        );

        Ok(PresyncData::Blocks(
            records
                .into_iter()
                .map(|record| PresyncChainData {
                    network: self.config.network.clone(),
                    block_number: record.block_number,
                    extension_datums: record.extension_datums,
                })
                .collect(),
        ))
    }
}

impl<B, R, C> ChainFunnel for DaFunnel<B, R, C>
where
    B: ChainFunnel + Send,
    R: DaReader + Send + Sync,
    C: CursorStore + Send + Sync,
{
    async fn read_data(&mut self, to_height: u64) -> FunnelResult<Vec<ChainData>> {
        let state = self.store.get_mut(&self.config.network)?;
        engine::correlate_batch(
            &mut self.base,
            &self.reader,
            &self.cursor,
            state,
            &self.config,
            to_height,
        )
        .await
        .inspect_err(|e| error!(network = %self.config.network, "funnel poll failed: {e}"))
    }

    async fn read_presync_data(
        &mut self,
        requests: &[PresyncRequest],
    ) -> FunnelResult<HashMap<NetworkId, PresyncData>> {
        let (own, others): (Vec<_>, Vec<_>) = requests
            .iter()
            .cloned()
            .partition(|request| request.network == self.config.network);

        let mut results = if others.is_empty() {
            HashMap::new()
        } else {
            self.base.read_presync_data(&others).await?
        };

        for request in own {
            let data = self
                .own_presync(request.range)
                .await
                .inspect_err(|e| error!(network = %request.network, "presync read failed: {e}"))?;
            results.insert(request.network, data);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use funnel_common::SubmittedDatum;

    use super::*;
    use crate::cursor::NoopCursor;
    use crate::test_support::{
        chain_block, single_block_provider, test_config, FakeBase, FakeDa,
    };

    const START_TS: u64 = 990;

    /// Secondary chain with blocks 1..=60 at slots 1..=60. A primary anchor
    /// at t=990 lands sync at secondary block 50 (t=1000).
    fn wide_da() -> FakeDa {
        FakeDa::new("da").with_headers((1..=60).map(|n| (n, n)))
    }

    async fn recovered(
        da: FakeDa,
        base: FakeBase,
    ) -> DaFunnel<FakeBase, FakeDa, NoopCursor> {
        let config = test_config("da", 10);
        let provider = single_block_provider(10, START_TS);
        DaFunnel::recover_state(base, &provider, da, NoopCursor, config, StateStore::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn presync_serves_only_the_historical_window() {
        let da = wide_da().with_data(10, &["early"]).with_data(55, &["late"]);
        let mut funnel = recovered(da, FakeBase::with_batches(vec![])).await;

        let request = PresyncRequest {
            network: NetworkId::from("da"),
            range: BlockRange::new(0, 100),
        };
        let results = funnel.read_presync_data(&[request]).await.unwrap();

        match results.get(&NetworkId::from("da")).unwrap() {
            PresyncData::Blocks(blocks) => {
                // Block 55 is past the sync anchor (50) and must not appear.
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].block_number, 10);
                assert_eq!(&*blocks[0].extension_datums[0].payload, b"early".as_slice());
            }
            PresyncData::Finished => panic!("presync finished too early"),
        }
        assert_eq!(funnel.reader.data_ranges(), vec![(0, 49)]);
    }

    #[tokio::test]
    async fn presync_finishes_at_the_sync_anchor_without_fetching() {
        let da = wide_da();
        let mut funnel = recovered(da, FakeBase::with_batches(vec![])).await;

        let request = PresyncRequest {
            network: NetworkId::from("da"),
            range: BlockRange::new(50, 100),
        };
        let results = funnel.read_presync_data(&[request]).await.unwrap();
        assert_eq!(
            results.get(&NetworkId::from("da")),
            Some(&PresyncData::Finished)
        );
        assert_eq!(funnel.reader.data_calls(), 0);

        // Once finished, presync stays finished even for earlier ranges.
        let request = PresyncRequest {
            network: NetworkId::from("da"),
            range: BlockRange::new(0, 10),
        };
        let results = funnel.read_presync_data(&[request]).await.unwrap();
        assert_eq!(
            results.get(&NetworkId::from("da")),
            Some(&PresyncData::Finished)
        );
        assert_eq!(funnel.reader.data_calls(), 0);
    }

    #[tokio::test]
    async fn presync_delegates_other_networks_to_the_base_funnel() {
        let da = wide_da();
        let base = FakeBase::with_batches(vec![]).with_presync(
            "evm",
            PresyncData::Blocks(vec![PresyncChainData {
                network: NetworkId::from("evm"),
                block_number: 3,
                extension_datums: vec![],
            }]),
        );
        let mut funnel = recovered(da, base).await;

        let requests = [
            PresyncRequest {
                network: NetworkId::from("evm"),
                range: BlockRange::new(0, 5),
            },
            PresyncRequest {
                network: NetworkId::from("da"),
                range: BlockRange::new(60, 70),
            },
        ];
        let results = funnel.read_presync_data(&requests).await.unwrap();

        assert!(matches!(
            results.get(&NetworkId::from("evm")),
            Some(PresyncData::Blocks(blocks)) if blocks.len() == 1
        ));
        assert_eq!(
            results.get(&NetworkId::from("da")),
            Some(&PresyncData::Finished)
        );
    }

    #[tokio::test]
    async fn read_data_correlates_through_the_facade() {
        // Anchor at t=990 -> secondary block 50; block 51 (t=1020) carries
        // data that lands on the first primary block at or past t=1020.
        let da = wide_da().with_data(51, &["payload"]);
        let base = FakeBase::with_batches(vec![vec![
            chain_block(10, 990),
            chain_block(11, 1020),
            chain_block(12, 1080),
        ]]);
        let mut funnel = recovered(da, base).await;

        let batch = funnel.read_data(12).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch[0].extension_datums.is_empty());
        assert_eq!(
            batch[1].extension_datums,
            vec![SubmittedDatum {
                network: NetworkId::from("da"),
                payload: alloy::primitives::Bytes::from(b"payload".to_vec()),
            }]
        );
        assert!(batch[2].extension_datums.is_empty());
    }

    #[tokio::test]
    async fn recover_state_reuses_an_already_bootstrapped_store() {
        let da = wide_da();
        let config = test_config("da", 10);
        let provider = single_block_provider(10, START_TS);

        let funnel = DaFunnel::recover_state(
            FakeBase::with_batches(vec![]),
            &provider,
            da,
            NoopCursor,
            config.clone(),
            StateStore::new(),
        )
        .await
        .unwrap();

        let bootstrap_calls = funnel.reader.header_calls();
        let store = funnel.into_state_store();
        assert!(store.contains(&config.network));

        // A second recovery over the same store must not re-run the anchor
        // search; at most the single head refresh touches headers.
        let da = wide_da();
        let funnel = DaFunnel::recover_state(
            FakeBase::with_batches(vec![]),
            &provider,
            da,
            NoopCursor,
            config,
            store,
        )
        .await
        .unwrap();
        assert!(funnel.reader.header_calls() <= 1);
        assert!(bootstrap_calls > 1);
    }
}
