//! Per-network correlation state and its process-wide store.

use std::collections::{HashMap, VecDeque};

use funnel_common::{
    ChainData, DaHeader, FunnelError, FunnelResult, NetworkId, SLOT_DURATION_SECS,
};
use tracing::info;

use crate::config::FunnelConfig;
use crate::correlator;
use crate::provider::BlockProvider;
use crate::rpc::DaReader;

/// Finalized tip adjusted for the configured confirmation depth, floored at
/// block 1.
pub(crate) fn confirmed_height(finalized: u64, confirmation_depth: u64) -> u64 {
    finalized.saturating_sub(confirmation_depth).max(1)
}

/// Everything the correlation engine carries between polls for one secondary
/// network. Constructed once per sync session by [`StateStore::get_or_init`]
/// and mutated only by the engine and the presync path.
#[derive(Debug)]
pub struct CorrelationState {
    pub network: NetworkId,
    /// Primary-chain height at which presync ends and live sync begins.
    pub start_block_height: u64,
    /// First secondary block belonging to live sync, mapped from
    /// `start_block_height` at bootstrap. Everything below it is presync
    /// territory.
    pub da_sync_start: u64,
    /// Highest secondary block fully correlated so far. Unset until the
    /// resume cursor is resolved on first use; only ever increases after.
    pub last_block: Option<u64>,
    /// Highest slot boundary already consumed by correlation.
    pub last_max_slot: u64,
    /// Primary blocks fetched but not yet correlated, FIFO. Entries popped
    /// for correlation are never re-buffered.
    pub buffered_chain_data: VecDeque<ChainData>,
    /// Most recent confirmation-delayed finalized header observed.
    pub latest_da_head: DaHeader,
    // Ascending (logical_time, secondary_block) pairs not yet consumed.
    // Kept private: appends go at the tail, trimming only eats the head.
    timestamp_to_block: VecDeque<(u64, u64)>,
    presync_finished: bool,
}

impl CorrelationState {
    pub(crate) fn index(&self) -> &VecDeque<(u64, u64)> {
        &self.timestamp_to_block
    }

    pub(crate) fn append_index(&mut self, logical_time: u64, block_number: u64) {
        debug_assert!(
            self.timestamp_to_block
                .back()
                .map_or(true, |&(t, _)| t <= logical_time),
            "timestamp index must stay sorted"
        );
        self.timestamp_to_block.push_back((logical_time, block_number));
    }

    /// Drop index entries already covered by a previous correlation round.
    pub(crate) fn trim_index(&mut self) {
        let boundary = self.last_max_slot * SLOT_DURATION_SECS;
        while let Some(&(time, _)) = self.timestamp_to_block.front() {
            if time <= boundary {
                self.timestamp_to_block.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn presync_finished(&self) -> bool {
        self.presync_finished
    }

    pub fn mark_presync_finished(&mut self) {
        self.presync_finished = true;
    }
}

/// Keyed store of correlation state, one entry per secondary network.
///
/// Owned by the funnel facade and threaded through explicitly; entries are
/// created at most once per process and reused by every subsequent poll.
#[derive(Default)]
pub struct StateStore {
    entries: HashMap<NetworkId, CorrelationState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state for the configured network, bootstrapping it on first
    /// access. Never re-runs bootstrap for an existing entry.
    pub async fn get_or_init<P, R>(
        &mut self,
        provider: &P,
        reader: &R,
        config: &FunnelConfig,
    ) -> FunnelResult<&mut CorrelationState>
    where
        P: BlockProvider,
        R: DaReader,
    {
        if !self.entries.contains_key(&config.network) {
            let state = bootstrap(provider, reader, config).await?;
            info!(
                network = %config.network,
                start_block_height = state.start_block_height,
                da_sync_start = state.da_sync_start,
                "correlation state initialized"
            );
            self.entries.insert(config.network.clone(), state);
        }
        self.get_mut(&config.network)
    }

    pub fn get_mut(&mut self, network: &NetworkId) -> FunnelResult<&mut CorrelationState> {
        self.entries
            .get_mut(network)
            .ok_or_else(|| FunnelError::UninitializedState(network.to_string()))
    }

    pub fn contains(&self, network: &NetworkId) -> bool {
        self.entries.contains_key(network)
    }
}

/// One-time bootstrap: anchor the secondary chain to the primary starting
/// height. Failure here aborts funnel construction; there is no degraded
/// mode.
async fn bootstrap<P, R>(
    provider: &P,
    reader: &R,
    config: &FunnelConfig,
) -> FunnelResult<CorrelationState>
where
    P: BlockProvider,
    R: DaReader,
{
    let start = provider
        .block_by_number(config.start_block_height)
        .await?
        .ok_or_else(|| {
            FunnelError::Bootstrap(format!(
                "primary block {} cannot be resolved",
                config.start_block_height
            ))
        })?;
    let target_time = start.timestamp.saturating_sub(config.delay);

    let finalized = reader.finalized_height().await?;
    let da_sync_start = correlator::first_block_after(reader, finalized, target_time).await?;
    let latest_da_head = reader
        .header_by_number(confirmed_height(finalized, config.confirmation_depth))
        .await?;

    Ok(CorrelationState {
        network: config.network.clone(),
        start_block_height: config.start_block_height,
        da_sync_start,
        last_block: None,
        last_max_slot: 0,
        buffered_chain_data: VecDeque::new(),
        latest_da_head,
        timestamp_to_block: VecDeque::new(),
        presync_finished: false,
    })
}

#[cfg(test)]
mod tests {
    use alloy::primitives::B256;

    use super::*;
    use crate::test_support::{single_block_provider, test_config, FakeDa};

    #[tokio::test]
    async fn bootstrap_maps_starting_height_onto_secondary_chain() {
        // Secondary blocks 1..=8 at slots 1..=8 (times 20..=160).
        let da = FakeDa::new("da").with_headers((1..=8).map(|n| (n, n)));
        let provider = single_block_provider(10, 100);
        let config = test_config("da", 10);

        let mut store = StateStore::new();
        let state = store.get_or_init(&provider, &da, &config).await.unwrap();

        // First secondary block strictly after time 100 is block 6 (t=120).
        assert_eq!(state.da_sync_start, 6);
        assert_eq!(state.last_block, None);
        assert!(state.buffered_chain_data.is_empty());
        assert!(state.index().is_empty());
    }

    #[tokio::test]
    async fn get_or_init_is_idempotent() {
        let da = FakeDa::new("da").with_headers((1..=8).map(|n| (n, n)));
        let provider = single_block_provider(10, 100);
        let config = test_config("da", 10);

        let mut store = StateStore::new();
        store.get_or_init(&provider, &da, &config).await.unwrap();
        let calls_after_first = da.header_calls();

        let state = store.get_or_init(&provider, &da, &config).await.unwrap();
        state.last_block = Some(99);
        assert_eq!(da.header_calls(), calls_after_first);

        // Still the same entry, not a re-bootstrapped one.
        let state = store.get_or_init(&provider, &da, &config).await.unwrap();
        assert_eq!(state.last_block, Some(99));
    }

    #[tokio::test]
    async fn unresolvable_starting_block_aborts_bootstrap() {
        let da = FakeDa::new("da").with_headers([(1, 1)]);
        let provider = single_block_provider(10, 100);
        let config = test_config("da", 11);

        let mut store = StateStore::new();
        let err = store.get_or_init(&provider, &da, &config).await.unwrap_err();
        assert!(matches!(err, FunnelError::Bootstrap(_)));
        assert!(!store.contains(&config.network));
    }

    #[test]
    fn get_mut_before_init_is_an_ordering_error() {
        let mut store = StateStore::new();
        let err = store.get_mut(&NetworkId::from("da")).unwrap_err();
        assert!(matches!(err, FunnelError::UninitializedState(_)));
    }

    #[test]
    fn index_trims_only_from_the_head() {
        let mut state = CorrelationState {
            network: NetworkId::from("da"),
            start_block_height: 0,
            da_sync_start: 1,
            last_block: None,
            last_max_slot: 0,
            buffered_chain_data: VecDeque::new(),
            latest_da_head: DaHeader {
                number: 1,
                hash: B256::ZERO,
                slot: 1,
            },
            timestamp_to_block: VecDeque::new(),
            presync_finished: false,
        };

        for (time, number) in [(20, 1), (40, 2), (40, 3), (60, 4)] {
            state.append_index(time, number);
        }

        // Boundary at slot 2 (time 40) eats the head, including ties.
        state.last_max_slot = 2;
        state.trim_index();
        assert_eq!(state.index().iter().copied().collect::<Vec<_>>(), vec![(60, 4)]);

        // Sorted ascending after any sequence of appends and trims.
        state.append_index(60, 5);
        state.append_index(80, 6);
        let times: Vec<_> = state.index().iter().map(|&(t, _)| t).collect();
        let mut sorted = times.clone();
        sorted.sort_unstable();
        assert_eq!(times, sorted);
    }
}
