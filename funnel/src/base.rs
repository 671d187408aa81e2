//! Reference primary-chain funnel over an EVM node.
//!
//! Emits one [`ChainData`] per confirmed block, carrying the block's
//! timestamp and the raw event payloads of a configured contract. Decoding
//! those payloads into application inputs happens downstream.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::rpc::types::eth::{Filter, Log};
use alloy::transports::Transport;
use funnel_common::{
    ChainData, FunnelError, FunnelResult, NetworkId, PresyncChainData, PresyncData, SubmittedDatum,
};
use tracing::debug;

use crate::block_range::BlockRange;
use crate::facade::{ChainFunnel, PresyncRequest};
use crate::provider::{BlockProvider, CachedProvider};

pub struct EvmFunnel<ProviderT, TransportT> {
    provider: Arc<CachedProvider<ProviderT, TransportT>>,
    network: NetworkId,
    contract: Address,
    start_block_height: u64,
    confirmation_depth: u64,
    block_group_size: u64,
    next_block: u64,
    presync_finished: bool,
}

impl<ProviderT, TransportT> EvmFunnel<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    pub fn new(
        provider: Arc<CachedProvider<ProviderT, TransportT>>,
        network: NetworkId,
        contract: Address,
        start_block_height: u64,
        confirmation_depth: u64,
        block_group_size: u64,
    ) -> Self {
        Self {
            provider,
            network,
            contract,
            start_block_height,
            confirmation_depth,
            block_group_size: block_group_size.max(1),
            next_block: start_block_height,
            presync_finished: false,
        }
    }

    async fn read_window(&self, window: BlockRange) -> FunnelResult<Vec<ChainData>> {
        let mut blocks = Vec::with_capacity(window.len() as usize);
        for number in window.from..=window.to {
            let block = self.provider.get_block(number).await?.ok_or_else(|| {
                FunnelError::MissingBlock {
                    network: self.network.to_string(),
                    block: number,
                }
            })?;
            blocks.push(ChainData {
                timestamp: block.timestamp,
                block_hash: block.hash,
                block_number: block.number,
                submitted_data: vec![],
                extension_datums: vec![],
            });
        }

        let logs = self.fetch_logs(window).await?;
        for block in &mut blocks {
            if let Some(datums) = logs.get(&block.block_number) {
                block.submitted_data.extend(datums.iter().cloned());
            }
        }
        Ok(blocks)
    }

    /// Contract events for the window, grouped by block number and kept in
    /// emission order.
    async fn fetch_logs(
        &self,
        window: BlockRange,
    ) -> FunnelResult<HashMap<u64, Vec<SubmittedDatum>>> {
        let filter = Filter::new()
            .address(self.contract)
            .from_block(window.from)
            .to_block(window.to);
        let logs = self.provider.get_provider().await?.get_logs(&filter).await?;

        let mut grouped: HashMap<u64, Vec<SubmittedDatum>> = HashMap::new();
        for log in logs {
            let Some(number) = log.block_number else {
                continue;
            };
            grouped
                .entry(number)
                .or_default()
                .push(log_to_datum(&self.network, &log));
        }
        Ok(grouped)
    }
}

fn log_to_datum(network: &NetworkId, log: &Log) -> SubmittedDatum {
    SubmittedDatum {
        network: network.clone(),
        payload: log.inner.data.data.clone(),
    }
}

impl<ProviderT, TransportT> ChainFunnel for EvmFunnel<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    async fn read_data(&mut self, to_height: u64) -> FunnelResult<Vec<ChainData>> {
        let tip = self.provider.latest_block_number().await?;
        let confirmed = tip.saturating_sub(self.confirmation_depth);

        let window = BlockRange::new(self.next_block, confirmed.min(to_height))
            .clamp_to(self.next_block + self.block_group_size - 1);
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let blocks = self.read_window(window).await?;
        debug!(network = %self.network, window = %window, blocks = blocks.len(),
            "read primary block window");
        self.next_block = window.to + 1;
        Ok(blocks)
    }

    async fn read_presync_data(
        &mut self,
        requests: &[PresyncRequest],
    ) -> FunnelResult<HashMap<NetworkId, PresyncData>> {
        let mut results = HashMap::new();
        for request in requests {
            if request.network != self.network {
                continue;
            }
            if self.presync_finished
                || self.start_block_height == 0
                || request.range.from >= self.start_block_height
            {
                self.presync_finished = true;
                results.insert(request.network.clone(), PresyncData::Finished);
                continue;
            }

            let clamped = request.range.clamp_to(self.start_block_height - 1);
            let logs = self.fetch_logs(clamped).await?;
            let mut blocks: Vec<PresyncChainData> = logs
                .into_iter()
                .map(|(block_number, extension_datums)| PresyncChainData {
                    network: self.network.clone(),
                    block_number,
                    extension_datums,
                })
                .collect();
            blocks.sort_by_key(|b| b.block_number);
            results.insert(request.network.clone(), PresyncData::Blocks(blocks));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Bytes, LogData, B256};

    use super::*;

    fn log_at(block: u64, payload: &[u8]) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::ZERO,
                data: LogData::new_unchecked(vec![B256::ZERO], Bytes::from(payload.to_vec())),
            },
            block_number: Some(block),
            ..Default::default()
        }
    }

    #[test]
    fn log_payloads_pass_through_untouched() {
        let network = NetworkId::from("evm");
        let datum = log_to_datum(&network, &log_at(5, b"raw-event"));
        assert_eq!(datum.network, network);
        assert_eq!(&*datum.payload, b"raw-event".as_slice());
    }
}
