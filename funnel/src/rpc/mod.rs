use std::future::Future;

use alloy::primitives::B256;
use alloy::rpc::client::{ClientBuilder, RpcClient};
use alloy::transports::http::{reqwest, Http};
use alloy::transports::Transport;
use funnel_common::{DaHeader, FunnelError, FunnelResult, NetworkId, SubmittedDatum};
use serde::Deserialize;

use crate::config::FunnelConfig;

pub mod data;
pub mod digest;

pub use data::DataEndpoint;

/// Secondary-chain events for one block, in secondary-chain numbering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaBlockData {
    pub block_number: u64,
    pub extension_datums: Vec<SubmittedDatum>,
}

/// Read access to the secondary chain: finalized headers plus per-block
/// submitted data.
pub trait DaReader {
    /// Height of the newest finalized block.
    fn finalized_height(&self) -> impl Future<Output = FunnelResult<u64>> + Send;

    /// Header of a finalized block.
    fn header_by_number(&self, number: u64)
        -> impl Future<Output = FunnelResult<DaHeader>> + Send;

    /// Headers for `[from, to)`, ascending. Callers wanting an inclusive
    /// range pass `to + 1`.
    fn fetch_headers(
        &self,
        from: u64,
        to: u64,
    ) -> impl Future<Output = FunnelResult<Vec<DaHeader>>> + Send;

    /// Submitted data for `[from, to]`, ascending. Blocks without data yield
    /// no record.
    fn fetch_submitted_data(
        &self,
        from: u64,
        to: u64,
    ) -> impl Future<Output = FunnelResult<Vec<DaBlockData>>> + Send;
}

/// JSON-RPC client for the secondary-chain node.
pub struct DaRpcClient<TransportT> {
    client: RpcClient<TransportT>,
    network: NetworkId,
}

/// Header shape returned by `chain_getHeader`. Only the fields correlation
/// needs are kept; the rest of the response is ignored.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct RawHeader {
    number: String,
    digest: RawDigest,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct RawDigest {
    logs: Vec<String>,
}

impl RawHeader {
    fn into_da_header(self, hash: B256) -> FunnelResult<DaHeader> {
        let number = parse_hex_number(&self.number)?;
        let slot = digest::pre_runtime_slot(number, &self.digest.logs)?;
        Ok(DaHeader { number, hash, slot })
    }
}

fn parse_hex_number(raw: &str) -> FunnelResult<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16).map_err(|_| FunnelError::MalformedHeader {
        block: 0,
        reason: format!("unparseable block number `{raw}`"),
    })
}

impl<TransportT> DaRpcClient<TransportT>
where
    TransportT: Transport + Clone,
{
    pub fn new(client: RpcClient<TransportT>, network: NetworkId) -> Self {
        Self { client, network }
    }

    pub async fn finalized_head(&self) -> FunnelResult<B256> {
        Ok(self.client.request("chain_getFinalizedHead", ()).await?)
    }

    pub async fn block_hash(&self, number: u64) -> FunnelResult<Option<B256>> {
        Ok(self.client.request("chain_getBlockHash", (number,)).await?)
    }

    async fn raw_header(&self, hash: B256) -> FunnelResult<Option<RawHeader>> {
        Ok(self.client.request("chain_getHeader", (hash,)).await?)
    }

    /// Fetch and decode the header at `number` (hash lookup, then header).
    pub async fn header(&self, number: u64) -> FunnelResult<DaHeader> {
        let hash = self
            .block_hash(number)
            .await?
            .ok_or_else(|| self.missing(number))?;
        let raw = self.raw_header(hash).await?.ok_or_else(|| self.missing(number))?;
        raw.into_da_header(hash)
    }

    /// Fetch and decode the newest finalized header.
    pub async fn finalized_header(&self) -> FunnelResult<DaHeader> {
        let hash = self.finalized_head().await?;
        let raw = self
            .raw_header(hash)
            .await?
            .ok_or(FunnelError::Bootstrap(format!(
                "finalized head {hash} has no header on {}",
                self.network
            )))?;
        raw.into_da_header(hash)
    }

    fn missing(&self, block: u64) -> FunnelError {
        FunnelError::MissingBlock {
            network: self.network.to_string(),
            block,
        }
    }
}

/// The complete secondary-chain reader: headers over JSON-RPC, submitted
/// data over the light-client HTTP endpoint.
pub struct DaChain<TransportT> {
    rpc: DaRpcClient<TransportT>,
    data: DataEndpoint,
}

impl<TransportT> DaChain<TransportT>
where
    TransportT: Transport + Clone,
{
    pub fn new(rpc: DaRpcClient<TransportT>, data: DataEndpoint) -> Self {
        Self { rpc, data }
    }
}

impl DaChain<Http<reqwest::Client>> {
    /// Wire a reader straight from endpoint configuration.
    pub fn from_config(config: &FunnelConfig) -> Self {
        let rpc = DaRpcClient::new(
            ClientBuilder::default().http(config.da_rpc_url.clone()),
            config.network.clone(),
        );
        let data = DataEndpoint::new(config.da_data_url.clone(), config.network.clone());
        Self::new(rpc, data)
    }
}

impl<TransportT> DaReader for DaChain<TransportT>
where
    TransportT: Transport + Clone,
{
    async fn finalized_height(&self) -> FunnelResult<u64> {
        Ok(self.rpc.finalized_header().await?.number)
    }

    async fn header_by_number(&self, number: u64) -> FunnelResult<DaHeader> {
        self.rpc.header(number).await
    }

    // Per-block fetches are issued sequentially: light-client endpoints are
    // commonly rate limited.
    async fn fetch_headers(&self, from: u64, to: u64) -> FunnelResult<Vec<DaHeader>> {
        let mut headers = Vec::with_capacity(to.saturating_sub(from) as usize);
        for number in from..to {
            headers.push(self.rpc.header(number).await?);
        }
        Ok(headers)
    }

    async fn fetch_submitted_data(&self, from: u64, to: u64) -> FunnelResult<Vec<DaBlockData>> {
        let mut records = Vec::new();
        for number in from..=to {
            if let Some(record) = self.data.block_data(number).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::B256;
    use alloy::rpc::client::RpcClient;
    use futures::FutureExt as _;
    use funnel_common::NetworkId;
    use serde_json::json;

    use super::DaRpcClient;
    use crate::test_support::canned::Canned;
    use crate::test_support::encode_babe_secondary_digest;

    fn client(canned: Canned) -> DaRpcClient<Canned> {
        DaRpcClient::new(RpcClient::new(canned, true), NetworkId::from("da"))
    }

    #[test]
    fn decodes_finalized_header() {
        let hash = B256::repeat_byte(7);
        let rpc = client(
            Canned::new()
                .respond("chain_getFinalizedHead", hash)
                .respond(
                    "chain_getHeader",
                    json!({
                        "parentHash": B256::repeat_byte(6),
                        "number": "0x2a",
                        "stateRoot": B256::ZERO,
                        "extrinsicsRoot": B256::ZERO,
                        "digest": { "logs": [encode_babe_secondary_digest(1, 500)] },
                    }),
                ),
        );

        let header = rpc.finalized_header().now_or_never().unwrap().unwrap();
        assert_eq!(header.number, 42);
        assert_eq!(header.hash, hash);
        assert_eq!(header.slot, 500);
    }

    #[test]
    fn missing_block_hash_is_an_error() {
        let rpc = client(Canned::new().respond("chain_getBlockHash", serde_json::Value::Null));
        let err = rpc.header(9).now_or_never().unwrap().unwrap_err();
        assert!(matches!(
            err,
            funnel_common::FunnelError::MissingBlock { block: 9, .. }
        ));
    }
}
