//! Client for the secondary chain's light-client block-data endpoint.

use alloy::primitives::Bytes;
use alloy::transports::http::reqwest;
use funnel_common::{FunnelError, FunnelResult, NetworkId, SubmittedDatum};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::DaBlockData;

/// `GET {base}/v2/blocks/{n}/data` client. A non-success status means "no
/// data for that block" and is absorbed here, never surfaced as an error.
pub struct DataEndpoint {
    base: Url,
    client: reqwest::Client,
    network: NetworkId,
}

#[derive(Debug, Deserialize)]
struct BlockDataResponse {
    block_number: u64,
    data_transactions: Vec<DataTransaction>,
}

#[derive(Debug, Deserialize)]
struct DataTransaction {
    data: String,
}

impl DataEndpoint {
    pub fn new(base: Url, network: NetworkId) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
            network,
        }
    }

    /// Submitted data for one block, or `None` when the endpoint has nothing
    /// for it (non-success status, or a success with zero transactions).
    pub async fn block_data(&self, number: u64) -> FunnelResult<Option<DaBlockData>> {
        let url = self.base.join(&format!("v2/blocks/{number}/data"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FunnelError::Http)?;

        if !response.status().is_success() {
            debug!(network = %self.network, block = number, status = %response.status(),
                "no submitted data for block");
            return Ok(None);
        }

        let body = response.text().await.map_err(FunnelError::Http)?;
        parse_block_data(&self.network, &body)
    }
}

fn parse_block_data(network: &NetworkId, body: &str) -> FunnelResult<Option<DaBlockData>> {
    let mut deserializer = serde_json::Deserializer::from_str(body);
    let parsed: BlockDataResponse =
        serde_path_to_error::deserialize(&mut deserializer).map_err(FunnelError::Decode)?;

    if parsed.data_transactions.is_empty() {
        return Ok(None);
    }

    Ok(Some(DaBlockData {
        block_number: parsed.block_number,
        extension_datums: parsed
            .data_transactions
            .into_iter()
            .map(|tx| SubmittedDatum {
                network: network.clone(),
                payload: Bytes::from(tx.data.into_bytes()),
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_transaction_list_yields_no_record() {
        let body = r#"{"block_number": 12, "data_transactions": []}"#;
        assert_eq!(parse_block_data(&NetworkId::from("da"), body).unwrap(), None);
    }

    #[test]
    fn transactions_become_tagged_datums() {
        let network = NetworkId::from("da");
        let body = r#"{
            "block_number": 12,
            "data_transactions": [{"data": "Zmlyc3Q="}, {"data": "c2Vjb25k"}]
        }"#;
        let record = parse_block_data(&network, body).unwrap().unwrap();
        assert_eq!(record.block_number, 12);
        assert_eq!(record.extension_datums.len(), 2);
        assert!(record.extension_datums.iter().all(|d| d.network == network));
        assert_eq!(
            record.extension_datums[0].payload,
            Bytes::from(b"Zmlyc3Q=".to_vec())
        );
    }

    #[test]
    fn decode_failures_name_the_offending_field() {
        let body = r#"{"block_number": "not-a-number", "data_transactions": []}"#;
        let err = parse_block_data(&NetworkId::from("da"), body).unwrap_err();
        assert!(matches!(err, FunnelError::Decode(_)));
    }
}
