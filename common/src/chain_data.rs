use std::fmt;

use alloy::primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};

/// Duration of one secondary-chain slot, in seconds. The logical timestamp of
/// a secondary block is `slot * SLOT_DURATION_SECS`.
pub const SLOT_DURATION_SECS: u64 = 20;

/// Stable identifier of a chain within a multi-network deployment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NetworkId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One unit of event data, tagged with the network it originated from. The
/// payload is opaque to the funnel; the application decodes it downstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedDatum {
    pub network: NetworkId,
    pub payload: Bytes,
}

/// One primary-chain block's worth of application input.
///
/// Produced by the primary-chain funnel with `extension_datums` empty; the
/// correlation engine appends any secondary-chain data that maps onto this
/// block before it is emitted. Emitted blocks are not touched again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainData {
    pub timestamp: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub submitted_data: Vec<SubmittedDatum>,
    pub extension_datums: Vec<SubmittedDatum>,
}

impl ChainData {
    /// The timestamp used for cross-chain comparison, lowered by the
    /// configured delay and floored at zero.
    pub fn delayed_timestamp(&self, delay: u64) -> u64 {
        self.timestamp.saturating_sub(delay)
    }
}

/// Append secondary-chain data onto a primary block. Extension lists are
/// concatenated, never replaced, so repeated composition is loss-free.
pub fn compose_chain_data(block: &mut ChainData, extension: Vec<SubmittedDatum>) {
    block.extension_datums.extend(extension);
}

/// A secondary-chain-only record served while the funnel is still catching up
/// on the historical backlog. `block_number` is in secondary-chain numbering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresyncChainData {
    pub network: NetworkId,
    pub block_number: u64,
    pub extension_datums: Vec<SubmittedDatum>,
}

/// Per-network result of a presync read. `Finished` is terminal: once
/// returned for a network, presync for it is never re-entered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresyncData {
    Blocks(Vec<PresyncChainData>),
    Finished,
}

/// A finalized secondary-chain header, reduced to what correlation needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DaHeader {
    pub number: u64,
    pub hash: B256,
    pub slot: u64,
}

impl DaHeader {
    pub fn logical_time(&self) -> u64 {
        self.slot * SLOT_DURATION_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datum(payload: &str) -> SubmittedDatum {
        SubmittedDatum {
            network: NetworkId::from("da"),
            payload: Bytes::from(payload.as_bytes().to_vec()),
        }
    }

    fn block(number: u64, timestamp: u64) -> ChainData {
        ChainData {
            timestamp,
            block_hash: B256::ZERO,
            block_number: number,
            submitted_data: vec![],
            extension_datums: vec![],
        }
    }

    #[test]
    fn compose_with_empty_extension_is_identity() {
        let mut b = block(1, 100);
        compose_chain_data(&mut b, vec![]);
        assert!(b.extension_datums.is_empty());
    }

    #[test]
    fn compose_onto_empty_yields_extension() {
        let mut b = block(1, 100);
        compose_chain_data(&mut b, vec![datum("a"), datum("b")]);
        assert_eq!(b.extension_datums, vec![datum("a"), datum("b")]);
    }

    #[test]
    fn compose_concatenates_without_reordering() {
        let mut b = block(1, 100);
        compose_chain_data(&mut b, vec![datum("a")]);
        compose_chain_data(&mut b, vec![datum("b"), datum("c")]);
        assert_eq!(
            b.extension_datums,
            vec![datum("a"), datum("b"), datum("c")]
        );
    }

    #[test]
    fn delayed_timestamp_floors_at_zero() {
        assert_eq!(block(1, 100).delayed_timestamp(30), 70);
        assert_eq!(block(1, 10).delayed_timestamp(30), 0);
    }

    #[test]
    fn logical_time_is_slot_times_duration() {
        let h = DaHeader {
            number: 7,
            hash: B256::ZERO,
            slot: 5,
        };
        assert_eq!(h.logical_time(), 100);
    }
}
