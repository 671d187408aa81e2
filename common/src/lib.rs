//! Chain-agnostic data model shared by the funnel crates.

pub mod chain_data;
pub mod error;

pub use chain_data::{
    compose_chain_data, ChainData, DaHeader, NetworkId, PresyncChainData, PresyncData,
    SubmittedDatum, SLOT_DURATION_SECS,
};
pub use error::{FunnelError, FunnelResult};
