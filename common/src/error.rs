use alloy::transports::http::reqwest;
use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;

pub type FunnelResult<T> = Result<T, FunnelError>;

/// Failure taxonomy of the funnel.
///
/// A non-success response from the light-client data endpoint is not part of
/// this taxonomy: it means "no data for that block" and is absorbed at the
/// fetch site.
#[derive(Debug, Error)]
pub enum FunnelError {
    /// A secondary-chain header carries no decodable pre-runtime consensus
    /// digest. Aborts the current poll.
    #[error("malformed header for block {block}: {reason}")]
    MalformedHeader { block: u64, reason: String },

    /// Correlation state was accessed before `recover_state` populated it.
    /// This is an ordering bug in the caller, not a runtime condition.
    #[error("correlation state for network `{0}` used before recovery")]
    UninitializedState(String),

    /// A block the funnel expected to exist could not be resolved upstream.
    #[error("block {block} not found on the {network} chain")]
    MissingBlock { network: String, block: u64 },

    /// Funnel construction could not establish a usable starting point.
    #[error("funnel bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("upstream rpc failure")]
    Rpc(#[from] RpcError<TransportErrorKind>),

    #[error("data endpoint request failed")]
    Http(#[source] reqwest::Error),

    #[error("could not decode data endpoint response")]
    Decode(#[source] serde_path_to_error::Error<serde_json::Error>),

    #[error("invalid endpoint url")]
    InvalidEndpoint(#[from] url::ParseError),

    /// A process-local invariant was violated (e.g. a closed request
    /// limiter). Indicates a bug rather than an upstream condition.
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}
