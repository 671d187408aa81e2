use clap::Args;
use funnel_common::NetworkId;
use url::Url;

const HELP_HEADING: &str = "Funnel options";

/// Runtime configuration of the secondary-chain funnel.
#[derive(Clone, Debug)]
pub struct FunnelConfig {
    /// Identifier of the secondary network, used to tag its datums.
    pub network: NetworkId,
    /// Blocks to lag behind the secondary chain's finalized tip.
    pub confirmation_depth: u64,
    /// Seconds subtracted from primary timestamps before cross-chain
    /// comparison.
    pub delay: u64,
    /// Maximum number of secondary headers fetched per chunk.
    pub block_group_size: u64,
    /// Primary-chain height at which presync ends and live sync begins.
    pub start_block_height: u64,
    /// Secondary-chain node JSON-RPC endpoint.
    pub da_rpc_url: Url,
    /// Secondary-chain light-client data endpoint base URL.
    pub da_data_url: Url,
}

/// Command-line / environment flavor of [`FunnelConfig`], for embedding into
/// a host binary's clap definition.
#[derive(Args, Clone, Debug)]
pub struct CliFunnelConfig {
    /// Name of the secondary network.
    #[arg(long, env = "FUNNEL_DA_NETWORK", help_heading = HELP_HEADING, default_value = "da")]
    network: String,
    /// Number of blocks to lag behind the secondary finalized tip.
    #[arg(long, env = "FUNNEL_CONFIRMATION_DEPTH", help_heading = HELP_HEADING, default_value_t = 1)]
    confirmation_depth: u64,
    /// Seconds to subtract from primary timestamps before comparison.
    #[arg(long, env = "FUNNEL_DELAY", help_heading = HELP_HEADING, default_value_t = 0)]
    delay: u64,
    /// Maximum secondary headers fetched per chunk.
    #[arg(long, env = "FUNNEL_BLOCK_GROUP_SIZE", help_heading = HELP_HEADING, default_value_t = 100)]
    block_group_size: u64,
    /// Primary-chain height marking the presync-to-sync transition.
    #[arg(long, env = "FUNNEL_START_BLOCK_HEIGHT", help_heading = HELP_HEADING)]
    start_block_height: u64,
    /// Secondary-chain node RPC URL.
    #[arg(long, env = "FUNNEL_DA_RPC_URL", help_heading = HELP_HEADING)]
    da_rpc_url: Url,
    /// Secondary-chain light-client base URL.
    #[arg(long, env = "FUNNEL_DA_DATA_URL", help_heading = HELP_HEADING)]
    da_data_url: Url,
}

impl From<CliFunnelConfig> for FunnelConfig {
    fn from(cli: CliFunnelConfig) -> Self {
        Self {
            network: NetworkId::new(cli.network),
            confirmation_depth: cli.confirmation_depth,
            delay: cli.delay,
            block_group_size: cli.block_group_size.max(1),
            start_block_height: cli.start_block_height,
            da_rpc_url: cli.da_rpc_url,
            da_data_url: cli.da_data_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        funnel: CliFunnelConfig,
    }

    #[test]
    fn parses_flags_into_config() {
        let cli = TestCli::try_parse_from([
            "test",
            "--start-block-height",
            "50",
            "--da-rpc-url",
            "http://localhost:9944/",
            "--da-data-url",
            "http://localhost:7007/",
            "--block-group-size",
            "0",
        ])
        .unwrap();

        let config = FunnelConfig::from(cli.funnel);
        assert_eq!(config.network, NetworkId::from("da"));
        assert_eq!(config.start_block_height, 50);
        assert_eq!(config.confirmation_depth, 1);
        // A zero group size would stall header fetching; it is floored.
        assert_eq!(config.block_group_size, 1);
    }
}
