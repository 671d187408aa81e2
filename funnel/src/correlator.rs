//! Mapping of logical timestamps onto secondary-chain block numbers.

use funnel_common::FunnelResult;

use crate::rpc::DaReader;

/// Smallest secondary block number whose logical time strictly exceeds
/// `target_time`, found by binary search over `[1, finalized_height + 1]`.
///
/// Returns `finalized_height + 1` when no finalized block is past the target
/// yet. Ties resolve to the first block strictly exceeding the target, so
/// repeated timestamps cannot shift the result. Costs `O(log N)` header
/// fetches.
pub async fn first_block_after<R: DaReader>(
    reader: &R,
    finalized_height: u64,
    target_time: u64,
) -> FunnelResult<u64> {
    let mut low = 1;
    let mut high = finalized_height + 1;

    while low < high {
        let mid = low + (high - low) / 2;
        let header = reader.header_by_number(mid).await?;
        if header.logical_time() <= target_time {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    Ok(low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeDa;

    #[tokio::test]
    async fn returns_first_block_strictly_after_target() {
        // Blocks 1..=3 at slots 0, 1, 2 (times 0, 20, 40).
        let da = FakeDa::new("da").with_headers([(1, 0), (2, 1), (3, 2)]);
        assert_eq!(first_block_after(&da, 3, 25).await.unwrap(), 3);
        assert_eq!(first_block_after(&da, 3, 0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn exact_match_is_not_after() {
        let da = FakeDa::new("da").with_headers([(1, 0), (2, 1), (3, 2)]);
        // Time 20 belongs to block 2; the first block after it is block 3.
        assert_eq!(first_block_after(&da, 3, 20).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn ties_resolve_to_first_exceeding_block() {
        // Blocks 2 and 3 share slot 1 (time 20).
        let da = FakeDa::new("da").with_headers([(1, 0), (2, 1), (3, 1), (4, 2)]);
        assert_eq!(first_block_after(&da, 4, 19).await.unwrap(), 2);
        assert_eq!(first_block_after(&da, 4, 20).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn target_beyond_tip_returns_one_past_finalized() {
        let da = FakeDa::new("da").with_headers([(1, 0), (2, 1), (3, 2)]);
        assert_eq!(first_block_after(&da, 3, 1_000).await.unwrap(), 4);
    }
}
