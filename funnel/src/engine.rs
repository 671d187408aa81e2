//! The timestamp-window correlation algorithm.
//!
//! One invocation per poll: take the primary blocks the secondary chain has
//! caught up to, extend the timestamp index far enough to cover them, map
//! secondary block numbers onto primary block numbers, and splice the
//! secondary submitted data in.

use std::collections::HashMap;
use std::time::Duration;

use funnel_common::{compose_chain_data, ChainData, FunnelResult, SLOT_DURATION_SECS};
use tracing::{debug, info, warn};

use crate::config::FunnelConfig;
use crate::cursor::CursorStore;
use crate::facade::ChainFunnel;
use crate::rpc::DaReader;
use crate::state::{confirmed_height, CorrelationState};

/// How often the engine re-checks the secondary finalized head while waiting
/// for it to advance.
pub const HEAD_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Run one correlation round.
///
/// Primary blocks whose delayed timestamp the secondary chain has not
/// reached yet stay buffered for a later round; the batch returned here is
/// final and never revisited. All fallible fetches happen before the buffer
/// is drained, so an upstream error surfaces with the buffer intact.
pub async fn correlate_batch<B, R, C>(
    base: &mut B,
    reader: &R,
    cursor: &C,
    state: &mut CorrelationState,
    config: &FunnelConfig,
    to_height: u64,
) -> FunnelResult<Vec<ChainData>>
where
    B: ChainFunnel + Send,
    R: DaReader + Sync,
    C: CursorStore + Sync,
{
    // Only refill when the previous round's carry-over is exhausted.
    if state.buffered_chain_data.is_empty() {
        state
            .buffered_chain_data
            .extend(base.read_data(to_height).await?);
    }
    if state.buffered_chain_data.is_empty() {
        return Ok(Vec::new());
    }

    refresh_head(reader, state, config).await?;
    let head_time = state.latest_da_head.logical_time();

    // Back-pressure: a block leaves the buffer only once the secondary chain
    // has caught up to its delayed timestamp. Buffered blocks are ascending
    // in time, so the ready prefix is contiguous.
    let ready_count = state
        .buffered_chain_data
        .iter()
        .take_while(|block| block.delayed_timestamp(config.delay) <= head_time)
        .count();
    if ready_count == 0 {
        debug!(
            network = %state.network,
            buffered = state.buffered_chain_data.len(),
            head_time,
            "secondary chain behind all buffered blocks"
        );
        return Ok(Vec::new());
    }
    let max_ts = state.buffered_chain_data[ready_count - 1].delayed_timestamp(config.delay);

    let last_block = match state.last_block {
        Some(last) => last,
        None => resolve_resume_point(cursor, state).await?,
    };

    fetch_headers_until(reader, state, config, last_block, max_ts).await?;

    // Forget the part of the index consumed by earlier rounds.
    state.trim_index();

    let mapping = map_to_primary(state, config.delay, ready_count);

    // The window's data, fetched before the buffer is touched.
    let records = match (mapping.keys().min(), mapping.keys().max()) {
        (Some(&from), Some(&to)) if from <= to => reader.fetch_submitted_data(from, to).await?,
        _ => Vec::new(),
    };

    state.last_max_slot = max_ts / SLOT_DURATION_SECS;
    let mut ready: Vec<ChainData> = state.buffered_chain_data.drain(..ready_count).collect();

    for record in records {
        let Some(primary) = mapping.get(&record.block_number) else {
            warn!(
                network = %state.network,
                block = record.block_number,
                "submitted data outside the correlation window"
            );
            continue;
        };
        match ready.iter_mut().find(|block| block.block_number == *primary) {
            Some(block) => compose_chain_data(block, record.extension_datums),
            None => warn!(
                network = %state.network,
                secondary = record.block_number,
                primary,
                "mapped primary block missing from the ready batch"
            ),
        }
    }

    debug!(
        network = %state.network,
        blocks = ready.len(),
        carry_over = state.buffered_chain_data.len(),
        "emitted correlated batch"
    );
    Ok(ready)
}

/// Re-read the confirmation-delayed finalized head. The observed head only
/// moves forward.
async fn refresh_head<R: DaReader>(
    reader: &R,
    state: &mut CorrelationState,
    config: &FunnelConfig,
) -> FunnelResult<()> {
    let finalized = reader.finalized_height().await?;
    let confirmed = confirmed_height(finalized, config.confirmation_depth);
    if confirmed > state.latest_da_head.number {
        state.latest_da_head = reader.header_by_number(confirmed).await?;
    }
    Ok(())
}

/// First use of the state: prefer the durably persisted cursor when it is at
/// least as far along as the bootstrap anchor, otherwise start from the
/// anchor.
async fn resolve_resume_point<C: CursorStore>(
    cursor: &C,
    state: &mut CorrelationState,
) -> FunnelResult<u64> {
    let fallback = state.da_sync_start.saturating_sub(1);
    let resume = match cursor.latest_processed_height(&state.network).await? {
        Some(persisted) if persisted >= fallback => persisted,
        _ => fallback,
    };
    info!(network = %state.network, resume, "resolved secondary-chain resume point");
    state.last_block = Some(resume);
    Ok(resume)
}

/// Pull secondary headers in bounded chunks until the newest indexed header
/// reaches `max_ts`, waiting out the secondary chain whenever the cursor
/// catches up with its confirmed tip.
async fn fetch_headers_until<R: DaReader>(
    reader: &R,
    state: &mut CorrelationState,
    config: &FunnelConfig,
    mut last_block: u64,
    max_ts: u64,
) -> FunnelResult<()> {
    let mut newest_time = state.index().back().map(|&(time, _)| time);

    while newest_time.map_or(true, |time| time < max_ts) {
        let confirmed = state.latest_da_head.number;
        if last_block >= confirmed {
            wait_for_head_advance(reader, state, config).await?;
            continue;
        }

        let from = last_block + 1;
        let to = (last_block + config.block_group_size).min(confirmed);
        let headers = reader.fetch_headers(from, to + 1).await?;
        debug!(
            network = %state.network,
            from,
            to,
            fetched = headers.len(),
            "fetched secondary headers"
        );

        for header in &headers {
            state.append_index(header.logical_time(), header.number);
            newest_time = Some(header.logical_time());
        }
        last_block = to;
        state.last_block = Some(to);
    }

    Ok(())
}

/// Cooperative wait for the confirmation-delayed head to move. Unbounded by
/// design: overall liveness timeouts belong to the supervisor, which cancels
/// by dropping the poll future.
async fn wait_for_head_advance<R: DaReader>(
    reader: &R,
    state: &mut CorrelationState,
    config: &FunnelConfig,
) -> FunnelResult<()> {
    let current = state.latest_da_head.number;
    info!(
        network = %state.network,
        head = current,
        "waiting for the secondary chain to advance"
    );
    loop {
        tokio::time::sleep(HEAD_POLL_INTERVAL).await;
        let finalized = reader.finalized_height().await?;
        let confirmed = confirmed_height(finalized, config.confirmation_depth);
        if confirmed > current {
            state.latest_da_head = reader.header_by_number(confirmed).await?;
            return Ok(());
        }
    }
}

/// Walk the ready primary blocks and the timestamp index together, assigning
/// each secondary block to the first primary block whose delayed timestamp
/// is at or past the secondary block's logical time.
fn map_to_primary(
    state: &CorrelationState,
    delay: u64,
    ready_count: usize,
) -> HashMap<u64, u64> {
    let mut mapping = HashMap::new();
    let mut entries = state.index().iter().copied();
    let mut entry = entries.next();

    for block in state.buffered_chain_data.iter().take(ready_count) {
        let cutoff = block.delayed_timestamp(delay);
        while let Some((time, number)) = entry {
            if time > cutoff {
                break;
            }
            mapping.insert(number, block.block_number);
            entry = entries.next();
        }
    }

    mapping
}
