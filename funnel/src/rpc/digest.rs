//! Decoding of the pre-runtime consensus digest carried in secondary-chain
//! headers. The slot a block was produced in lives here, and from it the
//! block's logical timestamp.

use funnel_common::{FunnelError, FunnelResult};

/// SCALE variant index of a pre-runtime digest item.
const DIGEST_PRE_RUNTIME: u8 = 6;

const ENGINE_BABE: &[u8; 4] = b"BABE";
const ENGINE_AURA: &[u8; 4] = b"aura";

/// A decoded pre-runtime digest. Every recognized variant carries the slot;
/// anything else is rejected rather than guessed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreRuntimeDigest {
    BabePrimary { authority_index: u32, slot: u64 },
    BabeSecondaryPlain { authority_index: u32, slot: u64 },
    BabeSecondaryVrf { authority_index: u32, slot: u64 },
    Aura { slot: u64 },
}

impl PreRuntimeDigest {
    pub fn slot(&self) -> u64 {
        match *self {
            PreRuntimeDigest::BabePrimary { slot, .. }
            | PreRuntimeDigest::BabeSecondaryPlain { slot, .. }
            | PreRuntimeDigest::BabeSecondaryVrf { slot, .. }
            | PreRuntimeDigest::Aura { slot } => slot,
        }
    }
}

/// Extract the slot from a header's digest logs (hex-encoded digest items).
/// The first pre-runtime item wins; a header without one is malformed.
pub fn pre_runtime_slot(block: u64, logs: &[String]) -> FunnelResult<u64> {
    for log in logs {
        let bytes = decode_hex(block, log)?;
        if bytes.first() == Some(&DIGEST_PRE_RUNTIME) {
            return decode_pre_runtime(block, &bytes[1..]).map(|digest| digest.slot());
        }
    }
    Err(malformed(block, "no pre-runtime digest in header"))
}

/// Decode a pre-runtime digest item body: a 4-byte consensus engine id
/// followed by a length-prefixed payload.
pub fn decode_pre_runtime(block: u64, bytes: &[u8]) -> FunnelResult<PreRuntimeDigest> {
    let engine: &[u8; 4] = bytes
        .get(..4)
        .and_then(|id| id.try_into().ok())
        .ok_or_else(|| malformed(block, "truncated digest engine id"))?;

    let rest = &bytes[4..];
    let (payload_len, prefix_len) = decode_compact_len(rest)
        .ok_or_else(|| malformed(block, "invalid digest payload length"))?;
    let payload = rest
        .get(prefix_len..prefix_len + payload_len)
        .ok_or_else(|| malformed(block, "digest payload shorter than its length prefix"))?;

    match engine {
        ENGINE_BABE => decode_babe(block, payload),
        ENGINE_AURA => decode_aura(block, payload),
        other => Err(malformed(
            block,
            &format!("unrecognized consensus engine `{}`", hex::encode(other)),
        )),
    }
}

fn decode_babe(block: u64, payload: &[u8]) -> FunnelResult<PreRuntimeDigest> {
    let variant = *payload
        .first()
        .ok_or_else(|| malformed(block, "empty BABE pre-digest"))?;
    let authority_index = read_u32(payload, 1)
        .ok_or_else(|| malformed(block, "truncated BABE authority index"))?;
    let slot =
        read_u64(payload, 5).ok_or_else(|| malformed(block, "truncated BABE slot number"))?;

    match variant {
        1 => Ok(PreRuntimeDigest::BabePrimary {
            authority_index,
            slot,
        }),
        2 => Ok(PreRuntimeDigest::BabeSecondaryPlain {
            authority_index,
            slot,
        }),
        3 => Ok(PreRuntimeDigest::BabeSecondaryVrf {
            authority_index,
            slot,
        }),
        other => Err(malformed(
            block,
            &format!("unrecognized BABE pre-digest variant {other}"),
        )),
    }
}

fn decode_aura(block: u64, payload: &[u8]) -> FunnelResult<PreRuntimeDigest> {
    let slot =
        read_u64(payload, 0).ok_or_else(|| malformed(block, "truncated AURA slot number"))?;
    Ok(PreRuntimeDigest::Aura { slot })
}

/// Compact-encoded length prefix: returns (value, prefix size). Payloads in
/// digest items are small, so only the single/two/four-byte modes occur.
fn decode_compact_len(bytes: &[u8]) -> Option<(usize, usize)> {
    let first = *bytes.first()?;
    match first & 0b11 {
        0 => Some(((first >> 2) as usize, 1)),
        1 => {
            let raw = u16::from_le_bytes([first, *bytes.get(1)?]);
            Some(((raw >> 2) as usize, 2))
        }
        2 => {
            let raw = u32::from_le_bytes([
                first,
                *bytes.get(1)?,
                *bytes.get(2)?,
                *bytes.get(3)?,
            ]);
            Some(((raw >> 2) as usize, 4))
        }
        _ => None,
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
}

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    bytes
        .get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
}

fn decode_hex(block: u64, log: &str) -> FunnelResult<Vec<u8>> {
    hex::decode(log.strip_prefix("0x").unwrap_or(log))
        .map_err(|_| malformed(block, "digest log is not valid hex"))
}

fn malformed(block: u64, reason: &str) -> FunnelError {
    FunnelError::MalformedHeader {
        block,
        reason: reason.to_owned(),
    }
}
