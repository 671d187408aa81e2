//! Shared fixtures for the crate's unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::ready;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use alloy::primitives::{Bytes, B256};
use funnel_common::{
    ChainData, DaHeader, FunnelError, FunnelResult, NetworkId, PresyncData, SubmittedDatum,
};

use crate::config::FunnelConfig;
use crate::facade::{ChainFunnel, PresyncRequest};
use crate::provider::{MockBlockProvider, PrimaryBlock};
use crate::rpc::{DaBlockData, DaReader};
use crate::state::StateStore;

pub(crate) fn chain_block(number: u64, timestamp: u64) -> ChainData {
    ChainData {
        timestamp,
        block_hash: B256::repeat_byte(number as u8),
        block_number: number,
        submitted_data: vec![],
        extension_datums: vec![],
    }
}

pub(crate) fn test_config(network: &str, start_block_height: u64) -> FunnelConfig {
    FunnelConfig {
        network: NetworkId::from(network),
        confirmation_depth: 0,
        delay: 0,
        block_group_size: 100,
        start_block_height,
        da_rpc_url: "http://localhost:9944/".parse().expect("static url"),
        da_data_url: "http://localhost:7007/".parse().expect("static url"),
    }
}

/// A mock primary chain exposing exactly one block.
pub(crate) fn single_block_provider(number: u64, timestamp: u64) -> MockBlockProvider {
    let mut provider = MockBlockProvider::new();
    provider.expect_block_by_number().returning(move |n| {
        Box::pin(ready(Ok((n == number).then_some(PrimaryBlock {
            number,
            hash: B256::repeat_byte(1),
            timestamp,
        }))))
    });
    provider
}

/// A state store bootstrapped against `da`, anchored on a primary block at
/// `config.start_block_height` with the given timestamp.
pub(crate) async fn bootstrapped_state(
    da: &FakeDa,
    config: &FunnelConfig,
    start_timestamp: u64,
) -> StateStore {
    let provider = single_block_provider(config.start_block_height, start_timestamp);
    let mut store = StateStore::new();
    store
        .get_or_init(&provider, da, config)
        .await
        .expect("bootstrap against fake chain");
    store
}

// ---------------------------------------------------------------------------
// Digest encoding helpers
// ---------------------------------------------------------------------------

pub(crate) fn encode_babe_digest(variant: u8, authority_index: u32, slot: u64) -> String {
    let mut payload = vec![variant];
    payload.extend_from_slice(&authority_index.to_le_bytes());
    payload.extend_from_slice(&slot.to_le_bytes());
    encode_pre_runtime(b"BABE", &payload)
}

pub(crate) fn encode_babe_secondary_digest(authority_index: u32, slot: u64) -> String {
    encode_babe_digest(2, authority_index, slot)
}

pub(crate) fn encode_aura_digest(slot: u64) -> String {
    encode_pre_runtime(b"aura", &slot.to_le_bytes())
}

fn encode_pre_runtime(engine: &[u8; 4], payload: &[u8]) -> String {
    let mut bytes = vec![6u8];
    bytes.extend_from_slice(engine);
    bytes.push((payload.len() as u8) << 2); // single-byte compact length
    bytes.extend_from_slice(payload);
    format!("0x{}", hex::encode(bytes))
}

// ---------------------------------------------------------------------------
// Fake secondary chain
// ---------------------------------------------------------------------------

/// In-memory secondary chain with recorded fetches and an optionally
/// advancing finalized tip. Builders apply in order: set headers first,
/// then override the finalized height.
pub(crate) struct FakeDa {
    network: NetworkId,
    headers: BTreeMap<u64, DaHeader>,
    data: HashMap<u64, Vec<SubmittedDatum>>,
    finalized: AtomicU64,
    advance_per_poll: u64,
    fail_data: bool,
    header_calls: AtomicU64,
    header_ranges: Mutex<Vec<(u64, u64)>>,
    data_ranges: Mutex<Vec<(u64, u64)>>,
}

impl FakeDa {
    pub fn new(network: &str) -> Self {
        Self {
            network: NetworkId::from(network),
            headers: BTreeMap::new(),
            data: HashMap::new(),
            finalized: AtomicU64::new(0),
            advance_per_poll: 0,
            fail_data: false,
            header_calls: AtomicU64::new(0),
            header_ranges: Mutex::new(Vec::new()),
            data_ranges: Mutex::new(Vec::new()),
        }
    }

    /// Install `(number, slot)` headers; the finalized tip defaults to the
    /// highest installed block.
    pub fn with_headers(mut self, entries: impl IntoIterator<Item = (u64, u64)>) -> Self {
        for (number, slot) in entries {
            self.headers.insert(
                number,
                DaHeader {
                    number,
                    hash: B256::repeat_byte(number as u8),
                    slot,
                },
            );
        }
        let max = self.headers.keys().max().copied().unwrap_or(0);
        self.finalized.store(max, Ordering::SeqCst);
        self
    }

    pub fn with_finalized(self, height: u64) -> Self {
        self.finalized.store(height, Ordering::SeqCst);
        self
    }

    /// Advance the finalized tip by `step` after every height poll.
    pub fn advancing(mut self, step: u64) -> Self {
        self.advance_per_poll = step;
        self
    }

    pub fn with_data(mut self, block: u64, payloads: &[&str]) -> Self {
        self.data.insert(
            block,
            payloads
                .iter()
                .map(|p| SubmittedDatum {
                    network: self.network.clone(),
                    payload: Bytes::from(p.as_bytes().to_vec()),
                })
                .collect(),
        );
        self
    }

    pub fn failing_data(mut self) -> Self {
        self.fail_data = true;
        self
    }

    pub fn set_finalized(&self, height: u64) {
        self.finalized.store(height, Ordering::SeqCst);
    }

    pub fn header_calls(&self) -> u64 {
        self.header_calls.load(Ordering::SeqCst)
    }

    /// Inclusive header ranges requested so far.
    pub fn header_ranges(&self) -> Vec<(u64, u64)> {
        self.header_ranges.lock().expect("fixture mutex").clone()
    }

    /// Inclusive submitted-data ranges requested so far.
    pub fn data_ranges(&self) -> Vec<(u64, u64)> {
        self.data_ranges.lock().expect("fixture mutex").clone()
    }

    pub fn data_calls(&self) -> usize {
        self.data_ranges().len()
    }

    fn header(&self, number: u64) -> FunnelResult<DaHeader> {
        self.headers
            .get(&number)
            .copied()
            .ok_or_else(|| FunnelError::MissingBlock {
                network: self.network.to_string(),
                block: number,
            })
    }
}

impl DaReader for FakeDa {
    async fn finalized_height(&self) -> FunnelResult<u64> {
        let current = self.finalized.load(Ordering::SeqCst);
        if self.advance_per_poll > 0 {
            self.finalized
                .store(current + self.advance_per_poll, Ordering::SeqCst);
        }
        Ok(current)
    }

    async fn header_by_number(&self, number: u64) -> FunnelResult<DaHeader> {
        self.header_calls.fetch_add(1, Ordering::SeqCst);
        self.header(number)
    }

    async fn fetch_headers(&self, from: u64, to: u64) -> FunnelResult<Vec<DaHeader>> {
        self.header_ranges
            .lock()
            .expect("fixture mutex")
            .push((from, to.saturating_sub(1)));
        (from..to).map(|n| self.header(n)).collect()
    }

    async fn fetch_submitted_data(&self, from: u64, to: u64) -> FunnelResult<Vec<DaBlockData>> {
        if self.fail_data {
            return Err(FunnelError::Internal("data endpoint down"));
        }
        self.data_ranges
            .lock()
            .expect("fixture mutex")
            .push((from, to));
        Ok((from..=to)
            .filter_map(|n| {
                self.data.get(&n).map(|datums| DaBlockData {
                    block_number: n,
                    extension_datums: datums.clone(),
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Fake base funnel
// ---------------------------------------------------------------------------

/// Base primary funnel serving pre-baked batches in order.
pub(crate) struct FakeBase {
    batches: VecDeque<Vec<ChainData>>,
    presync: HashMap<NetworkId, PresyncData>,
    read_calls: u64,
}

impl FakeBase {
    pub fn with_batches(batches: Vec<Vec<ChainData>>) -> Self {
        Self {
            batches: batches.into(),
            presync: HashMap::new(),
            read_calls: 0,
        }
    }

    pub fn with_presync(mut self, network: &str, data: PresyncData) -> Self {
        self.presync.insert(NetworkId::from(network), data);
        self
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls
    }
}

impl ChainFunnel for FakeBase {
    async fn read_data(&mut self, _to_height: u64) -> FunnelResult<Vec<ChainData>> {
        self.read_calls += 1;
        Ok(self.batches.pop_front().unwrap_or_default())
    }

    async fn read_presync_data(
        &mut self,
        requests: &[PresyncRequest],
    ) -> FunnelResult<HashMap<NetworkId, PresyncData>> {
        Ok(requests
            .iter()
            .filter_map(|r| {
                self.presync
                    .get(&r.network)
                    .map(|d| (r.network.clone(), d.clone()))
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Canned JSON-RPC transport
// ---------------------------------------------------------------------------

pub(crate) mod canned {
    use std::{
        borrow::Cow,
        collections::BTreeMap,
        future::ready,
        task::{Context, Poll},
    };

    use alloy::providers::RootProvider;
    use alloy::rpc::json_rpc::{
        ErrorPayload, RequestMeta, RequestPacket, Response, ResponsePacket, ResponsePayload,
    };
    use alloy::transports::{BoxTransport, TransportConnect, TransportError};
    use futures::{future::BoxFuture, FutureExt as _};
    use serde::Serialize;
    use serde_json::Value;
    use tower::Service;

    /// Fixed ("canned") responses to JSON-RPC method calls.
    #[derive(Clone, Default)]
    pub(crate) struct Canned {
        method2response: BTreeMap<String, Value>,
    }

    impl Canned {
        pub fn new() -> Self {
            Self::default()
        }

        #[track_caller]
        pub fn respond(mut self, method: impl Into<String>, response: impl Serialize) -> Self {
            let clobbered = self.method2response.insert(
                method.into(),
                serde_json::to_value(response).expect("serialization failure"),
            );
            assert!(
                clobbered.is_none(),
                "duplicate response registered - this is probably not what you want"
            );
            self
        }

        pub fn into_provider(self) -> RootProvider<BoxTransport> {
            RootProvider::connect_boxed(self)
                .now_or_never()
                .expect("Canned::get_transport is non blocking")
                .expect("Canned::get_transport is infallible")
        }
    }

    impl TransportConnect for Canned {
        type Transport = Self;
        fn is_local(&self) -> bool {
            true
        }
        fn get_transport<'a: 'b, 'b>(
            &'a self,
        ) -> BoxFuture<'b, Result<Self::Transport, TransportError>> {
            ready(Ok(self.clone())).boxed()
        }
    }

    impl Service<RequestPacket> for Canned {
        type Response = ResponsePacket;
        type Error = TransportError;
        type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: RequestPacket) -> Self::Future {
            fn error(message: impl Into<Cow<'static, str>>) -> TransportError {
                TransportError::ErrorResp(ErrorPayload {
                    code: 0,
                    message: message.into().to_string(),
                    data: None,
                })
            }

            match req {
                RequestPacket::Single(it) => {
                    let (RequestMeta { method, id, .. }, _params) = it.decompose();
                    ready(
                        self.method2response
                            .get(&*method)
                            .map(|it| {
                                ResponsePacket::Single(Response {
                                    id,
                                    payload: ResponsePayload::Success(
                                        serde_json::value::to_raw_value(it).unwrap(),
                                    ),
                                })
                            })
                            .ok_or_else(|| error(format!("method {method} not implemented"))),
                    )
                    .boxed()
                }
                RequestPacket::Batch(_) => {
                    ready(Err(error("batched messages are not supported"))).boxed()
                }
            }
        }
    }
}
