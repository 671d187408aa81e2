use std::future::Future;
use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use alloy::primitives::B256;
use alloy::rpc::types::eth::BlockTransactionsKind;
use alloy::{providers::Provider, transports::Transport};
use funnel_common::{FunnelError, FunnelResult};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

const CACHE_SIZE: usize = 256;
// The underlying HTTP client keeps an unbounded connection pool; bound the
// number of in-flight RPC requests ourselves.
const MAX_PARALLEL_REQUESTS: usize = 32;

/// A primary-chain block reduced to the fields the funnel needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrimaryBlock {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

/// Read access to primary-chain blocks.
#[cfg_attr(test, mockall::automock)]
pub trait BlockProvider {
    fn block_by_number(
        &self,
        number: u64,
    ) -> impl Future<Output = FunnelResult<Option<PrimaryBlock>>> + Send;

    fn latest_block_number(&self) -> impl Future<Output = FunnelResult<u64>> + Send;
}

/// Wrapper around an alloy provider that caches block headers and caps the
/// number of parallel RPC requests.
pub struct CachedProvider<ProviderT, TransportT> {
    provider: Arc<ProviderT>,
    semaphore: Arc<Semaphore>,
    blocks: Arc<Mutex<lru::LruCache<u64, PrimaryBlock>>>,
    _phantom: std::marker::PhantomData<TransportT>,
}

pub struct ProviderGuard<'a, ProviderT> {
    provider: Arc<ProviderT>,
    _permit: SemaphorePermit<'a>,
}

impl<ProviderT> Deref for ProviderGuard<'_, ProviderT> {
    type Target = Arc<ProviderT>;

    fn deref(&self) -> &Self::Target {
        &self.provider
    }
}

impl<ProviderT> DerefMut for ProviderGuard<'_, ProviderT> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.provider
    }
}

impl<ProviderT, TransportT> CachedProvider<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    pub fn new(provider: ProviderT) -> Self {
        Self {
            provider: provider.into(),
            semaphore: Arc::new(Semaphore::new(MAX_PARALLEL_REQUESTS)),
            blocks: Arc::new(Mutex::new(lru::LruCache::new(
                NonZeroUsize::new(CACHE_SIZE).expect("cache size is non-zero"),
            ))),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Borrow the raw provider for calls this wrapper does not cache,
    /// counting the borrow against the request limit.
    pub async fn get_provider(&self) -> FunnelResult<ProviderGuard<'_, ProviderT>> {
        Ok(ProviderGuard {
            provider: self.provider.clone(),
            _permit: self
                .semaphore
                .acquire()
                .await
                .map_err(|_| FunnelError::Internal("rpc request limiter closed"))?,
        })
    }

    /// Retrieves a block by number, caching the reduced header.
    pub async fn get_block(&self, number: u64) -> FunnelResult<Option<PrimaryBlock>> {
        if let Some(cached) = self.blocks.lock().await.get(&number) {
            return Ok(Some(*cached));
        }

        let block = self
            .provider
            .get_block(number.into(), BlockTransactionsKind::Hashes)
            .await?;

        Ok(match block {
            Some(block) => {
                let reduced = PrimaryBlock {
                    number: block.header.number,
                    hash: block.header.hash,
                    timestamp: block.header.timestamp,
                };
                self.blocks.lock().await.put(number, reduced);
                Some(reduced)
            }
            None => None,
        })
    }
}

impl<ProviderT, TransportT> BlockProvider for CachedProvider<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    async fn block_by_number(&self, number: u64) -> FunnelResult<Option<PrimaryBlock>> {
        self.get_block(number).await
    }

    async fn latest_block_number(&self) -> FunnelResult<u64> {
        Ok(self.provider.get_block_number().await?)
    }
}
