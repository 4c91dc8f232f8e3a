//! Send-and-confirm decorators
//!
//! Each decorator wraps another [`SendAndConfirm`] and is one itself. The
//! default stack, from outermost to innermost:
//!
//! ```text
//! RetrySender -> BlockhashRefreshSender -> ComputeBudgetSender -> raw sender
//! ```
//!
//! so every retry gets a fresh blockhash and the compute limit is estimated
//! against the final message.

use async_trait::async_trait;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    compute_budget::{
        estimate_and_update_provisory_compute_unit_limit, set_compute_unit_limit, ComputeUnitEstimator,
        needs_compute_unit_estimate, MAX_COMPUTE_UNIT_LIMIT,
    },
    errors::SendError,
    executor::SendAndConfirm,
    timed_cache::TimedCache,
    transaction_message::{BlockhashLifetime, TransactionMessage},
    transaction_plan_result::SentTransaction,
};
use crate::metrics::metrics;

/// How long a fetched blockhash is reused
pub const DEFAULT_BLOCKHASH_TTL: Duration = Duration::from_secs(60);

/// Source of recent blockhashes
#[async_trait]
pub trait BlockhashSource: Send + Sync {
    async fn latest_blockhash(&self) -> Result<BlockhashLifetime, SendError>;
}

/// Retries any error up to `max_retries` times, then returns the last one
pub struct RetrySender<S> {
    inner: S,
    max_retries: usize,
}

impl<S> RetrySender<S> {
    pub fn new(inner: S, max_retries: usize) -> Self {
        Self { inner, max_retries }
    }
}

#[async_trait]
impl<S: SendAndConfirm> SendAndConfirm for RetrySender<S> {
    async fn send_and_confirm(
        &self,
        message: TransactionMessage,
        abort: &CancellationToken,
    ) -> Result<SentTransaction, SendError> {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 1;
        loop {
            match self.inner.send_and_confirm(message.clone(), abort).await {
                Ok(sent) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "Transaction confirmed after retry");
                    }
                    return Ok(sent);
                }
                Err(err) if attempt >= max_attempts || abort.is_cancelled() => {
                    warn!(attempts = attempt, error = %err, "Giving up on transaction");
                    return Err(err);
                }
                Err(err) => {
                    metrics().send_retries.inc();
                    debug!(
                        attempt,
                        max_attempts,
                        error = %err,
                        category = err.category(),
                        "Send failed, retrying"
                    );
                    attempt += 1;
                }
            }
        }
    }
}

/// Stamps a cached recent blockhash onto every message before sending
pub struct BlockhashRefreshSender<S, B> {
    inner: S,
    source: B,
    cache: TimedCache<BlockhashLifetime>,
}

impl<S, B> BlockhashRefreshSender<S, B> {
    pub fn new(inner: S, source: B, ttl: Duration) -> Self {
        Self {
            inner,
            source,
            cache: TimedCache::new(ttl),
        }
    }
}

#[async_trait]
impl<S: SendAndConfirm, B: BlockhashSource> SendAndConfirm for BlockhashRefreshSender<S, B> {
    async fn send_and_confirm(
        &self,
        message: TransactionMessage,
        abort: &CancellationToken,
    ) -> Result<SentTransaction, SendError> {
        let lookup = self
            .cache
            .get_or_fetch(|| self.source.latest_blockhash())
            .await?;
        if lookup.is_hit() {
            metrics().blockhash_cache_hits.inc();
        } else {
            metrics().blockhash_cache_misses.inc();
        }

        let lifetime = lookup.into_value();
        debug!(blockhash = %lifetime.blockhash, "Stamping blockhash lifetime");
        self.inner
            .send_and_confirm(message.with_lifetime(lifetime), abort)
            .await
    }
}

/// Fills in the compute unit limit before sending
///
/// Without an estimator, provisory limits are raised to the maximum instead
/// of being simulated.
pub struct ComputeBudgetSender<S, E> {
    inner: S,
    estimator: Option<E>,
}

impl<S, E> ComputeBudgetSender<S, E> {
    pub fn new(inner: S, estimator: E) -> Self {
        Self {
            inner,
            estimator: Some(estimator),
        }
    }

    pub fn without_simulation(inner: S) -> Self {
        Self { inner, estimator: None }
    }
}

#[async_trait]
impl<S: SendAndConfirm, E: ComputeUnitEstimator> SendAndConfirm for ComputeBudgetSender<S, E> {
    async fn send_and_confirm(
        &self,
        message: TransactionMessage,
        abort: &CancellationToken,
    ) -> Result<SentTransaction, SendError> {
        let message = match &self.estimator {
            Some(estimator) => estimate_and_update_provisory_compute_unit_limit(message, estimator).await?,
            None if needs_compute_unit_estimate(&message) => {
                set_compute_unit_limit(message, MAX_COMPUTE_UNIT_LIMIT)
            }
            None => message,
        };
        self.inner.send_and_confirm(message, abort).await
    }
}

/// Decorator stack used by the default executor
pub type DefaultSender<S, B, E> = RetrySender<BlockhashRefreshSender<ComputeBudgetSender<S, E>, B>>;

/// Settings of the default decorator stack
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub max_retries: usize,
    pub blockhash_ttl: Duration,
    pub simulate_compute_units: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            blockhash_ttl: DEFAULT_BLOCKHASH_TTL,
            simulate_compute_units: true,
        }
    }
}

/// Wrap `raw` with retry, blockhash refresh and compute budget estimation
pub fn default_send_and_confirm<S, B, E>(
    raw: S,
    blockhash_source: B,
    estimator: E,
    config: &SenderConfig,
) -> DefaultSender<S, B, E>
where
    S: SendAndConfirm,
    B: BlockhashSource,
    E: ComputeUnitEstimator,
{
    let compute = if config.simulate_compute_units {
        ComputeBudgetSender::new(raw, estimator)
    } else {
        ComputeBudgetSender::without_simulation(raw)
    };
    let blockhash = BlockhashRefreshSender::new(compute, blockhash_source, config.blockhash_ttl);
    RetrySender::new(blockhash, config.max_retries)
}
