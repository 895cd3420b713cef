//! Catch-up & live-follow scheduler.
//!
//! Each domain runs one [`ChainIndexer`] loop:
//!
//! ```text
//! ResumingFromStore ──▶ CatchingUp ──▶ LiveFollowing
//! ```
//!
//! Catch-up replays history in bounded windows up to the (re-sampled)
//! head; a failed window is retried from the same block. Live following
//! subscribes to new heads and processes stride-sized ranges. The only
//! durable cursor is the per-domain checkpoint written by
//! [`ChainIndexer::process_range`] implementations.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::error::{ChainError, ChainResult, IndexerError, IndexerResult};
use crate::metrics::{ProcessingTimer, record_checkpoint, record_window_failure};
use crate::models::Domain;
use crate::ports::{HeadStream, Repositories};

// =============================================================================
// Configuration
// =============================================================================

/// When a new head triggers live processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StridePolicy {
    /// Process once the head is at least `step` blocks past the last processed block.
    #[default]
    AtLeast,
    /// Process only when the head is exactly `step` blocks past the last processed block.
    Exact,
}

impl std::str::FromStr for StridePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "at-least" | "at_least" | "atleast" => Ok(StridePolicy::AtLeast),
            "exact" => Ok(StridePolicy::Exact),
            other => Err(format!("unknown stride policy: {other}")),
        }
    }
}

/// Configuration shared by every domain loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Blocks per catch-up window.
    pub past_events_window: u64,
    /// Blocks per live stride.
    pub live_events_step: u64,
    pub stride_policy: StridePolicy,
    /// Upper bound for a single chain call.
    pub rpc_timeout: Duration,
    /// Initial delay before retrying a failed window or subscription.
    pub retry_delay: Duration,
    /// Cap of the exponential backoff.
    pub max_retry_delay: Duration,
    /// Head polling interval for chains without push subscriptions.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            past_events_window: 2000,
            live_events_step: 10,
            stride_policy: StridePolicy::AtLeast,
            rpc_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(12),
        }
    }
}

// =============================================================================
// Pure scheduling rules
// =============================================================================

/// First block to process given the stored checkpoint.
pub fn resume_block(last_indexed: Option<u64>, start_block: u64) -> u64 {
    match last_indexed {
        Some(last) if last > start_block => last + 1,
        _ => start_block,
    }
}

/// End of the catch-up window starting at `from`, clamped to `head`.
pub fn window_end(from: u64, head: u64, window: u64) -> u64 {
    from.saturating_add(window.max(1) - 1).min(head)
}

/// Range to process when `head` is observed after `last` was processed.
pub fn next_live_range(
    policy: StridePolicy,
    last: u64,
    head: u64,
    step: u64,
) -> Option<(u64, u64)> {
    let target = last.saturating_add(step.max(1));
    let ready = match policy {
        StridePolicy::Exact => head == target,
        StridePolicy::AtLeast => head >= target,
    };
    ready.then_some((last + 1, head))
}

/// Run a chain call with a timeout.
pub async fn with_timeout<T>(
    timeout: Duration,
    operation: &str,
    fut: impl Future<Output = ChainResult<T>>,
) -> ChainResult<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_| {
            Err(ChainError::Timeout {
                operation: operation.to_string(),
                after_secs: timeout.as_secs(),
            })
        })
}

/// Sleep for the current backoff delay, then double it up to `max`.
///
/// Returns early with [`IndexerError::ShutdownRequested`] on shutdown.
pub async fn backoff(
    delay: &mut Duration,
    max: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> IndexerResult<()> {
    tokio::select! {
        _ = tokio::time::sleep(*delay) => {
            *delay = (*delay * 2).min(max);
            Ok(())
        }
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                return Err(IndexerError::ShutdownRequested);
            }
            Ok(())
        }
    }
}

fn ensure_running(shutdown_rx: &watch::Receiver<bool>) -> IndexerResult<()> {
    if *shutdown_rx.borrow() {
        debug!("Shutdown requested");
        return Err(IndexerError::ShutdownRequested);
    }
    Ok(())
}

// =============================================================================
// ChainIndexer
// =============================================================================

/// Capability shared by the EVM and Substrate domain indexers.
///
/// Implementors provide chain access and range processing; the resume,
/// catch-up and live-follow state machine is provided.
#[async_trait]
pub trait ChainIndexer: Send + Sync {
    fn domain(&self) -> &Domain;

    fn config(&self) -> &SchedulerConfig;

    fn repositories(&self) -> &dyn Repositories;

    /// Head number as reported by the node.
    async fn current_head(&self) -> ChainResult<u64>;

    /// Stream of new head numbers.
    async fn subscribe_heads(&self) -> ChainResult<HeadStream>;

    /// Process `[from, to]` and write the checkpoint for it.
    async fn process_range(&self, from: u64, to: u64) -> IndexerResult<()>;

    /// Head minus the domain's confirmation depth.
    async fn effective_head(&self) -> ChainResult<u64> {
        let head = with_timeout(self.config().rpc_timeout, "current_head", self.current_head()).await?;
        Ok(head.saturating_sub(self.domain().block_confirmations))
    }

    /// Persist `block` as the domain checkpoint.
    async fn commit_checkpoint(&self, block: u64) -> IndexerResult<()> {
        let domain = self.domain();
        self.repositories()
            .domains()
            .update_last_indexed_block(domain.id, block)
            .await?;
        record_checkpoint(&domain.name, block);
        trace!(block, "Checkpoint written");
        Ok(())
    }

    /// Read the checkpoint and compute the first block to process.
    async fn resume(&self, shutdown_rx: &mut watch::Receiver<bool>) -> IndexerResult<u64> {
        let domain = self.domain();
        let mut retry_delay = self.config().retry_delay;

        loop {
            ensure_running(shutdown_rx)?;

            let result = async {
                let domains = self.repositories().domains();
                domains.upsert_domain(domain.id, &domain.name).await?;
                domains.last_indexed_block(domain.id).await
            }
            .await;

            match result {
                Ok(last) => {
                    let from = resume_block(last, domain.start_block);
                    info!(last_indexed = ?last, start_block = domain.start_block, from, "▶️  Resuming");
                    return Ok(from);
                }
                Err(e) => {
                    warn!(error = %e, retry_in_ms = retry_delay.as_millis(), "⚠️  Failed to read checkpoint, retrying...");
                    backoff(&mut retry_delay, self.config().max_retry_delay, shutdown_rx).await?;
                }
            }
        }
    }

    /// Replay history in windows until `from` passes the head.
    ///
    /// Returns the next block to process.
    async fn catch_up(
        &self,
        from: u64,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> IndexerResult<u64> {
        let config = self.config();
        let domain_name = self.domain().name.clone();
        let mut from = from;
        let mut retry_delay = config.retry_delay;

        loop {
            ensure_running(shutdown_rx)?;

            let head = match self.effective_head().await {
                Ok(head) => head,
                Err(e) => {
                    warn!(error = %e, "⚠️  Failed to read head, retrying...");
                    record_window_failure(&domain_name);
                    backoff(&mut retry_delay, config.max_retry_delay, shutdown_rx).await?;
                    continue;
                }
            };

            if from > head {
                info!(next = from, head, "✅ Caught up");
                return Ok(from);
            }

            let to = window_end(from, head, config.past_events_window);
            let result = {
                let _timer = ProcessingTimer::new();
                self.process_range(from, to).await
            };

            match result {
                Ok(()) => {
                    info!(from, to, head, "📦 Window indexed");
                    from = to + 1;
                    retry_delay = config.retry_delay;
                }
                Err(IndexerError::ShutdownRequested) => return Err(IndexerError::ShutdownRequested),
                Err(e) => {
                    error!(from, to, error = %e, "❌ Window failed, retrying same range");
                    record_window_failure(&domain_name);
                    backoff(&mut retry_delay, config.max_retry_delay, shutdown_rx).await?;
                }
            }
        }
    }

    /// Follow new heads, processing stride-sized ranges from `next`.
    async fn follow_live(
        &self,
        next: u64,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        let config = self.config();
        let domain = self.domain();
        let mut last = next.saturating_sub(1);
        let mut retry_delay = config.retry_delay;

        loop {
            ensure_running(shutdown_rx)?;

            match with_timeout(config.rpc_timeout, "subscribe_heads", self.subscribe_heads()).await {
                Ok(mut stream) => {
                    debug!(last, "📡 Head subscription established");
                    retry_delay = config.retry_delay;

                    loop {
                        let item = tokio::select! {
                            item = stream.next() => item,
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() || *shutdown_rx.borrow() {
                                    return Err(IndexerError::ShutdownRequested);
                                }
                                continue;
                            }
                        };

                        let head = match item {
                            Some(Ok(head)) => head.saturating_sub(domain.block_confirmations),
                            Some(Err(e)) => {
                                warn!(error = %e, "⚠️  Subscription error, reconnecting...");
                                break;
                            }
                            None => {
                                warn!("⚠️  Subscription ended, reconnecting...");
                                break;
                            }
                        };

                        let Some((from, to)) = next_live_range(
                            config.stride_policy,
                            last,
                            head,
                            config.live_events_step,
                        ) else {
                            trace!(head, last, "Head skipped");
                            continue;
                        };

                        let result = {
                            let _timer = ProcessingTimer::new();
                            self.process_range(from, to).await
                        };
                        match result {
                            Ok(()) => {
                                info!(from, to, "⛓️  Blocks indexed");
                                last = to;
                            }
                            Err(IndexerError::ShutdownRequested) => {
                                return Err(IndexerError::ShutdownRequested);
                            }
                            Err(e) => {
                                error!(from, to, error = %e, "❌ Live range failed, will retry on next head");
                                record_window_failure(&domain.name);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_ms = retry_delay.as_millis(),
                        "⚠️  Failed to subscribe, retrying..."
                    );
                }
            }

            debug!(retry_delay_ms = retry_delay.as_millis(), "🔄 Reconnecting to chain...");
            backoff(&mut retry_delay, config.max_retry_delay, shutdown_rx).await?;
        }
    }

    /// Resume, catch up, then follow live until shutdown.
    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> IndexerResult<()> {
        let domain = self.domain();
        info!(domain = %domain.name, id = domain.id, kind = domain.kind.as_str(), "⛓️  Starting domain indexer");

        let span = info_span!("domain", name = %domain.name, id = domain.id);
        async {
            let from = self.resume(&mut shutdown_rx).await?;
            let next = self.catch_up(from, &mut shutdown_rx).await?;
            self.follow_live(next, &mut shutdown_rx).await
        }
        .instrument(span)
        .await
    }
}
