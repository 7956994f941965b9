//! Polls the source chain for bridge deposits and turns them into a
//! resumable, ordered stream of [`BridgeEvent`]s.
//!
//! A cycle fetches every log between the checkpoint and the current head in
//! bounded chunks, dispatches them, and only then moves the checkpoint to
//! the head. Any failure before that point leaves the checkpoint untouched
//! so the same range is fetched again on the next cycle: events may be
//! delivered more than once, never lost.

use std::{
    collections::HashMap,
    ops::RangeInclusive,
    time::{SystemTime, UNIX_EPOCH},
};

use alloy::rpc::types::Log;
use eyre::{Result, WrapErr as _};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    bus::EventPublisher,
    chain::SourceChain,
    checkpoint::CheckpointStore,
    config::PollerConfig,
    metrics::RelayMetrics,
    types::{BridgeEvent, decode_bridge_log},
};

/// Where the poller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    LoadingCheckpoint,
    Polling,
    FetchingChunk,
    Dispatching,
    Sleeping,
    Stopped,
}

/// Counters of a cycle that advanced the checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub from_block: u64,
    pub to_block: u64,
    pub chunks: usize,
    pub logs: usize,
    pub detected: usize,
    pub below_threshold: usize,
    pub other_tokens: usize,
    pub decode_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The head was not past the checkpoint.
    UpToDate { head: u64 },
    /// Logs up to `to_block` were dispatched and the checkpoint moved there.
    Advanced(CycleSummary),
    /// A stop request was observed before the cycle finished. The
    /// checkpoint did not move.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Detected,
    BelowThreshold,
    OtherToken,
}

/// Splits `[from, to]` into consecutive inclusive ranges of at most
/// `max_span` blocks, in ascending order.
pub fn block_ranges(
    from: u64,
    to: u64,
    max_span: u64,
) -> impl Iterator<Item = RangeInclusive<u64>> {
    let span = max_span.max(1);
    let mut next = (from <= to).then_some(from);
    std::iter::from_fn(move || {
        let start = next?;
        let end = start.saturating_add(span - 1).min(to);
        next = (end < to).then(|| end + 1);
        Some(start..=end)
    })
}

pub struct EventPoller<S, C> {
    source: S,
    store: C,
    config: PollerConfig,
    publisher: EventPublisher,
    stop: CancellationToken,
    checkpoint: Option<u64>,
    state: PollerState,
    metrics: RelayMetrics,
}

impl<S: SourceChain, C: CheckpointStore> EventPoller<S, C> {
    pub fn new(
        source: S,
        store: C,
        config: PollerConfig,
        publisher: EventPublisher,
        stop: CancellationToken,
    ) -> Self {
        Self {
            source,
            store,
            config,
            publisher,
            stop,
            checkpoint: None,
            state: PollerState::Idle,
            metrics: RelayMetrics::default(),
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Last block fully processed, once loaded.
    pub fn checkpoint(&self) -> Option<u64> {
        self.checkpoint
    }

    /// Requests the poller to stop. No new RPC call is started afterwards.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    fn set_state(&mut self, state: PollerState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "poller state");
            self.state = state;
        }
    }

    /// Loads the checkpoint, or on first run derives it from the head and
    /// the lookback window and persists it.
    pub async fn load_checkpoint(&mut self) -> Result<u64> {
        self.set_state(PollerState::LoadingCheckpoint);

        let checkpoint = match self.store.load().await.wrap_err("failed to load checkpoint")? {
            Some(block) => {
                info!(block, "resuming from checkpoint");
                block
            }
            None => {
                let head = self
                    .config
                    .rpc_retry
                    .retry("eth_blockNumber", || self.source.block_number())
                    .await
                    .wrap_err("failed to query source chain head")?;
                let start = head.saturating_sub(self.config.lookback_blocks);
                self.store
                    .store(start)
                    .await
                    .wrap_err("failed to persist initial checkpoint")?;
                info!(
                    head,
                    start,
                    lookback = self.config.lookback_blocks,
                    "no checkpoint found, starting from lookback window"
                );
                start
            }
        };

        self.checkpoint = Some(checkpoint);
        self.set_state(PollerState::Idle);
        Ok(checkpoint)
    }

    /// Runs one poll cycle.
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let checkpoint = match self.checkpoint {
            Some(checkpoint) => checkpoint,
            None => self.load_checkpoint().await?,
        };

        if self.stop.is_cancelled() {
            return Ok(PollOutcome::Interrupted);
        }

        self.set_state(PollerState::Polling);
        let head = self
            .config
            .rpc_retry
            .retry("eth_blockNumber", || self.source.block_number())
            .await
            .wrap_err("failed to query source chain head")?;

        if head <= checkpoint {
            debug!(head, checkpoint, "no new blocks");
            return Ok(PollOutcome::UpToDate { head });
        }

        let mut summary = CycleSummary {
            from_block: checkpoint + 1,
            to_block: head,
            ..Default::default()
        };

        let Some(logs) = self.fetch_logs(summary.from_block, head, &mut summary).await? else {
            return Ok(PollOutcome::Interrupted);
        };
        summary.logs = logs.len();

        self.set_state(PollerState::Dispatching);
        let mut timestamps = HashMap::new();
        for log in &logs {
            let timestamp = self.block_timestamp(log, &mut timestamps).await;
            match decode_bridge_log(log, timestamp) {
                Ok(event) => match self.dispatch(event).await {
                    Dispatch::Detected => summary.detected += 1,
                    Dispatch::BelowThreshold => summary.below_threshold += 1,
                    Dispatch::OtherToken => summary.other_tokens += 1,
                },
                Err(err) => {
                    self.metrics.record_decode_failure();
                    summary.decode_failures += 1;
                    warn!(
                        tx_hash = ?log.transaction_hash,
                        block = ?log.block_number,
                        error = %err,
                        "skipping undecodable bridge log"
                    );
                }
            }
        }

        self.store
            .store(head)
            .await
            .wrap_err("failed to persist checkpoint")?;
        self.checkpoint = Some(head);
        self.metrics.record_poll_cycle(head);

        Ok(PollOutcome::Advanced(summary))
    }

    /// Fetches all bridge logs in `[from, to]`, one chunk at a time.
    /// Returns `None` if a stop request interrupted the fetch.
    async fn fetch_logs(
        &mut self,
        from: u64,
        to: u64,
        summary: &mut CycleSummary,
    ) -> Result<Option<Vec<Log>>> {
        let mut logs = Vec::new();

        for range in block_ranges(from, to, self.config.max_block_range) {
            if summary.chunks > 0 && !self.config.chunk_delay.is_zero() {
                tokio::select! {
                    _ = self.stop.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(self.config.chunk_delay) => {}
                }
            }
            if self.stop.is_cancelled() {
                return Ok(None);
            }

            self.set_state(PollerState::FetchingChunk);
            let bridge = self.config.bridge_address;
            let chunk = self
                .config
                .rpc_retry
                .retry("eth_getLogs", || self.source.bridge_logs(bridge, range.clone()))
                .await
                .wrap_err_with(|| {
                    format!("failed to fetch logs for blocks {}..={}", range.start(), range.end())
                })?;

            summary.chunks += 1;
            logs.extend(chunk);
        }

        Ok(Some(logs))
    }

    /// Header timestamp for logs whose RPC response lacks `blockTimestamp`.
    async fn block_timestamp(&self, log: &Log, cache: &mut HashMap<u64, u64>) -> Option<u64> {
        if log.block_timestamp.is_some() {
            return None;
        }
        let block = log.block_number?;
        if let Some(timestamp) = cache.get(&block) {
            return Some(*timestamp);
        }

        let timestamp = match self.source.block_timestamp(block).await {
            Ok(timestamp) => timestamp,
            Err(err) => {
                warn!(block, error = %err, "failed to fetch block timestamp, using local time");
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_secs())
                    .unwrap_or_default()
            }
        };
        cache.insert(block, timestamp);
        Some(timestamp)
    }

    async fn dispatch(&self, event: BridgeEvent) -> Dispatch {
        if event.local_token != self.config.token_address {
            debug!(
                token = %event.local_token,
                tx_hash = %event.tx_hash,
                "ignoring deposit of untracked token"
            );
            return Dispatch::OtherToken;
        }

        if event.amount < self.config.min_amount {
            info!(
                tx_hash = %event.tx_hash,
                from = %event.from,
                amount = %event.amount,
                min_amount = %self.config.min_amount,
                "deposit below threshold, skipping"
            );
            self.metrics.record_deposit_below_threshold();
            self.publisher.funding_skipped(event).await;
            return Dispatch::BelowThreshold;
        }

        info!(
            block = event.block_number,
            tx_hash = %event.tx_hash,
            token = %event.local_token,
            from = %event.from,
            to = %event.to,
            amount = %event.amount,
            "bridge deposit detected"
        );
        self.metrics.record_deposit_detected();
        self.publisher.bridge_detected(event).await;
        Dispatch::Detected
    }

    async fn run_cycle(&mut self) {
        match self.poll_once().await {
            Ok(PollOutcome::Advanced(summary)) => info!(
                from_block = summary.from_block,
                to_block = summary.to_block,
                chunks = summary.chunks,
                logs = summary.logs,
                detected = summary.detected,
                below_threshold = summary.below_threshold,
                decode_failures = summary.decode_failures,
                "poll cycle complete"
            ),
            Ok(PollOutcome::UpToDate { head }) => debug!(head, "poll cycle found no new blocks"),
            Ok(PollOutcome::Interrupted) => info!("poll cycle interrupted by stop request"),
            Err(err) => {
                self.metrics.record_poll_failure();
                error!(
                    checkpoint = ?self.checkpoint,
                    error = %format!("{err:#}"),
                    "poll cycle failed, retrying next interval"
                );
            }
        }
    }

    /// Loads the checkpoint if needed, polls immediately, then keeps polling
    /// every `poll_interval` until stopped. The next interval starts only
    /// after the previous cycle has finished.
    ///
    /// Only a failure to establish the initial checkpoint is returned; cycle
    /// errors are logged and retried.
    pub async fn run(mut self) -> Result<()> {
        if self.checkpoint.is_none() {
            self.load_checkpoint().await?;
        }
        info!(
            checkpoint = ?self.checkpoint,
            bridge = %self.config.bridge_address,
            token = %self.config.token_address,
            interval_secs = self.config.poll_interval.as_secs(),
            "event poller started"
        );

        while !self.stop.is_cancelled() {
            self.run_cycle().await;

            self.set_state(PollerState::Sleeping);
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.set_state(PollerState::Stopped);
        info!(checkpoint = ?self.checkpoint, "event poller stopped");
        Ok(())
    }
}
