//! Tops up the destination-chain gas balance of bridge recipients.

use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, B256, U256, utils::format_ether};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    bus::{EventPublisher, RelayEvent, Subscription},
    chain::DestinationChain,
    config::FundingConfig,
    metrics::RelayMetrics,
    types::{BridgeEvent, FundingEvent},
};

#[derive(Debug, thiserror::Error)]
pub enum FundingError {
    #[error(
        "insufficient funder balance: {funder} holds {balance} wei, {required} wei required"
    )]
    InsufficientFunderBalance {
        funder: Address,
        balance: U256,
        required: U256,
    },

    #[error("funding transaction {0} failed on chain")]
    TransactionReverted(B256),

    /// The transfer was broadcast but its receipt could not be read. It may
    /// still land, so it is never re-submitted.
    #[error("no receipt for funding transaction {tx_hash}: {error}")]
    ReceiptUnavailable {
        tx_hash: B256,
        #[source]
        error: eyre::Report,
    },

    #[error(transparent)]
    Rpc(#[from] eyre::Report),
}

impl FundingError {
    /// Recovers a [`FundingError`] that travelled through an `eyre::Report`.
    fn from_report(report: eyre::Report) -> Self {
        report.downcast::<Self>().unwrap_or_else(Self::Rpc)
    }
}

/// What happened to a bridge event handed to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingOutcome {
    /// The recipient already held at least the target.
    Skipped { balance: U256 },
    /// A top-up was confirmed.
    Funded(FundingEvent),
    /// An error was logged and nothing was published.
    Aborted,
}

/// Funding recipient of a deposit: `to`, or the sender when the bridge
/// encoded a mint-to-sender as a zero `to`.
pub fn recipient_for(event: &BridgeEvent) -> Address {
    if event.to.is_zero() { event.from } else { event.to }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

pub struct FundingCoordinator<D> {
    chain: D,
    config: FundingConfig,
    publisher: EventPublisher,
    metrics: RelayMetrics,
}

impl<D: DestinationChain> FundingCoordinator<D> {
    pub fn new(chain: D, config: FundingConfig, publisher: EventPublisher) -> Self {
        Self {
            chain,
            config,
            publisher,
            metrics: RelayMetrics::default(),
        }
    }

    /// Makes sure the recipient of `event` holds at least the funding target.
    ///
    /// Errors are logged here; the caller only learns the outcome.
    pub async fn on_bridge_event(&self, event: &BridgeEvent) -> FundingOutcome {
        let recipient = recipient_for(event);

        match self.fund_recipient(recipient, event).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.metrics.record_funding_failure();
                error!(
                    %recipient,
                    source_tx = %event.tx_hash,
                    error = %err,
                    "failed to fund recipient"
                );
                FundingOutcome::Aborted
            }
        }
    }

    async fn fund_recipient(
        &self,
        recipient: Address,
        event: &BridgeEvent,
    ) -> Result<FundingOutcome, FundingError> {
        info!(%recipient, source_tx = %event.tx_hash, "checking funding");

        let balance = self
            .config
            .rpc_retry
            .retry("eth_getBalance", || self.chain.balance(recipient))
            .await?;
        info!(%recipient, balance = %format_ether(balance), "current balance");

        // Also the guard against duplicate deliveries: once funded, the
        // recipient is above the target and the event becomes a skip.
        if balance >= self.config.target {
            info!(%recipient, "recipient already has sufficient gas, no funding needed");
            self.metrics.record_funding_skipped();
            self.publisher.funding_skipped(event.clone()).await;
            return Ok(FundingOutcome::Skipped { balance });
        }

        let shortfall = self.config.target - balance;
        let funding = self.execute_funding(recipient, shortfall).await?;
        Ok(FundingOutcome::Funded(funding))
    }

    /// Sends exactly `amount` wei to `recipient` and publishes
    /// `funding:completed` once the receipt reports success.
    ///
    /// Refuses to submit when the funder cannot cover `amount`. A failed
    /// submission or a receipt reporting failure is retried by the funding
    /// policy without recomputing the amount. Once a transaction hash
    /// exists, a failing receipt lookup is retried on that same hash with
    /// the RPC policy and never leads to a second transfer.
    pub async fn execute_funding(
        &self,
        recipient: Address,
        amount: U256,
    ) -> Result<FundingEvent, FundingError> {
        let funder = self.chain.funder();
        let funder_balance = self
            .config
            .rpc_retry
            .retry("eth_getBalance", || self.chain.balance(funder))
            .await?;

        if funder_balance < amount {
            return Err(FundingError::InsufficientFunderBalance {
                funder,
                balance: funder_balance,
                required: amount,
            });
        }

        let tx_hash = self
            .config
            .retry
            .retry_if(
                "fund_recipient",
                || async move {
                    let tx_hash = self.chain.send_native(recipient, amount).await?;
                    info!(%tx_hash, %recipient, amount = %format_ether(amount), "funding transaction sent");

                    let succeeded = self
                        .config
                        .rpc_retry
                        .retry("eth_getTransactionReceipt", || {
                            self.chain.wait_for_receipt(tx_hash)
                        })
                        .await
                        .map_err(|error| FundingError::ReceiptUnavailable { tx_hash, error })?;
                    if !succeeded {
                        return Err(FundingError::TransactionReverted(tx_hash).into());
                    }
                    Ok::<_, eyre::Report>(tx_hash)
                },
                |err| {
                    !matches!(
                        err.downcast_ref::<FundingError>(),
                        Some(FundingError::ReceiptUnavailable { .. })
                    )
                },
            )
            .await
            .map_err(FundingError::from_report)?;

        let funding = FundingEvent {
            recipient,
            amount,
            tx_hash,
            timestamp: now_millis(),
        };

        info!(
            %recipient,
            %tx_hash,
            amount = %format_ether(amount),
            "successfully funded recipient"
        );
        self.metrics.record_funding_completed();
        self.publisher.funding_completed(funding.clone()).await;

        Ok(funding)
    }

    /// Handles `bridge:detected` events one at a time until `stop` fires,
    /// then drains what is already buffered and returns.
    pub async fn run(self, mut events: Subscription, stop: CancellationToken) {
        info!(
            funder = %self.chain.funder(),
            target = %format_ether(self.config.target),
            "funding coordinator started"
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Some(event) => self.handle(event).await,
                None => break,
            }
        }

        events.close();
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }

        info!("funding coordinator stopped");
    }

    async fn handle(&self, event: RelayEvent) {
        match event {
            RelayEvent::BridgeDetected(event) => {
                self.on_bridge_event(&event).await;
            }
            other => debug!(kind = %other.kind(), "ignoring event"),
        }
    }
}
