//! Wires the poller and the funding coordinator to a shared event bus and
//! owns their tasks.

use eyre::{Result, WrapErr as _};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    bus::{EventBus, EventKind},
    chain::{DestinationChain, SourceChain},
    checkpoint::CheckpointStore,
    config::RelayConfig,
    funder::FundingCoordinator,
    poller::EventPoller,
};

pub struct Relay<S, D, C> {
    source: S,
    destination: D,
    store: C,
    config: RelayConfig,
    bus: EventBus,
}

impl<S, D, C> Relay<S, D, C>
where
    S: SourceChain + 'static,
    D: DestinationChain + 'static,
    C: CheckpointStore + 'static,
{
    pub fn new(source: S, destination: D, store: C, config: RelayConfig) -> Self {
        Self {
            source,
            destination,
            store,
            config,
            bus: EventBus::new(),
        }
    }

    /// The bus events are published on. Subscribe before [`Self::start`] to
    /// see events from the first cycle.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Validates the configuration, resolves the initial checkpoint and
    /// spawns the poller and the coordinator.
    ///
    /// Fails if the configuration is invalid or the checkpoint cannot be
    /// established; nothing is spawned in that case.
    pub async fn start(self) -> Result<RelayHandle> {
        self.config.validate()?;

        let stop = CancellationToken::new();
        let publisher = self.bus.publisher();

        let detected = self
            .bus
            .subscribe(&[EventKind::BridgeDetected], self.config.channel_capacity);
        let coordinator =
            FundingCoordinator::new(self.destination, self.config.funding, publisher.clone());

        let mut poller = EventPoller::new(
            self.source,
            self.store,
            self.config.poller,
            publisher,
            stop.clone(),
        );
        let checkpoint = poller
            .load_checkpoint()
            .await
            .wrap_err("failed to establish initial checkpoint")?;

        let coordinator = tokio::spawn(coordinator.run(detected, stop.clone()));
        let poller = tokio::spawn(poller.run());

        info!(checkpoint, "gas relay running");

        Ok(RelayHandle {
            stop,
            poller,
            coordinator,
        })
    }
}

/// Handle to a running relay.
pub struct RelayHandle {
    stop: CancellationToken,
    poller: JoinHandle<Result<()>>,
    coordinator: JoinHandle<()>,
}

impl RelayHandle {
    /// Asks both tasks to stop after their current step.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Waits for the poller to finish, then stops and waits for the
    /// coordinator.
    pub async fn wait(self) -> Result<()> {
        let polled = self.poller.await.wrap_err("event poller task failed")?;
        self.stop.cancel();
        self.coordinator
            .await
            .wrap_err("funding coordinator task failed")?;
        polled
    }

    /// Stops the relay and waits for both tasks.
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.wait().await
    }
}
