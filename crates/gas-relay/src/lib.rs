//! Gas relay for bridge recipients.
//!
//! Watches a bridge contract on the source chain for ERC20 deposits and
//! tops up the native balance of each recipient on the destination chain,
//! so they can pay for their first transactions there.

pub mod bus;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod funder;
pub mod metrics;
pub mod poller;
pub mod relay;
pub mod retry;
pub mod types;

pub use bus::{EventBus, EventKind, EventPublisher, RelayEvent, Subscription};
pub use chain::{DestinationChain, RpcDestinationChain, RpcSourceChain, SourceChain};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use config::{ConfigError, FundingConfig, PollerConfig, RelayConfig};
pub use funder::{FundingCoordinator, FundingError, FundingOutcome};
pub use poller::{EventPoller, PollOutcome};
pub use relay::{Relay, RelayHandle};
pub use retry::RetryPolicy;
pub use types::{BridgeEvent, FundingEvent};
