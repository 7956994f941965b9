//! Policy constants for the relay.

use std::time::Duration;

use alloy::primitives::{Address, U256, address};

use crate::retry::RetryPolicy;

/// Standard bridge on Ethereum mainnet.
pub const DEFAULT_BRIDGE_ADDRESS: Address = address!("34c0bd5877a5ee7099d0f5688d65f4bb9158bde2");

/// IQ token on Ethereum mainnet.
pub const DEFAULT_TOKEN_ADDRESS: Address = address!("579CEa1889991f68aCc35Ff5c3dd0621fF29b0C9");

/// 1500 IQ (18 decimals).
pub const DEFAULT_MIN_AMOUNT: U256 = U256::from_limbs([0x50ae_84a8_cdf0_0000, 0x51, 0, 0]);

/// 0.01 ether.
pub const DEFAULT_FUNDING_TARGET: U256 = U256::from_limbs([10_000_000_000_000_000, 0, 0, 0]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max block range must be at least 1")]
    ZeroBlockRange,

    #[error("poll interval must be positive")]
    ZeroPollInterval,

    #[error("funding target must be positive")]
    ZeroFundingTarget,

    #[error("channel capacity must be at least 1")]
    ZeroChannelCapacity,

    #[error("bridge address must not be zero")]
    ZeroBridgeAddress,
}

/// Settings of the event poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    pub bridge_address: Address,
    /// Only deposits of this token are relayed.
    pub token_address: Address,
    /// Deposits below this amount (raw token units) are skipped.
    pub min_amount: U256,
    pub poll_interval: Duration,
    /// Widest block span requested from `eth_getLogs` at once.
    pub max_block_range: u64,
    /// Pause between two `eth_getLogs` requests of the same cycle.
    pub chunk_delay: Duration,
    /// How far behind the head the first run starts.
    pub lookback_blocks: u64,
    pub rpc_retry: RetryPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            bridge_address: DEFAULT_BRIDGE_ADDRESS,
            token_address: DEFAULT_TOKEN_ADDRESS,
            min_amount: DEFAULT_MIN_AMOUNT,
            poll_interval: Duration::from_secs(60),
            max_block_range: 500,
            chunk_delay: Duration::from_millis(250),
            lookback_blocks: 1_000,
            rpc_retry: RetryPolicy::rpc(),
        }
    }
}

/// Settings of the funding coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingConfig {
    /// Balance, in wei, every recipient is topped up to.
    pub target: U256,
    /// Retries of the submit-and-wait step.
    pub retry: RetryPolicy,
    /// Retries of balance reads.
    pub rpc_retry: RetryPolicy,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_FUNDING_TARGET,
            retry: RetryPolicy::funding(3),
            rpc_retry: RetryPolicy::rpc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub poller: PollerConfig,
    pub funding: FundingConfig,
    /// Buffer of the coordinator's event subscription.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            funding: FundingConfig::default(),
            channel_capacity: 256,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.bridge_address.is_zero() {
            return Err(ConfigError::ZeroBridgeAddress);
        }
        if self.poller.max_block_range == 0 {
            return Err(ConfigError::ZeroBlockRange);
        }
        if self.poller.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.funding.target.is_zero() {
            return Err(ConfigError::ZeroFundingTarget);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::utils::{parse_ether, parse_units};

    #[test]
    fn default_constants_match_units() {
        let iq = parse_units("1500", 18).unwrap().get_absolute();
        assert_eq!(DEFAULT_MIN_AMOUNT, iq);
        assert_eq!(DEFAULT_FUNDING_TARGET, parse_ether("0.01").unwrap());
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(RelayConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut config = RelayConfig::default();
        config.poller.max_block_range = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroBlockRange));

        let mut config = RelayConfig::default();
        config.funding.target = U256::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroFundingTarget));

        let mut config = RelayConfig::default();
        config.poller.poll_interval = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroPollInterval));

        let mut config = RelayConfig::default();
        config.poller.bridge_address = Address::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroBridgeAddress));
    }
}
