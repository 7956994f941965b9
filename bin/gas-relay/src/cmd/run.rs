use std::{net::SocketAddr, time::Duration};

use alloy::{
    primitives::{
        Address, U256,
        utils::parse_units,
    },
    signers::local::PrivateKeySigner,
};
use clap::{Args, Parser};
use eyre::{Result, WrapErr as _, ensure};
use gas_relay::{
    FileCheckpointStore, FundingConfig, PollerConfig, Relay, RelayConfig, RetryPolicy,
    RpcDestinationChain, RpcSourceChain,
    config::{DEFAULT_BRIDGE_ADDRESS, DEFAULT_TOKEN_ADDRESS},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use crate::{
    notify::{Notifier, TelegramConfig},
    opts::ChainArgs,
};

/// How long the notifier may keep flushing after the relay stopped.
const NOTIFIER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

const ETHER_DECIMALS: u8 = 18;

#[derive(Parser, Debug)]
pub(crate) struct RunArgs {
    #[command(flatten)]
    chain: ChainArgs,

    /// Private key of the wallet that pays for fundings
    #[arg(long, env = "FUNDER_PRIVATE_KEY", hide_env_values = true)]
    funder_private_key: String,

    /// Bridge contract emitting ERC20BridgeInitiated
    #[arg(long, env = "BRIDGE_ADDRESS", default_value_t = DEFAULT_BRIDGE_ADDRESS)]
    bridge_address: Address,

    /// Token whose deposits are relayed
    #[arg(long, env = "TOKEN_ADDRESS", default_value_t = DEFAULT_TOKEN_ADDRESS)]
    token_address: Address,

    /// Minimum deposit, in whole tokens
    #[arg(long, env = "MIN_TOKEN_AMOUNT", default_value = "1500")]
    min_token_amount: String,

    /// Decimals of the tracked token
    #[arg(long, env = "TOKEN_DECIMALS", default_value_t = 18)]
    token_decimals: u8,

    /// Balance recipients are topped up to, in ether
    #[arg(long, env = "FUNDING_TARGET", default_value = "0.01")]
    funding_target: String,

    /// Seconds between poll cycles
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 60)]
    poll_interval_secs: u64,

    /// Widest block span per eth_getLogs request
    #[arg(long, env = "MAX_BLOCK_RANGE", default_value_t = 500)]
    max_block_range: u64,

    /// Pause between eth_getLogs requests, in milliseconds
    #[arg(long, env = "CHUNK_DELAY_MS", default_value_t = 250)]
    chunk_delay_ms: u64,

    /// Blocks behind the head to start from when no checkpoint exists
    #[arg(long, env = "LOOKBACK_BLOCKS", default_value_t = 1000)]
    lookback_blocks: u64,

    /// Retries of a failed funding transfer
    #[arg(long, env = "FUNDING_RETRIES", default_value_t = 3)]
    funding_retries: usize,

    /// Seconds to wait for a funding receipt
    #[arg(long, env = "RECEIPT_TIMEOUT_SECS", default_value_t = 120)]
    receipt_timeout_secs: u64,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    #[command(flatten)]
    telegram: TelegramArgs,
}

#[derive(Args, Debug)]
struct TelegramArgs {
    /// Telegram bot token; notifications are only logged when unset
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    telegram_bot_token: Option<String>,

    /// Telegram chat to notify
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    telegram_chat_id: Option<String>,

    /// Telegram forum topic to post into
    #[arg(long, env = "TELEGRAM_TOPIC_ID")]
    telegram_topic_id: Option<i64>,
}

impl TelegramArgs {
    fn config(&self) -> Option<TelegramConfig> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig {
                bot_token: bot_token.clone(),
                chat_id: chat_id.clone(),
                topic_id: self.telegram_topic_id,
            }),
            (None, None) => None,
            _ => {
                warn!("telegram needs both a bot token and a chat id, notifications stay local");
                None
            }
        }
    }
}

/// Parses a decimal `amount` into raw units with `decimals` places.
fn parse_amount(name: &str, amount: &str, decimals: u8) -> Result<U256> {
    let parsed =
        parse_units(amount, decimals).wrap_err_with(|| format!("invalid {name} {amount}"))?;
    ensure!(!parsed.is_negative(), "{name} must not be negative, got {amount}");
    Ok(parsed.get_absolute())
}

impl RunArgs {
    fn relay_config(&self) -> Result<RelayConfig> {
        let min_amount =
            parse_amount("minimum token amount", &self.min_token_amount, self.token_decimals)?;
        let target = parse_amount("funding target", &self.funding_target, ETHER_DECIMALS)?;

        let defaults = RelayConfig::default();
        let config = RelayConfig {
            poller: PollerConfig {
                bridge_address: self.bridge_address,
                token_address: self.token_address,
                min_amount,
                poll_interval: Duration::from_secs(self.poll_interval_secs),
                max_block_range: self.max_block_range,
                chunk_delay: Duration::from_millis(self.chunk_delay_ms),
                lookback_blocks: self.lookback_blocks,
                ..defaults.poller
            },
            funding: FundingConfig {
                target,
                retry: RetryPolicy::funding(self.funding_retries),
                ..defaults.funding
            },
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    pub(crate) async fn run(self) -> Result<()> {
        let config = self.relay_config()?;
        let signer: PrivateKeySigner = self
            .funder_private_key
            .parse()
            .wrap_err("invalid funder private key")?;

        if let Some(addr) = self.metrics_addr {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .wrap_err("failed to start Prometheus exporter")?;
            info!(%addr, "serving metrics");
        }

        let source = RpcSourceChain::connect(&self.chain.source_rpc_url).await?;
        let destination = RpcDestinationChain::connect(
            &self.chain.destination_rpc_url,
            signer,
            Duration::from_secs(self.receipt_timeout_secs),
        )
        .await?;
        let store = FileCheckpointStore::new(&self.chain.checkpoint_path);

        info!(
            bridge = %config.poller.bridge_address,
            token = %config.poller.token_address,
            min_amount = %self.min_token_amount,
            funding_target = %self.funding_target,
            checkpoint = %self.chain.checkpoint_path.display(),
            "starting gas relay"
        );

        let capacity = config.channel_capacity;
        let relay = Relay::new(source, destination, store, config);
        let notifier = Notifier::new(self.token_decimals, self.telegram.config())?;
        let notifications = relay.bus().subscribe_all(capacity);
        let notifier = tokio::spawn(notifier.run(notifications));

        let handle = relay.start().await?;

        tokio::signal::ctrl_c()
            .await
            .wrap_err("failed to listen for ctrl-c")?;
        info!("received ctrl-c, shutting down");
        handle.shutdown().await?;

        if tokio::time::timeout(NOTIFIER_DRAIN_TIMEOUT, notifier)
            .await
            .is_err()
        {
            warn!("notifier did not finish in time");
        }

        info!("gas relay stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> RunArgs {
        let mut argv = vec![
            "run",
            "--source-rpc-url",
            "http://localhost:8545",
            "--destination-rpc-url",
            "http://localhost:9545",
            "--funder-private-key",
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        ];
        argv.extend_from_slice(extra);
        RunArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_relay_defaults() {
        let config = args(&[]).relay_config().unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn parses_amounts_with_token_decimals() {
        let config = args(&[
            "--min-token-amount",
            "2.5",
            "--token-decimals",
            "6",
            "--funding-target",
            "0.0001",
        ])
        .relay_config()
        .unwrap();

        assert_eq!(config.poller.min_amount, U256::from(2_500_000u64));
        assert_eq!(config.funding.target, U256::from(100_000_000_000_000u64));
    }

    #[test]
    fn rejects_zero_block_range() {
        assert!(args(&["--max-block-range", "0"]).relay_config().is_err());
    }

    #[test]
    fn rejects_negative_amounts() {
        let err = args(&["--min-token-amount=-5"]).relay_config().unwrap_err();
        assert!(err.to_string().contains("must not be negative"), "{err}");

        let err = args(&["--funding-target=-0.01"]).relay_config().unwrap_err();
        assert!(err.to_string().contains("must not be negative"), "{err}");
    }

    #[test]
    fn rejects_malformed_amount() {
        assert!(args(&["--funding-target", "lots"]).relay_config().is_err());
    }
}
