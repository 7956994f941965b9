//! Access to the source chain (bridge events) and the destination chain
//! (balances and funding transfers).

use std::{ops::RangeInclusive, sync::Arc, time::Duration};

use alloy::{
    network::{EthereumWallet, ReceiptResponse as _, TransactionBuilder as _},
    primitives::{Address, B256, U256},
    providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder},
    rpc::types::{Filter, Log, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol_types::SolEvent as _,
};
use async_trait::async_trait;
use eyre::{OptionExt as _, Result, WrapErr as _};
use tracing::debug;

use crate::{metrics::RelayMetrics, types::ERC20BridgeInitiated};

/// Read-only view of the chain the bridge contract lives on.
#[async_trait]
pub trait SourceChain: Send + Sync {
    /// Current chain head.
    async fn block_number(&self) -> Result<u64>;

    /// `ERC20BridgeInitiated` logs emitted by `bridge` in the inclusive range.
    async fn bridge_logs(&self, bridge: Address, range: RangeInclusive<u64>) -> Result<Vec<Log>>;

    /// Timestamp of `block`, in seconds.
    async fn block_timestamp(&self, block: u64) -> Result<u64>;
}

/// Balance reads and native transfers on the chain where gas is funded.
#[async_trait]
pub trait DestinationChain: Send + Sync {
    /// Address of the funding wallet.
    fn funder(&self) -> Address;

    async fn balance(&self, address: Address) -> Result<U256>;

    /// Broadcasts a native transfer and returns its hash.
    async fn send_native(&self, to: Address, value: U256) -> Result<B256>;

    /// Waits for the receipt of `tx_hash` and returns whether it succeeded.
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<bool>;
}

#[async_trait]
impl<T: SourceChain + ?Sized> SourceChain for Arc<T> {
    async fn block_number(&self) -> Result<u64> {
        (**self).block_number().await
    }

    async fn bridge_logs(&self, bridge: Address, range: RangeInclusive<u64>) -> Result<Vec<Log>> {
        (**self).bridge_logs(bridge, range).await
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        (**self).block_timestamp(block).await
    }
}

#[async_trait]
impl<T: DestinationChain + ?Sized> DestinationChain for Arc<T> {
    fn funder(&self) -> Address {
        (**self).funder()
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        (**self).balance(address).await
    }

    async fn send_native(&self, to: Address, value: U256) -> Result<B256> {
        (**self).send_native(to, value).await
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<bool> {
        (**self).wait_for_receipt(tx_hash).await
    }
}

/// JSON-RPC client for the source chain.
#[derive(Clone)]
pub struct RpcSourceChain {
    provider: DynProvider,
    metrics: RelayMetrics,
}

impl RpcSourceChain {
    pub async fn connect(rpc_url: &str) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .connect(rpc_url)
            .await
            .wrap_err_with(|| format!("failed to connect to source RPC {rpc_url}"))?;

        Ok(Self {
            provider: provider.erased(),
            metrics: RelayMetrics::default(),
        })
    }
}

#[async_trait]
impl SourceChain for RpcSourceChain {
    async fn block_number(&self) -> Result<u64> {
        let started = std::time::Instant::now();
        let head = self.provider.get_block_number().await?;
        self.metrics.record_rpc_latency(started.elapsed().as_secs_f64());
        Ok(head)
    }

    async fn bridge_logs(&self, bridge: Address, range: RangeInclusive<u64>) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(bridge)
            .event_signature(ERC20BridgeInitiated::SIGNATURE_HASH)
            .from_block(*range.start())
            .to_block(*range.end());

        let started = std::time::Instant::now();
        let logs = self.provider.get_logs(&filter).await?;
        self.metrics.record_rpc_latency(started.elapsed().as_secs_f64());

        debug!(
            from_block = range.start(),
            to_block = range.end(),
            count = logs.len(),
            "fetched bridge logs"
        );
        Ok(logs)
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        let block = self
            .provider
            .get_block_by_number(block.into())
            .await?
            .ok_or_eyre("block not found")?;
        Ok(block.header.timestamp)
    }
}

/// JSON-RPC client for the destination chain, signing with the funder key.
#[derive(Clone)]
pub struct RpcDestinationChain {
    provider: DynProvider,
    funder: Address,
    receipt_timeout: Duration,
    metrics: RelayMetrics,
}

impl RpcDestinationChain {
    pub async fn connect(
        rpc_url: &str,
        signer: PrivateKeySigner,
        receipt_timeout: Duration,
    ) -> Result<Self> {
        let funder = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect(rpc_url)
            .await
            .wrap_err_with(|| format!("failed to connect to destination RPC {rpc_url}"))?;

        Ok(Self {
            provider: provider.erased(),
            funder,
            receipt_timeout,
            metrics: RelayMetrics::default(),
        })
    }
}

#[async_trait]
impl DestinationChain for RpcDestinationChain {
    fn funder(&self) -> Address {
        self.funder
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        let started = std::time::Instant::now();
        let balance = self.provider.get_balance(address).await?;
        self.metrics.record_rpc_latency(started.elapsed().as_secs_f64());
        Ok(balance)
    }

    async fn send_native(&self, to: Address, value: U256) -> Result<B256> {
        let tx = TransactionRequest::default().with_to(to).with_value(value);
        let pending = self.provider.send_transaction(tx).await?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<bool> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .wrap_err_with(|| format!("failed to get receipt for {tx_hash}"))?;
        Ok(receipt.status())
    }
}
