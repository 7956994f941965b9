use alloy::{
    primitives::{Address, U256, utils::format_ether},
    providers::{Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use clap::Parser;
use eyre::{Result, WrapErr as _};
use gas_relay::{CheckpointStore, FileCheckpointStore};

use crate::opts::ChainArgs;

#[derive(Parser, Debug)]
pub(crate) struct StatusArgs {
    #[command(flatten)]
    chain: ChainArgs,

    /// Private key of the funding wallet, used to derive its address
    #[arg(long, env = "FUNDER_PRIVATE_KEY", hide_env_values = true)]
    funder_private_key: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    format: String,
}

impl StatusArgs {
    pub(crate) async fn run(self) -> Result<()> {
        let checkpoint = FileCheckpointStore::new(&self.chain.checkpoint_path)
            .load()
            .await?;

        let funder = self
            .funder_private_key
            .as_deref()
            .map(|key| key.parse::<PrivateKeySigner>().map(|signer| signer.address()))
            .transpose()
            .wrap_err("invalid funder private key")?;

        let source_head = match ProviderBuilder::new()
            .connect(&self.chain.source_rpc_url)
            .await
        {
            Ok(provider) => provider.get_block_number().await.map_err(|e| e.to_string()),
            Err(e) => Err(format!("connection error: {e}")),
        };

        let funder_balance = match funder {
            Some(funder) => Some(self.funder_balance(funder).await),
            None => None,
        };

        if self.format == "json" {
            let head = source_head.as_ref().ok().copied();
            let balance = funder_balance
                .as_ref()
                .and_then(|balance| balance.as_ref().ok())
                .map(ToString::to_string);
            let data = serde_json::json!({
                "checkpoint_path": self.chain.checkpoint_path,
                "last_block": checkpoint,
                "source_head": head,
                "blocks_behind": head.zip(checkpoint).map(|(head, last)| head.saturating_sub(last)),
                "funder": funder,
                "funder_balance_wei": balance,
            });
            println!("{}", serde_json::to_string_pretty(&data)?);
            return Ok(());
        }

        println!("Gas Relay Status");
        println!("================");
        println!();

        println!("Checkpoint ({}):", self.chain.checkpoint_path.display());
        match checkpoint {
            Some(block) => println!("  Last processed block: {block}"),
            None => println!("  No checkpoint yet, the first run starts from the lookback window"),
        }
        println!();

        println!("Source Chain ({}):", self.chain.source_rpc_url);
        match &source_head {
            Ok(head) => {
                println!("  Head block:           {head}");
                if let Some(block) = checkpoint {
                    println!("  Blocks behind:        {}", head.saturating_sub(block));
                }
            }
            Err(e) => println!("  Error: {e}"),
        }
        println!();

        println!("Destination Chain ({}):", self.chain.destination_rpc_url);
        match (funder, funder_balance) {
            (Some(funder), Some(Ok(balance))) => {
                println!("  Funder:               {funder}");
                println!("  Funder balance:       {} ETH", format_ether(balance));
            }
            (Some(funder), Some(Err(e))) => {
                println!("  Funder:               {funder}");
                println!("  Error: {e}");
            }
            _ => println!("  Funder unknown, set FUNDER_PRIVATE_KEY to show its balance"),
        }

        Ok(())
    }

    async fn funder_balance(&self, funder: Address) -> Result<U256, String> {
        let provider = ProviderBuilder::new()
            .connect(&self.chain.destination_rpc_url)
            .await
            .map_err(|e| format!("connection error: {e}"))?;
        provider.get_balance(funder).await.map_err(|e| e.to_string())
    }
}
