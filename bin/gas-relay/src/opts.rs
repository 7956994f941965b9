use crate::cmd::{run::RunArgs, status::StatusArgs};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gas-relay")]
#[command(version, about = "Tops up destination-chain gas for bridge depositors", long_about = None)]
pub(crate) struct GasRelayCli {
    #[command(subcommand)]
    pub(crate) cmd: GasRelaySubcommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum GasRelaySubcommand {
    /// Watch the bridge and fund recipients until interrupted
    Run(RunArgs),

    /// Show the checkpoint, source chain head and funder balance
    Status(StatusArgs),
}

/// Endpoints and local state shared by every subcommand.
#[derive(Args, Debug)]
pub(crate) struct ChainArgs {
    /// Source chain RPC URL, where the bridge contract lives
    #[arg(long, env = "SOURCE_RPC_URL")]
    pub(crate) source_rpc_url: String,

    /// Destination chain RPC URL, where gas is funded
    #[arg(long, env = "DESTINATION_RPC_URL")]
    pub(crate) destination_rpc_url: String,

    /// Path to the checkpoint file
    #[arg(long, env = "CHECKPOINT_PATH", default_value = "gas-relay-checkpoint.json")]
    pub(crate) checkpoint_path: PathBuf,
}
