use clap::Parser;
use opts::{GasRelayCli, GasRelaySubcommand};

mod cmd;
mod notify;
mod opts;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = GasRelayCli::parse();

    match args.cmd {
        GasRelaySubcommand::Run(cmd) => cmd.run().await,
        GasRelaySubcommand::Status(cmd) => cmd.run().await,
    }
}
