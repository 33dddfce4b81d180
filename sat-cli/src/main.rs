//! sat-cli - clear-sky imagery statistics for ground-survey sites.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "sat-cli",
    version,
    about = "Satellite imagery statistics for survey sites"
)]
struct Cli {
    #[command(subcommand)]
    command: sat_cmd::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    sat_cmd::run(cli.command).await
}
