//! channel-digest CLI: keeps a topics summary and a changelog up to date
//! from a chat channel's new messages.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    // Must run before parsing so env-backed flags see `.env` values.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    if let Ok(path) = dotenv {
        tracing::debug!(?path, "loaded environment file");
    }
    commands::run(cli).await
}
