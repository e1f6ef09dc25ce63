mod aggregate;
mod cli;
mod collector;
mod config;
mod error;
mod metrics;
mod providers;
mod storage;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("Starting manager ...");
    cli.execute().await?;

    Ok(())
}
