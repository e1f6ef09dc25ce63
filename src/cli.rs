use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

use crate::collector::{Collector, Scheduler};
use crate::config::Config;
use crate::providers::{JenkinsClient, JenkinsProvider};
use crate::storage::MetricsStore;

#[derive(Parser)]
#[command(name = "jenkins-metrics")]
#[command(author, version, about = "Jenkins build statistics collector", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./jenkins-metrics.{toml,json,yaml,yml})
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of the metrics database
    #[arg(short, long, env = "COLLECTOR_DB_DIR")]
    db_dir: Option<PathBuf>,
}

impl Cli {
    fn build_scheduler(&self, config: Config) -> Result<Scheduler> {
        let db_dir = self
            .db_dir
            .clone()
            .or(config.storage.db_dir)
            .context("No database directory configured, set COLLECTOR_DB_DIR")?;

        let store = MetricsStore::open(&db_dir)
            .with_context(|| format!("Error starting collector database in {}", db_dir.display()))?;

        let client = JenkinsClient::new(
            &config.jenkins.base_url,
            config.jenkins.accept_invalid_certs,
            config.jenkins.request_timeout(),
        )?;
        let provider = JenkinsProvider::new(client, config.collector.max_workers);
        let collector = Collector::new(provider, store, config.collector.max_last_builds);

        if config.collector.jobs.is_empty() {
            warn!("No jobs configured, collection runs will do nothing");
        }

        info!(
            "Collecting {} jobs from {} every {}s",
            config.collector.jobs.len(),
            config.jenkins.base_url,
            config.collector.interval_seconds
        );

        let interval = config.collector.interval();
        Ok(Scheduler::new(collector, config.collector.jobs, interval))
    }

    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let scheduler = self.build_scheduler(config)?;

        tokio::select! {
            () = scheduler.run() => {}
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for shutdown signal")?;
                info!("Shutting down collector");
            }
        }

        Ok(())
    }
}
