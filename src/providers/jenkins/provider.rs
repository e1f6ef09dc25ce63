use log::{debug, info};
use tokio::task::JoinSet;

use crate::error::Result;
use crate::metrics::{Build, Metric};

use super::client::JenkinsClient;
use super::types::JenkinsJob;

/// Collects per-job build data from Jenkins.
///
/// Detail fetches for one job run as a barrier-synchronized fan-out: tasks are
/// launched one per build, and once more than `max_workers` are outstanding the
/// whole batch is joined before anything else is launched.
pub struct JenkinsProvider {
    client: JenkinsClient,
    max_workers: usize,
}

impl JenkinsProvider {
    pub fn new(client: JenkinsClient, max_workers: usize) -> Self {
        Self {
            client,
            max_workers,
        }
    }

    pub async fn fetch_job(&self, job: &str) -> Result<JenkinsJob> {
        self.client.fetch_job(job).await
    }

    /// Builds a `Metric` for `job` from its most recent builds.
    ///
    /// Up to `max_last_builds + 1` of the newest build numbers are fetched.
    /// A build whose detail cannot be fetched is left out of the metric; only a
    /// failure to list the job's builds is reported as an error.
    pub async fn collect_metric(&self, job: &JenkinsJob, max_last_builds: usize) -> Result<Metric> {
        let numbers = self.client.list_build_numbers(&job.name).await?;

        let mut metric = Metric::new(job.name.clone());
        let mut batch: JoinSet<Option<Build>> = JoinSet::new();

        for &number in numbers.iter().take(max_last_builds + 1) {
            let client = self.client.clone();
            let name = job.name.clone();

            batch.spawn(async move {
                client
                    .fetch_build(&name, number)
                    .await
                    .inspect_err(|e| debug!("Dropping build {name}#{number}: {e}"))
                    .ok()
            });

            if batch.len() > self.max_workers {
                drain_batch(&mut batch, &mut metric.builds).await;
            }
        }

        drain_batch(&mut batch, &mut metric.builds).await;

        info!(
            "Collected {} of {} listed builds for job {}",
            metric.builds.len(),
            numbers.len(),
            job.name
        );

        Ok(metric)
    }
}

/// Waits for every task in the batch, appending successful builds in completion order.
async fn drain_batch(batch: &mut JoinSet<Option<Build>>, builds: &mut Vec<Build>) {
    while let Some(joined) = batch.join_next().await {
        match joined {
            Ok(Some(build)) => builds.push(build),
            Ok(None) => {}
            Err(e) => debug!("Build fetch task failed: {e}"),
        }
    }
}
