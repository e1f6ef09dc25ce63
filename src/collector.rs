//! Collection runs and the scheduler that drives them.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio::time::{self, MissedTickBehavior};

use crate::error::{CollectorError, Result};
use crate::providers::JenkinsProvider;
use crate::storage::{MetricsStore, StoreOutcome};

/// A job that could not be collected during a run.
#[derive(Debug)]
pub struct JobFailure {
    pub job: String,
    pub error: CollectorError,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.job, self.error)
    }
}

/// What happened to each job during one collection run.
#[derive(Debug)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub inserted: Vec<String>,
    pub existing: Vec<String>,
    pub failures: Vec<JobFailure>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            inserted: Vec::new(),
            existing: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// All per-job failures joined into one message, if any.
    pub fn joined_error(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }

        Some(
            self.failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    fn log(&self) {
        if let Some(err) = self.joined_error() {
            warn!("Failed to collect metrics: {err}");
        }

        info!(
            "Collection started at {} finished in {:.1?}: {} inserted, {} already stored, {} failed",
            self.started_at.to_rfc3339(),
            self.elapsed,
            self.inserted.len(),
            self.existing.len(),
            self.failures.len()
        );
    }
}

/// Runs one pass of fetch, aggregate and store over a job list.
pub struct Collector {
    provider: JenkinsProvider,
    store: MetricsStore,
    max_last_builds: usize,
}

impl Collector {
    pub fn new(provider: JenkinsProvider, store: MetricsStore, max_last_builds: usize) -> Self {
        Self {
            provider,
            store,
            max_last_builds,
        }
    }

    /// Collects and stores every job in order.
    ///
    /// A job that fails is recorded in the report and the run moves on.
    ///
    /// # Errors
    ///
    /// Only fatal errors (see [`CollectorError::is_fatal`]) are returned; they
    /// end the run at the job that raised them.
    pub async fn collect(&self, jobs: &[String]) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::new();

        for job in jobs {
            match self.collect_job(job).await {
                Ok(StoreOutcome::Inserted(_)) => report.inserted.push(job.clone()),
                Ok(StoreOutcome::Existing(_)) => report.existing.push(job.clone()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.failures.push(JobFailure {
                    job: job.clone(),
                    error: e,
                }),
            }
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    async fn collect_job(&self, job: &str) -> Result<StoreOutcome> {
        let jenkins_job = self.provider.fetch_job(job).await?;
        let metric = self
            .provider
            .collect_metric(&jenkins_job, self.max_last_builds)
            .await?;
        self.store.store(&metric).await
    }
}

/// How long a tick waits for its run, just under one interval.
fn run_timeout(interval: Duration) -> Duration {
    interval.saturating_sub(Duration::from_secs(1))
}

/// How a single scheduler tick ended.
#[derive(Debug)]
pub enum TickOutcome {
    Completed(CycleReport),
    /// The run outlived the tick; it keeps going in the background
    TimedOut,
    /// A previous run was still in flight, nothing was started
    Skipped,
    Panicked,
}

/// Fires collection runs on a fixed interval, never more than one at a time.
pub struct Scheduler {
    collector: Arc<Collector>,
    jobs: Arc<[String]>,
    interval: Duration,
    in_flight: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(collector: Collector, jobs: Vec<String>, interval: Duration) -> Self {
        Self {
            collector: Arc::new(collector),
            jobs: jobs.into(),
            interval,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Starts a run and waits for it up to the run timeout.
    ///
    /// The run is not cancelled when the timeout fires. A fatal storage error
    /// inside the run terminates the process.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(guard) = Arc::clone(&self.in_flight).try_lock_owned() else {
            warn!("Previous collection is still running, skipping this tick");
            return TickOutcome::Skipped;
        };

        info!("Starting worker for {} jobs ...", self.jobs.len());

        let collector = Arc::clone(&self.collector);
        let jobs = Arc::clone(&self.jobs);
        let run = tokio::spawn(async move {
            let _guard = guard;
            match collector.collect(&jobs).await {
                Ok(report) => report,
                Err(e) => {
                    error!("{e}");
                    std::process::exit(1);
                }
            }
        });

        match time::timeout(run_timeout(self.interval), run).await {
            Ok(Ok(report)) => {
                report.log();
                TickOutcome::Completed(report)
            }
            Ok(Err(e)) => {
                error!("Collection task failed: {e}");
                TickOutcome::Panicked
            }
            Err(_) => {
                warn!("Timeout while waiting for a worker to finish");
                TickOutcome::TimedOut
            }
        }
    }

    /// Runs a collection immediately, then once per interval. Never returns.
    pub async fn run(&self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::JenkinsClient;
    use crate::test_support::SlowJenkins;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn collector_for(server: &mockito::Server, dir: &TempDir) -> Collector {
        collector_at(&server.url(), dir)
    }

    fn collector_at(url: &str, dir: &TempDir) -> Collector {
        let client = JenkinsClient::new(url, false, Duration::from_secs(5)).unwrap();
        let provider = JenkinsProvider::new(client, 5);
        let store = MetricsStore::open(dir.path()).unwrap();
        Collector::new(provider, store, 5)
    }

    async fn mock_healthy_job(server: &mut mockito::Server, job: &str) -> Vec<mockito::Mock> {
        let mut mocks = vec![
            server
                .mock("GET", format!("/job/{job}/api/json").as_str())
                .with_body(format!(r#"{{"name": "{job}"}}"#))
                .create_async()
                .await,
            server
                .mock("GET", format!("/job/{job}/rssAll").as_str())
                .with_body(format!(":{job}:2 :{job}:1"))
                .create_async()
                .await,
        ];
        for (number, result) in [(1, "SUCCESS"), (2, "FAILURE")] {
            mocks.push(
                server
                    .mock("GET", format!("/job/{job}/{number}/api/json").as_str())
                    .with_body(format!(
                        r#"{{"number": {number}, "duration": 30000, "building": false, "result": "{result}"}}"#
                    ))
                    .create_async()
                    .await,
            );
        }
        mocks
    }

    #[tokio::test]
    async fn test_collect_isolates_failing_jobs() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let _healthy = mock_healthy_job(&mut server, "job-a").await;
        let _missing = server
            .mock("GET", "/job/job-b/api/json")
            .with_status(404)
            .create_async()
            .await;
        let _no_builds_info = server
            .mock("GET", "/job/job-c/api/json")
            .with_body(r#"{"name": "job-c"}"#)
            .create_async()
            .await;
        let _no_builds = server
            .mock("GET", "/job/job-c/rssAll")
            .with_body("<feed/>")
            .create_async()
            .await;

        let collector = collector_for(&server, &temp_dir);
        let jobs = vec!["job-b".to_string(), "job-a".to_string(), "job-c".to_string()];
        let report = collector.collect(&jobs).await.unwrap();

        assert_eq!(report.inserted, vec!["job-a"]);
        assert!(report.existing.is_empty());
        assert_eq!(report.failures.len(), 2);

        let joined = report.joined_error().unwrap();
        assert!(joined.starts_with("job-b: "));
        assert!(joined.contains(", job-c: "));

        let stored = collector.store.find("job-a").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].builds_count, 2);
        assert_eq!(stored[0].success_builds_count, 1);
        assert_eq!(stored[0].failed_builds_count, 1);
        assert_eq!(stored[0].average_per_build_duration_seconds, 30);
    }

    #[tokio::test]
    async fn test_second_run_keeps_existing_documents() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let _healthy = mock_healthy_job(&mut server, "job-a").await;

        let collector = collector_for(&server, &temp_dir);
        let jobs = vec!["job-a".to_string()];

        let first = assert_ok!(collector.collect(&jobs).await);
        let second = assert_ok!(collector.collect(&jobs).await);

        assert_eq!(first.inserted, vec!["job-a"]);
        assert_eq!(second.existing, vec!["job-a"]);
        assert!(second.joined_error().is_none());
        assert_eq!(collector.store.find("job-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_documents_stop_the_run() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let _healthy = mock_healthy_job(&mut server, "job-a").await;
        let untouched = server
            .mock("GET", "/job/job-z/api/json")
            .expect(0)
            .create_async()
            .await;

        {
            MetricsStore::open(temp_dir.path()).unwrap();
            let docs = temp_dir.path().join("metrics").join("documents.json");
            std::fs::write(
                docs,
                r#"{"1": {"job_name": "job-a"}, "2": {"job_name": "job-a"}}"#,
            )
            .unwrap();
        }

        let collector = collector_for(&server, &temp_dir);
        let jobs = vec!["job-a".to_string(), "job-z".to_string()];
        let err = assert_err!(collector.collect(&jobs).await);

        assert!(matches!(err, CollectorError::DuplicateDocuments { count: 2, .. }));
        untouched.assert_async().await;
    }

    #[tokio::test]
    async fn test_tick_completes_and_reports() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let _healthy = mock_healthy_job(&mut server, "job-a").await;

        let scheduler = Scheduler::new(
            collector_for(&server, &temp_dir),
            vec!["job-a".to_string()],
            Duration::from_secs(30),
        );

        match scheduler.tick().await {
            TickOutcome::Completed(report) => assert_eq!(report.inserted, vec!["job-a"]),
            other => panic!("unexpected tick outcome: {other:?}"),
        }

        // The in-flight guard is released once the run finishes
        assert!(scheduler.in_flight.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_tick_skips_while_run_in_flight() {
        let server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let scheduler = Scheduler::new(
            collector_for(&server, &temp_dir),
            vec!["job-a".to_string()],
            Duration::from_secs(30),
        );

        let _running = Arc::clone(&scheduler.in_flight).try_lock_owned().unwrap();

        assert!(matches!(scheduler.tick().await, TickOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_slow_run_times_out_and_finishes_in_background() {
        let jenkins = SlowJenkins::start("job-a", [2, 1], Duration::from_millis(1500)).await;
        let temp_dir = TempDir::new().unwrap();
        let scheduler = Scheduler::new(
            collector_at(jenkins.url(), &temp_dir),
            vec!["job-a".to_string()],
            Duration::from_secs(2),
        );

        let started = Instant::now();
        assert!(matches!(scheduler.tick().await, TickOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_millis(1400));

        // The timed-out run still holds the guard
        assert!(matches!(scheduler.tick().await, TickOutcome::Skipped));

        let finished = time::timeout(Duration::from_secs(5), async {
            while scheduler.in_flight.try_lock().is_err() {
                time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        assert_ok!(finished);

        let stored = scheduler.collector.store.find("job-a").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].builds_count, 2);
    }

    #[test]
    fn test_run_timeout_is_just_under_interval() {
        assert_eq!(run_timeout(Duration::from_secs(30)), Duration::from_secs(29));
        assert_eq!(run_timeout(Duration::from_millis(500)), Duration::ZERO);
    }

    #[test]
    fn test_empty_report_has_no_error() {
        let report = CycleReport::new();
        assert!(report.joined_error().is_none());
    }
}
