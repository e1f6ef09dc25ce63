use std::time::Duration;

use log::warn;
use regex::Regex;
use reqwest::Client;
use url::Url;

use crate::error::{CollectorError, Result};
use crate::metrics::Build;

use super::types::{JenkinsBuild, JenkinsJob};

/// Jenkins HTTP client for job lookups, activity feeds and build details.
#[derive(Clone)]
pub struct JenkinsClient {
    client: Client,
    base_url: Url,
}

impl JenkinsClient {
    /// Creates a client rooted at `base_url` (e.g. `https://ci.example.com/jenkins`).
    ///
    /// `accept_invalid_certs` disables TLS certificate verification, for Jenkins
    /// instances served with self-signed certificates.
    pub fn new(base_url: &str, accept_invalid_certs: bool, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("jenkins-metrics/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .timeout(timeout)
            .build()
            .map_err(|e| CollectorError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| CollectorError::Config(format!("Invalid base URL: {e}")))?;

        // Url::join drops the last path segment unless it ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    fn job_url(&self, job: &str, suffix: &str) -> Result<Url> {
        self.base_url
            .join(&format!("job/{job}/{suffix}"))
            .map_err(|e| CollectorError::Config(format!("Invalid job URL: {e}")))
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Api {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response)
    }

    /// Looks up a job by name.
    pub async fn fetch_job(&self, job: &str) -> Result<JenkinsJob> {
        let url = self.job_url(job, "api/json")?;
        Ok(self.get(url).await?.json().await?)
    }

    /// Lists build numbers found in the job's activity feed, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Listing` if the feed mentions no build of the job.
    pub async fn list_build_numbers(&self, job: &str) -> Result<Vec<u64>> {
        let url = self.job_url(job, "rssAll")?;
        let body = self.get(url).await?.text().await?;
        extract_build_numbers(job, &body)
    }

    /// Fetches the detail of a single build.
    pub async fn fetch_build(&self, job: &str, number: u64) -> Result<Build> {
        let url = self.job_url(job, &format!("{number}/api/json"))?;
        let build: JenkinsBuild = self.get(url).await?.json().await?;
        Ok(build.into())
    }
}

/// Extracts `:{job}:{number}` tokens from a feed body, sorted descending.
///
/// Tokens whose number does not fit are skipped with a warning.
pub(super) fn extract_build_numbers(job: &str, body: &str) -> Result<Vec<u64>> {
    let pattern = Regex::new(&format!(r":{}:(\d+)", regex::escape(job)))
        .map_err(|e| CollectorError::Config(format!("Invalid build number pattern: {e}")))?;

    let mut numbers: Vec<u64> = pattern
        .captures_iter(body)
        .filter_map(|caps| {
            let raw = &caps[1];
            raw.parse::<u64>()
                .inspect_err(|e| warn!("Failed to parse build number {raw} of {job}: {e} (will skip)"))
                .ok()
        })
        .collect();

    if numbers.is_empty() {
        return Err(CollectorError::Listing(job.to_string()));
    }

    numbers.sort_unstable_by(|a, b| b.cmp(a));

    Ok(numbers)
}
