use serde::{Deserialize, Serialize};

/// Final outcome of a Jenkins build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildResult {
    Success,
    Failure,
    Unknown,
}

impl BuildResult {
    /// Maps the raw `result` string reported by Jenkins.
    ///
    /// Anything other than `SUCCESS` or `FAILURE` (aborted, unstable, still
    /// running, missing) is `Unknown`.
    pub fn from_jenkins(raw: Option<&str>) -> Self {
        match raw {
            Some("FAILURE") => Self::Failure,
            Some("SUCCESS") => Self::Success,
            _ => Self::Unknown,
        }
    }
}

/// A single build of a job, as fetched from Jenkins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub number: u64,
    /// Build duration in whole seconds
    pub duration: u64,
    pub building: bool,
    pub result: BuildResult,
}

/// Builds collected for one job during a single collection attempt.
///
/// Build order follows fetch completion and carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub job: String,
    pub builds: Vec<Build>,
}

impl Metric {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            builds: Vec::new(),
        }
    }
}

/// The document persisted per job in the `metrics` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_name: String,
    pub builds_count: usize,
    pub success_builds_count: usize,
    pub failed_builds_count: usize,
    pub average_per_build_duration_seconds: u64,
    pub average_per_success_build_duration_seconds: u64,
    pub average_per_failed_build_duration_seconds: u64,
    pub build_numbers: Vec<u64>,
}
