use serde::Deserialize;

use crate::metrics::{Build, BuildResult};

/// A Jenkins job as returned by `GET /job/{name}/api/json`.
#[derive(Debug, Clone, Deserialize)]
pub struct JenkinsJob {
    /// Job name as configured in Jenkins
    pub name: String,
}

/// A Jenkins build as returned by `GET /job/{name}/{number}/api/json`.
#[derive(Debug, Clone, Deserialize)]
pub struct JenkinsBuild {
    pub number: u64,
    /// Duration in milliseconds; 0 while the build is still running
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub building: bool,
    /// `SUCCESS`, `FAILURE`, `UNSTABLE`, `ABORTED`, or null while building
    #[serde(default)]
    pub result: Option<String>,
}

impl From<JenkinsBuild> for Build {
    fn from(build: JenkinsBuild) -> Self {
        Self {
            number: build.number,
            duration: build.duration / 1000,
            building: build.building,
            result: BuildResult::from_jenkins(build.result.as_deref()),
        }
    }
}
