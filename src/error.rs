use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Jenkins returned status {status} for {url}")]
    Api { status: u16, url: String },

    #[error("unable to find build numbers in rss feed for job {0:?}")]
    Listing(String),

    #[error("Failed to initialize storage at {path}: {reason}")]
    StorageInit { path: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Job {job:?} seems to have {count} stored documents, aborting")]
    DuplicateDocuments { job: String, count: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectorError {
    /// Errors that must stop the process rather than be folded into a cycle report.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StorageInit { .. } | Self::DuplicateDocuments { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;
