use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::info;
use serde_json::Value;
use tokio::task;

use crate::aggregate;
use crate::error::{CollectorError, Result};
use crate::metrics::{JobSummary, Metric};

use super::database::{Collection, Database, DocId};

pub const METRICS_COLLECTION: &str = "metrics";
pub const JOB_NAME_FIELD: &str = "job_name";

/// Outcome of storing one job's metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// First record for the job
    Inserted(DocId),
    /// The job already had a record; it was left untouched
    Existing(DocId),
}

/// Per-job summary storage, at most one document per `job_name`.
pub struct MetricsStore {
    collection: Arc<Mutex<Collection>>,
}

impl MetricsStore {
    /// Opens the database in `dir`, creating and indexing the `metrics` collection.
    ///
    /// # Errors
    ///
    /// Any failure is reported as `CollectorError::StorageInit`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Self::init(dir).map_err(|e| CollectorError::StorageInit {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn init(dir: &Path) -> Result<Self> {
        let db = Database::open(dir)?;

        if !db
            .collection_names()?
            .iter()
            .any(|name| name == METRICS_COLLECTION)
        {
            info!(
                "Database in {} not initialized, creating {METRICS_COLLECTION} collection ...",
                db.path().display()
            );
            db.create(METRICS_COLLECTION)?;
        }

        let mut collection = db.collection(METRICS_COLLECTION)?;
        collection.index(JOB_NAME_FIELD)?;

        if collection.is_empty() {
            info!("{METRICS_COLLECTION} collection is empty");
        } else {
            info!(
                "{METRICS_COLLECTION} collection holds {} documents, indexed on {:?}",
                collection.len(),
                collection.indexed_fields()
            );
        }

        Ok(Self {
            collection: Arc::new(Mutex::new(collection)),
        })
    }

    /// Stores the aggregated form of `metric` unless the job already has a document.
    ///
    /// The lookup and the insert happen under one lock, so concurrent calls for
    /// the same job cannot both insert. Inserts rewrite the collection file, so
    /// the whole step runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::DuplicateDocuments` when more than one document
    /// exists for the job. Callers must treat it as fatal.
    pub async fn store(&self, metric: &Metric) -> Result<StoreOutcome> {
        let collection = Arc::clone(&self.collection);
        let summary = aggregate::summarize(metric);

        task::spawn_blocking(move || {
            let mut collection = lock(&collection)?;
            upsert(&mut collection, summary)
        })
        .await
        .map_err(|e| CollectorError::Storage(format!("Storage task failed: {e}")))?
    }
}

fn lock(collection: &Mutex<Collection>) -> Result<MutexGuard<'_, Collection>> {
    collection
        .lock()
        .map_err(|_| CollectorError::Storage(format!("{METRICS_COLLECTION} collection lock poisoned")))
}

fn upsert(collection: &mut Collection, summary: JobSummary) -> Result<StoreOutcome> {
    let matches = collection.find_eq(JOB_NAME_FIELD, &Value::from(summary.job_name.as_str()));

    match matches.as_slice() {
        [] => {
            info!("Inserting new data for job {:?}", summary.job_name);
            let id = collection.insert(serde_json::to_value(&summary)?)?;
            Ok(StoreOutcome::Inserted(id))
        }
        [id] => {
            // TODO: refresh the stored aggregates here once overwriting existing records is wanted
            if let Some(existing) = collection.read(*id) {
                info!("Query returned document {id} for job {:?}: {existing}", summary.job_name);
            }
            Ok(StoreOutcome::Existing(*id))
        }
        ids => Err(CollectorError::DuplicateDocuments {
            job: summary.job_name,
            count: ids.len(),
        }),
    }
}

#[cfg(test)]
impl MetricsStore {
    /// Stored summaries for `job`.
    pub async fn find(&self, job: &str) -> Result<Vec<JobSummary>> {
        let collection = lock(&self.collection)?;

        collection
            .find_eq(JOB_NAME_FIELD, &Value::from(job))
            .into_iter()
            .filter_map(|id| collection.read(id).cloned())
            .map(|doc| serde_json::from_value(doc).map_err(CollectorError::from))
            .collect()
    }
}
