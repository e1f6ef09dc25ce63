//! Embedded document database.
//!
//! A database is a directory; every collection is a subdirectory holding
//! `documents.json` (documents keyed by id) and `indexes.json` (indexed field
//! names). Collections are loaded into memory when opened and written back on
//! every insert.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde_json::Value;

use crate::error::{CollectorError, Result};

pub type DocId = u64;

const DOCUMENTS_FILE: &str = "documents.json";
const INDEXES_FILE: &str = "indexes.json";

pub struct Database {
    dir: PathBuf,
}

impl Database {
    /// Opens the database in `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!("Opened document database at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().join(DOCUMENTS_FILE).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Creates an empty collection.
    ///
    /// # Errors
    ///
    /// Fails if the name is not a plain directory name or the collection exists.
    pub fn create(&self, name: &str) -> Result<()> {
        let dir = self.collection_dir(name)?;
        if dir.join(DOCUMENTS_FILE).exists() {
            return Err(CollectorError::Storage(format!(
                "collection {name:?} already exists"
            )));
        }

        fs::create_dir_all(&dir)?;
        write_json(&dir.join(DOCUMENTS_FILE), &BTreeMap::<DocId, Value>::new())?;
        write_json(&dir.join(INDEXES_FILE), &Vec::<String>::new())?;
        Ok(())
    }

    /// Loads a collection into memory.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        let dir = self.collection_dir(name)?;
        if !dir.join(DOCUMENTS_FILE).is_file() {
            return Err(CollectorError::Storage(format!(
                "collection {name:?} does not exist"
            )));
        }
        Collection::load(dir)
    }

    fn collection_dir(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(CollectorError::Storage(format!(
                "invalid collection name {name:?}"
            )));
        }
        Ok(self.dir.join(name))
    }
}

/// An in-memory view of one collection, persisted on every write.
pub struct Collection {
    dir: PathBuf,
    documents: BTreeMap<DocId, Value>,
    /// field name -> serialized field value -> ids
    indexes: HashMap<String, HashMap<String, BTreeSet<DocId>>>,
}

impl Collection {
    fn load(dir: PathBuf) -> Result<Self> {
        let documents: BTreeMap<DocId, Value> =
            serde_json::from_str(&fs::read_to_string(dir.join(DOCUMENTS_FILE))?)?;

        let index_path = dir.join(INDEXES_FILE);
        let fields: Vec<String> = if index_path.is_file() {
            serde_json::from_str(&fs::read_to_string(index_path)?)?
        } else {
            Vec::new()
        };

        let mut collection = Self {
            dir,
            documents,
            indexes: HashMap::new(),
        };
        for field in fields {
            collection.build_index(field);
        }

        debug!(
            "Loaded {} documents from {}",
            collection.documents.len(),
            collection.dir.display()
        );

        Ok(collection)
    }

    /// Indexes `field` for equality lookups. Indexing an indexed field is a no-op.
    pub fn index(&mut self, field: &str) -> Result<()> {
        if self.indexes.contains_key(field) {
            return Ok(());
        }

        self.build_index(field.to_string());

        let mut fields: Vec<&String> = self.indexes.keys().collect();
        fields.sort();
        write_json(&self.dir.join(INDEXES_FILE), &fields)
    }

    pub fn indexed_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.indexes.keys().map(String::as_str).collect();
        fields.sort_unstable();
        fields
    }

    /// Stores a new document and returns its id.
    ///
    /// # Errors
    ///
    /// Fails if `document` is not a JSON object or cannot be written to disk.
    /// A failed write leaves the collection unchanged.
    pub fn insert(&mut self, document: Value) -> Result<DocId> {
        if !document.is_object() {
            return Err(CollectorError::Storage(
                "documents must be JSON objects".to_string(),
            ));
        }

        let id = self.documents.last_key_value().map_or(1, |(id, _)| id + 1);
        self.documents.insert(id, document);

        if let Err(e) = write_json(&self.dir.join(DOCUMENTS_FILE), &self.documents) {
            self.documents.remove(&id);
            return Err(e);
        }

        let Self {
            documents, indexes, ..
        } = self;
        for (field, entries) in indexes.iter_mut() {
            if let Some(key) = documents.get(&id).and_then(|doc| index_key(doc, field)) {
                entries.entry(key).or_default().insert(id);
            }
        }

        Ok(id)
    }

    pub fn read(&self, id: DocId) -> Option<&Value> {
        self.documents.get(&id)
    }

    /// Ids of documents whose `field` equals `value`, in ascending order.
    pub fn find_eq(&self, field: &str, value: &Value) -> Vec<DocId> {
        let key = value.to_string();

        if let Some(entries) = self.indexes.get(field) {
            return entries
                .get(&key)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
        }

        self.documents
            .iter()
            .filter(|(_, doc)| index_key(doc, field).as_deref() == Some(key.as_str()))
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn build_index(&mut self, field: String) {
        let mut entries: HashMap<String, BTreeSet<DocId>> = HashMap::new();
        for (&id, doc) in &self.documents {
            if let Some(key) = index_key(doc, &field) {
                entries.entry(key).or_default().insert(id);
            }
        }
        self.indexes.insert(field, entries);
    }
}

fn index_key(document: &Value, field: &str) -> Option<String> {
    document.get(field).map(Value::to_string)
}

/// Writes through a temporary file so a crash never leaves a truncated file behind.
fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
