//! Question records and the stores that persist them.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::locks::lock_file_exclusive;
use crate::types::QuestionId;

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub name: String,
    pub time_limit_secs: u32,
    /// Number of canonical pairs on disk
    pub case_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Question {
    pub fn new(id: QuestionId, name: impl Into<String>, time_limit_secs: u32, case_count: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            time_limit_secs,
            case_count,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistence for question records
///
/// Mutations return `Ok(false)` when the id is unknown.
pub trait MetadataStore: Send + Sync {
    fn get(&self, id: &QuestionId) -> Result<Option<Question>>;

    fn list(&self) -> Result<Vec<Question>>;

    /// Fails if a record with the same id exists
    fn insert(&self, question: Question) -> Result<()>;

    fn set_case_count(&self, id: &QuestionId, case_count: usize) -> Result<bool>;

    fn update_details(&self, id: &QuestionId, name: &str, time_limit_secs: u32) -> Result<bool>;

    fn remove(&self, id: &QuestionId) -> Result<bool>;
}

type Records = BTreeMap<QuestionId, Question>;

fn insert_record(records: &mut Records, question: Question) -> Result<()> {
    if records.contains_key(&question.id) {
        return Err(IngestError::Metadata(format!(
            "question {} already exists",
            question.id
        )));
    }
    records.insert(question.id.clone(), question);
    Ok(())
}

fn touch(records: &mut Records, id: &QuestionId, apply: impl FnOnce(&mut Question)) -> bool {
    match records.get_mut(id) {
        Some(question) => {
            apply(question);
            question.updated_at = Utc::now();
            true
        }
        None => false,
    }
}

/// Process-local store, used by tests and embedders that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryStore {
    fn get(&self, id: &QuestionId) -> Result<Option<Question>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Question>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn insert(&self, question: Question) -> Result<()> {
        insert_record(&mut self.records.write(), question)
    }

    fn set_case_count(&self, id: &QuestionId, case_count: usize) -> Result<bool> {
        Ok(touch(&mut self.records.write(), id, |q| q.case_count = case_count))
    }

    fn update_details(&self, id: &QuestionId, name: &str, time_limit_secs: u32) -> Result<bool> {
        Ok(touch(&mut self.records.write(), id, |q| {
            q.name = name.to_string();
            q.time_limit_secs = time_limit_secs;
        }))
    }

    fn remove(&self, id: &QuestionId) -> Result<bool> {
        Ok(self.records.write().remove(id).is_some())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    questions: Vec<Question>,
}

/// Records kept in a single JSON document, rewritten atomically on every change
///
/// Every operation takes an exclusive lock on `<path>.lock` and reads the
/// document fresh, so several processes can share one store. A mutation is
/// applied to the records just read and saved before the lock is released;
/// a failed save leaves the document as it was.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    backup: bool,
    local: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, which need not exist yet
    pub fn open(path: impl Into<PathBuf>, backup: bool) -> Result<Self> {
        let path = path.into();
        let store = Self {
            lock_path: path.with_extension("lock"),
            path,
            backup,
            local: Mutex::new(()),
        };
        let questions = store.read(|records| Ok(records.len()))?;
        debug!(path = %store.path.display(), questions, "metadata store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Records> {
        match fs::read(&self.path) {
            Ok(data) => load_document(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Records::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn read<T>(&self, view: impl FnOnce(&Records) -> Result<T>) -> Result<T> {
        let _local = self.local.lock();
        let _file = lock_file_exclusive(&self.lock_path)?;
        view(&self.load()?)
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut Records) -> Result<T>) -> Result<T> {
        let _local = self.local.lock();
        let _file = lock_file_exclusive(&self.lock_path)?;
        let current = self.load()?;
        let mut next = current.clone();
        let value = apply(&mut next)?;
        if next != current {
            save_document(&self.path, &next, self.backup)?;
        }
        Ok(value)
    }
}

impl MetadataStore for JsonFileStore {
    fn get(&self, id: &QuestionId) -> Result<Option<Question>> {
        self.read(|records| Ok(records.get(id).cloned()))
    }

    fn list(&self) -> Result<Vec<Question>> {
        self.read(|records| Ok(records.values().cloned().collect()))
    }

    fn insert(&self, question: Question) -> Result<()> {
        self.mutate(|records| insert_record(records, question))
    }

    fn set_case_count(&self, id: &QuestionId, case_count: usize) -> Result<bool> {
        self.mutate(|records| Ok(touch(records, id, |q| q.case_count = case_count)))
    }

    fn update_details(&self, id: &QuestionId, name: &str, time_limit_secs: u32) -> Result<bool> {
        self.mutate(|records| {
            Ok(touch(records, id, |q| {
                q.name = name.to_string();
                q.time_limit_secs = time_limit_secs;
            }))
        })
    }

    fn remove(&self, id: &QuestionId) -> Result<bool> {
        self.mutate(|records| Ok(records.remove(id).is_some()))
    }
}

fn load_document(data: &[u8]) -> Result<Records> {
    let document: StoreDocument =
        serde_json::from_slice(data).map_err(|err| IngestError::Metadata(err.to_string()))?;
    if document.version != DOCUMENT_VERSION {
        return Err(IngestError::Metadata(format!(
            "unsupported metadata document version {}",
            document.version
        )));
    }
    Ok(document
        .questions
        .into_iter()
        .map(|q| (q.id.clone(), q))
        .collect())
}

/// tmp file + fsync + optional `.bak` copy + rename
fn save_document(path: &Path, records: &Records, backup: bool) -> Result<()> {
    let document = StoreDocument {
        version: DOCUMENT_VERSION,
        questions: records.values().cloned().collect(),
    };
    let serialized = serde_json::to_vec_pretty(&document)
        .map_err(|err| IngestError::Metadata(err.to_string()))?;
    let tmp_path = path.with_extension("tmp");

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&serialized)?;
        file.sync_all()?;
    }

    if backup && path.exists() {
        let backup_path = path.with_extension("bak");
        if let Err(err) = fs::copy(path, &backup_path) {
            warn!(path = %backup_path.display(), error = %err, "could not refresh metadata backup");
        }
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}
