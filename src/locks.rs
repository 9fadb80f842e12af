use fs4::fs_std::FileExt;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

use crate::error::Result;
use crate::types::QuestionId;

/// Open (creating if needed) `path` and block until this handle holds an
/// exclusive advisory lock on it; the lock is released when the file is closed
pub fn lock_file_exclusive(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}

/// Serializes requests that target the same question id
///
/// Threads of one process queue on an in-memory mutex. With a lock directory
/// each holder also takes an exclusive lock on `<lock-dir>/<id>.lock`, which
/// serializes separate processes sharing the storage root. Requests for
/// different ids never block each other. In-memory slots are dropped once no
/// request holds or waits on them; lock files are left in place.
#[derive(Debug, Default)]
pub struct QuestionLocks {
    slots: Mutex<HashMap<QuestionId, Arc<Mutex<()>>>>,
    lock_dir: Option<PathBuf>,
}

/// Held for the whole duration of one request on one question
pub struct QuestionGuard {
    id: QuestionId,
    _file: Option<File>,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl QuestionGuard {
    pub fn question_id(&self) -> &QuestionId {
        &self.id
    }
}

impl std::fmt::Debug for QuestionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionGuard").field("id", &self.id).finish()
    }
}

impl QuestionLocks {
    /// In-process locking only
    pub fn new() -> Self {
        Self::default()
    }

    /// In-process locking plus one lock file per question under `lock_dir`
    pub fn with_lock_dir(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            slots: Mutex::default(),
            lock_dir: Some(lock_dir.into()),
        }
    }

    pub fn lock_path(&self, id: &QuestionId) -> Option<PathBuf> {
        self.lock_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.lock", id.as_str())))
    }

    /// Block until no other request, in this process or another, holds `id`
    pub fn acquire(&self, id: &QuestionId) -> Result<QuestionGuard> {
        let slot = {
            let mut slots = self.slots.lock();
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(id.clone()).or_default())
        };
        trace!(question_id = %id, "waiting for question lock");
        let guard = slot.lock_arc();

        let file = match self.lock_path(id) {
            Some(path) => Some(lock_file_exclusive(&path)?),
            None => None,
        };

        Ok(QuestionGuard {
            id: id.clone(),
            _file: file,
            _guard: guard,
        })
    }

    /// Number of ids currently held or waited on in this process
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| Arc::strong_count(slot) > 1)
            .count()
    }
}
