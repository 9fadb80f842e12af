//! Writes canonical case files under `<storage-root>/<question-id>/`.
//!
//! A failed write never leaves a partial generation behind: Create removes the
//! whole question directory, Replace leaves `input/` and `output/` empty.
//! With [`MaterializeStrategy::StagedSwap`] the new generation is written to a
//! sibling staging directory and renamed into place, so a failed write leaves
//! the prior generation untouched.

pub mod writer;

pub use writer::{copy_bounded, CaseWriter, CopyBudget, FsCaseWriter};

use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::archive::TestcaseArchive;
use crate::error::{IngestError, Result};
use crate::normalizer::CanonicalPlan;
use crate::types::{CaseId, IngestConfig, IngestMode, MaterializeStrategy, QuestionId, Side};

/// A fully written generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    pub case_count: usize,
    pub bytes_written: u64,
}

pub struct MaterializationEngine {
    storage_root: PathBuf,
    strategy: MaterializeStrategy,
    max_entry_bytes: u64,
    timeout: Option<Duration>,
    writer: Arc<dyn CaseWriter>,
}

impl MaterializationEngine {
    pub fn new(storage_root: impl Into<PathBuf>, writer: Arc<dyn CaseWriter>) -> Self {
        Self {
            storage_root: storage_root.into(),
            strategy: MaterializeStrategy::InPlace,
            max_entry_bytes: u64::MAX,
            timeout: None,
            writer,
        }
    }

    pub fn from_config(config: &IngestConfig, writer: Arc<dyn CaseWriter>) -> Self {
        Self::new(config.storage_root.clone(), writer)
            .with_strategy(config.strategy)
            .with_bounds(config.limits.max_entry_bytes, config.materialize_timeout)
    }

    pub fn with_strategy(mut self, strategy: MaterializeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_bounds(mut self, max_entry_bytes: u64, timeout: Option<Duration>) -> Self {
        self.max_entry_bytes = max_entry_bytes;
        self.timeout = timeout;
        self
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn question_dir(&self, id: &QuestionId) -> PathBuf {
        self.storage_root.join(id.as_str())
    }

    pub fn case_path(&self, id: &QuestionId, side: Side, case: CaseId) -> PathBuf {
        self.question_dir(id)
            .join(side.dir_name())
            .join(side.canonical_file_name(case))
    }

    /// Write every case of `plan` for question `id`
    pub fn materialize<R: Read + Seek>(
        &self,
        id: &QuestionId,
        mode: IngestMode,
        archive: &mut TestcaseArchive<R>,
        plan: &CanonicalPlan,
    ) -> Result<Generation> {
        debug!(question_id = %id, %mode, strategy = ?self.strategy, cases = plan.len(), "materializing");
        match self.strategy {
            MaterializeStrategy::InPlace => self.materialize_in_place(id, mode, archive, plan),
            MaterializeStrategy::StagedSwap => self.materialize_staged(id, mode, archive, plan),
        }
    }

    fn materialize_in_place<R: Read + Seek>(
        &self,
        id: &QuestionId,
        mode: IngestMode,
        archive: &mut TestcaseArchive<R>,
        plan: &CanonicalPlan,
    ) -> Result<Generation> {
        let question_dir = self.question_dir(id);

        match mode {
            IngestMode::Create => {
                fs::create_dir_all(&self.storage_root)?;
                create_question_dir(&question_dir, id)?;

                let result = create_side_dirs(&question_dir)
                    .and_then(|_| self.write_generation(&question_dir, archive, plan));
                if let Err(err) = &result {
                    warn!(question_id = %id, error = %err, "create failed, removing question directory");
                    remove_tree(&question_dir);
                }
                result
            }
            IngestMode::ReplaceExisting => {
                fs::create_dir_all(&question_dir)?;

                let result = evacuate(&question_dir)
                    .and_then(|_| self.write_generation(&question_dir, archive, plan));
                if let Err(err) = &result {
                    warn!(question_id = %id, error = %err, "replace failed, clearing partial generation");
                    if let Err(cleanup) = evacuate(&question_dir) {
                        error!(question_id = %id, error = %cleanup, "could not clear partial generation");
                    }
                }
                result
            }
        }
    }

    fn materialize_staged<R: Read + Seek>(
        &self,
        id: &QuestionId,
        mode: IngestMode,
        archive: &mut TestcaseArchive<R>,
        plan: &CanonicalPlan,
    ) -> Result<Generation> {
        let question_dir = self.question_dir(id);
        fs::create_dir_all(&self.storage_root)?;
        if mode == IngestMode::Create && question_dir.exists() {
            return Err(IngestError::AlreadyMaterialized(id.to_string()));
        }

        // Removed on drop, together with whatever generation it retires
        let staging = tempfile::Builder::new()
            .prefix(&format!(".staging-{id}-"))
            .tempdir_in(&self.storage_root)?;
        create_side_dirs(staging.path())?;
        let generation = self.write_generation(staging.path(), archive, plan)?;

        match mode {
            IngestMode::Create => {
                create_question_dir(&question_dir, id)?;
                for side in Side::ALL {
                    if let Err(err) = fs::rename(
                        staging.path().join(side.dir_name()),
                        question_dir.join(side.dir_name()),
                    ) {
                        remove_tree(&question_dir);
                        return Err(err.into());
                    }
                }
            }
            IngestMode::ReplaceExisting => {
                fs::create_dir_all(&question_dir)?;
                swap_into_place(staging.path(), &question_dir)?;
            }
        }

        debug!(question_id = %id, "staged generation swapped into place");
        Ok(generation)
    }

    fn write_generation<R: Read + Seek>(
        &self,
        dir: &Path,
        archive: &mut TestcaseArchive<R>,
        plan: &CanonicalPlan,
    ) -> Result<Generation> {
        let budget = CopyBudget::new(self.max_entry_bytes, self.timeout);
        let mut bytes_written = 0u64;

        for case in plan.cases() {
            for side in Side::ALL {
                budget.check_deadline()?;
                let position = case.entry(side);
                let label = archive.entries()[position].name.clone();
                let target = dir
                    .join(side.dir_name())
                    .join(side.canonical_file_name(case.id));

                let mut source = archive.open_entry(position)?;
                bytes_written += self.writer.write_case(&target, &mut source, &label, &budget)?;
                trace!(entry = %label, case = case.id.as_usize(), "case file written");
            }
        }

        Ok(Generation {
            case_count: plan.len(),
            bytes_written,
        })
    }

    /// Number of contiguous `input{k}.txt`/`output{k}.txt` pairs from k = 1
    pub fn count_generation(&self, id: &QuestionId) -> Result<usize> {
        let mut count = 0;
        loop {
            let next = CaseId::new(count + 1);
            let complete = Side::ALL
                .iter()
                .all(|&side| self.case_path(id, side, next).is_file());
            if !complete {
                return Ok(count);
            }
            count += 1;
        }
    }

    /// Delete the question's whole testcase tree; false if there was none
    pub fn remove_question(&self, id: &QuestionId) -> Result<bool> {
        let question_dir = self.question_dir(id);
        match fs::remove_dir_all(&question_dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn create_question_dir(question_dir: &Path, id: &QuestionId) -> Result<()> {
    match fs::create_dir(question_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(IngestError::AlreadyMaterialized(id.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn create_side_dirs(dir: &Path) -> Result<()> {
    for side in Side::ALL {
        fs::create_dir(dir.join(side.dir_name()))?;
    }
    Ok(())
}

/// Delete both side directories and recreate them empty
fn evacuate(question_dir: &Path) -> Result<()> {
    for side in Side::ALL {
        let path = question_dir.join(side.dir_name());
        match fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir(&path)?;
    }
    Ok(())
}

fn remove_tree(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            error!(error = %err, "rollback could not remove directory");
        }
    }
}

/// Move the live side directories into `staging/retired` and the staged ones
/// into place, restoring the live ones if any rename fails
fn swap_into_place(staging: &Path, question_dir: &Path) -> Result<()> {
    let retired = staging.join("retired");
    fs::create_dir(&retired)?;

    let mut moved_out = Vec::new();
    for side in Side::ALL {
        let live = question_dir.join(side.dir_name());
        if !live.exists() {
            continue;
        }
        if let Err(err) = fs::rename(&live, retired.join(side.dir_name())) {
            restore(&retired, question_dir, &moved_out);
            return Err(err.into());
        }
        moved_out.push(side);
    }

    let mut moved_in = Vec::new();
    for side in Side::ALL {
        if let Err(err) = fs::rename(
            staging.join(side.dir_name()),
            question_dir.join(side.dir_name()),
        ) {
            for &placed in &moved_in {
                let name = Side::dir_name(&placed);
                if let Err(undo) = fs::rename(question_dir.join(name), staging.join(name)) {
                    error!(error = %undo, side = %placed, "could not withdraw staged directory");
                }
            }
            restore(&retired, question_dir, &moved_out);
            return Err(err.into());
        }
        moved_in.push(side);
    }

    Ok(())
}

fn restore(retired: &Path, question_dir: &Path, sides: &[Side]) {
    for side in sides {
        let name = side.dir_name();
        if let Err(err) = fs::rename(retired.join(name), question_dir.join(name)) {
            error!(error = %err, %side, "could not restore previous generation");
        }
    }
}
