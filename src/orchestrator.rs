//! Runs one ingestion request end to end and commits its case count.
//!
//! Every request on a question id holds that id's lock from the first
//! filesystem access to the metadata commit, so a Replace's evacuate step and
//! its writes never interleave with another request on the same tree.

use std::io::{BufReader, Cursor, Read};
use std::sync::Arc;
use std::thread;
use tokio::task;
use tracing::{debug, info, info_span, warn};

use crate::archive::ArchiveScanner;
use crate::error::{IngestError, IngestFailure, IngestResult, Result};
use crate::locks::QuestionLocks;
use crate::materialize::{CaseWriter, FsCaseWriter, Generation, MaterializationEngine};
use crate::metadata::{MetadataStore, Question};
use crate::normalizer::IndexNormalizer;
use crate::types::{IngestConfig, IngestMode, IngestOutcome, IngestStage, QuestionId};
use crate::upload::StagedUpload;
use crate::validator::PairValidator;

/// Fields of a question supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub name: String,
    pub time_limit_secs: u32,
}

impl NewQuestion {
    pub fn new(name: impl Into<String>, time_limit_secs: u32) -> Self {
        Self {
            name: name.into(),
            time_limit_secs,
        }
    }

    fn validate(&self) -> Result<()> {
        validate_details(&self.name, self.time_limit_secs)
    }
}

fn validate_details(name: &str, time_limit_secs: u32) -> Result<()> {
    if name.trim().is_empty() {
        return Err(IngestError::InvalidArgument("question name is missing".to_string()));
    }
    if time_limit_secs == 0 {
        return Err(IngestError::InvalidArgument(
            "time limit must be a positive number of seconds".to_string(),
        ));
    }
    Ok(())
}

/// Tracks the request state machine and tags failures with the current stage
#[derive(Debug)]
struct StageTracker {
    stage: IngestStage,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            stage: IngestStage::Received,
        }
    }

    fn advance(&mut self, next: IngestStage) {
        debug_assert!(self.stage.can_transition_to(next), "{} -> {}", self.stage, next);
        debug!(stage = %next, "stage");
        self.stage = next;
    }

    fn fail(&self, error: impl Into<IngestError>) -> IngestFailure {
        let failure = IngestFailure::at(self.stage, error);
        warn!(stage = %failure.stage, kind = %failure.kind(), error = %failure.error, "ingestion failed");
        failure
    }
}

/// Result of the scan → validate → normalize → materialize pipeline
#[derive(Debug)]
struct PipelineRun {
    generation: Generation,
    dropped: Vec<u64>,
}

/// The shared ingestion service behind the add-question and edit-testcases operations
pub struct IngestService<S: MetadataStore> {
    config: IngestConfig,
    store: S,
    locks: QuestionLocks,
    engine: MaterializationEngine,
}

impl<S: MetadataStore> IngestService<S> {
    pub fn new(config: IngestConfig, store: S) -> Result<Self> {
        config.validate()?;
        let writer: Arc<dyn CaseWriter> = Arc::new(FsCaseWriter::new(config.sync_files));
        let engine = MaterializationEngine::from_config(&config, writer);
        let locks = QuestionLocks::with_lock_dir(config.lock_dir());
        Ok(Self {
            config,
            store,
            locks,
            engine,
        })
    }

    /// Replace the sink for case files
    pub fn with_case_writer(mut self, writer: Arc<dyn CaseWriter>) -> Self {
        self.engine = MaterializationEngine::from_config(&self.config, writer);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &MaterializationEngine {
        &self.engine
    }

    /// Materialize `archive` for `id` without touching the metadata store
    ///
    /// The caller persists the returned case count.
    pub fn ingest<R: Read>(
        &self,
        id: &QuestionId,
        mode: IngestMode,
        archive: R,
    ) -> IngestResult<IngestOutcome> {
        let span = info_span!("ingest", question_id = %id, %mode);
        let _entered = span.enter();

        let mut tracker = StageTracker::new();
        let _guard = self.locks.acquire(id).map_err(|err| tracker.fail(err))?;
        let run = self.run_pipeline(&mut tracker, id, mode, archive)?;
        tracker.advance(IngestStage::Committed);
        Ok(self.outcome(id, mode, run))
    }

    /// Create a question from `archive` and record it with its case count
    pub fn add_question<R: Read>(&self, question: NewQuestion, archive: R) -> IngestResult<IngestOutcome> {
        let mut tracker = StageTracker::new();
        question.validate().map_err(|err| tracker.fail(err))?;

        let id = QuestionId::generate(&question.name);
        let span = info_span!("ingest", question_id = %id, mode = %IngestMode::Create);
        let _entered = span.enter();
        let _guard = self.locks.acquire(&id).map_err(|err| tracker.fail(err))?;

        let run = self.run_pipeline(&mut tracker, &id, IngestMode::Create, archive)?;

        let case_count = run.generation.case_count;
        let committed = self.commit_with_retry(&id, case_count, || {
            self.store.insert(Question::new(
                id.clone(),
                question.name.trim(),
                question.time_limit_secs,
                case_count,
            ))
        });
        if let Err(err) = committed {
            // Without a record nothing can reach the new tree again
            if let Err(cleanup) = self.engine.remove_question(&id) {
                warn!(error = %cleanup, "could not remove orphaned testcases");
            }
            return Err(tracker.fail(err));
        }
        tracker.advance(IngestStage::Committed);

        info!(cases = case_count, "question created");
        Ok(self.outcome(&id, IngestMode::Create, run))
    }

    /// Replace the testcases of an existing question
    pub fn edit_testcases<R: Read>(&self, id: &QuestionId, archive: R) -> IngestResult<IngestOutcome> {
        let mode = IngestMode::ReplaceExisting;
        let span = info_span!("ingest", question_id = %id, %mode);
        let _entered = span.enter();

        let mut tracker = StageTracker::new();
        let _guard = self.locks.acquire(id).map_err(|err| tracker.fail(err))?;
        match self.store.get(id) {
            Ok(Some(_)) => {}
            Ok(None) => return Err(tracker.fail(IngestError::QuestionNotFound(id.to_string()))),
            Err(err) => return Err(tracker.fail(err)),
        }

        let run = self.run_pipeline(&mut tracker, id, mode, archive)?;

        let case_count = run.generation.case_count;
        self.commit_with_retry(id, case_count, || {
            if self.store.set_case_count(id, case_count)? {
                Ok(())
            } else {
                Err(IngestError::QuestionNotFound(id.to_string()))
            }
        })
        .map_err(|err| tracker.fail(err))?;
        tracker.advance(IngestStage::Committed);

        info!(cases = case_count, "testcases replaced");
        Ok(self.outcome(id, mode, run))
    }

    pub fn edit_question(&self, id: &QuestionId, name: &str, time_limit_secs: u32) -> Result<Question> {
        validate_details(name, time_limit_secs)?;
        let _guard = self.locks.acquire(id)?;
        if !self.store.update_details(id, name.trim(), time_limit_secs)? {
            return Err(IngestError::QuestionNotFound(id.to_string()));
        }
        self.require(id)
    }

    /// Remove the record, then the testcase tree
    pub fn delete_question(&self, id: &QuestionId) -> Result<()> {
        let _guard = self.locks.acquire(id)?;
        if !self.store.remove(id)? {
            return Err(IngestError::QuestionNotFound(id.to_string()));
        }
        if !self.engine.remove_question(id)? {
            warn!(question_id = %id, "question had no testcase directory");
        }
        info!(question_id = %id, "question deleted");
        Ok(())
    }

    pub fn show_question(&self, id: &QuestionId) -> Result<Question> {
        self.require(id)
    }

    /// Recount the generation on disk and store it as the case count
    pub fn reconcile(&self, id: &QuestionId) -> Result<Question> {
        let _guard = self.locks.acquire(id)?;
        let recorded = self.require(id)?;
        let on_disk = self.engine.count_generation(id)?;
        if recorded.case_count != on_disk {
            info!(question_id = %id, recorded = recorded.case_count, on_disk, "reconciling case count");
            self.store.set_case_count(id, on_disk)?;
        }
        self.require(id)
    }

    fn require(&self, id: &QuestionId) -> Result<Question> {
        self.store
            .get(id)?
            .ok_or_else(|| IngestError::QuestionNotFound(id.to_string()))
    }

    fn run_pipeline<R: Read>(
        &self,
        tracker: &mut StageTracker,
        id: &QuestionId,
        mode: IngestMode,
        source: R,
    ) -> IngestResult<PipelineRun> {
        let limits = self.config.limits;
        let upload = StagedUpload::spool(source, &self.config.upload_dir(), limits.max_archive_bytes)
            .map_err(|err| tracker.fail(err))?;
        let result = self.process_upload(tracker, id, mode, &upload);
        upload.discard();
        result
    }

    fn process_upload(
        &self,
        tracker: &mut StageTracker,
        id: &QuestionId,
        mode: IngestMode,
        upload: &StagedUpload,
    ) -> IngestResult<PipelineRun> {
        tracker.advance(IngestStage::Scanning);
        let file = upload.open().map_err(|err| tracker.fail(err))?;
        let mut archive = ArchiveScanner::new(self.config.limits)
            .scan(BufReader::new(file))
            .map_err(|err| tracker.fail(err))?;

        tracker.advance(IngestStage::Validating);
        let validated = PairValidator::new(self.config.lenient_pairs)
            .validate(archive.entries())
            .map_err(|err| tracker.fail(err))?;

        tracker.advance(IngestStage::Normalizing);
        let plan = IndexNormalizer.normalize(validated.pairs);

        tracker.advance(IngestStage::Materializing);
        let generation = self
            .engine
            .materialize(id, mode, &mut archive, &plan)
            .map_err(|err| tracker.fail(err))?;

        Ok(PipelineRun {
            generation,
            dropped: validated.dropped.iter().map(|index| index.number).collect(),
        })
    }

    fn commit_with_retry<F>(&self, id: &QuestionId, case_count: usize, mut commit: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        let policy = self.config.commit;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match commit() {
                Ok(()) => return Ok(()),
                Err(err) if attempt < policy.attempts => {
                    warn!(question_id = %id, attempt, error = %err, "metadata commit failed, retrying");
                    thread::sleep(policy.backoff * attempt);
                }
                Err(err) => {
                    return Err(IngestError::MetadataCommit {
                        question_id: id.to_string(),
                        case_count,
                        attempts: attempt,
                        reason: err.to_string(),
                    })
                }
            }
        }
    }

    fn outcome(&self, id: &QuestionId, mode: IngestMode, run: PipelineRun) -> IngestOutcome {
        IngestOutcome {
            question_id: id.clone(),
            mode,
            case_count: run.generation.case_count,
            dropped_indices: run.dropped,
            bytes_written: run.generation.bytes_written,
        }
    }
}

fn join_failure(err: task::JoinError) -> IngestFailure {
    IngestFailure::at(
        IngestStage::Received,
        IngestError::Config(format!("ingest task failed: {err}")),
    )
}

impl<S: MetadataStore + 'static> IngestService<S> {
    /// [`Self::add_question`] on the blocking thread pool
    pub async fn add_question_async(
        self: Arc<Self>,
        question: NewQuestion,
        archive: Vec<u8>,
    ) -> IngestResult<IngestOutcome> {
        task::spawn_blocking(move || self.add_question(question, Cursor::new(archive)))
            .await
            .map_err(join_failure)?
    }

    /// [`Self::edit_testcases`] on the blocking thread pool
    pub async fn edit_testcases_async(
        self: Arc<Self>,
        id: QuestionId,
        archive: Vec<u8>,
    ) -> IngestResult<IngestOutcome> {
        task::spawn_blocking(move || self.edit_testcases(&id, Cursor::new(archive)))
            .await
            .map_err(join_failure)?
    }
}
