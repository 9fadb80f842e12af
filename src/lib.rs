//! Testcase archive ingestion for an online judge
//!
//! An uploaded zip of `input/inputN.ext` / `output/outputN.ext` files is
//! scanned, checked for a symmetric index set, renumbered densely from 1 and
//! written to `<storage-root>/<question-id>/{input,output}/`:
//! - Whole-archive rejection on any unexpected member, duplicate or unpaired index
//! - Caps on archive size, member count and decompressed bytes
//! - Rollback of partial writes, optional staged swap
//! - Case count committed to the question store only after a complete write
//! - Per-question serialization of concurrent requests

pub mod archive;
pub mod cli;
pub mod error;
pub mod locks;
pub mod materialize;
pub mod metadata;
pub mod normalizer;
pub mod orchestrator;
pub mod report;
pub mod types;
pub mod upload;
pub mod validator;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use archive::{classify_entry_name, ArchiveScanner, CentralDirectory, EntryClass, TestcaseArchive};
pub use error::{ErrorKind, IngestError, IngestFailure, IngestResult, Result, StructureViolation};
pub use materialize::{CaseWriter, FsCaseWriter, Generation, MaterializationEngine};
pub use metadata::{JsonFileStore, MemoryStore, MetadataStore, Question};
pub use normalizer::{CanonicalPlan, IndexNormalizer};
pub use orchestrator::{IngestService, NewQuestion};
pub use report::{FailureReport, IngestReport, QuestionReport};
pub use types::{CaseId, IngestConfig, IngestLimits, IngestMode, IngestOutcome, IngestStage};
pub use types::{MaterializeStrategy, QuestionId, Side, TestcaseIndex};
pub use upload::{check_upload_name, StagedUpload};
pub use validator::{PairValidator, ValidatedSet};
