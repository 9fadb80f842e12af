use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use zip::result::ZipError;

use crate::types::{IngestStage, Side};

/// Main error type for the ingestion pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive could not be opened: {0}")]
    ArchiveOpen(String),

    #[error("Invalid archive structure: {0}")]
    Structure(#[from] StructureViolation),

    #[error("Upload rejected: {0}")]
    UploadFormat(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Question not found: {0}")]
    QuestionNotFound(String),

    #[error("Question directory already exists: {0}")]
    AlreadyMaterialized(String),

    #[error("Materialization exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Metadata commit for question {question_id} failed after {attempts} attempt(s): {reason}")]
    MetadataCommit {
        question_id: String,
        case_count: usize,
        attempts: u32,
        reason: String,
    },

    #[error("Metadata store error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reasons an archive is rejected before anything is written
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureViolation {
    #[error("unexpected entry `{name}`")]
    UnmatchedEntry { name: String },

    #[error("index in `{name}` is not a positive 64-bit number")]
    IndexOutOfRange { name: String },

    #[error("duplicate {side} index {number}")]
    DuplicateIndex { side: Side, number: u64 },

    #[error("index {number} has an {present} file but no {missing} file")]
    UnpairedIndex {
        number: u64,
        present: Side,
        missing: Side,
    },

    #[error("archive contains no testcases")]
    Empty,

    #[error("archive has {count} entries, limit is {limit}")]
    TooManyEntries { count: usize, limit: usize },

    #[error("entry `{name}` exceeds the per-entry limit of {limit} bytes")]
    EntryTooLarge { name: String, limit: u64 },

    #[error("archive exceeds the size limit of {limit} bytes")]
    ArchiveTooLarge { limit: u64 },
}

/// Coarse failure taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UploadFormat,
    ArchiveOpen,
    ArchiveStructure,
    Io,
    MetadataCommit,
    Metadata,
    NotFound,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::UploadFormat => "upload_format",
            ErrorKind::ArchiveOpen => "archive_open",
            ErrorKind::ArchiveStructure => "archive_structure",
            ErrorKind::Io => "io",
            ErrorKind::MetadataCommit => "metadata_commit",
            ErrorKind::Metadata => "metadata",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Io(_) | IngestError::DeadlineExceeded(_) | IngestError::AlreadyMaterialized(_) => {
                ErrorKind::Io
            }
            IngestError::ArchiveOpen(_) => ErrorKind::ArchiveOpen,
            IngestError::Structure(_) => ErrorKind::ArchiveStructure,
            IngestError::UploadFormat(_) | IngestError::InvalidArgument(_) => ErrorKind::UploadFormat,
            IngestError::QuestionNotFound(_) => ErrorKind::NotFound,
            IngestError::MetadataCommit { .. } => ErrorKind::MetadataCommit,
            IngestError::Metadata(_) => ErrorKind::Metadata,
            IngestError::Config(_) => ErrorKind::Config,
        }
    }

    /// Message suitable for callers: no filesystem paths, no OS error text.
    pub fn safe_message(&self) -> String {
        match self {
            IngestError::Io(_) | IngestError::AlreadyMaterialized(_) => {
                "storage failure while writing testcases".to_string()
            }
            IngestError::DeadlineExceeded(_) => "writing testcases took too long".to_string(),
            IngestError::ArchiveOpen(_) => "archive is corrupt or not a zip file".to_string(),
            IngestError::Structure(violation) => violation.to_string(),
            IngestError::UploadFormat(msg) | IngestError::InvalidArgument(msg) => msg.clone(),
            IngestError::QuestionNotFound(id) => format!("no question with id {id}"),
            IngestError::MetadataCommit {
                question_id,
                case_count,
                ..
            } => format!(
                "testcases for question {question_id} were written ({case_count} cases) but the question record could not be updated; run reconcile"
            ),
            IngestError::Metadata(_) => "question store is unavailable".to_string(),
            IngestError::Config(_) => "service is misconfigured".to_string(),
        }
    }

    pub fn structure(&self) -> Option<&StructureViolation> {
        match self {
            IngestError::Structure(violation) => Some(violation),
            _ => None,
        }
    }
}

impl From<ZipError> for IngestError {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => IngestError::Io(e),
            other => IngestError::ArchiveOpen(other.to_string()),
        }
    }
}

/// An error tagged with the pipeline stage it was raised in
#[derive(Error, Debug)]
#[error("ingestion failed while {stage}: {error}")]
pub struct IngestFailure {
    pub stage: IngestStage,
    #[source]
    pub error: IngestError,
}

impl IngestFailure {
    pub fn at(stage: IngestStage, error: impl Into<IngestError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn structure(&self) -> Option<&StructureViolation> {
        self.error.structure()
    }
}

/// Result type alias for pipeline building blocks
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for end-to-end ingestion requests
pub type IngestResult<T> = std::result::Result<T, IngestFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_message_hides_paths() {
        let err = IngestError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/srv/testcases/abc/input/input1.txt: permission denied",
        ));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!err.safe_message().contains("/srv"));

        let err = IngestError::ArchiveOpen("invalid Zip archive: at /tmp/upload-x.zip".into());
        assert_eq!(err.kind(), ErrorKind::ArchiveOpen);
        assert!(!err.safe_message().contains("/tmp"));
    }

    #[test]
    fn test_structure_kind_and_message() {
        let err: IngestError = StructureViolation::DuplicateIndex {
            side: Side::Input,
            number: 3,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ArchiveStructure);
        assert_eq!(err.safe_message(), "duplicate input index 3");
    }

    #[test]
    fn test_deadline_maps_to_io() {
        let err = IngestError::DeadlineExceeded(Duration::from_secs(5));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_zip_io_errors_stay_io() {
        let err: IngestError =
            ZipError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof")).into();
        assert_eq!(err.kind(), ErrorKind::Io);

        let err: IngestError = ZipError::FileNotFound.into();
        assert_eq!(err.kind(), ErrorKind::ArchiveOpen);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ArchiveStructure).unwrap();
        assert_eq!(json, "\"archive_structure\"");
        assert_eq!(ErrorKind::MetadataCommit.to_string(), "metadata_commit");
    }
}
