//! Structured results printed by the binary
//!
//! Failures carry only the error kind, the stage and a safe message, never
//! paths or OS error text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{ErrorKind, IngestError, IngestFailure, Result};
use crate::metadata::Question;
use crate::types::{IngestOutcome, IngestStage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub success: bool,
    pub kind: ErrorKind,
    /// Pipeline stage, for failures raised during ingestion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<IngestStage>,
    pub message: String,
}

impl From<&IngestFailure> for FailureReport {
    fn from(failure: &IngestFailure) -> Self {
        Self {
            success: false,
            kind: failure.kind(),
            stage: Some(failure.stage),
            message: failure.error.safe_message(),
        }
    }
}

impl From<&IngestError> for FailureReport {
    fn from(error: &IngestError) -> Self {
        Self {
            success: false,
            kind: error.kind(),
            stage: None,
            message: error.safe_message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub success: bool,
    pub generated_at: DateTime<Utc>,
    pub outcome: IngestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<Question>,
}

impl IngestReport {
    pub fn new(outcome: IngestOutcome, question: Option<Question>) -> Self {
        Self {
            success: true,
            generated_at: Utc::now(),
            outcome,
            question,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<Question>,
}

impl QuestionReport {
    pub fn new(question: Option<Question>) -> Self {
        Self {
            success: true,
            question,
        }
    }
}

pub fn to_json<T: Serialize>(report: &T) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(|err| IngestError::Config(err.to_string()))
}

/// Write an already rendered report, creating parent directories
pub fn write_report_file(path: &Path, json: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json)?;
    Ok(())
}
