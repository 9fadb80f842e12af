use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{IngestError, Result};

/// Which half of a testcase pair an archive entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Input,
    Output,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Input, Side::Output];

    /// Directory name, which doubles as the file name stem
    pub fn dir_name(&self) -> &'static str {
        match self {
            Side::Input => "input",
            Side::Output => "output",
        }
    }

    pub fn other(&self) -> Side {
        match self {
            Side::Input => Side::Output,
            Side::Output => Side::Input,
        }
    }

    /// `input7.txt` / `output7.txt`
    pub fn canonical_file_name(&self, case: CaseId) -> String {
        format!("{}{}.txt", self.dir_name(), case.as_usize())
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Original testcase number parsed from an entry name, tagged with its side
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestcaseIndex {
    pub side: Side,
    pub number: u64,
}

impl TestcaseIndex {
    pub fn new(side: Side, number: u64) -> Self {
        Self { side, number }
    }
}

impl std::fmt::Display for TestcaseIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.side, self.number)
    }
}

/// Newtype wrapper for dense canonical case ids (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaseId(pub usize);

impl CaseId {
    pub fn new(value: usize) -> Self {
        Self(value)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "case_{}", self.0)
    }
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier of a question, safe to use as a single path component
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QuestionId(String);

impl QuestionId {
    pub const MAX_LEN: usize = 64;

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IngestError::InvalidArgument("question id is missing".to_string()));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(IngestError::InvalidArgument(format!(
                "question id is longer than {} characters",
                Self::MAX_LEN
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(IngestError::InvalidArgument(
                "question id may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Fresh 24-hex-digit id derived from the clock, the process and a counter
    pub fn generate(seed: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(nanos.to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        hasher.update(counter.to_le_bytes());
        hasher.update(seed.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(digest[..24].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QuestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for QuestionId {
    type Error = IngestError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<QuestionId> for String {
    fn from(id: QuestionId) -> Self {
        id.0
    }
}

/// An archive member that matched one of the testcase patterns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEntry {
    /// Position inside the archive's central directory
    pub archive_index: usize,
    pub name: String,
    pub index: TestcaseIndex,
    /// Uncompressed size as declared by the archive (not yet verified)
    pub declared_size: u64,
}

/// An original index present on both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedPair {
    pub number: u64,
    pub input_entry: usize,
    pub output_entry: usize,
}

/// A validated pair with its dense position assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalCase {
    pub id: CaseId,
    pub original: u64,
    pub input_entry: usize,
    pub output_entry: usize,
}

impl CanonicalCase {
    pub fn entry(&self, side: Side) -> usize {
        match side {
            Side::Input => self.input_entry,
            Side::Output => self.output_entry,
        }
    }
}

/// Whether an ingestion creates a fresh tree or replaces an existing generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    Create,
    ReplaceExisting,
}

impl std::fmt::Display for IngestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestMode::Create => f.write_str("create"),
            IngestMode::ReplaceExisting => f.write_str("replace"),
        }
    }
}

/// How a generation reaches its final location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeStrategy {
    /// Evacuate the old generation, then write directly into place
    #[default]
    InPlace,
    /// Write into a sibling staging directory, then rename it into place
    StagedSwap,
}

/// Per-request state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Received,
    Scanning,
    Validating,
    Normalizing,
    Materializing,
    Committed,
    Failed,
}

impl IngestStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestStage::Committed | IngestStage::Failed)
    }

    /// Legal successor of this stage on the success path
    pub fn next(&self) -> Option<IngestStage> {
        match self {
            IngestStage::Received => Some(IngestStage::Scanning),
            IngestStage::Scanning => Some(IngestStage::Validating),
            IngestStage::Validating => Some(IngestStage::Normalizing),
            IngestStage::Normalizing => Some(IngestStage::Materializing),
            IngestStage::Materializing => Some(IngestStage::Committed),
            IngestStage::Committed | IngestStage::Failed => None,
        }
    }

    pub fn can_transition_to(&self, target: IngestStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == IngestStage::Failed || self.next() == Some(target)
    }
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IngestStage::Received => "receiving",
            IngestStage::Scanning => "scanning",
            IngestStage::Validating => "validating",
            IngestStage::Normalizing => "normalizing",
            IngestStage::Materializing => "materializing",
            IngestStage::Committed => "committed",
            IngestStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Resource caps against oversized and decompression-bomb archives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    /// Size of the uploaded (compressed) archive in bytes
    pub max_archive_bytes: u64,

    /// Number of members in the central directory
    pub max_entries: usize,

    /// Decompressed size of a single member in bytes
    pub max_entry_bytes: u64,

    /// Sum of decompressed sizes in bytes
    pub max_total_bytes: u64,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_archive_bytes: 256 * 1024 * 1024,
            max_entries: 10_000,
            max_entry_bytes: 64 * 1024 * 1024,
            max_total_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Retry policy for the metadata commit that follows a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Ingestion service configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root of the testcase tree (`<root>/<question-id>/{input,output}`)
    pub storage_root: PathBuf,

    /// Where uploads are spooled; defaults to `<storage_root>/.uploads`
    pub upload_dir: Option<PathBuf>,

    /// Per-question lock files; defaults to `<storage_root>/.locks`
    pub lock_dir: Option<PathBuf>,

    pub limits: IngestLimits,

    /// Bound on the materialization step (None = unbounded)
    pub materialize_timeout: Option<Duration>,

    /// Drop indices present on only one side instead of rejecting
    pub lenient_pairs: bool,

    pub strategy: MaterializeStrategy,

    pub commit: CommitPolicy,

    /// fsync every written case file
    pub sync_files: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("testcases"),
            upload_dir: None,
            lock_dir: None,
            limits: IngestLimits::default(),
            materialize_timeout: Some(Duration::from_secs(300)),
            lenient_pairs: false,
            strategy: MaterializeStrategy::InPlace,
            commit: CommitPolicy::default(),
            sync_files: true,
        }
    }
}

impl IngestConfig {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Default::default()
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir
            .clone()
            .unwrap_or_else(|| self.storage_root.join(".uploads"))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir
            .clone()
            .unwrap_or_else(|| self.storage_root.join(".locks"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_root.as_os_str().is_empty() {
            return Err(IngestError::Config("storage root cannot be empty".to_string()));
        }
        let limits = &self.limits;
        if limits.max_archive_bytes == 0
            || limits.max_entries == 0
            || limits.max_entry_bytes == 0
            || limits.max_total_bytes == 0
        {
            return Err(IngestError::Config("size limits must be greater than 0".to_string()));
        }
        if limits.max_entry_bytes > limits.max_total_bytes {
            return Err(IngestError::Config(format!(
                "per-entry limit ({}) cannot exceed the total limit ({})",
                limits.max_entry_bytes, limits.max_total_bytes
            )));
        }
        if self.materialize_timeout == Some(Duration::ZERO) {
            return Err(IngestError::Config(
                "materialize timeout must be positive when set".to_string(),
            ));
        }
        if self.commit.attempts == 0 {
            return Err(IngestError::Config("commit attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Summary of a successful ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub question_id: QuestionId,
    pub mode: IngestMode,
    pub case_count: usize,
    /// Original indices dropped by lenient pairing
    pub dropped_indices: Vec<u64>,
    pub bytes_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_id_rejects_path_components() {
        assert!(QuestionId::parse("64b7f0c2a1e3d4f5a6b7c8d9").is_ok());
        assert!(QuestionId::parse("two-sum_v2").is_ok());
        assert!(QuestionId::parse("").is_err());
        assert!(QuestionId::parse("../etc").is_err());
        assert!(QuestionId::parse("a/b").is_err());
        assert!(QuestionId::parse(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_generated_ids_are_unique_hex() {
        let a = QuestionId::generate("two sum");
        let b = QuestionId::generate("two sum");
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 24);
        assert!(a.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(QuestionId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_stage_transitions() {
        assert!(IngestStage::Received.can_transition_to(IngestStage::Scanning));
        assert!(IngestStage::Scanning.can_transition_to(IngestStage::Failed));
        assert!(!IngestStage::Scanning.can_transition_to(IngestStage::Materializing));
        assert!(!IngestStage::Normalizing.can_transition_to(IngestStage::Committed));
        assert!(IngestStage::Materializing.can_transition_to(IngestStage::Committed));
        assert!(!IngestStage::Committed.can_transition_to(IngestStage::Failed));
        assert!(!IngestStage::Failed.can_transition_to(IngestStage::Failed));
    }

    #[test]
    fn test_canonical_file_names() {
        assert_eq!(Side::Input.canonical_file_name(CaseId::new(3)), "input3.txt");
        assert_eq!(Side::Output.canonical_file_name(CaseId::new(12)), "output12.txt");
        assert_eq!(Side::Input.other(), Side::Output);
    }

    #[test]
    fn test_config_validation() {
        assert!(IngestConfig::default().validate().is_ok());

        let mut config = IngestConfig::default();
        config.limits.max_entry_bytes = config.limits.max_total_bytes + 1;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.commit.attempts = 0;
        assert!(config.validate().is_err());

        let config = IngestConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_dir_defaults_under_storage_root() {
        let config = IngestConfig::new("/srv/testcases");
        assert_eq!(config.upload_dir(), PathBuf::from("/srv/testcases/.uploads"));
        assert_eq!(config.lock_dir(), PathBuf::from("/srv/testcases/.locks"));
    }
}
