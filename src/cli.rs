use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{CommitPolicy, IngestConfig, IngestLimits, MaterializeStrategy};

const MIB: u64 = 1024 * 1024;

/// Testcase archive ingestion for an online judge
#[derive(Parser, Debug, Clone)]
#[command(name = "testcase-ingest")]
#[command(version = "0.1.0")]
#[command(about = "Validate testcase archives and materialize them per question", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Root directory of the testcase tree
    #[arg(long = "storage-root", default_value = "testcases", global = true)]
    pub storage_root: PathBuf,

    /// JSON document holding the question records
    #[arg(long = "metadata", default_value = "questions.json", global = true)]
    pub metadata: PathBuf,

    /// Keep a .bak copy of the metadata document on every write
    #[arg(long = "metadata-backup", global = true)]
    pub metadata_backup: bool,

    /// Directory for spooled uploads (default: <storage-root>/.uploads)
    #[arg(long = "upload-dir", global = true)]
    pub upload_dir: Option<PathBuf>,

    /// Directory for per-question lock files (default: <storage-root>/.locks)
    #[arg(long = "lock-dir", global = true)]
    pub lock_dir: Option<PathBuf>,

    /// Also write the JSON report to this file
    #[arg(long = "report", value_name = "PATH", global = true)]
    pub report: Option<PathBuf>,

    /// Maximum compressed archive size in MB
    #[arg(long = "max-archive-mb", default_value = "256", global = true)]
    pub max_archive_mb: u64,

    /// Maximum decompressed size of one entry in MB
    #[arg(long = "max-entry-mb", default_value = "64", global = true)]
    pub max_entry_mb: u64,

    /// Maximum decompressed size of the whole archive in MB
    #[arg(long = "max-total-mb", default_value = "1024", global = true)]
    pub max_total_mb: u64,

    /// Maximum number of archive members
    #[arg(long = "max-entries", default_value = "10000", global = true)]
    pub max_entries: usize,

    /// Materialization deadline in seconds (0 = no deadline)
    #[arg(long = "materialize-timeout", default_value = "300", global = true)]
    pub materialize_timeout: u64,

    /// Drop indices that only have an input or only an output file
    #[arg(long = "lenient-pairs", global = true)]
    pub lenient_pairs: bool,

    /// Write into a staging directory and swap it into place
    #[arg(long = "staged-swap", global = true)]
    pub staged_swap: bool,

    /// Attempts for the metadata commit after a successful write
    #[arg(long = "commit-attempts", default_value = "3", global = true)]
    pub commit_attempts: u32,

    /// Skip fsync of written case files
    #[arg(long = "no-sync", global = true)]
    pub no_sync: bool,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a question from a testcase archive
    Add {
        #[arg(long)]
        name: String,
        /// Time limit in seconds
        #[arg(long)]
        time: u32,
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },
    /// Replace the testcases of an existing question
    EditTestcases {
        id: String,
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },
    /// Change name and time limit of a question
    Edit {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        time: u32,
    },
    Delete {
        id: String,
    },
    Show {
        id: String,
    },
    /// Recount the testcases on disk and fix the stored case count
    Reconcile {
        id: String,
    },
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.storage_root.as_os_str().is_empty() {
            return Err("storage-root cannot be empty".to_string());
        }
        if self.metadata.as_os_str().is_empty() {
            return Err("metadata path cannot be empty".to_string());
        }

        if self.max_archive_mb == 0 || self.max_entry_mb == 0 || self.max_total_mb == 0 {
            return Err("size limits must be greater than 0".to_string());
        }
        if self.max_entry_mb > self.max_total_mb {
            return Err(format!(
                "max-entry-mb ({}) cannot be greater than max-total-mb ({})",
                self.max_entry_mb, self.max_total_mb
            ));
        }
        if self.max_entries == 0 {
            return Err("max-entries must be greater than 0".to_string());
        }
        if self.commit_attempts == 0 {
            return Err("commit-attempts must be at least 1".to_string());
        }

        match &self.command {
            Command::Add { name, time, .. } | Command::Edit { name, time, .. } => {
                if name.trim().is_empty() {
                    return Err("name cannot be empty".to_string());
                }
                if *time == 0 {
                    return Err("time must be greater than 0".to_string());
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Get max archive size in bytes
    pub fn max_archive_bytes(&self) -> u64 {
        self.max_archive_mb.saturating_mul(MIB)
    }

    /// Get max entry size in bytes
    pub fn max_entry_bytes(&self) -> u64 {
        self.max_entry_mb.saturating_mul(MIB)
    }

    /// Get max total size in bytes
    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_mb.saturating_mul(MIB)
    }

    pub fn materialize_timeout(&self) -> Option<Duration> {
        (self.materialize_timeout > 0).then(|| Duration::from_secs(self.materialize_timeout))
    }

    pub fn to_config(&self) -> IngestConfig {
        IngestConfig {
            storage_root: self.storage_root.clone(),
            upload_dir: self.upload_dir.clone(),
            lock_dir: self.lock_dir.clone(),
            limits: IngestLimits {
                max_archive_bytes: self.max_archive_bytes(),
                max_entries: self.max_entries,
                max_entry_bytes: self.max_entry_bytes(),
                max_total_bytes: self.max_total_bytes(),
            },
            materialize_timeout: self.materialize_timeout(),
            lenient_pairs: self.lenient_pairs,
            strategy: if self.staged_swap {
                MaterializeStrategy::StagedSwap
            } else {
                MaterializeStrategy::InPlace
            },
            commit: CommitPolicy {
                attempts: self.commit_attempts,
                ..CommitPolicy::default()
            },
            sync_files: !self.no_sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_args_validation() {
        let args = parse(&["testcase-ingest", "add", "--name", "Two Sum", "--time", "2", "cases.zip"]);
        assert!(args.validate().is_ok());
        assert_eq!(
            args.command,
            Command::Add {
                name: "Two Sum".to_string(),
                time: 2,
                archive: PathBuf::from("cases.zip"),
            }
        );
    }

    #[test]
    fn test_invalid_size_range() {
        let args = parse(&[
            "testcase-ingest",
            "show",
            "q1",
            "--max-entry-mb",
            "2048",
            "--max-total-mb",
            "1024",
        ]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_zero_time_limit() {
        let args = parse(&["testcase-ingest", "edit", "q1", "--name", "A", "--time", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_byte_conversions() {
        let args = parse(&["testcase-ingest", "show", "q1", "--max-archive-mb", "8"]);
        assert_eq!(args.max_archive_bytes(), 8 * 1024 * 1024);
        assert_eq!(args.max_entry_bytes(), 64 * 1024 * 1024);
        assert_eq!(args.max_total_bytes(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_huge_sizes_saturate() {
        let max = u64::MAX.to_string();
        let args = parse(&[
            "testcase-ingest",
            "show",
            "q1",
            "--max-archive-mb",
            &max,
            "--max-entry-mb",
            &max,
            "--max-total-mb",
            &max,
        ]);
        assert!(args.validate().is_ok());
        assert_eq!(args.max_archive_bytes(), u64::MAX);
        assert_eq!(args.max_entry_bytes(), u64::MAX);
        let config = args.to_config();
        assert_eq!(config.limits.max_total_bytes, u64::MAX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lock_dir_and_report_flags() {
        let args = parse(&[
            "testcase-ingest",
            "--storage-root",
            "/srv/cases",
            "--report",
            "out/last.json",
            "show",
            "q1",
        ]);
        assert_eq!(args.report, Some(PathBuf::from("out/last.json")));
        assert_eq!(args.to_config().lock_dir(), PathBuf::from("/srv/cases/.locks"));

        let args = parse(&["testcase-ingest", "show", "q1", "--lock-dir", "/run/ingest"]);
        assert_eq!(args.to_config().lock_dir(), PathBuf::from("/run/ingest"));
    }

    #[test]
    fn test_to_config() {
        let args = parse(&[
            "testcase-ingest",
            "--staged-swap",
            "--lenient-pairs",
            "--materialize-timeout",
            "0",
            "edit-testcases",
            "q1",
            "new.zip",
        ]);
        let config = args.to_config();
        assert_eq!(config.strategy, MaterializeStrategy::StagedSwap);
        assert!(config.lenient_pairs);
        assert_eq!(config.materialize_timeout, None);
        assert_eq!(config.commit.attempts, 3);
        assert!(config.validate().is_ok());
    }
}
