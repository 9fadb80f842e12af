use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::{IngestError, Result, StructureViolation};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Bounds applied to every copied entry
#[derive(Debug, Clone, Copy)]
pub struct CopyBudget {
    /// Maximum decompressed bytes accepted from one entry
    pub max_bytes: u64,
    pub deadline: Option<Instant>,
    /// Original timeout, reported when the deadline passes
    pub timeout: Option<Duration>,
}

impl CopyBudget {
    pub fn new(max_bytes: u64, timeout: Option<Duration>) -> Self {
        Self {
            max_bytes,
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
        }
    }

    pub fn check_deadline(&self) -> Result<()> {
        match (self.deadline, self.timeout) {
            (Some(deadline), Some(timeout)) if Instant::now() >= deadline => {
                Err(IngestError::DeadlineExceeded(timeout))
            }
            _ => Ok(()),
        }
    }
}

/// Sink for canonical case files
///
/// The engine owns directory layout and rollback; implementations only put
/// one entry's bytes at `target`.
pub trait CaseWriter: Send + Sync {
    fn write_case(
        &self,
        target: &Path,
        source: &mut dyn Read,
        label: &str,
        budget: &CopyBudget,
    ) -> Result<u64>;
}

/// Writes case files to the local filesystem
#[derive(Debug, Clone, Copy)]
pub struct FsCaseWriter {
    sync: bool,
}

impl FsCaseWriter {
    pub fn new(sync: bool) -> Self {
        Self { sync }
    }
}

impl Default for FsCaseWriter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CaseWriter for FsCaseWriter {
    fn write_case(
        &self,
        target: &Path,
        source: &mut dyn Read,
        label: &str,
        budget: &CopyBudget,
    ) -> Result<u64> {
        let file = OpenOptions::new().write(true).create_new(true).open(target)?;
        let mut sink = BufWriter::new(file);
        let written = copy_bounded(source, &mut sink, label, budget)?;
        let file: File = sink.into_inner().map_err(|e| e.into_error())?;
        if self.sync {
            file.sync_all()?;
        }
        Ok(written)
    }
}

/// Copy `source` into `sink`, enforcing the byte cap and the deadline
///
/// The cap is checked against bytes actually decompressed, since declared
/// sizes in the archive are not trusted.
pub fn copy_bounded(
    source: &mut dyn Read,
    sink: &mut dyn Write,
    label: &str,
    budget: &CopyBudget,
) -> Result<u64> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        budget.check_deadline()?;
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        total += read as u64;
        if total > budget.max_bytes {
            return Err(StructureViolation::EntryTooLarge {
                name: label.to_string(),
                limit: budget.max_bytes,
            }
            .into());
        }
        sink.write_all(&buffer[..read])?;
    }

    sink.flush()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_copy_within_budget() {
        let mut source = Cursor::new(vec![7u8; 200_000]);
        let mut sink = Vec::new();
        let budget = CopyBudget::new(200_000, None);
        let copied = copy_bounded(&mut source, &mut sink, "input/input1.txt", &budget).unwrap();
        assert_eq!(copied, 200_000);
        assert_eq!(sink.len(), 200_000);
    }

    #[test]
    fn test_copy_rejects_understated_size() {
        let mut source = Cursor::new(vec![7u8; 2048]);
        let mut sink = Vec::new();
        let budget = CopyBudget::new(1024, None);
        let err = copy_bounded(&mut source, &mut sink, "input/input1.txt", &budget).unwrap_err();
        assert_eq!(
            err.structure(),
            Some(&StructureViolation::EntryTooLarge {
                name: "input/input1.txt".to_string(),
                limit: 1024
            })
        );
    }

    #[test]
    fn test_expired_deadline() {
        let budget = CopyBudget {
            max_bytes: 10,
            deadline: Some(Instant::now()),
            timeout: Some(Duration::from_millis(1)),
        };
        let mut source = Cursor::new(vec![1u8; 4]);
        let mut sink = Vec::new();
        let err = copy_bounded(&mut source, &mut sink, "x", &budget).unwrap_err();
        assert!(matches!(err, IngestError::DeadlineExceeded(_)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_fs_writer_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("input1.txt");
        let writer = FsCaseWriter::new(false);
        let budget = CopyBudget::new(1024, None);

        let written = writer
            .write_case(&target, &mut Cursor::new(b"1 2\n".to_vec()), "a", &budget)
            .unwrap();
        assert_eq!(written, 4);
        assert_eq!(std::fs::read(&target).unwrap(), b"1 2\n");

        let err = writer
            .write_case(&target, &mut Cursor::new(b"3 4\n".to_vec()), "b", &budget)
            .unwrap_err();
        assert!(matches!(err, IngestError::Io(_)));
    }
}
