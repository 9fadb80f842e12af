use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::{debug, trace};
use zip::ZipArchive;

use crate::archive::directory::CentralDirectory;
use crate::archive::patterns::{classify_entry_name, EntryClass};
use crate::error::{IngestError, Result, StructureViolation};
use crate::types::{ClassifiedEntry, IngestLimits};

/// An opened archive whose members all matched a testcase pattern
pub struct TestcaseArchive<R: Read + Seek> {
    archive: ZipArchive<R>,
    entries: Vec<ClassifiedEntry>,
    total_declared_bytes: u64,
}

impl<R: Read + Seek> TestcaseArchive<R> {
    /// Classified entries in archive order
    pub fn entries(&self) -> &[ClassifiedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_declared_bytes(&self) -> u64 {
        self.total_declared_bytes
    }

    /// Decompressing reader for the entry at `position` in [`Self::entries`]
    pub fn open_entry(&mut self, position: usize) -> Result<impl Read + '_> {
        let archive_index = self
            .entries
            .get(position)
            .ok_or_else(|| {
                IngestError::ArchiveOpen(format!("entry position {position} is out of range"))
            })?
            .archive_index;
        Ok(self.archive.by_index(archive_index)?)
    }
}

/// Opens archives and classifies every member, rejecting the whole archive on
/// the first member that is not a testcase file
#[derive(Debug, Clone)]
pub struct ArchiveScanner {
    limits: IngestLimits,
}

impl ArchiveScanner {
    pub fn new(limits: IngestLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &IngestLimits {
        &self.limits
    }

    /// Open an archive on disk
    pub fn open_path<P: AsRef<Path>>(&self, path: P) -> Result<TestcaseArchive<BufReader<File>>> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        if size > self.limits.max_archive_bytes {
            return Err(StructureViolation::ArchiveTooLarge {
                limit: self.limits.max_archive_bytes,
            }
            .into());
        }
        self.scan(BufReader::new(file))
    }

    /// Open an archive from any seekable reader and classify its members
    pub fn scan<R: Read + Seek>(&self, mut reader: R) -> Result<TestcaseArchive<R>> {
        let listing = CentralDirectory::read(&mut reader)?;
        if listing.len() > self.limits.max_entries {
            return Err(StructureViolation::TooManyEntries {
                count: listing.len(),
                limit: self.limits.max_entries,
            }
            .into());
        }
        // A repeated testcase name would otherwise collapse into one member
        for name in listing.repeated_names() {
            if let EntryClass::Testcase(index) = classify_entry_name(&name) {
                return Err(StructureViolation::DuplicateIndex {
                    side: index.side,
                    number: index.number,
                }
                .into());
            }
        }

        let mut archive =
            ZipArchive::new(reader).map_err(|e| IngestError::ArchiveOpen(e.to_string()))?;
        let count = archive.len();

        let mut entries = Vec::with_capacity(count);
        let mut total_declared_bytes: u64 = 0;

        for archive_index in 0..count {
            let (name, declared_size) = {
                let file = archive
                    .by_index(archive_index)
                    .map_err(|e| IngestError::ArchiveOpen(e.to_string()))?;
                (file.name().to_string(), file.size())
            };

            let index = match classify_entry_name(&name) {
                EntryClass::Directory => {
                    trace!(entry = %name, "skipping directory marker");
                    continue;
                }
                EntryClass::Testcase(index) => index,
                EntryClass::IndexOutOfRange => {
                    return Err(StructureViolation::IndexOutOfRange { name }.into());
                }
                EntryClass::Unmatched => {
                    return Err(StructureViolation::UnmatchedEntry { name }.into());
                }
            };

            if declared_size > self.limits.max_entry_bytes {
                return Err(StructureViolation::EntryTooLarge {
                    name,
                    limit: self.limits.max_entry_bytes,
                }
                .into());
            }
            total_declared_bytes = total_declared_bytes.saturating_add(declared_size);
            if total_declared_bytes > self.limits.max_total_bytes {
                return Err(StructureViolation::ArchiveTooLarge {
                    limit: self.limits.max_total_bytes,
                }
                .into());
            }

            entries.push(ClassifiedEntry {
                archive_index,
                name,
                index,
                declared_size,
            });
        }

        debug!(
            entries = entries.len(),
            declared_bytes = total_declared_bytes,
            "archive scanned"
        );

        Ok(TestcaseArchive {
            archive,
            entries,
            total_declared_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{paired_entries, paired_zip, repeat_member_name, zip_bytes};
    use crate::types::{Side, TestcaseIndex};
    use std::io::Cursor;

    fn scanner() -> ArchiveScanner {
        ArchiveScanner::new(IngestLimits::default())
    }

    #[test]
    fn test_scan_classifies_entries_and_skips_markers() {
        let archive = scanner().scan(Cursor::new(paired_zip(&[2, 5]))).unwrap();
        let indices: Vec<TestcaseIndex> = archive.entries().iter().map(|e| e.index).collect();
        assert_eq!(
            indices,
            vec![
                TestcaseIndex::new(Side::Input, 2),
                TestcaseIndex::new(Side::Output, 2),
                TestcaseIndex::new(Side::Input, 5),
                TestcaseIndex::new(Side::Output, 5),
            ]
        );
        assert_eq!(archive.total_declared_bytes(), 5 + 6 + 5 + 6);
    }

    #[test]
    fn test_single_stray_file_rejects_archive() {
        let mut entries = paired_entries(&[1, 2, 3]);
        entries.push(("notes.txt".to_string(), b"hello".to_vec()));
        let err = scanner().scan(Cursor::new(zip_bytes(&entries))).err().unwrap();
        assert_eq!(
            err.structure(),
            Some(&StructureViolation::UnmatchedEntry {
                name: "notes.txt".to_string()
            })
        );
    }

    #[test]
    fn test_unexpected_directory_rejected() {
        let mut entries = paired_entries(&[1]);
        entries.push(("input/extra/".to_string(), Vec::new()));
        let err = scanner().scan(Cursor::new(zip_bytes(&entries))).err().unwrap();
        assert!(matches!(
            err.structure(),
            Some(StructureViolation::UnmatchedEntry { .. })
        ));
    }

    #[test]
    fn test_repeated_member_name_is_duplicate_index() {
        let bytes = repeat_member_name(
            zip_bytes(&paired_entries(&[1, 2])),
            "output/output2.txt",
            "output/output1.txt",
        );
        let err = scanner().scan(Cursor::new(bytes)).err().unwrap();
        assert_eq!(
            err.structure(),
            Some(&StructureViolation::DuplicateIndex {
                side: Side::Output,
                number: 1
            })
        );
    }

    #[test]
    fn test_repeated_directory_marker_is_ignored() {
        let mut entries = paired_entries(&[1]);
        entries.push(("extra/".to_string(), Vec::new()));
        let bytes = repeat_member_name(zip_bytes(&entries), "extra/", "input/");
        let archive = scanner().scan(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn test_zero_and_oversized_indices_rejected() {
        for name in ["input/input0.txt", "input/input000.txt", "input/input18446744073709551616.txt"] {
            let entries = vec![(name, b"in".to_vec()), ("output/output1.txt", b"out".to_vec())];
            let err = scanner().scan(Cursor::new(zip_bytes(&entries))).err().unwrap();
            assert_eq!(
                err.structure(),
                Some(&StructureViolation::IndexOutOfRange {
                    name: name.to_string()
                }),
                "{name}"
            );
        }
    }

    #[test]
    fn test_garbage_is_open_error() {
        let err = scanner()
            .scan(Cursor::new(b"definitely not a zip archive".to_vec()))
            .err()
            .unwrap();
        assert!(matches!(err, IngestError::ArchiveOpen(_)));
    }

    #[test]
    fn test_entry_count_limit() {
        let limits = IngestLimits {
            max_entries: 3,
            ..Default::default()
        };
        let err = ArchiveScanner::new(limits)
            .scan(Cursor::new(paired_zip(&[1, 2])))
            .err()
            .unwrap();
        assert_eq!(
            err.structure(),
            Some(&StructureViolation::TooManyEntries { count: 6, limit: 3 })
        );
    }

    #[test]
    fn test_declared_size_limits() {
        let big = vec![b'x'; 4096];
        let entries = vec![
            ("input/input1.txt", big.clone()),
            ("output/output1.txt", b"ok".to_vec()),
        ];
        let limits = IngestLimits {
            max_entry_bytes: 1024,
            ..Default::default()
        };
        let err = ArchiveScanner::new(limits)
            .scan(Cursor::new(zip_bytes(&entries)))
            .err()
            .unwrap();
        assert!(matches!(
            err.structure(),
            Some(StructureViolation::EntryTooLarge { limit: 1024, .. })
        ));

        let limits = IngestLimits {
            max_entry_bytes: 4096,
            max_total_bytes: 4097,
            ..Default::default()
        };
        let err = ArchiveScanner::new(limits)
            .scan(Cursor::new(zip_bytes(&entries)))
            .err()
            .unwrap();
        assert_eq!(
            err.structure(),
            Some(&StructureViolation::ArchiveTooLarge { limit: 4097 })
        );
    }

    #[test]
    fn test_open_entry_reads_bytes() {
        let mut archive = scanner().scan(Cursor::new(paired_zip(&[9]))).unwrap();
        let mut content = String::new();
        archive.open_entry(1).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "out 9\n");
        assert!(archive.open_entry(7).is_err());
    }
}
