//! Raw central-directory listing.
//!
//! `ZipArchive` indexes members by name, so a name stored twice collapses into
//! one entry. This listing keeps every record so repeated names can be
//! rejected before the archive is opened.

use std::collections::HashSet;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::error::{IngestError, Result};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD_LEN: usize = 22;
const EOCD_ENTRIES: usize = 10;
const EOCD_DIRECTORY_SIZE: usize = 12;
const EOCD_DIRECTORY_OFFSET: usize = 16;
const MAX_COMMENT_LEN: usize = 0xFFFF;

const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_LOCATOR_LEN: usize = 20;
const ZIP64_LOCATOR_EOCD_OFFSET: usize = 8;

const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const ZIP64_EOCD_LEN: usize = 56;
const ZIP64_EOCD_ENTRIES: usize = 32;
const ZIP64_EOCD_DIRECTORY_SIZE: usize = 40;

const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const CENTRAL_HEADER_LEN: usize = 46;
const CENTRAL_NAME_LEN: usize = 28;
const CENTRAL_EXTRA_LEN: usize = 30;
const CENTRAL_COMMENT_LEN: usize = 32;

fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u16::from_le_bytes)
}

fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
}

fn read_u64_le(data: &[u8], offset: usize) -> Option<u64> {
    data.get(offset..offset + 8)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_le_bytes)
}

fn malformed(what: &str) -> IngestError {
    IngestError::ArchiveOpen(format!("malformed central directory: {what}"))
}

fn read_at<R: Read + Seek>(reader: &mut R, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(&mut buf).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => malformed("record runs past the end of the archive"),
        _ => err.into(),
    })?;
    Ok(buf)
}

/// Every member name recorded in the central directory, in listing order
#[derive(Debug, Clone, Default)]
pub struct CentralDirectory {
    names: Vec<Vec<u8>>,
}

impl CentralDirectory {
    /// Locate the end-of-central-directory record (zip64 aware) and walk the
    /// file headers it points at
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        let tail_len = file_len.min((EOCD_LEN + MAX_COMMENT_LEN) as u64) as usize;
        let tail_start = file_len - tail_len as u64;
        let tail = read_at(reader, tail_start, tail_len)?;

        let eocd_pos = (0..=tail.len().saturating_sub(EOCD_LEN))
            .rev()
            .find(|&pos| {
                pos + EOCD_LEN <= tail.len() && read_u32_le(&tail, pos) == Some(EOCD_SIGNATURE)
            })
            .ok_or_else(|| malformed("no end record"))?;
        let eocd_offset = tail_start + eocd_pos as u64;

        let entries = read_u16_le(&tail, eocd_pos + EOCD_ENTRIES).ok_or_else(|| malformed("short end record"))?;
        let size = read_u32_le(&tail, eocd_pos + EOCD_DIRECTORY_SIZE).ok_or_else(|| malformed("short end record"))?;
        let offset = read_u32_le(&tail, eocd_pos + EOCD_DIRECTORY_OFFSET).ok_or_else(|| malformed("short end record"))?;

        let (entries, size, directory_end) =
            if entries == u16::MAX || size == u32::MAX || offset == u32::MAX {
                Self::zip64_end(reader, eocd_offset)?
            } else {
                (u64::from(entries), u64::from(size), eocd_offset)
            };

        let start = directory_end
            .checked_sub(size)
            .ok_or_else(|| malformed("directory larger than archive"))?;
        let size = usize::try_from(size).map_err(|_| malformed("directory too large"))?;
        let directory = read_at(reader, start, size)?;

        let mut names = Vec::new();
        let mut pos = 0usize;
        while pos < directory.len() {
            if read_u32_le(&directory, pos) != Some(CENTRAL_HEADER_SIGNATURE) {
                return Err(malformed("bad file header signature"));
            }
            let name_len = read_u16_le(&directory, pos + CENTRAL_NAME_LEN).ok_or_else(|| malformed("short file header"))?;
            let extra_len = read_u16_le(&directory, pos + CENTRAL_EXTRA_LEN).ok_or_else(|| malformed("short file header"))?;
            let comment_len = read_u16_le(&directory, pos + CENTRAL_COMMENT_LEN).ok_or_else(|| malformed("short file header"))?;

            let name_start = pos + CENTRAL_HEADER_LEN;
            let name_end = name_start + usize::from(name_len);
            let name = directory
                .get(name_start..name_end)
                .ok_or_else(|| malformed("truncated file name"))?;
            names.push(name.to_vec());
            pos = name_end + usize::from(extra_len) + usize::from(comment_len);
        }

        if names.len() as u64 != entries {
            return Err(IngestError::ArchiveOpen(format!(
                "central directory declares {entries} entries but lists {}",
                names.len()
            )));
        }
        Ok(Self { names })
    }

    /// (entries, directory size, offset the directory ends at) from the zip64 end record
    fn zip64_end<R: Read + Seek>(reader: &mut R, eocd_offset: u64) -> Result<(u64, u64, u64)> {
        let locator_offset = eocd_offset
            .checked_sub(ZIP64_LOCATOR_LEN as u64)
            .ok_or_else(|| malformed("missing zip64 locator"))?;
        let locator = read_at(reader, locator_offset, ZIP64_LOCATOR_LEN)?;
        if read_u32_le(&locator, 0) != Some(ZIP64_LOCATOR_SIGNATURE) {
            return Err(malformed("missing zip64 locator"));
        }
        let record_offset = read_u64_le(&locator, ZIP64_LOCATOR_EOCD_OFFSET).ok_or_else(|| malformed("short zip64 locator"))?;
        if record_offset > locator_offset {
            return Err(malformed("zip64 end record past its locator"));
        }

        let record = read_at(reader, record_offset, ZIP64_EOCD_LEN)?;
        if read_u32_le(&record, 0) != Some(ZIP64_EOCD_SIGNATURE) {
            return Err(malformed("bad zip64 end record"));
        }
        let entries = read_u64_le(&record, ZIP64_EOCD_ENTRIES).ok_or_else(|| malformed("short zip64 end record"))?;
        let size = read_u64_le(&record, ZIP64_EOCD_DIRECTORY_SIZE).ok_or_else(|| malformed("short zip64 end record"))?;
        Ok((entries, size, record_offset))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names recorded more than once, each reported once, in listing order
    pub fn repeated_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut repeated = Vec::new();
        for name in &self.names {
            if !seen.insert(name.as_slice()) && reported.insert(name.as_slice()) {
                repeated.push(String::from_utf8_lossy(name).into_owned());
            }
        }
        repeated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{paired_entries, paired_zip, repeat_member_name, zip_bytes};
    use std::io::Cursor;

    #[test]
    fn test_lists_every_record() {
        let listing = CentralDirectory::read(&mut Cursor::new(paired_zip(&[1, 2, 3]))).unwrap();
        assert_eq!(listing.len(), 8);
        assert!(listing.repeated_names().is_empty());
    }

    #[test]
    fn test_repeated_name_survives_listing() {
        let bytes = repeat_member_name(
            zip_bytes(&paired_entries(&[1, 2])),
            "input/input2.txt",
            "input/input1.txt",
        );
        let listing = CentralDirectory::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(listing.len(), 6);
        assert_eq!(listing.repeated_names(), vec!["input/input1.txt"]);
    }

    #[test]
    fn test_archive_comment_is_skipped() {
        let mut bytes = paired_zip(&[4]);
        // Append a comment and patch its length into the end record
        let eocd = bytes.len() - EOCD_LEN;
        let comment = b"uploaded by judge";
        bytes[eocd + 20..eocd + 22].copy_from_slice(&(comment.len() as u16).to_le_bytes());
        bytes.extend_from_slice(comment);
        assert_eq!(CentralDirectory::read(&mut Cursor::new(bytes)).unwrap().len(), 4);
    }

    #[test]
    fn test_garbage_and_truncation_rejected() {
        let err = CentralDirectory::read(&mut Cursor::new(b"not a zip".to_vec())).unwrap_err();
        assert!(matches!(err, IngestError::ArchiveOpen(_)));

        let bytes = paired_zip(&[1]);
        let truncated = bytes[..bytes.len() - 10].to_vec();
        assert!(matches!(
            CentralDirectory::read(&mut Cursor::new(truncated)),
            Err(IngestError::ArchiveOpen(_))
        ));

        let mut miscounted = paired_zip(&[1]);
        let eocd = miscounted.len() - EOCD_LEN;
        miscounted[eocd + EOCD_ENTRIES..eocd + EOCD_ENTRIES + 2].copy_from_slice(&9u16.to_le_bytes());
        assert!(matches!(
            CentralDirectory::read(&mut Cursor::new(miscounted)),
            Err(IngestError::ArchiveOpen(_))
        ));
    }
}
