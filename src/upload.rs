use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{IngestError, Result, StructureViolation};

/// Reject uploads whose file name does not end in `.zip`
pub fn check_upload_name(file_name: &str) -> Result<()> {
    if file_name.trim().is_empty() {
        return Err(IngestError::UploadFormat("testcases file is missing".to_string()));
    }
    if !file_name.ends_with(".zip") {
        return Err(IngestError::UploadFormat(
            "testcases should be a zip file".to_string(),
        ));
    }
    Ok(())
}

/// An uploaded archive spooled to a temporary file
///
/// The file is deleted when this value is dropped, so every exit path of a
/// request releases it.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    size: u64,
}

impl StagedUpload {
    /// Spool `source` into a new temporary file under `dir`, refusing more than `limit` bytes
    pub fn spool<R: Read>(mut source: R, dir: &Path, limit: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".zip")
            .tempfile_in(dir)?;

        let mut bounded = (&mut source).take(limit.saturating_add(1));
        let size = io::copy(&mut bounded, file.as_file_mut())?;
        if size > limit {
            return Err(StructureViolation::ArchiveTooLarge { limit }.into());
        }
        file.as_file_mut().flush()?;

        debug!(bytes = size, "upload spooled");
        Ok(Self { file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Independent read handle positioned at the start of the archive
    pub fn open(&self) -> Result<File> {
        Ok(self.file.reopen()?)
    }

    /// Delete the spooled file now, logging rather than failing on error
    pub fn discard(self) {
        if let Err(err) = self.file.close() {
            warn!(error = %err, "could not remove spooled upload");
        }
    }
}
