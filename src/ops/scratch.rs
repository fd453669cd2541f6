//! Scratch payload on disk, created on first use.

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::debug;

use super::kernels::{scratch_payload, SCRATCH_SIZE};
use crate::error::Result;

const PAYLOAD_NAME: &str = "test-data.txt";
const STREAM_OUTPUT_PREFIX: &str = "stream-output-";

/// Location of the scratch payload and stream output files.
///
/// The payload is written to a temporary name and renamed into place, so a
/// concurrent reader never observes a partially written file.
#[derive(Debug, Clone)]
pub struct ScratchFile {
    dir: PathBuf,
}

impl ScratchFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn payload_path(&self) -> PathBuf {
        self.dir.join(PAYLOAD_NAME)
    }

    /// A fresh output file for one stream-process request.
    ///
    /// The file is deleted when the returned `TempPath` drops.
    pub(crate) fn stream_output(&self) -> Result<(std::fs::File, TempPath)> {
        let file = tempfile::Builder::new()
            .prefix(STREAM_OUTPUT_PREFIX)
            .suffix(".txt")
            .tempfile_in(&self.dir)?;
        Ok(file.into_parts())
    }

    fn staging_path(&self) -> PathBuf {
        self.dir
            .join(format!(".{PAYLOAD_NAME}.{:016x}", rand::random::<u64>()))
    }

    /// Create the payload if it is missing, blocking the calling thread.
    pub(crate) fn ensure_blocking(&self) -> Result<PathBuf> {
        let path = self.payload_path();
        if std::fs::metadata(&path).is_ok_and(|m| m.len() == SCRATCH_SIZE as u64) {
            return Ok(path);
        }
        std::fs::create_dir_all(&self.dir)?;
        let staging = self.staging_path();
        std::fs::write(&staging, scratch_payload())?;
        std::fs::rename(&staging, &path)?;
        debug!(path = %path.display(), "created scratch payload");
        Ok(path)
    }

    /// Create the payload if it is missing, suspending on each file operation.
    pub(crate) async fn ensure(&self) -> Result<PathBuf> {
        let path = self.payload_path();
        if tokio::fs::metadata(&path)
            .await
            .is_ok_and(|m| m.len() == SCRATCH_SIZE as u64)
        {
            return Ok(path);
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let staging = self.staging_path();
        tokio::fs::write(&staging, scratch_payload()).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!(path = %path.display(), "created scratch payload");
        Ok(path)
    }
}
