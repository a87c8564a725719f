//! Temporary per-part directories that mirror a bin's relative file layout.

use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::packer::Bin;

/// A staging directory owned by the pipeline for the lifetime of one part.
///
/// Dropping an area that was not [`finish`](StagingArea::finish)ed removes it best-effort;
/// failures there are logged and never escalated.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
    released: bool,
    failed: usize,
}

impl StagingArea {
    /// Creates (or empties) `path` and copies every file of `bin` into it, keeping each file's
    /// path relative to `source_root`. A file that cannot be copied is logged, skipped and
    /// counted in [`failed`](StagingArea::failed).
    pub fn prepare(
        path: PathBuf,
        source_root: &Path,
        bin: &Bin,
        bar: &ProgressBar,
    ) -> Result<Self, PipelineError> {
        if path.exists() {
            warn!(staging = %path.display(), "Clearing leftover staging directory");
            std::fs::remove_dir_all(&path).map_err(|e| PipelineError::io(&path, e))?;
        }
        std::fs::create_dir_all(&path).map_err(|e| PipelineError::io(&path, e))?;
        let mut area = StagingArea {
            path,
            released: false,
            failed: 0,
        };

        for entry in bin.entries() {
            if let Err(e) = area.copy_in(source_root, &entry.path) {
                error!(file = %entry.path.display(), error = %e, "Failed to stage file");
                area.failed += 1;
            }
            bar.inc(1);
        }
        Ok(area)
    }

    fn copy_in(&self, source_root: &Path, file: &Path) -> std::io::Result<()> {
        let relative = file
            .strip_prefix(source_root)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let dest = self.path.join(relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(file, &dest)?;
        // fs::copy keeps permissions but not the modification time.
        let modified = std::fs::metadata(file)?.modified()?;
        std::fs::OpenOptions::new()
            .write(true)
            .open(&dest)?
            .set_modified(modified)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Files of the bin that could not be copied in.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Removes the directory now, after its archive was written.
    pub fn finish(mut self) {
        self.released = true;
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => info!(staging = %self.path.display(), "Removed staging directory"),
            Err(e) => {
                error!(staging = %self.path.display(), error = %e, "Failed to remove staging directory")
            }
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if self.released || !self.path.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(staging = %self.path.display(), error = %e, "Best-effort staging cleanup failed");
        }
    }
}
