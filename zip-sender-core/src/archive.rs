//! Builds one zip archive from the contents of a staging directory.
//!
//! Entries keep their path relative to the source directory. A file that cannot be added is
//! logged and skipped; a failure of the archive itself removes whatever was written so no
//! corrupt part is left in the output folder.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Datelike, Local, Timelike};
use indicatif::ProgressBar;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::ArchiveError;
use crate::progress::Progress;

/// Entries at or above this size need zip64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// How entries are written into the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// No compression, fastest.
    Stored,
    /// Deflate at the given level (1..=9).
    Deflated { level: u8 },
}

impl CompressionMode {
    /// Maps the configured `compression_level`: 0 stores, anything above deflates.
    pub fn from_level(level: u32) -> Self {
        match level {
            0 => CompressionMode::Stored,
            n => CompressionMode::Deflated {
                level: n.clamp(1, 9) as u8,
            },
        }
    }

    fn options(self) -> SimpleFileOptions {
        match self {
            CompressionMode::Stored => {
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
            }
            CompressionMode::Deflated { level } => SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(level.into())),
        }
    }
}

/// Deterministic part name: `{base}_parte_{index:02}.zip`, index is 1-based.
pub fn archive_name(base: &str, index: usize) -> String {
    format!("{base}_parte_{index:02}.zip")
}

/// Everything needed to build one part.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub source_dir: PathBuf,
    pub archive_name: String,
    /// Sum of source file sizes, only used as the progress total.
    pub total_size: u64,
    pub dest_dir: PathBuf,
    pub compression: CompressionMode,
}

impl ArchiveJob {
    pub fn dest_path(&self) -> PathBuf {
        self.dest_dir.join(&self.archive_name)
    }
}

/// Counts of what went into an archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub written: usize,
    pub skipped: usize,
}

/// A part that was written, with what went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedPart {
    pub path: PathBuf,
    pub stats: ArchiveStats,
}

/// Builds the archive described by `job`.
///
/// Files skipped while writing still yield `Ok`; callers check `stats.skipped`.
pub fn build_archive(job: &ArchiveJob, progress: &Progress) -> Result<ArchivedPart, ArchiveError> {
    if !job.source_dir.is_dir() {
        error!(source = %job.source_dir.display(), "Archive source directory is missing");
        return Err(ArchiveError::MissingSource(job.source_dir.clone()));
    }

    let dest = job.dest_path();
    let bar = progress.bytes(format!("Compressing {}", job.archive_name), job.total_size);
    let entries = collect_entries(&job.source_dir);

    match write_entries(&dest, &entries, job.compression, &bar) {
        Ok(stats) => {
            bar.finish_with_message(format!("{} done", job.archive_name));
            info!(
                archive = %job.archive_name,
                written = stats.written,
                skipped = stats.skipped,
                "Archive created"
            );
            Ok(ArchivedPart { path: dest, stats })
        }
        Err(e) => {
            bar.abandon_with_message(format!("{} failed", job.archive_name));
            error!(source = %job.source_dir.display(), error = %e, "Failed to archive directory");
            remove_partial(&dest);
            Err(e)
        }
    }
}

/// Walks `source_dir` and returns `(absolute path, archive name)` pairs for every regular file.
/// Walk errors are logged and the offending entry skipped.
fn collect_entries(source_dir: &Path) -> Vec<(PathBuf, String)> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(source_dir).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                error!(source = %source_dir.display(), error = %e, "Failed to read entry while archiving");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source_dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push((entry.path().to_path_buf(), name));
    }
    entries
}

fn write_entries(
    dest: &Path,
    entries: &[(PathBuf, String)],
    compression: CompressionMode,
    bar: &ProgressBar,
) -> Result<ArchiveStats, ArchiveError> {
    let file = File::create(dest).map_err(|source| ArchiveError::Create {
        path: dest.to_path_buf(),
        source,
    })?;
    let mut zip = ZipWriter::new(file);
    let base_options = compression.options();
    let mut stats = ArchiveStats::default();

    for (path, name) in entries {
        match add_file(&mut zip, path, name, base_options, bar) {
            Ok(()) => {
                debug!(entry = %name, "Added file to archive");
                stats.written += 1;
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "Failed to add file to archive; skipping");
                stats.skipped += 1;
            }
        }
    }

    zip.finish().map_err(|source| ArchiveError::Finish {
        path: dest.to_path_buf(),
        source,
    })?;
    Ok(stats)
}

fn add_file(
    zip: &mut ZipWriter<File>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
    bar: &ProgressBar,
) -> io::Result<()> {
    let source = File::open(path)?;
    let metadata = source.metadata()?;
    let mut options = options
        .large_file(metadata.len() >= ZIP64_THRESHOLD)
        .unix_permissions(file_mode(&metadata));
    if let Some(modified) = metadata.modified().ok().and_then(zip_time) {
        options = options.last_modified_time(modified);
    }

    zip.start_file(name, options).map_err(io::Error::other)?;
    let mut reader = bar.wrap_read(source);
    if let Err(e) = io::copy(&mut reader, zip) {
        if let Err(abort) = zip.abort_file() {
            warn!(entry = %name, error = %abort, "Could not drop partially written entry");
        }
        return Err(e);
    }
    Ok(())
}

/// Local wall-clock time as stored in zip headers. `None` before 1980 or past 2107.
fn zip_time(time: SystemTime) -> Option<DateTime> {
    let local = chrono::DateTime::<Local>::from(time);
    DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

fn remove_partial(dest: &Path) {
    if dest.is_file() {
        match std::fs::remove_file(dest) {
            Ok(()) => warn!(archive = %dest.display(), "Removed partially written archive"),
            Err(e) => error!(archive = %dest.display(), error = %e, "Failed to remove partial archive"),
        }
    }
}
