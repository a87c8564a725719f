//! Folder pipeline: turns every immediate subdirectory of the input root into numbered zip
//! parts under a same-named folder of the output root.
//!
//! Per subdirectory:
//!   1. create `output/<name>` and copy the cover image, if any
//!   2. inventory every file (recursive) and pack them into size-bounded bins
//!   3. stage each bin into `output/<name>/temp_folder_<i>`
//!   4. archive all staged bins on the blocking pool, at most `threads` at a time
//!   5. remove the source subdirectory once every part was written with every file in it
//!
//! A failure in one subdirectory is logged and recorded in the report; the next one is still
//! processed and the failing source is left untouched.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::archive::{archive_name, build_archive, ArchiveJob, ArchivedPart, CompressionMode};
use crate::error::{ArchiveError, PipelineError};
use crate::packer::{pack, FileEntry};
use crate::progress::Progress;
use crate::staging::StagingArea;
use crate::COVER_CANDIDATES;

/// Settings for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Byte budget per part.
    pub max_bin_size: u64,
    /// Width of the archive worker pool; values below 1 are treated as 1.
    pub threads: usize,
    pub compression: CompressionMode,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub folders: Vec<FolderReport>,
}

impl PipelineReport {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Every part written during the run, across all folders.
    pub fn archived_parts(&self) -> Vec<&Path> {
        self.folders
            .iter()
            .filter_map(|f| match &f.outcome {
                FolderOutcome::Archived { parts, .. } => Some(parts),
                _ => None,
            })
            .flatten()
            .map(PathBuf::as_path)
            .collect()
    }
}

#[derive(Debug)]
pub struct FolderReport {
    pub name: String,
    pub cover: Option<PathBuf>,
    pub outcome: FolderOutcome,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FolderOutcome {
    Archived {
        /// Written parts, sorted by name.
        parts: Vec<PathBuf>,
        /// Names of parts whose archive could not be written.
        failed_parts: Vec<String>,
        /// Files that could not be staged or added to their part.
        skipped_files: usize,
        source_removed: bool,
    },
    /// Nothing to archive; the source folder was left in place.
    Empty,
    Failed(String),
}

/// Processes every immediate subdirectory of `config.input_dir`.
///
/// Only fails when the input root itself is unusable; per-folder errors end up in the report.
pub async fn process_input(
    config: &PipelineConfig,
    progress: &Progress,
) -> Result<PipelineReport, PipelineError> {
    if !config.input_dir.is_dir() {
        error!(input = %config.input_dir.display(), "Input path is not a directory");
        return Err(PipelineError::NotADirectory(config.input_dir.clone()));
    }
    let input_dir = config
        .input_dir
        .canonicalize()
        .map_err(|e| PipelineError::io(&config.input_dir, e))?;
    std::fs::create_dir_all(&config.output_dir)
        .map_err(|e| PipelineError::io(&config.output_dir, e))?;

    match config.compression {
        CompressionMode::Stored => info!("Archiving without compression"),
        CompressionMode::Deflated { level } => info!(level, "Archiving with deflate"),
    }

    let folders = list_subdirectories(&input_dir)?;
    if folders.is_empty() {
        warn!(input = %input_dir.display(), "No folders found to process");
        return Ok(PipelineReport::default());
    }
    info!(count = folders.len(), "Processing input folders");

    let folders_bar = progress.items("Processing folders", folders.len() as u64);
    let mut report = PipelineReport::default();

    for folder in folders {
        let name = folder_name(&folder);
        info!(folder = %name, "Processing folder");

        let (cover, outcome) = match process_folder(config, &folder, &name, progress).await {
            Ok(done) => done,
            Err(e) => {
                error!(folder = %folder.display(), error = %e, "Failed to process folder");
                (None, FolderOutcome::Failed(e.to_string()))
            }
        };
        folders_bar.inc(1);
        report.folders.push(FolderReport {
            name,
            cover,
            outcome,
        });
    }
    folders_bar.finish();

    Ok(report)
}

/// Immediate subdirectories of `dir`, sorted by name.
pub fn list_subdirectories(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut folders = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        if entry.path().is_dir() {
            folders.push(entry.path());
        }
    }
    folders.sort();
    Ok(folders)
}

/// Copies the first existing cover candidate from `source` into `dest`, verbatim.
/// A failed copy is logged; the folder is processed either way.
pub fn copy_cover(source: &Path, dest: &Path) -> Option<PathBuf> {
    let Some(candidate) = COVER_CANDIDATES
        .iter()
        .map(|name| source.join(name))
        .find(|path| path.is_file())
    else {
        info!(folder = %source.display(), "No cover found for this folder");
        return None;
    };

    let target = dest.join(candidate.file_name()?);
    match std::fs::copy(&candidate, &target) {
        Ok(_) => {
            info!(cover = %candidate.display(), dest = %dest.display(), "Cover copied");
            Some(target)
        }
        Err(e) => {
            error!(cover = %candidate.display(), error = %e, "Failed to copy cover");
            None
        }
    }
}

/// Every regular file under `dir` with its size, in walk order.
pub fn inventory(dir: &Path) -> Result<Vec<FileEntry>, PipelineError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|source| PipelineError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|source| PipelineError::Walk {
                path: entry.path().to_path_buf(),
                source,
            })?
            .len();
        files.push(FileEntry::new(entry.into_path(), size));
    }
    Ok(files)
}

fn folder_name(folder: &Path) -> String {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| folder.display().to_string())
}

struct PreparedFolder {
    cover: Option<PathBuf>,
    parts: Vec<(StagingArea, ArchiveJob)>,
}

/// Blocking part of a folder: cover, inventory, packing and staging.
fn prepare_folder(
    config: &PipelineConfig,
    folder: &Path,
    name: &str,
    progress: &Progress,
) -> Result<PreparedFolder, PipelineError> {
    let dest = config.output_dir.join(name);
    std::fs::create_dir_all(&dest).map_err(|e| PipelineError::io(&dest, e))?;

    let cover = copy_cover(folder, &dest);

    let files = inventory(folder)?;
    if files.is_empty() {
        return Ok(PreparedFolder {
            cover,
            parts: Vec::new(),
        });
    }
    let total: u64 = files.iter().map(|f| f.size).sum();
    info!(folder = %name, files = files.len(), total_bytes = total, "Scanned folder");

    let bins = pack(files, config.max_bin_size);
    info!(folder = %name, parts = bins.len(), "Folder split into parts");

    let mut parts = Vec::with_capacity(bins.len());
    for (i, bin) in bins.iter().enumerate() {
        let index = i + 1;
        let bar = progress.items(format!("Copying files (part {index})"), bin.len() as u64);
        let area = StagingArea::prepare(dest.join(format!("temp_folder_{index}")), folder, bin, &bar)?;
        bar.finish();
        let job = ArchiveJob {
            source_dir: area.path().to_path_buf(),
            archive_name: archive_name(name, index),
            total_size: bin.total_size(),
            dest_dir: dest.clone(),
            compression: config.compression,
        };
        parts.push((area, job));
    }

    Ok(PreparedFolder { cover, parts })
}

/// Part name, staging failures, archive result and the staging area left over on failure.
type PartResult = (
    String,
    usize,
    Result<ArchivedPart, ArchiveError>,
    Option<StagingArea>,
);

async fn process_folder(
    config: &PipelineConfig,
    folder: &Path,
    name: &str,
    progress: &Progress,
) -> Result<(Option<PathBuf>, FolderOutcome), PipelineError> {
    let prepared = {
        let config = config.clone();
        let folder = folder.to_path_buf();
        let name = name.to_string();
        let progress = progress.clone();
        tokio::task::spawn_blocking(move || prepare_folder(&config, &folder, &name, &progress))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))??
    };

    if prepared.parts.is_empty() {
        warn!(folder = %folder.display(), "No files to archive in folder");
        return Ok((prepared.cover, FolderOutcome::Empty));
    }

    let threads = config.threads.max(1);
    info!(folder = %name, parts = prepared.parts.len(), threads, "Starting archive workers");

    let results: Vec<Result<PartResult, tokio::task::JoinError>> =
        stream::iter(prepared.parts)
            .map(|(area, job)| {
                let progress = progress.clone();
                tokio::task::spawn_blocking(move || {
                    let unstaged = area.failed();
                    match build_archive(&job, &progress) {
                        Ok(part) => {
                            area.finish();
                            (job.archive_name, unstaged, Ok(part), None)
                        }
                        Err(e) => (job.archive_name, unstaged, Err(e), Some(area)),
                    }
                })
            })
            .buffer_unordered(threads)
            .collect()
            .await;

    let mut parts = Vec::new();
    let mut failed_parts = Vec::new();
    let mut leftovers = Vec::new();
    let mut skipped_files = 0;
    for result in results {
        match result {
            Ok((archive, unstaged, Ok(part), _)) => {
                let skipped = unstaged + part.stats.skipped;
                if skipped > 0 {
                    warn!(archive = %archive, skipped, "Part is missing files");
                }
                skipped_files += skipped;
                parts.push(part.path);
            }
            Ok((archive, unstaged, Err(e), area)) => {
                skipped_files += unstaged;
                error!(archive = %archive, error = %e, "Failed to create archive");
                failed_parts.push(archive);
                leftovers.extend(area);
            }
            Err(e) => {
                error!(folder = %name, error = %e, "Archive worker did not complete");
                failed_parts.push(format!("worker: {e}"));
            }
        }
    }
    parts.sort();
    failed_parts.sort();
    drop(leftovers);

    let source_removed = if failed_parts.is_empty() && skipped_files == 0 {
        match std::fs::remove_dir_all(folder) {
            Ok(()) => {
                info!(folder = %folder.display(), "Source folder removed");
                true
            }
            Err(e) => {
                error!(folder = %folder.display(), error = %e, "Failed to remove source folder");
                false
            }
        }
    } else {
        warn!(
            folder = %folder.display(),
            failed = failed_parts.len(),
            skipped_files,
            "Keeping source folder because some parts failed or are incomplete"
        );
        false
    };

    info!(folder = %name, parts = parts.len(), "Folder processing finished");
    Ok((
        prepared.cover,
        FolderOutcome::Archived {
            parts,
            failed_parts,
            skipped_files,
            source_removed,
        },
    ))
}
