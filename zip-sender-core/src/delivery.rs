//! Delivery loop: uploads each output folder to the destination chat, one file at a time.
//!
//! Order per folder: text announcement, cover image, zip parts in ascending name order, then
//! the shared sticker. Rate-limit signals are waited out and the same file retried; any other
//! failure gets a single caller-level retry after [`DeliveryPolicy::retry_delay`] and is then
//! skipped so the run can continue.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::contract::{ChatClient, ChatId, FileUpload, MediaKind};
use crate::error::{ClientError, DeliveryError};
use crate::progress::Progress;
use crate::COVER_CANDIDATES;

/// Fixed name of the sticker sent after every folder.
pub const STICKER_FILE: &str = "sticker.webp";
/// Fixed name of the caption attached to image uploads.
pub const CAPTION_FILE: &str = "caption.txt";

/// Pacing and retry knobs for the delivery loop.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Files below this size get the short pause after upload.
    pub small_file_threshold: u64,
    pub pause_small: Duration,
    pub pause_large: Duration,
    /// Wait before the single caller-level retry of a failed upload.
    pub retry_delay: Duration,
    /// `None` waits out rate limits indefinitely.
    pub max_rate_limit_waits: Option<u32>,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            small_file_threshold: 10 * 1024 * 1024,
            pause_small: Duration::from_millis(500),
            pause_large: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
            max_rate_limit_waits: None,
        }
    }
}

impl DeliveryPolicy {
    /// No pauses and no retry delay; rate limits still honoured.
    pub fn without_pauses() -> Self {
        Self {
            pause_small: Duration::ZERO,
            pause_large: Duration::ZERO,
            retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    fn pause_after(&self, size: u64) -> Duration {
        if size < self.small_file_threshold {
            self.pause_small
        } else {
            self.pause_large
        }
    }
}

/// Run-wide delivery settings.
#[derive(Clone)]
pub struct DeliveryContext {
    pub policy: DeliveryPolicy,
    pub caption_path: PathBuf,
    pub sticker_path: PathBuf,
    pub progress: Progress,
}

impl DeliveryContext {
    /// Caption and sticker looked up relative to the working directory.
    pub fn new(policy: DeliveryPolicy, progress: Progress) -> Self {
        Self {
            policy,
            caption_path: PathBuf::from(CAPTION_FILE),
            sticker_path: PathBuf::from(STICKER_FILE),
            progress,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub folders: Vec<FolderDelivery>,
}

impl DeliveryReport {
    pub fn failed_files(&self) -> usize {
        self.folders.iter().map(|f| f.failed.len()).sum()
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FolderDelivery {
    pub name: String,
    pub announced: bool,
    pub sent: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Classifies a file by extension (case-insensitive).
pub fn classify(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" => MediaKind::Photo,
        "webp" => MediaKind::Sticker,
        _ => MediaKind::Document,
    }
}

/// Trimmed caption text, or `None` if the file is missing, unreadable or blank.
pub fn read_caption(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let caption = text.trim();
            if caption.is_empty() {
                return None;
            }
            let preview: String = caption.chars().take(30).collect();
            info!(caption = %preview, "Caption loaded");
            Some(caption.to_string())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Caption file not found; sending without caption");
            None
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read caption file");
            None
        }
    }
}

/// Announcement posted before a folder's files.
pub fn announcement(folder_name: &str, at: DateTime<Local>) -> String {
    format!(
        "📁 <b>{}</b>\n📅 {}",
        escape_html(folder_name),
        at.format("%d/%m/%Y %H:%M")
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Output subfolders holding at least one zip part, sorted by name.
pub fn pending_output_folders(output_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    Ok(output_folders(output_dir)?
        .into_iter()
        .filter(|folder| zip_parts(folder).map(|p| !p.is_empty()).unwrap_or(false))
        .collect())
}

/// All subfolders of `output_dir`, sorted by name.
pub fn output_folders(output_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut folders = Vec::new();
    for entry in std::fs::read_dir(output_dir)? {
        let path = entry?.path();
        if path.is_dir() {
            folders.push(path);
        }
    }
    folders.sort();
    Ok(folders)
}

/// Zip parts directly inside `folder`, ordered by part number. Zips without a
/// `_parte_<n>` suffix come first, by name.
pub fn zip_parts(folder: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut parts = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        let is_zip = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if is_zip && path.is_file() {
            parts.push(path);
        }
    }
    parts.sort_by(|a, b| (part_index(a), a).cmp(&(part_index(b), b)));
    Ok(parts)
}

fn part_index(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let (_, index) = stem.rsplit_once("_parte_")?;
    index.parse().ok()
}

/// Uploads one file, waiting out rate limits. Other failures are returned without retrying.
pub async fn upload_file<C>(
    client: &C,
    chat: &ChatId,
    path: &Path,
    ctx: &DeliveryContext,
) -> Result<(), DeliveryError>
where
    C: ChatClient + ?Sized,
{
    let size = std::fs::metadata(path)
        .map_err(|source| DeliveryError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = classify(path);
    let caption = match kind {
        MediaKind::Photo => read_caption(&ctx.caption_path),
        _ => None,
    };

    info!(file = %file_name, size, ?kind, "Starting upload");

    let mut waits: u32 = 0;
    loop {
        let label = match kind {
            MediaKind::Photo => "Sending image",
            MediaKind::Sticker => "Sending sticker",
            MediaKind::Document => "Sending file",
        };
        let bar = ctx.progress.bytes(format!("{label} {file_name}"), size);
        let upload = FileUpload {
            path: path.to_path_buf(),
            file_name: file_name.clone(),
            kind,
            caption: caption.clone(),
            progress: bar.clone(),
        };

        match client.send_file(chat, upload).await {
            Ok(()) => {
                bar.finish();
                info!(file = %file_name, "Upload finished");
                tokio::time::sleep(ctx.policy.pause_after(size)).await;
                return Ok(());
            }
            Err(ClientError::RateLimited { retry_after }) => {
                bar.abandon();
                if let Some(max) = ctx.policy.max_rate_limit_waits {
                    if waits >= max {
                        error!(file = %file_name, waits, "Rate limited too many times; giving up");
                        return Err(DeliveryError::RateLimitExhausted {
                            path: path.to_path_buf(),
                            waits,
                        });
                    }
                }
                waits += 1;
                warn!(
                    file = %file_name,
                    wait_secs = retry_after.as_secs(),
                    attempt = waits,
                    "Rate limited; waiting before retry"
                );
                tokio::time::sleep(retry_after).await;
            }
            Err(source) => {
                bar.abandon();
                error!(file = %file_name, error = %source, "Upload failed");
                return Err(DeliveryError::Upload {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
}

/// [`upload_file`] plus one retry after the policy's delay.
pub async fn upload_with_retry<C>(
    client: &C,
    chat: &ChatId,
    path: &Path,
    ctx: &DeliveryContext,
) -> Result<(), DeliveryError>
where
    C: ChatClient + ?Sized,
{
    if let Err(first) = upload_file(client, chat, path, ctx).await {
        warn!(file = %path.display(), error = %first, "Upload failed; retrying once");
        tokio::time::sleep(ctx.policy.retry_delay).await;
        if let Err(second) = upload_file(client, chat, path, ctx).await {
            error!(file = %path.display(), error = %second, "Upload failed after retry; skipping");
            return Err(second);
        }
    }
    Ok(())
}

/// Delivers one output folder: announcement, cover, parts, sticker.
pub async fn deliver_folder<C>(
    client: &C,
    chat: &ChatId,
    folder: &Path,
    ctx: &DeliveryContext,
) -> FolderDelivery
where
    C: ChatClient + ?Sized,
{
    let name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut report = FolderDelivery {
        name: name.clone(),
        ..FolderDelivery::default()
    };

    info!(folder = %name, "Delivering folder");
    match client
        .send_message(chat, &announcement(&name, Local::now()))
        .await
    {
        Ok(()) => report.announced = true,
        Err(e) => error!(folder = %name, error = %e, "Failed to post announcement"),
    }

    match COVER_CANDIDATES
        .iter()
        .map(|c| folder.join(c))
        .find(|p| p.is_file())
    {
        Some(cover) => {
            let result = upload_file(client, chat, &cover, ctx).await;
            record(&mut report, cover, result);
        }
        None => info!(folder = %name, "No cover to send"),
    }

    let parts = match zip_parts(folder) {
        Ok(parts) => parts,
        Err(e) => {
            error!(folder = %folder.display(), error = %e, "Failed to list zip parts");
            Vec::new()
        }
    };
    if !parts.is_empty() {
        info!(folder = %name, parts = parts.len(), "Sending zip parts");
        let total = ctx.progress.items("Total progress", parts.len() as u64);
        for part in parts {
            let result = upload_with_retry(client, chat, &part, ctx).await;
            record(&mut report, part, result);
            total.inc(1);
        }
        total.finish();
    }

    if ctx.sticker_path.is_file() {
        let sticker = ctx.sticker_path.clone();
        let result = upload_file(client, chat, &sticker, ctx).await;
        record(&mut report, sticker, result);
    }

    info!(
        folder = %name,
        sent = report.sent.len(),
        failed = report.failed.len(),
        "Folder delivered"
    );
    report
}

fn record(report: &mut FolderDelivery, path: PathBuf, result: Result<(), DeliveryError>) {
    match result {
        Ok(()) => report.sent.push(path),
        Err(_) => report.failed.push(path),
    }
}

/// Delivers every subfolder of `output_dir` in ascending name order.
pub async fn deliver_all<C>(
    client: &C,
    chat: &ChatId,
    output_dir: &Path,
    ctx: &DeliveryContext,
) -> Result<DeliveryReport, DeliveryError>
where
    C: ChatClient + ?Sized,
{
    let folders = output_folders(output_dir).map_err(|source| DeliveryError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;
    info!(chat = %chat, folders = folders.len(), "Starting delivery");

    let mut report = DeliveryReport::default();
    for (i, folder) in folders.iter().enumerate() {
        info!(index = i + 1, total = folders.len(), folder = %folder.display(), "Folder");
        report
            .folders
            .push(deliver_folder(client, chat, folder, ctx).await);
    }
    info!(failed = report.failed_files(), "Delivery finished");
    Ok(report)
}
