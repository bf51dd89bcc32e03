// Artifact delivery and temp-file cleanup
//
// A finished job is handed to the caller as a byte stream that owns the temp
// file. Whichever way the stream ends (fully read, send error, caller gone),
// dropping it removes the file, so no temp artifact outlives its delivery.

use bytes::Bytes;
use futures::Stream;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::errors::DownloadError;

const MAX_FILENAME_CHARS: usize = 80;

/// Owns a temp file; dropping it deletes the file.
///
/// Inside a Tokio runtime the removal is deferred by the grace delay so a
/// slow consumer can finish reading. Without a runtime it happens at once.
/// Files orphaned by a shutdown during the grace delay are picked up by
/// [`cleanup_stale_artifacts`] on the next start.
#[derive(Debug)]
pub struct TempArtifact {
    path: Option<PathBuf>,
    grace: Duration,
}

impl TempArtifact {
    pub fn new(path: impl Into<PathBuf>, grace: Duration) -> Self {
        Self {
            path: Some(path.into()),
            grace,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };

        if !self.grace.is_zero() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let grace = self.grace;
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    remove_quietly(&path);
                });
                return;
            }
        }
        remove_quietly(&path);
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("[Artifact] removed {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("[Artifact] could not remove {:?}: {}", path, e),
    }
}

/// Owns every `<job_id>.*` entry of a temp dir while a worker writes them.
///
/// Dropping it armed removes them all: failed runs, cancellation and a caller
/// that drops the download future mid-way leave nothing behind.
#[derive(Debug)]
pub struct JobFiles {
    dir: PathBuf,
    prefix: String,
    armed: bool,
}

impl JobFiles {
    pub fn new(dir: impl Into<PathBuf>, job_id: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: format!("{}.", job_id),
            armed: true,
        }
    }

    /// The job succeeded; its artifact is handed on by path
    pub fn disarm(mut self) {
        self.armed = false;
    }

    /// Remove the job's files now, returning how many matched
    pub fn remove_all(&self) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        let mut matched = 0;
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with(&self.prefix) {
                remove_quietly(&entry.path());
                matched += 1;
            }
        }
        matched
    }
}

impl Drop for JobFiles {
    fn drop(&mut self) {
        if self.armed {
            let removed = self.remove_all();
            if removed > 0 {
                debug!("[Artifact] cleared {} partial file(s) for {}*", removed, self.prefix);
            }
        }
    }
}

/// File contents as a byte stream, deleting the file once finished or dropped
pub struct ArtifactStream {
    inner: ReaderStream<tokio::fs::File>,
    guard: Option<TempArtifact>,
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = polled {
            // Reader is closed by now, the file can go
            self.guard.take();
        }
        polled
    }
}

/// A finished artifact ready to be sent to the caller
pub struct DeliveredArtifact {
    /// Download name presented to the caller
    pub filename: String,
    pub content_type: &'static str,
    pub content_length: u64,
    pub stream: ArtifactStream,
}

impl std::fmt::Debug for DeliveredArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveredArtifact")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish()
    }
}

impl DeliveredArtifact {
    /// Open the guarded file for delivery under a name derived from `title`.
    ///
    /// The file is removed even if opening fails.
    pub async fn open(guard: TempArtifact, title: Option<&str>, job_id: &str) -> Result<Self, DownloadError> {
        let path = guard
            .path()
            .map(Path::to_path_buf)
            .ok_or_else(|| DownloadError::Io("artifact already released".to_string()))?;
        let metadata = tokio::fs::metadata(&path).await?;
        let file = tokio::fs::File::open(&path).await?;

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "bin".to_string());

        Ok(Self {
            filename: sanitize_filename(title.unwrap_or(""), &ext, job_id),
            content_type: content_type_for_extension(&ext),
            content_length: metadata.len(),
            stream: ArtifactStream {
                inner: ReaderStream::new(file),
                guard: Some(guard),
            },
        })
    }
}

/// What the caller gets back for a download request
#[derive(Debug)]
pub enum Acquisition {
    /// Answer with a redirect to this URL; nothing was written locally
    Redirect(String),
    File(DeliveredArtifact),
}

/// Caller-facing filename: `[A-Za-z0-9 _-]` only, bounded length,
/// `download-<job_id>` when nothing usable is left.
pub fn sanitize_filename(title: &str, ext: &str, job_id: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut stem: String = collapsed.chars().take(MAX_FILENAME_CHARS).collect();
    stem = stem.trim().to_string();

    if stem.is_empty() {
        stem = format!("download-{}", job_id);
    }
    format!("{}.{}", stem, ext)
}

pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Remove leftovers older than `max_age` (crashed jobs, interrupted grace
/// delays). Returns how many entries were removed.
pub async fn cleanup_stale_artifacts(dir: &Path, max_age: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("[Artifact] cannot scan {:?} for cleanup: {}", dir, e);
            }
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("[Artifact] cleanup scan of {:?} stopped: {}", dir, e);
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("[Artifact] no metadata for {:?}: {}", path, e);
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);
        if age < max_age {
            continue;
        }

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("[Artifact] could not remove stale {:?}: {}", path, e),
        }
    }

    if removed > 0 {
        debug!("[Artifact] removed {} stale entr(ies) from {:?}", removed, dir);
    }
    removed
}
