// yt-dlp acquisition worker
//
// Spawns yt-dlp with the resolved format expression, streams its output into
// the progress channel and hands back the single merged artifact. There is no
// hard deadline on a download; the cancellation token is the only way to stop
// it early, and it always takes the child process and partial files with it.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::downloader::artifact::JobFiles;
use crate::downloader::config::Config;
use crate::downloader::errors::DownloadError;
use crate::downloader::extractors::classify_failure;
use crate::downloader::format_selector::FormatSelection;
use crate::downloader::models::{AcquisitionJob, JobStatus};
use crate::downloader::progress::ProgressEmitter;
use crate::downloader::traits::DownloaderBackend;

/// Diagnostic lines kept from stderr
const STDERR_TAIL_LINES: usize = 200;

pub struct YtDlpWorker {
    config: Arc<Config>,
}

impl YtDlpWorker {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Where the finished artifact for `job` is expected
    pub fn output_path(&self, job: &AcquisitionJob) -> PathBuf {
        self.config
            .temp_dir
            .join(format!("{}.{}", job.id, job.container))
    }

    fn build_args(&self, job: &AcquisitionJob, selection: &FormatSelection) -> Vec<String> {
        let template = self.config.temp_dir.join(format!("{}.%(ext)s", job.id));
        let mut args = vec![
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "-f".to_string(),
            selection.format_spec.clone(),
            "--ffmpeg-location".to_string(),
            self.config.ffmpeg_path.clone(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
        ];

        if selection.extract_audio {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                selection.container.clone(),
            ]);
        } else {
            // Stream copy only, never re-encode
            args.extend([
                "--merge-output-format".to_string(),
                selection.container.clone(),
                "--remux-video".to_string(),
                selection.container.clone(),
            ]);
        }

        args.extend(self.config.network_args());
        args.push("--".to_string());
        args.push(job.url.clone());
        args
    }

    async fn abort(&self, child: &mut Child, job: &AcquisitionJob, emitter: &mut ProgressEmitter) -> DownloadError {
        info!("[yt-dlp] job {} cancelled, stopping worker", job.id);
        if let Err(e) = child.kill().await {
            warn!("[yt-dlp] kill failed for job {}: {}", job.id, e);
        }
        emitter.fail("Cancelled");
        DownloadError::Cancelled
    }
}

#[async_trait]
impl DownloaderBackend for YtDlpWorker {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn download(
        &self,
        job: &AcquisitionJob,
        selection: &FormatSelection,
        mut emitter: ProgressEmitter,
        cancel: CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        // Declared before the child so the process is killed before its files go
        let partials = JobFiles::new(&self.config.temp_dir, &job.id);

        let args = self.build_args(job, selection);
        info!(
            "[yt-dlp] job {} for {} with -f {}",
            job.id, job.url, selection.format_spec
        );
        debug!("[yt-dlp] {} {}", self.config.ytdlp_path, args.join(" "));
        emitter.emit(JobStatus::Queued, Some(0.0), "Starting download");

        let spawned = Command::new(&self.config.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let err = DownloadError::spawn(&self.config.ytdlp_path, e);
                emitter.fail(err.to_string());
                return Err(err);
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Io("Failed to capture yt-dlp stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Io("Failed to capture yt-dlp stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: Vec<String> = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail.join("\n")
        });

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    stderr_task.abort();
                    return Err(self.abort(&mut child, job, &mut emitter).await);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.contains("[Merger]") || line.contains("Destination") {
                            debug!("[yt-dlp] {}", line);
                        }
                        emitter.emit_line(&line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("[yt-dlp] stdout read failed: {}", e);
                        break;
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                stderr_task.abort();
                return Err(self.abort(&mut child, job, &mut emitter).await);
            }
            status = child.wait() => status?,
        };
        let diagnostic = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let err = classify_failure(&diagnostic);
            warn!(
                "[yt-dlp] job {} failed with {:?}: {}",
                job.id,
                status.code(),
                err
            );
            emitter.fail(err.to_string());
            return Err(err);
        }

        let output = self.output_path(job);
        if tokio::fs::metadata(&output).await.is_err() {
            let err = DownloadError::AcquisitionFailed(format!(
                "yt-dlp exited cleanly but {} was not produced",
                output.display()
            ));
            emitter.fail(err.to_string());
            return Err(err);
        }

        info!(
            "[yt-dlp] job {} finished in {:.1}s",
            job.id,
            job.started_at.elapsed().as_secs_f32()
        );
        partials.disarm();
        emitter.complete("Download complete");
        Ok(output)
    }
}
