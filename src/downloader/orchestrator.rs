// Downloader facade - resolution cascade, acquisition planning and delivery
//
// Cheap to clone; every request is an independent unit of work and the only
// shared state is the read-only config and the progress registry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::artifact::{cleanup_stale_artifacts, Acquisition, DeliveredArtifact, TempArtifact};
use super::backends::YtDlpWorker;
use super::config::Config;
use super::errors::DownloadError;
use super::extractors::{
    instagram_extractor, tiktok_extractor, CascadeController, CliInfoExtractor, InfoExtractor, RelayExtractor,
};
use super::format_selector::{FormatSelection, FormatSelector};
use super::models::{AcquisitionJob, MediaInfo, Quality, SelectionHandle};
use super::platform::detect_platform;
use super::progress::{ProgressHub, ProgressSubscription};
use super::tools::{verify_tool, ToolType};
use super::traits::DownloaderBackend;

/// Temp entries older than this are assumed orphaned at startup
pub const STALE_ARTIFACT_AGE: Duration = Duration::from_secs(60 * 60);

const MAX_JOB_ID_LEN: usize = 64;

/// What `acquire` will do for a given selection
#[derive(Debug, Clone)]
pub enum AcquisitionPlan {
    /// Selection already is a CDN link; answer with a redirect
    Redirect(String),
    /// Run the worker for this job
    Spawn {
        job: AcquisitionJob,
        selection: FormatSelection,
    },
}

/// A caller's download request
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub url: String,
    pub handle: SelectionHandle,
    pub quality: Quality,
    /// Used to name the delivered file
    pub title: Option<String>,
    /// Caller-chosen id, so progress can be subscribed before the job starts
    pub job_id: Option<String>,
}

impl AcquireRequest {
    pub fn new(url: impl Into<String>, handle: SelectionHandle, quality: Quality) -> Self {
        Self {
            url: url.into(),
            handle,
            quality,
            title: None,
            job_id: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

struct Inner {
    config: Arc<Config>,
    cascade: CascadeController,
    worker: Arc<dyn DownloaderBackend>,
    progress: ProgressHub,
}

#[derive(Clone)]
pub struct Downloader {
    inner: Arc<Inner>,
}

impl Downloader {
    /// Default wiring: Instagram and TikTok libraries (when configured), local
    /// yt-dlp, and the relay pool as universal fallback; yt-dlp as acquisition
    /// worker.
    pub fn new(config: Config) -> Result<Self, DownloadError> {
        let config = Arc::new(config);

        let mut adapters: Vec<Arc<dyn InfoExtractor>> = Vec::new();
        if let Some(library) = instagram_extractor(&config)? {
            adapters.push(Arc::new(library));
        }
        if let Some(library) = tiktok_extractor(&config)? {
            adapters.push(Arc::new(library));
        }
        adapters.push(Arc::new(CliInfoExtractor::new(config.clone())));
        let relay: Arc<dyn InfoExtractor> = Arc::new(RelayExtractor::new(&config)?);

        let cascade = CascadeController::new(adapters, Some(relay));
        let worker: Arc<dyn DownloaderBackend> = Arc::new(YtDlpWorker::new(config.clone()));
        Ok(Self::with_parts(config, cascade, worker))
    }

    /// Assemble from explicit parts (embedders and tests)
    pub fn with_parts(
        config: Arc<Config>,
        cascade: CascadeController,
        worker: Arc<dyn DownloaderBackend>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                cascade,
                worker,
                progress: ProgressHub::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn cascade(&self) -> &CascadeController {
        &self.inner.cascade
    }

    /// Startup housekeeping: create the temp dir, clear orphaned artifacts.
    pub async fn prepare(&self) -> Result<usize, DownloadError> {
        let dir = &self.inner.config.temp_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            DownloadError::Io(format!("temp dir {} is not writable: {}", dir.display(), e))
        })?;
        let removed = cleanup_stale_artifacts(dir, STALE_ARTIFACT_AGE).await;
        if removed > 0 {
            info!("[Downloader] removed {} stale artifact(s)", removed);
        }
        Ok(removed)
    }

    /// Check that the configured binaries run; returns their versions
    pub async fn verify_tools(&self) -> Result<Vec<(ToolType, String)>, DownloadError> {
        let config = &self.inner.config;
        let ytdlp = verify_tool(&config.ytdlp_path, ToolType::YtDlp).await?;
        let ffmpeg = verify_tool(&config.ffmpeg_path, ToolType::Ffmpeg).await?;
        Ok(vec![(ToolType::YtDlp, ytdlp), (ToolType::Ffmpeg, ffmpeg)])
    }

    /// Resolve `url` into metadata and the canonical format list
    pub async fn resolve(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        let url = validate_url(url)?;
        self.inner.cascade.resolve(url).await
    }

    /// Watch a job's progress. Subscribe before `acquire` to see every event.
    pub fn subscribe(&self, job_id: &str) -> Result<ProgressSubscription, DownloadError> {
        validate_job_id(job_id)?;
        Ok(self.inner.progress.subscribe(job_id))
    }

    /// Decide between redirect and worker for a fresh job
    pub fn plan(
        &self,
        url: &str,
        handle: &SelectionHandle,
        quality: Quality,
    ) -> Result<AcquisitionPlan, DownloadError> {
        self.plan_job(&new_job_id(), url, handle, quality)
    }

    /// Same as [`Downloader::plan`] with a caller-chosen job id
    pub fn plan_job(
        &self,
        job_id: &str,
        url: &str,
        handle: &SelectionHandle,
        quality: Quality,
    ) -> Result<AcquisitionPlan, DownloadError> {
        validate_job_id(job_id)?;
        let url = validate_url(url)?;

        if let SelectionHandle::Direct(link) = handle {
            return Ok(AcquisitionPlan::Redirect(link.clone()));
        }

        let config = &self.inner.config;
        let selection = FormatSelector::selection_for(
            handle,
            quality,
            &config.output_container,
            &config.audio_container,
        )?;

        let job = AcquisitionJob {
            id: job_id.to_string(),
            url: url.to_string(),
            platform: detect_platform(url),
            quality,
            handle: handle.clone(),
            container: selection.container.clone(),
            started_at: Instant::now(),
        };
        Ok(AcquisitionPlan::Spawn { job, selection })
    }

    /// Execute a download request.
    ///
    /// Dropping the returned future or firing `cancel` stops the worker and
    /// removes its partial files.
    pub async fn acquire(
        &self,
        request: AcquireRequest,
        cancel: CancellationToken,
    ) -> Result<Acquisition, DownloadError> {
        let job_id = match request.job_id.as_deref() {
            Some(id) => id.to_string(),
            None => new_job_id(),
        };
        let plan = self.plan_job(&job_id, &request.url, &request.handle, request.quality)?;

        match plan {
            AcquisitionPlan::Redirect(link) => {
                info!("[Downloader] job {} redirects to a direct link", job_id);
                self.inner
                    .progress
                    .emitter(&job_id)
                    .complete("Redirecting to direct link");
                Ok(Acquisition::Redirect(link))
            }
            AcquisitionPlan::Spawn { job, selection } => {
                let emitter = self.inner.progress.emitter(&job.id);
                let worker = &self.inner.worker;
                info!(
                    "[Downloader] job {} via {} ({} on {})",
                    job.id,
                    worker.name(),
                    job.quality,
                    job.platform
                );

                let path: PathBuf = worker
                    .download(&job, &selection, emitter, cancel)
                    .await
                    .map_err(|e| {
                        warn!("[Downloader] job {} failed: {}", job.id, e);
                        e
                    })?;
                let guard = TempArtifact::new(path, self.inner.config.cleanup_grace);

                let artifact = DeliveredArtifact::open(guard, request.title.as_deref(), &job.id).await?;
                Ok(Acquisition::File(artifact))
            }
        }
    }
}

/// Fresh unique job id
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Job ids name temp files, so they are restricted to `[A-Za-z0-9_-]{1,64}`
pub fn validate_job_id(job_id: &str) -> Result<(), DownloadError> {
    let valid = !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LEN
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DownloadError::InvalidRequest(format!("invalid job id: {:?}", job_id)))
    }
}

fn validate_url(url: &str) -> Result<&str, DownloadError> {
    let url = url.trim();
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(url),
        Ok(parsed) => Err(DownloadError::InvalidRequest(format!(
            "unsupported URL scheme: {}",
            parsed.scheme()
        ))),
        Err(e) => Err(DownloadError::InvalidRequest(format!("invalid URL: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::errors::ErrorKind;
    use crate::downloader::extractors::BackendKind;
    use crate::downloader::models::{JobStatus, MediaKind, Platform};
    use crate::downloader::progress::ProgressEmitter;
    use async_trait::async_trait;
    use futures::StreamExt;

    struct StaticAdapter;

    #[async_trait]
    impl InfoExtractor for StaticAdapter {
        fn name(&self) -> &str {
            "static"
        }
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }
        fn supports(&self, _platform: Platform) -> bool {
            true
        }
        async fn extract(&self, url: &str) -> Result<MediaInfo, DownloadError> {
            Ok(MediaInfo {
                title: "Static".to_string(),
                thumbnail: None,
                duration: Some(3),
                platform: detect_platform(url),
                formats: vec![FormatSelector::direct_format("SD", MediaKind::Muxed, "mp4", "https://cdn/x.mp4")],
            })
        }
    }

    /// Writes `<temp>/<id>.<container>` like the real worker would
    struct FakeWorker {
        dir: PathBuf,
        fail_with: Option<DownloadError>,
    }

    #[async_trait]
    impl DownloaderBackend for FakeWorker {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn download(
            &self,
            job: &AcquisitionJob,
            selection: &FormatSelection,
            mut emitter: ProgressEmitter,
            _cancel: CancellationToken,
        ) -> Result<PathBuf, DownloadError> {
            if let Some(err) = &self.fail_with {
                emitter.fail(err.to_string());
                return Err(err.clone());
            }
            emitter.emit(JobStatus::Downloading, Some(50.0), "half");
            let path = self.dir.join(format!("{}.{}", job.id, selection.container));
            tokio::fs::write(&path, b"payload").await?;
            emitter.complete("done");
            Ok(path)
        }
    }

    fn downloader(dir: &std::path::Path, fail_with: Option<DownloadError>) -> Downloader {
        let config = Arc::new(
            Config::default()
                .with_temp_dir(dir)
                .with_cleanup_grace(Duration::ZERO),
        );
        let cascade = CascadeController::new(vec![Arc::new(StaticAdapter)], None);
        let worker = Arc::new(FakeWorker {
            dir: dir.to_path_buf(),
            fail_with,
        });
        Downloader::with_parts(config, cascade, worker)
    }

    #[test]
    fn test_direct_handle_plans_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), None);
        let plan = d
            .plan(
                "https://www.tiktok.com/@u/video/1",
                &SelectionHandle::Direct("https://cdn.example.com/v.mp4".into()),
                Quality::Best,
            )
            .unwrap();
        assert!(matches!(plan, AcquisitionPlan::Redirect(ref u) if u == "https://cdn.example.com/v.mp4"));
    }

    #[test]
    fn test_height_selection_plans_strict_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), None);
        let plan = d
            .plan("https://youtu.be/ID1", &SelectionHandle::Height(1080), Quality::Height(1080))
            .unwrap();

        match plan {
            AcquisitionPlan::Spawn { job, selection } => {
                assert_eq!(job.platform, Platform::YouTube);
                assert_eq!(job.container, "mp4");
                assert!(validate_job_id(&job.id).is_ok());
                assert!(!selection.format_spec.contains("/best"));
                assert!(selection.format_spec.contains("height<=1080"));
            }
            other => panic!("unexpected plan: {:?}", other),
        }

        let plan = d
            .plan("https://youtu.be/ID1", &SelectionHandle::Best, Quality::Audio)
            .unwrap();
        assert!(matches!(plan, AcquisitionPlan::Spawn { ref job, .. } if job.container == "m4a"));
    }

    #[test]
    fn test_job_ids() {
        assert!(validate_job_id("abc-DEF_123").is_ok());
        assert!(validate_job_id(&"a".repeat(64)).is_ok());
        for bad in ["", "../etc", "a b", "ünï", &"a".repeat(65)] {
            let err = validate_job_id(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{}", bad);
        }
        assert_ne!(new_job_id(), new_job_id());
        assert!(validate_job_id(&new_job_id()).is_ok());
    }

    #[test]
    fn test_bad_urls_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), None);
        for bad in ["", "not a url", "file:///etc/passwd", "-o/tmp/x"] {
            let err = d.plan(bad, &SelectionHandle::Best, Quality::Best).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_resolve_goes_through_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), None);
        let info = d.resolve(" https://x.com/u/status/1 ").await.unwrap();
        assert_eq!(info.title, "Static");
        assert_eq!(info.platform, Platform::Twitter);
        assert!(d.resolve("").await.is_err());
    }

    #[tokio::test]
    async fn test_redirect_acquisition_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), None);
        let request = AcquireRequest::new(
            "https://www.instagram.com/p/abc/",
            SelectionHandle::Direct("https://cdn.example.com/1.mp4".into()),
            Quality::Best,
        );

        let result = d.acquire(request, CancellationToken::new()).await.unwrap();
        assert!(matches!(result, Acquisition::Redirect(ref u) if u.ends_with("1.mp4")));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_file_acquisition_streams_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), None);
        let mut sub = d.subscribe("job-42").unwrap();

        let request = AcquireRequest::new("https://youtu.be/ID1", SelectionHandle::Height(720), Quality::Height(720))
            .with_title("Never: Gonna / Give")
            .with_job_id("job-42");
        let result = d.acquire(request, CancellationToken::new()).await.unwrap();

        let Acquisition::File(mut artifact) = result else {
            panic!("expected a file");
        };
        assert_eq!(artifact.filename, "Never Gonna Give.mp4");
        assert_eq!(artifact.content_length, 7);

        let mut body = Vec::new();
        while let Some(chunk) = artifact.stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"payload");
        assert!(!dir.path().join("job-42.mp4").exists());

        let statuses: Vec<JobStatus> = sub.by_ref().map(|e| e.status).collect().await;
        assert_eq!(statuses.last(), Some(&JobStatus::Complete));
    }

    #[tokio::test]
    async fn test_worker_failure_propagates_kind() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(
            dir.path(),
            Some(DownloadError::RestrictedContent("Sign in to confirm".into())),
        );
        let request = AcquireRequest::new("https://youtu.be/ID1", SelectionHandle::Best, Quality::Best);

        let err = d.acquire(request, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RestrictedContent);
    }

    #[tokio::test]
    async fn test_invalid_caller_job_id() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), None);
        assert!(d.subscribe("../../x").is_err());

        let request = AcquireRequest::new("https://youtu.be/ID1", SelectionHandle::Best, Quality::Best)
            .with_job_id("bad id");
        let err = d.acquire(request, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_acquire_removes_partials() {
        let dir = tempfile::tempdir().unwrap();
        let script = crate::downloader::utils::test_support::write_script(
            dir.path(),
            "yt-dlp",
            r#"while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
  esac
  shift
done
printf 'partial' > "$(echo "$out" | sed 's/%(ext)s/f399.mp4.part/')"
echo "[download]   5.0% of 10.00MiB at 1.00KiB/s ETA 59:59"
exec sleep 30"#,
        );
        let temp = dir.path().join("tmp");
        let config = Arc::new(
            Config::default()
                .with_ytdlp_path(script.to_string_lossy().to_string())
                .with_cookies_path(None)
                .with_temp_dir(&temp),
        );
        let worker = Arc::new(YtDlpWorker::new(config.clone()));
        let d = Downloader::with_parts(config, CascadeController::new(vec![Arc::new(StaticAdapter)], None), worker);

        let mut sub = d.subscribe("job-gone").unwrap();
        let task = {
            let d = d.clone();
            let request = AcquireRequest::new("https://youtu.be/ID1", SelectionHandle::Height(720), Quality::Height(720))
                .with_job_id("job-gone");
            tokio::spawn(async move { d.acquire(request, CancellationToken::new()).await })
        };

        while let Some(event) = sub.recv().await {
            if event.percent >= 5.0 {
                break;
            }
        }
        assert!(temp.join("job-gone.f399.mp4.part").exists());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_creates_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("nested").join("tmp");
        let d = downloader(&temp, None);
        assert_eq!(d.prepare().await.unwrap(), 0);
        assert!(temp.is_dir());
    }

    #[test]
    fn test_default_wiring_orders_backends() {
        let config = Config::default().with_relays(vec!["http://127.0.0.1:9/".into()]);
        let d = Downloader::new(config).unwrap();
        assert_eq!(
            d.cascade().plan_for(Platform::TikTok),
            vec!["tikwm", "cli-yt-dlp", "relay"]
        );
        assert_eq!(
            d.cascade().plan_for(Platform::Instagram),
            vec!["instagram", "cli-yt-dlp", "relay"]
        );
        assert_eq!(d.cascade().plan_for(Platform::YouTube), vec!["cli-yt-dlp", "relay"]);

        let without_libraries = Config::default()
            .with_tikwm_endpoint(None)
            .with_instagram_endpoint(None);
        let d = Downloader::new(without_libraries).unwrap();
        assert_eq!(d.cascade().plan_for(Platform::Instagram), vec!["cli-yt-dlp", "relay"]);
    }
}
