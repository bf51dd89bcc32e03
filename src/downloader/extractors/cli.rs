// CLI InfoExtractor - uses native `yt-dlp` binary
//
// Asks for a single JSON document describing the media, then normalizes the
// per-stream listing into canonical formats. Some extractors print warnings
// and exit non-zero while still producing valid JSON; that output is kept.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::{BackendKind, InfoExtractor, RawStream};
use crate::downloader::config::Config;
use crate::downloader::errors::{truncate_diagnostic, DownloadError, MAX_DIAGNOSTIC_CHARS};
use crate::downloader::format_selector::{FormatSelector, BEST_LABEL};
use crate::downloader::models::{MediaInfo, MediaKind, Platform, PLACEHOLDER_TITLE};
use crate::downloader::platform::detect_platform;
use crate::downloader::utils::run_output_with_timeout;

/// Subset of the yt-dlp info document we care about
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    /// Present for single-file media that has no `formats` array
    url: Option<String>,
    ext: Option<String>,
    formats: Option<Vec<RawStream>>,
}

/// CLI-based info extractor using yt-dlp binary
pub struct CliInfoExtractor {
    config: Arc<Config>,
}

impl CliInfoExtractor {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Build command arguments
    fn build_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-playlist".to_string(),
            "--socket-timeout".to_string(),
            self.config.resolve_timeout_seconds.to_string(),
        ];
        args.extend(self.config.network_args());
        // Keep URLs that start with '-' from being read as flags
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    /// Parse the JSON document into MediaInfo
    fn parse_json(&self, stdout: &[u8], platform: Platform) -> Result<MediaInfo, DownloadError> {
        let json_str = String::from_utf8_lossy(stdout);
        let info: Option<YtDlpInfo> = serde_json::from_str(json_str.trim())
            .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)))?;
        let info = info.ok_or_else(|| DownloadError::ParseError("yt-dlp returned null".to_string()))?;

        let formats = match (&info.formats, &info.url) {
            (Some(streams), _) if !streams.is_empty() => FormatSelector::normalize(
                streams,
                platform,
                &self.config.output_container,
                &self.config.audio_container,
            ),
            (_, Some(direct)) => vec![FormatSelector::direct_format(
                BEST_LABEL,
                MediaKind::Muxed,
                info.ext.as_deref().unwrap_or("mp4"),
                direct,
            )],
            _ => Vec::new(),
        };

        if formats.is_empty() {
            return Err(DownloadError::NoMedia("no formats in yt-dlp output".to_string()));
        }

        Ok(MediaInfo {
            title: info
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
            thumbnail: info.thumbnail,
            duration: info.duration.filter(|d| *d >= 0.0).map(|d| d.round() as u64),
            platform,
            formats,
        })
    }
}

#[async_trait]
impl InfoExtractor for CliInfoExtractor {
    fn name(&self) -> &str {
        "cli-yt-dlp"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn supports(&self, _platform: Platform) -> bool {
        true
    }

    async fn extract(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        let platform = detect_platform(url);
        let args = self.build_args(url);
        debug!("[CliExtractor] {} {}", self.config.ytdlp_path, args.join(" "));

        let output = run_output_with_timeout(
            &self.config.ytdlp_path,
            args,
            self.config.resolve_timeout_seconds,
        )
        .await?;

        if output.status.success() {
            return self.parse_json(&output.stdout, platform);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout_has_data = {
            let trimmed = String::from_utf8_lossy(&output.stdout);
            let trimmed = trimmed.trim();
            !trimmed.is_empty() && trimmed != "null"
        };

        if stdout_has_data {
            if let Ok(info) = self.parse_json(&output.stdout, platform) {
                warn!(
                    "[CliExtractor] exit code {:?} but JSON parsed, keeping it",
                    output.status.code()
                );
                return Ok(info);
            }
        }

        Err(DownloadError::BackendFailed(format!(
            "yt-dlp exited with {:?}: {}",
            output.status.code(),
            truncate_diagnostic(&stderr, MAX_DIAGNOSTIC_CHARS)
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::downloader::models::SelectionHandle;
    use crate::downloader::utils::test_support::write_script;

    const YOUTUBE_JSON: &str = r#"{"title":"Clip","thumbnail":"https://i.ytimg.com/x.jpg","duration":212.4,"formats":[{"format_id":"137","ext":"mp4","height":1080,"vcodec":"avc1","acodec":"none"},{"format_id":"136","ext":"mp4","height":720,"vcodec":"avc1","acodec":"none"},{"format_id":"134","ext":"mp4","height":360,"vcodec":"avc1","acodec":"none"},{"format_id":"140","ext":"m4a","vcodec":"none","acodec":"mp4a.40.2"}]}"#;

    fn extractor_with_script(dir: &std::path::Path, body: &str) -> CliInfoExtractor {
        let script = write_script(dir, "yt-dlp", body);
        let config = Config::default()
            .with_ytdlp_path(script.to_string_lossy().to_string())
            .with_cookies_path(None)
            .with_timeout(5);
        CliInfoExtractor::new(Arc::new(config))
    }

    fn json_body(json: &str, exit: i32) -> String {
        format!("cat <<'EOF'\n{}\nEOF\nexit {}", json, exit)
    }

    #[tokio::test]
    async fn resolves_youtube_ladder() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = extractor_with_script(dir.path(), &json_body(YOUTUBE_JSON, 0));

        let info = extractor
            .extract("https://www.youtube.com/watch?v=ID1")
            .await
            .unwrap();

        assert_eq!(info.platform, Platform::YouTube);
        assert_eq!(info.title, "Clip");
        assert_eq!(info.duration, Some(212));
        let labels: Vec<_> = info.formats.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Best Available", "1080p (HD)", "720p (HD)", "360p", "Audio Only"]
        );
    }

    #[tokio::test]
    async fn keeps_valid_json_despite_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("echo 'WARNING: something odd' >&2\n{}", json_body(YOUTUBE_JSON, 1));
        let extractor = extractor_with_script(dir.path(), &body);

        let info = extractor.extract("https://youtu.be/ID1").await.unwrap();
        assert_eq!(info.formats.len(), 5);
    }

    #[tokio::test]
    async fn nonzero_exit_without_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = extractor_with_script(
            dir.path(),
            "echo 'ERROR: Unsupported URL' >&2\nexit 1",
        );

        let err = extractor.extract("https://example.com/x").await.unwrap_err();
        assert!(err.to_string().contains("Unsupported URL"));
    }

    #[tokio::test]
    async fn null_document_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = extractor_with_script(dir.path(), "echo null");

        let err = extractor.extract("https://example.com/x").await.unwrap_err();
        assert!(matches!(err, DownloadError::ParseError(_)));
    }

    #[tokio::test]
    async fn single_url_document_becomes_direct_format() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = extractor_with_script(
            dir.path(),
            &json_body(r#"{"title":"Post","url":"https://cdn.example.com/v.mp4","ext":"mp4"}"#, 0),
        );

        let info = extractor.extract("https://x.com/u/status/1").await.unwrap();
        assert_eq!(info.formats.len(), 1);
        assert!(matches!(info.formats[0].handle, SelectionHandle::Direct(_)));
    }

    #[tokio::test]
    async fn hanging_extractor_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "yt-dlp", "exec sleep 30");
        let config = Config::default()
            .with_ytdlp_path(script.to_string_lossy().to_string())
            .with_timeout(1);
        let extractor = CliInfoExtractor::new(Arc::new(config));

        let err = extractor.extract("https://youtu.be/ID1").await.unwrap_err();
        assert!(matches!(err, DownloadError::NetworkTimeout(1)));
    }
}
