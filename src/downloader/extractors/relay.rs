// Relay InfoExtractor - public cobalt-style relay services
//
// Universal fallback: the relay performs extraction on our behalf and hands
// back direct media links. Endpoints are tried in shuffled order to spread
// load; the first one that answers with a media reference wins.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use super::traits::{BackendKind, InfoExtractor};
use crate::downloader::config::Config;
use crate::downloader::errors::{truncate_diagnostic, DownloadError};
use crate::downloader::format_selector::{FormatSelector, AUDIO_LABEL, BEST_LABEL};
use crate::downloader::models::{Format, MediaInfo, MediaKind, Platform, PLACEHOLDER_TITLE};
use crate::downloader::platform::detect_platform;

const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "m4a", "ogg", "opus", "wav"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    url: &'a str,
    v_codec: &'a str,
    v_quality: &'a str,
    a_format: &'a str,
    filename_pattern: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    status: String,
    url: Option<String>,
    filename: Option<String>,
    #[serde(default)]
    picker: Vec<PickerItem>,
    /// Separate soundtrack, mostly alongside pickers
    audio: Option<String>,
    error: Option<RelayErrorBody>,
    /// Older relays put the failure reason here
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PickerItem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RelayErrorBody {
    code: Option<String>,
}

/// Relay-service adapter, the universal fallback of the cascade
pub struct RelayExtractor {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl RelayExtractor {
    pub fn new(config: &Config) -> Result<Self, DownloadError> {
        Ok(Self {
            client: config.http_client()?,
            endpoints: config.relay_endpoints.clone(),
        })
    }

    /// Ask one relay instance, returning its normalized formats
    async fn query(&self, endpoint: &str, url: &str) -> Result<(Option<String>, Vec<Format>), DownloadError> {
        let request = RelayRequest {
            url,
            v_codec: "h264",
            v_quality: "1080",
            a_format: "mp3",
            filename_pattern: "basic",
        };

        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }

        let body: RelayResponse = response.json().await?;
        if body.status == "error" {
            let reason = body
                .error
                .and_then(|e| e.code)
                .or(body.text)
                .unwrap_or_else(|| "unknown relay error".to_string());
            return Err(DownloadError::NoMedia(truncate_diagnostic(&reason, 120)));
        }

        let title = body
            .filename
            .as_deref()
            .and_then(|name| Path::new(name).file_stem())
            .map(|stem| stem.to_string_lossy().to_string());
        let formats = Self::formats_from(&body);
        if formats.is_empty() {
            return Err(DownloadError::NoMedia(format!(
                "relay status '{}' without a media link",
                body.status
            )));
        }
        Ok((title, formats))
    }

    fn formats_from(body: &RelayResponse) -> Vec<Format> {
        let mut formats = Vec::new();

        if let Some(link) = body.url.as_deref().filter(|u| !u.is_empty()) {
            let ext = body
                .filename
                .as_deref()
                .and_then(|name| Path::new(name).extension())
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "mp4".to_string());
            if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
                formats.push(FormatSelector::direct_format(AUDIO_LABEL, MediaKind::Audio, &ext, link));
            } else {
                formats.push(FormatSelector::direct_format(BEST_LABEL, MediaKind::Muxed, &ext, link));
            }
        }

        for (index, item) in body.picker.iter().enumerate() {
            if item.url.is_empty() {
                continue;
            }
            let (name, kind, container) = match item.kind.as_deref() {
                Some("photo") => ("Photo", MediaKind::Video, "jpg"),
                Some("gif") => ("GIF", MediaKind::Video, "gif"),
                _ => ("Video", MediaKind::Muxed, "mp4"),
            };
            formats.push(FormatSelector::direct_format(
                &format!("{} {}", name, index + 1),
                kind,
                container,
                &item.url,
            ));
        }

        if let Some(audio) = body.audio.as_deref().filter(|u| !u.is_empty()) {
            formats.push(FormatSelector::direct_format(AUDIO_LABEL, MediaKind::Audio, "mp3", audio));
        }

        FormatSelector::finalize(formats)
    }
}

#[async_trait]
impl InfoExtractor for RelayExtractor {
    fn name(&self) -> &str {
        "relay"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Relay
    }

    fn supports(&self, _platform: Platform) -> bool {
        true
    }

    async fn extract(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        let platform = detect_platform(url);
        let mut order = self.endpoints.clone();
        order.shuffle(&mut rand::thread_rng());

        let mut failures = Vec::new();
        for endpoint in &order {
            debug!("[Relay] trying {}", endpoint);
            match self.query(endpoint, url).await {
                Ok((title, formats)) => {
                    debug!("[Relay] {} answered with {} format(s)", endpoint, formats.len());
                    return Ok(MediaInfo {
                        title: title
                            .filter(|t| !t.trim().is_empty())
                            .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
                        thumbnail: None,
                        duration: None,
                        platform,
                        formats,
                    });
                }
                Err(e) => {
                    warn!("[Relay] {} failed: {}", endpoint, e);
                    failures.push(format!("{}: {}", endpoint, e));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no relay endpoints configured".to_string());
        }
        // One reason per instance; the cascade flattens these into its report
        Err(DownloadError::ResolutionFailed(failures))
    }
}
