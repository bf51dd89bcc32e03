// Library InfoExtractor - platform-specific direct link retrieval
//
// Some platforms have dedicated retrieval services that hand back CDN links
// per quality tier without running the local extractor at all. Every format
// produced here carries a Direct handle, so acquisition is a plain redirect.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::traits::{BackendKind, InfoExtractor};
use crate::downloader::config::Config;
use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::{FormatSelector, AUDIO_LABEL};
use crate::downloader::models::{MediaInfo, MediaKind, Platform, PLACEHOLDER_TITLE};
use crate::downloader::platform::detect_platform;

/// One downloadable tier returned by a direct link source
#[derive(Debug, Clone, PartialEq)]
pub struct DirectLink {
    pub label: String,
    pub kind: MediaKind,
    pub container: String,
    pub height: Option<u32>,
    pub url: String,
}

/// Metadata plus direct links for one URL
#[derive(Debug, Clone, Default)]
pub struct DirectMedia {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<u64>,
    pub links: Vec<DirectLink>,
}

/// A retrieval library or API specialised for a handful of platforms
#[async_trait]
pub trait DirectLinkSource: Send + Sync {
    fn name(&self) -> &str;

    fn platforms(&self) -> &[Platform];

    async fn fetch(&self, url: &str) -> Result<DirectMedia, DownloadError>;
}

/// Adapter exposing a [`DirectLinkSource`] through the resolution contract
pub struct LibraryExtractor<S> {
    source: S,
}

impl<S: DirectLinkSource> LibraryExtractor<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    fn to_media_info(media: DirectMedia, platform: Platform) -> MediaInfo {
        let formats = media
            .links
            .iter()
            .map(|link| {
                let label = if link.kind == MediaKind::Audio {
                    AUDIO_LABEL
                } else {
                    link.label.as_str()
                };
                let mut format =
                    FormatSelector::direct_format(label, link.kind, &link.container, &link.url);
                format.height = link.height;
                format
            })
            .collect();

        MediaInfo {
            title: media
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
            thumbnail: media.thumbnail,
            duration: media.duration,
            platform,
            formats: FormatSelector::finalize(formats),
        }
    }
}

#[async_trait]
impl<S: DirectLinkSource> InfoExtractor for LibraryExtractor<S> {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Library
    }

    fn supports(&self, platform: Platform) -> bool {
        self.source.platforms().contains(&platform)
    }

    async fn extract(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        let platform = detect_platform(url);
        let media = self.source.fetch(url).await?;
        debug!(
            "[Library] {} returned {} link(s)",
            self.source.name(),
            media.links.len()
        );

        let info = Self::to_media_info(media, platform);
        if info.formats.is_empty() {
            return Err(DownloadError::NoMedia(format!(
                "{} returned no links",
                self.source.name()
            )));
        }
        Ok(info)
    }
}

// ==================== TikWM ====================

#[derive(Debug, Deserialize)]
struct TikwmResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<TikwmData>,
}

#[derive(Debug, Deserialize)]
struct TikwmData {
    title: Option<String>,
    cover: Option<String>,
    duration: Option<u64>,
    /// Watermark-free SD stream
    play: Option<String>,
    /// Watermark-free HD stream
    hdplay: Option<String>,
    /// Soundtrack
    music: Option<String>,
}

/// TikTok direct links through the TikWM API
pub struct TikwmSource {
    client: reqwest::Client,
    endpoint: String,
}

impl TikwmSource {
    pub fn new(config: &Config, endpoint: impl Into<String>) -> Result<Self, DownloadError> {
        Ok(Self {
            client: config.http_client()?,
            endpoint: endpoint.into(),
        })
    }

    /// The API sometimes answers with paths relative to its own host
    fn absolutize(&self, link: &str) -> Option<String> {
        let link = link.trim();
        if link.is_empty() {
            return None;
        }
        if link.starts_with("http://") || link.starts_with("https://") {
            return Some(link.to_string());
        }
        url::Url::parse(&self.endpoint)
            .and_then(|base| base.join(link))
            .map(|u| u.to_string())
            .ok()
    }

    fn links_from(&self, data: &TikwmData) -> Vec<DirectLink> {
        let mut links = Vec::new();
        let hd = data.hdplay.as_deref().and_then(|l| self.absolutize(l));
        let sd = data.play.as_deref().and_then(|l| self.absolutize(l));

        if let Some(url) = hd.clone() {
            links.push(DirectLink {
                label: "HD (No Watermark)".to_string(),
                kind: MediaKind::Muxed,
                container: "mp4".to_string(),
                height: None,
                url,
            });
        }
        if let Some(url) = sd.filter(|sd| Some(sd) != hd.as_ref()) {
            links.push(DirectLink {
                label: "SD (No Watermark)".to_string(),
                kind: MediaKind::Muxed,
                container: "mp4".to_string(),
                height: None,
                url,
            });
        }
        if let Some(url) = data.music.as_deref().and_then(|l| self.absolutize(l)) {
            links.push(DirectLink {
                label: AUDIO_LABEL.to_string(),
                kind: MediaKind::Audio,
                container: "mp3".to_string(),
                height: None,
                url,
            });
        }
        links
    }
}

#[async_trait]
impl DirectLinkSource for TikwmSource {
    fn name(&self) -> &str {
        "tikwm"
    }

    fn platforms(&self) -> &[Platform] {
        &[Platform::TikTok]
    }

    async fn fetch(&self, url: &str) -> Result<DirectMedia, DownloadError> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("url", url), ("hd", "1")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                endpoint: self.endpoint.clone(),
            });
        }

        let body: TikwmResponse = response.json().await?;
        if body.code != 0 {
            return Err(DownloadError::NoMedia(format!(
                "tikwm code {}: {}",
                body.code, body.msg
            )));
        }
        let data = body
            .data
            .ok_or_else(|| DownloadError::ParseError("tikwm response without data".to_string()))?;

        Ok(DirectMedia {
            links: self.links_from(&data),
            title: data.title,
            thumbnail: data.cover.as_deref().and_then(|c| self.absolutize(c)),
            duration: data.duration,
        })
    }
}

// ==================== Instagram ====================

/// Public web client id the post query is issued under
const INSTAGRAM_APP_ID: &str = "936619743392459";
/// Persisted GraphQL query resolving one post by shortcode
const INSTAGRAM_POST_DOC_ID: &str = "8845758582119845";
const MAX_CAPTION_TITLE_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
struct InstagramResponse {
    data: Option<InstagramData>,
}

#[derive(Debug, Deserialize)]
struct InstagramData {
    xdt_shortcode_media: Option<InstagramMedia>,
}

#[derive(Debug, Deserialize)]
struct Edges<T> {
    #[serde(default = "Vec::new")]
    edges: Vec<Edge<T>>,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
struct CaptionNode {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Dimensions {
    height: u32,
}

#[derive(Debug, Deserialize)]
struct Owner {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstagramMedia {
    #[serde(default)]
    is_video: bool,
    video_url: Option<String>,
    display_url: Option<String>,
    dimensions: Option<Dimensions>,
    video_duration: Option<f64>,
    owner: Option<Owner>,
    edge_media_to_caption: Option<Edges<CaptionNode>>,
    /// Carousel items; absent for single posts
    edge_sidecar_to_children: Option<Edges<InstagramMedia>>,
}

impl InstagramMedia {
    fn title(&self) -> Option<String> {
        let caption = self
            .edge_media_to_caption
            .as_ref()
            .and_then(|c| c.edges.first())
            .and_then(|e| e.node.text.lines().map(str::trim).find(|l| !l.is_empty()))
            .map(|line| line.chars().take(MAX_CAPTION_TITLE_CHARS).collect::<String>());
        caption.or_else(|| {
            self.owner
                .as_ref()
                .and_then(|o| o.username.as_deref())
                .map(|u| format!("@{}", u))
        })
    }

    /// Video items only; photos are left to the general-purpose backends
    fn links(&self) -> Vec<DirectLink> {
        let items: Vec<&InstagramMedia> = match &self.edge_sidecar_to_children {
            Some(children) if !children.edges.is_empty() => children.edges.iter().map(|e| &e.node).collect(),
            _ => vec![self],
        };
        let carousel = items.len() > 1;

        items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_video)
            .filter_map(|(i, item)| {
                let url = item.video_url.clone().filter(|u| !u.trim().is_empty())?;
                let height = item.dimensions.as_ref().map(|d| d.height);
                let (label, height) = match (carousel, height) {
                    // carousel keeps post order, so no height to sort by
                    (true, _) => (format!("Video {}", i + 1), None),
                    (false, Some(h)) => (format!("{}p", h), Some(h)),
                    (false, None) => ("Original".to_string(), None),
                };
                Some(DirectLink {
                    label,
                    kind: MediaKind::Muxed,
                    container: "mp4".to_string(),
                    height,
                    url,
                })
            })
            .collect()
    }
}

/// Post shortcode from `/p/<code>`, `/reel/<code>`, `/reels/<code>` or `/tv/<code>`
pub fn instagram_shortcode(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if matches!(segment, "p" | "reel" | "reels" | "tv") {
            return segments
                .next()
                .filter(|code| code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
                .map(ToString::to_string);
        }
    }
    None
}

/// Instagram direct links from the web post query
pub struct InstagramSource {
    client: reqwest::Client,
    endpoint: String,
}

impl InstagramSource {
    pub fn new(config: &Config, endpoint: impl Into<String>) -> Result<Self, DownloadError> {
        Ok(Self {
            client: config.http_client()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DirectLinkSource for InstagramSource {
    fn name(&self) -> &str {
        "instagram"
    }

    fn platforms(&self) -> &[Platform] {
        &[Platform::Instagram]
    }

    async fn fetch(&self, url: &str) -> Result<DirectMedia, DownloadError> {
        let shortcode = instagram_shortcode(url)
            .ok_or_else(|| DownloadError::NoMedia(format!("not an Instagram post URL: {}", url)))?;
        let variables = serde_json::json!({ "shortcode": shortcode }).to_string();

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-IG-App-ID", INSTAGRAM_APP_ID)
            .header("X-FB-Friendly-Name", "PolarisPostActionLoadPostQueryQuery")
            .header("Referer", format!("https://www.instagram.com/p/{}/", shortcode))
            .form(&[("variables", variables.as_str()), ("doc_id", INSTAGRAM_POST_DOC_ID)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                endpoint: self.endpoint.clone(),
            });
        }

        let body: InstagramResponse = response.json().await?;
        let media = body
            .data
            .and_then(|d| d.xdt_shortcode_media)
            .ok_or_else(|| DownloadError::NoMedia(format!("post {} is private or gone", shortcode)))?;

        Ok(DirectMedia {
            title: media.title(),
            thumbnail: media.display_url.clone(),
            duration: media.video_duration.filter(|d| d.is_finite() && *d >= 0.0).map(|d| d.round() as u64),
            links: media.links(),
        })
    }
}

/// Library adapter for Instagram, when an endpoint is configured
pub fn instagram_extractor(
    config: &Arc<Config>,
) -> Result<Option<LibraryExtractor<InstagramSource>>, DownloadError> {
    match config.instagram_endpoint.as_deref() {
        Some(endpoint) => Ok(Some(LibraryExtractor::new(InstagramSource::new(config, endpoint)?))),
        None => Ok(None),
    }
}

/// Library adapter for TikTok, when an endpoint is configured
pub fn tiktok_extractor(config: &Arc<Config>) -> Result<Option<LibraryExtractor<TikwmSource>>, DownloadError> {
    match config.tikwm_endpoint.as_deref() {
        Some(endpoint) => Ok(Some(LibraryExtractor::new(TikwmSource::new(config, endpoint)?))),
        None => Ok(None),
    }
}
