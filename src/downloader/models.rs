// Common data models for resolution and acquisition

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use super::errors::DownloadError;

/// Title used when a backend gives us no metadata.
pub const PLACEHOLDER_TITLE: &str = "Untitled media";

/// Platform owning a URL, sniffed from the URL string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    YouTube,
    TikTok,
    Instagram,
    Facebook,
    Twitter,
    Unknown,
}

impl Platform {
    /// Streams on this platform split cleanly into resolution buckets
    /// that can be merged with a separate audio track later.
    pub fn has_resolution_ladder(&self) -> bool {
        matches!(self, Self::YouTube)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::YouTube => write!(f, "YouTube"),
            Self::TikTok => write!(f, "TikTok"),
            Self::Instagram => write!(f, "Instagram"),
            Self::Facebook => write!(f, "Facebook"),
            Self::Twitter => write!(f, "Twitter"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    /// Audio and video in one file
    Muxed,
}

/// Opaque token telling the acquisition stage what to fetch.
///
/// Only meaningful to the adapter that produced it. Direct handles carry a
/// time-limited CDN link and must not be cached past the current response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SelectionHandle {
    Best,
    Audio,
    /// Resolution ceiling marker, encoded as `res:<height>`
    Height(u32),
    /// Raw extractor format identifier
    FormatId(String),
    /// Already-resolved direct URL
    Direct(String),
}

impl SelectionHandle {
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct(_))
    }
}

impl fmt::Display for SelectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => write!(f, "best"),
            Self::Audio => write!(f, "audio"),
            Self::Height(h) => write!(f, "res:{}", h),
            Self::FormatId(id) => write!(f, "{}", id),
            Self::Direct(url) => write!(f, "{}", url),
        }
    }
}

impl FromStr for SelectionHandle {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "undefined" || s == "null" {
            return Ok(Self::Best);
        }
        let lower = s.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            url::Url::parse(s)
                .map_err(|e| DownloadError::InvalidRequest(format!("bad direct URL: {}", e)))?;
            return Ok(Self::Direct(s.to_string()));
        }
        match lower.as_str() {
            "best" => return Ok(Self::Best),
            "audio" => return Ok(Self::Audio),
            _ => {}
        }
        if let Some(height) = lower.strip_prefix("res:") {
            return height
                .parse::<u32>()
                .ok()
                .filter(|h| (1..=MAX_HEIGHT).contains(h))
                .map(Self::Height)
                .ok_or_else(|| DownloadError::InvalidRequest(format!("bad height marker: {}", s)));
        }
        // Raw ids end up inside a yt-dlp selector, keep them to its alphabet
        if s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Ok(Self::FormatId(s.to_string()));
        }
        Err(DownloadError::InvalidRequest(format!(
            "unrecognized selection handle: {}",
            s
        )))
    }
}

impl From<SelectionHandle> for String {
    fn from(handle: SelectionHandle) -> Self {
        handle.to_string()
    }
}

impl TryFrom<String> for SelectionHandle {
    type Error = DownloadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Tallest resolution accepted from callers (16K)
pub const MAX_HEIGHT: u32 = 8640;

/// User-facing quality token ("1080p", "audio", "best")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Best,
    Audio,
    Height(u32),
}

impl Default for Quality {
    fn default() -> Self {
        Self::Best
    }
}

impl FromStr for Quality {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "" | "best" | "max" => Ok(Self::Best),
            "audio" | "mp3" | "m4a" => Ok(Self::Audio),
            other => other
                .trim_end_matches('p')
                .parse::<u32>()
                .ok()
                .filter(|h| (1..=MAX_HEIGHT).contains(h))
                .map(Self::Height)
                .ok_or_else(|| DownloadError::InvalidRequest(format!("unknown quality: {}", s))),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => write!(f, "best"),
            Self::Audio => write!(f, "audio"),
            Self::Height(h) => write!(f, "{}p", h),
        }
    }
}

/// One selectable entry in the canonical format list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    /// Display label (e.g. "1080p (HD)", "Audio Only")
    pub label: String,
    pub kind: MediaKind,
    /// Container hint (mp4, m4a, webm)
    pub container: String,
    /// Vertical resolution, used for ordering and selection
    pub height: Option<u32>,
    pub handle: SelectionHandle,
    /// Pre-resolved CDN link, valid for this response only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<String>,
}

/// Per-URL resolution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub thumbnail: Option<String>,
    /// Duration in seconds
    pub duration: Option<u64>,
    pub platform: Platform,
    pub formats: Vec<Format>,
}

/// A single download request travelling through the executor
#[derive(Debug, Clone)]
pub struct AcquisitionJob {
    /// Names the temp artifact and correlates progress events
    pub id: String,
    pub url: String,
    pub platform: Platform,
    pub quality: Quality,
    pub handle: SelectionHandle,
    /// Expected extension of the finished artifact
    pub container: String,
    pub started_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Merging,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Progress information pushed to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub percent: f32,
    pub message: String,
}
