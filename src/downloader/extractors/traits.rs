// InfoExtractor trait and common types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{MediaInfo, Platform};

/// Closed set of backend kinds. Declaration order is cascade priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    /// Platform-specific retrieval library returning direct links
    Library,
    /// Local yt-dlp subprocess
    Local,
    /// Public relay service, universal fallback
    Relay,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Library => write!(f, "library"),
            Self::Local => write!(f, "local"),
            Self::Relay => write!(f, "relay"),
        }
    }
}

/// One stream as listed by the local extractor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStream {
    /// Format ID (e.g., "137", "hls-720p")
    #[serde(default)]
    pub format_id: String,
    /// File extension (mp4, webm, m4a)
    #[serde(default)]
    pub ext: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Video codec, "none" for audio-only streams
    pub vcodec: Option<String>,
    /// Audio codec, "none" for video-only streams
    pub acodec: Option<String>,
    /// Format note (e.g., "1080p", "tiny", "HD")
    pub format_note: Option<String>,
    pub url: Option<String>,
}

impl RawStream {
    pub fn has_video(&self) -> bool {
        self.vcodec.as_deref().map_or(self.height.is_some(), |v| v != "none")
    }

    pub fn has_audio(&self) -> bool {
        self.acodec.as_deref().map_or(false, |a| a != "none")
    }

    pub fn is_audio_only(&self) -> bool {
        !self.has_video() && self.has_audio()
    }
}

/// Uniform resolution contract implemented by every backend adapter
#[async_trait]
pub trait InfoExtractor: Send + Sync {
    /// Name of the extractor (for logging and aggregated errors)
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Whether this adapter is worth asking about URLs of `platform`
    fn supports(&self, platform: Platform) -> bool;

    /// Resolve `url` into metadata and a canonical format list
    async fn extract(&self, url: &str) -> Result<MediaInfo, DownloadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_order_is_cascade_priority() {
        let mut kinds = vec![BackendKind::Relay, BackendKind::Local, BackendKind::Library];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![BackendKind::Library, BackendKind::Local, BackendKind::Relay]
        );
    }

    #[test]
    fn stream_track_detection() {
        let audio = RawStream {
            vcodec: Some("none".into()),
            acodec: Some("opus".into()),
            ..Default::default()
        };
        assert!(audio.is_audio_only());

        let muxed = RawStream {
            height: Some(720),
            vcodec: Some("avc1".into()),
            acodec: Some("mp4a".into()),
            ..Default::default()
        };
        assert!(muxed.has_video() && muxed.has_audio());

        // Some extractors omit codecs but report a height
        let bare = RawStream {
            height: Some(480),
            ..Default::default()
        };
        assert!(bare.has_video());
        assert!(!bare.is_audio_only());
    }
}
