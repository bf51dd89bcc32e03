// FormatSelector - format normalization and quality selection
//
// Converts raw stream listings into the canonical format list and turns a
// caller's selection back into a yt-dlp format expression.
// Handles:
// - Resolution ladder synthesis (2160p .. 360p) for platforms with split streams
// - Raw per-stream listing for everything else
// - A single "Audio Only" entry
// - Strict height ceilings (no silent fallback to a lower default)

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::errors::DownloadError;
use super::extractors::RawStream;
use super::models::{Format, MediaKind, Platform, Quality, SelectionHandle};

pub const BEST_LABEL: &str = "Best Available";
pub const AUDIO_LABEL: &str = "Audio Only";

/// Canonical buckets, largest first
const LADDER: [u32; 6] = [2160, 1440, 1080, 720, 480, 360];

/// What the worker should fetch and what it will produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSelection {
    /// yt-dlp `-f` expression
    pub format_spec: String,
    /// Keep only the audio track
    pub extract_audio: bool,
    /// Extension of the finished artifact
    pub container: String,
}

/// Format selector with ladder synthesis and strict quality mapping
pub struct FormatSelector;

impl FormatSelector {
    /// Build the canonical format list from a raw stream listing
    pub fn normalize(
        streams: &[RawStream],
        platform: Platform,
        video_container: &str,
        audio_container: &str,
    ) -> Vec<Format> {
        let mut formats = if platform.has_resolution_ladder() {
            let ladder = Self::ladder_options(streams, video_container);
            if ladder.is_empty() {
                // Only tiny renditions, list them as they are
                Self::raw_options(streams)
            } else {
                ladder
            }
        } else {
            Self::raw_options(streams)
        };

        if streams.iter().any(RawStream::is_audio_only) {
            formats.push(Format {
                label: AUDIO_LABEL.to_string(),
                kind: MediaKind::Audio,
                container: audio_container.to_string(),
                height: None,
                handle: SelectionHandle::Audio,
                direct_url: None,
            });
        }

        Self::finalize(formats)
    }

    /// Synthesize one entry per canonical bucket that a stream can satisfy.
    /// Portrait or oddly sized media usually fills no window and drops to
    /// the raw listing.
    fn ladder_options(streams: &[RawStream], container: &str) -> Vec<Format> {
        let present: HashSet<u32> = streams
            .iter()
            .filter(|s| s.has_video())
            .filter_map(|s| s.height)
            .filter_map(Self::bucket_for)
            .collect();

        let mut options: Vec<Format> = LADDER
            .iter()
            .filter(|b| present.contains(b))
            .map(|&h| Format {
                label: Self::bucket_label(h),
                kind: MediaKind::Muxed,
                container: container.to_string(),
                height: Some(h),
                handle: SelectionHandle::Height(h),
                direct_url: None,
            })
            .collect();

        if !options.is_empty() {
            options.insert(
                0,
                Format {
                    label: BEST_LABEL.to_string(),
                    kind: MediaKind::Muxed,
                    container: container.to_string(),
                    height: None,
                    handle: SelectionHandle::Best,
                    direct_url: None,
                },
            );
        }

        options
    }

    /// Bucket whose download window contains `height`, if any
    fn bucket_for(height: u32) -> Option<u32> {
        LADDER.iter().copied().find(|&b| {
            let (floor, ceiling) = Self::height_window(b);
            (floor..=ceiling).contains(&height)
        })
    }

    /// Heights a request for `height` accepts: [90% of H, H]
    pub fn height_window(height: u32) -> (u32, u32) {
        (height - height / 10, height)
    }

    fn bucket_label(height: u32) -> String {
        match height {
            2160 => "2160p (4K)".to_string(),
            1440 => "1440p (2K)".to_string(),
            720 | 1080 => format!("{}p (HD)", height),
            other => format!("{}p", other),
        }
    }

    /// One entry per video-bearing stream, labelled natively
    fn raw_options(streams: &[RawStream]) -> Vec<Format> {
        streams
            .iter()
            .filter(|s| s.has_video())
            .filter_map(|s| {
                let handle = s.format_id.parse::<SelectionHandle>().ok()?;
                if !matches!(handle, SelectionHandle::FormatId(_)) {
                    return None;
                }
                let label = s
                    .format_note
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .or_else(|| s.height.map(|h| format!("{}p", h)))
                    .unwrap_or_else(|| "Unknown".to_string());
                Some(Format {
                    label,
                    kind: if s.has_audio() {
                        MediaKind::Muxed
                    } else {
                        MediaKind::Video
                    },
                    container: if s.ext.is_empty() {
                        "mp4".to_string()
                    } else {
                        s.ext.clone()
                    },
                    height: s.height,
                    handle,
                    direct_url: None,
                })
            })
            .collect()
    }

    /// Entry pointing straight at an already-resolved URL
    pub fn direct_format(label: &str, kind: MediaKind, container: &str, url: &str) -> Format {
        Format {
            label: label.to_string(),
            kind,
            container: container.to_string(),
            height: None,
            handle: SelectionHandle::Direct(url.to_string()),
            direct_url: Some(url.to_string()),
        }
    }

    /// Enforce list invariants for any adapter's output:
    /// unique (label, container), "Best Available" first, video entries by
    /// descending height, at most one audio-only entry, last.
    pub fn finalize(formats: Vec<Format>) -> Vec<Format> {
        let mut seen = HashSet::new();
        let mut best = Vec::new();
        let mut video = Vec::new();
        let mut audio: Option<Format> = None;

        for format in formats {
            if !seen.insert((format.label.clone(), format.container.clone())) {
                continue;
            }
            if format.kind == MediaKind::Audio {
                if audio.is_none() {
                    audio = Some(format);
                }
            } else if format.label == BEST_LABEL {
                best.push(format);
            } else {
                video.push(format);
            }
        }

        // Stable: entries without a height keep their backend order
        video.sort_by(|a, b| b.height.unwrap_or(0).cmp(&a.height.unwrap_or(0)));

        best.into_iter().chain(video).chain(audio).collect()
    }

    /// Translate a selection into a worker expression.
    ///
    /// Explicit heights are strict: the expression never allows a stream above
    /// the ceiling and never falls through to an unrelated lower default, so a
    /// missing rendition fails the job instead of degrading it.
    pub fn selection_for(
        handle: &SelectionHandle,
        quality: Quality,
        video_container: &str,
        audio_container: &str,
    ) -> Result<FormatSelection, DownloadError> {
        let audio = || FormatSelection {
            format_spec: format!("ba[ext={}]/ba", audio_container),
            extract_audio: true,
            container: audio_container.to_string(),
        };
        let video = |spec: String| FormatSelection {
            format_spec: spec,
            extract_audio: false,
            container: video_container.to_string(),
        };

        if quality == Quality::Audio {
            return Ok(audio());
        }

        match handle {
            SelectionHandle::Direct(_) => Err(DownloadError::InvalidRequest(
                "direct links are redirected, not downloaded".to_string(),
            )),
            SelectionHandle::Audio => Ok(audio()),
            SelectionHandle::Height(h) => Ok(video(Self::height_spec(*h))),
            SelectionHandle::FormatId(id) => Ok(video(format!("{id}+ba/{id}"))),
            SelectionHandle::Best => match quality {
                Quality::Height(h) => Ok(video(Self::height_spec(h))),
                _ => Ok(video("bv*+ba/b".to_string())),
            },
        }
    }

    /// Best stream inside the height window, merged with best audio
    fn height_spec(height: u32) -> String {
        let (floor, ceiling) = Self::height_window(height);
        format!(
            "bv*[height<={h}][height>={f}]+ba/b[height<={h}][height>={f}]",
            h = ceiling,
            f = floor
        )
    }
}
