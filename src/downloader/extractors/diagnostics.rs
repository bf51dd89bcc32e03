// Failure diagnostics - classifies worker diagnostic text
//
// Analyzes yt-dlp stderr to determine:
// - Whether the failure is a login wall (restricted content)
// - Which excerpt is worth showing to the caller

use serde::{Deserialize, Serialize};

use crate::downloader::errors::{truncate_diagnostic, DownloadError, MAX_DIAGNOSTIC_CHARS};

/// Reasons why an acquisition can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingReason {
    /// Login, sign-in, cookies, age gate, private or members-only
    AuthRequired,

    /// No stream satisfies the requested selection
    FormatUnavailable,

    /// Rate limiting (429 or similar)
    RateLimited,

    /// Geographic restriction
    GeoBlocked,

    /// Deleted or removed media
    VideoUnavailable,

    /// Network timeout (soft IP block)
    NetworkTimeout,

    /// Generic/unknown failure
    Unknown,
}

impl BlockingReason {
    /// Caller can fix this by supplying a credential file
    pub fn is_restricted(&self) -> bool {
        matches!(self, Self::AuthRequired)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::AuthRequired => "Sign-in required",
            Self::FormatUnavailable => "Requested quality is not available",
            Self::RateLimited => "Rate limited by the platform",
            Self::GeoBlocked => "Geographic restriction",
            Self::VideoUnavailable => "Media unavailable",
            Self::NetworkTimeout => "Network timeout",
            Self::Unknown => "Unknown failure",
        }
    }
}

/// Analyze diagnostic text and return the failure reason
pub fn diagnose_error(error: &str) -> Option<BlockingReason> {
    let lower = error.to_lowercase();

    // Login walls first: they are the only class the caller can act on
    if lower.contains("sign in")
        || lower.contains("sign-in")
        || lower.contains("log in")
        || lower.contains("login")
        || lower.contains("authentication")
        || lower.contains("--cookies")
        || lower.contains("cookies for the authentication")
        || lower.contains("private video")
        || lower.contains("video is private")
        || lower.contains("age-restricted")
        || lower.contains("members only")
        || lower.contains("members-only")
    {
        return Some(BlockingReason::AuthRequired);
    }

    if lower.contains("requested format is not available")
        || lower.contains("no video formats found")
    {
        return Some(BlockingReason::FormatUnavailable);
    }

    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        return Some(BlockingReason::RateLimited);
    }

    if lower.contains("not available in your country")
        || lower.contains("blocked in your country")
        || lower.contains("geo restricted")
        || lower.contains("geo-restricted")
    {
        return Some(BlockingReason::GeoBlocked);
    }

    if lower.contains("video unavailable")
        || lower.contains("has been removed")
        || lower.contains("no longer available")
    {
        return Some(BlockingReason::VideoUnavailable);
    }

    if lower.contains("timeout") || lower.contains("timed out") {
        return Some(BlockingReason::NetworkTimeout);
    }

    if !error.trim().is_empty() {
        return Some(BlockingReason::Unknown);
    }

    None
}

/// Short caller-facing excerpt: the first `ERROR:` lines, else the last
/// non-empty line, capped in length.
pub fn excerpt(diagnostic: &str) -> String {
    let important: Vec<&str> = diagnostic
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:") || l.contains("HTTP Error"))
        .take(2)
        .collect();

    let text = if !important.is_empty() {
        important.join(" | ")
    } else {
        diagnostic
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("worker exited without diagnostics")
            .to_string()
    };

    truncate_diagnostic(&text, MAX_DIAGNOSTIC_CHARS)
}

/// Map a failed worker's diagnostic text onto the error taxonomy
pub fn classify_failure(diagnostic: &str) -> DownloadError {
    let reason = diagnose_error(diagnostic).unwrap_or(BlockingReason::Unknown);
    let detail = excerpt(diagnostic);

    if reason.is_restricted() {
        return DownloadError::RestrictedContent(detail);
    }

    match reason {
        BlockingReason::Unknown => DownloadError::AcquisitionFailed(detail),
        other => DownloadError::AcquisitionFailed(format!("{}: {}", other.description(), detail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::errors::ErrorKind;

    #[test]
    fn test_sign_in_is_restricted() {
        for text in [
            "ERROR: [youtube] abc: Sign in to confirm you're not a bot",
            "ERROR: SIGN IN to confirm your age",
            "this video requires login",
            "Use --cookies-from-browser or --cookies for the authentication",
            "ERROR: [instagram] xyz: Requested content is not available, rate-limit reached or login required",
        ] {
            let err = classify_failure(text);
            assert_eq!(err.kind(), ErrorKind::RestrictedContent, "{}", text);
        }
    }

    #[test]
    fn test_other_failures_are_generic() {
        let err = classify_failure("ERROR: Requested format is not available");
        assert_eq!(err.kind(), ErrorKind::AcquisitionFailed);
        assert!(err.to_string().contains("Requested quality is not available"));

        let err = classify_failure("ERROR: HTTP Error 500: Internal Server Error");
        assert_eq!(err.kind(), ErrorKind::AcquisitionFailed);
    }

    #[test]
    fn test_rate_limit_detection() {
        assert_eq!(
            diagnose_error("HTTP Error 429: Too Many Requests"),
            Some(BlockingReason::RateLimited)
        );
    }

    #[test]
    fn test_geo_detection() {
        assert_eq!(
            diagnose_error("Video not available in your country"),
            Some(BlockingReason::GeoBlocked)
        );
    }

    #[test]
    fn test_empty_diagnostic() {
        assert_eq!(diagnose_error("   "), None);
        assert_eq!(
            classify_failure("").kind(),
            ErrorKind::AcquisitionFailed
        );
    }

    #[test]
    fn test_excerpt_prefers_error_lines_and_is_bounded() {
        let text = "[youtube] Extracting\nWARNING: noise\nERROR: something broke\n";
        assert_eq!(excerpt(text), "ERROR: something broke");

        let long = format!("ERROR: {}", "x".repeat(2000));
        assert!(excerpt(&long).chars().count() <= MAX_DIAGNOSTIC_CHARS + 1);
    }
}
