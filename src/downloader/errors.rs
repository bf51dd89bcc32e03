// Error types for resolution and acquisition

use serde::Serialize;
use thiserror::Error;

/// Upper bound on diagnostic text surfaced to callers.
pub const MAX_DIAGNOSTIC_CHARS: usize = 300;

/// Machine-distinguishable error class for presentation logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No backend in the cascade produced usable media
    ResolutionFailed,
    /// Login wall; caller should offer a credential upload
    RestrictedContent,
    /// Worker ran but did not produce the requested media
    AcquisitionFailed,
    /// Caller went away or cancelled the job
    Cancelled,
    /// A single backend failed; the cascade retries elsewhere
    Transient,
    /// Local environment is broken (missing tools, unwritable temp dir)
    Fatal,
    /// Malformed job id, selection handle or quality token
    InvalidRequest,
}

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Every adapter in the cascade failed
    #[error("Could not resolve media: {}", .0.join(" | "))]
    ResolutionFailed(Vec<String>),

    /// Authentication, login or sign-in required
    #[error("This content requires signing in: {0}")]
    RestrictedContent(String),

    /// Extraction job failed for any other reason
    #[error("Download failed: {0}")]
    AcquisitionFailed(String),

    #[error("Download cancelled")]
    Cancelled,

    /// Backend did not answer within its deadline
    #[error("Timed out after {0}s")]
    NetworkTimeout(u64),

    #[error("Network error: {0}")]
    NetworkError(String),

    /// Non-2xx answer from a relay or library endpoint
    #[error("HTTP {status} from {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    /// Backend answered with something we could not read
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Extractor process reported failure
    #[error("Backend failed: {0}")]
    BackendFailed(String),

    /// Backend answered but pointed at nothing downloadable
    #[error("No usable media in response: {0}")]
    NoMedia(String),

    /// yt-dlp or ffmpeg not found
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Process could not be started
    #[error("Failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResolutionFailed(_) => ErrorKind::ResolutionFailed,
            Self::RestrictedContent(_) => ErrorKind::RestrictedContent,
            Self::AcquisitionFailed(_) => ErrorKind::AcquisitionFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NetworkTimeout(_)
            | Self::NetworkError(_)
            | Self::HttpStatus { .. }
            | Self::ParseError(_)
            | Self::BackendFailed(_)
            | Self::NoMedia(_) => ErrorKind::Transient,
            Self::ToolNotFound(_) | Self::Spawn { .. } | Self::Io(_) => ErrorKind::Fatal,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Retrying the same call cannot help.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    pub fn spawn(program: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return Self::ToolNotFound(program.to_string());
        }
        Self::Spawn {
            program: program.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::NetworkError(format!("request timed out: {}", err));
        }
        if let Some(status) = err.status() {
            return Self::HttpStatus {
                status: status.as_u16(),
                endpoint: err
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            };
        }
        if err.is_decode() {
            return Self::ParseError(err.to_string());
        }
        Self::NetworkError(err.to_string())
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Cut diagnostic text down to `max` characters on a char boundary.
pub fn truncate_diagnostic(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinguishable() {
        assert_eq!(
            DownloadError::RestrictedContent("sign in".into()).kind(),
            ErrorKind::RestrictedContent
        );
        assert_eq!(
            DownloadError::AcquisitionFailed("boom".into()).kind(),
            ErrorKind::AcquisitionFailed
        );
        assert_eq!(DownloadError::NetworkTimeout(10).kind(), ErrorKind::Transient);
        assert!(DownloadError::ToolNotFound("yt-dlp".into()).is_fatal());
    }

    #[test]
    fn resolution_failure_joins_reasons() {
        let err = DownloadError::ResolutionFailed(vec!["a: x".into(), "b: y".into()]);
        assert_eq!(err.to_string(), "Could not resolve media: a: x | b: y");
    }

    #[test]
    fn missing_binary_is_tool_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        assert!(matches!(
            DownloadError::spawn("yt-dlp", io),
            DownloadError::ToolNotFound(_)
        ));
    }

    #[test]
    fn truncation_is_bounded() {
        let long = "x".repeat(1000);
        let cut = truncate_diagnostic(&long, 50);
        assert_eq!(cut.chars().count(), 51);
        assert_eq!(truncate_diagnostic("  short  ", 50), "short");
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RestrictedContent).unwrap();
        assert_eq!(json, "\"restricted_content\"");
    }
}
