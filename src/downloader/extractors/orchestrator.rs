// Cascade controller - ordered backend selection with fallback
//
// Strategy:
// 1. Platform-specific libraries first (cheap direct links)
// 2. Local yt-dlp next
// 3. Relay services last; the universal relay runs even if no adapter applied
// Stops at the first success, so later backends cost nothing unless needed.

use std::sync::Arc;
use tracing::{info, warn};

use super::traits::InfoExtractor;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{MediaInfo, Platform};
use crate::downloader::platform::detect_platform;

/// Reasons kept in the aggregated error; the rest is only logged
pub const MAX_REPORTED_FAILURES: usize = 3;

/// Tries resolution adapters in priority order
pub struct CascadeController {
    adapters: Vec<Arc<dyn InfoExtractor>>,
    fallback: Option<Arc<dyn InfoExtractor>>,
}

impl CascadeController {
    pub fn new(adapters: Vec<Arc<dyn InfoExtractor>>, fallback: Option<Arc<dyn InfoExtractor>>) -> Self {
        Self { adapters, fallback }
    }

    /// Applicable adapters for `platform`, Library → Local → Relay,
    /// registration order kept within a kind
    fn ordered(&self, platform: Platform) -> Vec<Arc<dyn InfoExtractor>> {
        let mut applicable: Vec<Arc<dyn InfoExtractor>> = self
            .adapters
            .iter()
            .filter(|a| a.supports(platform))
            .cloned()
            .collect();
        applicable.sort_by_key(|a| a.kind());
        applicable
    }

    fn fallback_needed(&self, tried: &[Arc<dyn InfoExtractor>]) -> Option<Arc<dyn InfoExtractor>> {
        let fallback = self.fallback.as_ref()?;
        if tried.iter().any(|a| Arc::ptr_eq(a, fallback)) {
            return None;
        }
        Some(fallback.clone())
    }

    /// Adapter names in the order `resolve` would call them
    pub fn plan_for(&self, platform: Platform) -> Vec<String> {
        let ordered = self.ordered(platform);
        let fallback = self.fallback_needed(&ordered);
        ordered
            .iter()
            .chain(fallback.iter())
            .map(|a| a.name().to_string())
            .collect()
    }

    /// Resolve `url` through the cascade
    pub async fn resolve(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        let platform = detect_platform(url);
        let ordered = self.ordered(platform);
        let fallback = self.fallback_needed(&ordered);
        info!(
            "[Cascade] {} URL, {} adapter(s){}",
            platform,
            ordered.len(),
            if fallback.is_some() { " + relay fallback" } else { "" }
        );

        let mut failures: Vec<String> = Vec::new();
        // Later backends may still succeed, but a retry of the whole call cannot
        let mut fatal: Option<DownloadError> = None;
        for adapter in ordered.iter().chain(fallback.iter()) {
            match adapter.extract(url).await {
                Ok(info) => {
                    info!(
                        "[Cascade] {} resolved \"{}\" with {} format(s)",
                        adapter.name(),
                        info.title,
                        info.formats.len()
                    );
                    return Ok(info);
                }
                Err(DownloadError::ResolutionFailed(reasons)) => {
                    for reason in reasons {
                        warn!("[Cascade] {} failed: {}", adapter.name(), reason);
                        failures.push(format!("{}: {}", adapter.name(), reason));
                    }
                }
                Err(e) => {
                    warn!("[Cascade] {} failed: {}", adapter.name(), e);
                    failures.push(format!("{}: {}", adapter.name(), e));
                    if e.is_fatal() && fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        }

        if let Some(err) = fatal {
            warn!("[Cascade] exhausted with a local failure: {}", failures.join(" | "));
            return Err(err);
        }

        if failures.is_empty() {
            failures.push("no backend available for this URL".to_string());
        }
        failures.truncate(MAX_REPORTED_FAILURES);
        Err(DownloadError::ResolutionFailed(failures))
    }
}
