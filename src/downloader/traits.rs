// Downloader backend trait definition

use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::format_selector::FormatSelection;
use super::models::AcquisitionJob;
use super::progress::ProgressEmitter;

/// Trait for acquisition worker implementations
#[async_trait]
pub trait DownloaderBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Fetch and merge `job` into a single artifact, returning its path.
    ///
    /// Must stop the underlying process and remove partial output once
    /// `cancel` fires.
    async fn download(
        &self,
        job: &AcquisitionJob,
        selection: &FormatSelection,
        emitter: ProgressEmitter,
        cancel: CancellationToken,
    ) -> Result<PathBuf, DownloadError>;
}
