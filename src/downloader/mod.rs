// Downloader module - media resolution and acquisition

pub mod artifact;
pub mod backends;
pub mod config;
pub mod errors;
pub mod extractors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod platform;
pub mod progress;
pub mod tools;
pub mod traits;
pub mod utils;

pub use artifact::{Acquisition, DeliveredArtifact};
pub use config::Config;
pub use errors::{DownloadError, ErrorKind};
pub use models::{Format, JobStatus, MediaInfo, MediaKind, Platform, ProgressEvent, Quality, SelectionHandle};
pub use orchestrator::{AcquireRequest, AcquisitionPlan, Downloader};
pub use progress::{ProgressEmitter, ProgressSubscription};
pub use traits::DownloaderBackend;
