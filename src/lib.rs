pub mod downloader;

pub use downloader::{
    AcquireRequest, Acquisition, Config, DeliveredArtifact, DownloadError, Downloader, ErrorKind, Format,
    JobStatus, MediaInfo, MediaKind, Platform, ProgressEvent, Quality, SelectionHandle,
};
