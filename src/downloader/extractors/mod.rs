// Resolution adapters and the cascade that drives them
//
// Three backend kinds share one contract (`InfoExtractor`):
// - Library: platform-specific services returning direct links
// - Local: the yt-dlp binary
// - Relay: public relay services, also the universal fallback
//
// `CascadeController` tries them in that order and stops at the first success.

mod cli;
mod diagnostics;
mod library;
mod orchestrator;
mod relay;
pub(crate) mod traits;

pub use cli::CliInfoExtractor;
pub use diagnostics::{classify_failure, diagnose_error, excerpt, BlockingReason};
pub use library::{
    instagram_extractor, instagram_shortcode, tiktok_extractor, DirectLink, DirectLinkSource, DirectMedia,
    InstagramSource, LibraryExtractor, TikwmSource,
};
pub use orchestrator::{CascadeController, MAX_REPORTED_FAILURES};
pub use relay::RelayExtractor;
pub use traits::{BackendKind, InfoExtractor, RawStream};
