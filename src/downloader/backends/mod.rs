// Acquisition workers

pub mod ytdlp;

pub use ytdlp::YtDlpWorker;
