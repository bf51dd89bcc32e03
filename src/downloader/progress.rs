// Progress channel - yt-dlp output parsing and per-job subscriber registry
//
// Workers push events through a `ProgressEmitter`; callers hold a
// `ProgressSubscription` for the same job id. Events for jobs nobody watches
// are dropped, and a subscription unregisters itself when dropped.

use futures::Stream;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

use super::errors::truncate_diagnostic;
use super::models::{JobStatus, ProgressEvent};
use super::utils::strip_ansi;

const RAW_LINE_CHARS: usize = 160;

lazy_static! {
    // [download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
    static ref PROGRESS_RE: Regex = Regex::new(
        r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*(\d+\.?\d*\s*\w+)(?:\s+at\s+(\S+(?:\s*\w+/s)?))?(?:\s+ETA\s+(\S+))?(?:\s+\(frag\s+(\d+)/(\d+)\))?"
    ).unwrap();
    static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
    static ref MERGE_RE: Regex = Regex::new(r"\[Merger?\]\s+Merging").unwrap();
    static ref POSTPROCESS_RE: Regex = Regex::new(r"^\[(ExtractAudio|VideoRemuxer|FixupM3u8|FixupM4a)\]").unwrap();
    static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").unwrap();
}

/// What one line of worker output says about the job
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProgress {
    pub status: JobStatus,
    /// `None` for lines that carry no percentage
    pub percent: Option<f32>,
    pub message: String,
}

/// Parse yt-dlp output like:
/// [download]   6.2% of ~ 343.72MiB at  420.30KiB/s ETA 12:32 (frag 29/454)
///
/// Unrecognized non-empty lines come back as raw text events.
pub fn parse_progress_line(line: &str) -> Option<ParsedProgress> {
    let line = strip_ansi(line);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        let size = caps.get(2).map(|m| m.as_str()).unwrap_or("?");
        let speed = caps.get(3).map(|m| m.as_str()).unwrap_or("?");
        let eta = caps.get(4).map(|m| m.as_str()).unwrap_or("");

        let message = match (caps.get(5), caps.get(6)) {
            (Some(fc), Some(ft)) => format!(
                "{:.1}% of {} @ {} ETA {} (frag {}/{})",
                percent,
                size,
                speed,
                eta,
                fc.as_str(),
                ft.as_str()
            ),
            _ if !eta.is_empty() => format!("{:.1}% of {} @ {} ETA {}", percent, size, speed, eta),
            _ => format!("{:.1}% of {} @ {}", percent, size, speed),
        };

        return Some(ParsedProgress {
            status: JobStatus::Downloading,
            percent: Some(percent),
            message,
        });
    }

    if let Some(caps) = DEST_RE.captures(line) {
        let filename = caps.get(1).map(|m| m.as_str()).unwrap_or("file");
        let short_name: String = filename
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(filename)
            .chars()
            .take(50)
            .collect();
        return Some(ParsedProgress {
            status: JobStatus::Downloading,
            percent: None,
            message: format!("Starting: {}", short_name),
        });
    }

    if MERGE_RE.is_match(line) {
        return Some(ParsedProgress {
            status: JobStatus::Merging,
            percent: Some(99.0),
            message: "Merging video and audio".to_string(),
        });
    }

    if let Some(caps) = POSTPROCESS_RE.captures(line) {
        return Some(ParsedProgress {
            status: JobStatus::Merging,
            percent: Some(99.0),
            message: format!("Post-processing ({})", &caps[1]),
        });
    }

    if ALREADY_RE.is_match(line) {
        return Some(ParsedProgress {
            status: JobStatus::Downloading,
            percent: Some(100.0),
            message: "File already downloaded".to_string(),
        });
    }

    Some(ParsedProgress {
        status: JobStatus::Downloading,
        percent: None,
        message: truncate_diagnostic(line, RAW_LINE_CHARS),
    })
}

struct Registration {
    token: u64,
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

/// Registry of live progress subscribers, keyed by job id
#[derive(Clone, Default)]
pub struct ProgressHub {
    subscribers: Arc<Mutex<HashMap<String, Registration>>>,
    next_token: Arc<AtomicU64>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `job_id`. A newer subscription for the same id replaces this one.
    pub fn subscribe(&self, job_id: &str) -> ProgressSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .insert(job_id.to_string(), Registration { token, sender });
        debug!("[Progress] subscriber attached to {}", job_id);

        ProgressSubscription {
            job_id: job_id.to_string(),
            token,
            receiver,
            hub: self.clone(),
        }
    }

    pub fn emitter(&self, job_id: &str) -> ProgressEmitter {
        ProgressEmitter {
            hub: self.clone(),
            job_id: job_id.to_string(),
            last_percent: 0.0,
            closed: false,
        }
    }

    #[cfg(test)]
    pub fn is_subscribed(&self, job_id: &str) -> bool {
        self.subscribers.lock().contains_key(job_id)
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver to the current subscriber, dropping the entry if it is gone
    fn send(&self, event: ProgressEvent) {
        let mut subscribers = self.subscribers.lock();
        let failed = match subscribers.get(&event.job_id) {
            Some(registration) => registration.sender.send(event.clone()).is_err(),
            None => false,
        };
        if failed {
            debug!("[Progress] subscriber for {} went away", event.job_id);
            subscribers.remove(&event.job_id);
        }
    }

    fn close(&self, job_id: &str) {
        self.subscribers.lock().remove(job_id);
    }

    fn unregister(&self, job_id: &str, token: u64) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.get(job_id).map_or(false, |r| r.token == token) {
            subscribers.remove(job_id);
        }
    }
}

/// Receiving side of a job's progress channel.
///
/// Yields `None` once the job reached a terminal status or a newer
/// subscription took over.
pub struct ProgressSubscription {
    job_id: String,
    token: u64,
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
    hub: ProgressHub,
}

impl ProgressSubscription {
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }
}

impl Stream for ProgressSubscription {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.hub.unregister(&self.job_id, self.token);
    }
}

/// Sending side handed to workers
pub struct ProgressEmitter {
    hub: ProgressHub,
    job_id: String,
    last_percent: f32,
    closed: bool,
}

impl ProgressEmitter {
    /// Push an event; percent never goes backwards within a job.
    pub fn emit(&mut self, status: JobStatus, percent: Option<f32>, message: impl Into<String>) {
        if self.closed {
            return;
        }
        if let Some(p) = percent.filter(|p| p.is_finite()) {
            self.last_percent = self.last_percent.max(p.clamp(0.0, 100.0));
        }

        self.hub.send(ProgressEvent {
            job_id: self.job_id.clone(),
            status,
            percent: self.last_percent,
            message: message.into(),
        });

        if status.is_terminal() {
            self.closed = true;
            self.hub.close(&self.job_id);
        }
    }

    /// Parse one worker output line and forward it if it means anything
    pub fn emit_line(&mut self, line: &str) {
        if let Some(parsed) = parse_progress_line(line) {
            self.emit(parsed.status, parsed.percent, parsed.message);
        }
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        self.emit(JobStatus::Complete, Some(100.0), message);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.emit(JobStatus::Error, None, message);
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_parse_download_line() {
        let parsed = parse_progress_line(
            "[download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)",
        )
        .unwrap();
        assert_eq!(parsed.status, JobStatus::Downloading);
        assert_eq!(parsed.percent, Some(12.5));
        assert!(parsed.message.contains("frag 56/454"));

        let parsed = parse_progress_line("[download]  42.0% of 10.00MiB at 1.00MiB/s ETA 00:06").unwrap();
        assert_eq!(parsed.percent, Some(42.0));
        assert!(parsed.message.contains("ETA 00:06"));

        // final line has no rate
        let parsed = parse_progress_line("[download] 100% of   10.00MiB in 00:00:03 at 3.10MiB/s").unwrap();
        assert_eq!(parsed.percent, Some(100.0));
    }

    #[test]
    fn test_parse_ansi_coloured_line() {
        let parsed = parse_progress_line("\x1b[0;94m[download]\x1b[0m  55.0% of 1.00GiB at 2.00MiB/s ETA 04:00").unwrap();
        assert_eq!(parsed.percent, Some(55.0));
    }

    #[test]
    fn test_parse_merge_destination_and_raw() {
        let merge = parse_progress_line("[Merger] Merging formats into \"/tmp/abc.mp4\"").unwrap();
        assert_eq!(merge.status, JobStatus::Merging);
        assert_eq!(merge.percent, Some(99.0));

        let dest = parse_progress_line("[download] Destination: /tmp/mediagrab/abc.f137.mp4").unwrap();
        assert_eq!(dest.percent, None);
        assert_eq!(dest.message, "Starting: abc.f137.mp4");

        let already = parse_progress_line("[download] /tmp/x.mp4 has already been downloaded").unwrap();
        assert_eq!(already.percent, Some(100.0));

        let audio = parse_progress_line("[ExtractAudio] Destination: /tmp/x.m4a").unwrap();
        assert_eq!(audio.status, JobStatus::Merging);

        let raw = parse_progress_line("[youtube] abc: Downloading webpage").unwrap();
        assert_eq!(raw.percent, None);
        assert_eq!(raw.message, "[youtube] abc: Downloading webpage");

        assert!(parse_progress_line("   \r").is_none());
    }

    #[tokio::test]
    async fn test_events_reach_subscriber_and_percent_is_monotonic() {
        let hub = ProgressHub::new();
        let mut sub = hub.subscribe("job1");
        let mut emitter = hub.emitter("job1");

        emitter.emit(JobStatus::Downloading, Some(40.0), "a");
        emitter.emit(JobStatus::Downloading, Some(10.0), "b");
        emitter.emit(JobStatus::Downloading, None, "c");
        emitter.complete("done");

        let events: Vec<ProgressEvent> = sub.by_ref().collect().await;
        let percents: Vec<f32> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![40.0, 40.0, 40.0, 100.0]);
        assert_eq!(events.last().unwrap().status, JobStatus::Complete);
        assert!(events.iter().all(|e| e.job_id == "job1"));
    }

    #[tokio::test]
    async fn test_terminal_event_closes_channel() {
        let hub = ProgressHub::new();
        let mut sub = hub.subscribe("job2");
        let mut emitter = hub.emitter("job2");

        emitter.fail("boom");
        emitter.emit(JobStatus::Downloading, Some(50.0), "late");

        assert_eq!(sub.recv().await.unwrap().status, JobStatus::Error);
        assert!(sub.recv().await.is_none());
        assert!(!hub.is_subscribed("job2"));
        assert!(emitter.is_closed());
    }

    #[test]
    fn test_dropped_subscription_unregisters() {
        let hub = ProgressHub::new();
        let sub = hub.subscribe("job3");
        assert!(hub.is_subscribed("job3"));
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);

        // events without a subscriber are simply dropped
        let mut emitter = hub.emitter("job3");
        emitter.emit(JobStatus::Downloading, Some(1.0), "nobody listening");
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_stale_subscription_drop_keeps_newer_one() {
        let hub = ProgressHub::new();
        let old = hub.subscribe("job4");
        let _new = hub.subscribe("job4");
        drop(old);
        assert!(hub.is_subscribed("job4"));
    }

    #[tokio::test]
    async fn test_closed_receiver_is_removed_on_send() {
        let hub = ProgressHub::new();
        let mut sub = hub.subscribe("job5");
        sub.receiver.close();

        let mut emitter = hub.emitter("job5");
        emitter.emit(JobStatus::Downloading, Some(5.0), "x");
        assert!(!hub.is_subscribed("job5"));
    }
}
