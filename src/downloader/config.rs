// Process-wide configuration, read once at startup and shared read-only

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::tools::{ToolManager, ToolType};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const DEFAULT_RELAYS: &[&str] = &[
    "https://cobalt-backend.canine.tools/",
    "https://api.cobalt.tools/",
];

pub const DEFAULT_TIKWM_ENDPOINT: &str = "https://www.tikwm.com/api/";

pub const DEFAULT_INSTAGRAM_ENDPOINT: &str = "https://www.instagram.com/graphql/query";

const DEFAULT_RESOLVE_TIMEOUT_SECONDS: u64 = 25;
const DEFAULT_CLEANUP_GRACE_SECONDS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    /// yt-dlp binary
    pub ytdlp_path: String,
    /// ffmpeg binary used for merging/remuxing
    pub ffmpeg_path: String,
    /// Netscape/JSON cookie store, attached only while it exists on disk
    pub cookies_path: Option<PathBuf>,
    /// Directory for per-job temporary artifacts
    pub temp_dir: PathBuf,
    /// Relay service endpoints, tried in shuffled order
    pub relay_endpoints: Vec<String>,
    /// TikTok direct-link API; `None` disables the TikTok library adapter
    pub tikwm_endpoint: Option<String>,
    /// Instagram post lookup endpoint; `None` disables the Instagram library adapter
    pub instagram_endpoint: Option<String>,
    /// Deadline for metadata resolution calls
    pub resolve_timeout_seconds: u64,
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Muxed container every video job is normalized to
    pub output_container: String,
    /// Container for audio-only jobs
    pub audio_container: String,
    pub user_agent: String,
    /// Delay before a delivered artifact is removed
    pub cleanup_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            cookies_path: None,
            temp_dir: default_temp_dir(),
            relay_endpoints: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            tikwm_endpoint: Some(DEFAULT_TIKWM_ENDPOINT.to_string()),
            instagram_endpoint: Some(DEFAULT_INSTAGRAM_ENDPOINT.to_string()),
            resolve_timeout_seconds: DEFAULT_RESOLVE_TIMEOUT_SECONDS,
            proxy: None,
            output_container: "mp4".to_string(),
            audio_container: "m4a".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cleanup_grace: Duration::from_secs(DEFAULT_CLEANUP_GRACE_SECONDS),
        }
    }
}

impl Config {
    /// Build configuration from `MEDIAGRAB_*` variables, filling gaps with
    /// auto-detected tool paths and defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let tools = ToolManager::new();

        let ytdlp_path = read_string_env("MEDIAGRAB_YTDLP")
            .or_else(|| tools.get_tool_info(ToolType::YtDlp).path)
            .unwrap_or(defaults.ytdlp_path);
        let ffmpeg_path = read_string_env("MEDIAGRAB_FFMPEG")
            .or_else(|| tools.get_tool_info(ToolType::Ffmpeg).path)
            .unwrap_or(defaults.ffmpeg_path);

        let cookies_path = read_string_env("MEDIAGRAB_COOKIES")
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("cookies.txt")));

        let relay_endpoints = read_string_env("MEDIAGRAB_RELAYS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or(defaults.relay_endpoints);

        let tikwm_endpoint = read_endpoint_env("MEDIAGRAB_TIKWM_ENDPOINT", defaults.tikwm_endpoint);
        let instagram_endpoint =
            read_endpoint_env("MEDIAGRAB_INSTAGRAM_ENDPOINT", defaults.instagram_endpoint);

        Self {
            ytdlp_path,
            ffmpeg_path,
            cookies_path,
            temp_dir: read_string_env("MEDIAGRAB_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            relay_endpoints,
            tikwm_endpoint,
            instagram_endpoint,
            resolve_timeout_seconds: read_u64_env("MEDIAGRAB_RESOLVE_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.resolve_timeout_seconds),
            proxy: read_string_env("MEDIAGRAB_PROXY"),
            output_container: read_string_env("MEDIAGRAB_CONTAINER")
                .unwrap_or(defaults.output_container),
            audio_container: defaults.audio_container,
            user_agent: defaults.user_agent,
            cleanup_grace: read_u64_env("MEDIAGRAB_CLEANUP_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_grace),
        }
    }

    pub fn with_ytdlp_path(mut self, path: impl Into<String>) -> Self {
        self.ytdlp_path = path.into();
        self
    }

    pub fn with_cookies_path(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_relays(mut self, endpoints: Vec<String>) -> Self {
        self.relay_endpoints = endpoints;
        self
    }

    pub fn with_tikwm_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.tikwm_endpoint = endpoint;
        self
    }

    pub fn with_instagram_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.instagram_endpoint = endpoint;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.resolve_timeout_seconds = seconds;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        self.cleanup_grace = grace;
        self
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_seconds)
    }

    /// Cookie file, if configured and currently present on disk
    pub fn cookies_file(&self) -> Option<&Path> {
        self.cookies_path.as_deref().filter(|p| p.is_file())
    }

    /// Flags shared by metadata and download invocations of yt-dlp
    pub fn network_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-check-certificates".to_string(),
            "--no-warnings".to_string(),
            "--geo-bypass".to_string(),
            // IPv6 ranges are throttled far more often
            "--force-ipv4".to_string(),
            "--user-agent".to_string(),
            self.user_agent.clone(),
        ];

        if let Some(path) = self.cookies_file() {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().to_string());
        }

        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args
    }

    /// HTTP client for relay and library backends, bounded by the resolve timeout
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.resolve_timeout())
            .user_agent(self.user_agent.clone());

        if let Some(proxy) = self.proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        builder.build()
    }
}

fn default_temp_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mediagrab")
        .join("tmp")
}

fn read_string_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Endpoint override; `off` disables the backend
fn read_endpoint_env(key: &str, default: Option<String>) -> Option<String> {
    match read_string_env(key) {
        Some(value) if value.eq_ignore_ascii_case("off") => None,
        Some(value) => Some(value),
        None => default,
    }
}

fn read_u64_env(key: &str) -> Option<u64> {
    read_string_env(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cookie_file_is_not_attached() {
        let config = Config::default()
            .with_cookies_path(Some(PathBuf::from("/definitely/not/here/cookies.txt")));
        assert!(config.cookies_file().is_none());
        assert!(!config.network_args().contains(&"--cookies".to_string()));
    }

    #[test]
    fn present_cookie_file_is_attached() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = dir.path().join("cookies.txt");
        std::fs::write(&cookies, "# Netscape HTTP Cookie File\n").unwrap();

        let config = Config::default().with_cookies_path(Some(cookies.clone()));
        let args = config.network_args();
        let idx = args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(args[idx + 1], cookies.to_string_lossy());
    }

    #[test]
    fn network_args_carry_identity_and_proxy() {
        let config = Config::default().with_proxy(Some("socks5h://127.0.0.1:1080".into()));
        let args = config.network_args();
        assert!(args.contains(&"--force-ipv4".to_string()));
        assert!(args.contains(&DEFAULT_USER_AGENT.to_string()));
        assert!(args.contains(&"socks5h://127.0.0.1:1080".to_string()));
    }
}
