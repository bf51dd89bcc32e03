// Platform sniffing from URL strings
//
// Purely string based: no redirects are followed and no network is touched.

use super::models::Platform;

/// Known hostnames per platform, checked in order, first match wins
const PLATFORM_DOMAINS: &[(Platform, &[&str])] = &[
    (Platform::YouTube, &["youtube.com", "youtu.be"]),
    (Platform::TikTok, &["tiktok.com"]),
    (Platform::Instagram, &["instagram.com"]),
    (Platform::Facebook, &["facebook.com", "fb.watch"]),
    (Platform::Twitter, &["twitter.com", "x.com"]),
];

/// Detect the platform owning `url`.
///
/// When the string parses as a URL the host is compared against each domain
/// (exact or subdomain match) so that `netflix.com` is not taken for `x.com`.
/// Anything unparseable falls back to a plain case-insensitive substring check.
pub fn detect_platform(url: &str) -> Platform {
    let lower = url.trim().to_lowercase();

    let host = url::Url::parse(&lower)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()));

    for (platform, domains) in PLATFORM_DOMAINS {
        let hit = domains.iter().any(|domain| match &host {
            Some(host) => host == domain || host.ends_with(&format!(".{}", domain)),
            None => lower.contains(domain),
        });
        if hit {
            return *platform;
        }
    }

    Platform::Unknown
}
