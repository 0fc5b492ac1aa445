//! URL sniffing for `kind=auto` submissions.

use url::Url;

use crate::job_store::JobKind;

/// Infer the concrete kind from host and path patterns. Unknown hosts fall
/// back to a plain file download.
pub fn sniff_kind(raw_url: &str) -> JobKind {
    let Ok(parsed) = Url::parse(raw_url) else {
        return JobKind::File;
    };
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    let path = parsed.path().to_ascii_lowercase();

    if host_matches(&host, &["youtube.com", "youtu.be"]) {
        return JobKind::Youtube;
    }
    if host_matches(&host, &["twitter.com", "x.com"]) {
        return JobKind::Twitter;
    }
    if host_matches(&host, &["pinterest.com", "pin.it"]) || host.starts_with("pinterest.") {
        return JobKind::Pinterest;
    }
    if path.ends_with(".m3u8") {
        return JobKind::Hls;
    }
    JobKind::File
}

fn host_matches(host: &str, domains: &[&str]) -> bool {
    domains
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}
