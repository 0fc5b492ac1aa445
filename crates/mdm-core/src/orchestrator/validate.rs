//! Submission validation: URL scheme, option bounds, header allow-list, and
//! filename-hint sanitization.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use super::SubmitRequest;

/// Request headers a submission may set on the downloader.
const ALLOWED_EXTRA_HEADERS: &[&str] = &["user-agent", "referer", "authorization", "cookie", "accept"];

fn resolution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+x\d+$").unwrap())
}

/// Validate a submission in place (the filename hint is sanitized). Returns
/// a human-readable reason on rejection.
pub fn validate_submit(req: &mut SubmitRequest) -> Result<(), String> {
    let parsed = Url::parse(&req.url).map_err(|e| format!("url does not parse: {}", e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported url scheme: {}", parsed.scheme()));
    }
    if parsed.host_str().is_none() {
        return Err("url has no host".to_string());
    }

    if let Some(hint) = req.options.filename_hint.take() {
        let sanitized = sanitize_filename(&hint);
        if sanitized.is_empty() {
            return Err("filename hint is empty after sanitization".to_string());
        }
        req.options.filename_hint = Some(sanitized);
    }

    if let Some(headers) = req.options.headers.as_ref() {
        for name in headers.extra.keys() {
            if !ALLOWED_EXTRA_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                return Err(format!("header not allowed: {}", name));
            }
        }
    }

    if let Some(transcode) = req.options.transcode.as_ref() {
        if !(1..=51).contains(&transcode.crf) {
            return Err(format!("crf out of range: {}", transcode.crf));
        }
    }

    if let Some(twitter) = req.options.twitter.as_ref() {
        if !(1..=200).contains(&twitter.max_tweets) {
            return Err(format!("maxTweets out of range: {}", twitter.max_tweets));
        }
        if twitter.tweet_id.is_none() && twitter.username.is_none() {
            return Err("twitter options need a tweetId or username".to_string());
        }
    }

    if let Some(pinterest) = req.options.pinterest.as_ref() {
        if !(1..=500).contains(&pinterest.max_images) {
            return Err(format!("maxImages out of range: {}", pinterest.max_images));
        }
        if let Some(resolution) = pinterest.resolution.as_deref() {
            if !resolution_re().is_match(resolution) {
                return Err(format!("resolution must be WxH: {}", resolution));
            }
        }
    }

    Ok(())
}

/// Sanitize a filename hint for safe use on Linux.
///
/// - Replaces NUL, `/`, `\`, whitespace, and control characters with `_`
/// - Trims leading/trailing spaces, dots, and underscores
/// - Collapses consecutive underscores
/// - Limits length to 255 bytes (NAME_MAX)
pub fn sanitize_filename(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replacement = if c == '\0' || c == '/' || c == '\\' || c.is_control() {
            '_'
        } else if c == ' ' || c == '\t' {
            '_'
        } else {
            c
        };

        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '\t' || c == '.' || c == '_');

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}
