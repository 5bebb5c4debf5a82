//! Title lookup for Spotify links.
//!
//! Spotify serves no stream the extractor can play, so a track link is turned
//! into "Artist Song" text from the page `<title>` and searched on YouTube.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use super::{classify::extract_url, ResolveError};

static TITLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern is valid"));

// "| Spotify Web Player" must go before "| Spotify".
const TITLE_NOISE: [&str; 5] = [
    "| Spotify Web Player",
    "| Spotify",
    "- song and lyrics by",
    "- song by",
    "- single by",
];

/// Share links (`?si=`) redirect to an app landing page unless `nd=1` is set.
pub fn normalize_share_url(reference: &str) -> String {
    let url = extract_url(reference).unwrap_or(reference);
    if url.contains("?si=") {
        format!("{}&nd=1", url)
    } else {
        url.to_string()
    }
}

/// Pulls the `<title>` out of a page and strips the service's decorations.
pub fn clean_page_title(html: &str) -> Option<String> {
    let raw = TITLE_REGEX.captures(html)?.get(1)?.as_str();

    let mut title = decode_entities(raw.trim());
    for noise in TITLE_NOISE {
        title = title.replace(noise, " ");
    }

    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Fetches the page behind a Spotify link and returns its cleaned title.
pub async fn fetch_title(http: &reqwest::Client, reference: &str) -> Result<String, ResolveError> {
    let url = normalize_share_url(reference);
    debug!("🌐 Fetching track page {}", url);

    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| ResolveError::transient(format!("track page request failed: {}", e)))?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ResolveError::unresolvable("the track page does not exist"));
    }
    if !status.is_success() {
        return Err(ResolveError::transient(format!("track page answered {}", status)));
    }

    let page = response
        .text()
        .await
        .map_err(|e| ResolveError::transient(format!("track page unreadable: {}", e)))?;

    clean_page_title(&page).ok_or_else(|| ResolveError::unresolvable("the track page has no title"))
}
