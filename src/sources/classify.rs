use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// File extensions played straight from a URL.
pub const SUPPORTED_EXTENSIONS: [&str; 8] =
    [".webm", ".mp4", ".mp3", ".avi", ".wav", ".m4v", ".ogg", ".mov"];

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:[a-zA-Z]|[0-9]|[$-_@.&+]|[!*(),]|%[0-9a-fA-F][0-9a-fA-F])+")
        .expect("url pattern is valid")
});

/// Site a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKind {
    YouTube,
    Spotify,
    Twitter,
    SoundCloud,
    Bandcamp,
    DirectFile,
    Unknown,
}

impl SiteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteKind::YouTube => "YouTube",
            SiteKind::Spotify => "Spotify",
            SiteKind::Twitter => "Twitter",
            SiteKind::SoundCloud => "SoundCloud",
            SiteKind::Bandcamp => "Bandcamp",
            SiteKind::DirectFile => "Direct file",
            SiteKind::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaylistKind {
    YouTube,
    YouTubeMusic,
    Spotify,
    Bandcamp,
}

impl PlaylistKind {
    /// YouTube Music "playlists" are radio mixes; the linked song is played on its own.
    pub fn is_expandable(&self) -> bool {
        !matches!(self, PlaylistKind::YouTubeMusic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub site: SiteKind,
    pub playlist: Option<PlaylistKind>,
}

impl Classification {
    /// Playlist kind when the reference should be expanded into several tracks.
    pub fn expandable_playlist(&self) -> Option<PlaylistKind> {
        self.playlist.filter(PlaylistKind::is_expandable)
    }
}

/// Classifies a user supplied reference. Pure string matching, never fails.
pub fn classify(reference: &str) -> Classification {
    Classification {
        site: identify_site(reference),
        playlist: identify_playlist(reference),
    }
}

fn identify_site(url: &str) -> SiteKind {
    if url.contains("https://www.youtu")
        || url.contains("https://youtu.be")
        || url.contains("https://music.youtube")
    {
        return SiteKind::YouTube;
    }

    if url.contains("https://open.spotify.com/track")
        || url.contains("https://open.spotify.com/playlist")
        || url.contains("https://open.spotify.com/album")
    {
        return SiteKind::Spotify;
    }

    if url.contains("bandcamp.com/track/") || url.contains("bandcamp.com/album/") {
        return SiteKind::Bandcamp;
    }

    if url.contains("https://twitter.com/") || url.contains("https://x.com/") {
        return SiteKind::Twitter;
    }

    let lower = url.to_lowercase();
    if SUPPORTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return SiteKind::DirectFile;
    }

    if url.contains("soundcloud.com/") {
        return SiteKind::SoundCloud;
    }

    SiteKind::Unknown
}

fn identify_playlist(url: &str) -> Option<PlaylistKind> {
    if url.contains("https://music.youtube.com") && url.contains("list=") {
        return Some(PlaylistKind::YouTubeMusic);
    }

    if url.contains("list=") {
        return Some(PlaylistKind::YouTube);
    }

    if url.contains("https://open.spotify.com/playlist")
        || url.contains("https://open.spotify.com/album")
    {
        return Some(PlaylistKind::Spotify);
    }

    if url.contains("bandcamp.com/album/") {
        return Some(PlaylistKind::Bandcamp);
    }

    None
}

/// First http(s) URL contained in `content`.
pub fn extract_url(content: &str) -> Option<&str> {
    URL_REGEX.find(content).map(|m| m.as_str())
}

/// Drops the playlist part of a YouTube watch link so only the video is played.
pub fn strip_playlist_params(reference: &str) -> String {
    let Ok(mut url) = Url::parse(reference) else {
        return reference.split("&list=").next().unwrap_or(reference).to_string();
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "list" && key != "index")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    url.to_string()
}

/// Rewrites mobile SoundCloud links (`m.soundcloud.com`) to the desktop host.
pub fn clean_mobile_link(reference: &str) -> String {
    if let Some(rest) = reference.strip_prefix("https://m.") {
        return format!("https://{}", rest);
    }
    if let Some(rest) = reference.strip_prefix("http://m.") {
        return format!("https://{}", rest);
    }
    reference.to_string()
}
