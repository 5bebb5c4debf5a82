use async_process::{Command, Stdio};
use async_trait::async_trait;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use tracing::{debug, info, warn};

use super::{
    classify::{extract_url, SiteKind},
    track_service, MediaResolver, Origin, PlaylistKind, ResolveError, ResolvedMedia, Track,
    TrackMetadata,
};
use crate::config::Config;

/// Stderr fragments that mean retrying is pointless.
const PERMANENT_FAILURES: [&str; 10] = [
    "sign in to confirm your age",
    "age-restricted",
    "private video",
    "video unavailable",
    "this video has been removed",
    "has been terminated",
    "not available in your country",
    "unsupported url",
    "is not a valid url",
    "requested format is not available",
];

/// [`MediaResolver`] backed by the `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary: String,
    cookie_path: Option<PathBuf>,
    timeout: Duration,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
    webpage_url: Option<String>,
    #[serde(default)]
    requested_formats: Vec<RequestedFormat>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct RequestedFormat {
    url: String,
    acodec: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    #[serde(default)]
    entries: Vec<FlatEntry>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
}

impl YtDlpResolver {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(config.crawler_agent.clone())
            .timeout(config.resolve_timeout)
            .build()
            .unwrap_or_default();

        Self {
            binary: config.ytdlp_path.clone(),
            cookie_path: config.cookie_path.clone(),
            timeout: config.resolve_timeout,
            http,
        }
    }

    /// Runs yt-dlp with the common flags and returns its stdout.
    async fn run(&self, args: &[&str]) -> Result<String, ResolveError> {
        let mut command = Command::new(&self.binary);
        command.args(["--no-warnings", "--quiet", "--ignore-config"]);
        if let Some(cookies) = &self.cookie_path {
            command.arg("--cookies").arg(cookies);
        }
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| ResolveError::transient(format!("could not start {}: {}", self.binary, e)))?;

        let output = tokio::time::timeout(self.timeout, child.output())
            .await
            .map_err(|_| {
                ResolveError::transient(format!(
                    "extractor timed out after {}",
                    humantime::format_duration(self.timeout)
                ))
            })?
            .map_err(|e| ResolveError::transient(format!("extractor failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// yt-dlp is on PATH (or at the configured path) and answers `--version`.
    pub async fn health_check(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("could not run {}: {}", self.binary, e))?;

        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", self.binary, output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, reference: &str) -> Result<ResolvedMedia, ResolveError> {
        debug!("🎵 Resolving {}", reference);
        let stdout = self
            .run(&[
                "--dump-single-json",
                "--no-playlist",
                "-f",
                "bestaudio/best",
                reference,
            ])
            .await?;

        parse_media(&stdout, reference)
    }

    async fn expand_playlist(
        &self,
        reference: &str,
        kind: PlaylistKind,
    ) -> Result<Vec<Track>, ResolveError> {
        if kind == PlaylistKind::Spotify {
            return Err(ResolveError::unresolvable(
                "Spotify playlists and albums cannot be listed, queue the songs one by one",
            ));
        }

        info!("📋 Expanding playlist {}", reference);
        let stdout = self
            .run(&["--flat-playlist", "--dump-single-json", reference])
            .await?;

        let site = match kind {
            PlaylistKind::Bandcamp => SiteKind::Bandcamp,
            _ => SiteKind::YouTube,
        };

        let tracks: Vec<Track> = parse_playlist(&stdout, kind)?
            .into_iter()
            .map(|entry| Track::new(Origin::Playlist, site, entry))
            .collect();

        info!("📋 Playlist {} expanded into {} entries", reference, tracks.len());
        Ok(tracks)
    }

    async fn search_by_title(&self, text: &str) -> Result<Option<String>, ResolveError> {
        if let Some(url) = extract_url(text) {
            return Ok(Some(url.to_string()));
        }

        let query = format!("ytsearch1:{}", text.trim());
        debug!("🔍 Searching for {}", query);
        let stdout = self
            .run(&["--flat-playlist", "--dump-single-json", &query])
            .await?;

        Ok(parse_playlist(&stdout, PlaylistKind::YouTube)?.into_iter().next())
    }

    async fn track_service_title(&self, reference: &str) -> Result<String, ResolveError> {
        let title = track_service::fetch_title(&self.http, reference).await?;
        debug!("🎧 {} is titled '{}'", reference, title);
        Ok(title)
    }
}

/// Maps yt-dlp stderr to a permanent or transient failure.
pub fn classify_failure(stderr: &str) -> ResolveError {
    let reason = stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .unwrap_or_else(|| stderr.trim())
        .trim_start_matches("ERROR:")
        .trim()
        .to_string();

    let lower = stderr.to_lowercase();
    if PERMANENT_FAILURES.iter().any(|pattern| lower.contains(pattern)) {
        ResolveError::Unresolvable(reason)
    } else {
        warn!("⚠️ Extractor failure treated as transient: {}", reason);
        ResolveError::Transient(reason)
    }
}

fn parse_media(stdout: &str, reference: &str) -> Result<ResolvedMedia, ResolveError> {
    let info: YtDlpInfo = serde_json::from_str(stdout.trim())
        .map_err(|e| ResolveError::transient(format!("unreadable extractor output: {}", e)))?;

    // Merged formats put the audio stream in requested_formats instead of url.
    let stream_url = info
        .url
        .clone()
        .or_else(|| {
            info.requested_formats
                .iter()
                .find(|format| format.acodec.as_deref().is_some_and(|codec| codec != "none"))
                .map(|format| format.url.clone())
        })
        .ok_or_else(|| ResolveError::unresolvable("no playable audio stream"))?;

    let thumbnail = info
        .thumbnails
        .last()
        .map(|thumb| thumb.url.clone())
        .or(info.thumbnail);

    Ok(ResolvedMedia {
        stream_url,
        metadata: TrackMetadata {
            title: info.title.unwrap_or_else(|| reference.to_string()),
            uploader: info.uploader,
            duration: info
                .duration
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(Duration::from_secs_f64),
            thumbnail,
            webpage_url: info.webpage_url.unwrap_or_else(|| reference.to_string()),
        },
    })
}

/// Provisional references of every playlist entry.
fn parse_playlist(stdout: &str, kind: PlaylistKind) -> Result<Vec<String>, ResolveError> {
    let playlist: FlatPlaylist = serde_json::from_str(stdout.trim())
        .map_err(|e| ResolveError::transient(format!("unreadable playlist output: {}", e)))?;

    let entries = playlist
        .entries
        .into_iter()
        .filter_map(|entry| match kind {
            PlaylistKind::Bandcamp => entry.url,
            _ => entry
                .id
                .map(|id| format!("https://www.youtube.com/watch?v={}", id))
                .or(entry.url),
        })
        .collect();

    Ok(entries)
}
