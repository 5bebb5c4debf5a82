//! # Sources Module
//!
//! Everything that turns what a user typed into something the transport can
//! play.
//!
//! - [`classify`]: pure classification of a reference into a site and an
//!   optional playlist kind.
//! - [`track`]: the shared [`Track`] handle and its resolution state.
//! - [`ytdlp`]: the [`MediaResolver`] backed by the `yt-dlp` binary.
//! - [`track_service`]: page-title lookups for services that expose no
//!   stream of their own (Spotify links are played through a YouTube search
//!   on their title).
//!
//! Extractor policy (binary, cookies, timeouts) lives in one place, the
//! resolver implementation, and every caller goes through the trait.

pub mod classify;
pub mod track;
pub mod track_service;
pub mod ytdlp;

use async_trait::async_trait;
use thiserror::Error;

pub use classify::{classify, Classification, PlaylistKind, SiteKind};
pub use track::{Origin, ResolutionState, ResolvedMedia, Track, TrackMetadata};
pub use ytdlp::YtDlpResolver;

/// Why a reference could not be turned into playable media.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Unsupported site, age or region restriction, deleted media. Retrying won't help.
    #[error("{0}")]
    Unresolvable(String),
    /// Network or extractor hiccup; the caller may retry.
    #[error("{0}")]
    Transient(String),
}

impl ResolveError {
    pub fn unresolvable(reason: impl Into<String>) -> Self {
        ResolveError::Unresolvable(reason.into())
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        ResolveError::Transient(reason.into())
    }
}

/// External track resolver.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Fetches the stream endpoint and display metadata for a reference.
    async fn resolve(&self, reference: &str) -> Result<ResolvedMedia, ResolveError>;

    /// Lists a playlist as unresolved tracks, one per entry.
    async fn expand_playlist(
        &self,
        reference: &str,
        kind: PlaylistKind,
    ) -> Result<Vec<Track>, ResolveError>;

    /// Turns free text into a primary-platform reference. `None` when nothing matches.
    async fn search_by_title(&self, text: &str) -> Result<Option<String>, ResolveError>;

    /// Title of a track-service page ("Artist - Song"), used to search for it.
    async fn track_service_title(&self, reference: &str) -> Result<String, ResolveError>;
}
