use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::Notify;

use super::{classify::SiteKind, ResolveError};

/// How a track entered the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Direct,
    Playlist,
}

/// Display metadata filled in by resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub uploader: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub webpage_url: String,
}

/// Everything needed to hand a track to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub stream_url: String,
    pub metadata: TrackMetadata,
}

#[derive(Debug, Clone)]
pub enum ResolutionState {
    Pending,
    Queued,
    InFlight,
    Resolved(Arc<ResolvedMedia>),
    Failed(ResolveError),
}

struct TrackInner {
    origin: Origin,
    site: SiteKind,
    reference: String,
    added_at: DateTime<Utc>,
    state: RwLock<ResolutionState>,
    settled: Notify,
}

/// Shared handle to one queued item.
///
/// Clones point at the same track: resolution written through one handle is
/// visible through every other, and [`Track::same_as`] compares identity rather
/// than the reference string (the same URL can be queued twice).
#[derive(Clone)]
pub struct Track {
    inner: Arc<TrackInner>,
}

impl Track {
    pub fn new(origin: Origin, site: SiteKind, reference: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                origin,
                site,
                reference: reference.into(),
                added_at: Utc::now(),
                state: RwLock::new(ResolutionState::Pending),
                settled: Notify::new(),
            }),
        }
    }

    /// Builds an already resolved track.
    pub fn resolved(origin: Origin, site: SiteKind, reference: impl Into<String>, media: ResolvedMedia) -> Self {
        let track = Self::new(origin, site, reference);
        *track.inner.state.write() = ResolutionState::Resolved(Arc::new(media));
        track
    }

    pub fn origin(&self) -> Origin {
        self.inner.origin
    }

    pub fn site(&self) -> SiteKind {
        self.inner.site
    }

    pub fn reference(&self) -> &str {
        &self.inner.reference
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.inner.added_at
    }

    pub fn state(&self) -> ResolutionState {
        self.inner.state.read().clone()
    }

    pub fn media(&self) -> Option<Arc<ResolvedMedia>> {
        match &*self.inner.state.read() {
            ResolutionState::Resolved(media) => Some(media.clone()),
            _ => None,
        }
    }

    pub fn metadata(&self) -> Option<TrackMetadata> {
        self.media().map(|media| media.metadata.clone())
    }

    pub fn stream_url(&self) -> Option<String> {
        self.media().map(|media| media.stream_url.clone())
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.inner.state.read(), ResolutionState::Resolved(_))
    }

    pub fn failure(&self) -> Option<ResolveError> {
        match &*self.inner.state.read() {
            ResolutionState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Title once resolved, the raw reference before that.
    pub fn display_title(&self) -> String {
        self.metadata()
            .map(|meta| meta.title)
            .unwrap_or_else(|| self.inner.reference.clone())
    }

    /// Page to link to: the canonical page once resolved, else the reference.
    pub fn link(&self) -> String {
        self.metadata()
            .map(|meta| meta.webpage_url)
            .unwrap_or_else(|| self.inner.reference.clone())
    }

    pub fn same_as(&self, other: &Track) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // Resolution state transitions. Only the preloader drives these.

    /// `Pending -> Queued`. False when the track is already taken care of.
    pub(crate) fn mark_queued(&self) -> bool {
        let mut state = self.inner.state.write();
        if matches!(*state, ResolutionState::Pending) {
            *state = ResolutionState::Queued;
            true
        } else {
            false
        }
    }

    /// `Pending | Queued -> InFlight`. False when someone else owns the resolution.
    pub(crate) fn begin_resolution(&self) -> bool {
        let mut state = self.inner.state.write();
        if matches!(*state, ResolutionState::Pending | ResolutionState::Queued) {
            *state = ResolutionState::InFlight;
            true
        } else {
            false
        }
    }

    /// Stores the outcome of an in-flight resolution and wakes waiters.
    pub(crate) fn settle(&self, outcome: Result<ResolvedMedia, ResolveError>) {
        {
            let mut state = self.inner.state.write();
            if matches!(*state, ResolutionState::InFlight) {
                *state = match outcome {
                    Ok(media) => ResolutionState::Resolved(Arc::new(media)),
                    Err(err) => ResolutionState::Failed(err),
                };
            }
        }
        self.inner.settled.notify_waiters();
    }

    /// Hands an interrupted resolution back so it can be picked up again.
    pub(crate) fn release(&self) {
        {
            let mut state = self.inner.state.write();
            if matches!(*state, ResolutionState::InFlight | ResolutionState::Queued) {
                *state = ResolutionState::Pending;
            }
        }
        self.inner.settled.notify_waiters();
    }

    pub(crate) fn settled(&self) -> &Notify {
        &self.inner.settled
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("origin", &self.inner.origin)
            .field("site", &self.inner.site)
            .field("reference", &self.inner.reference)
            .field("state", &*self.inner.state.read())
            .finish()
    }
}
