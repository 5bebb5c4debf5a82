use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sources::{
    MediaResolver, ResolutionState, ResolveError, ResolvedMedia, SiteKind, Track,
};

/// Upper bound on resolver workers per session.
pub const MAX_PRELOAD_WIDTH: usize = 25;

/// Bounded pool of workers resolving upcoming tracks ahead of playback.
///
/// Workers live as long as the session. Jobs go through a flume channel, so
/// at most `width` resolutions run at once however many tracks are scheduled.
pub struct Preloader {
    resolver: Arc<dyn MediaResolver>,
    jobs: flume::Sender<Track>,
    width: usize,
    shutdown: CancellationToken,
}

impl Preloader {
    /// Spawns the workers. Must be called inside a tokio runtime.
    pub fn new(resolver: Arc<dyn MediaResolver>, width: usize) -> Self {
        let width = width.clamp(1, MAX_PRELOAD_WIDTH);
        let (jobs, queue) = flume::unbounded::<Track>();
        let shutdown = CancellationToken::new();

        for worker in 0..width {
            tokio::spawn(run_worker(
                worker,
                queue.clone(),
                resolver.clone(),
                shutdown.clone(),
            ));
        }

        debug!("🧵 Preloader started with {} workers", width);

        Self {
            resolver,
            jobs,
            width,
            shutdown,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Queues every still-pending track for background resolution.
    ///
    /// Tracks that are resolved, failed or already scheduled are skipped.
    /// Returns how many were newly scheduled.
    pub fn schedule(&self, tracks: &[Track]) -> usize {
        if self.shutdown.is_cancelled() {
            return 0;
        }

        let mut scheduled = 0;
        for track in tracks {
            if !track.mark_queued() {
                continue;
            }
            if self.jobs.send(track.clone()).is_err() {
                track.release();
                break;
            }
            scheduled += 1;
        }

        if scheduled > 0 {
            debug!("📥 Scheduled {} tracks for preloading", scheduled);
        }
        scheduled
    }

    /// Media for `track`, resolving it here if no worker has picked it up and
    /// waiting for the worker if one has.
    pub async fn resolve_now(&self, track: &Track) -> Result<Arc<ResolvedMedia>, ResolveError> {
        loop {
            let settled = track.settled().notified();
            tokio::pin!(settled);
            // Register before reading the state so a settle in between is not missed.
            settled.as_mut().enable();

            match track.state() {
                ResolutionState::Resolved(media) => return Ok(media),
                ResolutionState::Failed(err) => return Err(err),
                ResolutionState::Pending | ResolutionState::Queued => {
                    if track.begin_resolution() {
                        let claim = Claim::new(track);
                        let outcome = fetch(self.resolver.as_ref(), track).await;
                        claim.settle(outcome);
                    }
                }
                ResolutionState::InFlight => settled.await,
            }
        }
    }

    /// Stops the workers. Queued tracks go back to pending.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("🛑 Shutting down preloader");
            self.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Preloader {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Resolves a track. Spotify links are searched on YouTube by page title first.
pub(crate) async fn fetch(
    resolver: &dyn MediaResolver,
    track: &Track,
) -> Result<ResolvedMedia, ResolveError> {
    if track.site() == SiteKind::Spotify {
        let title = resolver.track_service_title(track.reference()).await?;
        let found = resolver
            .search_by_title(&title)
            .await?
            .ok_or_else(|| ResolveError::unresolvable(format!("no match found for {}", title)))?;
        return resolver.resolve(&found).await;
    }

    resolver.resolve(track.reference()).await
}

/// Ownership of an in-flight resolution. Dropped unsettled, the track goes
/// back to pending so a later call can pick it up.
struct Claim<'a> {
    track: &'a Track,
    settled: bool,
}

impl<'a> Claim<'a> {
    fn new(track: &'a Track) -> Self {
        Self {
            track,
            settled: false,
        }
    }

    fn settle(mut self, outcome: Result<ResolvedMedia, ResolveError>) {
        self.settled = true;
        self.track.settle(outcome);
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.track.release();
        }
    }
}

async fn run_worker(
    worker: usize,
    queue: flume::Receiver<Track>,
    resolver: Arc<dyn MediaResolver>,
    shutdown: CancellationToken,
) {
    loop {
        let track = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = queue.recv_async() => match job {
                Ok(track) => track,
                Err(_) => break,
            },
        };

        if !track.begin_resolution() {
            continue;
        }

        let claim = Claim::new(&track);
        tokio::select! {
            _ = shutdown.cancelled() => {
                drop(claim);
                break;
            }
            outcome = fetch(resolver.as_ref(), &track) => {
                if let Err(err) = &outcome {
                    warn!("⚠️ Preload failed for {}: {}", track.reference(), err);
                } else {
                    debug!("✅ Worker {} preloaded {}", worker, track.reference());
                }
                claim.settle(outcome);
            }
        }
    }

    // Leftover jobs were never started.
    while let Ok(track) = queue.try_recv() {
        track.release();
    }
    debug!("🧵 Preload worker {} stopped", worker);
}
