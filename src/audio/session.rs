use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::{
    idle::{IdleCheck, IdleSupervisor, IdleVerdict},
    preload::Preloader,
    queue::{PlayQueue, DEFAULT_HISTORY_LENGTH, DEFAULT_TITLE_HISTORY_LENGTH},
    transport::{AudioTransport, TrackEndCallback},
};
use crate::{
    config::Config,
    error::PlaybackError,
    sources::{
        classify,
        classify::{clean_mobile_link, extract_url, strip_playlist_params},
        MediaResolver, Origin, PlaylistKind, SiteKind, Track,
    },
    storage::GuildSettings,
};

/// Most queue entries returned by [`SessionController::queue_snapshot`].
pub const MAX_QUEUE_DISPLAY: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub idle_timeout: Duration,
    pub idle_timeout_enabled: bool,
    pub preload_width: usize,
    pub history_length: usize,
    pub title_history_length: usize,
    pub default_volume: u8,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(600),
            idle_timeout_enabled: true,
            preload_width: 15,
            history_length: DEFAULT_HISTORY_LENGTH,
            title_history_length: DEFAULT_TITLE_HISTORY_LENGTH,
            default_volume: 100,
        }
    }
}

impl SessionOptions {
    /// Global limits from the config, per-guild policy from the stored settings.
    pub fn from_config(config: &Config, settings: &GuildSettings) -> Self {
        Self {
            idle_timeout: config.idle_timeout,
            idle_timeout_enabled: settings.vc_timeout,
            preload_width: config.effective_preload_width(),
            history_length: config.history_length,
            title_history_length: config.title_history_length,
            default_volume: settings.default_volume.min(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    Idle,
    NoListeners,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "disconnect requested"),
            DisconnectReason::Idle => write!(f, "nothing played for a while"),
            DisconnectReason::NoListeners => write!(f, "everyone left the voice channel"),
        }
    }
}

/// Things the front end may want to tell the channel about.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    NowPlaying(Track),
    TrackFailed { track: Track, error: PlaybackError },
    QueueExhausted,
    Disconnected { reason: DisconnectReason },
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Started(Track),
    /// `position` is 1-based.
    Queued { track: Track, position: usize },
    PlaylistQueued { count: usize, started: bool },
}

#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub total: usize,
    pub loop_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub connection: ConnectionState,
    pub playback: PlaybackState,
    pub current: Option<Track>,
    pub queued: usize,
    pub volume: u8,
    pub loop_enabled: bool,
    pub idle_timer_armed: bool,
}

struct SessionState {
    queue: PlayQueue,
    current: Option<Track>,
    volume: u8,
    connection: ConnectionState,
    playback: PlaybackState,
    /// Bumped on every transport start; completions from older runs are ignored.
    generation: u64,
}

struct TrackEnd {
    generation: u64,
    error: Option<String>,
    done: oneshot::Sender<()>,
}

/// Playback state machine of one guild.
///
/// All mutable state sits behind one async mutex. Track completions from the
/// transport are funnelled through a channel to a single driver task, so the
/// transport never runs session code on its own event task.
pub struct SessionController {
    me: Weak<SessionController>,
    state: Mutex<SessionState>,
    transport: Arc<dyn AudioTransport>,
    resolver: Arc<dyn MediaResolver>,
    preloader: Preloader,
    idle: IdleSupervisor,
    options: SessionOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
    track_ends: mpsc::UnboundedSender<TrackEnd>,
}

impl SessionController {
    /// Opens a session on an already joined voice connection.
    pub fn start(
        transport: Arc<dyn AudioTransport>,
        resolver: Arc<dyn MediaResolver>,
        options: SessionOptions,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (track_ends, mut track_end_rx) = mpsc::unbounded_channel::<TrackEnd>();

        let controller = Arc::new_cyclic(|me: &Weak<Self>| {
            let target = me.clone();
            let check: IdleCheck = Arc::new(move || {
                let target = target.clone();
                Box::pin(async move {
                    match target.upgrade() {
                        Some(controller) => controller.on_idle_timeout().await,
                        None => IdleVerdict::Disconnect,
                    }
                })
            });

            Self {
                me: me.clone(),
                state: Mutex::new(SessionState {
                    queue: PlayQueue::new(options.history_length, options.title_history_length),
                    current: None,
                    volume: options.default_volume.min(100),
                    connection: ConnectionState::Connected,
                    playback: PlaybackState::Idle,
                    generation: 0,
                }),
                transport,
                preloader: Preloader::new(resolver.clone(), options.preload_width),
                resolver,
                idle: IdleSupervisor::new(options.idle_timeout, check),
                options,
                events,
                track_ends,
            }
        });

        let driver = Arc::downgrade(&controller);
        tokio::spawn(async move {
            while let Some(end) = track_end_rx.recv().await {
                if let Some(controller) = driver.upgrade() {
                    controller.on_track_end(end.generation, end.error).await;
                }
                let _ = end.done.send(());
            }
        });

        controller.idle.arm();
        info!(
            "🎧 Session started (preload width {}, idle timeout {})",
            controller.preloader.width(),
            humantime::format_duration(controller.options.idle_timeout)
        );

        (controller, event_rx)
    }

    async fn lock_active(&self) -> Result<MutexGuard<'_, SessionState>, PlaybackError> {
        let state = self.state.lock().await;
        if state.connection == ConnectionState::Disconnected {
            return Err(PlaybackError::NoActiveSession);
        }
        Ok(state)
    }

    fn publish(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("📭 No one is listening to session events");
        }
    }

    fn preload_upcoming(&self, state: &SessionState) {
        self.preloader
            .schedule(&state.queue.upcoming(self.preloader.width()));
    }

    /// Queues whatever the user typed: a link, a playlist or search words.
    pub async fn submit(&self, input: &str) -> Result<SubmitOutcome, PlaybackError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PlaybackError::EmptyQuery);
        }

        if self.lock_active().await?.queue.loop_enabled() {
            return Err(PlaybackError::LoopLocked);
        }
        self.idle.arm();

        let classification = classify(input);
        if let Some(kind) = classification.expandable_playlist() {
            return self.submit_playlist(input, kind).await;
        }

        let track = self.prepare_single(input, classification.site).await?;
        if let Err(err) = self.preloader.resolve_now(&track).await {
            warn!("⚠️ Could not resolve {}: {}", track.reference(), err);
            return Err(err.into());
        }

        let mut state = self.lock_active().await?;
        state.queue.append(track.clone());
        info!("➕ Queued {} ({} pending)", track.display_title(), state.queue.len());

        if state.current.is_some() {
            let position = state.queue.len();
            self.preload_upcoming(&state);
            return Ok(SubmitOutcome::Queued { track, position });
        }

        match self.start_next(&mut state).await {
            Some(started) => Ok(SubmitOutcome::Started(started)),
            None => Err(PlaybackError::Transport(
                "playback could not be started".to_string(),
            )),
        }
    }

    async fn submit_playlist(
        &self,
        input: &str,
        kind: PlaylistKind,
    ) -> Result<SubmitOutcome, PlaybackError> {
        let reference = extract_url(input).unwrap_or(input);
        let tracks = self.resolver.expand_playlist(reference, kind).await?;
        if tracks.is_empty() {
            return Err(PlaybackError::UnresolvableMedia(
                "the playlist is empty".to_string(),
            ));
        }

        let count = tracks.len();
        let mut state = self.lock_active().await?;
        state.queue.extend(tracks);
        info!("📋 Queued {} playlist entries", count);

        let started = if state.current.is_none() {
            self.start_next(&mut state).await.is_some()
        } else {
            self.preload_upcoming(&state);
            false
        };

        Ok(SubmitOutcome::PlaylistQueued { count, started })
    }

    async fn prepare_single(&self, input: &str, site: SiteKind) -> Result<Track, PlaybackError> {
        let link = extract_url(input).unwrap_or(input);

        let track = match site {
            SiteKind::Unknown => {
                if extract_url(input).is_some() {
                    return Err(PlaybackError::UnresolvableMedia(format!(
                        "{} is not a supported site",
                        link
                    )));
                }
                let found = self.resolver.search_by_title(input).await?.ok_or_else(|| {
                    PlaybackError::UnresolvableMedia(format!("no results for '{}'", input))
                })?;
                Track::new(Origin::Direct, SiteKind::YouTube, found)
            }
            SiteKind::YouTube => {
                Track::new(Origin::Direct, SiteKind::YouTube, strip_playlist_params(link))
            }
            SiteKind::SoundCloud => {
                Track::new(Origin::Direct, SiteKind::SoundCloud, clean_mobile_link(link))
            }
            site => Track::new(Origin::Direct, site, link),
        };

        Ok(track)
    }

    fn track_end_callback(&self, generation: u64) -> TrackEndCallback {
        let track_ends = self.track_ends.clone();
        Box::new(move |error| {
            Box::pin(async move {
                let (done, handled) = oneshot::channel();
                let end = TrackEnd {
                    generation,
                    error,
                    done,
                };
                if track_ends.send(end).is_ok() {
                    let _ = handled.await;
                }
            })
        })
    }

    /// Plays the head of the queue, skipping entries that fail. Each entry is
    /// tried once; returns what started, or `None` with the session left idle.
    async fn start_next(&self, state: &mut SessionState) -> Option<Track> {
        let attempts = state.queue.len();

        for _ in 0..attempts {
            let Some(track) = state.queue.pop_front() else {
                break;
            };

            let media = match self.preloader.resolve_now(&track).await {
                Ok(media) => media,
                Err(err) => {
                    warn!("⚠️ Skipping {}: {}", track.reference(), err);
                    self.publish(SessionEvent::TrackFailed {
                        track,
                        error: err.into(),
                    });
                    continue;
                }
            };

            state.queue.record_title(media.metadata.title.clone());
            state.generation += 1;
            let on_end = self.track_end_callback(state.generation);
            let volume = f32::from(state.volume) / 100.0;

            if let Err(err) = self.transport.play(&media.stream_url, volume, on_end).await {
                error!("❌ Transport refused {}: {}", media.metadata.title, err);
                self.publish(SessionEvent::TrackFailed { track, error: err });
                continue;
            }

            info!(
                "🎵 Now playing: {} (queued {})",
                media.metadata.title,
                track.added_at().format("%H:%M:%S")
            );
            state.current = Some(track.clone());
            state.playback = PlaybackState::Playing;
            self.publish(SessionEvent::NowPlaying(track.clone()));
            self.preload_upcoming(state);
            return Some(track);
        }

        state.current = None;
        state.playback = PlaybackState::Idle;
        info!("📭 Queue exhausted");
        self.publish(SessionEvent::QueueExhausted);
        None
    }

    async fn on_track_end(&self, generation: u64, error: Option<String>) {
        let mut state = self.state.lock().await;
        if state.connection == ConnectionState::Disconnected || generation != state.generation {
            debug!("⏭️ Ignoring stale track end (run {})", generation);
            return;
        }

        let finished = state.current.take();
        state.playback = PlaybackState::Idle;

        if let Some(err) = error {
            // A broken stream would fail forever on loop.
            state.queue.set_loop(false);
            if let Some(track) = &finished {
                self.publish(SessionEvent::TrackFailed {
                    track: track.clone(),
                    error: PlaybackError::Transport(err),
                });
            }
        }

        let next = state.queue.advance(finished.as_ref());
        if !state.queue.loop_enabled() {
            self.idle.arm();
        }

        match next {
            Some(_) => {
                self.start_next(&mut state).await;
            }
            None => {
                info!("📭 Queue exhausted");
                self.publish(SessionEvent::QueueExhausted);
            }
        }
    }

    async fn on_idle_timeout(&self) -> IdleVerdict {
        if self.state.lock().await.connection == ConnectionState::Disconnected {
            return IdleVerdict::Disconnect;
        }

        if self.transport.listener_count().await == Some(0) {
            info!("👻 Voice channel is empty, leaving");
            self.spawn_disconnect(DisconnectReason::NoListeners);
            return IdleVerdict::Disconnect;
        }

        if !self.options.idle_timeout_enabled {
            return IdleVerdict::Rearm;
        }

        if self.state.lock().await.playback == PlaybackState::Playing {
            return IdleVerdict::Rearm;
        }

        info!("💤 Idle for {}, leaving", humantime::format_duration(self.idle.timeout()));
        self.spawn_disconnect(DisconnectReason::Idle);
        IdleVerdict::Disconnect
    }

    fn spawn_disconnect(&self, reason: DisconnectReason) {
        if let Some(controller) = self.me.upgrade() {
            tokio::spawn(async move {
                if let Err(err) = controller.disconnect(reason).await {
                    debug!("Disconnect skipped: {}", err);
                }
            });
        }
    }

    pub async fn pause(&self) -> Result<(), PlaybackError> {
        let mut state = self.lock_active().await?;
        match state.playback {
            PlaybackState::Playing => {
                self.transport.pause().await?;
                state.playback = PlaybackState::Paused;
                info!("⏸️ Playback paused");
                Ok(())
            }
            PlaybackState::Paused => Ok(()),
            PlaybackState::Idle => Err(PlaybackError::NothingPlaying),
        }
    }

    pub async fn resume(&self) -> Result<(), PlaybackError> {
        let mut state = self.lock_active().await?;
        match state.playback {
            PlaybackState::Paused => {
                self.transport.resume().await?;
                state.playback = PlaybackState::Playing;
                info!("▶️ Playback resumed");
                Ok(())
            }
            PlaybackState::Playing => Ok(()),
            PlaybackState::Idle => Err(PlaybackError::NothingPlaying),
        }
    }

    /// Stops playback and forgets the queue and history.
    pub async fn stop(&self) -> Result<(), PlaybackError> {
        let mut state = self.lock_active().await?;
        state.queue.set_loop(false);
        if state.current.is_none() {
            return Ok(());
        }

        let current = state.current.take();
        state.queue.advance(current.as_ref());
        state.queue.clear();
        state.generation += 1;
        state.playback = PlaybackState::Idle;
        drop(state);

        self.idle.arm();
        self.transport.stop().await?;
        info!("⏹️ Playback stopped, queue cleared");
        Ok(())
    }

    pub async fn skip(&self) -> Result<(), PlaybackError> {
        {
            let mut state = self.lock_active().await?;
            if state.current.is_none() {
                return Err(PlaybackError::NothingPlaying);
            }
            state.queue.set_loop(false);
        }

        self.idle.arm();
        self.transport.stop().await?;
        info!("⏭️ Skipped");
        Ok(())
    }

    /// Goes back one track. `Ok(None)` when there is nothing to go back to
    /// or the restored track could not be started.
    pub async fn previous(&self) -> Result<Option<Track>, PlaybackError> {
        let mut state = self.lock_active().await?;
        state.queue.set_loop(false);
        self.idle.arm();

        let current = state.current.clone();
        let Some(target) = state.queue.previous(current.as_ref()) else {
            return Ok(None);
        };

        if current.is_none() {
            if self.start_next(&mut state).await.is_none() {
                return Ok(None);
            }
        } else {
            drop(state);
            self.transport.stop().await?;
        }

        info!("⏮️ Back to {}", target.display_title());
        Ok(Some(target))
    }

    /// Flips the loop flag and returns the new value.
    pub async fn toggle_loop(&self) -> Result<bool, PlaybackError> {
        let mut state = self.lock_active().await?;
        if state.current.is_none() && state.queue.is_empty() {
            return Err(PlaybackError::NothingPlaying);
        }

        let enabled = state.queue.toggle_loop();
        info!("🔁 Loop {}", if enabled { "enabled" } else { "disabled" });
        Ok(enabled)
    }

    pub async fn shuffle(&self) -> Result<(), PlaybackError> {
        let mut state = self.lock_active().await?;
        state.queue.shuffle();
        self.preload_upcoming(&state);
        info!("🔀 Queue shuffled ({} entries)", state.queue.len());
        Ok(())
    }

    /// Moves a queue entry; positions are 0-based.
    pub async fn move_track(&self, from: usize, to: usize) -> Result<Track, PlaybackError> {
        let mut state = self.lock_active().await?;
        state.queue.move_track(from, to)?;
        self.preload_upcoming(&state);

        let moved = state.queue.upcoming(to + 1).pop().ok_or(PlaybackError::index_out_of_range(
            to,
            state.queue.len(),
        ))?;
        debug!("↕️ Moved {} from {} to {}", moved.display_title(), from, to);
        Ok(moved)
    }

    /// Removes a queue entry; the position is 0-based.
    pub async fn remove(&self, index: usize) -> Result<Track, PlaybackError> {
        let mut state = self.lock_active().await?;
        let removed = state.queue.remove(index)?;
        self.preload_upcoming(&state);
        debug!("🗑️ Removed {}", removed.display_title());
        Ok(removed)
    }

    /// Empties the queue, turns loop off and stops the current track.
    pub async fn clear(&self) -> Result<(), PlaybackError> {
        let playing = {
            let mut state = self.lock_active().await?;
            state.queue.set_loop(false);
            state.queue.clear();
            let stopped = state.current.take();
            if stopped.is_some() {
                state.generation += 1;
                state.playback = PlaybackState::Idle;
            }
            stopped.is_some()
        };

        if playing {
            self.idle.arm();
            self.transport.stop().await?;
        }
        info!("🧹 Queue cleared");
        Ok(())
    }

    pub async fn set_volume(&self, value: i64) -> Result<(), PlaybackError> {
        let volume = u8::try_from(value)
            .ok()
            .filter(|volume| *volume <= 100)
            .ok_or(PlaybackError::InvalidVolume(value))?;

        let mut state = self.lock_active().await?;
        self.transport.set_volume(f32::from(volume) / 100.0).await?;
        state.volume = volume;
        info!("🔊 Volume set to {}%", volume);
        Ok(())
    }

    pub async fn volume(&self) -> Result<u8, PlaybackError> {
        Ok(self.lock_active().await?.volume)
    }

    pub async fn now_playing(&self) -> Result<Option<Track>, PlaybackError> {
        Ok(self.lock_active().await?.current.clone())
    }

    pub async fn queue_snapshot(&self, limit: usize) -> Result<QueueSnapshot, PlaybackError> {
        let state = self.lock_active().await?;
        Ok(QueueSnapshot {
            current: state.current.clone(),
            upcoming: state.queue.upcoming(limit.min(MAX_QUEUE_DISPLAY)),
            total: state.queue.len(),
            loop_enabled: state.queue.loop_enabled(),
        })
    }

    pub async fn history(&self) -> Result<Vec<Track>, PlaybackError> {
        Ok(self.lock_active().await?.queue.history())
    }

    pub async fn recent_titles(&self) -> Result<Vec<String>, PlaybackError> {
        Ok(self.lock_active().await?.queue.recent_titles())
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.state.lock().await;
        SessionStatus {
            connection: state.connection,
            playback: state.playback,
            current: state.current.clone(),
            queued: state.queue.len(),
            volume: state.volume,
            loop_enabled: state.queue.loop_enabled(),
            idle_timer_armed: self.idle.is_armed(),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connection == ConnectionState::Connected
    }

    /// Tears the session down. Every later call fails with `NoActiveSession`.
    pub async fn disconnect(&self, reason: DisconnectReason) -> Result<(), PlaybackError> {
        {
            let mut state = self.lock_active().await?;
            state.connection = ConnectionState::Disconnected;
            state.queue.set_loop(false);
            state.queue.clear();
            state.current = None;
            state.playback = PlaybackState::Idle;
            state.generation += 1;
        }

        self.idle.cancel();
        self.preloader.shutdown();

        if let Err(err) = self.transport.stop().await {
            warn!("⚠️ Could not stop playback while leaving: {}", err);
        }
        if let Err(err) = self.transport.disconnect().await {
            error!("❌ Could not leave the voice channel: {}", err);
        }

        info!("🔌 Session closed: {}", reason);
        self.publish(SessionEvent::Disconnected { reason });
        Ok(())
    }
}

#[cfg(test)]
mod tests;
