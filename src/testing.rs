//! Hand-written fakes shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::task::JoinHandle;

use crate::{
    audio::transport::{AudioTransport, TrackEndCallback},
    error::PlaybackError,
    sources::{
        classify::extract_url, MediaResolver, Origin, PlaylistKind, ResolveError, ResolvedMedia,
        SiteKind, Track, TrackMetadata,
    },
};

pub fn media_for(reference: &str) -> ResolvedMedia {
    let title = reference.rsplit('/').next().unwrap_or(reference).to_string();
    ResolvedMedia {
        stream_url: format!("https://stream.test/{}", title),
        metadata: TrackMetadata {
            title,
            uploader: Some("Tester".to_string()),
            duration: Some(Duration::from_secs(180)),
            thumbnail: None,
            webpage_url: reference.to_string(),
        },
    }
}

pub fn direct_track(reference: &str) -> Track {
    Track::new(Origin::Direct, SiteKind::YouTube, reference)
}

/// Resolver whose answers depend on the reference text:
/// anything containing "bad" is unresolvable, "flaky" fails transiently.
#[derive(Default)]
pub struct FakeResolver {
    delay: Duration,
    playlists: Mutex<HashMap<String, Vec<String>>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn add_playlist(&self, reference: &str, entries: &[&str]) {
        self.playlists.lock().insert(
            reference.to_string(),
            entries.iter().map(|entry| entry.to_string()).collect(),
        );
    }

    /// References passed to `resolve`, in call order.
    pub fn resolved(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn resolve_calls(&self, reference: &str) -> usize {
        self.calls.lock().iter().filter(|r| *r == reference).count()
    }

    /// Highest number of `resolve` calls that ran at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn resolve(&self, reference: &str) -> Result<ResolvedMedia, ResolveError> {
        self.calls.lock().push(reference.to_string());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if reference.contains("bad") {
            Err(ResolveError::unresolvable(format!("{} is age restricted", reference)))
        } else if reference.contains("flaky") {
            Err(ResolveError::transient("connection reset"))
        } else {
            Ok(media_for(reference))
        }
    }

    async fn expand_playlist(
        &self,
        reference: &str,
        _kind: PlaylistKind,
    ) -> Result<Vec<Track>, ResolveError> {
        let playlists = self.playlists.lock();
        let entries = playlists
            .get(reference)
            .ok_or_else(|| ResolveError::unresolvable("unknown playlist"))?;
        Ok(entries
            .iter()
            .map(|entry| Track::new(Origin::Playlist, SiteKind::YouTube, entry.clone()))
            .collect())
    }

    async fn search_by_title(&self, text: &str) -> Result<Option<String>, ResolveError> {
        if let Some(url) = extract_url(text) {
            return Ok(Some(url.to_string()));
        }
        if text.contains("nothing") {
            return Ok(None);
        }
        Ok(Some(format!(
            "https://www.youtube.com/watch?v={}",
            text.trim().replace(' ', "_")
        )))
    }

    async fn track_service_title(&self, reference: &str) -> Result<String, ResolveError> {
        let id = reference.rsplit('/').next().unwrap_or(reference);
        Ok(format!("artist {}", id))
    }
}

#[derive(Default)]
struct TransportState {
    plays: Vec<(String, f32)>,
    on_end: Option<TrackEndCallback>,
    ended: Vec<JoinHandle<()>>,
    stops: usize,
    pauses: usize,
    resumes: usize,
    volumes: Vec<f32>,
    disconnects: usize,
    listeners: Option<usize>,
    fail_next_play: bool,
    fail_next_volume: bool,
}

/// Transport that records every call.
///
/// `stop` fires the pending end callback on a spawned task like the real
/// voice driver does; [`FakeTransport::settle`] waits for those to be handled.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport.state.lock().listeners = Some(1);
        transport
    }

    pub fn set_listeners(&self, count: Option<usize>) {
        self.state.lock().listeners = count;
    }

    pub fn fail_next_play(&self) {
        self.state.lock().fail_next_play = true;
    }

    pub fn fail_next_volume(&self) {
        self.state.lock().fail_next_volume = true;
    }

    /// Stream URLs handed to `play`, in order.
    pub fn plays(&self) -> Vec<String> {
        self.state.lock().plays.iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn last_play_volume(&self) -> Option<f32> {
        self.state.lock().plays.last().map(|(_, volume)| *volume)
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn pauses(&self) -> usize {
        self.state.lock().pauses
    }

    pub fn resumes(&self) -> usize {
        self.state.lock().resumes
    }

    pub fn volumes(&self) -> Vec<f32> {
        self.state.lock().volumes.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    /// Ends the running track as if the stream ran out, and waits until the
    /// session has handled it.
    pub async fn finish(&self, error: Option<&str>) {
        let callback = self.state.lock().on_end.take();
        if let Some(callback) = callback {
            callback(error.map(str::to_string)).await;
        }
    }

    /// Waits for end callbacks fired by `stop`.
    pub async fn settle(&self) {
        loop {
            let pending = std::mem::take(&mut self.state.lock().ended);
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                let _ = handle.await;
            }
        }
    }
}

#[async_trait]
impl AudioTransport for FakeTransport {
    async fn play(
        &self,
        stream_url: &str,
        volume: f32,
        on_end: TrackEndCallback,
    ) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_play) {
            return Err(PlaybackError::Transport("stream refused".to_string()));
        }
        // Replacing a running track ends it.
        if let Some(previous) = state.on_end.take() {
            state.ended.push(tokio::spawn(previous(None)));
        }
        state.plays.push((stream_url.to_string(), volume));
        state.on_end = Some(on_end);
        Ok(())
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        self.state.lock().pauses += 1;
        Ok(())
    }

    async fn resume(&self) -> Result<(), PlaybackError> {
        self.state.lock().resumes += 1;
        Ok(())
    }

    async fn stop(&self) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        state.stops += 1;
        if let Some(callback) = state.on_end.take() {
            state.ended.push(tokio::spawn(callback(None)));
        }
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_volume) {
            return Err(PlaybackError::Transport("volume rejected".to_string()));
        }
        state.volumes.push(volume);
        Ok(())
    }

    async fn listener_count(&self) -> Option<usize> {
        self.state.lock().listeners
    }

    async fn disconnect(&self) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        state.disconnects += 1;
        state.on_end = None;
        Ok(())
    }
}
