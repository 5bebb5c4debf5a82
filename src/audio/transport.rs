use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    error::JoinError,
    input::{HttpRequest, Input},
    tracks::{PlayMode, Track as SongbirdTrack, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PlaybackError;

/// Fired once when the running track stops, with the error text if it failed.
pub type TrackEndCallback = Box<dyn FnOnce(Option<String>) -> BoxFuture<'static, ()> + Send>;

/// What the session needs from the voice connection.
#[async_trait]
pub trait AudioTransport: Send + Sync {
    /// Starts `stream_url`, replacing whatever was playing. `volume` is in `0.0..=1.0`.
    async fn play(
        &self,
        stream_url: &str,
        volume: f32,
        on_end: TrackEndCallback,
    ) -> Result<(), PlaybackError>;

    async fn pause(&self) -> Result<(), PlaybackError>;

    async fn resume(&self) -> Result<(), PlaybackError>;

    /// Stops the running track. Its end callback still fires.
    async fn stop(&self) -> Result<(), PlaybackError>;

    async fn set_volume(&self, volume: f32) -> Result<(), PlaybackError>;

    /// Users other than bots in the connected channel, `None` when unknown.
    async fn listener_count(&self) -> Option<usize>;

    async fn disconnect(&self) -> Result<(), PlaybackError>;
}

/// [`AudioTransport`] over the guild's songbird `Call`.
pub struct SongbirdTransport {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    cache: Arc<Cache>,
    http: reqwest::Client,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdTransport {
    pub fn new(
        guild_id: GuildId,
        manager: Arc<Songbird>,
        cache: Arc<Cache>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            guild_id,
            manager,
            cache,
            http,
            current: Mutex::new(None),
        }
    }

    fn handle(&self) -> Result<TrackHandle, PlaybackError> {
        self.current
            .lock()
            .clone()
            .ok_or(PlaybackError::NothingPlaying)
    }

    async fn current_channel(&self) -> Option<ChannelId> {
        let call = self.manager.get(self.guild_id)?;
        let call = call.lock().await;
        call.current_channel().map(|channel| ChannelId::from(channel.0))
    }
}

fn transport_error(err: impl std::fmt::Display) -> PlaybackError {
    PlaybackError::Transport(err.to_string())
}

#[async_trait]
impl AudioTransport for SongbirdTransport {
    async fn play(
        &self,
        stream_url: &str,
        volume: f32,
        on_end: TrackEndCallback,
    ) -> Result<(), PlaybackError> {
        let call = self
            .manager
            .get(self.guild_id)
            .ok_or(PlaybackError::NoActiveSession)?;

        let input: Input = HttpRequest::new(self.http.clone(), stream_url.to_string()).into();
        let track = SongbirdTrack::new(input).volume(volume);

        let handle = {
            let mut call = call.lock().await;
            call.play_only(track)
        };

        let notifier = TrackEndNotifier {
            callback: Arc::new(Mutex::new(Some(on_end))),
        };
        handle
            .add_event(Event::Track(TrackEvent::End), notifier.clone())
            .map_err(transport_error)?;
        handle
            .add_event(Event::Track(TrackEvent::Error), notifier)
            .map_err(transport_error)?;

        debug!("🔊 Streaming started in guild {} at volume {:.2}", self.guild_id, volume);
        *self.current.lock() = Some(handle);
        Ok(())
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        self.handle()?.pause().map_err(transport_error)
    }

    async fn resume(&self) -> Result<(), PlaybackError> {
        self.handle()?.play().map_err(transport_error)
    }

    async fn stop(&self) -> Result<(), PlaybackError> {
        let handle = self.current.lock().take();
        match handle {
            Some(handle) => handle.stop().map_err(transport_error),
            None => Ok(()),
        }
    }

    async fn set_volume(&self, volume: f32) -> Result<(), PlaybackError> {
        let handle = self.current.lock().clone();
        match handle {
            Some(handle) => handle.set_volume(volume).map_err(transport_error),
            None => Ok(()),
        }
    }

    async fn listener_count(&self) -> Option<usize> {
        let channel_id = self.current_channel().await?;
        let bot_id = self.cache.current_user().id;
        let guild = self.cache.guild(self.guild_id)?;

        let listeners = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id) && state.user_id != bot_id)
            .filter(|state| {
                !guild
                    .members
                    .get(&state.user_id)
                    .map(|member| member.user.bot)
                    .unwrap_or(false)
            })
            .count();

        Some(listeners)
    }

    async fn disconnect(&self) -> Result<(), PlaybackError> {
        self.current.lock().take();
        match self.manager.remove(self.guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!("👋 Left voice in guild {}", self.guild_id);
                Ok(())
            }
            Err(e) => Err(transport_error(e)),
        }
    }
}

/// Hands the end of a track (normal or errored) to the session exactly once.
#[derive(Clone)]
struct TrackEndNotifier {
    callback: Arc<Mutex<Option<TrackEndCallback>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(err) => Some(format!("{:?}", err)),
                _ => None,
            }),
            _ => None,
        };

        if let Some(err) = &error {
            warn!("⚠️ Track errored during playback: {}", err);
        }

        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            // The session may call back into the transport; never run it on the driver's event task.
            tokio::spawn(callback(error));
        }

        Some(Event::Cancel)
    }
}
