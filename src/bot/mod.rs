//! # Bot Module
//!
//! Discord front end for Guild Jukebox.
//!
//! This module turns prefix commands into session controller calls:
//! - Command parsing and access rules ([`commands`])
//! - Voice connection management, one [`SessionController`] per guild
//! - Forwarding session events to the guild's text channel
//!
//! ## Architecture
//!
//! The bot is built around the [`MusicBot`] struct which implements
//! Serenity's [`EventHandler`] trait. It owns:
//!
//! - Active sessions in a [`DashMap`] keyed by guild
//! - Persistent per-guild settings in [`JsonStorage`]
//! - The shared [`YtDlpResolver`] every session resolves through

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{
        ChannelId, Context, CreateMessage, EditMessage, EventHandler, GuildId, Http, Message,
        Ready, UserId, VoiceState,
    },
    async_trait,
    builder::CreateEmbed,
};
use std::{
    future::Future,
    sync::{Arc, Weak},
    time::Instant,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub mod commands;

use self::commands::{check_access, Command, CommandContext, HELP_TEXT};
use crate::{
    audio::{
        session::{DisconnectReason, SessionController, SessionEvent, SessionOptions, SubmitOutcome, MAX_QUEUE_DISPLAY},
        transport::SongbirdTransport,
    },
    config::Config,
    error::PlaybackError,
    sources::YtDlpResolver,
    storage::{GuildSettings, JsonStorage, SettingUpdate},
    ui::embeds,
};

/// A freshly started session and its event stream.
type Opened = (Arc<SessionController>, mpsc::UnboundedReceiver<SessionEvent>);

/// Active sessions, plus a per-guild lock so only one connect runs at a time.
#[derive(Default)]
struct SessionRegistry {
    active: DashMap<GuildId, Arc<SessionController>>,
    connecting: DashMap<GuildId, Arc<tokio::sync::Mutex<()>>>,
}

impl SessionRegistry {
    fn get(&self, guild_id: GuildId) -> Option<Arc<SessionController>> {
        self.active.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Returns the guild's session, starting one with `open` when there is none.
    ///
    /// Callers for the same guild wait for each other, so `open` runs at most
    /// once per session. With `reuse` off an existing session is
    /// `AlreadyConnected`. The event stream is handed out only to the caller
    /// that started the session.
    async fn get_or_open<F, Fut>(
        &self,
        guild_id: GuildId,
        reuse: bool,
        open: F,
    ) -> Result<(Arc<SessionController>, Option<mpsc::UnboundedReceiver<SessionEvent>>), PlaybackError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Opened, PlaybackError>>,
    {
        let lock = self.connecting.entry(guild_id).or_default().clone();
        let _connecting = lock.lock().await;

        if let Some(existing) = self.get(guild_id) {
            return if reuse {
                Ok((existing, None))
            } else {
                Err(PlaybackError::AlreadyConnected)
            };
        }

        let (session, events) = open().await?;
        self.active.insert(guild_id, session.clone());
        Ok((session, Some(events)))
    }

    /// Drops the guild's entry if it still is `session`.
    fn release(&self, guild_id: GuildId, session: &Weak<SessionController>) {
        self.active.remove_if(&guild_id, |_, current| {
            std::ptr::eq(Arc::as_ptr(current), session.as_ptr())
        });
    }
}

/// What a command answers with.
enum Reply {
    Text(String),
    Embed(CreateEmbed),
    Silent,
}

/// Main Discord event handler.
///
/// ## Fields
///
/// - `config`: global configuration (prefix, limits, extractor)
/// - `storage`: per-guild settings, shared behind an async mutex
/// - `resolver`: the single yt-dlp resolver all sessions share
/// - `sessions`: active sessions, removed when they disconnect
pub struct MusicBot {
    config: Arc<Config>,
    storage: Arc<tokio::sync::Mutex<JsonStorage>>,
    resolver: Arc<YtDlpResolver>,
    sessions: Arc<SessionRegistry>,
    http: reqwest::Client,
}

impl MusicBot {
    pub fn new(
        config: Config,
        storage: Arc<tokio::sync::Mutex<JsonStorage>>,
        resolver: Arc<YtDlpResolver>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            resolver,
            sessions: Arc::new(SessionRegistry::default()),
            http,
        }
    }

    fn session(&self, guild_id: GuildId) -> Result<Arc<SessionController>, PlaybackError> {
        self.sessions
            .get(guild_id)
            .ok_or(PlaybackError::NoActiveSession)
    }

    async fn settings(&self, guild_id: GuildId) -> Result<GuildSettings> {
        self.storage.lock().await.get_settings(guild_id.get()).await
    }

    /// Returns the guild's session, joining `channel` and opening one when
    /// needed. With `reuse` off an existing session is `AlreadyConnected`.
    ///
    /// Events of a new session are posted to `notify` when given. The session
    /// is removed from the registry once it reports `Disconnected`.
    async fn connect(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel: ChannelId,
        notify: Option<ChannelId>,
        settings: &GuildSettings,
        reuse: bool,
    ) -> Result<Arc<SessionController>, PlaybackError> {
        let (session, events) = self
            .sessions
            .get_or_open(guild_id, reuse, || self.open_session(ctx, guild_id, channel, settings))
            .await?;

        if let Some(events) = events {
            tokio::spawn(forward_events(
                ctx.http.clone(),
                guild_id,
                notify,
                events,
                self.sessions.clone(),
                Arc::downgrade(&session),
            ));
            info!("🔊 Connected to channel {} in guild {}", channel, guild_id);
        }

        Ok(session)
    }

    async fn open_session(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel: ChannelId,
        settings: &GuildSettings,
    ) -> Result<Opened, PlaybackError> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| PlaybackError::Transport("voice client is not initialised".to_string()))?;

        manager
            .join(guild_id, channel)
            .await
            .map_err(|e| PlaybackError::Transport(e.to_string()))?;

        if let Some(nickname) = &settings.default_nickname {
            if let Err(e) = guild_id.edit_nickname(&ctx.http, Some(nickname.as_str())).await {
                warn!("⚠️ Could not set nickname in guild {}: {}", guild_id, e);
            }
        }

        let transport = Arc::new(SongbirdTransport::new(
            guild_id,
            manager,
            ctx.cache.clone(),
            self.http.clone(),
        ));
        let options = SessionOptions::from_config(&self.config, settings);
        Ok(SessionController::start(transport, self.resolver.clone(), options))
    }

    async fn handle_message(&self, ctx: &Context, msg: &Message) -> Result<()> {
        let Some(guild_id) = msg.guild_id else {
            return Ok(());
        };

        let command = match commands::parse(&msg.content, &self.config.command_prefix) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(()),
            Err(e) => {
                msg.channel_id.say(&ctx.http, e.to_string()).await?;
                return Ok(());
            }
        };

        let settings = self.settings(guild_id).await?;
        let bot_id = ctx.cache.current_user().id;
        let access = CommandContext {
            text_channel: msg.channel_id.get(),
            author_voice: voice_channel_of(ctx, guild_id, msg.author.id).map(|c| c.get()),
            bot_voice: voice_channel_of(ctx, guild_id, bot_id).map(|c| c.get()),
        };

        if let Err(denied) = check_access(
            &command,
            settings.command_channel,
            settings.user_must_be_in_vc,
            access,
        ) {
            msg.channel_id.say(&ctx.http, denied.message()).await?;
            return Ok(());
        }

        debug!("📨 {} from {} in guild {}", command.name(), msg.author.name, guild_id);

        let reply = if command.is_administrative() {
            self.run_admin(ctx, msg, guild_id, command, &settings).await?
        } else {
            match self.run_playback(ctx, msg, guild_id, command, &settings, access).await {
                Ok(reply) => reply,
                Err(e) => {
                    debug!("↩️ Command refused in guild {}: {}", guild_id, e);
                    Reply::Text(e.to_string())
                }
            }
        };

        match reply {
            Reply::Text(text) => {
                msg.channel_id.say(&ctx.http, text).await?;
            }
            Reply::Embed(embed) => {
                msg.channel_id
                    .send_message(&ctx.http, CreateMessage::new().embed(embed))
                    .await?;
            }
            Reply::Silent => {}
        }

        Ok(())
    }

    async fn run_playback(
        &self,
        ctx: &Context,
        msg: &Message,
        guild_id: GuildId,
        command: Command,
        settings: &GuildSettings,
        access: CommandContext,
    ) -> Result<Reply, PlaybackError> {
        let reply = match command {
            Command::Play(query) => {
                let session = match self.session(guild_id) {
                    Ok(session) => session,
                    Err(_) => {
                        let channel = access
                            .author_voice
                            .map(ChannelId::new)
                            .ok_or(PlaybackError::NotInVoiceChannel)?;
                        self.connect(ctx, guild_id, channel, Some(msg.channel_id), settings, true)
                            .await?
                    }
                };

                match session.submit(&query).await? {
                    // The NowPlaying event already announces it.
                    SubmitOutcome::Started(_) => Reply::Silent,
                    SubmitOutcome::Queued { track, position } => {
                        Reply::Embed(embeds::queued_embed(&track, position))
                    }
                    SubmitOutcome::PlaylistQueued { count, .. } => {
                        Reply::Embed(embeds::playlist_queued_embed(count))
                    }
                }
            }
            Command::Pause => {
                self.session(guild_id)?.pause().await?;
                Reply::Text("⏸️ Paused".to_string())
            }
            Command::Resume => {
                self.session(guild_id)?.resume().await?;
                Reply::Text("▶️ Resumed".to_string())
            }
            Command::Stop => {
                self.session(guild_id)?.stop().await?;
                Reply::Text("⏹️ Stopped".to_string())
            }
            Command::Skip => {
                self.session(guild_id)?.skip().await?;
                Reply::Text("⏭️ Skipped".to_string())
            }
            Command::Previous => match self.session(guild_id)?.previous().await? {
                Some(track) => Reply::Text(format!("⏮️ Back to **{}**", track.display_title())),
                None => Reply::Text("There is no previous song".to_string()),
            },
            Command::Loop => {
                if self.session(guild_id)?.toggle_loop().await? {
                    Reply::Text("🔂 Loop enabled".to_string())
                } else {
                    Reply::Text("➡️ Loop disabled".to_string())
                }
            }
            Command::Shuffle => {
                self.session(guild_id)?.shuffle().await?;
                Reply::Text("🔀 Queue shuffled".to_string())
            }
            Command::Move { from, to } => {
                let track = self.session(guild_id)?.move_track(from, to).await?;
                Reply::Text(format!("↕️ Moved **{}** to position {}", track.display_title(), to + 1))
            }
            Command::Remove(index) => {
                let track = self.session(guild_id)?.remove(index).await?;
                Reply::Text(format!("🗑️ Removed **{}**", track.display_title()))
            }
            Command::Clear => {
                self.session(guild_id)?.clear().await?;
                Reply::Text("🧹 Queue cleared".to_string())
            }
            Command::Volume(None) => {
                let volume = self.session(guild_id)?.volume().await?;
                Reply::Text(format!("🔊 Volume is {}%", volume))
            }
            Command::Volume(Some(value)) => {
                self.session(guild_id)?.set_volume(value).await?;
                Reply::Text(format!("🔊 Volume set to {}%", value))
            }
            Command::Queue => {
                let snapshot = self
                    .session(guild_id)?
                    .queue_snapshot(MAX_QUEUE_DISPLAY)
                    .await?;
                Reply::Embed(embeds::queue_embed(&snapshot))
            }
            Command::History => {
                let titles = self.session(guild_id)?.recent_titles().await?;
                Reply::Text(embeds::history_text(&titles))
            }
            Command::SongInfo => match self.session(guild_id)?.now_playing().await? {
                Some(track) => Reply::Embed(embeds::now_playing_embed(&track)),
                None => return Err(PlaybackError::NothingPlaying),
            },
            Command::Connect => {
                let channel = access
                    .author_voice
                    .map(ChannelId::new)
                    .ok_or(PlaybackError::NotInVoiceChannel)?;
                self.connect(ctx, guild_id, channel, Some(msg.channel_id), settings, false)
                    .await?;
                Reply::Text(format!("🔊 Connected to <#{}>", channel))
            }
            Command::Disconnect => {
                // The session announces its own departure.
                self.session(guild_id)?
                    .disconnect(DisconnectReason::Requested)
                    .await?;
                Reply::Silent
            }
            Command::Settings | Command::Set { .. } | Command::Ping | Command::Help => {
                Reply::Silent
            }
        };

        Ok(reply)
    }

    async fn run_admin(
        &self,
        ctx: &Context,
        msg: &Message,
        guild_id: GuildId,
        command: Command,
        settings: &GuildSettings,
    ) -> Result<Reply> {
        let reply = match command {
            Command::Settings => {
                let name = guild_id
                    .name(&ctx.cache)
                    .unwrap_or_else(|| guild_id.to_string());
                Reply::Embed(embeds::settings_embed(settings, &name))
            }
            Command::Set { name, value } => {
                match SettingUpdate::parse(&name, &value, self.config.allow_idle_timeout_edit) {
                    Ok(update) => {
                        self.storage
                            .lock()
                            .await
                            .update_settings(guild_id.get(), update)
                            .await?;
                        Reply::Embed(embeds::success_embed(
                            "Setting updated",
                            &format!("`{}` is now `{}`", name.to_lowercase(), value),
                        ))
                    }
                    Err(e) => Reply::Embed(embeds::error_embed(&e.to_string())),
                }
            }
            Command::Ping => {
                let started = Instant::now();
                let mut pong = msg.channel_id.say(&ctx.http, "🏓 Pong!").await?;
                let elapsed = started.elapsed().as_millis();
                pong.edit(&ctx.http, EditMessage::new().content(format!("🏓 Pong! {}ms", elapsed)))
                    .await?;
                Reply::Silent
            }
            Command::Help => Reply::Embed(embeds::help_embed(HELP_TEXT)),
            _ => Reply::Silent,
        };

        Ok(reply)
    }

    /// Joins the configured start channel of each guild, if any.
    async fn join_start_channels(&self, ctx: &Context, guilds: Vec<GuildId>) {
        for guild_id in guilds {
            let settings = match self.settings(guild_id).await {
                Ok(settings) => settings,
                Err(e) => {
                    error!("❌ Could not load settings for guild {}: {:?}", guild_id, e);
                    continue;
                }
            };

            let Some(channel) = settings.start_voice_channel.map(ChannelId::new) else {
                continue;
            };
            let notify = settings.command_channel.map(ChannelId::new);

            match self.connect(ctx, guild_id, channel, notify, &settings, false).await {
                Ok(_) | Err(PlaybackError::AlreadyConnected) => {}
                Err(e) => warn!("⚠️ Could not join start channel in guild {}: {}", guild_id, e),
            }
        }
    }
}

/// Voice channel a user currently sits in, from the cache.
fn voice_channel_of(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

/// Posts session events until the session disconnects, then drops it from the map.
async fn forward_events(
    http: Arc<Http>,
    guild_id: GuildId,
    notify: Option<ChannelId>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    sessions: Arc<SessionRegistry>,
    session: Weak<SessionController>,
) {
    while let Some(event) = events.recv().await {
        let message = match &event {
            SessionEvent::NowPlaying(track) => {
                Some(CreateMessage::new().embed(embeds::now_playing_embed(track)))
            }
            SessionEvent::TrackFailed { track, error } => {
                warn!("⚠️ Skipping {} in guild {}: {}", track.reference(), guild_id, error);
                Some(CreateMessage::new().content(format!(
                    "⚠️ Could not play **{}**: {}",
                    track.display_title(),
                    error
                )))
            }
            SessionEvent::QueueExhausted => {
                debug!("📭 Queue finished in guild {}", guild_id);
                None
            }
            SessionEvent::Disconnected { reason } => {
                Some(CreateMessage::new().content(format!("👋 Disconnected: {}", reason)))
            }
        };

        if let (Some(channel), Some(message)) = (notify, message) {
            if let Err(e) = channel.send_message(&http, message).await {
                warn!("⚠️ Could not post to channel {}: {}", channel, e);
            }
        }

        if matches!(event, SessionEvent::Disconnected { .. }) {
            break;
        }
    }

    sessions.release(guild_id, &session);
    debug!("🧹 Session of guild {} released", guild_id);
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        let guilds = ready.guilds.iter().map(|guild| guild.id).collect();
        self.join_start_channels(&ctx, guilds).await;
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        if let Err(e) = self.handle_message(&ctx, &msg).await {
            error!("❌ Error handling message in channel {}: {:?}", msg.channel_id, e);
        }
    }

    /// Tears the session down when the bot is removed from voice by someone else.
    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        if new.user_id != ctx.cache.current_user().id || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };

        if let Ok(session) = self.session(guild_id) {
            info!("🔌 Removed from voice in guild {}", guild_id);
            if let Err(e) = session.disconnect(DisconnectReason::Requested).await {
                debug!("Session in guild {} already closed: {}", guild_id, e);
            }
        }
    }
}
