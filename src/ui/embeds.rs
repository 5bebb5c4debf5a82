use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::session::QueueSnapshot,
    sources::Track,
    storage::GuildSettings,
};

/// Standard colour palette for the bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

/// Embed sent when a track starts playing.
pub fn now_playing_embed(track: &Track) -> CreateEmbed {
    track_embed(track, "🎵 Now Playing").color(colors::SUCCESS_GREEN)
}

/// Embed sent when a track is added behind others. `position` is 1-based.
pub fn queued_embed(track: &Track, position: usize) -> CreateEmbed {
    track_embed(track, "➕ Added to Queue")
        .color(colors::INFO_BLUE)
        .field("📍 Position", position.to_string(), true)
}

pub fn playlist_queued_embed(count: usize) -> CreateEmbed {
    CreateEmbed::default()
        .title("📃 Playlist Added")
        .description(format!("Queued **{}** songs", count))
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

fn track_embed(track: &Track, heading: &str) -> CreateEmbed {
    let metadata = track.metadata();

    let mut embed = CreateEmbed::default()
        .title(heading)
        .description(format!("**[{}]({})**", track.display_title(), track.link()))
        .field(
            "🎤 Uploader",
            metadata
                .as_ref()
                .and_then(|meta| meta.uploader.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            true,
        )
        .field(
            "⏱️ Duration",
            format_duration(metadata.as_ref().and_then(|meta| meta.duration)),
            true,
        );

    if let Some(thumbnail) = metadata.and_then(|meta| meta.thumbnail) {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Queue listing, one field per upcoming song.
pub fn queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if snapshot.current.is_none() && snapshot.upcoming.is_empty() {
        return embed
            .description("😴 **The queue is empty**")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &snapshot.current {
        let status = if snapshot.loop_enabled { "🔂" } else { "▶️" };
        embed = embed.description(format!(
            "{} **[{}]({})**",
            status,
            current.display_title(),
            current.link()
        ));
    }

    embed = embed.fields(
        queue_fields(&snapshot.upcoming)
            .into_iter()
            .map(|(name, value)| (name, value, false)),
    );

    embed
        .footer(CreateEmbedFooter::new(format!(
            "{} songs queued • Guild Jukebox",
            snapshot.total
        )))
        .timestamp(Timestamp::now())
}

/// `(name, value)` per upcoming track, numbered from 1.
pub fn queue_fields(upcoming: &[Track]) -> Vec<(String, String)> {
    upcoming
        .iter()
        .enumerate()
        .map(|(i, track)| {
            let duration = track.metadata().and_then(|meta| meta.duration);
            (
                format!("{}. {}", i + 1, track.display_title()),
                format!("{} • `{}`", track.link(), format_duration(duration)),
            )
        })
        .collect()
}

/// Plain text reply for the history command, oldest first.
pub fn history_text(titles: &[String]) -> String {
    if titles.is_empty() {
        return "Songs Played:\nNothing has been played yet".to_string();
    }

    let mut text = String::from("Songs Played:");
    for title in titles {
        text.push('\n');
        text.push_str(title);
    }
    text
}

pub fn settings_embed(settings: &GuildSettings, guild_name: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("⚙️ Settings for {}", guild_name))
        .color(colors::INFO_BLUE)
        .fields(
            settings
                .fields()
                .into_iter()
                .map(|(key, value)| (key.as_str(), value, false)),
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn help_embed(help: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Commands")
        .description(help)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
}

pub fn success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
}

/// `m:ss` or `h:mm:ss`, "Unknown" for streams without a known length.
pub fn format_duration(duration: Option<Duration>) -> String {
    let Some(duration) = duration else {
        return "Unknown".to_string();
    };

    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
