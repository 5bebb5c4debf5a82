use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, path::PathBuf, str::FromStr};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::config::Config;

const MAX_NICKNAME_LENGTH: usize = 32;

/// Per-guild settings stored as JSON.
///
/// Fields missing from older files are filled with defaults on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    pub guild_id: u64,
    pub default_nickname: Option<String>,
    pub command_channel: Option<u64>,
    pub start_voice_channel: Option<u64>,
    pub user_must_be_in_vc: bool,
    pub button_emote: Option<String>,
    pub default_volume: u8,
    pub vc_timeout: bool,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            guild_id: 0,
            default_nickname: None,
            command_channel: None,
            start_voice_channel: None,
            user_must_be_in_vc: true,
            button_emote: None,
            default_volume: 100,
            vc_timeout: true,
        }
    }
}

impl GuildSettings {
    /// Settings a new guild starts with.
    pub fn template(config: &Config) -> Self {
        Self {
            default_volume: config.default_volume.min(100),
            vc_timeout: config.idle_timeout_default,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, update: SettingUpdate) {
        match update {
            SettingUpdate::DefaultNickname(nickname) => self.default_nickname = nickname,
            SettingUpdate::CommandChannel(channel) => self.command_channel = channel,
            SettingUpdate::StartVoiceChannel(channel) => {
                self.start_voice_channel = channel;
                // A fixed home channel means the bot stays around.
                if channel.is_some() {
                    self.vc_timeout = false;
                }
            }
            SettingUpdate::UserMustBeInVc(required) => self.user_must_be_in_vc = required,
            SettingUpdate::ButtonEmote(emote) => self.button_emote = emote,
            SettingUpdate::DefaultVolume(volume) => self.default_volume = volume,
            SettingUpdate::VcTimeout(enabled) => {
                self.vc_timeout = enabled;
                if enabled {
                    self.start_voice_channel = None;
                }
            }
        }
    }

    /// `(name, value)` pairs for display, without the guild id.
    pub fn fields(&self) -> Vec<(SettingKey, String)> {
        let unset = || "Not Set".to_string();
        SettingKey::ALL
            .iter()
            .map(|key| {
                let value = match key {
                    SettingKey::DefaultNickname => self.default_nickname.clone().unwrap_or_else(unset),
                    SettingKey::CommandChannel => self
                        .command_channel
                        .map_or_else(unset, |id| format!("<#{}>", id)),
                    SettingKey::StartVoiceChannel => self
                        .start_voice_channel
                        .map_or_else(unset, |id| format!("<#{}>", id)),
                    SettingKey::UserMustBeInVc => self.user_must_be_in_vc.to_string(),
                    SettingKey::ButtonEmote => self.button_emote.clone().unwrap_or_else(unset),
                    SettingKey::DefaultVolume => self.default_volume.to_string(),
                    SettingKey::VcTimeout => self.vc_timeout.to_string(),
                };
                (*key, value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    DefaultNickname,
    CommandChannel,
    StartVoiceChannel,
    UserMustBeInVc,
    ButtonEmote,
    DefaultVolume,
    VcTimeout,
}

impl SettingKey {
    pub const ALL: [SettingKey; 7] = [
        SettingKey::DefaultNickname,
        SettingKey::CommandChannel,
        SettingKey::StartVoiceChannel,
        SettingKey::UserMustBeInVc,
        SettingKey::ButtonEmote,
        SettingKey::DefaultVolume,
        SettingKey::VcTimeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::DefaultNickname => "default_nickname",
            SettingKey::CommandChannel => "command_channel",
            SettingKey::StartVoiceChannel => "start_voice_channel",
            SettingKey::UserMustBeInVc => "user_must_be_in_vc",
            SettingKey::ButtonEmote => "button_emote",
            SettingKey::DefaultVolume => "default_volume",
            SettingKey::VcTimeout => "vc_timeout",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        SettingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == name)
            .ok_or(SettingsError::UnknownSetting(name))
    }
}

/// A validated change to one setting. `None` payloads mean "unset".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingUpdate {
    DefaultNickname(Option<String>),
    CommandChannel(Option<u64>),
    StartVoiceChannel(Option<u64>),
    UserMustBeInVc(bool),
    ButtonEmote(Option<String>),
    DefaultVolume(u8),
    VcTimeout(bool),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Setting `{0}` not found")]
    UnknownSetting(String),
    #[error("Nickname exceeds the 32 character limit")]
    NicknameTooLong,
    #[error("`{0}` is not a channel, use a channel mention or id (or `unset`)")]
    InvalidChannel(String),
    #[error("Value for `{0}` must be True/False")]
    NotABoolean(SettingKey),
    #[error("Default volume must be a number between 0 and 100")]
    InvalidVolume,
    #[error("Value for `{0}` cannot be empty")]
    MissingValue(SettingKey),
    #[error("This value cannot be modified")]
    Locked,
}

impl SettingUpdate {
    /// Parses `set <name> <value>`. `allow_vc_timeout_edit` is the global switch
    /// that can freeze the idle timeout setting.
    pub fn parse(name: &str, value: &str, allow_vc_timeout_edit: bool) -> Result<Self, SettingsError> {
        let key: SettingKey = name.parse()?;
        let value = value.trim();
        let unset = value.eq_ignore_ascii_case("unset");

        if value.is_empty() {
            return Err(SettingsError::MissingValue(key));
        }

        let update = match key {
            SettingKey::DefaultNickname => {
                if unset {
                    SettingUpdate::DefaultNickname(None)
                } else if value.chars().count() > MAX_NICKNAME_LENGTH {
                    return Err(SettingsError::NicknameTooLong);
                } else {
                    SettingUpdate::DefaultNickname(Some(value.to_string()))
                }
            }
            SettingKey::CommandChannel => {
                SettingUpdate::CommandChannel(if unset { None } else { Some(parse_channel(value)?) })
            }
            SettingKey::StartVoiceChannel => {
                SettingUpdate::StartVoiceChannel(if unset { None } else { Some(parse_channel(value)?) })
            }
            SettingKey::UserMustBeInVc => SettingUpdate::UserMustBeInVc(parse_bool(key, value)?),
            SettingKey::ButtonEmote => {
                SettingUpdate::ButtonEmote((!unset).then(|| value.to_string()))
            }
            SettingKey::DefaultVolume => SettingUpdate::DefaultVolume(
                value
                    .parse::<u8>()
                    .ok()
                    .filter(|volume| *volume <= 100)
                    .ok_or(SettingsError::InvalidVolume)?,
            ),
            SettingKey::VcTimeout => {
                if !allow_vc_timeout_edit {
                    return Err(SettingsError::Locked);
                }
                SettingUpdate::VcTimeout(parse_bool(key, value)?)
            }
        };

        Ok(update)
    }
}

fn parse_bool(key: SettingKey, value: &str) -> Result<bool, SettingsError> {
    match value.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(SettingsError::NotABoolean(key)),
    }
}

/// Channel id from a raw id or a `<#id>` mention.
fn parse_channel(value: &str) -> Result<u64, SettingsError> {
    let raw = value
        .strip_prefix("<#")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(value);
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| SettingsError::InvalidChannel(value.to_string()))
}

/// Settings store backed by one JSON file per guild.
pub struct JsonStorage {
    data_dir: PathBuf,
    template: GuildSettings,
    settings_cache: HashMap<u64, GuildSettings>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf, template: GuildSettings) -> Result<Self> {
        let servers_dir = data_dir.join("servers");
        fs::create_dir_all(&servers_dir).await?;

        info!("📁 Storage initialised in {}", data_dir.display());

        let mut storage = Self {
            data_dir,
            template,
            settings_cache: HashMap::new(),
        };
        storage.load_all_servers().await?;

        Ok(storage)
    }

    /// Settings of a guild, created from the template on first access.
    pub async fn get_settings(&mut self, guild_id: u64) -> Result<GuildSettings> {
        if let Some(settings) = self.settings_cache.get(&guild_id) {
            return Ok(settings.clone());
        }

        let settings = match self.load_settings(guild_id).await {
            Ok(settings) => settings,
            Err(_) => {
                let settings = GuildSettings {
                    guild_id,
                    ..self.template.clone()
                };
                self.save_settings(&settings).await?;
                info!("📝 Default settings created for guild {}", guild_id);
                settings
            }
        };

        self.settings_cache.insert(guild_id, settings.clone());
        Ok(settings)
    }

    /// Applies an update and persists the result.
    pub async fn update_settings(
        &mut self,
        guild_id: u64,
        update: SettingUpdate,
    ) -> Result<GuildSettings> {
        let mut settings = self.get_settings(guild_id).await?;
        settings.apply(update);

        self.save_settings(&settings).await?;
        self.settings_cache.insert(guild_id, settings.clone());

        info!("💾 Settings updated for guild {}", guild_id);
        Ok(settings)
    }

    async fn load_settings(&self, guild_id: u64) -> Result<GuildSettings> {
        let content = fs::read_to_string(self.settings_path(guild_id)).await?;
        let mut settings: GuildSettings = serde_json::from_str(&content)?;
        settings.guild_id = guild_id;
        Ok(settings)
    }

    async fn save_settings(&self, settings: &GuildSettings) -> Result<()> {
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.settings_path(settings.guild_id), content).await?;
        Ok(())
    }

    async fn load_all_servers(&mut self) -> Result<()> {
        let mut files = fs::read_dir(self.data_dir.join("servers")).await?;
        let mut loaded = 0;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let Some(guild_id) = path
                .file_stem()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };

            match self.load_settings(guild_id).await {
                Ok(settings) => {
                    self.settings_cache.insert(guild_id, settings);
                    loaded += 1;
                }
                Err(e) => warn!("⚠️ Could not load settings for guild {}: {}", guild_id, e),
            }
        }

        if loaded > 0 {
            info!("📂 Loaded settings for {} guilds", loaded);
        }
        Ok(())
    }

    fn settings_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir
            .join("servers")
            .join(format!("guild_{}.json", guild_id))
    }
}
