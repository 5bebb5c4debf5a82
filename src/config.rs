use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::audio::preload::MAX_PRELOAD_WIDTH;

pub const DEFAULT_CRAWLER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Paths
    pub data_dir: PathBuf,

    // Sessions
    pub idle_timeout: Duration,
    pub idle_timeout_default: bool,
    pub allow_idle_timeout_edit: bool,
    pub preload_width: usize,
    pub history_length: usize,
    pub title_history_length: usize,
    pub default_volume: u8,

    // Extractor
    pub ytdlp_path: String,
    pub cookie_path: Option<PathBuf>,
    pub resolve_timeout: Duration,
    pub crawler_agent: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("cannot create {}", config.data_dir.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Builds the config from any key/value source, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            command_prefix: var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),

            idle_timeout: match var("IDLE_TIMEOUT") {
                Some(value) => parse_duration(&value).context("IDLE_TIMEOUT")?,
                None => defaults.idle_timeout,
            },
            idle_timeout_default: match var("IDLE_TIMEOUT_DEFAULT") {
                Some(value) => value.parse().context("IDLE_TIMEOUT_DEFAULT")?,
                None => defaults.idle_timeout_default,
            },
            allow_idle_timeout_edit: match var("ALLOW_IDLE_TIMEOUT_EDIT") {
                Some(value) => value.parse().context("ALLOW_IDLE_TIMEOUT_EDIT")?,
                None => defaults.allow_idle_timeout_edit,
            },
            preload_width: match var("PRELOAD_WIDTH") {
                Some(value) => value.parse().context("PRELOAD_WIDTH")?,
                None => defaults.preload_width,
            },
            history_length: match var("HISTORY_LENGTH") {
                Some(value) => value.parse().context("HISTORY_LENGTH")?,
                None => defaults.history_length,
            },
            title_history_length: match var("TITLE_HISTORY_LENGTH") {
                Some(value) => value.parse().context("TITLE_HISTORY_LENGTH")?,
                None => defaults.title_history_length,
            },
            default_volume: match var("DEFAULT_VOLUME") {
                Some(value) => value.parse().context("DEFAULT_VOLUME")?,
                None => defaults.default_volume,
            },

            ytdlp_path: var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            cookie_path: var("COOKIE_PATH").map(PathBuf::from),
            resolve_timeout: match var("RESOLVE_TIMEOUT") {
                Some(value) => parse_duration(&value).context("RESOLVE_TIMEOUT")?,
                None => defaults.resolve_timeout,
            },
            crawler_agent: var("CRAWLER_AGENT").unwrap_or(defaults.crawler_agent),
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// - The token and the command prefix must be present.
    /// - Volume must be between 0 and 100.
    /// - Timeouts, history sizes and the preload width must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.command_prefix.is_empty() || self.command_prefix.contains(char::is_whitespace) {
            anyhow::bail!("Command prefix must be non-empty and without spaces, got: '{}'", self.command_prefix);
        }

        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.idle_timeout.is_zero() {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.resolve_timeout.is_zero() {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.preload_width == 0 {
            anyhow::bail!("Preload width must be at least 1");
        }

        if self.history_length == 0 || self.title_history_length == 0 {
            anyhow::bail!("History lengths must be greater than 0");
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("YTDLP_PATH must not be empty");
        }

        Ok(())
    }

    /// Preload width with the hard ceiling applied.
    pub fn effective_preload_width(&self) -> usize {
        self.preload_width.clamp(1, MAX_PRELOAD_WIDTH)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Prefix: '{}', data in {}\n  \
            Sessions: idle timeout {} ({} by default, editable: {}), {}% volume\n  \
            Queue: preload {} tracks, history {}, titles {}\n  \
            Extractor: {} (cookies: {}), timeout {}",
            self.command_prefix,
            self.data_dir.display(),
            humantime::format_duration(self.idle_timeout),
            if self.idle_timeout_default { "on" } else { "off" },
            self.allow_idle_timeout_edit,
            self.default_volume,
            self.effective_preload_width(),
            self.history_length,
            self.title_history_length,
            self.ytdlp_path,
            self.cookie_path
                .as_ref()
                .map_or("none".to_string(), |path| path.display().to_string()),
            humantime::format_duration(self.resolve_timeout),
        )
    }
}

/// Plain seconds ("600") or a humantime span ("10m", "1h 30m").
fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).with_context(|| format!("invalid duration '{}'", value))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            data_dir: "/app/data".into(),

            idle_timeout: Duration::from_secs(600),
            idle_timeout_default: true,
            allow_idle_timeout_edit: true,
            preload_width: 15,
            history_length: 10,
            title_history_length: 15,
            default_volume: 100,

            ytdlp_path: "yt-dlp".to_string(),
            cookie_path: None,
            resolve_timeout: Duration::from_secs(45),
            crawler_agent: DEFAULT_CRAWLER_AGENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults_apply() {
        let config = config_from(&[("DISCORD_TOKEN", "token")]).unwrap();

        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.preload_width, 15);
        assert_eq!(config.history_length, 10);
        assert_eq!(config.title_history_length, 15);
        assert_eq!(config.default_volume, 100);
        assert_eq!(config.resolve_timeout, Duration::from_secs(45));
        assert!(config.cookie_path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_token_fails() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("DISCORD_TOKEN", "  ")]).is_err());
    }

    #[test]
    fn test_durations_accept_seconds_and_humantime() {
        let config = config_from(&[
            ("DISCORD_TOKEN", "token"),
            ("IDLE_TIMEOUT", "300"),
            ("RESOLVE_TIMEOUT", "1m 30s"),
        ])
        .unwrap();

        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.resolve_timeout, Duration::from_secs(90));
        assert!(config_from(&[("DISCORD_TOKEN", "t"), ("IDLE_TIMEOUT", "soon")]).is_err());
    }

    #[test]
    fn test_preload_width_ceiling() {
        let config = config_from(&[("DISCORD_TOKEN", "token"), ("PRELOAD_WIDTH", "40")]).unwrap();
        assert_eq!(config.effective_preload_width(), MAX_PRELOAD_WIDTH);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = config_from(&[("DISCORD_TOKEN", "token")]).unwrap();

        let loud = Config { default_volume: 101, ..base.clone() };
        assert!(loud.validate().is_err());

        let spaced = Config { command_prefix: "! ".to_string(), ..base.clone() };
        assert!(spaced.validate().is_err());

        let no_workers = Config { preload_width: 0, ..base.clone() };
        assert!(no_workers.validate().is_err());

        let no_history = Config { history_length: 0, ..base };
        assert!(no_history.validate().is_err());
    }

    #[test]
    fn test_summary_hides_token() {
        let config = config_from(&[("DISCORD_TOKEN", "super-secret")]).unwrap();
        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("10m"));
    }
}
