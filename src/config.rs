use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::read_to_string;

#[cfg(feature = "discord")]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DiscordConfig {
    /// Discord bot token
    pub discord_token: String,

    /// Prefix for text commands, slash commands work regardless
    #[serde(default = "default_prefix")]
    pub command_prefix: String,
}

#[cfg(feature = "discord")]
fn default_prefix() -> String {
    ".".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AzureConfig {
    /// Cognitive Services subscription key
    pub azure_key: String,

    #[serde(default = "default_region")]
    pub azure_region: String,
}

fn default_region() -> String {
    "eastus".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EspeakConfig {
    /// espeak-ng voice name, e.g. "en-us"
    pub espeak_voice: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_guild_file")]
    pub guild_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            guild_file: default_guild_file(),
        }
    }
}

fn default_guild_file() -> String {
    "guilds.toml".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(flatten)]
    pub store: StoreConfig,

    #[serde(flatten)]
    pub azure: Option<AzureConfig>,

    #[serde(flatten)]
    pub espeak: Option<EspeakConfig>,

    #[cfg(feature = "discord")]
    #[serde(flatten)]
    pub discord: Option<DiscordConfig>,
}

impl Config {
    /// Parse `Config.toml` contents.
    ///
    /// Flattened optional sections deserialize to `None` when any of their
    /// fields is missing or malformed, so a section with some but not all of
    /// its keys is rejected here instead of being silently ignored.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        let table: toml::Table = toml::from_str(contents)?;

        ensure_complete(
            &table,
            "azure",
            config.azure.is_some(),
            &["azure_key", "azure_region"],
        )?;
        ensure_complete(&table, "espeak", config.espeak.is_some(), &["espeak_voice"])?;
        #[cfg(feature = "discord")]
        ensure_complete(
            &table,
            "discord",
            config.discord.is_some(),
            &["discord_token", "command_prefix"],
        )?;

        Ok(config)
    }
}

fn ensure_complete(table: &toml::Table, section: &str, parsed: bool, keys: &[&str]) -> Result<()> {
    if parsed {
        return Ok(());
    }

    if let Some(key) = keys.iter().find(|key| table.contains_key(**key)) {
        bail!(
            "Invalid {section} configuration: {key} is set but the section is incomplete or malformed"
        );
    }

    Ok(())
}

pub async fn load_from(path: impl AsRef<Path>) -> Result<Config> {
    let config = read_to_string(path).await?;
    Config::parse(&config)
}

pub async fn load() -> Result<Config> {
    load_from("Config.toml").await
}
