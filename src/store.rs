use crate::{
    constants::DEFAULT_VOICE,
    event::{Event, EventBus, GuildAction},
    ids::{ChannelId, GuildId},
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

/// Persisted per-guild configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct GuildRecord {
    pub guild_id: GuildId,
    pub audio_channel: ChannelId,
    pub text_channel: ChannelId,
    #[serde(default = "default_voice")]
    pub fallback_voice: String,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

impl GuildRecord {
    pub fn new(guild_id: GuildId, audio_channel: ChannelId, text_channel: ChannelId) -> Self {
        Self {
            guild_id,
            audio_channel,
            text_channel,
            fallback_voice: default_voice(),
        }
    }
}

#[derive(Default, Deserialize, Serialize)]
struct GuildFile {
    #[serde(default, rename = "guild")]
    guilds: Vec<GuildRecord>,
}

/// TOML file of guild records, one `[[guild]]` table each.
pub struct GuildStore {
    path: PathBuf,
    records: BTreeMap<GuildId, GuildRecord>,
}

impl GuildStore {
    /// Read the store, starting empty if the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str::<GuildFile>(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No guild store at {}, starting empty", path.display());
                GuildFile::default()
            }
            Err(e) => return Err(e.into()),
        };

        let records = file
            .guilds
            .into_iter()
            .map(|record| (record.guild_id, record))
            .collect();

        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> impl Iterator<Item = &GuildRecord> {
        self.records.values()
    }

    pub fn get(&self, guild: GuildId) -> Option<&GuildRecord> {
        self.records.get(&guild)
    }

    pub fn upsert(&mut self, record: GuildRecord) {
        self.records.insert(record.guild_id, record);
    }

    pub fn remove(&mut self, guild: GuildId) -> Option<GuildRecord> {
        self.records.remove(&guild)
    }

    /// Write to a temp file next to the store, then rename over it.
    pub async fn save(&self) -> Result<()> {
        let file = GuildFile {
            guilds: self.records.values().cloned().collect(),
        };
        let contents = toml::to_string_pretty(&file)?;

        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(())
    }

    /// Apply one configuration change. Returns `true` if anything changed.
    pub fn apply(&mut self, action: GuildAction) -> bool {
        match action {
            GuildAction::Upserted(record) => {
                if self.records.get(&record.guild_id) == Some(&record) {
                    return false;
                }
                self.upsert(record);
                true
            }
            GuildAction::Removed(guild) => self.remove(guild).is_some(),
        }
    }
}

/// Persist guild configuration changes reported on the bus.
///
/// Rides the lossy event bus: if more than `EVENT_CAPACITY` changes arrive
/// before the task catches up, the skipped ones are not written. Every
/// `Upserted` carries the whole record, so only a guild whose last change was
/// skipped ends up stale on disk.
pub fn init(bus: &EventBus, mut store: GuildStore) {
    let mut subscriber = bus.subscribe();

    tokio::spawn(async move {
        while let Some(event) = subscriber.recv().await {
            let Event::Guild(action) = event else {
                continue;
            };

            if !store.apply(action) {
                continue;
            }

            if let Err(e) = store.save().await {
                error!(
                    "Error while saving guild store {}: {:?}",
                    store.path().display(),
                    e
                );
            }
        }
    });
}
