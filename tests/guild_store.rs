//! Integration tests for guild configuration persistence.

mod common;

use common::*;
use guild_tts::store::{self, GuildStore};
use std::time::Duration;
use tempfile::TempDir;

fn store_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("guilds.toml")
}

#[tokio::test]
async fn test_missing_file_opens_empty() {
    let dir = TempDir::new().unwrap();

    let store = GuildStore::open(store_path(&dir)).await.unwrap();

    assert_eq!(store.records().count(), 0);
}

#[tokio::test]
async fn test_save_and_reopen() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);

    let mut store = GuildStore::open(&path).await.unwrap();
    store.upsert(test_record());
    store.upsert(GuildRecord {
        fallback_voice: "de-DE-KatjaNeural".to_string(),
        ..GuildRecord::new(GuildId(7), ChannelId(8), ChannelId(9))
    });
    store.save().await.unwrap();

    let reopened = GuildStore::open(&path).await.unwrap();
    let records: Vec<_> = reopened.records().cloned().collect();

    assert_eq!(records.len(), 2);
    assert_eq!(reopened.get(GUILD), Some(&test_record()));
    assert_eq!(
        reopened.get(GuildId(7)).map(|r| r.fallback_voice.as_str()),
        Some("de-DE-KatjaNeural")
    );

    // No temp file left behind
    assert!(!path.with_extension("toml.tmp").exists());
}

#[tokio::test]
async fn test_missing_voice_uses_default() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    tokio::fs::write(
        &path,
        "[[guild]]\nguild_id = 1\naudio_channel = 2\ntext_channel = 3\n",
    )
    .await
    .unwrap();

    let store = GuildStore::open(&path).await.unwrap();
    let record = store.get(GuildId(1)).unwrap();

    assert_eq!(record.audio_channel, ChannelId(2));
    assert_eq!(record.text_channel, ChannelId(3));
    assert_eq!(record.fallback_voice, "en-US-JennyNeural");
}

#[tokio::test]
async fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    tokio::fs::write(&path, "[[guild]]\nguild_id = \"nope\"\n")
        .await
        .unwrap();

    assert!(GuildStore::open(&path).await.is_err());
}

#[tokio::test]
async fn test_apply_reports_changes() {
    let dir = TempDir::new().unwrap();
    let mut store = GuildStore::open(store_path(&dir)).await.unwrap();

    assert!(store.apply(GuildAction::Upserted(test_record())));
    assert!(!store.apply(GuildAction::Upserted(test_record())));
    assert!(store.apply(GuildAction::Removed(GUILD)));
    assert!(!store.apply(GuildAction::Removed(GUILD)));
}

#[tokio::test]
async fn test_registry_changes_are_persisted() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    let harness = Harness::new(FRAME_SIZE);
    let registry = harness.registry();

    store::init(&harness.bus, GuildStore::open(&path).await.unwrap());

    registry.create_or_replace(test_record());
    registry.set_voice(GUILD, "sv-SE-SofieNeural").unwrap();
    registry.create_or_replace(GuildRecord::new(GuildId(5), ChannelId(6), ChannelId(7)));
    registry.remove(GuildId(5)).unwrap();

    let expected = GuildRecord {
        fallback_voice: "sv-SE-SofieNeural".to_string(),
        ..test_record()
    };

    let mut persisted = Vec::new();
    for _ in 0..200 {
        if let Ok(store) = GuildStore::open(&path).await {
            persisted = store.records().cloned().collect();
            if persisted == vec![expected.clone()] {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(persisted, vec![expected]);
}
