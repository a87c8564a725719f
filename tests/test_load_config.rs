use std::fs::{read_to_string, write};

use serde_json::Value;
use tempfile::tempdir;
use zip_sender::load_config::{ConfigStore, Settings};

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&read_to_string(path).unwrap()).unwrap()
}

/// A missing config file is created with every default written out.
#[test]
fn test_load_config_creates_defaults_when_missing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");

    let store = ConfigStore::load(&path).expect("Config should load");

    assert_eq!(store.settings(), &Settings::default());
    let written = read_json(&path);
    assert_eq!(written["channel_id"], "");
    assert_eq!(written["max_size_mb"], 1900);
    assert_eq!(written["threads"], 4);
    assert_eq!(written["compression_level"], 0);
    assert_eq!(written["delete_after_upload"], true);
    assert_eq!(written["max_concurrent_transmissions"], 2);
    assert_eq!(written["api_base_url"], "https://api.telegram.org");
    assert!(written.get("bot_token").is_none());
}

/// Missing keys are filled in and the file rewritten; present values and unknown keys survive.
#[test]
fn test_load_config_fills_missing_keys_and_keeps_unknown_ones() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    write(
        &path,
        r#"{ "channel_id": "-1001", "threads": 8, "api_id": 12345, "theme": "dark" }"#,
    )
    .unwrap();

    let store = ConfigStore::load(&path).expect("Config should load");

    let settings = store.settings();
    assert_eq!(settings.channel_id, "-1001");
    assert_eq!(settings.threads, 8);
    assert_eq!(settings.max_size_mb, 1900);
    assert_eq!(settings.api_id.as_deref(), Some("12345"));

    let written = read_json(&path);
    assert_eq!(written["max_size_mb"], 1900);
    assert_eq!(written["threads"], 8);
    assert_eq!(written["theme"], "dark");
}

/// A file that is not JSON is not overwritten; defaults are used for the run.
#[test]
fn test_load_config_uses_defaults_for_invalid_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    write(&path, "{ not json").unwrap();

    let store = ConfigStore::load(&path).expect("Invalid config falls back to defaults");

    assert_eq!(store.settings(), &Settings::default());
    assert_eq!(read_to_string(&path).unwrap(), "{ not json");
}

/// Wrongly typed values fall back to defaults the same way.
#[test]
fn test_load_config_uses_defaults_for_wrong_types() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    write(&path, r#"{ "threads": "many" }"#).unwrap();

    let store = ConfigStore::load(&path).unwrap();

    assert_eq!(store.settings().threads, 4);
    assert_eq!(read_to_string(&path).unwrap(), r#"{ "threads": "many" }"#);
}

/// Updates persist and are visible to the next load.
#[test]
fn test_update_persists_changes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested/config.json");

    let mut store = ConfigStore::load(&path).unwrap();
    store
        .update(|s| {
            s.channel_id = "@drops".to_string();
            s.bot_token = Some("1:abcdefghijkl".to_string());
        })
        .unwrap();

    let reloaded = ConfigStore::load(&path).unwrap();
    assert_eq!(reloaded.settings().channel_id, "@drops");
    assert_eq!(reloaded.settings().bot_token.as_deref(), Some("1:abcdefghijkl"));

    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() != "config.json")
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}
