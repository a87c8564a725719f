use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use zip_sender_core::archive::CompressionMode;
use zip_sender_core::pipeline::PipelineConfig;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

/// Part cap used against the public Bot API, which refuses uploads above 50 MB.
/// Zip headers push a part slightly past the sum of its files.
pub const PUBLIC_API_MAX_PART_MB: u64 = 45;

/// Keys that are always written out; a file missing any of them is rewritten with defaults filled in.
const REQUIRED_KEYS: [&str; 7] = [
    "channel_id",
    "max_size_mb",
    "threads",
    "compression_level",
    "delete_after_upload",
    "max_concurrent_transmissions",
    "api_base_url",
];

/// Persisted run settings, stored as pretty JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub compression_level: u32,
    /// Informational only; sources are removed after archiving regardless.
    #[serde(default = "default_true")]
    pub delete_after_upload: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transmissions: usize,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Keys we do not know about, carried through saves untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_max_size_mb() -> u64 {
    1900
}

fn default_threads() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    2
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

// api_id has been written both as a number and as a string.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel_id: String::new(),
            max_size_mb: default_max_size_mb(),
            threads: default_threads(),
            compression_level: 0,
            delete_after_upload: true,
            max_concurrent_transmissions: default_max_concurrent(),
            api_id: None,
            api_hash: None,
            bot_token: None,
            api_base_url: default_api_base_url(),
            extra: Map::new(),
        }
    }
}

impl Settings {
    /// True when uploads go through api.telegram.org rather than a self-hosted server.
    pub fn uses_public_api(&self) -> bool {
        self.api_base_url
            .trim_end_matches('/')
            .eq_ignore_ascii_case(DEFAULT_API_BASE_URL)
    }

    /// Part size cap in bytes, clamped to what the public Bot API accepts.
    pub fn max_bin_size(&self) -> u64 {
        let mut mb = self.max_size_mb;
        if self.uses_public_api() && mb > PUBLIC_API_MAX_PART_MB {
            warn!(
                max_size_mb = mb,
                clamped_to = PUBLIC_API_MAX_PART_MB,
                api_base_url = %self.api_base_url,
                "The public Bot API rejects files over 50 MB; set api_base_url to a self-hosted server for larger parts"
            );
            mb = PUBLIC_API_MAX_PART_MB;
        }
        mb.saturating_mul(1024 * 1024)
    }

    pub fn compression(&self) -> CompressionMode {
        CompressionMode::from_level(self.compression_level)
    }

    pub fn pipeline_config(&self, input_dir: PathBuf, output_dir: PathBuf) -> PipelineConfig {
        PipelineConfig {
            input_dir,
            output_dir,
            max_bin_size: self.max_bin_size(),
            threads: self.threads,
            compression: self.compression(),
        }
    }
}

/// The settings plus the file they live in. Every mutation goes through [`ConfigStore::update`],
/// which writes the file back atomically.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    settings: Settings,
}

impl ConfigStore {
    /// Loads `path`, creating it with defaults when absent and filling in missing keys.
    /// A file that cannot be parsed is left untouched and defaults are used for this run.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!(config_path = ?path, "Loading configuration from file");

        if !path.exists() {
            let store = Self {
                path,
                settings: Settings::default(),
            };
            store.save()?;
            info!(config_path = ?store.path, "Config file not found; wrote defaults");
            return Ok(store);
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                error!(error = ?e, config_path = ?path, "Failed to read config file");
                return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path, e));
            }
        };

        let raw: Map<String, Value> = match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, config_path = ?path, "Config file is not valid JSON; using defaults");
                return Ok(Self {
                    path,
                    settings: Settings::default(),
                });
            }
        };
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| !raw.contains_key(*key))
            .collect();

        let settings: Settings = match serde_json::from_value(Value::Object(raw)) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, config_path = ?path, "Config file has invalid values; using defaults");
                return Ok(Self {
                    path,
                    settings: Settings::default(),
                });
            }
        };

        let store = Self { path, settings };
        if !missing.is_empty() {
            info!(?missing, "Filling in missing config keys");
            store.save()?;
        }

        info!(
            channel_id = %store.settings.channel_id,
            max_size_mb = store.settings.max_size_mb,
            threads = store.settings.threads,
            compression_level = store.settings.compression_level,
            delete_after_upload = store.settings.delete_after_upload,
            max_concurrent_transmissions = store.settings.max_concurrent_transmissions,
            "Config loaded"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Applies `change` and persists the result.
    pub fn update<F>(&mut self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Settings),
    {
        change(&mut self.settings);
        self.save()
    }

    /// Writes the settings through a temp file in the same directory, then renames it into place.
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;

        let json = serde_json::to_string_pretty(&self.settings)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write config file {}", self.path.display()))?;
        info!(config_path = ?self.path, "Config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_cap_is_mebibytes() {
        let settings = Settings {
            max_size_mb: 2,
            ..Settings::default()
        };
        assert_eq!(settings.max_bin_size(), 2 * 1024 * 1024);
    }

    #[test]
    fn compression_follows_level() {
        let mut settings = Settings::default();
        assert_eq!(settings.compression(), CompressionMode::Stored);
        settings.compression_level = 6;
        assert_eq!(settings.compression(), CompressionMode::Deflated { level: 6 });
    }

    #[test]
    fn numeric_api_id_is_accepted() {
        let settings: Settings =
            serde_json::from_str(r#"{"api_id": 12345, "api_hash": "0123456789abcdef"}"#).unwrap();
        assert_eq!(settings.api_id.as_deref(), Some("12345"));
        assert_eq!(settings.threads, 4);
    }

    #[test]
    fn public_api_clamps_part_size() {
        let settings = Settings::default();
        assert!(settings.uses_public_api());
        assert_eq!(settings.max_bin_size(), PUBLIC_API_MAX_PART_MB * 1024 * 1024);

        let trailing = Settings {
            api_base_url: "https://api.telegram.org/".into(),
            ..Settings::default()
        };
        assert_eq!(trailing.max_bin_size(), PUBLIC_API_MAX_PART_MB * 1024 * 1024);
    }

    #[test]
    fn self_hosted_api_keeps_configured_part_size() {
        let settings = Settings {
            api_base_url: "http://localhost:8081".into(),
            ..Settings::default()
        };
        assert!(!settings.uses_public_api());
        assert_eq!(settings.max_bin_size(), 1900 * 1024 * 1024);
        assert_eq!(
            settings
                .pipeline_config("in".into(), "out".into())
                .max_bin_size,
            1900 * 1024 * 1024
        );
    }
}
