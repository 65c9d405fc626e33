use std::path::{Path, PathBuf};

use iroh::SecretKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

static DATA_DIR_NAME: &str = "neobloom";
static DB_NAME: &str = "neobloom.sqlite";
static CONFIG_FILE_NAME: &str = "config.json";

// data_dir_path
// |- neobloom
//    |- neobloom.sqlite
//    |- config.json

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to find a data directory on this platform")]
    NoDataDir,
    #[error("config io error")]
    Io(#[from] std::io::Error),
    #[error("malformed config file")]
    Malformed(#[from] serde_json::Error),
}

fn default_secret_key() -> SecretKey {
    SecretKey::generate(&mut rand::rng())
}

/// Session and password-reset lifetimes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct AuthSettings {
    pub session_ttl_minutes: i64,
    pub password_reset_ttl_hours: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_ttl_minutes: 30,
            password_reset_ttl_hours: 24,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ContentSettings {
    /// Reading speed used for `Post::reading_time`.
    pub words_per_minute: u32,
    /// Upper bound applied to every `limit` on list operations.
    pub max_page_size: u64,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            words_per_minute: 200,
            max_page_size: 100,
        }
    }
}

/// Credentials for the superuser created on first start.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct NeoBloomConfig {
    /// Secret key for the local node.
    #[serde(default = "default_secret_key")]
    pub(crate) secret_key: SecretKey,

    pub(crate) database_path: PathBuf,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub content: ContentSettings,

    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdmin>,

    /// Create the default categories and tags when both tables are empty.
    #[serde(default)]
    pub seed_taxonomy: bool,
}

impl NeoBloomConfig {
    fn new(data_dir: &Path) -> Self {
        NeoBloomConfig {
            secret_key: default_secret_key(),
            database_path: data_dir.join(DB_NAME),
            auth: AuthSettings::default(),
            content: ContentSettings::default(),
            bootstrap_admin: None,
            seed_taxonomy: true,
        }
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.database_path.display())
    }
}

/// Loads `config.json` from the platform data directory, writing a fresh one on first run.
pub async fn get_or_init() -> Result<NeoBloomConfig, ConfigError> {
    let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
    get_or_init_in(&data_dir.join(DATA_DIR_NAME)).await
}

pub async fn get_or_init_in(dir: &Path) -> Result<NeoBloomConfig, ConfigError> {
    let config_path = dir.join(CONFIG_FILE_NAME);

    fs::create_dir_all(dir).await?;

    if fs::try_exists(&config_path).await? {
        let contents = fs::read_to_string(&config_path).await?;
        Ok(serde_json::from_str(&contents)?)
    } else {
        let config = NeoBloomConfig::new(dir);
        let json = serde_json::to_string_pretty(&config)?;
        fs::write(&config_path, json).await?;
        tracing::info!(path = %config_path.display(), "wrote new config");
        Ok(config)
    }
}
