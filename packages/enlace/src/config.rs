use anyhow::{Context, Result};
use enlace_hub::{DEFAULT_QUEUE_CAPACITY, HubConfig, PumpConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [hub]
//                    queue_capacity = 128
//
//   env var:         ENLACE_HUB__QUEUE_CAPACITY=128   (double underscore = nesting)
//
//   (single underscore stays within field names: ENLACE_AUTH__JWT_SECRET)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub hub: HubFileConfig,
}

/// Listener and CORS settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Origins allowed by CORS. Empty means permissive.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Bearer token verification (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

/// Real-time push tunables (lives under `[hub]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubFileConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Heartbeat period for live connections; 0 disables pings.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

impl Default for HubFileConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_ping_interval_secs() -> u64 {
    30
}

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;

/// Build a figment that layers: defaults → config.toml → ENLACE_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `ENLACE_AUTH__JWT_SECRET=...`  →  `auth.jwt_secret = "..."`
///   `ENLACE_HUB__PING_INTERVAL_SECS=0`  →  `hub.ping_interval_secs = 0`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("ENLACE_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Token verification settings (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// HS256 shared secret
    pub jwt_secret: String,
    /// Required `iss` claim, if set
    pub issuer: Option<String>,
    /// Required `aud` claim, if set
    pub audience: Option<String>,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Result<Self> {
        let jwt_secret = fc
            .jwt_secret
            .clone()
            .filter(|s| !s.is_empty())
            .context("auth.jwt_secret must be set (config.toml or ENLACE_AUTH__JWT_SECRET)")?;

        Ok(Self {
            jwt_secret,
            issuer: fc.issuer.clone(),
            audience: fc.audience.clone(),
        })
    }
}

/// Hub and pump settings (runtime view).
#[derive(Clone, Debug)]
pub struct PushConfig {
    pub hub: HubConfig,
    pub pumps: PumpConfig,
}

impl PushConfig {
    pub fn from_file(fc: &HubFileConfig) -> Self {
        Self {
            hub: HubConfig {
                queue_capacity: fc.queue_capacity,
            },
            pumps: PumpConfig {
                ping_interval: if fc.ping_interval_secs == 0 {
                    None
                } else {
                    Some(Duration::from_secs(fc.ping_interval_secs))
                },
            },
        }
    }
}

// =============================================================================
// Directory layout config (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct EnlaceConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl EnlaceConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".enlace"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("enlace.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn reset_database(&self) -> Result<()> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path)
                .with_context(|| format!("Failed to delete database: {:?}", self.db_path))?;
            info!("Database reset: {:?}", self.db_path);

            let wal_path = self.db_path.with_extension("db-wal");
            if wal_path.exists() {
                std::fs::remove_file(&wal_path)?;
            }
            let shm_path = self.db_path.with_extension("db-shm");
            if shm_path.exists() {
                std::fs::remove_file(&shm_path)?;
            }
        }
        Ok(())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
