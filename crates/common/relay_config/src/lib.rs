//! Persisted relay configuration and active-project context.
//!
//! Both files live under `<home>/.myndhyve-cli/` (mode 0700 directory,
//! mode 0600 files) and are written with [`relay_utils::fs::atomic_write`]
//! so a reader never observes a half-written file.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

pub const CONFIG_DIR_NAME: &str = ".myndhyve-cli";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("home directory could not be determined")]
    HomeDirNotFound,

    #[error(transparent)]
    Fs(#[from] relay_utils::fs::FsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Returns `<home>/.myndhyve-cli`, creating it (mode 0700) if absent.
pub fn config_dir(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = home.join(CONFIG_DIR_NAME);
    relay_utils::fs::ensure_directory(&dir, 0o700)?;
    Ok(dir)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Whatsapp,
    Signal,
    Imessage,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Whatsapp => "whatsapp",
            ChannelKind::Signal => "signal",
            ChannelKind::Imessage => "imessage",
        }
    }
}

/// The three fields that make a relay "configured" are bundled into one
/// type so the type system enforces the "all present or all absent"
/// invariant from the data model, instead of three independent `Option`s
/// that could drift out of sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelIdentity {
    pub channel: ChannelKind,
    pub relay_id: String,
    pub device_token: String,
    pub device_token_expiry: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// `None` means unbounded retries, the default.
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub watchdog_timeout_secs: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            max_attempts: None,
            initial_delay_ms: 1_000,
            max_delay_ms: 300_000,
            watchdog_timeout_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub interval_secs: u64,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        HeartbeatPolicy { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundPolicy {
    pub poll_interval_secs: u64,
    pub max_per_poll: u32,
}

impl Default for OutboundPolicy {
    fn default() -> Self {
        OutboundPolicy {
            poll_interval_secs: 5,
            max_per_poll: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgePolicy {
    pub heartbeat_interval_secs: u64,
    pub pull_poll_interval_secs: u64,
    pub build_poll_interval_secs: u64,
}

impl Default for BridgePolicy {
    fn default() -> Self {
        BridgePolicy {
            heartbeat_interval_secs: 15,
            pull_poll_interval_secs: 5,
            build_poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayConfig {
    pub cloud_base_url: String,
    pub identity: Option<ChannelIdentity>,
    pub user_id: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: HeartbeatPolicy,
    pub outbound: OutboundPolicy,
    pub bridge: BridgePolicy,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            cloud_base_url: "https://cloud.myndhyve.dev".to_string(),
            identity: None,
            user_id: None,
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatPolicy::default(),
            outbound: OutboundPolicy::default(),
            bridge: BridgePolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn is_configured(&self) -> bool {
        self.identity.is_some()
    }

    pub fn path(home: &Path) -> Result<PathBuf, ConfigError> {
        Ok(config_dir(home)?.join("config.json"))
    }

    /// Loads the config at `path`. A missing file yields the defaults; a
    /// file that fails to parse also falls back to defaults with a logged
    /// warning rather than propagating the error, per the "a parse
    /// failure falls back to defaults" invariant.
    pub async fn load(path: &Path) -> Result<RelayConfig, ConfigError> {
        let Some(contents) = relay_utils::fs::read_optional(path).await? else {
            return Ok(RelayConfig::default());
        };

        match serde_json::from_slice(&contents) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to parse relay config, falling back to defaults"
                );
                Ok(RelayConfig::default())
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_vec_pretty(self)?;
        relay_utils::fs::atomic_write(path, &contents, 0o600).await?;
        Ok(())
    }
}

/// `context.json`: the currently active project pointer, set by the CLI's
/// project-selection command (outside the core) and read by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveProjectContext {
    pub project_id: String,
    pub project_name: String,
    pub hyve_id: String,
    pub hyve_name: Option<String>,
    pub set_at: String,
}

impl ActiveProjectContext {
    pub fn path(home: &Path) -> Result<PathBuf, ConfigError> {
        Ok(config_dir(home)?.join("context.json"))
    }

    pub async fn load(path: &Path) -> Result<Option<ActiveProjectContext>, ConfigError> {
        let Some(contents) = relay_utils::fs::read_optional(path).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&contents) {
            Ok(context) => Ok(Some(context)),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to parse active project context, ignoring"
                );
                Ok(None)
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_vec_pretty(self)?;
        relay_utils::fs::atomic_write(path, &contents, 0o600).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn load_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = RelayConfig::load(&path).await.unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = RelayConfig::default();
        config.identity = Some(ChannelIdentity {
            channel: ChannelKind::Whatsapp,
            relay_id: "relay-1".to_string(),
            device_token: "tok".to_string(),
            device_token_expiry: "2030-01-01T00:00:00Z".to_string(),
        });

        config.save(&path).await.unwrap();
        let loaded = RelayConfig::load(&path).await.unwrap();

        assert_eq!(loaded, config);
        assert!(loaded.is_configured());
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_defaults_instead_of_erroring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let config = RelayConfig::load(&path).await.unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[tokio::test]
    async fn config_file_is_written_with_mode_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        RelayConfig::default().save(&path).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
