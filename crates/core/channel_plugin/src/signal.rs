//! Signal adapter skeleton: spawns `signal-cli` as a JSON-RPC-over-HTTP
//! daemon subprocess and owns its lifecycle (binary check, health poll,
//! stderr ring buffer, termination). The JSON-RPC wire protocol itself is
//! out of scope; this core proves the subprocess is alive and healthy, then
//! hands the rest to a not-yet-implemented RPC client.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloud_client::ChatEgressEnvelope;
use cloud_client::DeliveryResult;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::classify_retryable;
use crate::Channel;
use crate::ChannelPlugin;
use crate::InboundSink;
use crate::PluginError;
use crate::PluginStatus;
use crate::SUBPROCESS_PROBE_TIMEOUT;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 18080;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_CHECK_POLL_INTERVAL: Duration = Duration::from_millis(250);
const STDERR_RING_BUFFER_LINES: usize = 50;

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub binary_path: String,
    pub data_dir: Option<PathBuf>,
    pub account: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            binary_path: "signal-cli".to_string(),
            data_dir: None,
            account: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Why the `signal-cli` subprocess failed to reach a healthy state.
#[derive(Debug, thiserror::Error)]
pub enum SignalStartError {
    #[error("signal-cli binary not found at {path:?}")]
    NotInstalled { path: String },

    #[error("failed to spawn signal-cli: {reason}")]
    SpawnFailed { reason: String },

    #[error("signal-cli crashed before becoming healthy; stderr tail:\n{stderr_tail}")]
    Crashed { stderr_tail: String },

    #[error("signal-cli did not become healthy within {0:?}")]
    Timeout(Duration),
}

impl From<SignalStartError> for PluginError {
    fn from(err: SignalStartError) -> Self {
        PluginError::ConnectionLost {
            reason: err.to_string(),
        }
    }
}

/// A bounded tail of the subprocess's stderr, used to diagnose a crash.
#[derive(Default)]
struct StderrRingBuffer {
    lines: VecDeque<String>,
}

impl StderrRingBuffer {
    fn push(&mut self, line: String) {
        if self.lines.len() >= STDERR_RING_BUFFER_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn tail(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Verifies the configured binary exists and runs, with a 5s timeout.
async fn verify_binary_installed(binary_path: &str) -> Result<(), SignalStartError> {
    let probe = Command::new(binary_path).arg("--version").output();
    match tokio::time::timeout(SUBPROCESS_PROBE_TIMEOUT, probe).await {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(_)) | Ok(Err(_)) => Err(SignalStartError::NotInstalled {
            path: binary_path.to_string(),
        }),
        Err(_) => Err(SignalStartError::NotInstalled {
            path: binary_path.to_string(),
        }),
    }
}

fn build_args(config: &SignalConfig) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(data_dir) = &config.data_dir {
        args.push("--config".to_string());
        args.push(data_dir.display().to_string());
    }
    if let Some(account) = &config.account {
        args.push("-a".to_string());
        args.push(account.clone());
    }
    args.push("daemon".to_string());
    args.push("--http".to_string());
    args.push(format!("{}:{}", config.host, config.port));
    args
}

/// Polls the daemon's JSON-RPC-over-HTTP endpoint until it answers
/// successfully, or `HEALTH_CHECK_TIMEOUT` elapses, or `child` exits first.
async fn wait_until_healthy(
    config: &SignalConfig,
    child: &mut Child,
    stderr: &Arc<Mutex<StderrRingBuffer>>,
) -> Result<(), SignalStartError> {
    let http = reqwest::Client::new();
    let url = format!("http://{}:{}", config.host, config.port);
    let deadline = tokio::time::Instant::now() + HEALTH_CHECK_TIMEOUT;

    loop {
        if let Some(status) = child.try_wait().map_err(|err| SignalStartError::SpawnFailed {
            reason: err.to_string(),
        })? {
            let _ = status;
            return Err(SignalStartError::Crashed {
                stderr_tail: stderr.lock().await.tail(),
            });
        }

        if http.get(&url).send().await.is_ok() {
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(SignalStartError::Timeout(HEALTH_CHECK_TIMEOUT));
        }

        tokio::time::sleep(HEALTH_CHECK_POLL_INTERVAL).await;
    }
}

pub struct SignalPlugin {
    config: SignalConfig,
    child: Mutex<Option<Child>>,
}

impl SignalPlugin {
    pub fn new(config: SignalConfig) -> Self {
        SignalPlugin {
            config,
            child: Mutex::new(None),
        }
    }

    async fn spawn_and_wait_healthy(&self) -> Result<Child, SignalStartError> {
        verify_binary_installed(&self.config.binary_path).await?;

        let mut command = Command::new(&self.config.binary_path);
        command
            .args(build_args(&self.config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|err| SignalStartError::SpawnFailed {
            reason: err.to_string(),
        })?;

        let stderr_buffer = Arc::new(Mutex::new(StderrRingBuffer::default()));
        if let Some(stderr) = child.stderr.take() {
            let buffer = stderr_buffer.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    buffer.lock().await.push(line);
                }
            });
        }

        wait_until_healthy(&self.config, &mut child, &stderr_buffer).await?;
        Ok(child)
    }
}

#[async_trait]
impl ChannelPlugin for SignalPlugin {
    fn channel(&self) -> Channel {
        Channel::Signal
    }

    fn display_name(&self) -> &str {
        "Signal"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn unsupported_reason(&self) -> Option<&str> {
        None
    }

    async fn login(&self) -> Result<(), PluginError> {
        // Device linking (`signal-cli link`) is a separate subprocess
        // invocation outside the daemon subprocess lifecycle this core
        // owns; left as a seam for the CLI's login command.
        Err(PluginError::Unknown {
            reason: "signal-cli device linking is not implemented in this skeleton".into(),
        })
    }

    async fn is_authenticated(&self) -> bool {
        self.config.account.is_some()
    }

    async fn start(
        &self,
        _sink: Arc<dyn InboundSink>,
        ctx: CancellationToken,
    ) -> Result<(), PluginError> {
        let child = self.spawn_and_wait_healthy().await?;
        *self.child.lock().await = Some(child);

        // The real adapter would now poll/subscribe to signal-cli's
        // JSON-RPC notifications and translate them into
        // `ChatIngressEnvelope`s on `sink`; that wire decode is out of
        // scope here.
        ctx.cancelled().await;

        if let Some(mut child) = self.child.lock().await.take() {
            if let Some(pid) = child.id() {
                let _ = relay_utils::signals::terminate(pid);
            }
            let _ = child.wait().await;
        }
        Ok(())
    }

    async fn deliver(&self, envelope: &ChatEgressEnvelope) -> Result<DeliveryResult, PluginError> {
        let _ = envelope;
        Ok(DeliveryResult::failure(
            "signal-cli JSON-RPC send is not implemented in this skeleton",
            classify_retryable("not implemented"),
            0,
        ))
    }

    async fn get_status(&self) -> PluginStatus {
        if self.child.lock().await.is_some() {
            PluginStatus::Connected
        } else {
            PluginStatus::Disconnected
        }
    }

    async fn logout(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_classified_not_installed() {
        let err = verify_binary_installed("/no/such/signal-cli-binary")
            .await
            .unwrap_err();
        assert!(matches!(err, SignalStartError::NotInstalled { .. }));
    }

    #[test]
    fn build_args_includes_config_and_account_when_present() {
        let config = SignalConfig {
            binary_path: "signal-cli".to_string(),
            data_dir: Some(PathBuf::from("/data")),
            account: Some("+15551234567".to_string()),
            host: "127.0.0.1".to_string(),
            port: 18080,
        };
        let args = build_args(&config);
        assert_eq!(
            args,
            vec![
                "--config",
                "/data",
                "-a",
                "+15551234567",
                "daemon",
                "--http",
                "127.0.0.1:18080",
            ]
        );
    }

    #[test]
    fn build_args_omits_optional_flags_when_absent() {
        let config = SignalConfig::default();
        let args = build_args(&config);
        assert_eq!(args, vec!["daemon", "--http", "127.0.0.1:18080"]);
    }

    #[tokio::test]
    async fn stderr_ring_buffer_evicts_oldest_lines() {
        let mut buffer = StderrRingBuffer::default();
        for i in 0..(STDERR_RING_BUFFER_LINES + 10) {
            buffer.push(format!("line {i}"));
        }
        assert_eq!(buffer.lines.len(), STDERR_RING_BUFFER_LINES);
        assert!(!buffer.tail().contains("line 0\n"));
        assert!(buffer
            .tail()
            .contains(&format!("line {}", STDERR_RING_BUFFER_LINES + 9)));
    }
}
