//! `myndhyve-bridge`: daemon lifecycle and wiring for the project
//! bridge's four sub-loops. Requires a relay to already be
//! configured (for cloud credentials) and a project to already be selected
//! via `context.json`; the project root is the directory the daemon is
//! started from.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bridge_core::BridgeLoopConfig;
use clap::Parser;
use clap::Subcommand;
use cloud_client::CloudApi;
use cloud_client::CloudError;
use cloud_client::HttpCloudClient;
use cloud_client::TokenSource;
use ignore_matcher::IgnoreMatcher;
use relay_config::ActiveProjectContext;
use relay_config::RelayConfig;
use relay_core::ExitCode;
use tokio_util::sync::CancellationToken;

const DAEMON_ENV_VAR: &str = "MYNDHYVE_CLI_DAEMON";
const PID_FILE_NAME: &str = "bridge.pid";
const LOG_FILE_NAME: &str = "bridge.log";

#[derive(Parser)]
#[command(name = "myndhyve-bridge", about = "myndhyve-cli project bridge daemon")]
struct BridgeCli {
    #[command(subcommand)]
    command: BridgeCommand,
}

#[derive(Subcommand)]
enum BridgeCommand {
    /// Starts the bridge for the currently active project. Detaches into
    /// the background unless `--foreground`.
    Start {
        #[arg(long)]
        foreground: bool,
    },
    /// Sends SIGTERM to a running daemon, if any.
    Stop,
    /// Reports whether a daemon is currently running.
    Status,
}

/// See `myndhyve-relay`'s identical seam: no distinct refresh credential
/// exists in the wire model, so a refresh always fails fatally.
struct ConfigTokenSource {
    device_token: String,
}

#[async_trait::async_trait]
impl TokenSource for ConfigTokenSource {
    async fn current_token(&self) -> Option<String> {
        Some(self.device_token.clone())
    }

    async fn refresh(&self) -> Result<String, CloudError> {
        Err(CloudError::DeviceTokenExpired)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = BridgeCli::parse();
    let home: PathBuf = std::env::var("HOME")
        .map(PathBuf::from)
        .context("HOME is not set")?;

    let config_dir = relay_config::config_dir(&home).context("setting up config directory")?;
    let pid_path = config_dir.join(PID_FILE_NAME);
    let log_path = config_dir.join(LOG_FILE_NAME);

    match cli.command {
        BridgeCommand::Status => return report_status(&pid_path),
        BridgeCommand::Stop => {
            flockpid::stop(&pid_path).context("stopping daemon")?;
            return Ok(());
        }
        BridgeCommand::Start { foreground } if !foreground && std::env::var_os(DAEMON_ENV_VAR).is_none() => {
            return start_detached(&pid_path, &log_path).await;
        }
        BridgeCommand::Start { .. } => {}
    }

    let config = RelayConfig::load(&RelayConfig::path(&home)?).await.context("loading config")?;
    relay_utils::logging::init_tracing(&config.log_level);

    let identity = config
        .identity
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no channel is configured; run the relay's login first"))?;

    let context_path = ActiveProjectContext::path(&home)?;
    let context = ActiveProjectContext::load(&context_path)
        .await
        .context("loading active project context")?
        .ok_or_else(|| anyhow::anyhow!("no project is currently selected"))?;

    let project_root = std::env::current_dir().context("resolving project root")?;

    flockpid::write_own_pid(&pid_path).await.context("writing pid file")?;

    let tokens: Arc<dyn TokenSource> = Arc::new(ConfigTokenSource {
        device_token: identity.device_token,
    });
    let client: Arc<dyn CloudApi> = Arc::new(HttpCloudClient::new(config.cloud_base_url.clone(), tokens));

    let session = client
        .get_bridge_session(&context.project_id)
        .await
        .context("fetching bridge session")?;
    let ignore = Arc::new(
        IgnoreMatcher::new(&session.ignore_patterns).context("compiling ignore patterns")?,
    );

    let bridge_config = BridgeLoopConfig {
        client,
        session_id: session.session_id,
        project_id: context.project_id,
        project_root,
        ignore,
        policy: config.bridge,
    };

    let root = CancellationToken::new();
    relay_utils::signals::spawn_shutdown_listener(root.clone());

    bridge_core::run_bridge_loop(bridge_config, root)
        .await
        .context("running bridge loop")?;

    tracing::info!("bridge shut down cleanly");
    Ok(())
}

fn report_status(pid_path: &Path) -> anyhow::Result<()> {
    match flockpid::status(pid_path)? {
        flockpid::DaemonStatus::Running { pid } => {
            println!("running (pid {pid})");
            Ok(())
        }
        flockpid::DaemonStatus::NotRunning => {
            println!("not running");
            std::process::exit(ExitCode::NotFound.as_i32());
        }
    }
}

async fn start_detached(pid_path: &Path, log_path: &Path) -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("resolving own executable path")?;
    let pid = flockpid::start_detached(
        pid_path,
        log_path,
        &exe.display().to_string(),
        &["start".to_string(), "--foreground".to_string()],
        &[(DAEMON_ENV_VAR, "1")],
    )
    .await
    .context("starting daemon")?;
    println!("started (pid {pid})");
    Ok(())
}
