//! `myndhyve-relay`: daemon lifecycle and wiring for the relay
//! supervisor. The CLI surface is intentionally thin: `start` brings
//! up the supervisor (foreground or detached), `stop`/`status` manage the
//! pid file, `login`/`logout` drive the resolved channel plugin directly.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use channel_plugin::imessage::IMessagePlugin;
use channel_plugin::signal::SignalConfig;
use channel_plugin::signal::SignalPlugin;
use channel_plugin::whatsapp::WhatsAppPlugin;
use channel_plugin::ChannelPlugin;
use clap::Parser;
use clap::Subcommand;
use cloud_client::CloudError;
use cloud_client::HttpCloudClient;
use cloud_client::TokenSource;
use relay_config::ChannelIdentity;
use relay_config::ChannelKind;
use relay_config::RelayConfig;
use relay_core::ExitCode;
use relay_core::ExitOutcome;
use relay_core::RelaySupervisor;
use tokio_util::sync::CancellationToken;

const DAEMON_ENV_VAR: &str = "MYNDHYVE_CLI_DAEMON";
const PID_FILE_NAME: &str = "relay.pid";
const LOG_FILE_NAME: &str = "relay.log";

#[derive(Parser)]
#[command(name = "myndhyve-relay", about = "myndhyve-cli chat relay daemon")]
struct RelayCli {
    #[command(subcommand)]
    command: RelayCommand,
}

#[derive(Subcommand)]
enum RelayCommand {
    /// Starts the relay. Detaches into the background unless `--foreground`.
    Start {
        #[arg(long)]
        foreground: bool,
    },
    /// Sends SIGTERM to a running daemon, if any.
    Stop,
    /// Reports whether a daemon is currently running.
    Status,
    /// Runs the resolved channel plugin's interactive login.
    Login,
    /// Scrubs the resolved channel plugin's persisted credentials.
    Logout,
}

/// Backs [`TokenSource`] with the device token persisted by `register`.
/// Neither the wire model nor [`cloud_client::CloudApi`] expose a distinct
/// refresh credential, so a refresh always surfaces
/// [`CloudError::DeviceTokenExpired`] and the supervisor treats it as fatal,
/// the same way an actual 401-after-refresh would.
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

fn resolve_plugin(identity: &ChannelIdentity, config_dir: &Path) -> anyhow::Result<Arc<dyn ChannelPlugin>> {
    Ok(match identity.channel {
        ChannelKind::Whatsapp => Arc::new(WhatsAppPlugin::new(config_dir)?),
        ChannelKind::Signal => Arc::new(SignalPlugin::new(SignalConfig {
            data_dir: Some(config_dir.join("signal")),
            ..SignalConfig::default()
        })),
        ChannelKind::Imessage => Arc::new(IMessagePlugin::new()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = RelayCli::parse();
    let home: PathBuf = std::env::var("HOME")
        .map(PathBuf::from)
        .context("HOME is not set")?;

    let config_dir = relay_config::config_dir(&home).context("setting up config directory")?;
    let config_path = config_dir.join("config.json");
    let pid_path = config_dir.join(PID_FILE_NAME);
    let log_path = config_dir.join(LOG_FILE_NAME);

    match cli.command {
        RelayCommand::Status => {
            return report_status(&pid_path);
        }
        RelayCommand::Stop => {
            flockpid::stop(&pid_path).context("stopping daemon")?;
            return Ok(());
        }
        RelayCommand::Start { foreground } if !foreground && std::env::var_os(DAEMON_ENV_VAR).is_none() => {
            return start_detached(&pid_path, &log_path).await;
        }
        _ => {}
    }

    let config = RelayConfig::load(&config_path).await.context("loading config")?;
    relay_utils::logging::init_tracing(&config.log_level);

    let identity = config
        .identity
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no channel is configured; pair a device first"))?;
    let plugin = resolve_plugin(&identity, &config_dir)?;

    match cli.command {
        RelayCommand::Login => plugin.login().await.map_err(Into::into),
        RelayCommand::Logout => plugin.logout().await.map_err(Into::into),
        RelayCommand::Start { .. } => run_foreground(config, identity, plugin, &pid_path).await,
        RelayCommand::Status | RelayCommand::Stop => unreachable!("handled above"),
    }
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

async fn run_foreground(
    config: RelayConfig,
    identity: ChannelIdentity,
    plugin: Arc<dyn ChannelPlugin>,
    pid_path: &Path,
) -> anyhow::Result<()> {
    flockpid::write_own_pid(pid_path)
        .await
        .context("writing pid file")?;

    let tokens: Arc<dyn TokenSource> = Arc::new(ConfigTokenSource {
        device_token: identity.device_token,
    });
    let client: Arc<dyn cloud_client::CloudApi> =
        Arc::new(HttpCloudClient::new(config.cloud_base_url.clone(), tokens));

    let supervisor = RelaySupervisor::new(client, plugin, config.reconnect, config.heartbeat, config.outbound);

    let root = CancellationToken::new();
    relay_utils::signals::spawn_shutdown_listener(root.clone());

    let outcome = supervisor.run(root).await;
    report_outcome(&outcome);
    std::process::exit(outcome.exit_code().as_i32());
}

fn report_outcome(outcome: &ExitOutcome) {
    match outcome {
        ExitOutcome::Shutdown => tracing::info!("relay shut down cleanly"),
        ExitOutcome::Unauthorized { reason } => tracing::error!(%reason, "relay stopped: unauthorized"),
        ExitOutcome::Unsupported { reason } => tracing::error!(%reason, "relay stopped: unsupported platform"),
        ExitOutcome::GeneralError { reason } => tracing::error!(%reason, "relay stopped: general error"),
    }
}
